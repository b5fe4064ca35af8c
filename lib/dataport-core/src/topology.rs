//! Static endpoint topology.
//!
//! [`StaticTopology`] is an [`EndpointResolver`] over a fixed list of endpoints. Each endpoint owns an equal, contiguous
//! share of a 64-bit hash ring, and a document is owned by the endpoint whose share contains the hash of its partition
//! key (or of its document key, when no partition key was computed). Endpoints can be marked as not accepting upserts,
//! such as while they are being drained, in which case documents they own resolve to no upsert endpoint at all.

use dataport_event::ChangeEvent;
use serde::Deserialize;
use twox_hash::XxHash64;

use crate::resolver::{EndpointAddress, EndpointResolver};

const RING_SEED: u64 = 0;

fn default_accepting() -> bool {
    true
}

/// Configuration of a single endpoint.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct EndpointConfiguration {
    /// Address of the endpoint.
    pub address: EndpointAddress,

    /// Whether the endpoint accepts upserts.
    ///
    /// Defaults to `true`.
    #[serde(default = "default_accepting")]
    pub accepting: bool,
}

/// Static topology configuration.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct TopologyConfiguration {
    /// Endpoints, in ring order.
    #[serde(default)]
    pub endpoints: Vec<EndpointConfiguration>,
}

/// A fixed set of endpoints sharing a hash ring.
#[derive(Clone, Debug, Default)]
pub struct StaticTopology {
    endpoints: Vec<EndpointConfiguration>,
    all: Vec<EndpointAddress>,
}

impl StaticTopology {
    /// Creates a new `StaticTopology` from the given configuration.
    pub fn from_configuration(config: &TopologyConfiguration) -> Self {
        let endpoints = config.endpoints.clone();
        let all = endpoints.iter().map(|endpoint| endpoint.address.clone()).collect();
        Self { endpoints, all }
    }

    /// Creates a new `StaticTopology` where every endpoint accepts upserts.
    pub fn accepting<I, A>(addresses: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<EndpointAddress>,
    {
        let endpoints = addresses
            .into_iter()
            .map(|address| EndpointConfiguration {
                address: address.into(),
                accepting: true,
            })
            .collect();
        Self::from_configuration(&TopologyConfiguration { endpoints })
    }

    /// Returns the number of endpoints.
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Returns `true` if the topology has no endpoints.
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Returns the endpoint owning the given key, if there are any endpoints.
    pub fn owner(&self, key: &[u8]) -> Option<&EndpointConfiguration> {
        if self.endpoints.is_empty() {
            return None;
        }

        let hash = XxHash64::oneshot(RING_SEED, key);
        let index = ((u128::from(hash) * self.endpoints.len() as u128) >> 64) as usize;
        self.endpoints.get(index)
    }
}

impl EndpointResolver for StaticTopology {
    fn upsert_endpoints(
        &self, event: &ChangeEvent, new_partition_key: Option<&[u8]>, _new_key: Option<&[u8]>, _old_key: Option<&[u8]>,
    ) -> Vec<EndpointAddress> {
        let ring_key = new_partition_key.unwrap_or(&event.key()[..]);
        match self.owner(ring_key) {
            Some(owner) if owner.accepting => vec![owner.address.clone()],
            _ => Vec::new(),
        }
    }

    fn upsert_deletion_endpoints(
        &self, _event: &ChangeEvent, _new_partition_key: Option<&[u8]>, _new_key: Option<&[u8]>,
        _old_key: Option<&[u8]>,
    ) -> Vec<EndpointAddress> {
        self.all.clone()
    }

    fn deletion_endpoints(
        &self, _event: &ChangeEvent, _old_partition_key: Option<&[u8]>, _old_key: Option<&[u8]>,
    ) -> Vec<EndpointAddress> {
        self.all.clone()
    }
}
