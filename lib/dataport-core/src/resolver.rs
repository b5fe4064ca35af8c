use std::{fmt, sync::Arc};

use dataport_event::ChangeEvent;
use serde::{Deserialize, Serialize};

/// Network address of an index endpoint.
///
/// Addresses are cheap to clone, as they are shared between the topology and every batch routed to them.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct EndpointAddress(Arc<str>);

impl EndpointAddress {
    /// Returns the address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EndpointAddress {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

impl From<String> for EndpointAddress {
    fn from(value: String) -> Self {
        Self(value.into())
    }
}

/// Resolves the endpoints an event must be delivered to.
///
/// Resolution is a pure function of its inputs and of the topology snapshot held by the implementation. Implementations
/// must never block waiting for topology: when no topology is available, they return an empty list.
///
/// Keys are passed as computed for the event; any of them may be absent.
pub trait EndpointResolver {
    /// Endpoints that own the new version of the document and should receive an upsert.
    ///
    /// An empty result means no endpoint currently accepts the document.
    fn upsert_endpoints(
        &self, event: &ChangeEvent, new_partition_key: Option<&[u8]>, new_key: Option<&[u8]>, old_key: Option<&[u8]>,
    ) -> Vec<EndpointAddress>;

    /// Endpoints that may hold a stale entry for the document, regardless of which endpoint owns it now.
    fn upsert_deletion_endpoints(
        &self, event: &ChangeEvent, new_partition_key: Option<&[u8]>, new_key: Option<&[u8]>, old_key: Option<&[u8]>,
    ) -> Vec<EndpointAddress>;

    /// Endpoints that must remove the document.
    ///
    /// When `old_key` is absent, implementations are expected to broadcast to every endpoint that could hold the
    /// document.
    fn deletion_endpoints(
        &self, event: &ChangeEvent, old_partition_key: Option<&[u8]>, old_key: Option<&[u8]>,
    ) -> Vec<EndpointAddress>;
}

impl<R> EndpointResolver for Arc<R>
where
    R: EndpointResolver + ?Sized,
{
    fn upsert_endpoints(
        &self, event: &ChangeEvent, new_partition_key: Option<&[u8]>, new_key: Option<&[u8]>, old_key: Option<&[u8]>,
    ) -> Vec<EndpointAddress> {
        (**self).upsert_endpoints(event, new_partition_key, new_key, old_key)
    }

    fn upsert_deletion_endpoints(
        &self, event: &ChangeEvent, new_partition_key: Option<&[u8]>, new_key: Option<&[u8]>, old_key: Option<&[u8]>,
    ) -> Vec<EndpointAddress> {
        (**self).upsert_deletion_endpoints(event, new_partition_key, new_key, old_key)
    }

    fn deletion_endpoints(
        &self, event: &ChangeEvent, old_partition_key: Option<&[u8]>, old_key: Option<&[u8]>,
    ) -> Vec<EndpointAddress> {
        (**self).deletion_endpoints(event, old_partition_key, old_key)
    }
}
