use bytes::Bytes;
use dataport_event::{ChangeEvent, Opcode};

use crate::keys::ComputedKeys;

/// Returns the opcode an event is routed under.
///
/// Tombstones that still carry extended attributes are routed as mutations when the definition retains them, so that
/// the attribute payload is indexed instead of removed. Every other event keeps its own opcode.
pub fn normalized_opcode(event: &ChangeEvent, retain_deleted_xattr: bool) -> Opcode {
    let opcode = event.opcode();
    if retain_deleted_xattr && event.has_extended_attributes() && opcode.is_removal() {
        Opcode::Mutation
    } else {
        opcode
    }
}

/// The routing action chosen for a data event.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RoutingDecision {
    /// Deliver the new key to the endpoints that own it.
    Upsert {
        /// Key computed from the new value.
        new_key: Option<Bytes>,

        /// Key computed from the old value.
        old_key: Option<Bytes>,

        /// Partition key of the new value.
        new_partition_key: Option<Bytes>,
    },

    /// No endpoint accepted the upsert, so stale entries are removed instead.
    UpsertWithFallbackDeletion {
        /// Key computed from the old value.
        old_key: Option<Bytes>,

        /// Partition key of the new value.
        new_partition_key: Option<Bytes>,
    },

    /// The document no longer matches the index, so every endpoint that may hold it removes it.
    BroadcastDeletion {
        /// Key computed from the old value.
        old_key: Option<Bytes>,

        /// Partition key of the new value.
        new_partition_key: Option<Bytes>,
    },

    /// The document was deleted or expired.
    PlainDeletion {
        /// Partition key of the old value.
        old_partition_key: Option<Bytes>,

        /// Key computed from the old value.
        old_key: Option<Bytes>,
    },
}

impl RoutingDecision {
    /// Returns the fallback for an upsert that resolved to no endpoints.
    ///
    /// Only [`RoutingDecision::Upsert`] has a fallback.
    pub fn fallback(&self) -> Option<Self> {
        match self {
            Self::Upsert {
                old_key,
                new_partition_key,
                ..
            } => Some(Self::UpsertWithFallbackDeletion {
                old_key: old_key.clone(),
                new_partition_key: new_partition_key.clone(),
            }),
            _ => None,
        }
    }

    /// Returns the name of the decision.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upsert { .. } => "upsert",
            Self::UpsertWithFallbackDeletion { .. } => "upsert_with_fallback_deletion",
            Self::BroadcastDeletion { .. } => "broadcast_deletion",
            Self::PlainDeletion { .. } => "plain_deletion",
        }
    }
}

/// Classifies a data event into a routing decision.
///
/// `opcode` is expected to already be normalized with [`normalized_opcode`]. Mutations become upserts when the index
/// filter passes and broadcast deletions otherwise; deletions and expirations become plain deletions. Any other opcode
/// yields `None`.
pub fn classify(opcode: Opcode, keys: &ComputedKeys) -> Option<RoutingDecision> {
    match opcode {
        Opcode::Mutation if keys.matches() => Some(RoutingDecision::Upsert {
            new_key: keys.new_key.clone(),
            old_key: keys.old_key.clone(),
            new_partition_key: keys.new_partition_key.clone(),
        }),
        Opcode::Mutation => Some(RoutingDecision::BroadcastDeletion {
            old_key: keys.old_key.clone(),
            new_partition_key: keys.new_partition_key.clone(),
        }),
        Opcode::Deletion | Opcode::Expiration => Some(RoutingDecision::PlainDeletion {
            old_partition_key: keys.old_partition_key.clone(),
            old_key: keys.old_key.clone(),
        }),
        _ => None,
    }
}
