use metrics::{counter, Counter, Label};

use crate::definition::TransformDefinition;

/// Router counters, labeled with the source and index instance of the definition the router was built from.
#[derive(Clone)]
pub(crate) struct RouterMetrics {
    events_routed: Counter,
    upserts: Counter,
    upsert_deletions: Counter,
    deletions: Counter,
    fallback_deletions: Counter,
    evaluation_failures: Counter,
    dropped_opcodes: Counter,
}

impl RouterMetrics {
    pub(crate) fn new(definition: &TransformDefinition) -> Self {
        let labels = vec![
            Label::new("source", definition.source.to_string()),
            Label::new("instance_id", definition.instance_id.to_string()),
        ];

        Self {
            events_routed: counter!("transform_router_events_routed_total", labels.clone()),
            upserts: counter!("transform_router_upserts_total", labels.clone()),
            upsert_deletions: counter!("transform_router_upsert_deletions_total", labels.clone()),
            deletions: counter!("transform_router_deletions_total", labels.clone()),
            fallback_deletions: counter!("transform_router_fallback_deletions_total", labels.clone()),
            evaluation_failures: counter!("transform_router_evaluation_failures_total", labels.clone()),
            dropped_opcodes: counter!("transform_router_dropped_opcodes_total", labels),
        }
    }

    pub(crate) fn events_routed(&self) -> &Counter {
        &self.events_routed
    }

    /// Entries appended as upserts.
    pub(crate) fn upserts(&self) -> &Counter {
        &self.upserts
    }

    /// Entries appended as upsert-deletions, including fallbacks.
    pub(crate) fn upsert_deletions(&self) -> &Counter {
        &self.upsert_deletions
    }

    pub(crate) fn deletions(&self) -> &Counter {
        &self.deletions
    }

    /// Events whose upsert resolved to no endpoints.
    pub(crate) fn fallback_deletions(&self) -> &Counter {
        &self.fallback_deletions
    }

    pub(crate) fn evaluation_failures(&self) -> &Counter {
        &self.evaluation_failures
    }

    pub(crate) fn dropped_opcodes(&self) -> &Counter {
        &self.dropped_opcodes
    }
}
