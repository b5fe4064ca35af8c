use std::sync::Arc;

use arc_swap::ArcSwap;
use bytes::BytesMut;
use dataport_event::{ChangeEvent, Opcode};
use tracing::{debug, trace, warn};

use crate::{
    batch::{BatchAccumulator, BatchSeed, Command, KeyVersion},
    classify::{classify, normalized_opcode, RoutingDecision},
    definition::{RouterConfiguration, TransformDefinition, UnknownOpcodePolicy},
    error::{RouteError, UnknownOpcode},
    evaluate::KeyEvaluator,
    keys::{compute_keys, ComputedKeys},
    lifecycle::LifecycleMessage,
    resolver::{EndpointAddress, EndpointResolver},
    telemetry::RouterMetrics,
    version::{gate_encode_buffer, FeedVersion},
};

/// What the router did with an event.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RouteAction {
    /// The new key was delivered to the endpoints owning it.
    Upsert,

    /// No endpoint accepted the upsert, so stale entries were removed instead.
    FallbackDeletion,

    /// The document no longer matches the index, and its removal was announced to every candidate endpoint.
    BroadcastDeletion,

    /// The document was deleted or expired.
    Deletion,

    /// The event carried an opcode the router does not handle, and was skipped.
    Dropped,
}

/// Result of routing a single event.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RouteOutcome {
    /// What the router did with the event.
    pub action: RouteAction,

    /// Number of endpoints an entry was appended for.
    pub destinations: usize,
}

impl RouteOutcome {
    const fn dropped() -> Self {
        Self {
            action: RouteAction::Dropped,
            destinations: 0,
        }
    }
}

/// Transform-and-route engine for a single transform deployment.
///
/// A router is immutable once built: its definition, feed version, evaluator, and resolver are fixed, so a single
/// router can be shared between every partition worker. Each worker must route into its own [`BatchAccumulator`].
pub struct TransformRouter<E, R> {
    definition: Arc<TransformDefinition>,
    feed_version: FeedVersion,
    unknown_opcodes: UnknownOpcodePolicy,
    evaluator: E,
    resolver: R,
    metrics: RouterMetrics,
}

impl<E, R> TransformRouter<E, R>
where
    E: KeyEvaluator,
    R: EndpointResolver,
{
    /// Creates a new `TransformRouter` for the given definition.
    ///
    /// The router uses the current feed version and drops unknown opcodes.
    pub fn new(definition: TransformDefinition, evaluator: E, resolver: R) -> Self {
        let metrics = RouterMetrics::new(&definition);
        Self {
            definition: Arc::new(definition),
            feed_version: FeedVersion::default(),
            unknown_opcodes: UnknownOpcodePolicy::default(),
            evaluator,
            resolver,
            metrics,
        }
    }

    /// Creates a new `TransformRouter` from the given configuration.
    pub fn from_configuration(config: &RouterConfiguration, evaluator: E, resolver: R) -> Self {
        Self::new(config.definition.clone(), evaluator, resolver)
            .with_feed_version(config.feed_version)
            .with_unknown_opcode_policy(config.unknown_opcodes)
    }

    /// Sets the negotiated feed version.
    pub fn with_feed_version(mut self, feed_version: FeedVersion) -> Self {
        self.feed_version = feed_version;
        self
    }

    /// Sets the handling of unknown opcodes.
    pub fn with_unknown_opcode_policy(mut self, policy: UnknownOpcodePolicy) -> Self {
        self.unknown_opcodes = policy;
        self
    }

    /// Returns the definition this router was built from.
    pub fn definition(&self) -> &TransformDefinition {
        &self.definition
    }

    /// Returns the negotiated feed version.
    pub fn feed_version(&self) -> FeedVersion {
        self.feed_version
    }

    /// Routes a data event into `batches`.
    ///
    /// Keys are computed for the new and old values of the event, the event is classified, and one entry is appended
    /// to `batches` for every endpoint the classification resolves to. `encode_buffer` is offered to the evaluator
    /// unless the feed version predates accelerated key encoding.
    ///
    /// # Errors
    ///
    /// If the transform fails for either value of the event, an error is returned and nothing is appended to
    /// `batches`. Entries routed by earlier calls are kept. If the event carries an opcode the router does not handle
    /// and the router rejects unknown opcodes, an error is returned as well.
    pub fn route(
        &self, event: &ChangeEvent, encode_buffer: Option<&mut BytesMut>, batches: &mut BatchAccumulator,
    ) -> Result<RouteOutcome, RouteError> {
        let opcode = normalized_opcode(event, self.definition.retain_deleted_xattr);
        if !opcode.is_data() {
            return self.unhandled(event);
        }

        // Retained tombstones are routed as mutations whose body is the attribute payload.
        let normalized;
        let event = if opcode != event.opcode() {
            let mut retained = event.clone();
            retained.treat_as_json();
            normalized = retained;
            &normalized
        } else {
            event
        };

        let encode_buffer = gate_encode_buffer(self.feed_version, encode_buffer);
        let keys = match compute_keys(&self.evaluator, event, encode_buffer) {
            Ok(keys) => keys,
            Err(e) => {
                self.metrics.evaluation_failures().increment(1);
                warn!(
                    source = %self.definition.source,
                    partition_id = event.partition_id(),
                    seqno = event.seqno(),
                    error = %e,
                    "Failed to compute keys for event. Skipping."
                );
                return Err(e);
            }
        };

        let Some(decision) = classify(opcode, &keys) else {
            return self.unhandled(event);
        };

        let (decision, destinations) = self.resolve(event, &keys, decision);
        let action = match &decision {
            RoutingDecision::Upsert { .. } => RouteAction::Upsert,
            RoutingDecision::UpsertWithFallbackDeletion { .. } => RouteAction::FallbackDeletion,
            RoutingDecision::BroadcastDeletion { .. } => RouteAction::BroadcastDeletion,
            RoutingDecision::PlainDeletion { .. } => RouteAction::Deletion,
        };

        debug!(
            partition_id = event.partition_id(),
            seqno = event.seqno(),
            opcode = %event.opcode(),
            decision = decision.as_str(),
            destinations = destinations.len(),
            "Routed event."
        );

        let entry = KeyVersion {
            seqno: event.seqno(),
            docid: event.key().clone(),
            ctime: event.ctime(),
            command: self.command_for(decision, &keys),
        };
        self.append(event, &destinations, entry, batches);

        self.metrics.events_routed().increment(1);
        Ok(RouteOutcome {
            action,
            destinations: destinations.len(),
        })
    }

    fn resolve(
        &self, event: &ChangeEvent, keys: &ComputedKeys, decision: RoutingDecision,
    ) -> (RoutingDecision, Vec<EndpointAddress>) {
        let new_partition_key = keys.new_partition_key.as_deref();
        let old_partition_key = keys.old_partition_key.as_deref();
        let new_key = keys.new_key.as_deref();
        let old_key = keys.old_key.as_deref();

        match decision {
            RoutingDecision::Upsert { .. } => {
                let destinations = self
                    .resolver
                    .upsert_endpoints(event, new_partition_key, new_key, old_key);
                if !destinations.is_empty() {
                    return (decision, destinations);
                }

                // Nobody accepts the new key, but whoever indexed the old one still has to let go of it.
                self.metrics.fallback_deletions().increment(1);
                let destinations = self
                    .resolver
                    .upsert_deletion_endpoints(event, new_partition_key, new_key, old_key);
                match decision.fallback() {
                    Some(fallback) => (fallback, destinations),
                    None => (decision, destinations),
                }
            }
            RoutingDecision::UpsertWithFallbackDeletion { .. } | RoutingDecision::BroadcastDeletion { .. } => {
                let destinations = self
                    .resolver
                    .upsert_deletion_endpoints(event, new_partition_key, new_key, old_key);
                (decision, destinations)
            }
            RoutingDecision::PlainDeletion { .. } => {
                let destinations = self.resolver.deletion_endpoints(event, old_partition_key, old_key);
                (decision, destinations)
            }
        }
    }

    fn command_for(&self, decision: RoutingDecision, keys: &ComputedKeys) -> Command {
        let instance_id = self.definition.instance_id;
        match decision {
            RoutingDecision::Upsert {
                new_key,
                old_key,
                new_partition_key,
            } => Command::Upsert {
                instance_id,
                key: new_key,
                old_key,
                partition_key: new_partition_key,
            },
            RoutingDecision::UpsertWithFallbackDeletion {
                old_key,
                new_partition_key,
            }
            | RoutingDecision::BroadcastDeletion {
                old_key,
                new_partition_key,
            } => Command::UpsertDeletion {
                instance_id,
                old_key,
                partition_key: new_partition_key,
            },
            // Resolved by the old partition key, but the command carries the new one.
            RoutingDecision::PlainDeletion { old_key, .. } => Command::Deletion {
                instance_id,
                old_key,
                partition_key: keys.new_partition_key.clone(),
            },
        }
    }

    fn append(
        &self, event: &ChangeEvent, destinations: &[EndpointAddress], entry: KeyVersion, batches: &mut BatchAccumulator,
    ) {
        let counter = match &entry.command {
            Command::Upsert { .. } => self.metrics.upserts(),
            Command::UpsertDeletion { .. } => self.metrics.upsert_deletions(),
            _ => self.metrics.deletions(),
        };
        counter.increment(destinations.len() as u64);

        let seed = BatchSeed {
            source: Arc::clone(&self.definition.source),
            partition_id: event.partition_id(),
            partition_epoch: event.partition_epoch(),
        };

        for destination in destinations {
            trace!(%destination, seqno = entry.seqno, "Appending entry.");
            batches.upsert(destination, &seed, entry.clone());
        }
    }

    fn unhandled(&self, event: &ChangeEvent) -> Result<RouteOutcome, RouteError> {
        match self.unknown_opcodes {
            UnknownOpcodePolicy::Drop => {
                self.metrics.dropped_opcodes().increment(1);
                debug!(
                    partition_id = event.partition_id(),
                    seqno = event.seqno(),
                    opcode = %event.opcode(),
                    "Dropping event with unhandled opcode."
                );
                Ok(RouteOutcome::dropped())
            }
            UnknownOpcodePolicy::Reject => UnknownOpcode {
                opcode: event.opcode(),
                partition_id: event.partition_id(),
                seqno: event.seqno(),
            }
            .fail(),
        }
    }
}

impl<E, R> TransformRouter<E, R> {
    /// Builds the lifecycle message for a control event.
    ///
    /// Returns `None` if the event is not a control event.
    pub fn control(&self, event: &ChangeEvent) -> Option<LifecycleMessage> {
        match event.opcode() {
            Opcode::StreamBegin => Some(self.stream_begin(event)),
            Opcode::Sync => Some(self.sync(event)),
            Opcode::SnapshotMarker => Some(self.snapshot(event)),
            Opcode::StreamEnd => Some(self.stream_end(event)),
            _ => None,
        }
    }

    /// Builds a stream-begin message for the partition of `event`.
    pub fn stream_begin(&self, event: &ChangeEvent) -> LifecycleMessage {
        LifecycleMessage::stream_begin(Arc::clone(&self.definition.source), event)
    }

    /// Builds a sync message for the partition of `event`.
    pub fn sync(&self, event: &ChangeEvent) -> LifecycleMessage {
        LifecycleMessage::sync(Arc::clone(&self.definition.source), event)
    }

    /// Builds a snapshot message from the snapshot marker of `event`.
    pub fn snapshot(&self, event: &ChangeEvent) -> LifecycleMessage {
        LifecycleMessage::snapshot(Arc::clone(&self.definition.source), event)
    }

    /// Builds a stream-end message for the partition of `event`.
    pub fn stream_end(&self, event: &ChangeEvent) -> LifecycleMessage {
        LifecycleMessage::stream_end(Arc::clone(&self.definition.source), event)
    }
}

/// A shared, swappable reference to the current router.
///
/// Workers call [`load`][RouterHandle::load] once per event (or per batch of events) and route through the snapshot
/// they got back. Deploying a new transform builds a new router and installs it with [`swap`][RouterHandle::swap];
/// calls already in flight finish against the router they loaded.
pub struct RouterHandle<E, R> {
    current: Arc<ArcSwap<TransformRouter<E, R>>>,
}

impl<E, R> RouterHandle<E, R> {
    /// Creates a new `RouterHandle` holding the given router.
    pub fn new(router: TransformRouter<E, R>) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(router)),
        }
    }

    /// Returns the current router.
    pub fn load(&self) -> Arc<TransformRouter<E, R>> {
        self.current.load_full()
    }

    /// Installs a new router, returning the one it replaced.
    pub fn swap(&self, router: TransformRouter<E, R>) -> Arc<TransformRouter<E, R>> {
        self.current.swap(Arc::new(router))
    }
}

impl<E, R> Clone for RouterHandle<E, R> {
    fn clone(&self) -> Self {
        Self {
            current: Arc::clone(&self.current),
        }
    }
}
