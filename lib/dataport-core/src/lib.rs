//! Transform-and-route engine for index maintenance.
//!
//! A [`TransformRouter`] sits between a change stream and a set of index endpoints. For every data event it computes
//! index keys for the new and old versions of the document with a user-supplied [`KeyEvaluator`], classifies the event
//! into an upsert or a deletion, resolves the endpoints that must hear about it through an [`EndpointResolver`], and
//! appends the resulting entries to a caller-owned [`BatchAccumulator`]. Stream control events are turned into
//! [`LifecycleMessage`]s without touching the transform at all.
#![deny(warnings)]
#![deny(missing_docs)]

mod batch;
pub use self::batch::{BatchAccumulator, BatchRecord, BatchSeed, Command, KeyVersion};

mod classify;
pub use self::classify::{classify, normalized_opcode, RoutingDecision};

mod definition;
pub use self::definition::{RouterConfiguration, TransformDefinition, UnknownOpcodePolicy};

mod error;
pub use self::error::RouteError;

pub mod evaluate;
pub use self::evaluate::{EvaluationError, KeyEvaluator};

mod keys;
pub use self::keys::{compute_keys, ComputedKeys, KeySide};

mod lifecycle;
pub use self::lifecycle::LifecycleMessage;

mod resolver;
pub use self::resolver::{EndpointAddress, EndpointResolver};

mod router;
pub use self::router::{RouteAction, RouteOutcome, RouterHandle, TransformRouter};

mod telemetry;

pub mod topology;

mod version;
pub use self::version::{gate_encode_buffer, FeedVersion, ENCODE_BUFFER_MIN_VERSION};
