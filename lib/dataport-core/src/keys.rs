use std::{
    any::Any,
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
};

use bytes::{Bytes, BytesMut};
use dataport_event::{ChangeEvent, EventMetadata};
use snafu::ResultExt as _;
use tracing::trace;

use crate::{
    error::{Evaluation, EvaluatorPanicked, RouteError},
    evaluate::KeyEvaluator,
};

/// Which version of a document a key was computed from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeySide {
    /// The new value carried by the event.
    New,

    /// The prior value carried by the event.
    Old,
}

impl fmt::Display for KeySide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => f.write_str("new"),
            Self::Old => f.write_str("old"),
        }
    }
}

/// Keys computed for a single event.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ComputedKeys {
    /// Key computed from the new value, if it was present and matched.
    pub new_key: Option<Bytes>,

    /// Key computed from the old value, if it was present and matched.
    pub old_key: Option<Bytes>,

    /// Partition key of the new value.
    pub new_partition_key: Option<Bytes>,

    /// Partition key of the old value.
    pub old_partition_key: Option<Bytes>,
}

impl ComputedKeys {
    /// Returns the outcome of the index filter for the event.
    ///
    /// The filter passes when either version of the document produced a key.
    pub fn matches(&self) -> bool {
        self.new_key.is_some() || self.old_key.is_some()
    }
}

/// Computes the index keys for the new and old values of an event.
///
/// The evaluator is called once for each non-empty value, both calls always run, and the event metadata is derived a
/// single time and shared between them. Partition keys are not computed and are always `None`.
///
/// # Errors
///
/// If the evaluator returns an error or panics for either value, an error is returned and no keys are produced.
pub fn compute_keys<E>(
    evaluator: &E, event: &ChangeEvent, mut encode_buffer: Option<&mut BytesMut>,
) -> Result<ComputedKeys, RouteError>
where
    E: KeyEvaluator + ?Sized,
{
    let metadata = event.metadata();

    let new_key = if event.value().is_empty() {
        None
    } else {
        guarded_evaluate(
            evaluator,
            event,
            KeySide::New,
            event.value(),
            &metadata,
            encode_buffer.as_deref_mut(),
        )?
    };

    let old_key = if event.old_value().is_empty() {
        None
    } else {
        guarded_evaluate(
            evaluator,
            event,
            KeySide::Old,
            event.old_value(),
            &metadata,
            encode_buffer.as_deref_mut(),
        )?
    };

    trace!(
        partition_id = event.partition_id(),
        seqno = event.seqno(),
        new_key_len = new_key.as_ref().map(Bytes::len),
        old_key_len = old_key.as_ref().map(Bytes::len),
        "Computed keys."
    );

    Ok(ComputedKeys {
        new_key,
        old_key,
        new_partition_key: None,
        old_partition_key: None,
    })
}

fn guarded_evaluate<E>(
    evaluator: &E, event: &ChangeEvent, side: KeySide, body: &[u8], metadata: &EventMetadata,
    encode_buffer: Option<&mut BytesMut>,
) -> Result<Option<Bytes>, RouteError>
where
    E: KeyEvaluator + ?Sized,
{
    let partition_id = event.partition_id();
    let seqno = event.seqno();

    match catch_unwind(AssertUnwindSafe(|| {
        evaluator.evaluate(event.key(), body, metadata, encode_buffer)
    })) {
        Ok(result) => result.context(Evaluation {
            side,
            partition_id,
            seqno,
        }),
        Err(payload) => EvaluatorPanicked {
            side,
            partition_id,
            seqno,
            message: panic_message(payload.as_ref()),
        }
        .fail(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
