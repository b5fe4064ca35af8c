//! Transform evaluation contract.
//!
//! The transform that derives index keys from documents is supplied from outside the router: compiling, sandboxing, and
//! running user code is not the router's concern. The router only needs something that, given a document, returns the
//! computed key or reports that the document does not match.

use bytes::{Bytes, BytesMut};
use dataport_event::EventMetadata;
use snafu::Snafu;

mod emit;
pub use self::emit::{encode_emitted, EmittedValue};

/// A transform evaluation error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum EvaluationError {
    /// The transform raised an error while processing the document.
    #[snafu(display("Transform raised an error: {}", reason))]
    Raised {
        /// Description of the error, as reported by the transform.
        reason: String,
    },

    /// The values emitted by the transform could not be encoded as a key.
    #[snafu(display("Failed to encode emitted values as a key: {}", source))]
    Encode {
        /// Error source.
        source: serde_json::Error,
    },
}

/// Computes index keys from documents.
///
/// Implementations must be idempotent and free of side effects visible to the router: the same document, metadata, and
/// buffer state must always produce the same key.
pub trait KeyEvaluator {
    /// Evaluates the transform against a single version of a document.
    ///
    /// Returns `Ok(Some(key))` when the document produces an index key, and `Ok(None)` when it does not match.
    ///
    /// When `encode_buffer` is present, the evaluator may encode the key into it to avoid a fresh allocation. It is
    /// `None` whenever the feed cannot interpret keys produced that way.
    ///
    /// # Errors
    ///
    /// If the transform fails, an error is returned.
    fn evaluate(
        &self, key: &[u8], body: &[u8], metadata: &EventMetadata, encode_buffer: Option<&mut BytesMut>,
    ) -> Result<Option<Bytes>, EvaluationError>;
}

impl<E> KeyEvaluator for std::sync::Arc<E>
where
    E: KeyEvaluator + ?Sized,
{
    fn evaluate(
        &self, key: &[u8], body: &[u8], metadata: &EventMetadata, encode_buffer: Option<&mut BytesMut>,
    ) -> Result<Option<Bytes>, EvaluationError> {
        (**self).evaluate(key, body, metadata, encode_buffer)
    }
}

/// A [`KeyEvaluator`] backed by a closure.
///
/// Created with [`evaluator_fn`].
#[derive(Clone)]
pub struct FnEvaluator<F> {
    f: F,
}

/// Creates a [`KeyEvaluator`] from a closure.
pub fn evaluator_fn<F>(f: F) -> FnEvaluator<F>
where
    F: Fn(&[u8], &[u8], &EventMetadata, Option<&mut BytesMut>) -> Result<Option<Bytes>, EvaluationError>,
{
    FnEvaluator { f }
}

impl<F> KeyEvaluator for FnEvaluator<F>
where
    F: Fn(&[u8], &[u8], &EventMetadata, Option<&mut BytesMut>) -> Result<Option<Bytes>, EvaluationError>,
{
    fn evaluate(
        &self, key: &[u8], body: &[u8], metadata: &EventMetadata, encode_buffer: Option<&mut BytesMut>,
    ) -> Result<Option<Bytes>, EvaluationError> {
        (self.f)(key, body, metadata, encode_buffer)
    }
}
