use dataport_event::Opcode;
use snafu::Snafu;

use crate::{evaluate::EvaluationError, keys::KeySide};

/// A routing error.
///
/// Routing errors are reported per event. When one is returned, the event was not routed: no entries were added to the
/// batch accumulator for it, and entries routed by earlier calls are left untouched.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)), visibility(pub(crate)))]
pub enum RouteError {
    /// The transform failed while computing a key.
    #[snafu(display(
        "Transform failed computing the {} key (partition {}, seqno {}): {}",
        side,
        partition_id,
        seqno,
        source
    ))]
    Evaluation {
        /// Which version of the document was being evaluated.
        side: KeySide,

        /// Partition of the event.
        partition_id: u16,

        /// Sequence number of the event.
        seqno: u64,

        /// Error source.
        source: EvaluationError,
    },

    /// The transform terminated abnormally while computing a key.
    #[snafu(display(
        "Transform panicked computing the {} key (partition {}, seqno {}): {}",
        side,
        partition_id,
        seqno,
        message
    ))]
    EvaluatorPanicked {
        /// Which version of the document was being evaluated.
        side: KeySide,

        /// Partition of the event.
        partition_id: u16,

        /// Sequence number of the event.
        seqno: u64,

        /// Panic payload, if it was a string.
        message: String,
    },

    /// The event carried an opcode the router does not handle.
    ///
    /// Only reported when the router is configured to reject unknown opcodes.
    #[snafu(display("Unsupported opcode {} (partition {}, seqno {}).", opcode, partition_id, seqno))]
    UnknownOpcode {
        /// Opcode of the event.
        opcode: Opcode,

        /// Partition of the event.
        partition_id: u16,

        /// Sequence number of the event.
        seqno: u64,
    },
}

impl RouteError {
    /// Returns `true` if the error came from the transform rather than from the event itself.
    pub fn is_evaluation_failure(&self) -> bool {
        matches!(self, Self::Evaluation { .. } | Self::EvaluatorPanicked { .. })
    }
}
