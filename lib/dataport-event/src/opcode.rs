use std::fmt;

/// Change-stream opcode.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Opcode {
    /// A document was created or updated.
    Mutation,

    /// A document was deleted.
    Deletion,

    /// A document expired.
    Expiration,

    /// The stream for a partition was opened.
    StreamBegin,

    /// The stream for a partition was closed.
    StreamEnd,

    /// A snapshot range begins.
    SnapshotMarker,

    /// Periodic heartbeat carrying the latest sequence number seen for a partition.
    Sync,

    /// An opcode with no dedicated handling.
    Other(u8),
}

impl Opcode {
    /// Returns `true` if the opcode describes a change to a document.
    pub const fn is_data(&self) -> bool {
        matches!(self, Self::Mutation | Self::Deletion | Self::Expiration)
    }

    /// Returns `true` if the opcode describes the state of the stream rather than a document.
    pub const fn is_control(&self) -> bool {
        matches!(
            self,
            Self::StreamBegin | Self::StreamEnd | Self::SnapshotMarker | Self::Sync
        )
    }

    /// Returns `true` if the opcode removes a document.
    pub const fn is_removal(&self) -> bool {
        matches!(self, Self::Deletion | Self::Expiration)
    }

    /// Returns the name of the opcode.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Mutation => "mutation",
            Self::Deletion => "deletion",
            Self::Expiration => "expiration",
            Self::StreamBegin => "stream_begin",
            Self::StreamEnd => "stream_end",
            Self::SnapshotMarker => "snapshot_marker",
            Self::Sync => "sync",
            Self::Other(_) => "other",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(code) => write!(f, "other(0x{:02x})", code),
            _ => f.write_str(self.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const NAMED: [Opcode; 7] = [
        Opcode::Mutation,
        Opcode::Deletion,
        Opcode::Expiration,
        Opcode::StreamBegin,
        Opcode::StreamEnd,
        Opcode::SnapshotMarker,
        Opcode::Sync,
    ];

    #[test]
    fn named_opcodes_are_data_or_control() {
        for opcode in NAMED {
            assert_ne!(opcode.is_data(), opcode.is_control(), "{}", opcode);
        }
    }

    #[test]
    fn removal_opcodes() {
        assert!(Opcode::Deletion.is_removal());
        assert!(Opcode::Expiration.is_removal());
        assert!(!Opcode::Mutation.is_removal());
    }

    proptest! {
        #[test]
        fn other_opcodes_are_neither_data_nor_control(code in any::<u8>()) {
            let opcode = Opcode::Other(code);
            prop_assert!(!opcode.is_data());
            prop_assert!(!opcode.is_control());
            prop_assert!(opcode.to_string().starts_with("other(0x"));
        }
    }
}
