use std::fmt;

use bytes::BytesMut;
use serde::Deserialize;

/// Negotiated protocol capability level of a feed.
///
/// Levels are ordered: a feed at a given level understands everything the levels before it do.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[serde(rename_all = "lowercase")]
pub enum FeedVersion {
    /// Initial protocol.
    Sherlock,

    /// Adds accelerated key encoding.
    Watson,

    /// Current protocol.
    #[default]
    Vulcan,
}

impl fmt::Display for FeedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sherlock => "sherlock",
            Self::Watson => "watson",
            Self::Vulcan => "vulcan",
        };
        f.write_str(name)
    }
}

/// Lowest feed version whose consumers can interpret keys produced through the encode buffer.
pub const ENCODE_BUFFER_MIN_VERSION: FeedVersion = FeedVersion::Watson;

/// Clears the encode buffer for feeds that predate accelerated key encoding.
///
/// Feeds below [`ENCODE_BUFFER_MIN_VERSION`] always get `None`, forcing the evaluator onto its default encoding path.
pub fn gate_encode_buffer(version: FeedVersion, buffer: Option<&mut BytesMut>) -> Option<&mut BytesMut> {
    if version < ENCODE_BUFFER_MIN_VERSION {
        None
    } else {
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_are_ordered() {
        assert!(FeedVersion::Sherlock < FeedVersion::Watson);
        assert!(FeedVersion::Watson < FeedVersion::Vulcan);
        assert_eq!(FeedVersion::default(), FeedVersion::Vulcan);
    }

    #[test]
    fn gate_clears_buffer_below_threshold() {
        let mut buf = BytesMut::with_capacity(16);
        assert!(gate_encode_buffer(FeedVersion::Sherlock, Some(&mut buf)).is_none());
    }

    #[test]
    fn gate_passes_buffer_at_or_above_threshold() {
        let mut buf = BytesMut::with_capacity(16);
        assert!(gate_encode_buffer(FeedVersion::Watson, Some(&mut buf)).is_some());
        assert!(gate_encode_buffer(FeedVersion::Vulcan, Some(&mut buf)).is_some());
        assert!(gate_encode_buffer(FeedVersion::Vulcan, None).is_none());
    }

    #[test]
    fn deserializes_lowercase_names() {
        let version: FeedVersion = serde_yaml::from_str("watson").unwrap();
        assert_eq!(version, FeedVersion::Watson);
        assert_eq!(version.to_string(), "watson");
    }
}
