use std::sync::Arc;

use serde::Deserialize;

use crate::version::FeedVersion;

/// Deployment of a transform against a source collection.
///
/// A definition is immutable for the lifetime of the router built from it. Deploying a new version of the transform
/// means building a new router and swapping it in.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct TransformDefinition {
    /// Source collection the change stream is read from.
    pub source: Arc<str>,

    /// Identifier of the index instance the transform maintains.
    pub instance_id: u64,

    /// Name of the transform, for diagnostics.
    #[serde(default)]
    pub function_name: String,

    /// Whether tombstones that still carry extended attributes are indexed rather than removed.
    #[serde(default)]
    pub retain_deleted_xattr: bool,
}

impl TransformDefinition {
    /// Creates a new `TransformDefinition` for the given source and index instance.
    pub fn new(source: impl Into<Arc<str>>, instance_id: u64) -> Self {
        Self {
            source: source.into(),
            instance_id,
            function_name: String::new(),
            retain_deleted_xattr: false,
        }
    }

    /// Sets the transform name.
    pub fn with_function_name(mut self, function_name: impl Into<String>) -> Self {
        self.function_name = function_name.into();
        self
    }

    /// Sets whether retained tombstones are indexed.
    pub fn with_retain_deleted_xattr(mut self, retain: bool) -> Self {
        self.retain_deleted_xattr = retain;
        self
    }
}

/// What to do with events whose opcode the router does not handle.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum UnknownOpcodePolicy {
    /// Skip the event and count it.
    #[default]
    Drop,

    /// Report the event as an error.
    Reject,
}

/// Router configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct RouterConfiguration {
    /// Transform deployment.
    pub definition: TransformDefinition,

    /// Negotiated feed version.
    ///
    /// Defaults to the current version.
    #[serde(default)]
    pub feed_version: FeedVersion,

    /// Handling of unknown opcodes.
    ///
    /// Defaults to dropping them.
    #[serde(default)]
    pub unknown_opcodes: UnknownOpcodePolicy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_with_defaults() {
        let config: RouterConfiguration = serde_yaml::from_str(
            r#"
definition:
  source: orders
  instance_id: 17
"#,
        )
        .unwrap();

        assert_eq!(config.definition, TransformDefinition::new("orders", 17));
        assert_eq!(config.feed_version, FeedVersion::Vulcan);
        assert_eq!(config.unknown_opcodes, UnknownOpcodePolicy::Drop);
    }

    #[test]
    fn deserializes_all_fields() {
        let config: RouterConfiguration = serde_yaml::from_str(
            r#"
definition:
  source: orders
  instance_id: 17
  function_name: by_customer
  retain_deleted_xattr: true
feed_version: sherlock
unknown_opcodes: reject
"#,
        )
        .unwrap();

        assert_eq!(
            config.definition,
            TransformDefinition::new("orders", 17)
                .with_function_name("by_customer")
                .with_retain_deleted_xattr(true)
        );
        assert_eq!(config.feed_version, FeedVersion::Sherlock);
        assert_eq!(config.unknown_opcodes, UnknownOpcodePolicy::Reject);
    }
}
