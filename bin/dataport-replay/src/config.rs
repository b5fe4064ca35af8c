use std::path::Path;

use anyhow::Context as _;
use dataport_config::ConfigurationLoader;
use dataport_core::{topology::TopologyConfiguration, RouterConfiguration};
use serde::Deserialize;

const fn default_flush_every() -> usize {
    64
}

/// Replay configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct ReplayConfiguration {
    /// Router configuration.
    #[serde(flatten)]
    pub router: RouterConfiguration,

    /// Endpoints to route to.
    #[serde(default)]
    pub topology: TopologyConfiguration,

    /// Top-level document fields emitted as the index key, in order.
    ///
    /// A document that has none of these fields does not match the index.
    pub key_fields: Vec<String>,

    /// Number of routed events per partition after which the accumulated batches are written out.
    ///
    /// Batches are always written out when the input ends. A value of zero only writes them out at the end.
    #[serde(default = "default_flush_every")]
    pub flush_every: usize,
}

impl ReplayConfiguration {
    /// Loads the configuration from the given YAML file, overlaid with `DATAPORT_`-prefixed environment variables.
    ///
    /// # Errors
    ///
    /// If the file cannot be read or the configuration is invalid, an error will be returned.
    pub fn try_from_file<P>(config_path: P) -> Result<Self, anyhow::Error>
    where
        P: AsRef<Path>,
    {
        let config_path = config_path.as_ref();
        ConfigurationLoader::default()
            .from_yaml(config_path)
            .with_context(|| format!("Failed to read configuration file '{}'.", config_path.display()))?
            .from_environment("DATAPORT")
            .context("Failed to read configuration from environment.")?
            .into_typed()
            .context("Failed to parse configuration.")
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use dataport_core::{FeedVersion, UnknownOpcodePolicy};

    use super::*;

    #[test]
    fn loads_from_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
definition:
  source: orders
  instance_id: 3
  retain_deleted_xattr: true
feed_version: watson
unknown_opcodes: reject
topology:
  endpoints:
    - address: "10.0.0.1:9104"
    - address: "10.0.0.2:9104"
      accepting: false
key_fields: [customer, total]
flush_every: 5
"#
        )
        .unwrap();

        let config = ReplayConfiguration::try_from_file(file.path()).unwrap();
        assert_eq!(&*config.router.definition.source, "orders");
        assert_eq!(config.router.definition.instance_id, 3);
        assert!(config.router.definition.retain_deleted_xattr);
        assert_eq!(config.router.feed_version, FeedVersion::Watson);
        assert_eq!(config.router.unknown_opcodes, UnknownOpcodePolicy::Reject);
        assert_eq!(config.topology.endpoints.len(), 2);
        assert_eq!(config.key_fields, vec!["customer".to_string(), "total".to_string()]);
        assert_eq!(config.flush_every, 5);
    }

    #[test]
    fn applies_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
definition:
  source: orders
  instance_id: 3
key_fields: [customer]
"#
        )
        .unwrap();

        let config = ReplayConfiguration::try_from_file(file.path()).unwrap();
        assert_eq!(config.router.feed_version, FeedVersion::Vulcan);
        assert!(config.topology.endpoints.is_empty());
        assert_eq!(config.flush_every, 64);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = ReplayConfiguration::try_from_file("/nonexistent/dataport-replay.yaml").unwrap_err();
        assert!(err.to_string().contains("Failed to read configuration file"));
    }
}
