//! Layered configuration loading.
//!
//! Configuration for routing instances is assembled from a file (YAML or JSON) and overlaid with prefixed environment
//! variables, then deserialized into a typed configuration struct.
#![deny(warnings)]
#![deny(missing_docs)]

use std::{borrow::Cow, collections::HashSet, path::Path};

use figment::{
    error::Kind,
    providers::{Env, Serialized},
    Figment, Provider,
};
use serde::Deserialize;
use snafu::{ResultExt as _, Snafu};
use tracing::debug;

mod provider;
use self::provider::ResolvedProvider;

/// A configuration error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ConfigurationError {
    /// Environment variable prefix was empty.
    #[snafu(display("Environment variable prefix must not be empty."))]
    EmptyPrefix,

    /// Requested field was missing from the configuration.
    #[snafu(display("Missing field '{}' in configuration. {}", field, help_text))]
    MissingField {
        /// Help text describing how to set the missing field.
        help_text: String,

        /// Name of the missing field.
        field: Cow<'static, str>,
    },

    /// A field held a value of the wrong type.
    #[snafu(display(
        "Expected value for field '{}' to be '{}', got '{}' instead.",
        field,
        expected_ty,
        actual_ty
    ))]
    InvalidFieldType {
        /// Period-separated path to the invalid field.
        field: String,

        /// Expected data type.
        expected_ty: String,

        /// Actual data type.
        actual_ty: String,
    },

    /// Generic configuration error.
    #[snafu(display("Failed to load configuration."))]
    Generic {
        /// Error source.
        source: figment::Error,
    },
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
enum LookupSource {
    /// The configuration key is looked up in a form suitable for environment variables.
    Environment { prefix: String },
}

impl LookupSource {
    fn transform_key(&self, key: &str) -> String {
        match self {
            // The prefix is already uppercased and carries its trailing underscore.
            LookupSource::Environment { prefix } => format!("{}{}", prefix, key.replace('.', "__").to_uppercase()),
        }
    }
}

struct BoxedProvider(Box<dyn Provider + Send + Sync>);

impl Provider for BoxedProvider {
    fn metadata(&self) -> figment::Metadata {
        self.0.metadata()
    }

    fn data(&self) -> Result<figment::value::Map<figment::Profile, figment::value::Dict>, figment::Error> {
        self.0.data()
    }
}

/// A configuration loader that can pull from various sources.
///
/// Sources have an implicit priority based on the order in which they are added: sources added later take precedence
/// over sources added earlier.
///
/// # Supported sources
///
/// - YAML file
/// - JSON file
/// - environment variables (must be prefixed; see [`from_environment`][Self::from_environment])
#[derive(Default)]
pub struct ConfigurationLoader {
    lookup_sources: HashSet<LookupSource>,
    providers: Vec<BoxedProvider>,
}

impl ConfigurationLoader {
    /// Loads the given YAML configuration file.
    ///
    /// # Errors
    ///
    /// If the file could not be read, or if the file is not valid YAML, an error will be returned.
    pub fn from_yaml<P>(mut self, path: P) -> Result<Self, ConfigurationError>
    where
        P: AsRef<Path>,
    {
        let resolved_provider = ResolvedProvider::from_yaml(&path).context(Generic)?;
        self.providers.push(BoxedProvider(Box::new(resolved_provider)));
        Ok(self)
    }

    /// Attempts to load the given YAML configuration file, ignoring any errors.
    pub fn try_from_yaml<P>(mut self, path: P) -> Self
    where
        P: AsRef<Path>,
    {
        match ResolvedProvider::from_yaml(&path) {
            Ok(resolved_provider) => self.providers.push(BoxedProvider(Box::new(resolved_provider))),
            Err(e) => {
                debug!(error = %e, file_path = %path.as_ref().to_string_lossy(), "Unable to read YAML configuration file. Ignoring.");
            }
        }
        self
    }

    /// Loads the given JSON configuration file.
    ///
    /// # Errors
    ///
    /// If the file could not be read, or if the file is not valid JSON, an error will be returned.
    pub fn from_json<P>(mut self, path: P) -> Result<Self, ConfigurationError>
    where
        P: AsRef<Path>,
    {
        let resolved_provider = ResolvedProvider::from_json(&path).context(Generic)?;
        self.providers.push(BoxedProvider(Box::new(resolved_provider)));
        Ok(self)
    }

    /// Attempts to load the given JSON configuration file, ignoring any errors.
    pub fn try_from_json<P>(mut self, path: P) -> Self
    where
        P: AsRef<Path>,
    {
        match ResolvedProvider::from_json(&path) {
            Ok(resolved_provider) => self.providers.push(BoxedProvider(Box::new(resolved_provider))),
            Err(e) => {
                debug!(error = %e, file_path = %path.as_ref().to_string_lossy(), "Unable to read JSON configuration file. Ignoring.");
            }
        }
        self
    }

    /// Loads configuration from environment variables.
    ///
    /// The prefix given will have an underscore appended to it if it does not already end with one. For example, with a
    /// prefix of `dataport`, any environment variable starting with `DATAPORT_` would be matched. Nested keys are
    /// addressed with a double underscore, so `DATAPORT_DEFINITION__SOURCE` sets `definition.source`.
    ///
    /// # Errors
    ///
    /// If the prefix is empty, or the environment could not be read, an error will be returned.
    pub fn from_environment(mut self, prefix: &'static str) -> Result<Self, ConfigurationError> {
        if prefix.is_empty() {
            return Err(ConfigurationError::EmptyPrefix);
        }

        let prefix = if prefix.ends_with('_') {
            prefix.to_uppercase()
        } else {
            format!("{}_", prefix.to_uppercase())
        };

        // `Env` isn't `Send + Sync`, so snapshot its values into a serialized provider.
        let env = Env::prefixed(&prefix).split("__");
        let values = env.data().map_err(|e| ConfigurationError::from_figment(&self.lookup_sources, e))?;
        if let Some(default_dict) = values.get(&figment::Profile::Default) {
            self.providers
                .push(BoxedProvider(Box::new(Serialized::defaults(default_dict.clone()))));
        }
        self.lookup_sources.insert(LookupSource::Environment { prefix });

        Ok(self)
    }

    /// Consumes the configuration loader, deserializing it as `T`.
    ///
    /// # Errors
    ///
    /// If the configuration could not be deserialized into `T`, an error will be returned.
    pub fn into_typed<'a, T>(self) -> Result<T, ConfigurationError>
    where
        T: Deserialize<'a>,
    {
        let figment = self
            .providers
            .into_iter()
            .fold(Figment::new(), |figment, provider| figment.admerge(provider));

        figment
            .extract()
            .map_err(|e| ConfigurationError::from_figment(&self.lookup_sources, e))
    }
}

impl ConfigurationError {
    fn from_figment(lookup_sources: &HashSet<LookupSource>, e: figment::Error) -> Self {
        match e.kind {
            Kind::MissingField(field) => {
                let mut valid_keys = lookup_sources
                    .iter()
                    .map(|source| source.transform_key(&field))
                    .collect::<Vec<_>>();

                // Always offer the original key first.
                valid_keys.insert(0, field.to_string());

                let help_text = format!("Try setting `{}`.", valid_keys.join("` or `"));

                Self::MissingField { help_text, field }
            }
            Kind::InvalidType(actual_ty, expected_ty) => Self::InvalidFieldType {
                field: e.path.join("."),
                expected_ty,
                actual_ty: actual_ty.to_string(),
            },
            _ => Self::Generic { source: e },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize)]
    struct Settings {
        source: String,
        #[serde(default)]
        retain: bool,
        limits: Limits,
    }

    #[derive(Debug, Deserialize)]
    struct Limits {
        batch: u32,
    }

    fn write_file(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn yaml_file() {
        let file = write_file(".yaml", "source: orders\nretain: true\nlimits:\n  batch: 8\n");

        let settings: Settings = ConfigurationLoader::default()
            .from_yaml(file.path())
            .unwrap()
            .into_typed()
            .unwrap();

        assert_eq!(settings.source, "orders");
        assert!(settings.retain);
        assert_eq!(settings.limits.batch, 8);
    }

    #[test]
    fn later_sources_take_precedence() {
        let yaml = write_file(".yaml", "source: orders\nlimits:\n  batch: 8\n");
        let json = write_file(".json", r#"{"source": "invoices"}"#);

        let settings: Settings = ConfigurationLoader::default()
            .from_yaml(yaml.path())
            .unwrap()
            .from_json(json.path())
            .unwrap()
            .into_typed()
            .unwrap();

        assert_eq!(settings.source, "invoices");
        assert_eq!(settings.limits.batch, 8);
    }

    #[test]
    fn missing_file_is_ignored_by_try_variants() {
        let yaml = write_file(".yaml", "source: orders\nlimits:\n  batch: 1\n");

        let settings: Settings = ConfigurationLoader::default()
            .try_from_yaml("/nonexistent/dataport.yaml")
            .try_from_json("/nonexistent/dataport.json")
            .from_yaml(yaml.path())
            .unwrap()
            .into_typed()
            .unwrap();

        assert_eq!(settings.source, "orders");
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = ConfigurationLoader::default().from_yaml("/nonexistent/dataport.yaml");
        assert!(matches!(result, Err(ConfigurationError::Generic { .. })));
    }

    #[test]
    fn empty_prefix_rejected() {
        let result = ConfigurationLoader::default().from_environment("");
        assert!(matches!(result, Err(ConfigurationError::EmptyPrefix)));
    }

    #[test]
    fn environment_overrides_file() {
        let yaml = write_file(".yaml", "source: orders\nlimits:\n  batch: 8\n");
        std::env::set_var("DPCFGTEST_ENV_OVERRIDE_SOURCE", "payments");
        std::env::set_var("DPCFGTEST_ENV_OVERRIDE_LIMITS__BATCH", "32");

        let settings: Settings = ConfigurationLoader::default()
            .from_yaml(yaml.path())
            .unwrap()
            .from_environment("dpcfgtest_env_override")
            .unwrap()
            .into_typed()
            .unwrap();

        assert_eq!(settings.source, "payments");
        assert_eq!(settings.limits.batch, 32);
    }

    #[test]
    fn missing_field_mentions_environment_key() {
        let yaml = write_file(".yaml", "limits:\n  batch: 8\n");

        let result = ConfigurationLoader::default()
            .from_yaml(yaml.path())
            .unwrap()
            .from_environment("dpcfgtest_missing")
            .unwrap()
            .into_typed::<Settings>();

        match result {
            Err(ConfigurationError::MissingField { field, help_text }) => {
                assert_eq!(field, "source");
                assert_eq!(help_text, "Try setting `source` or `DPCFGTEST_MISSING_SOURCE`.");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn invalid_field_type() {
        let yaml = write_file(".yaml", "source: orders\nlimits:\n  batch: many\n");

        let result = ConfigurationLoader::default()
            .from_yaml(yaml.path())
            .unwrap()
            .into_typed::<Settings>();

        match result {
            Err(ConfigurationError::InvalidFieldType { field, .. }) => assert_eq!(field, "limits.batch"),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
