// Configuration loading for skyquery connections

pub mod env;
pub mod error;
pub mod loader;
pub mod validation;

pub use env::EnvLoader;
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat};
pub use validation::{ConfigValidator, Validate};

use serde::de::DeserializeOwned;
use std::path::Path;

/// Load a configuration file and validate it.
///
/// The format is detected from the file name (`.json`, `.toml`, `.env`).
/// `.env` files only produce string values, so they suit flat configurations.
pub fn load_file<T: DeserializeOwned + Validate>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let value = ConfigLoader::auto(path)?.load_file(path)?;
    let config: T = from_value(value)?;
    config.validate()?;
    Ok(config)
}

/// Parse configuration from a string in the given format.
///
/// Does not validate; callers decide when to run [`Validate::validate`].
pub fn from_str<T: DeserializeOwned>(content: &str, format: FileFormat) -> Result<T> {
    from_value(ConfigLoader::new(format).parse(content)?)
}

/// Deserialize configuration from an already-parsed value.
pub fn from_value<T: DeserializeOwned>(value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| ConfigError::DeserializationError(e.to_string()))
}

/// Deserialize prefixed environment variables (`PREFIX_FIELD=value`) into `T`.
///
/// Every value is a string; fields of other types must not be set this way.
pub fn from_env<T: DeserializeOwned>(prefix: &str) -> Result<T> {
    let vars = EnvLoader::new(Some(prefix.to_string())).load();
    let map = vars
        .into_iter()
        .map(|(k, v)| (k, serde_json::Value::String(v)))
        .collect::<serde_json::Map<_, _>>();
    from_value(serde_json::Value::Object(map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, Default)]
    #[serde(default)]
    struct Sample {
        name: String,
        retries: u32,
    }

    impl Validate for Sample {
        fn validate(&self) -> Result<()> {
            ConfigValidator::not_empty(&self.name, "name")
        }
    }

    #[test]
    fn test_from_str_json() {
        let sample: Sample = from_str(r#"{"name": "a", "retries": 3}"#, FileFormat::Json).unwrap();
        assert_eq!(sample.name, "a");
        assert_eq!(sample.retries, 3);
    }

    #[test]
    fn test_from_str_type_mismatch() {
        let result: Result<Sample> = from_str(r#"retries = "many""#, FileFormat::Toml);
        assert!(matches!(result, Err(ConfigError::DeserializationError(_))));
    }

    #[test]
    fn test_from_env_without_matches_uses_defaults() {
        let sample: Sample = from_env("SKYQUERY_NO_SUCH_PREFIX_31337").unwrap();
        assert!(sample.name.is_empty());
        assert!(sample.validate().is_err());
    }
}
