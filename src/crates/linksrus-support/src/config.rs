//! Environment-driven configuration loading, shared by the cluster crate's
//! `MasterConfig`/`WorkerConfig`.

use std::env;
use std::fmt;
use std::str::FromStr;

/// Error raised while loading or validating configuration.
#[derive(Debug)]
pub struct ConfigError(String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ConfigError {}

impl ConfigError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Common shape for a config struct that can be defaulted, validated,
/// loaded from the environment, and merged with another instance.
pub trait ConfigBuilder: Default + Clone {
    /// Check that the configuration is internally consistent.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Load configuration from `{prefix}{FIELD}`-style environment variables.
    fn from_env(prefix: &str) -> Result<Self>;

    /// Merge `other` on top of `self`, returning `self` for chaining.
    fn merge(&mut self, other: Self) -> &mut Self;

    /// Build the default configuration and validate it.
    fn build() -> Result<Self> {
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Load from the environment, fall back to defaults for anything unset,
    /// then validate.
    fn from_env_with_defaults(prefix: &str) -> Result<Self> {
        let mut config = Self::from_env(prefix)?;
        config.merge(Self::default());
        config.validate()?;
        Ok(config)
    }
}

/// Read a raw environment variable.
pub fn get_env(key: &str) -> Result<Option<String>> {
    match env::var(key) {
        Ok(val) => Ok(Some(val)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::new(format!(
            "environment variable {} contains invalid UTF-8",
            key
        ))),
    }
}

/// Read and parse an environment variable.
pub fn get_env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get_env(key)? {
        Some(val) => val
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::new(format!("failed to parse {}: {}", key, e))),
        None => Ok(None),
    }
}

/// Read an environment variable or fall back to `default`.
pub fn get_env_or(key: &str, default: impl Into<String>) -> Result<String> {
    Ok(get_env(key)?.unwrap_or_else(|| default.into()))
}

/// Read and parse an environment variable or fall back to `default`.
pub fn get_env_parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    Ok(get_env_parse(key)?.unwrap_or(default))
}

/// Read a boolean environment variable (`true/1/yes/on`, `false/0/no/off`).
pub fn get_env_bool(key: &str) -> Result<Option<bool>> {
    match get_env(key)? {
        Some(val) => match val.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Some(true)),
            "false" | "0" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::new(format!("invalid boolean for {}: {}", key, val))),
        },
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct TestConfig {
        value: Option<i32>,
    }

    impl ConfigBuilder for TestConfig {
        fn validate(&self) -> Result<()> {
            if let Some(v) = self.value {
                if v < 0 {
                    return Err(ConfigError::new("value must be non-negative"));
                }
            }
            Ok(())
        }

        fn from_env(prefix: &str) -> Result<Self> {
            Ok(Self {
                value: get_env_parse(&format!("{}VALUE", prefix))?,
            })
        }

        fn merge(&mut self, other: Self) -> &mut Self {
            if self.value.is_none() {
                self.value = other.value;
            }
            self
        }
    }

    #[test]
    fn validate_rejects_negative() {
        let cfg = TestConfig { value: Some(-1) };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn from_env_with_defaults_falls_back() {
        let cfg = TestConfig::from_env_with_defaults("LINKSRUS_TEST_CFG_").unwrap();
        assert_eq!(cfg.value, None);
    }

    #[test]
    fn get_env_bool_parses_variants() {
        env::set_var("LINKSRUS_TEST_BOOL", "yes");
        assert_eq!(get_env_bool("LINKSRUS_TEST_BOOL").unwrap(), Some(true));
        env::remove_var("LINKSRUS_TEST_BOOL");
    }

    #[test]
    fn get_env_parse_or_uses_default_on_missing() {
        let v: u64 = get_env_parse_or("LINKSRUS_TEST_MISSING_XYZ", 42).unwrap();
        assert_eq!(v, 42);
    }
}
