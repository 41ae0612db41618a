use crate::error::AppError;
use config::{Config as Cfg, File};
use serde::Deserialize;

/// Settings shared by every process built on service-core.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
}

fn default_environment() -> String {
    "dev".to_string()
}

impl Config {
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let config = Cfg::builder()
            .add_source(File::with_name("configuration").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

/// Read an environment variable, falling back to `default`.
///
/// In production a missing variable without a default is a configuration
/// error; in development it resolves to an empty string.
pub fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match std::env::var(key) {
        Ok(value) => Ok(value),
        Err(_) => match default {
            Some(value) => Ok(value.to_string()),
            None if is_prod => Err(AppError::ConfigError(anyhow::anyhow!(
                "Missing required environment variable: {}",
                key
            ))),
            None => Ok(String::new()),
        },
    }
}

/// Read and parse an environment variable.
pub fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_env_uses_default() {
        let value = get_env("SERVICE_CORE_TEST_UNSET_KEY", Some("fallback"), true).unwrap();
        assert_eq!(value, "fallback");
    }

    #[test]
    fn test_get_env_missing_in_prod_is_error() {
        let result = get_env("SERVICE_CORE_TEST_UNSET_KEY", None, true);
        assert!(matches!(result, Err(AppError::ConfigError(_))));
    }

    #[test]
    fn test_get_env_missing_in_dev_is_empty() {
        let value = get_env("SERVICE_CORE_TEST_UNSET_KEY", None, false).unwrap();
        assert!(value.is_empty());
    }

    #[test]
    fn test_parse_env_reports_key_on_failure() {
        std::env::set_var("SERVICE_CORE_TEST_BAD_NUMBER", "twelve");
        let result: Result<u32, _> = parse_env("SERVICE_CORE_TEST_BAD_NUMBER", "1", false);
        let err = result.unwrap_err();
        assert!(err.to_string().contains("SERVICE_CORE_TEST_BAD_NUMBER"));
    }
}
