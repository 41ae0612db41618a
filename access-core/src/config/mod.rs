use chrono::Duration;
use secrecy::{ExposeSecret, Secret};
use service_core::config::{self as core_config, get_env, parse_env};
use service_core::error::AppError;
use service_core::observability::TracingSettings;
use std::env;

use crate::services::{KdfParams, LoginGuardPolicy, SessionPolicy};
use crate::utils::generate_random_token;

#[derive(Debug)]
pub struct AccessConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub session: SessionConfig,
    pub login: LoginConfig,
    pub audit_max_events: usize,
    pub token_signing_secret: Secret<String>,
    pub vault: VaultConfig,
    pub bootstrap_admin: Option<BootstrapAdminConfig>,
    /// Zero disables the background reaper.
    pub reaper_interval_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub duration_minutes: i64,
    pub extend_on_activity: bool,
    pub single_session: bool,
}

#[derive(Debug, Clone)]
pub struct LoginConfig {
    pub max_attempts: u32,
    pub lockout_minutes: i64,
}

#[derive(Debug)]
pub struct VaultConfig {
    pub master_secret: Secret<String>,
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

#[derive(Debug)]
pub struct BootstrapAdminConfig {
    pub identifier: String,
    pub secret: Secret<String>,
}

impl AccessConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| common_config.environment.clone());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let bootstrap_identifier = get_env("BOOTSTRAP_ADMIN_IDENTIFIER", Some(""), is_prod)?;
        let bootstrap_admin = if bootstrap_identifier.trim().is_empty() {
            None
        } else {
            Some(BootstrapAdminConfig {
                identifier: bootstrap_identifier,
                secret: Secret::new(get_env("BOOTSTRAP_ADMIN_SECRET", None, true)?),
            })
        };

        let config = AccessConfig {
            common: common_config,
            environment,
            service_name: get_env("SERVICE_NAME", Some("access-core"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            session: SessionConfig {
                duration_minutes: parse_env("SESSION_DURATION_MINUTES", "60", is_prod)?,
                extend_on_activity: parse_env("SESSION_EXTEND_ON_ACTIVITY", "true", is_prod)?,
                single_session: parse_env("SESSION_SINGLE_SESSION", "false", is_prod)?,
            },
            login: LoginConfig {
                max_attempts: parse_env("LOGIN_MAX_ATTEMPTS", "5", is_prod)?,
                lockout_minutes: parse_env("LOGIN_LOCKOUT_MINUTES", "15", is_prod)?,
            },
            audit_max_events: parse_env("AUDIT_MAX_EVENTS", "10000", is_prod)?,
            token_signing_secret: secret_env("TOKEN_SIGNING_SECRET", is_prod)?,
            vault: VaultConfig {
                master_secret: secret_env("VAULT_MASTER_SECRET", is_prod)?,
                memory_kib: parse_env("VAULT_KDF_MEMORY_KIB", "19456", is_prod)?,
                iterations: parse_env("VAULT_KDF_ITERATIONS", "2", is_prod)?,
                parallelism: parse_env("VAULT_KDF_PARALLELISM", "1", is_prod)?,
            },
            bootstrap_admin,
            reaper_interval_seconds: parse_env("REAPER_INTERVAL_SECONDS", "300", is_prod)?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.session.duration_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SESSION_DURATION_MINUTES must be positive"
            )));
        }

        if self.login.max_attempts == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "LOGIN_MAX_ATTEMPTS must be greater than 0"
            )));
        }

        if self.login.lockout_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "LOGIN_LOCKOUT_MINUTES must be positive"
            )));
        }

        if self.audit_max_events == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "AUDIT_MAX_EVENTS must be greater than 0"
            )));
        }

        if self.token_signing_secret.expose_secret().len() < 32 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "TOKEN_SIGNING_SECRET must be at least 32 bytes"
            )));
        }

        Ok(())
    }

    pub fn session_policy(&self) -> SessionPolicy {
        SessionPolicy {
            duration: Duration::minutes(self.session.duration_minutes),
            extend_on_activity: self.session.extend_on_activity,
            single_session: self.session.single_session,
        }
    }

    pub fn login_policy(&self) -> LoginGuardPolicy {
        LoginGuardPolicy {
            max_attempts: self.login.max_attempts,
            lockout_duration: Duration::minutes(self.login.lockout_minutes),
        }
    }

    pub fn kdf_params(&self) -> KdfParams {
        KdfParams {
            memory_kib: self.vault.memory_kib,
            iterations: self.vault.iterations,
            parallelism: self.vault.parallelism,
        }
    }

    pub fn tracing_settings(&self) -> TracingSettings {
        TracingSettings {
            service_name: self.service_name.clone(),
            service_version: self.service_version.clone(),
            environment: self.environment.as_str().to_string(),
            log_level: self.log_level.clone(),
            otlp_endpoint: env::var("OTLP_ENDPOINT")
                .ok()
                .or_else(|| self.common.otlp_endpoint.clone()),
        }
    }
}

/// Secrets are mandatory in production, and an empty value counts as unset.
/// Development falls back to a random per-process value, so tokens and blobs
/// do not survive a restart.
fn secret_env(key: &str, is_prod: bool) -> Result<Secret<String>, AppError> {
    match get_env(key, None, is_prod)? {
        value if !value.is_empty() => Ok(Secret::new(value)),
        _ if is_prod => Err(AppError::ConfigError(anyhow::anyhow!(
            "{} must not be empty in production",
            key
        ))),
        _ => {
            tracing::warn!(key = %key, "Secret not set, using an ephemeral development value");
            Ok(Secret::new(generate_random_token(32)))
        }
    }
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Prod => "prod",
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_parsing() {
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Prod);
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Dev);
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn test_missing_secret_is_fatal_in_prod() {
        let err = secret_env("ACCESS_CORE_TEST_UNSET_SECRET", true).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_empty_secret_is_fatal_in_prod() {
        std::env::set_var("ACCESS_CORE_TEST_EMPTY_SECRET", "");
        let err = secret_env("ACCESS_CORE_TEST_EMPTY_SECRET", true).unwrap_err();
        assert!(err.is_fatal());

        // Development still falls back
        assert!(secret_env("ACCESS_CORE_TEST_EMPTY_SECRET", false).is_ok());
    }

    #[test]
    fn test_missing_secret_in_dev_is_random() {
        let a = secret_env("ACCESS_CORE_TEST_UNSET_SECRET", false).unwrap();
        let b = secret_env("ACCESS_CORE_TEST_UNSET_SECRET", false).unwrap();
        assert_eq!(a.expose_secret().len(), 64);
        assert_ne!(a.expose_secret(), b.expose_secret());
    }
}
