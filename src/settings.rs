//! Process configuration, read from the environment.

use std::env;
use std::str::FromStr;
use strum_macros::{Display, EnumString};
use thiserror::Error;

/// The deployment environment, from the `ENV` variable.
#[derive(Copy, Clone, Debug, Display, EnumString, PartialEq)]
#[strum(serialize_all = "lowercase")]
pub enum Environment {
    Dev,
    Staging,
    Prod,
    Pytest,
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value '{1}' for {0}")]
    Invalid(&'static str, String),
}

fn required(name: &'static str) -> Result<String, SettingsError> {
    env::var(name).map_err(|_| SettingsError::Missing(name))
}

/// Everything the process reads from its environment, resolved once at init
/// and passed around explicitly.
#[derive(Clone, Debug)]
pub struct Settings {
    pub env: Environment,

    /// Document database holding the `analytics` collection.
    pub mongo_url: String,

    /// Key-value store backing the answer cache.
    pub redis_url: String,

    /// Geolocation provider, e.g. `https://ipinfo.io`.
    pub ipinfo_host: String,
    pub ipinfo_token: String,
}

impl Settings {
    pub fn from_env() -> Result<Settings, SettingsError> {
        let env_value = required("ENV")?;
        let env = Environment::from_str(&env_value)
            .map_err(|_| SettingsError::Invalid("ENV", env_value))?;

        Ok(Settings {
            env,
            mongo_url: required("MONGO_URL")?,
            redis_url: required("REDIS_URL")?,
            ipinfo_host: required("IPINFO_HOST")?,
            ipinfo_token: required("IPINFO_TOKEN")?,
        })
    }

    /// The per-environment database name.
    pub fn db_name(&self) -> String {
        match self.env {
            Environment::Pytest => "dnsdig-test".to_string(),
            env => format!("dnsdig-{}", env),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_environment_from_str() {
        assert_eq!(Environment::from_str("dev").unwrap(), Environment::Dev);
        assert_eq!(Environment::from_str("prod").unwrap(), Environment::Prod);
        assert!(Environment::from_str("production").is_err());
    }

    #[test]
    fn test_db_name() {
        let mut settings = Settings {
            env: Environment::Staging,
            mongo_url: "mongodb://localhost".to_string(),
            redis_url: "redis://localhost".to_string(),
            ipinfo_host: "https://ipinfo.io".to_string(),
            ipinfo_token: "token".to_string(),
        };

        assert_eq!(settings.db_name(), "dnsdig-staging");

        settings.env = Environment::Pytest;
        assert_eq!(settings.db_name(), "dnsdig-test");
    }
}
