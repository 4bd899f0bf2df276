use crate::{ConfigError, FromEnv};
use std::env;

/// Redis connection settings.
///
/// `REDIS_URL` is optional: when it is absent a service runs its collaborators
/// in memory, which is what local development and handler tests use.
#[derive(Clone, Debug, Default)]
pub struct RedisConfig {
    pub url: Option<String>,
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.url.is_some()
    }
}

impl FromEnv for RedisConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let url = match env::var("REDIS_URL") {
            Ok(url) if url.trim().is_empty() => None,
            Ok(url) => {
                if !url.starts_with("redis://") && !url.starts_with("rediss://") {
                    return Err(ConfigError::InvalidValue {
                        key: "REDIS_URL".to_string(),
                        details: format!("expected a redis:// or rediss:// URL, got '{}'", url),
                    });
                }
                Some(url)
            }
            Err(_) => None,
        };

        Ok(Self { url })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_config_disabled_when_unset() {
        temp_env::with_var_unset("REDIS_URL", || {
            let config = RedisConfig::from_env().unwrap();
            assert!(!config.is_enabled());
        });
    }

    #[test]
    fn test_redis_config_blank_is_disabled() {
        temp_env::with_var("REDIS_URL", Some("  "), || {
            assert!(!RedisConfig::from_env().unwrap().is_enabled());
        });
    }

    #[test]
    fn test_redis_config_from_env() {
        temp_env::with_var("REDIS_URL", Some("redis://localhost:6379"), || {
            let config = RedisConfig::from_env().unwrap();
            assert_eq!(config.url.as_deref(), Some("redis://localhost:6379"));
        });
    }

    #[test]
    fn test_redis_config_rejects_other_schemes() {
        temp_env::with_var("REDIS_URL", Some("http://localhost:6379"), || {
            let err = RedisConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("REDIS_URL"));
        });
    }
}
