use core_config::{FromEnv, redis::RedisConfig, server::ServerConfig};
use domain_triggers::{TriggerServiceConfig, redis::RedisKeys};

// Re-export Environment for use in other modules
pub use core_config::Environment;

/// Application configuration, composed from the shared config components
#[derive(Clone, Debug)]
pub struct Config {
    pub environment: Environment,
    pub server: ServerConfig,
    /// Unset `REDIS_URL` runs every collaborator in memory.
    pub redis: RedisConfig,
    pub redis_keys: RedisKeys,
    pub triggers: TriggerServiceConfig,
}

impl Config {
    pub fn from_env() -> eyre::Result<Self> {
        let environment = Environment::from_env();
        let server = ServerConfig::from_env()?; // Uses defaults: HOST=0.0.0.0, PORT=8080
        let redis = RedisConfig::from_env()?;
        let redis_keys = RedisKeys::from_env()?;
        let triggers = TriggerServiceConfig::from_env()?;

        Ok(Self {
            environment,
            server,
            redis,
            redis_keys,
            triggers,
        })
    }
}
