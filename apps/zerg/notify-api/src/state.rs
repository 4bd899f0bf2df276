//! Collaborator wiring: Redis when configured, in-memory otherwise.

use domain_triggers::memory::{
    InMemoryTopicStore, InMemoryTransactionValidator, InMemoryWorkflowEngine,
    TracingFailureSink, UuidTransactionIdGenerator,
};
use domain_triggers::redis::{
    self as trigger_redis, RedisTopicStore, RedisTransactionValidator, RedisWorkflowEngine,
};
use domain_triggers::TriggerCollaborators;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;

pub struct Backend {
    pub collaborators: TriggerCollaborators,
    /// Present when the collaborators are Redis backed; used by `/ready`.
    pub redis: Option<ConnectionManager>,
}

impl Backend {
    pub async fn from_config(config: &Config) -> eyre::Result<Self> {
        match &config.redis.url {
            Some(url) => {
                let manager = trigger_redis::connect(url)
                    .await
                    .map_err(|e| eyre::eyre!("Redis connection failed: {}", e))?;

                info!(stream = %config.redis_keys.stream_name, "Using Redis collaborators");

                let keys = config.redis_keys.clone();
                Ok(Self {
                    collaborators: TriggerCollaborators {
                        validator: Arc::new(RedisTransactionValidator::new(
                            manager.clone(),
                            keys.clone(),
                        )),
                        topics: Arc::new(RedisTopicStore::new(manager.clone(), keys.clone())),
                        failures: Arc::new(TracingFailureSink),
                        engine: Arc::new(RedisWorkflowEngine::new(manager.clone(), keys)),
                        ids: Arc::new(UuidTransactionIdGenerator),
                    },
                    redis: Some(manager),
                })
            }
            None => {
                if config.environment.is_production() {
                    warn!("REDIS_URL not set in production; triggers are kept in memory only");
                }
                Ok(Self::in_memory())
            }
        }
    }

    pub fn in_memory() -> Self {
        info!("Using in-memory collaborators");

        Self {
            collaborators: TriggerCollaborators {
                validator: Arc::new(InMemoryTransactionValidator::new()),
                topics: Arc::new(InMemoryTopicStore::new()),
                failures: Arc::new(TracingFailureSink),
                engine: Arc::new(InMemoryWorkflowEngine::new()),
                ids: Arc::new(UuidTransactionIdGenerator),
            },
            redis: None,
        }
    }
}
