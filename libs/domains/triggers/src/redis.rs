//! Redis backed collaborators.
//!
//! Key layout (prefix defaults to `trigger`):
//!
//! | Purpose            | Key                                   | Type   |
//! |--------------------|---------------------------------------|--------|
//! | Idempotency        | `{prefix}:tx:{org}:{env}:{tx}`        | string |
//! | Topic members      | `{prefix}:topic:{env}:{topic}`        | list   |
//! | Pending dispatch   | `{prefix}:pending:{env}:{tx}`         | string |
//! | Workflow commands  | `{stream_name}`                       | stream |
//!
//! Id segments have `%` and `:` percent-escaped, so two tenants can never
//! share a key.

use async_trait::async_trait;
use std::borrow::Cow;
use core_config::{ConfigError, FromEnv, env_or_default, env_parse};
use redis::Client;
use redis::aio::ConnectionManager;
use tracing::{debug, info};

use crate::error::{TopicLookupError, TriggerError, TriggerResult};
use crate::models::{
    BroadcastCommand, DispatchAck, TenantContext, TriggerCommand, TriggerStatus,
};
use crate::ports::{TopicSubscriberResolver, TransactionValidator, WorkflowEngine};

/// Connect and verify with `PING`.
pub async fn connect(url: &str) -> redis::RedisResult<ConnectionManager> {
    info!("Connecting to Redis");

    let client = Client::open(url)?;
    let manager = ConnectionManager::new(client).await?;

    let mut conn = manager.clone();
    let _: String = redis::cmd("PING").query_async(&mut conn).await?;

    info!("Connected to Redis");
    Ok(manager)
}

/// Key names and retention settings shared by the Redis adapters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisKeys {
    pub prefix: String,
    pub stream_name: String,
    /// Approximate cap passed to `XADD MAXLEN ~`.
    pub stream_max_len: usize,
    /// How long a used transaction id (and a pending marker) is remembered.
    pub idempotency_ttl_secs: u64,
}

impl Default for RedisKeys {
    fn default() -> Self {
        Self {
            prefix: "trigger".to_string(),
            stream_name: "trigger:workflows".to_string(),
            stream_max_len: 100_000,
            idempotency_ttl_secs: 86_400,
        }
    }
}

impl FromEnv for RedisKeys {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            prefix: env_or_default("TRIGGER_KEY_PREFIX", &defaults.prefix),
            stream_name: env_or_default("TRIGGER_STREAM_NAME", &defaults.stream_name),
            stream_max_len: env_parse("TRIGGER_STREAM_MAX_LEN", defaults.stream_max_len)?,
            idempotency_ttl_secs: env_parse(
                "TRIGGER_IDEMPOTENCY_TTL_SECS",
                defaults.idempotency_ttl_secs,
            )?,
        })
    }
}

impl RedisKeys {
    pub fn transaction(&self, organization_id: &str, environment_id: &str, transaction_id: &str) -> String {
        format!(
            "{}:tx:{}:{}:{}",
            self.prefix,
            segment(organization_id),
            segment(environment_id),
            segment(transaction_id)
        )
    }

    pub fn topic(&self, environment_id: &str, topic_key: &str) -> String {
        format!(
            "{}:topic:{}:{}",
            self.prefix,
            segment(environment_id),
            segment(topic_key)
        )
    }

    pub fn pending(&self, environment_id: &str, transaction_id: &str) -> String {
        format!(
            "{}:pending:{}:{}",
            self.prefix,
            segment(environment_id),
            segment(transaction_id)
        )
    }
}

/// Escape `%` and `:` so caller ids cannot spill into a neighbouring segment.
fn segment(id: &str) -> Cow<'_, str> {
    if id.contains(['%', ':']) {
        Cow::Owned(id.replace('%', "%25").replace(':', "%3A"))
    } else {
        Cow::Borrowed(id)
    }
}

// ============================================================================
// Idempotency
// ============================================================================

/// Claims transaction ids with `SET NX EX`.
#[derive(Clone)]
pub struct RedisTransactionValidator {
    redis: ConnectionManager,
    keys: RedisKeys,
}

impl RedisTransactionValidator {
    pub fn new(redis: ConnectionManager, keys: RedisKeys) -> Self {
        Self { redis, keys }
    }
}

#[async_trait]
impl TransactionValidator for RedisTransactionValidator {
    async fn validate(
        &self,
        transaction_id: &str,
        organization_id: &str,
        environment_id: &str,
    ) -> TriggerResult<()> {
        let mut conn = self.redis.clone();
        let key = self.keys.transaction(organization_id, environment_id, transaction_id);

        // Nil reply means the key already existed.
        let claimed: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(self.keys.idempotency_ttl_secs)
            .query_async(&mut conn)
            .await?;

        match claimed {
            Some(_) => Ok(()),
            None => Err(TriggerError::DuplicateTransaction(transaction_id.to_string())),
        }
    }
}

// ============================================================================
// Topics
// ============================================================================

/// Topic members stored as Redis lists.
///
/// A topic without members has no key and reads as not found.
#[derive(Clone)]
pub struct RedisTopicStore {
    redis: ConnectionManager,
    keys: RedisKeys,
}

impl RedisTopicStore {
    pub fn new(redis: ConnectionManager, keys: RedisKeys) -> Self {
        Self { redis, keys }
    }

    /// Replace the members of a topic atomically.
    pub async fn set_members(
        &self,
        environment_id: &str,
        topic_key: &str,
        members: &[String],
    ) -> redis::RedisResult<()> {
        let mut conn = self.redis.clone();
        let key = self.keys.topic(environment_id, topic_key);

        let mut pipe = redis::pipe();
        pipe.atomic().del(&key).ignore();
        if !members.is_empty() {
            pipe.rpush(&key, members).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl TopicSubscriberResolver for RedisTopicStore {
    async fn get_members(
        &self,
        topic_key: &str,
        tenant: &TenantContext,
    ) -> Result<Vec<String>, TopicLookupError> {
        let mut conn = self.redis.clone();
        let key = self.keys.topic(&tenant.environment_id, topic_key);

        let (exists, members): (bool, Vec<String>) = redis::pipe()
            .atomic()
            .exists(&key)
            .lrange(&key, 0, -1)
            .query_async(&mut conn)
            .await?;

        if !exists {
            return Err(TopicLookupError::NotFound(topic_key.to_string()));
        }

        debug!(topic_key, members = members.len(), "Loaded topic members");
        Ok(members)
    }
}

// ============================================================================
// Workflow engine
// ============================================================================

/// Queues commands on a Redis stream for workflow workers.
///
/// Each queued transaction also gets a pending marker holding its stream
/// entry id; cancelling removes both. Workers call [`mark_completed`] once
/// they have taken the work.
///
/// [`mark_completed`]: RedisWorkflowEngine::mark_completed
#[derive(Clone)]
pub struct RedisWorkflowEngine {
    redis: ConnectionManager,
    keys: RedisKeys,
}

impl RedisWorkflowEngine {
    pub fn new(redis: ConnectionManager, keys: RedisKeys) -> Self {
        Self { redis, keys }
    }

    /// Drop the pending marker so the transaction can no longer be cancelled.
    pub async fn mark_completed(
        &self,
        environment_id: &str,
        transaction_id: &str,
    ) -> TriggerResult<bool> {
        let mut conn = self.redis.clone();
        let removed: i64 = redis::cmd("DEL")
            .arg(self.keys.pending(environment_id, transaction_id))
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn enqueue(
        &self,
        kind: &str,
        payload: String,
        tenant: &TenantContext,
        transaction_id: &str,
    ) -> TriggerResult<String> {
        let mut conn = self.redis.clone();

        // Stream entry and pending marker are written together. If the marker
        // cannot be set the entry is removed again and the error returned.
        let script = redis::Script::new(
            r"
            local id = redis.call('XADD', KEYS[1], 'MAXLEN', '~', ARGV[1], '*', 'kind', ARGV[2], 'command', ARGV[3])
            local marked = redis.pcall('SET', KEYS[2], id, 'EX', ARGV[4])
            if type(marked) == 'table' and marked.err then
                redis.call('XDEL', KEYS[1], id)
                return marked
            end
            return id
            ",
        );

        let entry_id: String = script
            .key(&self.keys.stream_name)
            .key(self.keys.pending(&tenant.environment_id, transaction_id))
            .arg(self.keys.stream_max_len)
            .arg(kind)
            .arg(&payload)
            .arg(self.keys.idempotency_ttl_secs)
            .invoke_async(&mut conn)
            .await?;

        debug!(transaction_id, entry_id = %entry_id, kind, "Command queued");
        Ok(entry_id)
    }
}

#[async_trait]
impl WorkflowEngine for RedisWorkflowEngine {
    async fn dispatch(&self, command: TriggerCommand) -> TriggerResult<DispatchAck> {
        let transaction_id = command.transaction.transaction_id.clone();

        if command.to.is_empty() {
            return Ok(DispatchAck::new(TriggerStatus::NoRecipients, transaction_id));
        }

        let payload = serde_json::to_string(&command)?;
        self.enqueue("trigger", payload, &command.transaction.tenant, &transaction_id)
            .await?;

        Ok(DispatchAck::new(TriggerStatus::Queued, transaction_id))
    }

    async fn dispatch_broadcast(&self, command: BroadcastCommand) -> TriggerResult<DispatchAck> {
        let transaction_id = command.transaction.transaction_id.clone();

        let payload = serde_json::to_string(&command)?;
        self.enqueue("broadcast", payload, &command.transaction.tenant, &transaction_id)
            .await?;

        Ok(DispatchAck::new(TriggerStatus::Queued, transaction_id))
    }

    async fn cancel(&self, transaction_id: &str, tenant: &TenantContext) -> TriggerResult<bool> {
        let mut conn = self.redis.clone();

        let entry_id: Option<String> = redis::cmd("GETDEL")
            .arg(self.keys.pending(&tenant.environment_id, transaction_id))
            .query_async(&mut conn)
            .await?;

        let Some(entry_id) = entry_id else {
            return Ok(false);
        };

        // The entry may already be trimmed from the stream; the marker is what counts.
        let _: i64 = redis::cmd("XDEL")
            .arg(&self.keys.stream_name)
            .arg(&entry_id)
            .query_async(&mut conn)
            .await?;

        Ok(true)
    }

    fn name(&self) -> &'static str {
        "redis-stream"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let keys = RedisKeys::default();

        assert_eq!(keys.transaction("org-1", "env-1", "tx-1"), "trigger:tx:org-1:env-1:tx-1");
        assert_eq!(keys.topic("env-1", "ops"), "trigger:topic:env-1:ops");
        assert_eq!(keys.pending("env-1", "tx-1"), "trigger:pending:env-1:tx-1");
    }

    #[test]
    fn test_separator_in_ids_cannot_collide() {
        let keys = RedisKeys::default();

        assert_ne!(keys.topic("e:x", "t"), keys.topic("e", "x:t"));
        assert_eq!(keys.topic("e:x", "t"), "trigger:topic:e%3Ax:t");
        assert_eq!(keys.topic("e", "x:t"), "trigger:topic:e:x%3At");
        // An id that already looks escaped stays distinct
        assert_ne!(keys.pending("e", "a%3Ab"), keys.pending("e", "a:b"));
        assert_ne!(
            keys.transaction("o:e", "x", "tx"),
            keys.transaction("o", "e:x", "tx")
        );
    }

    #[test]
    fn test_custom_prefix() {
        let keys = RedisKeys {
            prefix: "notify".to_string(),
            ..RedisKeys::default()
        };

        assert_eq!(keys.topic("e", "t"), "notify:topic:e:t");
    }

    #[test]
    fn test_keys_from_env() {
        temp_env::with_vars(
            [
                ("TRIGGER_KEY_PREFIX", Some("notify")),
                ("TRIGGER_STREAM_NAME", Some("notify:stream")),
                ("TRIGGER_STREAM_MAX_LEN", None),
                ("TRIGGER_IDEMPOTENCY_TTL_SECS", Some("60")),
            ],
            || {
                let keys = RedisKeys::from_env().unwrap();
                assert_eq!(keys.prefix, "notify");
                assert_eq!(keys.stream_name, "notify:stream");
                assert_eq!(keys.stream_max_len, 100_000);
                assert_eq!(keys.idempotency_ttl_secs, 60);
            },
        );
    }

    #[test]
    fn test_keys_from_env_rejects_bad_ttl() {
        temp_env::with_var("TRIGGER_IDEMPOTENCY_TTL_SECS", Some("-5"), || {
            assert!(RedisKeys::from_env().is_err());
        });
    }
}
