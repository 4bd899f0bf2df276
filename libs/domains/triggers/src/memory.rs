//! In-process collaborators.
//!
//! Used by the binary when no Redis URL is configured, and by tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::warn;
use uuid::Uuid;

use crate::error::{SinkError, TopicLookupError, TriggerError, TriggerResult};
use crate::models::{
    BroadcastCommand, DispatchAck, ResolutionFailure, TenantContext, TriggerCommand,
    TriggerStatus,
};
use crate::ports::{
    FailureSink, TopicSubscriberResolver, TransactionIdGenerator, TransactionValidator,
    WorkflowEngine,
};

/// Random v4 UUIDs.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidTransactionIdGenerator;

impl TransactionIdGenerator for UuidTransactionIdGenerator {
    fn generate(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

// ============================================================================
// Topics
// ============================================================================

/// Topic memberships keyed by environment and topic key.
#[derive(Debug, Default, Clone)]
pub struct InMemoryTopicStore {
    topics: Arc<RwLock<HashMap<(String, String), Vec<String>>>>,
}

impl InMemoryTopicStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the members of a topic.
    pub async fn set_members(
        &self,
        environment_id: &str,
        topic_key: &str,
        members: impl IntoIterator<Item = impl Into<String>>,
    ) {
        let members = members.into_iter().map(Into::into).collect();
        self.topics
            .write()
            .await
            .insert((environment_id.to_string(), topic_key.to_string()), members);
    }

    pub async fn remove_topic(&self, environment_id: &str, topic_key: &str) -> bool {
        self.topics
            .write()
            .await
            .remove(&(environment_id.to_string(), topic_key.to_string()))
            .is_some()
    }
}

#[async_trait]
impl TopicSubscriberResolver for InMemoryTopicStore {
    async fn get_members(
        &self,
        topic_key: &str,
        tenant: &TenantContext,
    ) -> Result<Vec<String>, TopicLookupError> {
        self.topics
            .read()
            .await
            .get(&(tenant.environment_id.clone(), topic_key.to_string()))
            .cloned()
            .ok_or_else(|| TopicLookupError::NotFound(topic_key.to_string()))
    }
}

// ============================================================================
// Idempotency
// ============================================================================

/// Remembers every transaction id it has accepted, per organization and environment.
#[derive(Debug, Default, Clone)]
pub struct InMemoryTransactionValidator {
    seen: Arc<Mutex<HashSet<(String, String, String)>>>,
}

impl InMemoryTransactionValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seen_count(&self) -> usize {
        self.seen.lock().await.len()
    }
}

#[async_trait]
impl TransactionValidator for InMemoryTransactionValidator {
    async fn validate(
        &self,
        transaction_id: &str,
        organization_id: &str,
        environment_id: &str,
    ) -> TriggerResult<()> {
        let key = (
            organization_id.to_string(),
            environment_id.to_string(),
            transaction_id.to_string(),
        );

        if self.seen.lock().await.insert(key) {
            Ok(())
        } else {
            Err(TriggerError::DuplicateTransaction(transaction_id.to_string()))
        }
    }
}

// ============================================================================
// Workflow engine
// ============================================================================

#[derive(Debug, Default)]
struct EngineState {
    dispatched: Vec<TriggerCommand>,
    broadcasts: Vec<BroadcastCommand>,
    /// (environment id, transaction id) of accepted, not yet completed work.
    pending: HashSet<(String, String)>,
}

/// Engine that records commands and tracks pending transactions.
#[derive(Debug, Default, Clone)]
pub struct InMemoryWorkflowEngine {
    state: Arc<Mutex<EngineState>>,
    failure_message: Option<String>,
}

impl InMemoryWorkflowEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine that rejects every dispatch.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            state: Arc::default(),
            failure_message: Some(message.into()),
        }
    }

    pub async fn dispatched(&self) -> Vec<TriggerCommand> {
        self.state.lock().await.dispatched.clone()
    }

    pub async fn broadcasts(&self) -> Vec<BroadcastCommand> {
        self.state.lock().await.broadcasts.clone()
    }

    pub async fn is_pending(&self, environment_id: &str, transaction_id: &str) -> bool {
        self.state
            .lock()
            .await
            .pending
            .contains(&(environment_id.to_string(), transaction_id.to_string()))
    }

    /// Mark a transaction's work as finished; it can no longer be cancelled.
    pub async fn complete(&self, environment_id: &str, transaction_id: &str) -> bool {
        self.state
            .lock()
            .await
            .pending
            .remove(&(environment_id.to_string(), transaction_id.to_string()))
    }

    fn check_available(&self) -> TriggerResult<()> {
        match &self.failure_message {
            Some(message) => Err(TriggerError::Dispatch(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl WorkflowEngine for InMemoryWorkflowEngine {
    async fn dispatch(&self, command: TriggerCommand) -> TriggerResult<DispatchAck> {
        self.check_available()?;

        let transaction_id = command.transaction.transaction_id.clone();
        let mut state = self.state.lock().await;

        let status = if command.to.is_empty() {
            TriggerStatus::NoRecipients
        } else {
            state.pending.insert((
                command.transaction.tenant.environment_id.clone(),
                transaction_id.clone(),
            ));
            TriggerStatus::Processed
        };
        state.dispatched.push(command);

        Ok(DispatchAck::new(status, transaction_id))
    }

    async fn dispatch_broadcast(&self, command: BroadcastCommand) -> TriggerResult<DispatchAck> {
        self.check_available()?;

        let transaction_id = command.transaction.transaction_id.clone();
        let mut state = self.state.lock().await;
        state.pending.insert((
            command.transaction.tenant.environment_id.clone(),
            transaction_id.clone(),
        ));
        state.broadcasts.push(command);

        Ok(DispatchAck::new(TriggerStatus::Processed, transaction_id))
    }

    async fn cancel(&self, transaction_id: &str, tenant: &TenantContext) -> TriggerResult<bool> {
        Ok(self
            .state
            .lock()
            .await
            .pending
            .remove(&(tenant.environment_id.clone(), transaction_id.to_string())))
    }

    fn name(&self) -> &'static str {
        "in-memory"
    }
}

// ============================================================================
// Failure sinks
// ============================================================================

/// Writes each failure as a structured warning.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingFailureSink;

#[async_trait]
impl FailureSink for TracingFailureSink {
    async fn record(&self, failure: ResolutionFailure) -> Result<(), SinkError> {
        warn!(
            target: "trigger_resolution_failures",
            topic_key = %failure.topic_key,
            transaction_id = %failure.transaction_id,
            environment_id = %failure.environment_id,
            organization_id = %failure.organization_id,
            user_id = %failure.user_id,
            reason = %failure.reason,
            occurred_at = %failure.occurred_at,
            "Topic resolution failed"
        );
        Ok(())
    }
}

/// Keeps failures for later inspection.
#[derive(Debug, Default, Clone)]
pub struct RecordingFailureSink {
    failures: Arc<Mutex<Vec<ResolutionFailure>>>,
}

impl RecordingFailureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn failures(&self) -> Vec<ResolutionFailure> {
        self.failures.lock().await.clone()
    }
}

#[async_trait]
impl FailureSink for RecordingFailureSink {
    async fn record(&self, failure: ResolutionFailure) -> Result<(), SinkError> {
        self.failures.lock().await.push(failure);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ResolvedSubscriber, TriggerTransaction};
    use serde_json::json;

    fn tenant() -> TenantContext {
        TenantContext::new("env-1", "org-1", "user-1")
    }

    fn command(tx: &str, to: Vec<ResolvedSubscriber>) -> TriggerCommand {
        TriggerCommand {
            transaction: TriggerTransaction::new(tx, tenant()),
            template_identifier: "welcome".into(),
            payload: json!({}),
            overrides: json!({}),
            to,
            actor: None,
        }
    }

    #[test]
    fn test_uuid_generator_yields_distinct_uuids() {
        let generator = UuidTransactionIdGenerator;
        let ids: HashSet<String> = (0..100).map(|_| generator.generate()).collect();

        assert_eq!(ids.len(), 100);
        assert!(ids.iter().all(|id| Uuid::parse_str(id).is_ok()));
    }

    #[tokio::test]
    async fn test_topic_store_scopes_by_environment() {
        let store = InMemoryTopicStore::new();
        store.set_members("env-1", "ops", ["a", "b"]).await;

        let members = store.get_members("ops", &tenant()).await.unwrap();
        assert_eq!(members, vec!["a", "b"]);

        let other = TenantContext::new("env-2", "org-1", "user-1");
        assert_eq!(
            store.get_members("ops", &other).await.unwrap_err(),
            TopicLookupError::NotFound("ops".into())
        );

        assert!(store.remove_topic("env-1", "ops").await);
        assert!(store.get_members("ops", &tenant()).await.is_err());
    }

    #[tokio::test]
    async fn test_validator_rejects_reuse_within_tenant() {
        let validator = InMemoryTransactionValidator::new();

        validator.validate("tx-1", "org-1", "env-1").await.unwrap();
        let err = validator.validate("tx-1", "org-1", "env-1").await.unwrap_err();
        assert!(matches!(err, TriggerError::DuplicateTransaction(ref tx) if tx == "tx-1"));

        // Same id in another environment is independent.
        validator.validate("tx-1", "org-1", "env-2").await.unwrap();
        assert_eq!(validator.seen_count().await, 2);
    }

    #[tokio::test]
    async fn test_engine_cancel_only_pending() {
        let engine = InMemoryWorkflowEngine::new();

        let ack = engine
            .dispatch(command("tx-1", vec![ResolvedSubscriber::from_id("u1")]))
            .await
            .unwrap();
        assert_eq!(ack.status, "processed");
        assert!(engine.is_pending("env-1", "tx-1").await);

        assert!(engine.cancel("tx-1", &tenant()).await.unwrap());
        assert!(!engine.cancel("tx-1", &tenant()).await.unwrap());
        assert!(!engine.cancel("never-seen", &tenant()).await.unwrap());
    }

    #[tokio::test]
    async fn test_engine_completed_work_is_not_cancellable() {
        let engine = InMemoryWorkflowEngine::new();
        engine
            .dispatch(command("tx-1", vec![ResolvedSubscriber::from_id("u1")]))
            .await
            .unwrap();

        assert!(engine.complete("env-1", "tx-1").await);
        assert!(!engine.cancel("tx-1", &tenant()).await.unwrap());
    }

    #[tokio::test]
    async fn test_engine_reports_no_recipients() {
        let engine = InMemoryWorkflowEngine::new();

        let ack = engine.dispatch(command("tx-1", vec![])).await.unwrap();

        assert_eq!(ack.status, "no_recipients");
        assert!(!engine.is_pending("env-1", "tx-1").await);
        assert_eq!(engine.dispatched().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failing_engine() {
        let engine = InMemoryWorkflowEngine::failing("maintenance");

        let err = engine.dispatch(command("tx-1", vec![])).await.unwrap_err();

        assert!(matches!(err, TriggerError::Dispatch(ref msg) if msg == "maintenance"));
        assert!(engine.dispatched().await.is_empty());
    }

    #[tokio::test]
    async fn test_recording_sink_keeps_failures() {
        let sink = RecordingFailureSink::new();
        let transaction = TriggerTransaction::new("tx-1", tenant());

        sink.record(ResolutionFailure::new("ops", &transaction, "gone"))
            .await
            .unwrap();
        TracingFailureSink
            .record(ResolutionFailure::new("ops", &transaction, "gone"))
            .await
            .unwrap();

        let failures = sink.failures().await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].reason, "gone");
    }
}
