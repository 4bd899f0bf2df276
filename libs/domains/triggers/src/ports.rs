//! Collaborators the trigger core talks to.
//!
//! Implementations live in [`crate::memory`] and [`crate::redis`]; services
//! hold them as `Arc<dyn _>` so a binary can pick a backend at startup.

use async_trait::async_trait;

use crate::error::{SinkError, TopicLookupError, TriggerResult};
use crate::models::{
    BroadcastCommand, DispatchAck, ResolutionFailure, TenantContext, TriggerCommand,
};

/// Idempotency check for transaction ids.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransactionValidator: Send + Sync {
    /// Fails with `TriggerError::DuplicateTransaction` when the id is already
    /// bound to a processed or in-flight trigger of this tenant.
    async fn validate(
        &self,
        transaction_id: &str,
        organization_id: &str,
        environment_id: &str,
    ) -> TriggerResult<()>;
}

/// Topic membership lookup.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TopicSubscriberResolver: Send + Sync {
    /// Current member subscriber ids of `topic_key`, in store order.
    async fn get_members(
        &self,
        topic_key: &str,
        tenant: &TenantContext,
    ) -> Result<Vec<String>, TopicLookupError>;
}

/// Audit sink for topics that could not be resolved.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FailureSink: Send + Sync {
    async fn record(&self, failure: ResolutionFailure) -> Result<(), SinkError>;
}

/// Downstream workflow/delivery engine.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    async fn dispatch(&self, command: TriggerCommand) -> TriggerResult<DispatchAck>;

    async fn dispatch_broadcast(&self, command: BroadcastCommand) -> TriggerResult<DispatchAck>;

    /// `Ok(false)` when nothing pending is associated with the transaction.
    async fn cancel(&self, transaction_id: &str, tenant: &TenantContext) -> TriggerResult<bool>;

    /// Get the engine name for logging.
    fn name(&self) -> &'static str;
}

/// Source of fresh transaction ids.
#[cfg_attr(test, mockall::automock)]
pub trait TransactionIdGenerator: Send + Sync {
    fn generate(&self) -> String;
}
