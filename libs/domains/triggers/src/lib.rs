//! Triggers Domain
//!
//! Accepts workflow trigger requests, expands their recipients and hands the
//! result to a workflow engine.
//!
//! # Features
//!
//! - Direct recipients (subscriber id or full subscriber object)
//! - Topic recipients expanded to their members, failures isolated per topic
//! - Transaction id idempotency
//! - Broadcast to every subscriber of a tenant
//! - Cancellation of pending work
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   API Handler   │  ← Tenant headers + JSON body
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │ TriggerService  │  ← Transaction id, idempotency, actor check
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐      ┌──────────────────┐
//! │RecipientResolver│ ───► │ Topic store      │  ← bounded, per-topic timeout
//! └────────┬────────┘      └──────────────────┘
//!          │ failures ───► FailureSink
//! ┌────────▼────────┐
//! │ WorkflowEngine  │  ← In-memory or Redis stream
//! └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use domain_triggers::{
//!     TriggerCollaborators, TriggerService, TriggerServiceConfig,
//!     memory::{InMemoryTopicStore, InMemoryTransactionValidator, InMemoryWorkflowEngine,
//!              TracingFailureSink, UuidTransactionIdGenerator},
//! };
//!
//! let service = TriggerService::new(
//!     TriggerCollaborators {
//!         validator: Arc::new(InMemoryTransactionValidator::new()),
//!         topics: Arc::new(InMemoryTopicStore::new()),
//!         failures: Arc::new(TracingFailureSink),
//!         engine: Arc::new(InMemoryWorkflowEngine::new()),
//!         ids: Arc::new(UuidTransactionIdGenerator),
//!     },
//!     TriggerServiceConfig::default(),
//! );
//!
//! let router = domain_triggers::handlers::router(service);
//! ```

pub mod classifier;
pub mod error;
pub mod handlers;
pub mod memory;
pub mod models;
pub mod ports;
pub mod redis;
pub mod resolver;
pub mod service;

// Re-export commonly used types
pub use classifier::{RecipientKind, classify, map_to_resolved_subscriber, partition};
pub use error::{ErrorResponse, SinkError, TopicLookupError, TriggerError, TriggerResult};
pub use handlers::ApiDoc;
pub use models::{
    BroadcastRequest, BulkTriggerRequest, DispatchAck, RecipientExpression, ResolutionFailure,
    ResolvedSubscriber, TenantContext, TopicReference, TriggerRequest, TriggerStatus,
    TriggerTransaction,
};
pub use ports::{
    FailureSink, TopicSubscriberResolver, TransactionIdGenerator, TransactionValidator,
    WorkflowEngine,
};
pub use resolver::RecipientResolver;
pub use service::{TriggerCollaborators, TriggerService, TriggerServiceConfig};
