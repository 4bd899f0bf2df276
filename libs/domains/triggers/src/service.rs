use core_config::{ConfigError, FromEnv, env_parse};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};
use validator::Validate;

use crate::classifier::{self, Classified, map_to_resolved_subscriber};
use crate::error::{TriggerError, TriggerResult};
use crate::models::{
    Audience, BroadcastCommand, BroadcastRequest, BulkTriggerRequest, DispatchAck,
    RecipientExpression, ResolvedSubscriber, TenantContext, TriggerCommand, TriggerRequest,
    TriggerTransaction,
};
use crate::ports::{
    FailureSink, TopicSubscriberResolver, TransactionIdGenerator, TransactionValidator,
    WorkflowEngine,
};
use crate::resolver::RecipientResolver;

/// Tuning knobs for [`TriggerService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerServiceConfig {
    /// Maximum number of topic lookups in flight for one trigger.
    pub topic_fanout_limit: usize,
    pub topic_lookup_timeout: Duration,
    pub validation_timeout: Duration,
    pub dispatch_timeout: Duration,
    pub bulk_max_events: usize,
}

impl Default for TriggerServiceConfig {
    fn default() -> Self {
        Self {
            topic_fanout_limit: 8,
            topic_lookup_timeout: Duration::from_millis(2000),
            validation_timeout: Duration::from_millis(2000),
            dispatch_timeout: Duration::from_millis(5000),
            bulk_max_events: 100,
        }
    }
}

impl FromEnv for TriggerServiceConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let topic_fanout_limit: usize = env_parse("TRIGGER_TOPIC_FANOUT_LIMIT", 8)?;
        if topic_fanout_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "TRIGGER_TOPIC_FANOUT_LIMIT".to_string(),
                details: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            topic_fanout_limit,
            topic_lookup_timeout: Duration::from_millis(env_parse(
                "TRIGGER_TOPIC_LOOKUP_TIMEOUT_MS",
                2000,
            )?),
            validation_timeout: Duration::from_millis(env_parse(
                "TRIGGER_VALIDATION_TIMEOUT_MS",
                2000,
            )?),
            dispatch_timeout: Duration::from_millis(env_parse("TRIGGER_DISPATCH_TIMEOUT_MS", 5000)?),
            bulk_max_events: env_parse("TRIGGER_BULK_MAX_EVENTS", 100)?,
        })
    }
}

/// Everything the service talks to.
#[derive(Clone)]
pub struct TriggerCollaborators {
    pub validator: Arc<dyn TransactionValidator>,
    pub topics: Arc<dyn TopicSubscriberResolver>,
    pub failures: Arc<dyn FailureSink>,
    pub engine: Arc<dyn WorkflowEngine>,
    pub ids: Arc<dyn TransactionIdGenerator>,
}

/// Entry point for trigger, broadcast and cancel requests.
#[derive(Clone)]
pub struct TriggerService {
    validator: Arc<dyn TransactionValidator>,
    engine: Arc<dyn WorkflowEngine>,
    ids: Arc<dyn TransactionIdGenerator>,
    resolver: Arc<RecipientResolver>,
    config: TriggerServiceConfig,
}

impl TriggerService {
    pub fn new(collaborators: TriggerCollaborators, config: TriggerServiceConfig) -> Self {
        let resolver = RecipientResolver::new(
            collaborators.topics,
            collaborators.failures,
            config.topic_fanout_limit,
            config.topic_lookup_timeout,
        );

        Self {
            validator: collaborators.validator,
            engine: collaborators.engine,
            ids: collaborators.ids,
            resolver: Arc::new(resolver),
            config,
        }
    }

    pub fn config(&self) -> &TriggerServiceConfig {
        &self.config
    }

    /// Trigger a workflow for the recipients in `request`.
    ///
    /// Idempotency and actor checks run before any topic is looked up; topic
    /// failures are absorbed by resolution and never fail the request.
    #[instrument(skip(self, tenant, request), fields(
        template = %request.name,
        environment_id = %tenant.environment_id,
        recipients = request.to.len()
    ))]
    pub async fn trigger(
        &self,
        tenant: TenantContext,
        request: TriggerRequest,
    ) -> TriggerResult<DispatchAck> {
        request.validate()?;

        let transaction = self.start_transaction(tenant, request.transaction_id.clone());
        self.check_transaction(&transaction).await?;

        let actor = request.actor.map(resolve_actor).transpose()?;

        let to = self.resolver.resolve(&transaction, request.to).await;

        debug!(
            transaction_id = %transaction.transaction_id,
            resolved = to.len(),
            "Dispatching trigger"
        );

        let command = TriggerCommand {
            transaction,
            template_identifier: request.name,
            payload: request.payload,
            overrides: request.overrides,
            to,
            actor,
        };

        let ack = self
            .with_deadline(
                self.config.dispatch_timeout,
                "workflow dispatch",
                self.engine.dispatch(command),
            )
            .await?;

        info!(
            transaction_id = %ack.transaction_id,
            status = %ack.status,
            engine = self.engine.name(),
            "Trigger dispatched"
        );

        Ok(ack)
    }

    /// Trigger several events in request order, stopping at the first failure.
    ///
    /// Events dispatched before the failing one are not rolled back.
    #[instrument(skip(self, tenant, request), fields(events = request.events.len()))]
    pub async fn trigger_bulk(
        &self,
        tenant: TenantContext,
        request: BulkTriggerRequest,
    ) -> TriggerResult<Vec<DispatchAck>> {
        if request.events.len() > self.config.bulk_max_events {
            return Err(TriggerError::Validation(format!(
                "bulk trigger accepts at most {} events, got {}",
                self.config.bulk_max_events,
                request.events.len()
            )));
        }
        request.validate()?;

        let mut acks = Vec::with_capacity(request.events.len());
        for event in request.events {
            acks.push(self.trigger(tenant.clone(), event).await?);
        }

        Ok(acks)
    }

    /// Trigger a workflow for every subscriber of the tenant.
    ///
    /// No recipient resolution happens here; the engine fans out itself.
    #[instrument(skip(self, tenant, request), fields(
        template = %request.name,
        environment_id = %tenant.environment_id
    ))]
    pub async fn broadcast(
        &self,
        tenant: TenantContext,
        request: BroadcastRequest,
    ) -> TriggerResult<DispatchAck> {
        request.validate()?;

        let transaction = self.start_transaction(tenant, request.transaction_id.clone());
        self.check_transaction(&transaction).await?;

        let command = BroadcastCommand {
            transaction,
            template_identifier: request.name,
            payload: request.payload,
            overrides: request.overrides,
            audience: Audience::AllSubscribers,
        };

        let ack = self
            .with_deadline(
                self.config.dispatch_timeout,
                "broadcast dispatch",
                self.engine.dispatch_broadcast(command),
            )
            .await?;

        info!(transaction_id = %ack.transaction_id, status = %ack.status, "Broadcast dispatched");

        Ok(ack)
    }

    /// Cancel pending work for a transaction.
    ///
    /// Returns `false` when nothing was pending, including unknown ids.
    #[instrument(skip(self, tenant), fields(environment_id = %tenant.environment_id))]
    pub async fn cancel(&self, tenant: TenantContext, transaction_id: &str) -> TriggerResult<bool> {
        if transaction_id.trim().is_empty() {
            return Err(TriggerError::Validation(
                "transaction id must not be empty".to_string(),
            ));
        }

        let cancelled = self
            .with_deadline(
                self.config.dispatch_timeout,
                "workflow cancel",
                self.engine.cancel(transaction_id, &tenant),
            )
            .await?;

        info!(transaction_id, cancelled, "Cancel requested");

        Ok(cancelled)
    }

    fn start_transaction(
        &self,
        tenant: TenantContext,
        transaction_id: Option<String>,
    ) -> TriggerTransaction {
        let transaction_id = transaction_id.unwrap_or_else(|| self.ids.generate());
        TriggerTransaction::new(transaction_id, tenant)
    }

    async fn check_transaction(&self, transaction: &TriggerTransaction) -> TriggerResult<()> {
        self.with_deadline(
            self.config.validation_timeout,
            "transaction validation",
            self.validator.validate(
                &transaction.transaction_id,
                &transaction.tenant.organization_id,
                &transaction.tenant.environment_id,
            ),
        )
        .await
    }

    async fn with_deadline<T, F>(&self, deadline: Duration, what: &str, call: F) -> TriggerResult<T>
    where
        F: Future<Output = TriggerResult<T>>,
    {
        tokio::time::timeout(deadline, call).await.map_err(|_| {
            TriggerError::Timeout(format!("{} exceeded {}ms", what, deadline.as_millis()))
        })?
    }
}

/// An actor must be one concrete subscriber.
fn resolve_actor(actor: RecipientExpression) -> TriggerResult<ResolvedSubscriber> {
    match classifier::classify(actor) {
        Classified::Direct(direct) => Ok(map_to_resolved_subscriber(direct)),
        Classified::Topic(topic) => Err(TriggerError::InvalidActor(format!(
            "actor must be a single subscriber, got topic '{}'",
            topic.topic_key
        ))),
    }
}
