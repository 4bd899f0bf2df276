//! Data models for the triggers domain.

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};
use utoipa::ToSchema;
use validator::Validate;

use crate::classifier::{self, TOPIC_MARKER};

fn empty_object() -> Value {
    Value::Object(Map::new())
}

// ============================================================================
// Tenant & Transaction
// ============================================================================

/// Who is triggering: read-only input threaded through every collaborator call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TenantContext {
    pub environment_id: String,
    pub organization_id: String,
    pub user_id: String,
}

impl TenantContext {
    pub fn new(
        environment_id: impl Into<String>,
        organization_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            environment_id: environment_id.into(),
            organization_id: organization_id.into(),
            user_id: user_id.into(),
        }
    }
}

/// Identity of one trigger. Immutable once established; the transaction id is
/// the only key accepted for cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerTransaction {
    pub transaction_id: String,
    #[serde(flatten)]
    pub tenant: TenantContext,
}

impl TriggerTransaction {
    pub fn new(transaction_id: impl Into<String>, tenant: TenantContext) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            tenant,
        }
    }
}

// ============================================================================
// Recipients
// ============================================================================

/// A concrete subscriber, optionally carrying profile overrides.
///
/// Direct object recipients already have this shape and pass through
/// unchanged, including override keys not modelled here (kept in `extra`);
/// topic members only ever fill `subscriber_id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedSubscriber {
    pub subscriber_id: String,
    /// Discriminator of the original object, kept for forward compatibility.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub data: Option<Value>,
    /// Any other profile override (`channels`, `timezone`, ...).
    #[serde(flatten)]
    #[schema(value_type = Object)]
    pub extra: Map<String, Value>,
}

impl ResolvedSubscriber {
    /// Bare subscriber with no overrides.
    pub fn from_id(subscriber_id: impl Into<String>) -> Self {
        Self {
            subscriber_id: subscriber_id.into(),
            ..Default::default()
        }
    }
}

/// Reference to a dynamically-membered group of subscribers.
///
/// An empty `topic_key` marks a malformed reference (topic marker present but
/// no key); resolution records it as a failure.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicReference {
    pub topic_key: String,
}

impl TopicReference {
    pub fn new(topic_key: impl Into<String>) -> Self {
        Self {
            topic_key: topic_key.into(),
        }
    }

    pub fn is_malformed(&self) -> bool {
        self.topic_key.trim().is_empty()
    }
}

/// One entry of a trigger's `to` field (or the `actor` field).
///
/// The wire form is classified structurally by
/// [`classifier::parse_recipient`]; once parsed exactly one variant is active.
#[derive(Debug, Clone, PartialEq)]
pub enum RecipientExpression {
    DirectId(String),
    DirectObject(ResolvedSubscriber),
    TopicReference(TopicReference),
}

impl From<&str> for RecipientExpression {
    fn from(subscriber_id: &str) -> Self {
        RecipientExpression::DirectId(subscriber_id.to_string())
    }
}

impl From<ResolvedSubscriber> for RecipientExpression {
    fn from(subscriber: ResolvedSubscriber) -> Self {
        RecipientExpression::DirectObject(subscriber)
    }
}

impl From<TopicReference> for RecipientExpression {
    fn from(topic: TopicReference) -> Self {
        RecipientExpression::TopicReference(topic)
    }
}

impl Serialize for RecipientExpression {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RecipientExpression::DirectId(id) => serializer.serialize_str(id),
            RecipientExpression::DirectObject(subscriber) => subscriber.serialize(serializer),
            RecipientExpression::TopicReference(topic) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("type", TOPIC_MARKER)?;
                map.serialize_entry("topicKey", &topic.topic_key)?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for RecipientExpression {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        classifier::parse_recipient(value).map_err(de::Error::custom)
    }
}

/// `to` accepts either one recipient expression or a list of them.
fn deserialize_recipients<'de, D>(deserializer: D) -> Result<Vec<RecipientExpression>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .map(|item| classifier::parse_recipient(item).map_err(de::Error::custom))
            .collect(),
        single => classifier::parse_recipient(single)
            .map(|expr| vec![expr])
            .map_err(de::Error::custom),
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Trigger a workflow for a set of recipients.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRequest {
    /// Template (workflow) identifier.
    #[validate(length(min = 1, max = 256))]
    pub name: String,
    #[serde(default = "empty_object")]
    #[schema(value_type = Object)]
    pub payload: Value,
    #[serde(default = "empty_object")]
    #[schema(value_type = Object)]
    pub overrides: Value,
    /// Subscriber id, subscriber object, topic reference, or a list of them.
    #[serde(deserialize_with = "deserialize_recipients")]
    #[schema(value_type = Vec<Object>)]
    pub to: Vec<RecipientExpression>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub actor: Option<RecipientExpression>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 128))]
    pub transaction_id: Option<String>,
}

impl TriggerRequest {
    pub fn new(name: impl Into<String>, to: Vec<RecipientExpression>) -> Self {
        Self {
            name: name.into(),
            payload: empty_object(),
            overrides: empty_object(),
            to,
            actor: None,
            transaction_id: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_actor(mut self, actor: RecipientExpression) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn with_transaction_id(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }
}

/// Several triggers submitted in one call.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BulkTriggerRequest {
    #[validate(length(min = 1))]
    #[validate(nested)]
    pub events: Vec<TriggerRequest>,
}

/// Trigger a workflow for every subscriber of the tenant.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastRequest {
    #[validate(length(min = 1, max = 256))]
    pub name: String,
    #[serde(default = "empty_object")]
    #[schema(value_type = Object)]
    pub payload: Value,
    #[serde(default = "empty_object")]
    #[schema(value_type = Object)]
    pub overrides: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 128))]
    pub transaction_id: Option<String>,
}

impl BroadcastRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: empty_object(),
            overrides: empty_object(),
            transaction_id: None,
        }
    }
}

// ============================================================================
// Commands handed to the workflow engine
// ============================================================================

/// A fully resolved trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerCommand {
    pub transaction: TriggerTransaction,
    pub template_identifier: String,
    pub payload: Value,
    pub overrides: Value,
    pub to: Vec<ResolvedSubscriber>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<ResolvedSubscriber>,
}

/// Who a broadcast targets. The engine does its own fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Audience {
    AllSubscribers,
}

/// A trigger for the tenant's whole subscriber population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastCommand {
    pub transaction: TriggerTransaction,
    pub template_identifier: String,
    pub payload: Value,
    pub overrides: Value,
    pub audience: Audience,
}

/// Status reported by the workflow engine adapters in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TriggerStatus {
    /// Accepted by an in-process engine.
    Processed,
    /// Written to the workflow stream for a worker to pick up.
    Queued,
    /// Accepted but the resolved recipient list was empty.
    NoRecipients,
}

/// Engine acknowledgement, returned to the caller verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DispatchAck {
    pub acknowledged: bool,
    pub status: String,
    pub transaction_id: String,
}

impl DispatchAck {
    pub fn new(status: TriggerStatus, transaction_id: impl Into<String>) -> Self {
        Self {
            acknowledged: true,
            status: status.to_string(),
            transaction_id: transaction_id.into(),
        }
    }
}

// ============================================================================
// Failure records
// ============================================================================

/// A topic that could not be expanded during resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionFailure {
    /// Empty when the reference itself had no key.
    pub topic_key: String,
    pub transaction_id: String,
    pub environment_id: String,
    pub organization_id: String,
    pub user_id: String,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

impl ResolutionFailure {
    pub fn new(
        topic_key: impl Into<String>,
        transaction: &TriggerTransaction,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            topic_key: topic_key.into(),
            transaction_id: transaction.transaction_id.clone(),
            environment_id: transaction.tenant.environment_id.clone(),
            organization_id: transaction.tenant.organization_id.clone(),
            user_id: transaction.tenant.user_id.clone(),
            reason: reason.into(),
            occurred_at: Utc::now(),
        }
    }
}
