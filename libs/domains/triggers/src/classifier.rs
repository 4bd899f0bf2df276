//! Recipient classification.
//!
//! One rule decides whether a recipient expression names a concrete
//! subscriber or a topic, and the same rule is applied to every `to` entry
//! and to the singular `actor` field:
//!
//! - a string is always a direct subscriber id;
//! - an object is a topic reference only when its `type` equals
//!   [`TOPIC_MARKER`];
//! - an object with no `type`, or with any other `type`, is a direct
//!   subscriber object. Unknown kinds are accepted so that newer clients do not
//!   break older servers.

use serde_json::{Map, Value};
use strum::Display;
use thiserror::Error;

use crate::models::{RecipientExpression, ResolvedSubscriber, TopicReference};

/// Discriminator value that marks a topic reference.
pub const TOPIC_MARKER: &str = "Topic";

/// Accepted field names for the topic key, in lookup order.
const TOPIC_KEY_FIELDS: [&str; 2] = ["topicKey", "topicId"];

/// Wire-level recipient that could not be turned into an expression.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecipientError {
    #[error("recipient must be a string or an object, got {0}")]
    UnsupportedShape(&'static str),

    #[error("subscriber id must not be empty")]
    EmptySubscriberId,

    #[error("invalid subscriber object: {0}")]
    InvalidSubscriber(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum RecipientKind {
    Direct,
    Topic,
}

/// What the `type` field of a structured recipient says.
#[derive(Debug, PartialEq, Eq)]
enum Discriminator<'a> {
    Absent,
    Topic,
    /// Any other value, including non-string ones.
    Unknown(&'a Value),
}

fn discriminator(object: &Map<String, Value>) -> Discriminator<'_> {
    match object.get("type") {
        None | Some(Value::Null) => Discriminator::Absent,
        Some(Value::String(tag)) if tag == TOPIC_MARKER => Discriminator::Topic,
        Some(other) => Discriminator::Unknown(other),
    }
}

fn shape_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Classify a raw JSON recipient into a [`RecipientExpression`].
pub fn parse_recipient(value: Value) -> Result<RecipientExpression, RecipientError> {
    let object = match value {
        Value::String(subscriber_id) => {
            if subscriber_id.trim().is_empty() {
                return Err(RecipientError::EmptySubscriberId);
            }
            return Ok(RecipientExpression::DirectId(subscriber_id));
        }
        Value::Object(object) => object,
        other => return Err(RecipientError::UnsupportedShape(shape_name(&other))),
    };

    match discriminator(&object) {
        Discriminator::Topic => {
            // A missing or non-string key still yields a topic reference; the
            // resolver records it as a failure instead of rejecting the trigger.
            let topic_key = TOPIC_KEY_FIELDS
                .iter()
                .find_map(|field| object.get(*field).and_then(Value::as_str))
                .unwrap_or_default()
                .to_string();
            Ok(RecipientExpression::TopicReference(TopicReference { topic_key }))
        }
        Discriminator::Unknown(tag) => {
            tracing::debug!(recipient_type = %tag, "Treating unknown recipient type as direct subscriber");
            parse_subscriber_object(object)
        }
        Discriminator::Absent => parse_subscriber_object(object),
    }
}

fn parse_subscriber_object(
    mut object: Map<String, Value>,
) -> Result<RecipientExpression, RecipientError> {
    // Non-string tags cannot live in `ResolvedSubscriber::kind`; drop them.
    if object.get("type").is_some_and(|tag| !tag.is_string()) {
        object.remove("type");
    }

    let subscriber: ResolvedSubscriber = serde_json::from_value(Value::Object(object))
        .map_err(|e| RecipientError::InvalidSubscriber(e.to_string()))?;

    if subscriber.subscriber_id.trim().is_empty() {
        return Err(RecipientError::EmptySubscriberId);
    }

    Ok(RecipientExpression::DirectObject(subscriber))
}

/// A recipient known to denote exactly one subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum DirectRecipient {
    Id(String),
    Object(ResolvedSubscriber),
}

/// Result of classifying a parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    Direct(DirectRecipient),
    Topic(TopicReference),
}

impl Classified {
    pub fn kind(&self) -> RecipientKind {
        match self {
            Classified::Direct(_) => RecipientKind::Direct,
            Classified::Topic(_) => RecipientKind::Topic,
        }
    }
}

/// Split an expression into its direct or topic form.
pub fn classify(expr: RecipientExpression) -> Classified {
    match expr {
        RecipientExpression::DirectId(id) => Classified::Direct(DirectRecipient::Id(id)),
        RecipientExpression::DirectObject(subscriber) => {
            Classified::Direct(DirectRecipient::Object(subscriber))
        }
        RecipientExpression::TopicReference(topic) => Classified::Topic(topic),
    }
}

/// Kind of an expression without consuming it.
pub fn kind_of(expr: &RecipientExpression) -> RecipientKind {
    match expr {
        RecipientExpression::DirectId(_) | RecipientExpression::DirectObject(_) => {
            RecipientKind::Direct
        }
        RecipientExpression::TopicReference(_) => RecipientKind::Topic,
    }
}

/// Turn a direct recipient into a [`ResolvedSubscriber`].
///
/// Topics cannot reach this function; they go through topic resolution.
pub fn map_to_resolved_subscriber(direct: DirectRecipient) -> ResolvedSubscriber {
    match direct {
        DirectRecipient::Id(subscriber_id) => ResolvedSubscriber::from_id(subscriber_id),
        DirectRecipient::Object(subscriber) => subscriber,
    }
}

/// Order-preserving split of a recipient list.
#[derive(Debug, Default, PartialEq)]
pub struct Partition {
    pub directs: Vec<DirectRecipient>,
    pub topics: Vec<TopicReference>,
}

pub fn partition(recipients: Vec<RecipientExpression>) -> Partition {
    let mut partition = Partition::default();

    for expr in recipients {
        match classify(expr) {
            Classified::Direct(direct) => partition.directs.push(direct),
            Classified::Topic(topic) => partition.topics.push(topic),
        }
    }

    partition
}
