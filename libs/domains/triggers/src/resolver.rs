//! Recipient resolution: turns a trigger's `to` list into concrete subscribers.
//!
//! ```text
//! to: [d1, T1, d2, T2]
//!        │ partition (order preserving)
//!        ├── directs [d1, d2] ──────────────► front of result
//!        └── topics  [T1, T2] ─► lookups (bounded, concurrent)
//!                                  │ ordered by input position
//!                                  ├── Ok(members) ► appended
//!                                  └── Err         ► failure sink, nothing appended
//! result: [d1, d2, ...T1 members, ...T2 members]
//! ```
//!
//! A failed topic never fails the trigger. Members are not de-duplicated.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::classifier::{self, map_to_resolved_subscriber};
use crate::error::TopicLookupError;
use crate::models::{
    RecipientExpression, ResolutionFailure, ResolvedSubscriber, TopicReference, TriggerTransaction,
};
use crate::ports::{FailureSink, TopicSubscriberResolver};

/// Outcome of expanding one topic.
type TopicOutcome = Result<Vec<ResolvedSubscriber>, ResolutionFailure>;

/// Resolves recipient expressions against the topic store.
pub struct RecipientResolver {
    topics: Arc<dyn TopicSubscriberResolver>,
    failures: Arc<dyn FailureSink>,
    fanout_limit: usize,
    /// Deadline for each topic lookup and each failure sink write.
    lookup_timeout: Duration,
}

impl RecipientResolver {
    pub fn new(
        topics: Arc<dyn TopicSubscriberResolver>,
        failures: Arc<dyn FailureSink>,
        fanout_limit: usize,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            topics,
            failures,
            fanout_limit: fanout_limit.max(1),
            lookup_timeout,
        }
    }

    /// Resolve `recipients` for one trigger.
    ///
    /// The first `|directs|` entries of the result are the direct recipients
    /// in input order; topic members follow, grouped by topic in input order.
    #[instrument(skip(self, recipients), fields(transaction_id = %transaction.transaction_id, recipients = recipients.len()))]
    pub async fn resolve(
        &self,
        transaction: &TriggerTransaction,
        recipients: Vec<RecipientExpression>,
    ) -> Vec<ResolvedSubscriber> {
        let partition = classifier::partition(recipients);

        let mut subscribers: Vec<ResolvedSubscriber> = partition
            .directs
            .into_iter()
            .map(map_to_resolved_subscriber)
            .collect();
        let direct_count = subscribers.len();

        if partition.topics.is_empty() {
            return subscribers;
        }

        let topic_count = partition.topics.len();

        // `buffered` yields in input order regardless of completion order.
        let outcomes: Vec<TopicOutcome> = stream::iter(partition.topics)
            .map(|topic| self.resolve_topic(transaction, topic))
            .buffered(self.fanout_limit)
            .collect()
            .await;

        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(members) => subscribers.extend(members),
                Err(failure) => failures.push(failure),
            }
        }

        let failed_topics = failures.len();
        for failure in failures {
            self.record_failure(failure).await;
        }

        debug!(
            direct_count,
            topic_count,
            failed_topics,
            resolved = subscribers.len(),
            "Resolved recipients"
        );

        subscribers
    }

    async fn resolve_topic(
        &self,
        transaction: &TriggerTransaction,
        topic: TopicReference,
    ) -> TopicOutcome {
        if topic.is_malformed() {
            return Err(ResolutionFailure::new(
                "",
                transaction,
                "malformed topic reference: missing topic key",
            ));
        }

        let lookup = self.topics.get_members(&topic.topic_key, &transaction.tenant);

        let result = match tokio::time::timeout(self.lookup_timeout, lookup).await {
            Ok(result) => result,
            Err(_) => Err(TopicLookupError::Timeout(self.lookup_timeout.as_millis())),
        };

        match result {
            Ok(member_ids) => Ok(member_ids
                .into_iter()
                .map(ResolvedSubscriber::from_id)
                .collect()),
            Err(e) => Err(ResolutionFailure::new(
                topic.topic_key,
                transaction,
                e.to_string(),
            )),
        }
    }

    async fn record_failure(&self, failure: ResolutionFailure) {
        warn!(
            transaction_id = %failure.transaction_id,
            topic_key = %failure.topic_key,
            reason = %failure.reason,
            "Topic could not be resolved, continuing without its members"
        );

        // Same deadline as a lookup; a stalled sink must not hold the trigger.
        match tokio::time::timeout(self.lookup_timeout, self.failures.record(failure)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Failure sink rejected resolution failure"),
            Err(_) => warn!(
                timeout_ms = self.lookup_timeout.as_millis() as u64,
                "Failure sink timed out, resolution failure dropped"
            ),
        }
    }
}
