//! Integration tests for the Redis collaborators
//!
//! Each test starts its own Redis 8 container through `TestRedis`.

use domain_triggers::models::TriggerCommand;
use domain_triggers::redis::{
    RedisKeys, RedisTopicStore, RedisTransactionValidator, RedisWorkflowEngine,
};
use domain_triggers::{
    RecipientExpression, ResolvedSubscriber, TenantContext, TopicLookupError,
    TopicReference, TopicSubscriberResolver, TransactionValidator, TriggerCollaborators,
    TriggerError, TriggerRequest, TriggerService, TriggerServiceConfig, TriggerTransaction,
    WorkflowEngine,
};
use redis::AsyncCommands;
use serde_json::json;
use test_utils::{TestDataBuilder, TestRedis};

fn tenant(builder: &TestDataBuilder) -> TenantContext {
    TenantContext::new(
        builder.environment_id(),
        builder.organization_id(),
        builder.user_id().to_string(),
    )
}

fn command(builder: &TestDataBuilder, tx: &str, to: &[&str]) -> TriggerCommand {
    TriggerCommand {
        transaction: TriggerTransaction::new(tx, tenant(builder)),
        template_identifier: "welcome".to_string(),
        payload: json!({"plan": "pro"}),
        overrides: json!({}),
        to: to.iter().map(|id| ResolvedSubscriber::from_id(*id)).collect(),
        actor: None,
    }
}

#[tokio::test]
async fn test_validator_rejects_reused_transaction() {
    let redis = TestRedis::new().await;
    let builder = TestDataBuilder::from_test_name("redis_validator");
    let validator =
        RedisTransactionValidator::new(redis.connection_manager().await, RedisKeys::default());

    let tx = builder.transaction_id("a");
    let org = builder.organization_id();
    let env = builder.environment_id();

    validator.validate(&tx, &org, &env).await.unwrap();

    let err = validator.validate(&tx, &org, &env).await.unwrap_err();
    assert!(matches!(err, TriggerError::DuplicateTransaction(ref id) if id == &tx));

    // The claim carries a TTL
    let mut conn = redis.connection();
    let ttl: i64 = conn
        .ttl(RedisKeys::default().transaction(&org, &env, &tx))
        .await
        .unwrap();
    assert!(ttl > 0);
}

#[tokio::test]
async fn test_topic_store_reads_members_in_order() {
    let redis = TestRedis::new().await;
    let builder = TestDataBuilder::from_test_name("redis_topic_members");
    let store = RedisTopicStore::new(redis.connection_manager().await, RedisKeys::default());
    let topic = builder.topic_key("ops");

    store
        .set_members(
            &builder.environment_id(),
            &topic,
            &["c".to_string(), "a".to_string(), "b".to_string()],
        )
        .await
        .unwrap();

    let members = store.get_members(&topic, &tenant(&builder)).await.unwrap();
    assert_eq!(members, vec!["c", "a", "b"]);

    // Replacing shrinks the list
    store
        .set_members(&builder.environment_id(), &topic, &["z".to_string()])
        .await
        .unwrap();
    let members = store.get_members(&topic, &tenant(&builder)).await.unwrap();
    assert_eq!(members, vec!["z"]);
}

#[tokio::test]
async fn test_topic_store_missing_topic_is_not_found() {
    let redis = TestRedis::new().await;
    let builder = TestDataBuilder::from_test_name("redis_topic_missing");
    let store = RedisTopicStore::new(redis.connection_manager().await, RedisKeys::default());

    let err = store
        .get_members("ghost", &tenant(&builder))
        .await
        .unwrap_err();

    assert_eq!(err, TopicLookupError::NotFound("ghost".to_string()));
}

#[tokio::test]
async fn test_engine_queues_and_cancels() {
    let redis = TestRedis::new().await;
    let builder = TestDataBuilder::from_test_name("redis_engine_cancel");
    let keys = RedisKeys::default();
    let engine = RedisWorkflowEngine::new(redis.connection_manager().await, keys.clone());
    let tx = builder.transaction_id("queued");

    let ack = engine
        .dispatch(command(&builder, &tx, &["u1", "u2"]))
        .await
        .unwrap();
    assert_eq!(ack.status, "queued");
    assert_eq!(ack.transaction_id, tx);

    let mut conn = redis.connection();
    let len: usize = conn.xlen(&keys.stream_name).await.unwrap();
    assert_eq!(len, 1);

    assert!(engine.cancel(&tx, &tenant(&builder)).await.unwrap());
    let len: usize = conn.xlen(&keys.stream_name).await.unwrap();
    assert_eq!(len, 0);

    assert!(!engine.cancel(&tx, &tenant(&builder)).await.unwrap());
}

#[tokio::test]
async fn test_engine_completed_work_is_not_cancellable() {
    let redis = TestRedis::new().await;
    let builder = TestDataBuilder::from_test_name("redis_engine_completed");
    let engine = RedisWorkflowEngine::new(redis.connection_manager().await, RedisKeys::default());
    let tx = builder.transaction_id("done");

    engine
        .dispatch(command(&builder, &tx, &["u1"]))
        .await
        .unwrap();
    assert!(engine.mark_completed(&builder.environment_id(), &tx).await.unwrap());

    assert!(!engine.cancel(&tx, &tenant(&builder)).await.unwrap());
}

#[tokio::test]
async fn test_engine_rolls_back_entry_when_marker_fails() {
    let redis = TestRedis::new().await;
    let builder = TestDataBuilder::from_test_name("redis_engine_rollback");
    // Redis rejects `SET .. EX 0`, so the pending marker cannot be written.
    let keys = RedisKeys {
        idempotency_ttl_secs: 0,
        ..RedisKeys::default()
    };
    let engine = RedisWorkflowEngine::new(redis.connection_manager().await, keys.clone());
    let tx = builder.transaction_id("rollback");

    let err = engine
        .dispatch(command(&builder, &tx, &["u1"]))
        .await
        .unwrap_err();
    assert!(matches!(err, TriggerError::Queue(_)));

    // Nothing left behind for a worker to run
    let mut conn = redis.connection();
    let len: usize = conn.xlen(&keys.stream_name).await.unwrap();
    assert_eq!(len, 0);
    assert!(!engine.cancel(&tx, &tenant(&builder)).await.unwrap());
}

#[tokio::test]
async fn test_engine_skips_empty_recipient_list() {
    let redis = TestRedis::new().await;
    let builder = TestDataBuilder::from_test_name("redis_engine_empty");
    let keys = RedisKeys::default();
    let engine = RedisWorkflowEngine::new(redis.connection_manager().await, keys.clone());

    let ack = engine
        .dispatch(command(&builder, &builder.transaction_id("empty"), &[]))
        .await
        .unwrap();

    assert_eq!(ack.status, "no_recipients");
    let mut conn = redis.connection();
    let len: usize = conn.xlen(&keys.stream_name).await.unwrap();
    assert_eq!(len, 0);
}

#[tokio::test]
async fn test_service_over_redis_end_to_end() {
    use domain_triggers::memory::{RecordingFailureSink, UuidTransactionIdGenerator};
    use std::sync::Arc;

    let redis = TestRedis::new().await;
    let builder = TestDataBuilder::from_test_name("redis_service_e2e");
    let keys = RedisKeys::default();
    let manager = redis.connection_manager().await;

    let topics = RedisTopicStore::new(manager.clone(), keys.clone());
    topics
        .set_members(
            &builder.environment_id(),
            &builder.topic_key("ops"),
            &["m1".to_string(), "m2".to_string()],
        )
        .await
        .unwrap();
    let failures = RecordingFailureSink::new();

    let service = TriggerService::new(
        TriggerCollaborators {
            validator: Arc::new(RedisTransactionValidator::new(manager.clone(), keys.clone())),
            topics: Arc::new(topics),
            failures: Arc::new(failures.clone()),
            engine: Arc::new(RedisWorkflowEngine::new(manager, keys.clone())),
            ids: Arc::new(UuidTransactionIdGenerator),
        },
        TriggerServiceConfig::default(),
    );

    let request = TriggerRequest::new(
        "incident",
        vec![
            TopicReference::new(builder.topic_key("ops")).into(),
            TopicReference::new(builder.topic_key("missing")).into(),
            RecipientExpression::from("d1"),
        ],
    );

    let ack = service.trigger(tenant(&builder), request).await.unwrap();
    assert_eq!(ack.status, "queued");

    // Queued command carries directs first, then topic members
    let mut conn = redis.connection();
    let entries: redis::streams::StreamRangeReply = conn
        .xrange_all(&keys.stream_name)
        .await
        .unwrap();
    assert_eq!(entries.ids.len(), 1);
    let raw: String = entries.ids[0].get("command").unwrap();
    let queued: TriggerCommand = serde_json::from_str(&raw).unwrap();
    let ids: Vec<&str> = queued.to.iter().map(|s| s.subscriber_id.as_str()).collect();
    assert_eq!(ids, vec!["d1", "m1", "m2"]);

    let recorded = failures.failures().await;
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].topic_key, builder.topic_key("missing"));
}
