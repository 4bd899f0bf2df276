//! Shared test utilities for domain testing
//!
//! - `TestRedis`: Redis container with automatic cleanup (feature: "redis")
//! - `TestDataBuilder`: Deterministic tenant, subscriber and topic identifiers
//!
//! # Redis Testing
//!
//! Add `features = ["redis"]` to your dev-dependencies:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { workspace = true, features = ["redis"] }
//! ```
//!
//! Then in your tests:
//!
//! ```rust,ignore
//! use test_utils::{TestDataBuilder, TestRedis};
//!
//! #[tokio::test]
//! async fn my_redis_test() {
//!     let redis = TestRedis::new().await;
//!     let manager = redis.connection_manager().await;
//!     let builder = TestDataBuilder::from_test_name("my_redis_test");
//!
//!     let topic = builder.topic_key("ops");
//! }
//! ```

use uuid::Uuid;

#[cfg(feature = "redis")]
mod redis;

#[cfg(feature = "redis")]
pub use redis::TestRedis;

/// Builder for test data with deterministic randomization
///
/// The same test name always yields the same identifiers, and different test
/// names never share keys in a shared Redis.
pub struct TestDataBuilder {
    seed: u64,
}

impl TestDataBuilder {
    /// Create a new builder with a seed (for deterministic tests)
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Create from test name (generates seed from test name hash)
    ///
    /// # Example
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::from_test_name("test_trigger_topic");
    /// ```
    pub fn from_test_name(name: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self::new(hasher.finish())
    }

    pub fn environment_id(&self) -> String {
        format!("env-{}", self.seed)
    }

    pub fn organization_id(&self) -> String {
        format!("org-{}", self.seed)
    }

    /// Deterministic UUID for the acting user
    pub fn user_id(&self) -> Uuid {
        let bytes = self.seed.to_le_bytes();
        let mut uuid_bytes = [0u8; 16];
        uuid_bytes[..8].copy_from_slice(&bytes);
        uuid_bytes[8..16].copy_from_slice(&bytes);
        Uuid::from_bytes(uuid_bytes)
    }

    /// Subscriber id, e.g. `sub-12345-alice`
    pub fn subscriber_id(&self, suffix: &str) -> String {
        format!("sub-{}-{}", self.seed, suffix)
    }

    /// Topic key, e.g. `topic-12345-ops`
    pub fn topic_key(&self, suffix: &str) -> String {
        format!("topic-{}-{}", self.seed, suffix)
    }

    pub fn transaction_id(&self, suffix: &str) -> String {
        format!("tx-{}-{}", self.seed, suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_builder_deterministic() {
        let builder1 = TestDataBuilder::new(42);
        let builder2 = TestDataBuilder::new(42);

        assert_eq!(builder1.user_id(), builder2.user_id());
        assert_eq!(builder1.topic_key("ops"), builder2.topic_key("ops"));
        assert_eq!(builder1.environment_id(), "env-42");
        assert_eq!(builder1.subscriber_id("alice"), "sub-42-alice");
    }

    #[test]
    fn test_data_builder_different_names() {
        let builder1 = TestDataBuilder::from_test_name("test1");
        let builder2 = TestDataBuilder::from_test_name("test2");

        assert_ne!(builder1.environment_id(), builder2.environment_id());
        assert_ne!(builder1.transaction_id("a"), builder2.transaction_id("a"));
    }
}
