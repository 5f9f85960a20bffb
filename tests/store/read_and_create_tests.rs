use crate::support::MockRedis;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use throttlecrab_redis::{GcraStore, MISSING_VALUE, RedisStore, StoreError};

#[tokio::test]
async fn test_missing_key_reads_sentinel_with_time() {
    let redis = MockRedis::start().await;
    let store = redis.store();

    let before = SystemTime::now();
    let (value, now) = store.get_with_time("never-written").await.unwrap();

    assert_eq!(value, MISSING_VALUE);
    let drift = now
        .duration_since(before)
        .unwrap_or_else(|e| e.duration());
    assert!(drift < Duration::from_secs(5), "drift: {drift:?}");
}

#[tokio::test]
async fn test_read_uses_one_round_trip_for_time_and_value() {
    let redis = MockRedis::start().await;
    let store = redis.store();
    redis.set(0, "k", "42");

    let (value, _) = store.get_with_time("k").await.unwrap();

    assert_eq!(value, 42);
    assert_eq!(redis.command_count("TIME"), 1);
    assert_eq!(redis.command_count("GET"), 1);
}

#[tokio::test]
async fn test_time_comes_from_the_server() {
    let skew = Duration::from_secs(3600);
    let redis = MockRedis::builder().clock_skew(skew).start().await;
    let store = redis.store();

    let (_, now) = store.get_with_time("k").await.unwrap();

    let ahead = now.duration_since(SystemTime::now()).unwrap();
    assert!(ahead > skew - Duration::from_secs(5), "ahead: {ahead:?}");
    assert!(ahead < skew + Duration::from_secs(5), "ahead: {ahead:?}");
}

#[tokio::test]
async fn test_non_integer_value_is_a_backend_error() {
    let redis = MockRedis::start().await;
    let store = redis.store();
    redis.set(0, "k", "not-a-number");

    let result = store.get_with_time("k").await;
    assert!(matches!(result, Err(StoreError::Backend(_))));
}

#[tokio::test]
async fn test_key_prefix_is_prepended() {
    let redis = MockRedis::start().await;
    let store = RedisStore::builder().key_prefix("rl:").build(redis.pool());

    assert!(store.set_if_not_exists("user", 7, Duration::ZERO).await.unwrap());

    assert_eq!(redis.get(0, "rl:user").as_deref(), Some("7"));
    assert_eq!(redis.get(0, "user"), None);
    assert_eq!(store.get_with_time("user").await.unwrap().0, 7);
}

#[tokio::test]
async fn test_set_if_not_exists_only_once() {
    let redis = MockRedis::start().await;
    let store = redis.store();

    assert!(store.set_if_not_exists("k", 1, Duration::ZERO).await.unwrap());
    assert!(!store.set_if_not_exists("k", 2, Duration::ZERO).await.unwrap());

    assert_eq!(store.get_with_time("k").await.unwrap().0, 1);
}

#[tokio::test]
async fn test_set_if_not_exists_without_ttl_persists() {
    let redis = MockRedis::start().await;
    let store = redis.store();

    store.set_if_not_exists("k", 1, Duration::ZERO).await.unwrap();
    store
        .set_if_not_exists("short", 1, Duration::from_millis(900))
        .await
        .unwrap();

    assert_eq!(redis.ttl(0, "k"), None);
    // Truncates to zero seconds, so no expiry at all
    assert_eq!(redis.ttl(0, "short"), None);
    assert_eq!(redis.command_count("EXPIRE"), 0);
}

#[tokio::test]
async fn test_set_if_not_exists_applies_ttl_even_when_not_created() {
    let redis = MockRedis::start().await;
    let store = redis.store();
    redis.set(0, "k", "5");

    let created = store
        .set_if_not_exists("k", 9, Duration::from_millis(30_900))
        .await
        .unwrap();

    assert!(!created);
    assert_eq!(redis.get(0, "k").as_deref(), Some("5"));
    let ttl = redis.ttl(0, "k").unwrap();
    assert!(ttl <= Duration::from_secs(30) && ttl > Duration::from_secs(28));
}

#[tokio::test]
async fn test_expire_failure_reports_whether_created() {
    let redis = MockRedis::start().await;
    let store = redis.store();
    redis.fail_command("EXPIRE", "ERR injected expire failure");

    let result = store.set_if_not_exists("k", 4, Duration::from_secs(10)).await;
    assert!(
        matches!(result, Err(StoreError::Expire { created: true, .. })),
        "{result:?}"
    );
    assert_eq!(redis.get(0, "k").as_deref(), Some("4"));

    let result = store.set_if_not_exists("k", 9, Duration::from_secs(10)).await;
    assert!(matches!(result, Err(StoreError::Expire { created: false, .. })));
    assert_eq!(redis.get(0, "k").as_deref(), Some("4"));

    // Not reached without a TTL
    assert!(store.set_if_not_exists("other", 1, Duration::ZERO).await.unwrap());
}

#[tokio::test]
async fn test_entry_expires_after_ttl() {
    let redis = MockRedis::start().await;
    let store = redis.store();

    assert!(store.set_if_not_exists("k", 3, Duration::from_secs(1)).await.unwrap());
    assert_eq!(store.get_with_time("k").await.unwrap().0, 3);

    tokio::time::sleep(Duration::from_millis(1200)).await;

    assert_eq!(store.get_with_time("k").await.unwrap().0, MISSING_VALUE);
}

#[tokio::test]
async fn test_concurrent_create_has_one_winner() {
    let redis = MockRedis::start().await;
    let store = Arc::new(redis.store());

    let mut handles = Vec::new();
    for value in 0..10 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let created = store
                .set_if_not_exists("contended", value, Duration::from_secs(60))
                .await
                .unwrap();
            (value, created)
        }));
    }

    let mut winners = Vec::new();
    for handle in handles {
        let (value, created) = handle.await.unwrap();
        if created {
            winners.push(value);
        }
    }

    assert_eq!(winners.len(), 1, "winners: {winners:?}");
    let (stored, _) = store.get_with_time("contended").await.unwrap();
    assert_eq!(stored, winners[0]);
}
