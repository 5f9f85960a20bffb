mod config;

use anyhow::Result;
use std::time::{Duration, UNIX_EPOCH};
use throttlecrab_redis::{ConnectionPool, GcraStore, MISSING_VALUE, RateLimiter, RedisStore};

use crate::config::{Command, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse configuration from environment variables and CLI arguments
    let (config, command) = Config::from_env_and_args()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("throttlecrab_redis={}", config.log_level).parse()?),
        )
        .init();

    let pool = ConnectionPool::open(config.redis.url.as_str(), config.pool.pool_config())?;
    let store = RedisStore::builder()
        .key_prefix(config.redis.key_prefix.clone())
        .db(config.redis.db)
        .build(pool);

    tracing::debug!(
        "Using {} (db {}, prefix {:?})",
        config.redis.url,
        config.redis.db,
        config.redis.key_prefix
    );

    match command {
        Command::Get { key } => {
            let (value, now) = store.get_with_time(&key).await?;
            let now = now.duration_since(UNIX_EPOCH)?;
            if value == MISSING_VALUE {
                println!("{key}: (missing) at {}.{:06}", now.as_secs(), now.subsec_micros());
            } else {
                println!("{key}: {value} at {}.{:06}", now.as_secs(), now.subsec_micros());
            }
        }
        Command::SetNx { key, value, ttl } => {
            let created = store
                .set_if_not_exists(&key, value, Duration::from_secs(ttl))
                .await?;
            println!("created: {created}");
        }
        Command::Cas { key, old, new, ttl } => {
            let swapped = store
                .compare_and_swap(&key, old, new, Duration::from_secs(ttl))
                .await?;
            println!("swapped: {swapped}");
            if !store.supports_scripting() {
                tracing::info!("Backend has no EVAL, used WATCH/MULTI/EXEC");
            }
        }
        Command::Throttle {
            key,
            max_burst,
            count,
            period,
            quantity,
        } => {
            let limiter = RateLimiter::new(store);
            let (allowed, result) = limiter
                .rate_limit(&key, max_burst, count, period, quantity)
                .await?;
            println!("allowed: {allowed}");
            println!("limit: {}", result.limit);
            println!("remaining: {}", result.remaining);
            println!("reset_after: {:?}", result.reset_after);
            println!("retry_after: {:?}", result.retry_after);
        }
    }

    Ok(())
}
