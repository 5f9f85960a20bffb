//! Command-line configuration
//!
//! Every option can also be set through an environment variable with the
//! `THROTTLECRAB_REDIS_` prefix.
//!
//! # Configuration Priority
//!
//! 1. CLI arguments (highest priority)
//! 2. Environment variables
//! 3. Default values (lowest priority)
//!
//! # Example Usage
//!
//! ```bash
//! export THROTTLECRAB_REDIS_URL=redis://cache:6379
//! export THROTTLECRAB_REDIS_KEY_PREFIX=rl:
//! throttlecrab-redis throttle user:42 --max-burst 10 --count 100 --period 60
//! throttlecrab-redis --db 3 get user:42
//! ```

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use std::time::Duration;
use throttlecrab_redis::PoolConfig;

/// Settings needed to reach the store
#[derive(Debug, Clone)]
pub struct Config {
    pub redis: RedisConfig,
    pub pool: PoolSettings,
    /// Logging level (error, warn, info, debug, trace)
    pub log_level: String,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Connection URL, e.g. `redis://127.0.0.1:6379`
    pub url: String,
    /// Prepended to every key
    pub key_prefix: String,
    /// Logical database index, 0 skips `SELECT`
    pub db: u32,
}

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_idle_connections: usize,
    pub idle_timeout_secs: u64,
    pub connect_timeout_ms: u64,
}

impl PoolSettings {
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_idle_connections: self.max_idle_connections,
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Print the value of a key and the server time
    Get { key: String },
    /// Set a key only if it does not exist
    SetNx {
        key: String,
        value: i64,
        #[arg(long, value_name = "SECS", default_value_t = 0)]
        ttl: u64,
    },
    /// Replace OLD with NEW if the key currently holds OLD
    Cas {
        key: String,
        old: i64,
        new: i64,
        #[arg(long, value_name = "SECS", default_value_t = 0)]
        ttl: u64,
    },
    /// Run one GCRA rate limit check against the store
    Throttle {
        key: String,
        #[arg(long, default_value_t = 10)]
        max_burst: i64,
        #[arg(long, default_value_t = 100)]
        count: i64,
        #[arg(long, value_name = "SECS", default_value_t = 60)]
        period: i64,
        #[arg(long, default_value_t = 1)]
        quantity: i64,
    },
}

#[derive(Parser, Debug)]
#[command(
    name = "throttlecrab-redis",
    about = "Inspect and update GCRA rate limiter state in Redis",
    long_about = "Inspect and update GCRA rate limiter state in Redis.\n\nEnvironment variables with THROTTLECRAB_REDIS_ prefix are supported. CLI arguments take precedence over environment variables."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[arg(
        long,
        value_name = "URL",
        help = "Redis URL",
        default_value = "redis://127.0.0.1:6379",
        env = "THROTTLECRAB_REDIS_URL",
        global = true
    )]
    pub url: String,
    #[arg(
        long,
        value_name = "PREFIX",
        help = "Prefix prepended to every key",
        default_value = "",
        env = "THROTTLECRAB_REDIS_KEY_PREFIX",
        global = true
    )]
    pub key_prefix: String,
    #[arg(
        long,
        value_name = "INDEX",
        help = "Logical database index",
        default_value_t = 0,
        env = "THROTTLECRAB_REDIS_DB",
        global = true
    )]
    pub db: u32,

    #[arg(
        long,
        value_name = "N",
        help = "Maximum idle pooled connections",
        default_value_t = 100,
        env = "THROTTLECRAB_REDIS_POOL_MAX_IDLE",
        global = true
    )]
    pub pool_max_idle: usize,
    #[arg(
        long,
        value_name = "SECS",
        help = "Idle connection lifetime in seconds",
        default_value_t = 90,
        env = "THROTTLECRAB_REDIS_POOL_IDLE_TIMEOUT",
        global = true
    )]
    pub pool_idle_timeout: u64,
    #[arg(
        long,
        value_name = "MS",
        help = "Connect timeout in milliseconds",
        default_value_t = 5000,
        env = "THROTTLECRAB_REDIS_CONNECT_TIMEOUT",
        global = true
    )]
    pub connect_timeout: u64,

    #[arg(
        long,
        value_name = "LEVEL",
        help = "Log level: error, warn, info, debug, trace",
        default_value = "info",
        env = "THROTTLECRAB_REDIS_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    #[arg(
        long,
        help = "List all environment variables and exit",
        action = clap::ArgAction::SetTrue
    )]
    pub list_env_vars: bool,
}

impl Config {
    /// Build configuration from environment variables and CLI arguments
    ///
    /// Returns the validated configuration and the command to run.
    pub fn from_env_and_args() -> Result<(Self, Command)> {
        let args = Args::parse();

        if args.list_env_vars {
            Self::print_env_vars();
            std::process::exit(0);
        }

        Self::from_args(args)
    }

    fn from_args(args: Args) -> Result<(Self, Command)> {
        let command = args
            .command
            .ok_or_else(|| anyhow!("No command given. Try '--help'"))?;

        let config = Config {
            redis: RedisConfig {
                url: args.url,
                key_prefix: args.key_prefix,
                db: args.db,
            },
            pool: PoolSettings {
                max_idle_connections: args.pool_max_idle,
                idle_timeout_secs: args.pool_idle_timeout,
                connect_timeout_ms: args.connect_timeout,
            },
            log_level: args.log_level,
        };

        config.validate()?;

        Ok((config, command))
    }

    fn validate(&self) -> Result<()> {
        if self.redis.url.trim().is_empty() {
            return Err(anyhow!("Redis URL must not be empty"));
        }

        if self.pool.max_idle_connections == 0 {
            return Err(anyhow!("Pool must keep at least one idle connection"));
        }

        Ok(())
    }

    fn print_env_vars() {
        println!("ThrottleCrab Redis Environment Variables");
        println!("========================================");
        println!();
        println!("CLI arguments take precedence over environment variables.");
        println!();
        println!("Store:");
        println!(
            "  THROTTLECRAB_REDIS_URL=<url>                 Redis URL [default: redis://127.0.0.1:6379]"
        );
        println!("  THROTTLECRAB_REDIS_KEY_PREFIX=<prefix>       Key prefix [default: empty]");
        println!("  THROTTLECRAB_REDIS_DB=<index>                Database index [default: 0]");
        println!();
        println!("Pool:");
        println!("  THROTTLECRAB_REDIS_POOL_MAX_IDLE=<n>         Max idle connections [default: 100]");
        println!(
            "  THROTTLECRAB_REDIS_POOL_IDLE_TIMEOUT=<secs>  Idle connection lifetime [default: 90]"
        );
        println!("  THROTTLECRAB_REDIS_CONNECT_TIMEOUT=<ms>      Connect timeout [default: 5000]");
        println!();
        println!("General:");
        println!(
            "  THROTTLECRAB_REDIS_LOG_LEVEL=<level>         Log level: error, warn, info, debug, trace [default: info]"
        );
    }
}
