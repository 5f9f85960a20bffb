use redis::RedisError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(#[source] RedisError),

    #[error("Timeout while connecting to backend")]
    Timeout,

    #[error("Failed to select database {db}: {source}")]
    Select {
        db: u32,
        #[source]
        source: RedisError,
    },

    /// The create step of a conditional create ran, but setting the TTL failed.
    /// `created` tells whether this call performed the create.
    #[error("Failed to set expiration (created: {created}): {source}")]
    Expire {
        created: bool,
        #[source]
        source: RedisError,
    },

    #[error("Invalid reply from backend: {0}")]
    InvalidReply(String),

    #[error("Backend error: {0}")]
    Backend(#[from] RedisError),
}

pub type Result<T> = std::result::Result<T, StoreError>;
