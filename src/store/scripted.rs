//! Compare-and-swap as a single server-side script

use redis::aio::ConnectionLike;
use redis::{ErrorKind, RedisError, RedisResult};

/// Lua body run by `EVAL` for compare-and-swap
///
/// `KEYS[1]` is the key, `ARGV` is `old`, `new`, TTL in seconds (`"0"` for
/// none). Replies `-1` when the key is missing, `0` when the value is not
/// `old`, `1` after the write.
pub const CAS_SCRIPT: &str = r#"
local v = redis.call('get', KEYS[1])
if v == false then
  return -1
end
if v ~= ARGV[1] then
  return 0
end
if ARGV[3] ~= "0" then
  redis.call('setex', KEYS[1], ARGV[3], ARGV[2])
else
  redis.call('set', KEYS[1], ARGV[2])
end
return 1
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CasOutcome {
    Swapped,
    Mismatch,
    Missing,
}

impl CasOutcome {
    pub(crate) fn from_reply(reply: i64) -> RedisResult<Self> {
        match reply {
            1 => Ok(CasOutcome::Swapped),
            0 => Ok(CasOutcome::Mismatch),
            -1 => Ok(CasOutcome::Missing),
            other => Err(RedisError::from((
                ErrorKind::TypeError,
                "Unexpected compare-and-swap script reply",
                other.to_string(),
            ))),
        }
    }

    /// A missing key is a declined swap like a mismatch
    pub(crate) fn swapped(self) -> bool {
        matches!(self, CasOutcome::Swapped)
    }
}

pub(crate) async fn compare_and_swap<C: ConnectionLike>(
    conn: &mut C,
    key: &str,
    old: i64,
    new: i64,
    ttl_secs: u64,
) -> RedisResult<CasOutcome> {
    let reply: i64 = redis::cmd("EVAL")
        .arg(CAS_SCRIPT)
        .arg(1)
        .arg(key)
        .arg(old)
        .arg(new)
        .arg(ttl_secs)
        .query_async(conn)
        .await?;

    CasOutcome::from_reply(reply)
}
