//! Compare-and-swap with optimistic locking, for backends without `EVAL`

use redis::RedisResult;
use redis::aio::ConnectionLike;

pub(crate) async fn compare_and_swap<C: ConnectionLike>(
    conn: &mut C,
    key: &str,
    old: i64,
    new: i64,
    ttl_secs: u64,
) -> RedisResult<bool> {
    let watched: RedisResult<((), Option<i64>)> = redis::pipe()
        .cmd("WATCH")
        .arg(key)
        .cmd("GET")
        .arg(key)
        .query_async(conn)
        .await;
    let current = match watched {
        Ok(((), current)) => current,
        Err(err) => {
            // Best effort, the read error is returned regardless
            let _ = redis::cmd("UNWATCH").query_async::<()>(conn).await;
            return Err(err);
        }
    };

    if current != Some(old) {
        // Leave the connection clean for its next user
        redis::cmd("UNWATCH").query_async::<()>(conn).await?;
        return Ok(false);
    }

    let mut pipe = redis::pipe();
    pipe.atomic();
    if ttl_secs > 0 {
        pipe.cmd("SETEX").arg(key).arg(ttl_secs).arg(new).ignore();
    } else {
        pipe.cmd("SET").arg(key).arg(new).ignore();
    }

    // EXEC replies nil when the watched key changed after WATCH
    let committed: Option<()> = pipe.query_async(conn).await?;
    Ok(committed.is_some())
}
