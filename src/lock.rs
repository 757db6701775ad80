//! Distributed per-video lock
//!
//! Single-setter with expiry: at most one worker processes a given video at
//! a time, and a crashed holder's lock evaporates at the TTL. Release is
//! best-effort; releasing a lock that is not held is a no-op.

use redis::aio::ConnectionManager;
use tracing::{info, warn};

#[derive(Clone)]
pub struct VideoLock {
    conn: ConnectionManager,
    prefix: String,
    ttl_secs: u64,
}

impl VideoLock {
    pub async fn connect(redis_url: &str, prefix: &str, ttl_secs: u64) -> crate::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            prefix: prefix.to_string(),
            ttl_secs,
        })
    }

    fn key(&self, video_id: &str) -> String {
        format!("{}:{}", self.prefix, video_id)
    }

    /// Try to acquire the lock for a video. Returns false when already held.
    pub async fn acquire(&self, video_id: &str) -> crate::Result<bool> {
        let mut conn = self.conn.clone();
        let acquired: Option<String> = redis::cmd("SET")
            .arg(self.key(video_id))
            .arg("locked")
            .arg("NX")
            .arg("EX")
            .arg(self.ttl_secs)
            .query_async(&mut conn)
            .await?;

        if acquired.is_some() {
            info!("lock acquired for {}", video_id);
            Ok(true)
        } else {
            warn!("lock already held for {} - skipping", video_id);
            Ok(false)
        }
    }

    /// Release the lock. Errors are swallowed - the TTL is the backstop.
    pub async fn release(&self, video_id: &str) {
        let mut conn = self.conn.clone();
        let deleted: redis::RedisResult<i64> = redis::cmd("DEL")
            .arg(self.key(video_id))
            .query_async(&mut conn)
            .await;

        match deleted {
            Ok(_) => info!("lock released for {}", video_id),
            Err(e) => warn!("lock release for {} failed (ignored): {}", video_id, e),
        }
    }

    /// Extend the TTL for a long-running job. Returns false if the lock no
    /// longer exists.
    pub async fn extend(&self, video_id: &str, extra_secs: u64) -> crate::Result<bool> {
        let mut conn = self.conn.clone();
        let extended: i64 = redis::cmd("EXPIRE")
            .arg(self.key(video_id))
            .arg(self.ttl_secs + extra_secs)
            .query_async(&mut conn)
            .await?;
        Ok(extended == 1)
    }
}
