use async_trait::async_trait;
use redis::AsyncCommands;
use std::time::Duration;
use tokio::sync::Notify;

const READY_KEY_PREFIX: &str = "site_inspect:ready";

/// Wakes idle workers when new work lands on a queue.
///
/// Notifications are hints only. Workers still poll the job store, so a lost
/// or duplicated wake-up never affects correctness.
#[async_trait]
pub trait JobNotifier: Send + Sync {
    /// Signal that `queue_name` has new work.
    async fn notify(&self, queue_name: &str) -> Result<(), NotifyError>;

    /// Wait up to `timeout` for a signal. Returns `true` if one arrived.
    async fn wait(&self, queue_name: &str, timeout: Duration) -> Result<bool, NotifyError>;

    /// Check connectivity of the backing service (for health checks).
    async fn health_check(&self) -> Result<(), NotifyError>;
}

/// Redis-backed notifier. Each enqueue pushes a token onto a per-queue list;
/// idle workers block on it with `BRPOP`.
pub struct RedisNotifier {
    client: redis::Client,
}

impl RedisNotifier {
    pub fn new(redis_url: &str) -> Result<Self, NotifyError> {
        let client = redis::Client::open(redis_url).map_err(NotifyError::Redis)?;
        Ok(Self { client })
    }

    fn ready_key(queue_name: &str) -> String {
        format!("{READY_KEY_PREFIX}:{queue_name}")
    }
}

#[async_trait]
impl JobNotifier for RedisNotifier {
    async fn notify(&self, queue_name: &str) -> Result<(), NotifyError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(NotifyError::Redis)?;
        let key = Self::ready_key(queue_name);
        conn.lpush::<_, _, ()>(&key, 1)
            .await
            .map_err(NotifyError::Redis)?;
        // Keep the token list from growing while no worker is listening.
        conn.ltrim::<_, ()>(&key, 0, 63)
            .await
            .map_err(NotifyError::Redis)?;
        Ok(())
    }

    async fn wait(&self, queue_name: &str, timeout: Duration) -> Result<bool, NotifyError> {
        // BRPOP parks the connection, so it gets its own.
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(NotifyError::Redis)?;
        let secs = timeout.as_secs_f64().max(0.01);
        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(Self::ready_key(queue_name))
            .arg(secs)
            .query_async(&mut conn)
            .await
            .map_err(NotifyError::Redis)?;
        Ok(popped.is_some())
    }

    async fn health_check(&self) -> Result<(), NotifyError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(NotifyError::Redis)?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(NotifyError::Redis)?;
        Ok(())
    }
}

/// In-process notifier. Wakes only workers running in the same process;
/// workers elsewhere fall back to the poll interval.
#[derive(Default)]
pub struct LocalNotifier {
    notify: Notify,
}

impl LocalNotifier {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobNotifier for LocalNotifier {
    async fn notify(&self, _queue_name: &str) -> Result<(), NotifyError> {
        self.notify.notify_waiters();
        Ok(())
    }

    async fn wait(&self, _queue_name: &str, timeout: Duration) -> Result<bool, NotifyError> {
        Ok(tokio::time::timeout(timeout, self.notify.notified())
            .await
            .is_ok())
    }

    async fn health_check(&self) -> Result<(), NotifyError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}
