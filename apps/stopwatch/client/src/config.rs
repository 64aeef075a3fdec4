use std::time::Duration;

use crate::error::ClientError;

/// Tuning knobs for a [`SyncClient`](crate::SyncClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Period of the local render loop while the mirror is running.
    pub render_period: Duration,
    /// Fixed delay before each reconnect attempt.
    pub backoff: Duration,
    /// Consecutive failed reconnect attempts tolerated before giving up.
    pub max_retries: u32,
    pub heartbeat: Option<HeartbeatConfig>,
    /// Flip the mirror to running as soon as the user asks, before the
    /// timekeeper confirms.
    pub optimistic_start: bool,
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    /// How long a ping may go unanswered before the connection is dropped.
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            render_period: Duration::from_millis(10),
            backoff: Duration::from_secs(2),
            max_retries: 5,
            heartbeat: Some(HeartbeatConfig::default()),
            optimistic_start: true,
            queue_capacity: 256,
        }
    }
}

impl ClientConfig {
    pub fn with_render_period(mut self, period: Duration) -> Self {
        self.render_period = period;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: Option<HeartbeatConfig>) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn with_optimistic_start(mut self, enabled: bool) -> Self {
        self.optimistic_start = enabled;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Rejects periods that would make the render or heartbeat timers spin.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.render_period.is_zero() {
            return Err(ClientError::InvalidConfig("render period must be non-zero"));
        }
        if let Some(heartbeat) = self.heartbeat {
            if heartbeat.interval.is_zero() {
                return Err(ClientError::InvalidConfig(
                    "heartbeat interval must be non-zero",
                ));
            }
            if heartbeat.timeout.is_zero() {
                return Err(ClientError::InvalidConfig(
                    "heartbeat timeout must be non-zero",
                ));
            }
        }
        Ok(())
    }
}
