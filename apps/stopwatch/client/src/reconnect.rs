use std::time::Duration;

/// Connection lifecycle of a sync client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting out the backoff delay before the next attempt.
    Disconnected,
    Connecting,
    Open,
    /// Retry budget exhausted; no further attempts will be made.
    PermanentlyFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Fixed-delay reconnect policy with a bounded number of consecutive
/// failures. A successful open clears the failure count.
#[derive(Debug, Clone)]
pub struct Reconnector {
    backoff: Duration,
    max_retries: u32,
    failures: u32,
    state: ConnectionState,
}

impl Reconnector {
    pub fn new(backoff: Duration, max_retries: u32) -> Self {
        Self {
            backoff,
            max_retries,
            failures: 0,
            state: ConnectionState::Connecting,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn connecting(&mut self) {
        if self.state != ConnectionState::PermanentlyFailed {
            self.state = ConnectionState::Connecting;
        }
    }

    pub fn opened(&mut self) {
        self.failures = 0;
        self.state = ConnectionState::Open;
    }

    /// Records a failed attempt or a lost connection.
    pub fn failed(&mut self) -> ReconnectDecision {
        if self.state == ConnectionState::PermanentlyFailed {
            return ReconnectDecision::GiveUp;
        }
        self.failures += 1;
        if self.failures > self.max_retries {
            self.state = ConnectionState::PermanentlyFailed;
            ReconnectDecision::GiveUp
        } else {
            self.state = ConnectionState::Disconnected;
            ReconnectDecision::RetryAfter(self.backoff)
        }
    }
}
