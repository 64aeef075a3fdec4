use stopwatch_core::{elapsed_since, format_elapsed, ServerEvent};

/// Local copy of the timekeeper's state.
///
/// Authoritative events replace every field; an optimistic prediction is
/// only ever provisional and is discarded by the next authoritative event.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ClientMirror {
    running: bool,
    epoch_start: Option<i64>,
    accumulated: i64,
    provisional: bool,
}

impl ClientMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_provisional(&self) -> bool {
        self.provisional
    }

    pub fn epoch_start(&self) -> Option<i64> {
        self.epoch_start
    }

    pub fn accumulated(&self) -> i64 {
        self.accumulated
    }

    /// Applies an authoritative event. Returns `false` for events that carry
    /// no timer state.
    pub fn apply(&mut self, event: ServerEvent) -> bool {
        match event {
            ServerEvent::Start {
                start_time,
                accumulated,
            } => {
                *self = Self {
                    running: true,
                    epoch_start: Some(start_time),
                    accumulated,
                    provisional: false,
                };
            }
            ServerEvent::Stop { stop_time } => {
                *self = Self {
                    running: false,
                    epoch_start: self.epoch_start,
                    accumulated: stop_time,
                    provisional: false,
                };
            }
            ServerEvent::Reset => *self = Self::default(),
            ServerEvent::Pong => return false,
        }
        true
    }

    /// Predicts the outcome of a local start intent. Returns `false` when
    /// the mirror already shows a running timer.
    pub fn predict_start(&mut self, now: i64) -> bool {
        if self.running {
            return false;
        }
        self.running = true;
        self.epoch_start = Some(now - self.accumulated);
        self.provisional = true;
        true
    }

    /// Drops an unconfirmed prediction, returning to the last authoritative
    /// stopped state. Returns `false` if there was nothing to discard.
    pub fn discard_prediction(&mut self) -> bool {
        if !self.provisional {
            return false;
        }
        self.running = false;
        self.provisional = false;
        true
    }

    pub fn elapsed_at(&self, now: i64) -> i64 {
        match (self.running, self.epoch_start) {
            (true, Some(epoch_start)) => elapsed_since(epoch_start, now),
            _ => self.accumulated.max(0),
        }
    }

    /// Text for one render tick.
    pub fn render_at(&self, now: i64) -> String {
        format_elapsed(self.elapsed_at(now))
    }
}
