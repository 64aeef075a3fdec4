//! Core primitives shared by the stopwatch timekeeper and its sync clients.
//!
//! This crate keeps dependencies light so that the server, the client library
//! and any local harnesses consume a single source of truth for the wire
//! protocol, the clock abstraction and the elapsed-time arithmetic.

pub mod clock;
pub mod format;
pub mod protocol;

pub use clock::{Clock, ManualClock, SystemClock};
pub use format::format_elapsed;
pub use protocol::{ClientCommand, Decoded, ProtocolError, ServerEvent};

/// Milliseconds elapsed between an accumulated-adjusted epoch start and `now`.
///
/// Clock skew between the local clock and a server-stamped `epoch_start` can
/// make the raw difference negative; the result is clamped to zero.
pub fn elapsed_since(epoch_start: i64, now: i64) -> i64 {
    now.saturating_sub(epoch_start).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_is_plain_difference() {
        assert_eq!(elapsed_since(1_000, 4_250), 3_250);
    }

    #[test]
    fn elapsed_clamps_future_epoch_to_zero() {
        assert_eq!(elapsed_since(5_000, 4_990), 0);
    }
}
