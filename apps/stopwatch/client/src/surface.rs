use crate::reconnect::ConnectionState;

/// Where the sync client draws the stopwatch.
pub trait RenderSurface: Send + 'static {
    /// Replaces the displayed text with a formatted `HH:MM:SS.CC` string.
    fn render(&mut self, text: &str);

    fn connection_changed(&mut self, _state: ConnectionState) {}
}
