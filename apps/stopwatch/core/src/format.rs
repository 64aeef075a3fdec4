/// Renders elapsed milliseconds as `HH:MM:SS.CC`.
///
/// Every component is floor-divided out of the total, so the display only
/// ever truncates. Negative input renders as zero.
pub fn format_elapsed(total_millis: i64) -> String {
    let total = total_millis.max(0);
    let seconds = total / 1_000;
    let hours = seconds / 3_600;
    let minutes = (seconds % 3_600) / 60;
    let secs = seconds % 60;
    let centis = (total % 1_000) / 10;
    format!("{hours:02}:{minutes:02}:{secs:02}.{centis:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero() {
        assert_eq!(format_elapsed(0), "00:00:00.00");
    }

    #[test]
    fn truncates_sub_centisecond_remainder() {
        assert_eq!(format_elapsed(1_999), "00:00:01.99");
        assert_eq!(format_elapsed(9), "00:00:00.00");
    }

    #[test]
    fn splits_hours_minutes_seconds() {
        let millis = ((2 * 3_600 + 5 * 60 + 7) * 1_000) + 430;
        assert_eq!(format_elapsed(millis), "02:05:07.43");
    }

    #[test]
    fn hours_widen_past_two_digits() {
        assert_eq!(format_elapsed(100 * 3_600 * 1_000), "100:00:00.00");
    }

    #[test]
    fn negative_renders_as_zero() {
        assert_eq!(format_elapsed(-250), "00:00:00.00");
    }
}
