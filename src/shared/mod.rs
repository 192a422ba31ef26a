//! Small helpers shared by the tasks

use std::time::Duration;

/// Two most significant units, e.g. "1h 2m", "2m 5s" or "42s"; rounds up
/// to whole seconds
pub fn format_remaining(remaining: Duration) -> String {
    let total = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
    let units = [(total / 3600, "h"), (total / 60 % 60, "m"), (total % 60, "s")];

    let shown: Vec<String> = units
        .iter()
        .skip_while(|(n, _)| *n == 0)
        .take(2)
        .filter(|(n, _)| *n > 0)
        .map(|(n, unit)| format!("{}{}", n, unit))
        .collect();

    if shown.is_empty() {
        "0s".to_string()
    } else {
        shown.join(" ")
    }
}

/// Wall-clock time in milliseconds since the Unix epoch
pub fn unix_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_remaining() {
        let secs = Duration::from_secs;
        assert_eq!(format_remaining(secs(0)), "0s");
        assert_eq!(format_remaining(secs(42)), "42s");
        assert_eq!(format_remaining(secs(120)), "2m");
        assert_eq!(format_remaining(secs(125)), "2m 5s");
        assert_eq!(format_remaining(secs(3600)), "1h");
        assert_eq!(format_remaining(secs(3720)), "1h 2m");
        assert_eq!(format_remaining(secs(3725)), "1h 2m");
    }

    #[test]
    fn test_format_remaining_rounds_up() {
        assert_eq!(format_remaining(Duration::from_millis(59_001)), "1m");
        assert_eq!(format_remaining(Duration::from_millis(4_200)), "5s");
    }
}
