//! Shared utility functions used across multiple modules.

use chrono::{DateTime, TimeDelta, Utc};

/// Normalize optional text by trimming whitespace and removing empties.
///
/// Returns `None` when the input is `None` or the trimmed value is empty.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Timestamp for a mutation that follows `previous`.
///
/// Uses the wall clock, but never returns a value at or before `previous`.
pub fn next_timestamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > previous {
        now
    } else {
        previous + TimeDelta::microseconds(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_option_rejects_empty() {
        assert_eq!(normalize_text_option(None), None);
        assert_eq!(normalize_text_option(Some("   ".to_string())), None);
    }

    #[test]
    fn normalize_text_option_trims_value() {
        assert_eq!(
            normalize_text_option(Some(" Level 3 east wing ".to_string())),
            Some("Level 3 east wing".to_string())
        );
    }

    #[test]
    fn next_timestamp_is_strictly_later() {
        let future = Utc::now() + TimeDelta::seconds(30);
        assert!(next_timestamp(future) > future);

        let past = Utc::now() - TimeDelta::seconds(30);
        assert!(next_timestamp(past) > past);
    }
}
