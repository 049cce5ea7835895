//! Follow-up interval grammar: an integer count followed by a single unit
//! letter — `30s`, `15m`, `2h`, `1d`, `2w`.

use chrono::Duration;

use crate::error::{MachineError, Result};

/// Parse an interval string into a `chrono::Duration`.
///
/// Grammar: `^\d+[smhdw]$`. Anything else is an error, including empty
/// strings, missing units, and unknown unit letters.
pub fn parse_interval(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.len() < 2 {
        return Err(MachineError::InvalidInterval(s.to_string()));
    }

    let (digits, unit) = s.split_at(s.len() - 1);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(MachineError::InvalidInterval(s.to_string()));
    }
    let n: i64 = digits
        .parse()
        .map_err(|_| MachineError::InvalidInterval(s.to_string()))?;

    match unit {
        "s" => Ok(Duration::seconds(n)),
        "m" => Ok(Duration::minutes(n)),
        "h" => Ok(Duration::hours(n)),
        "d" => Ok(Duration::days(n)),
        "w" => Ok(Duration::weeks(n)),
        _ => Err(MachineError::InvalidInterval(s.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_minutes_hours() {
        assert_eq!(parse_interval("30s").unwrap().num_seconds(), 30);
        assert_eq!(parse_interval("15m").unwrap().num_seconds(), 900);
        assert_eq!(parse_interval("2h").unwrap().num_seconds(), 7200);
    }

    #[test]
    fn days_and_weeks() {
        assert_eq!(parse_interval("1d").unwrap().num_seconds(), 86_400);
        assert_eq!(parse_interval("2w").unwrap().num_seconds(), 1_209_600);
    }

    #[test]
    fn rejects_bad_units() {
        assert!(parse_interval("5x").is_err());
        assert!(parse_interval("5").is_err());
        assert!(parse_interval("h").is_err());
        assert!(parse_interval("").is_err());
        assert!(parse_interval("1.5h").is_err());
        assert!(parse_interval("-2h").is_err());
    }

    #[test]
    fn tolerates_surrounding_whitespace() {
        assert_eq!(parse_interval(" 45m ").unwrap().num_minutes(), 45);
    }
}
