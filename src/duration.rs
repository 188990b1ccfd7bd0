//! Human-readable durations for command line options.

use std::time::Duration;

/// Unit suffixes, longest first so `ms` is not mistaken for `s`.
const UNITS: [(&str, u64); 4] = [("ms", 1), ("h", 3_600_000), ("m", 60_000), ("s", 1_000)];

/// Parse a duration such as `1s`, `500ms`, `2m` or `1h`.
///
/// A bare number is interpreted as seconds. Zero is rejected since it would
/// make the poll loop spin.
///
/// # Examples
/// ```
/// use inkbird2mqtt::duration::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("1s").unwrap(), Duration::from_secs(1));
/// assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
/// assert_eq!(parse_duration("2").unwrap(), Duration::from_secs(2));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();
    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    let (number, millis_per_unit) = UNITS
        .iter()
        .find_map(|(suffix, millis)| src.strip_suffix(suffix).map(|n| (n, *millis)))
        .unwrap_or((src, 1_000));

    let value: u64 = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration: {src}"))?;

    let millis = value
        .checked_mul(millis_per_unit)
        .ok_or_else(|| format!("duration too large: {src}"))?;
    if millis == 0 {
        return Err("duration must be greater than zero".to_string());
    }

    Ok(Duration::from_millis(millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn test_parse_bare_number_is_seconds() {
        assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));
    }

    #[test]
    fn test_parse_with_whitespace() {
        assert_eq!(parse_duration(" 3s ").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("3 s").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("-1s").is_err());
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("1.5s").is_err());
    }
}
