//! Duration strings as they appear in `config` messages.
//!
//! Accepts a sequence of decimal numbers with unit suffixes (`ns`, `us`, `µs`,
//! `ms`, `s`, `m`, `h`), e.g. `"10s"`, `"250ms"`, `"1m30s"`, `"1.5h"`.
//! A lone `"0"` is accepted without a unit.

use std::time::Duration;

use thiserror::Error;

/// Failure to parse a duration string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationError {
    /// The input was empty.
    #[error("empty duration")]
    Empty,
    /// A number was not followed by a unit.
    #[error("missing unit in duration {0:?}")]
    MissingUnit(String),
    /// The unit suffix is not recognised.
    #[error("unknown unit {unit:?} in duration {input:?}")]
    UnknownUnit {
        /// The unrecognised suffix.
        unit: String,
        /// The full input.
        input: String,
    },
    /// The input is not a well-formed duration.
    #[error("invalid duration {0:?}")]
    Invalid(String),
}

fn unit_nanos(unit: &str) -> Option<f64> {
    Some(match unit {
        "ns" => 1.0,
        "us" | "µs" | "μs" => 1e3,
        "ms" => 1e6,
        "s" => 1e9,
        "m" => 60e9,
        "h" => 3600e9,
        _ => return None,
    })
}

/// Parse a duration string such as `"1m30s"`.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(DurationError::Empty);
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total_nanos = 0f64;
    let mut rest = s;
    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let number = &rest[..num_end];
        if number.is_empty() || number == "." {
            return Err(DurationError::Invalid(input.to_owned()));
        }
        let value: f64 = number
            .parse()
            .map_err(|_| DurationError::Invalid(input.to_owned()))?;
        rest = &rest[num_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_end];
        if unit.is_empty() {
            return Err(DurationError::MissingUnit(input.to_owned()));
        }
        let scale = unit_nanos(unit).ok_or_else(|| DurationError::UnknownUnit {
            unit: unit.to_owned(),
            input: input.to_owned(),
        })?;
        total_nanos += value * scale;
        rest = &rest[unit_end..];
    }

    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        return Err(DurationError::Invalid(input.to_owned()));
    }
    Ok(Duration::from_nanos(total_nanos.round() as u64))
}

/// Render a duration in the same notation [`parse_duration`] accepts.
///
/// Sub-second values render as milliseconds (`"250ms"`); larger values as
/// hours, minutes and seconds (`"1m30s"`, `"1.5s"`).
pub fn format_duration(d: Duration) -> String {
    if d.is_zero() {
        return "0s".into();
    }
    if d < Duration::from_secs(1) {
        let micros = d.as_micros();
        return if micros % 1000 == 0 {
            format!("{}ms", micros / 1000)
        } else {
            format!("{micros}µs")
        };
    }

    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let secs = total_secs % 60;
    let millis = d.subsec_millis();

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if hours > 0 || minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    if millis == 0 {
        out.push_str(&format!("{secs}s"));
    } else {
        let frac = format!("{millis:03}");
        out.push_str(&format!("{secs}.{}s", frac.trim_end_matches('0')));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn parses_single_units() {
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("500us").unwrap(), Duration::from_micros(500));
    }

    #[test]
    fn parses_compound_and_fractional() {
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(
            parse_duration("1h2m3s").unwrap(),
            Duration::from_secs(3600 + 120 + 3)
        );
    }

    #[test]
    fn zero_without_unit() {
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn rejects_bad_input() {
        assert_matches!(parse_duration(""), Err(DurationError::Empty));
        assert_matches!(parse_duration("10"), Err(DurationError::MissingUnit(_)));
        assert_matches!(parse_duration("10d"), Err(DurationError::UnknownUnit { .. }));
        assert_matches!(parse_duration("fast"), Err(DurationError::Invalid(_)));
        assert_matches!(parse_duration("-5s"), Err(DurationError::Invalid(_)));
    }

    #[test]
    fn formats_like_config_echo() {
        assert_eq!(format_duration(Duration::from_secs(10)), "10s");
        assert_eq!(format_duration(Duration::from_millis(100)), "100ms");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m30s");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(Duration::from_secs(3600)), "1h0m0s");
        assert_eq!(format_duration(Duration::ZERO), "0s");
    }

    #[test]
    fn formatted_value_parses_back() {
        for d in [
            Duration::from_millis(250),
            Duration::from_secs(42),
            Duration::from_secs(3725),
        ] {
            assert_eq!(parse_duration(&format_duration(d)).unwrap(), d);
        }
    }
}
