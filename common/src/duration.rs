//! Parsing and formatting of the `d`/`h`/`m` lifetime strings used on claims.
//!
//! The wire format is a sum of terms, each a whole number followed by a single
//! unit character (`d`, `h`, or `m`), written in that order, e.g. `2h`, `1d12h`,
//! `30m`. This is deliberately narrower than `humantime`'s duration grammar (no
//! seconds, no fractional values, no unit repeats) because it is the format the
//! orchestrator itself writes back onto claims; round-tripping it exactly matters
//! more than accepting a superset.

use crate::error::Error;
use std::time::Duration;

/// Parses a lifetime string such as `1d12h30m` into a [`Duration`].
///
/// Terms may be omitted but must appear in `d`, `h`, `m` order and each unit may
/// appear at most once. Trailing digits with no unit, or any unrecognised unit,
/// is an error.
pub fn parse_lifetime(input: &str) -> Result<Duration, Error> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::Duration {
            input: input.to_string(),
            reason: "empty duration".to_string(),
        });
    }

    let mut seconds: u64 = 0;
    let mut digits = String::new();
    let mut last_unit_rank = 0u8;

    for ch in trimmed.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }

        let rank = match ch {
            'd' => 1,
            'h' => 2,
            'm' => 3,
            _ => {
                return Err(Error::Duration {
                    input: input.to_string(),
                    reason: format!("unrecognised unit '{}'", ch),
                })
            }
        };
        if digits.is_empty() {
            return Err(Error::Duration {
                input: input.to_string(),
                reason: format!("unit '{}' with no preceding digits", ch),
            });
        }
        if rank <= last_unit_rank {
            return Err(Error::Duration {
                input: input.to_string(),
                reason: "units must appear in d, h, m order, at most once each".to_string(),
            });
        }
        last_unit_rank = rank;

        let value: u64 = digits.parse().map_err(|_| Error::Duration {
            input: input.to_string(),
            reason: format!("'{}' is not a valid whole number", digits),
        })?;
        digits.clear();

        seconds += match rank {
            1 => value * 86_400,
            2 => value * 3_600,
            3 => value * 60,
            _ => unreachable!(),
        };
    }

    if !digits.is_empty() {
        return Err(Error::Duration {
            input: input.to_string(),
            reason: "trailing digits with no unit".to_string(),
        });
    }

    Ok(Duration::from_secs(seconds))
}

/// Formats a [`Duration`] back into the `d`/`h`/`m` wire format.
///
/// Whole-day/hour/minute durations round-trip exactly through
/// [`parse_lifetime`]; any leftover seconds are dropped (the wire format has no
/// seconds term, matching what the orchestrator itself produces).
pub fn format_lifetime(duration: Duration) -> String {
    let mut secs = duration.as_secs();
    let days = secs / 86_400;
    secs %= 86_400;
    let hours = secs / 3_600;
    secs %= 3_600;
    let minutes = secs / 60;

    let mut out = String::new();
    if days > 0 {
        out.push_str(&format!("{}d", days));
    }
    if hours > 0 {
        out.push_str(&format!("{}h", hours));
    }
    if minutes > 0 || out.is_empty() {
        out.push_str(&format!("{}m", minutes));
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_simple_terms() {
        assert_eq!(parse_lifetime("2h").unwrap(), Duration::from_secs(2 * 3600));
        assert_eq!(parse_lifetime("30m").unwrap(), Duration::from_secs(30 * 60));
        assert_eq!(
            parse_lifetime("1d12h").unwrap(),
            Duration::from_secs(86_400 + 12 * 3600)
        );
    }

    #[test]
    fn rejects_trailing_digits_without_unit() {
        assert!(parse_lifetime("2h30").is_err());
    }

    #[test]
    fn rejects_out_of_order_units() {
        assert!(parse_lifetime("1h2d").is_err());
    }

    #[test]
    fn rejects_empty() {
        assert!(parse_lifetime("").is_err());
    }

    #[test]
    fn round_trips_whole_terms() {
        for input in ["2h", "1d12h", "30m", "1d", "5h", "1d2h3m"] {
            let parsed = parse_lifetime(input).unwrap();
            assert_eq!(format_lifetime(parsed), input);
        }
    }
}
