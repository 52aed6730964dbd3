//! Human-readable age rendering for the admin dashboard feed.

use std::time::Duration;

/// Renders an age as `Nd`, `NdMh`, `Nh`, `NhMm`, `Nm`, or `Ns`, picking the two
/// most significant non-zero units (or falling back to seconds for anything
/// under a minute).
pub fn format_age(age: Duration) -> String {
    let total_secs = age.as_secs();
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3_600;
    let minutes = (total_secs % 3_600) / 60;
    let seconds = total_secs % 60;

    if days > 0 {
        if hours > 0 {
            format!("{}d{}h", days, hours)
        } else {
            format!("{}d", days)
        }
    } else if hours > 0 {
        if minutes > 0 {
            format!("{}h{}m", hours, minutes)
        } else {
            format!("{}h", hours)
        }
    } else if minutes > 0 {
        format!("{}m", minutes)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn renders_each_bracket() {
        assert_eq!(format_age(Duration::from_secs(5)), "5s");
        assert_eq!(format_age(Duration::from_secs(90)), "1m");
        assert_eq!(format_age(Duration::from_secs(3_600 + 90)), "1h1m");
        assert_eq!(format_age(Duration::from_secs(3_600 * 2)), "2h");
        assert_eq!(format_age(Duration::from_secs(86_400 + 3_600 * 3)), "1d3h");
        assert_eq!(format_age(Duration::from_secs(86_400 * 2)), "2d");
    }
}
