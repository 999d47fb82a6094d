//! Formatting helpers shared by chat adapters.

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn plural(n: u64, unit: &str) -> String {
    if n == 1 {
        format!("{n} {unit}")
    } else {
        format!("{n} {unit}s")
    }
}

/// Human-readable AFK duration: "45 seconds", "3 minutes", "2 hours and 5 minutes".
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        return format!("{seconds} seconds");
    }
    if seconds < 3600 {
        return plural(seconds / 60, "minute");
    }
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    if minutes > 0 {
        format!("{} and {}", plural(hours, "hour"), plural(minutes, "minute"))
    } else {
        plural(hours, "hour")
    }
}

/// Medal prefix for the top three leaderboard positions.
pub fn medal(position: usize) -> &'static str {
    match position {
        1 => "🥇 ",
        2 => "🥈 ",
        3 => "🥉 ",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_read_naturally() {
        for (secs, expected) in [
            (30, "30 seconds"),
            (60, "1 minute"),
            (90, "1 minute"),
            (120, "2 minutes"),
            (3600, "1 hour"),
            (3660, "1 hour and 1 minute"),
            (7320, "2 hours and 2 minutes"),
            (7200, "2 hours"),
        ] {
            assert_eq!(format_duration(secs), expected);
        }
    }

    #[test]
    fn escapes_html() {
        assert_eq!(escape_html("<b>&\"x\"</b>"), "&lt;b&gt;&amp;&quot;x&quot;&lt;/b&gt;");
    }

    #[test]
    fn medals_for_podium_only() {
        assert_eq!(medal(1), "🥇 ");
        assert_eq!(medal(3), "🥉 ");
        assert_eq!(medal(4), "");
    }
}
