//! Remaining-time display helpers.

use std::fmt;

const HOUR: u64 = 3_600;
const DAY: u64 = 24 * HOUR;
/// Months are approximated as 30 days.
const MONTH: u64 = 30 * DAY;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    pub months: u64,
    pub days: u64,
}

impl Countdown {
    pub fn from_seconds(seconds: u64) -> Self {
        Self {
            months: seconds / MONTH,
            days: (seconds % MONTH) / DAY,
        }
    }
}

fn plural(n: u64, one: &str, many: &str) -> String {
    format!("{n} {}", if n == 1 { one } else { many })
}

impl fmt::Display for Countdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.months > 0 {
            write!(f, "{}, ", plural(self.months, "Month", "Months"))?;
        }
        f.write_str(&plural(self.days, "Day", "Days"))
    }
}

/// `"D days, H hours"`.
pub fn format_time_remaining(seconds: u64) -> String {
    let days = seconds / DAY;
    let hours = (seconds % DAY) / HOUR;
    format!("{days} days, {hours} hours")
}
