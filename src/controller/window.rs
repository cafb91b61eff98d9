use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{NaiveTime, Timelike};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid time of day '{0}', expected HH:MM")]
pub struct TimeParseError(pub String);

/// Wall-clock time of day with minute resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

impl TimeOfDay {
    pub fn new(hour: u8, minute: u8) -> Result<Self, TimeParseError> {
        if hour > 23 || minute > 59 {
            return Err(TimeParseError(format!("{hour:02}:{minute:02}")));
        }
        Ok(TimeOfDay { hour, minute })
    }

    pub fn minute_of_day(&self) -> u16 {
        u16::from(self.hour) * 60 + u16::from(self.minute)
    }
}

impl FromStr for TimeOfDay {
    type Err = TimeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || TimeParseError(s.to_owned());
        let (h, m) = s.split_once(':').ok_or_else(bad)?;
        let hour: u8 = h.parse().map_err(|_| bad())?;
        let minute: u8 = m.parse().map_err(|_| bad())?;
        TimeOfDay::new(hour, minute).map_err(|_| bad())
    }
}

impl From<NaiveTime> for TimeOfDay {
    fn from(t: NaiveTime) -> Self {
        TimeOfDay {
            hour: t.hour() as u8,
            minute: t.minute() as u8,
        }
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// Daily charge window. `end < start` wraps past midnight; `start == end`
/// is a deliberately empty window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChargeWindow {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

impl ChargeWindow {
    pub fn parse(start: &str, end: &str) -> Result<Self, TimeParseError> {
        Ok(ChargeWindow {
            start: start.parse()?,
            end: end.parse()?,
        })
    }

    pub fn contains(&self, now: TimeOfDay) -> bool {
        match self.end.cmp(&self.start) {
            Ordering::Greater => self.start <= now && now < self.end,
            Ordering::Less => now >= self.start || now < self.end,
            Ordering::Equal => false,
        }
    }

    /// Minutes until the next occurrence of the window end, counting past
    /// midnight where the window wraps. Meaningful while `now` is inside.
    pub fn minutes_until_end(&self, now: TimeOfDay) -> i64 {
        let mut diff = i64::from(self.end.minute_of_day()) - i64::from(now.minute_of_day());
        if diff <= 0 {
            diff += 24 * 60;
        }
        diff
    }
}

impl fmt::Display for ChargeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tod(s: &str) -> TimeOfDay {
        s.parse().unwrap()
    }

    #[test]
    fn parses_and_formats() {
        assert_eq!(tod("09:59"), TimeOfDay::new(9, 59).unwrap());
        assert_eq!(tod("00:00").minute_of_day(), 0);
        assert_eq!(tod("23:59").minute_of_day(), 1439);
        assert_eq!(tod("07:05").to_string(), "07:05");
    }

    #[test]
    fn rejects_bad_times() {
        for s in ["24:00", "00:60", "hello", "9", "a:1", "12:0x", ""] {
            assert_eq!(s.parse::<TimeOfDay>(), Err(TimeParseError(s.to_owned())), "{s}");
        }
    }

    #[test]
    fn same_day_window() {
        let w = ChargeWindow::parse("09:00", "15:00").unwrap();
        assert!(w.contains(tod("09:00")));
        assert!(w.contains(tod("12:00")));
        assert!(w.contains(tod("14:59")));
        assert!(!w.contains(tod("15:00")));
        assert!(!w.contains(tod("08:59")));
        assert!(!w.contains(tod("23:30")));
    }

    #[test]
    fn wrap_around_window() {
        let w = ChargeWindow::parse("23:00", "02:00").unwrap();
        assert!(w.contains(tod("23:30")));
        assert!(w.contains(tod("01:30")));
        assert!(w.contains(tod("23:00")));
        assert!(!w.contains(tod("02:00")));
        assert!(!w.contains(tod("12:00")));
    }

    #[test]
    fn almost_full_day_window() {
        let w = ChargeWindow::parse("00:00", "23:59").unwrap();
        assert!(w.contains(tod("00:00")));
        assert!(w.contains(tod("12:00")));
        assert!(w.contains(tod("23:58")));
        assert!(!w.contains(tod("23:59")));
    }

    #[test]
    fn degenerate_window_is_never_active() {
        let w = ChargeWindow::parse("10:00", "10:00").unwrap();
        assert!(!w.contains(tod("10:00")));
        assert!(!w.contains(tod("09:59")));
        assert!(!w.contains(tod("22:00")));
    }

    #[test]
    fn minutes_until_end_same_day() {
        let w = ChargeWindow::parse("09:00", "15:00").unwrap();
        assert_eq!(w.minutes_until_end(tod("10:00")), 300);
        assert_eq!(w.minutes_until_end(tod("14:59")), 1);
    }

    #[test]
    fn minutes_until_end_across_midnight() {
        let w = ChargeWindow::parse("23:00", "06:00").unwrap();
        assert_eq!(w.minutes_until_end(tod("23:30")), 390);
        assert_eq!(w.minutes_until_end(tod("01:30")), 270);
    }
}
