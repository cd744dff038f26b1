//! Time-of-day gate.

use chrono::Timelike;
use std::fmt;

/// Minute of the day, 0..=1439.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    pub fn new(hour: u16, minute: u16) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self(hour * 60 + minute))
    }

    /// Parse "HH:MM" (24h clock). Single-digit hours are accepted.
    pub fn parse(s: &str) -> Option<Self> {
        let (h, m) = s.trim().split_once(':')?;
        if h.is_empty() || h.len() > 2 || m.len() != 2 {
            return None;
        }
        Self::new(h.parse().ok()?, m.parse().ok()?)
    }

    pub fn now_local() -> Self {
        let now = chrono::Local::now();
        Self((now.hour() * 60 + now.minute()) as u16)
    }

    pub fn hour(&self) -> u16 {
        self.0 / 60
    }

    pub fn minute(&self) -> u16 {
        self.0 % 60
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

/// Inclusive daily window. A start later than the end spans midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveWindow {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

impl ActiveWindow {
    /// Whole day, 00:00 through 23:59.
    pub const ALWAYS: ActiveWindow = ActiveWindow {
        start: TimeOfDay(0),
        end: TimeOfDay(23 * 60 + 59),
    };

    pub fn parse(start: &str, end: &str) -> Option<Self> {
        Some(Self {
            start: TimeOfDay::parse(start)?,
            end: TimeOfDay::parse(end)?,
        })
    }

    pub fn contains(&self, t: TimeOfDay) -> bool {
        if self.start <= self.end {
            self.start <= t && t <= self.end
        } else {
            t >= self.start || t <= self.end
        }
    }

    pub fn contains_now(&self) -> bool {
        self.contains(TimeOfDay::now_local())
    }
}
