//! Poll scheduling.
//!
//! A source is due when the calendar bucket of its last successful update
//! differs from the bucket of "now", both taken in the scheduler's time
//! zone (local time in production).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Local, TimeZone, Utc};
use thiserror::Error;

/// How often a source should be polled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PollInterval {
    /// Every run
    #[default]
    None,
    Daily,
    Weekly,
    Biweekly,
    Monthly,
    Bimonthly,
    Quarterly,
}

/// Unrecognized poll interval name
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown poll interval '{0}' (expected none, daily, weekly, biweekly, monthly, bimonthly or quarterly)")]
pub struct UnknownInterval(pub String);

impl FromStr for PollInterval {
    type Err = UnknownInterval;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Self::None),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "biweekly" => Ok(Self::Biweekly),
            "monthly" => Ok(Self::Monthly),
            "bimonthly" => Ok(Self::Bimonthly),
            "quarterly" => Ok(Self::Quarterly),
            _ => Err(UnknownInterval(s.to_string())),
        }
    }
}

impl fmt::Display for PollInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Biweekly => "biweekly",
            Self::Monthly => "monthly",
            Self::Bimonthly => "bimonthly",
            Self::Quarterly => "quarterly",
        };
        f.pad(name)
    }
}

impl PollInterval {
    /// Calendar bucket of `at` for this interval
    fn bucket<Tz: TimeZone>(self, at: &DateTime<Tz>) -> Option<u32> {
        match self {
            Self::None => None,
            Self::Daily => Some(at.ordinal()),
            Self::Weekly => Some(at.iso_week().week()),
            Self::Biweekly => Some(at.iso_week().week() / 2),
            Self::Monthly => Some(at.month()),
            Self::Bimonthly => Some(at.month() / 2),
            Self::Quarterly => Some(at.month() / 3),
        }
    }
}

/// Decides whether a source is due for a poll
#[derive(Debug, Clone)]
pub struct PollScheduler<Tz: TimeZone = Local> {
    tz: Tz,
}

impl PollScheduler<Local> {
    /// Scheduler working in the machine's local time
    pub fn local() -> Self {
        Self { tz: Local }
    }
}

impl Default for PollScheduler<Local> {
    fn default() -> Self {
        Self::local()
    }
}

impl<Tz: TimeZone> PollScheduler<Tz> {
    /// Scheduler working in an explicit time zone
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    /// Whether a source last updated at `last_updated` is due at `now`.
    ///
    /// Always due when the source never completed, or when its interval is
    /// [`PollInterval::None`].
    pub fn is_due(
        &self,
        interval: PollInterval,
        last_updated: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(last) = last_updated else {
            return true;
        };

        let last = last.with_timezone(&self.tz);
        let now = now.with_timezone(&self.tz);
        match (interval.bucket(&last), interval.bucket(&now)) {
            (Some(then), Some(current)) => then != current,
            _ => true,
        }
    }
}
