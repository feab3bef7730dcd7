//! Schedule configuration and trigger evaluation
//!
//! All times are UTC. A daily schedule only fires when a poll lands inside
//! the configured minute; a minute missed entirely waits until the next day.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveTime, Timelike, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Wall-clock time of day at minute resolution (`HH:MM`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleTime(NaiveTime);

impl ScheduleTime {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(ScheduleTime)
    }

    pub fn hour(&self) -> u32 {
        self.0.hour()
    }

    pub fn minute(&self) -> u32 {
        self.0.minute()
    }

    /// Whether `at` falls inside this minute
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        at.hour() == self.hour() && at.minute() == self.minute()
    }
}

fn hhmm_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^([01]\d|2[0-3]):([0-5]\d)$").expect("valid HH:MM regex"))
}

impl FromStr for ScheduleTime {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let caps = hhmm_pattern()
            .captures(s.trim())
            .with_context(|| format!("schedule time '{}' is not HH:MM", s))?;
        let hour: u32 = caps[1].parse()?;
        let minute: u32 = caps[2].parse()?;
        ScheduleTime::new(hour, minute).with_context(|| format!("schedule time '{}' is out of range", s))
    }
}

impl fmt::Display for ScheduleTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl Serialize for ScheduleTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ScheduleTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// When a pipeline is triggered automatically
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum Schedule {
    /// Never triggered by the scheduler
    #[default]
    Disabled,
    /// Once per calendar day at a wall-clock time
    Daily { time: ScheduleTime },
    /// Every `every_secs` seconds since the last trigger
    Interval { every_secs: u64 },
}

impl Schedule {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Schedule::Disabled)
    }

    pub fn mode(&self) -> &'static str {
        match self {
            Schedule::Disabled => "disabled",
            Schedule::Daily { .. } => "daily",
            Schedule::Interval { .. } => "interval",
        }
    }

    /// Decide whether the pipeline should fire at `now`
    pub fn is_due(&self, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match self {
            Schedule::Disabled => false,
            Schedule::Interval { every_secs } => match last_run {
                None => true,
                Some(last) => {
                    let elapsed = now.signed_duration_since(last).num_seconds();
                    elapsed >= 0 && elapsed as u64 >= *every_secs
                }
            },
            Schedule::Daily { time } => {
                if !time.matches(now) {
                    return false;
                }
                match last_run {
                    None => true,
                    Some(last) => last.date_naive() < now.date_naive(),
                }
            }
        }
    }

    /// Split into the persisted columns `(schedule_mode, schedule_time, schedule_interval)`
    pub fn to_parts(&self) -> Result<(&'static str, Option<String>, Option<i64>)> {
        Ok(match self {
            Schedule::Disabled => ("disabled", None, None),
            Schedule::Daily { time } => ("daily", Some(time.to_string()), None),
            Schedule::Interval { every_secs } => {
                let secs = i64::try_from(*every_secs)
                    .with_context(|| format!("interval of {}s is too large to store", every_secs))?;
                ("interval", None, Some(secs))
            }
        })
    }

    /// Rebuild from the persisted columns
    pub fn from_parts(mode: &str, time: Option<&str>, interval: Option<i64>) -> Result<Self> {
        match mode {
            "disabled" => Ok(Schedule::Disabled),
            "daily" => {
                let time = time.context("daily schedule without schedule_time")?;
                Ok(Schedule::Daily { time: time.parse()? })
            }
            "interval" => match interval {
                Some(secs) if secs > 0 => Ok(Schedule::Interval {
                    every_secs: secs as u64,
                }),
                _ => bail!("interval schedule needs a positive schedule_interval"),
            },
            other => bail!("unknown schedule mode '{}'", other),
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Disabled => f.write_str("disabled"),
            Schedule::Daily { time } => write!(f, "daily at {} UTC", time),
            Schedule::Interval { every_secs } => write!(f, "every {}s", every_secs),
        }
    }
}
