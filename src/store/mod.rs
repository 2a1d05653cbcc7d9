//! Time-series storage addressed by a directory-like key.
//!
//! A key names one append-only log of `<HHmm> <value>` lines:
//! `day / service / method / role / peer / <role>.<metric>`.

pub mod fs;

pub use fs::FsStore;

use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use chrono::{NaiveDateTime, Timelike};

use crate::error::StoreError;
use crate::monitor::{MetricType, Role};

// ─── Minute of day ───────────────────────────────────────────────

/// Minute bucket within a day, rendered as `HHmm`.
/// Ordering is chronological.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MinuteOfDay(u16);

impl MinuteOfDay {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        (hour < 24 && minute < 60).then(|| Self((hour * 60 + minute) as u16))
    }

    pub fn of(time: &NaiveDateTime) -> Self {
        Self((time.hour() * 60 + time.minute()) as u16)
    }

    pub fn hour(self) -> u32 {
        u32::from(self.0) / 60
    }

    pub fn minute(self) -> u32 {
        u32::from(self.0) % 60
    }
}

impl fmt::Display for MinuteOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}{:02}", self.hour(), self.minute())
    }
}

impl FromStr for MinuteOfDay {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 4 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(());
        }
        let hour = s[..2].parse().map_err(|_| ())?;
        let minute = s[2..].parse().map_err(|_| ())?;
        Self::new(hour, minute).ok_or(())
    }
}

// ─── Store key / line ────────────────────────────────────────────

/// Address of one counter log.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreKey {
    /// `yyyyMMdd`
    pub day: String,
    pub service: String,
    pub method: String,
    pub role: Role,
    /// Counterpart host, port already stripped
    pub peer: String,
    pub metric: MetricType,
}

impl StoreKey {
    /// Directory-style segments, leaf file name last.
    pub fn segments(&self) -> [String; 6] {
        [
            self.day.clone(),
            self.service.clone(),
            self.method.clone(),
            self.role.as_str().to_string(),
            self.peer.clone(),
            self.file_name(),
        ]
    }

    pub fn file_name(&self) -> String {
        format!("{}.{}", self.role.as_str(), self.metric.key())
    }
}

/// One persisted sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLine {
    pub minute: MinuteOfDay,
    pub value: i64,
}

impl StoreLine {
    /// Parses one line without its terminator. `None` for anything malformed.
    pub fn parse(line: &str) -> Option<Self> {
        let (minute, value) = line.trim().split_once(' ')?;
        Some(Self {
            minute: minute.trim().parse().ok()?,
            value: value.trim().parse().ok()?,
        })
    }
}

impl fmt::Display for StoreLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.minute, self.value)
    }
}

// ─── Store contract ──────────────────────────────────────────────

/// Append-only counter storage.
///
/// Exactly one writer appends; readers may run concurrently and must
/// see every complete line written before their read started.
pub trait Store: Send + Sync {
    /// Appends `line` to the log for `key`, creating it on first use.
    /// The line is durable in the backing medium when this returns.
    fn append(&self, key: &StoreKey, line: StoreLine) -> Result<(), StoreError>;

    /// Every complete, well-formed line of the log in append order.
    /// A log that does not exist reads as empty.
    fn read(&self, key: &StoreKey) -> Result<Vec<StoreLine>, StoreError>;

    /// Names directly below `prefix`, sorted. A missing prefix lists as empty.
    fn children(&self, prefix: &[&str]) -> Result<Vec<String>, StoreError>;

    /// Last append time of the log, `None` when it does not exist.
    fn modified(&self, key: &StoreKey) -> Option<SystemTime>;
}
