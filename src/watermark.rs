//! Time-windowed watermark carried by the secondary code.
//!
//! The expected value is the digit sum of the assertion hash multiplied by
//! the hour, day, month and year of the verification time. Components come
//! from the host's local calendar, so the value rolls over every hour and
//! depends on the host time zone.

use std::fmt::Debug;
use std::sync::Mutex;

use chrono::{Datelike, Local, NaiveDateTime, Timelike};
use md5::{Digest, Md5};

/// Source of local wall-clock time.
pub trait Clock: Send + Sync + Debug {
    fn now_local(&self) -> NaiveDateTime;
}

/// Host clock in the host time zone.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_local(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Clock frozen at a settable instant.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<NaiveDateTime>,
}

impl FixedClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: NaiveDateTime) {
        if let Ok(mut current) = self.now.lock() {
            *current = now;
        }
    }
}

impl Clock for FixedClock {
    fn now_local(&self) -> NaiveDateTime {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Lowercase hex MD5 of the assertion text.
pub fn assertion_hash(assertion: &str) -> String {
    hex::encode(Md5::digest(assertion.as_bytes()))
}

/// Expected watermark for `hash` at local time `now`.
pub fn derive_expected(hash: &str, now: NaiveDateTime) -> i64 {
    let digit_sum: i64 = hash
        .chars()
        .filter_map(|c| c.to_digit(10))
        .map(i64::from)
        .sum();

    digit_sum
        * i64::from(now.hour())
        * i64::from(now.day())
        * i64::from(now.month())
        * i64::from(now.year())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatermarkOutcome {
    MatchConfirmed,
    MismatchDetected,
}

/// Pending secondary-code check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum WatermarkState {
    #[default]
    Idle,
    PrimaryVerified { assertion_hash: String, expected: i64 },
}

impl WatermarkState {
    /// Record a verified primary code, replacing any pending check.
    pub fn arm(&mut self, assertion_hash: String, expected: i64) {
        *self = Self::PrimaryVerified {
            assertion_hash,
            expected,
        };
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::PrimaryVerified { .. })
    }

    pub fn assertion_hash(&self) -> Option<&str> {
        match self {
            Self::PrimaryVerified { assertion_hash, .. } => Some(assertion_hash),
            Self::Idle => None,
        }
    }

    /// Compare `scanned` against the pending value and return to idle.
    /// `scanned` is `None` when the secondary code was not an integer.
    /// Returns `None` when nothing was pending.
    pub fn check(&mut self, scanned: Option<i64>) -> Option<WatermarkOutcome> {
        match std::mem::take(self) {
            Self::Idle => None,
            Self::PrimaryVerified { expected, .. } => Some(if scanned == Some(expected) {
                WatermarkOutcome::MatchConfirmed
            } else {
                WatermarkOutcome::MismatchDetected
            }),
        }
    }
}
