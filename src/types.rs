//! Core types for the Stride Evolve engine
//!
//! This module defines the data structures shared by the history ledger, the
//! phase calculator and the decay engine: day keys, daily records, day views,
//! phases and the decay state.

use crate::error::EvolveError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default daily step goal
pub const DEFAULT_DAILY_GOAL: u32 = 7_500;

/// Canonical day key format
pub const DAY_KEY_FORMAT: &str = "%Y-%m-%d";

/// Calendar day identity, rendered as `YYYY-MM-DD`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DayKey(NaiveDate);

impl DayKey {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    /// Parse a canonical `YYYY-MM-DD` key
    pub fn parse(s: &str) -> Result<Self, EvolveError> {
        let trimmed = s.trim();
        if trimmed.len() != 10 {
            return Err(EvolveError::InvalidDayKey(s.to_string()));
        }
        NaiveDate::parse_from_str(trimmed, DAY_KEY_FORMAT)
            .map(Self)
            .map_err(|_| EvolveError::InvalidDayKey(s.to_string()))
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    /// The calendar day before this one
    pub fn previous(&self) -> Self {
        Self(self.0.pred_opt().unwrap_or(self.0))
    }

    /// The calendar day after this one
    pub fn next(&self) -> Self {
        Self(self.0.succ_opt().unwrap_or(self.0))
    }

    /// Whole days from `self` to `other` (negative when `other` is earlier)
    pub fn days_until(&self, other: DayKey) -> i64 {
        (other.0 - self.0).num_days()
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(DAY_KEY_FORMAT))
    }
}

impl FromStr for DayKey {
    type Err = EvolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DayKey {
    type Error = EvolveError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DayKey> for String {
    fn from(key: DayKey) -> Self {
        key.to_string()
    }
}

impl From<NaiveDate> for DayKey {
    fn from(date: NaiveDate) -> Self {
        Self(date)
    }
}

/// One stored day of step data.
///
/// `goal_met` is derived from `steps` and `goal` and is recomputed on every
/// write, so the fields are only reachable through accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRecord {
    /// Day this record represents
    #[serde(rename = "date")]
    day: DayKey,
    /// Steps recorded for the day (authoritative total-so-far)
    steps: u32,
    /// Goal that applied on this day
    goal: u32,
    /// Whether `steps >= goal`
    goal_met: bool,
    /// Set once a day boundary has passed over this day
    #[serde(default)]
    finalized: bool,
    /// When this record was last written
    updated_at: DateTime<Utc>,
}

impl DailyRecord {
    pub fn new(day: DayKey, steps: u32, goal: u32, now: DateTime<Utc>) -> Self {
        let goal = goal.max(1);
        Self {
            day,
            steps,
            goal,
            goal_met: steps >= goal,
            finalized: false,
            updated_at: now,
        }
    }

    pub fn day(&self) -> DayKey {
        self.day
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }

    pub fn goal(&self) -> u32 {
        self.goal
    }

    pub fn goal_met(&self) -> bool {
        self.goal_met
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Fraction of the goal reached, capped at 1.0
    pub fn progress(&self) -> f64 {
        (self.steps as f64 / self.goal as f64).min(1.0)
    }

    pub(crate) fn set_steps(&mut self, steps: u32, now: DateTime<Utc>) {
        self.steps = steps;
        self.updated_at = now;
        self.recompute();
    }

    pub(crate) fn set_goal(&mut self, goal: u32, now: DateTime<Utc>) {
        self.goal = goal.max(1);
        self.updated_at = now;
        self.recompute();
    }

    pub(crate) fn finalize(&mut self) {
        self.finalized = true;
    }

    /// Re-derive `goal_met`; also repairs records loaded from edited JSON
    pub(crate) fn recompute(&mut self) {
        self.goal = self.goal.max(1);
        self.goal_met = self.steps >= self.goal;
    }
}

/// Read-only view of one day for the memory UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayView {
    pub date: DayKey,
    pub steps: u32,
    pub goal: u32,
    pub goal_met: bool,
    /// False for placeholder days with no stored record (never for today)
    pub has_data: bool,
    pub is_today: bool,
    /// Fraction of the goal reached (0-1)
    pub progress: f64,
}

impl DayView {
    pub(crate) fn from_record(record: &DailyRecord, is_today: bool) -> Self {
        Self {
            date: record.day(),
            steps: record.steps(),
            goal: record.goal(),
            goal_met: record.goal_met(),
            has_data: true,
            is_today,
            progress: record.progress(),
        }
    }

    pub(crate) fn placeholder(date: DayKey, goal: u32, is_today: bool) -> Self {
        Self {
            date,
            steps: 0,
            goal,
            goal_met: false,
            has_data: is_today,
            is_today,
            progress: 0.0,
        }
    }
}

/// Evolution phase (1-4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Phase(u8);

impl Phase {
    pub const ONE: Phase = Phase(1);
    pub const TWO: Phase = Phase(2);
    pub const THREE: Phase = Phase(3);
    pub const FOUR: Phase = Phase(4);

    pub const MIN: Phase = Phase::ONE;
    pub const MAX: Phase = Phase::FOUR;

    pub fn new(value: u8) -> Result<Self, EvolveError> {
        if (1..=4).contains(&value) {
            Ok(Self(value))
        } else {
            Err(EvolveError::InvalidPhase(value))
        }
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    pub fn is_max(&self) -> bool {
        *self == Phase::MAX
    }

    /// One level down, floored at phase 1
    pub fn decayed(&self) -> Phase {
        Phase(self.0.saturating_sub(1).max(1))
    }

    pub fn next(&self) -> Option<Phase> {
        if self.is_max() {
            None
        } else {
            Some(Phase(self.0 + 1))
        }
    }
}

impl Default for Phase {
    fn default() -> Self {
        Phase::ONE
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u8> for Phase {
    type Error = EvolveError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Phase> for u8 {
    fn from(phase: Phase) -> Self {
        phase.0
    }
}

/// Visual decay tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecayStatus {
    #[default]
    Strong,
    Neutral,
    Tired,
}

impl DecayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecayStatus::Strong => "strong",
            DecayStatus::Neutral => "neutral",
            DecayStatus::Tired => "tired",
        }
    }

    /// Status for a streak of missed days before today
    pub fn for_misses(consecutive_misses: u32) -> Self {
        match consecutive_misses {
            0 => DecayStatus::Strong,
            1 => DecayStatus::Neutral,
            _ => DecayStatus::Tired,
        }
    }
}

/// Decay state for one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecayState {
    /// Permanently earned phase
    pub baseline_phase: Phase,
    /// Phase shown after decay (never above baseline)
    pub displayed_phase: Phase,
    pub status: DecayStatus,
    /// Missed days in a row, looking back from yesterday
    pub consecutive_misses: u32,
    pub last_goal_met_date: Option<DayKey>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl Default for DecayState {
    fn default() -> Self {
        Self {
            baseline_phase: Phase::ONE,
            displayed_phase: Phase::ONE,
            status: DecayStatus::Strong,
            consecutive_misses: 0,
            last_goal_met_date: None,
            last_updated: None,
        }
    }
}

impl DecayState {
    /// Whether the displayed phase is below the baseline
    pub fn is_decayed(&self) -> bool {
        self.displayed_phase < self.baseline_phase
    }
}
