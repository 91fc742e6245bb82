//! Step history management
//!
//! This module owns the bounded, day-indexed ledger of daily step records.
//! It answers the temporal queries the rest of the engine needs: the last-N-day
//! memory window, the rolling weekly total, and the consecutive-miss streak.

use crate::types::{DailyRecord, DayKey, DayView, DEFAULT_DAILY_GOAL};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Number of daily records kept in history
pub const RETENTION_DAYS: usize = 30;

/// Length of the rolling window used for phases and the memory UI
pub const WEEK_DAYS: usize = 7;

fn default_goal() -> u32 {
    DEFAULT_DAILY_GOAL
}

/// Result of a single day write
#[derive(Debug, Clone, PartialEq)]
pub struct DayChange {
    pub day: DayKey,
    /// Steps stored for the day before this write, if a record existed
    pub previous_steps: Option<u32>,
    /// Record as stored after the write
    pub record: DailyRecord,
}

impl DayChange {
    /// Steps added by this write; shrinking totals count as zero
    pub fn step_delta(&self) -> u32 {
        self.record
            .steps()
            .saturating_sub(self.previous_steps.unwrap_or(0))
    }
}

/// Rolling store of daily step records, ascending by date and unique by day
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryStore {
    records: Vec<DailyRecord>,
    /// Goal applied to days that have no record yet
    #[serde(default = "default_goal")]
    default_goal: u32,
    #[serde(default)]
    last_updated: Option<DateTime<Utc>>,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_DAILY_GOAL)
    }
}

impl HistoryStore {
    /// Create an empty history with the given default goal
    pub fn new(default_goal: u32) -> Self {
        Self {
            records: Vec::with_capacity(RETENTION_DAYS + 1),
            default_goal: default_goal.max(1),
            last_updated: None,
        }
    }

    /// Insert or overwrite the record for `day`.
    ///
    /// Steps are an authoritative total-so-far, so the last write wins.
    /// Records beyond the retention window are evicted oldest first. Returns
    /// `None` when `day` is older than everything kept and was evicted by this
    /// same write.
    pub fn upsert_day(
        &mut self,
        day: DayKey,
        steps: u32,
        goal: u32,
        now: DateTime<Utc>,
    ) -> Option<DayChange> {
        let previous_steps = match self.position(day) {
            Some(idx) => {
                let record = &mut self.records[idx];
                let previous = record.steps();
                record.set_goal(goal, now);
                record.set_steps(steps, now);
                Some(previous)
            }
            None => {
                self.records.push(DailyRecord::new(day, steps, goal, now));
                None
            }
        };

        self.records.sort_by_key(|r| r.day());
        self.evict();

        let Some(record) = self.get(day).cloned() else {
            debug!(day = %day, "Write fell outside the retention window");
            return None;
        };
        self.last_updated = Some(now);

        debug!(
            day = %day,
            steps,
            goal = record.goal(),
            goal_met = record.goal_met(),
            "Upserted day"
        );

        Some(DayChange {
            day,
            previous_steps,
            record,
        })
    }

    /// Update today's total, keeping today's goal if a record already exists
    pub fn update_today(&mut self, today: DayKey, steps: u32, now: DateTime<Utc>) -> Option<DayChange> {
        let goal = self.goal_for(today);
        self.upsert_day(today, steps, goal, now)
    }

    /// Explicit backfill entry point for a specific date
    pub fn record_day(
        &mut self,
        day: DayKey,
        steps: u32,
        goal: u32,
        now: DateTime<Utc>,
    ) -> Option<DayChange> {
        self.upsert_day(day, steps, goal, now)
    }

    /// Apply a `{day -> steps}` map from the step source.
    ///
    /// Days after `today` are skipped, as are days too old to be kept. Each
    /// day keeps its stored goal if it has one, otherwise the default goal.
    pub fn backfill(
        &mut self,
        entries: &BTreeMap<DayKey, u32>,
        today: DayKey,
        now: DateTime<Utc>,
    ) -> Vec<DayChange> {
        let mut changes = Vec::with_capacity(entries.len());
        for (&day, &steps) in entries {
            if day > today {
                warn!(day = %day, today = %today, "Skipping backfill entry dated in the future");
                continue;
            }
            let goal = self.goal_for(day);
            changes.extend(self.upsert_day(day, steps, goal, now));
        }
        changes
    }

    /// Look up the record for `day`
    pub fn get(&self, day: DayKey) -> Option<&DailyRecord> {
        self.position(day).map(|idx| &self.records[idx])
    }

    /// All stored records, ascending by date
    pub fn records(&self) -> &[DailyRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    pub fn default_goal(&self) -> u32 {
        self.default_goal
    }

    /// Change the goal used for days without a record. Stored records keep
    /// the goal they were written with.
    pub fn set_default_goal(&mut self, goal: u32) {
        self.default_goal = goal.max(1);
    }

    /// Change the goal of an existing record. Returns false if `day` has no record.
    pub fn set_goal_for_day(&mut self, day: DayKey, goal: u32, now: DateTime<Utc>) -> bool {
        match self.position(day) {
            Some(idx) => {
                self.records[idx].set_goal(goal, now);
                self.last_updated = Some(now);
                true
            }
            None => false,
        }
    }

    /// Goal that applies to `day`: the stored one, else the default
    pub fn goal_for(&self, day: DayKey) -> u32 {
        self.get(day).map(|r| r.goal()).unwrap_or(self.default_goal)
    }

    /// Exactly `n` day views ending at `today` (inclusive), oldest first.
    ///
    /// Missing days become placeholders with `has_data = false`, except today,
    /// which always reports `has_data = true`.
    pub fn last_n_days(&self, n: usize, today: DayKey) -> Vec<DayView> {
        let mut views = Vec::with_capacity(n);
        let mut day = today;
        for offset in 0..n {
            let is_today = offset == 0;
            let view = match self.get(day) {
                Some(record) => DayView::from_record(record, is_today),
                None => DayView::placeholder(day, self.default_goal, is_today),
            };
            views.push(view);
            day = day.previous();
        }
        views.reverse();
        views
    }

    /// The 7-day memory window ending today
    pub fn last_7_days(&self, today: DayKey) -> Vec<DayView> {
        self.last_n_days(WEEK_DAYS, today)
    }

    /// Sum of steps over the 7 calendar days ending at `today`
    pub fn weekly_total(&self, today: DayKey) -> u64 {
        self.records
            .iter()
            .filter(|r| {
                let age = r.day().days_until(today);
                (0..WEEK_DAYS as i64).contains(&age)
            })
            .map(|r| r.steps() as u64)
            .sum()
    }

    /// Missed days in a row, walking back from yesterday.
    ///
    /// Today is never counted. A day without a record counts as a miss, but
    /// the walk does not continue past the oldest stored record, so days
    /// before tracking began are not misses. The scan is capped at
    /// [`RETENTION_DAYS`].
    pub fn consecutive_misses(&self, today: DayKey) -> u32 {
        let Some(oldest) = self.records.first().map(|r| r.day()) else {
            return 0;
        };

        let mut misses = 0;
        let mut day = today.previous();
        for _ in 0..RETENTION_DAYS {
            if day < oldest {
                break;
            }
            match self.get(day) {
                Some(record) if record.goal_met() => break,
                _ => misses += 1,
            }
            day = day.previous();
        }
        misses
    }

    /// Met-goal days in a row ending today, or ending yesterday if today is
    /// not met yet
    pub fn current_streak(&self, today: DayKey) -> u32 {
        let start = match self.get(today) {
            Some(record) if record.goal_met() => today,
            _ => today.previous(),
        };

        let mut streak = 0;
        let mut day = start;
        while let Some(record) = self.get(day) {
            if !record.goal_met() {
                break;
            }
            streak += 1;
            day = day.previous();
        }
        streak
    }

    /// Longest run of consecutive met-goal days within stored history
    pub fn best_streak(&self) -> u32 {
        let mut best = 0;
        let mut run = 0;
        let mut prev: Option<DayKey> = None;

        for record in &self.records {
            if !record.goal_met() {
                run = 0;
            } else if prev.is_some_and(|p| p.days_until(record.day()) == 1) && run > 0 {
                run += 1;
            } else {
                run = 1;
            }
            best = best.max(run);
            prev = Some(record.day());
        }
        best
    }

    /// Mark a past day as finalized. Returns false if it has no record.
    pub fn finalize_day(&mut self, day: DayKey) -> bool {
        match self.position(day) {
            Some(idx) => {
                self.records[idx].finalize();
                true
            }
            None => false,
        }
    }

    /// Drop every record
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.records.clear();
        self.last_updated = Some(now);
    }

    /// Load a history from JSON, repairing ordering, duplicates and
    /// derived flags
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let mut store: Self = serde_json::from_str(json)?;
        store.normalize();
        Ok(store)
    }

    /// Serialize the history to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub(crate) fn normalize(&mut self) {
        self.default_goal = self.default_goal.max(1);
        for record in &mut self.records {
            record.recompute();
        }
        // Stable sort keeps file order within a day, so the later entry wins
        self.records.sort_by_key(|r| r.day());
        let mut deduped: Vec<DailyRecord> = Vec::with_capacity(self.records.len());
        for record in self.records.drain(..) {
            match deduped.last_mut() {
                Some(last) if last.day() == record.day() => *last = record,
                _ => deduped.push(record),
            }
        }
        self.records = deduped;
        self.evict();
    }

    fn position(&self, day: DayKey) -> Option<usize> {
        self.records.iter().position(|r| r.day() == day)
    }

    fn evict(&mut self) {
        if self.records.len() > RETENTION_DAYS {
            let excess = self.records.len() - RETENTION_DAYS;
            self.records.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 31, 18, 0, 0).unwrap()
    }

    fn day(s: &str) -> DayKey {
        DayKey::parse(s).unwrap()
    }

    /// Day `n` days before 2024-01-31
    fn ago(n: u32) -> DayKey {
        let mut d = day("2024-01-31");
        for _ in 0..n {
            d = d.previous();
        }
        d
    }

    #[test]
    fn test_upsert_overwrites_and_keeps_order() {
        let mut store = HistoryStore::default();
        store.upsert_day(day("2024-01-03"), 100, 7_500, now());
        store.upsert_day(day("2024-01-01"), 9_000, 7_500, now());
        let change = store.upsert_day(day("2024-01-03"), 8_000, 7_500, now()).unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(change.previous_steps, Some(100));
        assert_eq!(change.step_delta(), 7_900);
        assert!(store.get(day("2024-01-03")).unwrap().goal_met());

        let days: Vec<String> = store.records().iter().map(|r| r.day().to_string()).collect();
        assert_eq!(days, vec!["2024-01-01", "2024-01-03"]);
    }

    #[test]
    fn test_retention_evicts_oldest() {
        let mut store = HistoryStore::default();
        for n in 0..40 {
            store.upsert_day(ago(n), 1_000 + n, 7_500, now());
        }

        assert_eq!(store.len(), RETENTION_DAYS);
        assert_eq!(store.records().first().unwrap().day(), ago(29));
        assert_eq!(store.records().last().unwrap().day(), ago(0));
        assert!(store.get(ago(30)).is_none());
    }

    #[test]
    fn test_backfill_older_than_window_is_dropped() {
        let mut store = HistoryStore::default();
        for n in 0..30 {
            store.upsert_day(ago(n), 5_000, 7_500, now());
        }
        let before = store.last_updated();
        let change = store.record_day(ago(45), 20_000, 7_500, now() + chrono::Duration::hours(1));

        assert!(change.is_none());
        assert_eq!(store.last_updated(), before);
        assert_eq!(store.len(), RETENTION_DAYS);
        assert!(store.get(ago(45)).is_none());
    }

    #[test]
    fn test_update_today_keeps_existing_goal() {
        let mut store = HistoryStore::default();
        store.record_day(ago(0), 1_000, 10_000, now());
        store.update_today(ago(0), 8_000, now());

        let record = store.get(ago(0)).unwrap();
        assert_eq!(record.goal(), 10_000);
        assert!(!record.goal_met());

        store.update_today(ago(1), 8_000, now());
        assert_eq!(store.get(ago(1)).unwrap().goal(), DEFAULT_DAILY_GOAL);
    }

    #[test]
    fn test_last_n_days_shape() {
        let mut store = HistoryStore::default();
        store.record_day(ago(2), 9_000, 7_500, now());

        let views = store.last_7_days(ago(0));
        assert_eq!(views.len(), 7);
        assert_eq!(views[6].date, ago(0));
        assert!(views[6].is_today);
        assert!(views[6].has_data);
        assert_eq!(views[6].steps, 0);
        assert!(!views[6].goal_met);

        assert_eq!(views[4].date, ago(2));
        assert!(views[4].has_data);
        assert!(views[4].goal_met);

        assert!(!views[5].has_data);
        assert!(!views[0].has_data);
        assert_eq!(views[0].date, ago(6));
    }

    #[test]
    fn test_last_n_days_zero_and_large() {
        let store = HistoryStore::default();
        assert!(store.last_n_days(0, ago(0)).is_empty());
        assert_eq!(store.last_n_days(45, ago(0)).len(), 45);
    }

    #[test]
    fn test_consecutive_misses_zero_after_met_yesterday() {
        let mut store = HistoryStore::default();
        store.record_day(ago(1), 8_000, 7_500, now());
        store.record_day(ago(0), 0, 7_500, now());
        assert_eq!(store.consecutive_misses(ago(0)), 0);
    }

    #[test]
    fn test_consecutive_misses_counts_gaps() {
        let mut store = HistoryStore::default();
        store.record_day(ago(5), 8_000, 7_500, now());
        store.record_day(ago(3), 2_000, 7_500, now());
        // ago(4), ago(2), ago(1) have no record and count as misses
        assert_eq!(store.consecutive_misses(ago(0)), 4);
    }

    #[test]
    fn test_consecutive_misses_ignores_today() {
        let mut store = HistoryStore::default();
        store.record_day(ago(2), 8_000, 7_500, now());
        store.record_day(ago(1), 100, 7_500, now());
        store.record_day(ago(0), 100, 7_500, now());
        assert_eq!(store.consecutive_misses(ago(0)), 1);

        store.record_day(ago(0), 10_000, 7_500, now());
        assert_eq!(store.consecutive_misses(ago(0)), 1);
    }

    #[test]
    fn test_consecutive_misses_capped_at_retention() {
        let mut store = HistoryStore::default();
        for n in 1..=30 {
            store.record_day(ago(n), 10, 7_500, now());
        }
        assert_eq!(store.consecutive_misses(ago(0)), RETENTION_DAYS as u32);

        // Long absence: the last record is far in the past
        let later = day("2024-03-15");
        assert_eq!(store.consecutive_misses(later), RETENTION_DAYS as u32);
    }

    #[test]
    fn test_consecutive_misses_empty_history() {
        let store = HistoryStore::default();
        assert_eq!(store.consecutive_misses(ago(0)), 0);

        let mut first_day = HistoryStore::default();
        first_day.update_today(ago(0), 500, now());
        assert_eq!(first_day.consecutive_misses(ago(0)), 0);
    }

    #[test]
    fn test_weekly_total_window() {
        let mut store = HistoryStore::default();
        store.record_day(ago(7), 50_000, 7_500, now());
        store.record_day(ago(6), 10_000, 7_500, now());
        store.record_day(ago(0), 5_000, 7_500, now());
        assert_eq!(store.weekly_total(ago(0)), 15_000);
    }

    #[test]
    fn test_streaks() {
        let mut store = HistoryStore::default();
        for n in [9, 8, 7, 6] {
            store.record_day(ago(n), 9_000, 7_500, now());
        }
        store.record_day(ago(5), 100, 7_500, now());
        for n in [2, 1] {
            store.record_day(ago(n), 9_000, 7_500, now());
        }

        assert_eq!(store.best_streak(), 4);
        assert_eq!(store.current_streak(ago(0)), 2);

        store.record_day(ago(0), 9_000, 7_500, now());
        assert_eq!(store.current_streak(ago(0)), 3);
    }

    #[test]
    fn test_best_streak_breaks_on_gap() {
        let mut store = HistoryStore::default();
        store.record_day(ago(4), 9_000, 7_500, now());
        store.record_day(ago(3), 9_000, 7_500, now());
        store.record_day(ago(1), 9_000, 7_500, now());
        assert_eq!(store.best_streak(), 2);
    }

    #[test]
    fn test_backfill_skips_future_days() {
        let mut store = HistoryStore::default();
        let mut entries = BTreeMap::new();
        entries.insert(ago(2), 8_000);
        entries.insert(ago(1), 3_000);
        entries.insert(day("2024-02-05"), 99_999);

        let changes = store.backfill(&entries, ago(0), now());
        assert_eq!(changes.len(), 2);
        assert!(store.get(day("2024-02-05")).is_none());
        assert_eq!(store.consecutive_misses(ago(0)), 1);
    }

    #[test]
    fn test_goal_changes_do_not_rewrite_history() {
        let mut store = HistoryStore::default();
        store.record_day(ago(1), 8_000, 7_500, now());
        store.set_default_goal(10_000);
        store.update_today(ago(0), 8_000, now());

        assert!(store.get(ago(1)).unwrap().goal_met());
        assert!(!store.get(ago(0)).unwrap().goal_met());
        assert!(!store.set_goal_for_day(ago(3), 5_000, now()));
    }

    #[test]
    fn test_finalize_and_reset() {
        let mut store = HistoryStore::default();
        store.record_day(ago(1), 8_000, 7_500, now());
        assert!(store.finalize_day(ago(1)));
        assert!(!store.finalize_day(ago(2)));
        assert!(store.get(ago(1)).unwrap().is_finalized());

        store.reset(now());
        assert!(store.is_empty());
    }

    #[test]
    fn test_from_json_repairs_records() {
        let json = r#"{
            "records": [
                {"date": "2024-01-30", "steps": 9000, "goal": 7500, "goal_met": false, "updated_at": "2024-01-30T10:00:00Z"},
                {"date": "2024-01-29", "steps": 100, "goal": 7500, "goal_met": true, "updated_at": "2024-01-29T10:00:00Z"},
                {"date": "2024-01-30", "steps": 200, "goal": 7500, "goal_met": false, "updated_at": "2024-01-30T11:00:00Z"}
            ]
        }"#;

        let store = HistoryStore::from_json(json).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.default_goal(), DEFAULT_DAILY_GOAL);
        assert!(!store.get(day("2024-01-29")).unwrap().goal_met());
        assert_eq!(store.get(day("2024-01-30")).unwrap().steps(), 200);
    }

    #[test]
    fn test_serialization() {
        let mut store = HistoryStore::new(8_000);
        store.record_day(ago(1), 8_500, 8_000, now());

        let json = store.to_json().unwrap();
        let loaded = HistoryStore::from_json(&json).unwrap();

        assert_eq!(loaded.records(), store.records());
        assert_eq!(loaded.default_goal(), 8_000);
    }
}
