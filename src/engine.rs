//! Engine orchestration
//!
//! This module provides the public, stateful API of Stride Evolve. One
//! [`EvolutionProcessor`] is built per user session and passed to whichever
//! layer needs it; it wires the history ledger, the phase calculator and the
//! decay engine together and notifies subscribers of every visible change.
//!
//! Update flow:
//! 1. Day-boundary check against the clock
//! 2. HistoryStore - upsert the day's authoritative total
//! 3. Milestones - cumulative steps grow by the positive delta of the write
//! 4. Phase - rolling weekly total, baseline raised to `max(previous, earned)`
//! 5. DecayEngine - re-evaluate displayed phase and status

use crate::clock::Clock;
use crate::config::EvolutionConfig;
use crate::decay::{DecayEngine, Evaluation};
use crate::error::{EvolveError, Result};
use crate::events::{EventBus, EvolutionEvent, SubscriptionId};
use crate::history::{DayChange, HistoryStore};
use crate::phase;
use crate::types::{DailyRecord, DayKey, DayView, DecayState, Phase};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Version stamped into saved state
pub const STATE_VERSION: u32 = 1;

/// Clamp a raw step count from the host to the stored range.
///
/// Negative totals are treated as zero rather than rejected.
pub fn sanitize_steps(steps: i64) -> u32 {
    if steps < 0 {
        warn!(steps, "Negative step count clamped to zero");
        0
    } else {
        u32::try_from(steps).unwrap_or(u32::MAX)
    }
}

fn validate_goal(goal: i64) -> Result<u32> {
    if goal <= 0 {
        return Err(EvolveError::InvalidGoal(goal));
    }
    Ok(u32::try_from(goal).unwrap_or(u32::MAX))
}

/// Everything the persistence collaborator needs to store and reload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionSnapshot {
    pub version: u32,
    pub history: HistoryStore,
    pub decay: DecayState,
    /// Permanently earned phase, kept alongside the decay state
    pub baseline_phase: Phase,
    #[serde(default)]
    pub lifetime_steps: u64,
    #[serde(default)]
    pub current_day: Option<DayKey>,
}

/// Result of one write through the processor
#[derive(Debug, Clone, Serialize)]
pub struct Update {
    /// Records as stored after the write
    pub records: Vec<DailyRecord>,
    pub decay: DecayState,
    /// Whether displayed phase, misses or baseline moved
    pub decay_changed: bool,
    /// New baseline phase, if it went up
    pub phase_advanced: Option<Phase>,
    /// Milestones passed by this write, one per written day at most
    pub milestones: Vec<u64>,
}

/// Snapshot of everything a progress screen shows
#[derive(Debug, Clone, Serialize)]
pub struct EvolutionStatus {
    pub today: DayKey,
    pub decay: DecayState,
    /// Displayed phase after the free-tier cap
    pub accessible_phase: Phase,
    pub premium: bool,
    pub weekly_total: u64,
    pub weekly_progress: f64,
    pub steps_remaining: Option<u32>,
    pub is_maxed: bool,
    pub lifetime_steps: u64,
    pub current_streak: u32,
    pub best_streak: u32,
    pub last_7_days: Vec<DayView>,
}

/// Stateful engine for one user session
pub struct EvolutionProcessor {
    config: EvolutionConfig,
    clock: Box<dyn Clock>,
    history: HistoryStore,
    decay: DecayEngine,
    lifetime_steps: u64,
    current_day: Option<DayKey>,
    events: EventBus,
}

impl std::fmt::Debug for EvolutionProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvolutionProcessor")
            .field("config", &self.config)
            .field("history", &self.history)
            .field("decay", &self.decay)
            .field("lifetime_steps", &self.lifetime_steps)
            .field("current_day", &self.current_day)
            .field("events", &self.events)
            .finish()
    }
}

impl Default for EvolutionProcessor {
    fn default() -> Self {
        let config = EvolutionConfig::default();
        let clock = config.clock();
        Self::build(config, clock)
    }
}

impl EvolutionProcessor {
    /// Create a processor using the wall clock described by `config`
    pub fn new(config: EvolutionConfig) -> Result<Self> {
        config.validate()?;
        let clock = config.clock();
        Ok(Self::build(config, clock))
    }

    /// Create a processor with an explicit clock
    pub fn with_clock<C>(config: EvolutionConfig, clock: C) -> Result<Self>
    where
        C: Clock + 'static,
    {
        config.validate()?;
        Ok(Self::build(config, Box::new(clock)))
    }

    fn build(config: EvolutionConfig, clock: Box<dyn Clock>) -> Self {
        Self {
            history: HistoryStore::new(config.daily_goal),
            decay: DecayEngine::new(),
            lifetime_steps: 0,
            current_day: None,
            events: EventBus::new(),
            config,
            clock,
        }
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Record today's authoritative total-so-far
    pub fn update_today(&mut self, steps: i64) -> Update {
        let steps = sanitize_steps(steps);
        self.tick();

        let today = self.clock.today();
        let now = self.clock.now();
        let changes = self.history.update_today(today, steps, now).into_iter().collect();
        self.after_writes(changes, today, now)
    }

    /// Backfill one specific day. `goal` defaults to the day's stored goal,
    /// or the configured daily goal. A day older than the retention window
    /// is dropped and the update carries no records.
    pub fn record_day(&mut self, date: NaiveDate, steps: i64, goal: Option<i64>) -> Result<Update> {
        let steps = sanitize_steps(steps);
        self.tick();

        let today = self.clock.today();
        let day = DayKey::new(date);
        if day > today {
            return Err(EvolveError::FutureDay(day.to_string()));
        }
        let goal = match goal {
            Some(goal) => validate_goal(goal)?,
            None => self.history.goal_for(day),
        };

        let now = self.clock.now();
        let changes = self.history.record_day(day, steps, goal, now).into_iter().collect();
        Ok(self.after_writes(changes, today, now))
    }

    /// Apply a `{date -> steps}` map from the step source, typically the
    /// last 7 days after the app resumes
    pub fn backfill(&mut self, entries: &BTreeMap<NaiveDate, i64>) -> Update {
        self.tick();

        let today = self.clock.today();
        let now = self.clock.now();
        let entries: BTreeMap<DayKey, u32> = entries
            .iter()
            .map(|(&date, &steps)| (DayKey::new(date), sanitize_steps(steps)))
            .collect();

        let changes = self.history.backfill(&entries, today, now);
        debug!(days = changes.len(), "Backfilled history");
        self.after_writes(changes, today, now)
    }

    /// Change the daily goal for today and future days
    pub fn set_daily_goal(&mut self, goal: i64) -> Result<Update> {
        let goal = validate_goal(goal)?;
        self.tick();

        let today = self.clock.today();
        let now = self.clock.now();
        self.config.daily_goal = goal;
        self.history.set_default_goal(goal);

        let mut changes = Vec::new();
        if self.history.set_goal_for_day(today, goal, now) {
            if let Some(record) = self.history.get(today) {
                changes.push(DayChange {
                    day: today,
                    previous_steps: Some(record.steps()),
                    record: record.clone(),
                });
            }
        }
        Ok(self.after_writes(changes, today, now))
    }

    /// Detect a wall-clock date change and handle it. Returns the evaluation
    /// when a boundary was crossed.
    pub fn tick(&mut self) -> Option<Evaluation> {
        let today = self.clock.today();
        match self.current_day {
            None => {
                self.current_day = Some(today);
                None
            }
            Some(day) if day != today => Some(self.handle_day_boundary()),
            Some(_) => None,
        }
    }

    /// Close out the previous day and re-evaluate decay for the new one.
    /// Safe to call redundantly.
    pub fn handle_day_boundary(&mut self) -> Evaluation {
        let today = self.clock.today();
        let now = self.clock.now();
        let previous = self.current_day.replace(today);

        let mut eval = match previous {
            Some(previous) if previous < today => {
                info!(previous = %previous, today = %today, "Day boundary crossed");
                self.events
                    .publish(&EvolutionEvent::DayBoundary { previous, today });
                self.decay
                    .handle_day_boundary(&mut self.history, previous, today, now)
            }
            _ => self.decay.evaluate(&self.history, today, now),
        };

        if self.refresh_phase(today, now).is_some() {
            eval = self.decay.evaluate(&self.history, today, now);
            eval.changed = true;
        }
        if eval.changed {
            self.publish_decay(&eval.state);
        }
        eval
    }

    /// Re-run decay against current history without writing anything
    pub fn evaluate(&mut self) -> Evaluation {
        let today = self.clock.today();
        let now = self.clock.now();
        let eval = self.decay.evaluate(&self.history, today, now);
        if eval.changed {
            self.publish_decay(&eval.state);
        }
        eval
    }

    /// Force the displayed phase back to the baseline (manual reset,
    /// purchase-driven unlock)
    pub fn restore_to_strong(&mut self) -> Evaluation {
        let now = self.clock.now();
        let eval = self.decay.restore_to_strong(now);
        if eval.changed {
            self.publish_decay(&eval.state);
        }
        eval
    }

    /// Drop all history, the baseline phase and cumulative steps
    pub fn reset(&mut self) {
        let now = self.clock.now();
        self.history.reset(now);
        self.decay = DecayEngine::new();
        self.lifetime_steps = 0;
        self.current_day = Some(self.clock.today());
        info!("Evolution state reset");
        let state = self.decay.state().clone();
        self.publish_decay(&state);
    }

    pub fn set_premium(&mut self, premium: bool) {
        self.config.premium = premium;
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    pub fn subscribe<F>(&mut self, listener: F) -> SubscriptionId
    where
        F: FnMut(&EvolutionEvent) + Send + 'static,
    {
        self.events.subscribe(listener)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn config(&self) -> &EvolutionConfig {
        &self.config
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn decay_state(&self) -> &DecayState {
        self.decay.state()
    }

    pub fn baseline_phase(&self) -> Phase {
        self.decay.baseline_phase()
    }

    /// Displayed phase capped at phase 2 for non-premium users
    pub fn accessible_phase(&self) -> Phase {
        phase::accessible_phase(self.decay.state().displayed_phase, self.config.premium)
    }

    pub fn today(&self) -> DayKey {
        self.clock.today()
    }

    pub fn last_7_days(&self) -> Vec<DayView> {
        self.history.last_7_days(self.clock.today())
    }

    pub fn last_n_days(&self, n: usize) -> Vec<DayView> {
        self.history.last_n_days(n, self.clock.today())
    }

    pub fn weekly_total(&self) -> u64 {
        self.history.weekly_total(self.clock.today())
    }

    pub fn weekly_progress_fraction(&self) -> f64 {
        phase::weekly_progress_fraction(self.weekly_total(), self.baseline_phase())
    }

    pub fn steps_remaining_to_next_phase(&self) -> Option<u32> {
        phase::steps_remaining_to_next_phase(self.weekly_total(), self.baseline_phase())
    }

    pub fn is_maxed(&self) -> bool {
        self.baseline_phase().is_max()
    }

    pub fn lifetime_steps(&self) -> u64 {
        self.lifetime_steps
    }

    pub fn status(&self) -> EvolutionStatus {
        let today = self.clock.today();
        let weekly_total = self.history.weekly_total(today);
        let baseline = self.baseline_phase();
        EvolutionStatus {
            today,
            decay: self.decay.state().clone(),
            accessible_phase: self.accessible_phase(),
            premium: self.config.premium,
            weekly_total,
            weekly_progress: phase::weekly_progress_fraction(weekly_total, baseline),
            steps_remaining: phase::steps_remaining_to_next_phase(weekly_total, baseline),
            is_maxed: baseline.is_max(),
            lifetime_steps: self.lifetime_steps,
            current_streak: self.history.current_streak(today),
            best_streak: self.history.best_streak(),
            last_7_days: self.history.last_7_days(today),
        }
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    pub fn snapshot(&self) -> EvolutionSnapshot {
        EvolutionSnapshot {
            version: STATE_VERSION,
            history: self.history.clone(),
            decay: self.decay.state().clone(),
            baseline_phase: self.decay.baseline_phase(),
            lifetime_steps: self.lifetime_steps,
            current_day: self.current_day,
        }
    }

    /// Replace in-memory state with a snapshot. The baseline is the larger of
    /// the two stored copies, so a stale decay state cannot lower it.
    pub fn restore(&mut self, snapshot: EvolutionSnapshot) -> Result<()> {
        if snapshot.version > STATE_VERSION {
            return Err(EvolveError::StateError(format!(
                "state version {} is newer than supported version {}",
                snapshot.version, STATE_VERSION
            )));
        }

        let mut history = snapshot.history;
        history.normalize();
        history.set_default_goal(self.config.daily_goal);

        let mut decay = snapshot.decay;
        decay.baseline_phase = decay.baseline_phase.max(snapshot.baseline_phase);

        self.history = history;
        self.decay = DecayEngine::from_state(decay);
        self.lifetime_steps = snapshot.lifetime_steps;
        self.current_day = snapshot.current_day;

        debug!(
            records = self.history.len(),
            baseline = %self.decay.baseline_phase(),
            "Restored evolution state"
        );
        Ok(())
    }

    /// Load state from JSON
    pub fn load_state(&mut self, json: &str) -> Result<()> {
        let snapshot: EvolutionSnapshot =
            serde_json::from_str(json).map_err(|e| EvolveError::StateError(e.to_string()))?;
        self.restore(snapshot)
    }

    /// Save state to JSON
    pub fn save_state(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.snapshot())?)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn after_writes(&mut self, changes: Vec<DayChange>, today: DayKey, now: DateTime<Utc>) -> Update {
        let mut milestones = Vec::new();
        for change in &changes {
            self.events.publish(&EvolutionEvent::DayUpdated {
                date: change.day,
                steps: change.record.steps(),
                goal: change.record.goal(),
                goal_met: change.record.goal_met(),
            });
            if let Some(milestone) = self.add_steps(change.step_delta()) {
                milestones.push(milestone);
            }
        }

        let phase_advanced = self.refresh_phase(today, now);
        let eval = self.decay.evaluate(&self.history, today, now);
        let decay_changed = eval.changed || phase_advanced.is_some();
        if decay_changed {
            self.publish_decay(&eval.state);
        }

        Update {
            records: changes.into_iter().map(|c| c.record).collect(),
            decay: eval.state,
            decay_changed,
            phase_advanced,
            milestones,
        }
    }

    fn add_steps(&mut self, delta: u32) -> Option<u64> {
        let previous = self.lifetime_steps;
        self.lifetime_steps = previous.saturating_add(delta as u64);

        let milestone = phase::check_milestone_crossed(previous, self.lifetime_steps)?;
        info!(milestone, total = self.lifetime_steps, "Milestone crossed");
        self.events.publish(&EvolutionEvent::MilestoneCrossed {
            milestone,
            total_steps: self.lifetime_steps,
        });
        Some(milestone)
    }

    /// Raise the baseline to the phase earned by the weekly total, if higher
    fn refresh_phase(&mut self, today: DayKey, now: DateTime<Utc>) -> Option<Phase> {
        let earned = phase::phase_for_weekly_total(self.history.weekly_total(today));
        let from = self.decay.baseline_phase();
        if !self.decay.set_baseline(earned, now).changed {
            return None;
        }

        info!(from = %from, to = %earned, "Baseline phase advanced");
        self.events
            .publish(&EvolutionEvent::PhaseAdvanced { from, to: earned });
        Some(earned)
    }

    fn publish_decay(&mut self, state: &DecayState) {
        self.events
            .publish(&EvolutionEvent::DecayChanged { state: state.clone() });
    }
}
