//! Decay state machine
//!
//! Combines the permanently earned baseline phase with the history's
//! consecutive-miss streak to produce the phase actually shown and a
//! strong/neutral/tired status.
//!
//! Decay is one level deep: any number of misses shows `baseline - 1`
//! (floored at phase 1), and only the status tells one miss apart from many.
//! A single goal-met day restores the baseline immediately.

use crate::history::HistoryStore;
use crate::types::{DayKey, DecayState, DecayStatus, Phase};
use chrono::{DateTime, Utc};
use tracing::debug;

/// Inputs to one decay evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecayInputs {
    pub baseline_phase: Phase,
    pub consecutive_misses: u32,
    pub today_goal_met: bool,
}

/// Outcome of an evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub state: DecayState,
    /// False when neither the displayed phase nor the miss count moved;
    /// callers skip persistence and notifications in that case
    pub changed: bool,
}

/// Displayed phase for a baseline and a miss streak
pub fn displayed_phase_for(baseline: Phase, consecutive_misses: u32) -> Phase {
    if consecutive_misses == 0 {
        baseline
    } else {
        baseline.decayed()
    }
}

/// Stateful decay engine for one user
#[derive(Debug, Clone, Default)]
pub struct DecayEngine {
    state: DecayState,
}

impl DecayEngine {
    /// Engine with the new-user default state
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild an engine from persisted state, re-deriving the displayed
    /// phase and status so a hand-edited state cannot break the decay rule
    pub fn from_state(mut state: DecayState) -> Self {
        state.displayed_phase = displayed_phase_for(state.baseline_phase, state.consecutive_misses);
        state.status = DecayStatus::for_misses(state.consecutive_misses);
        Self { state }
    }

    pub fn state(&self) -> &DecayState {
        &self.state
    }

    pub fn baseline_phase(&self) -> Phase {
        self.state.baseline_phase
    }

    /// Raise the baseline phase. Lower values are ignored; the baseline
    /// never goes down.
    pub fn set_baseline(&mut self, phase: Phase, now: DateTime<Utc>) -> Evaluation {
        if phase <= self.state.baseline_phase {
            return Evaluation {
                state: self.state.clone(),
                changed: false,
            };
        }

        self.state.baseline_phase = phase;
        self.state.displayed_phase = displayed_phase_for(phase, self.state.consecutive_misses);
        self.state.last_updated = Some(now);
        Evaluation {
            state: self.state.clone(),
            changed: true,
        }
    }

    /// Re-run the transition logic against the current history
    pub fn evaluate(&mut self, history: &HistoryStore, today: DayKey, now: DateTime<Utc>) -> Evaluation {
        let inputs = DecayInputs {
            baseline_phase: self.state.baseline_phase,
            consecutive_misses: history.consecutive_misses(today),
            today_goal_met: history.get(today).is_some_and(|r| r.goal_met()),
        };
        self.apply(inputs, today, now)
    }

    /// Apply one set of inputs
    pub fn apply(&mut self, inputs: DecayInputs, today: DayKey, now: DateTime<Utc>) -> Evaluation {
        let misses = if inputs.today_goal_met {
            0
        } else {
            inputs.consecutive_misses
        };
        let displayed = displayed_phase_for(inputs.baseline_phase, misses);

        if inputs.today_goal_met {
            self.state.last_goal_met_date = Some(today);
        }

        let changed = displayed != self.state.displayed_phase
            || misses != self.state.consecutive_misses
            || inputs.baseline_phase != self.state.baseline_phase;

        if changed {
            self.state.baseline_phase = inputs.baseline_phase;
            self.state.displayed_phase = displayed;
            self.state.consecutive_misses = misses;
            self.state.status = DecayStatus::for_misses(misses);
            self.state.last_updated = Some(now);

            debug!(
                day = %today,
                baseline = %inputs.baseline_phase,
                displayed = %displayed,
                misses,
                status = self.state.status.as_str(),
                "Decay state changed"
            );
        }

        Evaluation {
            state: self.state.clone(),
            changed,
        }
    }

    /// Force the displayed phase back to the baseline regardless of history
    pub fn restore_to_strong(&mut self, now: DateTime<Utc>) -> Evaluation {
        let changed = self.state.displayed_phase != self.state.baseline_phase
            || self.state.consecutive_misses != 0;

        if changed {
            self.state.displayed_phase = self.state.baseline_phase;
            self.state.consecutive_misses = 0;
            self.state.status = DecayStatus::Strong;
            self.state.last_updated = Some(now);
        }

        Evaluation {
            state: self.state.clone(),
            changed,
        }
    }

    /// Close out `previous_day` in history and re-evaluate for `today`
    pub fn handle_day_boundary(
        &mut self,
        history: &mut HistoryStore,
        previous_day: DayKey,
        today: DayKey,
        now: DateTime<Utc>,
    ) -> Evaluation {
        history.finalize_day(previous_day);
        self.evaluate(history, today, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    fn day(s: &str) -> DayKey {
        DayKey::parse(s).unwrap()
    }

    fn engine_at(baseline: Phase) -> DecayEngine {
        let mut engine = DecayEngine::new();
        engine.set_baseline(baseline, now());
        engine
    }

    #[test]
    fn test_new_user_defaults() {
        let engine = DecayEngine::new();
        let state = engine.state();
        assert_eq!(state.baseline_phase, Phase::ONE);
        assert_eq!(state.displayed_phase, Phase::ONE);
        assert_eq!(state.consecutive_misses, 0);
        assert_eq!(state.status, DecayStatus::Strong);
        assert!(state.last_goal_met_date.is_none());
    }

    #[test]
    fn test_scenarios_miss_miss_meet() {
        let mut history = HistoryStore::default();
        let mut engine = engine_at(Phase::THREE);

        // Day 1 met, day 2 missed, evaluated once day 3 begins
        history.record_day(day("2024-05-01"), 8_000, 7_500, now());
        history.record_day(day("2024-05-02"), 3_000, 7_500, now());
        let eval = engine.handle_day_boundary(&mut history, day("2024-05-02"), day("2024-05-03"), now());
        assert!(eval.changed);
        assert_eq!(eval.state.consecutive_misses, 1);
        assert_eq!(eval.state.status, DecayStatus::Neutral);
        assert_eq!(eval.state.displayed_phase, Phase::TWO);
        assert!(history.get(day("2024-05-02")).unwrap().is_finalized());

        // Day 3 missed too
        history.record_day(day("2024-05-03"), 1_000, 7_500, now());
        let eval = engine.handle_day_boundary(&mut history, day("2024-05-03"), day("2024-05-04"), now());
        assert_eq!(eval.state.consecutive_misses, 2);
        assert_eq!(eval.state.status, DecayStatus::Tired);
        assert_eq!(eval.state.displayed_phase, Phase::TWO);

        // Day 4 met restores immediately
        history.update_today(day("2024-05-04"), 9_000, now());
        let eval = engine.evaluate(&history, day("2024-05-04"), now());
        assert_eq!(eval.state.consecutive_misses, 0);
        assert_eq!(eval.state.status, DecayStatus::Strong);
        assert_eq!(eval.state.displayed_phase, Phase::THREE);
        assert_eq!(eval.state.last_goal_met_date, Some(day("2024-05-04")));
    }

    #[test]
    fn test_decay_floor_at_phase_one() {
        let mut engine = DecayEngine::new();
        let inputs = DecayInputs {
            baseline_phase: Phase::ONE,
            consecutive_misses: 5,
            today_goal_met: false,
        };
        let eval = engine.apply(inputs, day("2024-05-01"), now());
        assert_eq!(eval.state.displayed_phase, Phase::ONE);
        assert_eq!(eval.state.status, DecayStatus::Tired);
    }

    #[test]
    fn test_decay_invariant_holds() {
        for baseline in 1..=4u8 {
            for misses in 0..=30u32 {
                let phase = Phase::new(baseline).unwrap();
                let mut engine = engine_at(phase);
                let inputs = DecayInputs {
                    baseline_phase: phase,
                    consecutive_misses: misses,
                    today_goal_met: false,
                };
                let state = engine.apply(inputs, day("2024-05-01"), now()).state;
                if misses == 0 {
                    assert_eq!(state.displayed_phase, state.baseline_phase);
                } else {
                    let expected = Phase::new(baseline.saturating_sub(1).max(1)).unwrap();
                    assert_eq!(state.displayed_phase, expected);
                }
                assert!(state.displayed_phase <= state.baseline_phase);
            }
        }
    }

    #[test]
    fn test_restoration_after_long_streak() {
        let mut engine = engine_at(Phase::FOUR);
        let missed = DecayInputs {
            baseline_phase: Phase::FOUR,
            consecutive_misses: 25,
            today_goal_met: false,
        };
        engine.apply(missed, day("2024-05-01"), now());
        assert_eq!(engine.state().displayed_phase, Phase::THREE);

        let met = DecayInputs {
            today_goal_met: true,
            ..missed
        };
        let eval = engine.apply(met, day("2024-05-01"), now());
        assert_eq!(eval.state.displayed_phase, Phase::FOUR);
        assert_eq!(eval.state.consecutive_misses, 0);
    }

    #[test]
    fn test_equality_guard() {
        let mut history = HistoryStore::default();
        history.record_day(day("2024-04-29"), 100, 7_500, now());
        let mut engine = engine_at(Phase::TWO);

        let first = engine.evaluate(&history, day("2024-05-01"), now());
        assert!(first.changed);
        let stamp = first.state.last_updated;

        let later = now() + chrono::Duration::hours(1);
        let second = engine.evaluate(&history, day("2024-05-01"), later);
        assert!(!second.changed);
        assert_eq!(second.state.last_updated, stamp);
    }

    #[test]
    fn test_baseline_never_lowers() {
        let mut engine = engine_at(Phase::THREE);
        let eval = engine.set_baseline(Phase::TWO, now());
        assert!(!eval.changed);
        assert_eq!(engine.baseline_phase(), Phase::THREE);
    }

    #[test]
    fn test_raising_baseline_keeps_decay() {
        let mut engine = engine_at(Phase::TWO);
        let inputs = DecayInputs {
            baseline_phase: Phase::TWO,
            consecutive_misses: 1,
            today_goal_met: false,
        };
        engine.apply(inputs, day("2024-05-01"), now());
        engine.set_baseline(Phase::FOUR, now());
        assert_eq!(engine.state().displayed_phase, Phase::THREE);
        assert_eq!(engine.state().status, DecayStatus::Neutral);
    }

    #[test]
    fn test_restore_to_strong() {
        let mut engine = engine_at(Phase::THREE);
        let inputs = DecayInputs {
            baseline_phase: Phase::THREE,
            consecutive_misses: 3,
            today_goal_met: false,
        };
        engine.apply(inputs, day("2024-05-01"), now());

        let eval = engine.restore_to_strong(now());
        assert!(eval.changed);
        assert_eq!(eval.state.displayed_phase, Phase::THREE);
        assert_eq!(eval.state.consecutive_misses, 0);
        assert_eq!(eval.state.status, DecayStatus::Strong);

        let stamp = engine.state().last_updated;
        let again = engine.restore_to_strong(now() + chrono::Duration::hours(2));
        assert!(!again.changed);
        assert_eq!(again.state.last_updated, stamp);
    }

    #[test]
    fn test_from_state_repairs_invariant() {
        let state = DecayState {
            baseline_phase: Phase::FOUR,
            displayed_phase: Phase::ONE,
            status: DecayStatus::Strong,
            consecutive_misses: 2,
            last_goal_met_date: None,
            last_updated: None,
        };
        let engine = DecayEngine::from_state(state);
        assert_eq!(engine.state().displayed_phase, Phase::THREE);
        assert_eq!(engine.state().status, DecayStatus::Tired);
    }
}
