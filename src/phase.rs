//! Phase calculation
//!
//! Pure mapping from a rolling 7-day step total to an evolution phase, plus
//! weekly progress and cumulative milestone helpers. Nothing here holds state;
//! keeping the baseline phase monotonic is the caller's job.

use crate::types::Phase;

/// Weekly total needed to reach phase 2
pub const PHASE_2_THRESHOLD: u32 = 25_000;
/// Weekly total needed to reach phase 3
pub const PHASE_3_THRESHOLD: u32 = 50_000;
/// Weekly total needed to reach phase 4
pub const PHASE_4_THRESHOLD: u32 = 75_000;

/// Highest phase reachable without premium access
pub const FREE_PHASE_CAP: Phase = Phase::TWO;

/// Cumulative step milestones, ascending
pub const MILESTONES: [u64; 16] = [
    1_000, 2_500, 5_000, 7_500, 10_000, 15_000, 20_000, 25_000, 50_000, 75_000, 100_000, 150_000,
    200_000, 250_000, 500_000, 1_000_000,
];

/// Phase earned by a rolling weekly step total
pub fn phase_for_weekly_total(steps: u64) -> Phase {
    if steps >= PHASE_4_THRESHOLD as u64 {
        Phase::FOUR
    } else if steps >= PHASE_3_THRESHOLD as u64 {
        Phase::THREE
    } else if steps >= PHASE_2_THRESHOLD as u64 {
        Phase::TWO
    } else {
        Phase::ONE
    }
}

/// Weekly total needed for the phase after `current`.
///
/// Phase 4 has no next phase and returns the phase-4 threshold again; check
/// [`Phase::is_max`] to show a maxed-out state instead of a progress bar.
pub fn next_phase_threshold(current: Phase) -> u32 {
    match current.value() {
        1 => PHASE_2_THRESHOLD,
        2 => PHASE_3_THRESHOLD,
        _ => PHASE_4_THRESHOLD,
    }
}

/// Progress toward the next phase, in `[0.0, 1.0]`
pub fn weekly_progress_fraction(weekly_steps: u64, current: Phase) -> f64 {
    let threshold = next_phase_threshold(current) as f64;
    (weekly_steps as f64 / threshold).min(1.0)
}

/// Steps still needed for the next phase; `None` once phase 4 is reached
pub fn steps_remaining_to_next_phase(weekly_steps: u64, current: Phase) -> Option<u32> {
    if current.is_max() {
        return None;
    }
    let threshold = next_phase_threshold(current) as u64;
    Some(threshold.saturating_sub(weekly_steps) as u32)
}

/// Smallest milestone `m` with `previous < m <= current`.
///
/// Only one milestone is reported per call even when a jump skips several;
/// use [`milestones_crossed`] to get all of them.
pub fn check_milestone_crossed(previous: u64, current: u64) -> Option<u64> {
    MILESTONES
        .iter()
        .copied()
        .find(|&m| previous < m && m <= current)
}

/// Every milestone `m` with `previous < m <= current`, ascending
pub fn milestones_crossed(previous: u64, current: u64) -> Vec<u64> {
    MILESTONES
        .iter()
        .copied()
        .filter(|&m| previous < m && m <= current)
        .collect()
}

/// Phase the user may actually use; free users are capped at phase 2
pub fn accessible_phase(earned: Phase, premium: bool) -> Phase {
    if premium {
        earned
    } else {
        earned.min(FREE_PHASE_CAP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_thresholds() {
        assert_eq!(phase_for_weekly_total(0), Phase::ONE);
        assert_eq!(phase_for_weekly_total(24_999), Phase::ONE);
        assert_eq!(phase_for_weekly_total(25_000), Phase::TWO);
        assert_eq!(phase_for_weekly_total(49_999), Phase::TWO);
        assert_eq!(phase_for_weekly_total(50_000), Phase::THREE);
        assert_eq!(phase_for_weekly_total(74_999), Phase::THREE);
        assert_eq!(phase_for_weekly_total(75_000), Phase::FOUR);
        assert_eq!(phase_for_weekly_total(1_000_000), Phase::FOUR);
    }

    #[test]
    fn test_next_threshold() {
        assert_eq!(next_phase_threshold(Phase::ONE), 25_000);
        assert_eq!(next_phase_threshold(Phase::TWO), 50_000);
        assert_eq!(next_phase_threshold(Phase::THREE), 75_000);
        assert_eq!(next_phase_threshold(Phase::FOUR), 75_000);
    }

    #[test]
    fn test_weekly_total_scenario() {
        // 30,000 weekly steps: phase 2, 20,000 to go
        let phase = phase_for_weekly_total(30_000);
        assert_eq!(phase, Phase::TWO);
        assert_eq!(steps_remaining_to_next_phase(30_000, phase), Some(20_000));
        assert!((weekly_progress_fraction(30_000, phase) - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_progress_is_clamped() {
        assert_eq!(weekly_progress_fraction(0, Phase::ONE), 0.0);
        assert_eq!(weekly_progress_fraction(90_000, Phase::TWO), 1.0);
        assert_eq!(weekly_progress_fraction(90_000, Phase::FOUR), 1.0);
    }

    #[test]
    fn test_remaining_steps() {
        assert_eq!(steps_remaining_to_next_phase(80_000, Phase::FOUR), None);
        assert_eq!(steps_remaining_to_next_phase(60_000, Phase::TWO), Some(0));
        assert_eq!(steps_remaining_to_next_phase(0, Phase::ONE), Some(25_000));
    }

    #[test]
    fn test_milestone_crossed() {
        assert_eq!(check_milestone_crossed(4_800, 5_200), Some(5_000));
        assert_eq!(check_milestone_crossed(5_000, 5_200), None);
        assert_eq!(check_milestone_crossed(4_999, 5_000), Some(5_000));
        assert_eq!(check_milestone_crossed(2_000_000, 3_000_000), None);
    }

    #[test]
    fn test_milestone_jump_reports_smallest() {
        assert_eq!(check_milestone_crossed(0, 12_000), Some(1_000));
        assert_eq!(
            milestones_crossed(0, 12_000),
            vec![1_000, 2_500, 5_000, 7_500, 10_000]
        );
    }

    #[test]
    fn test_milestone_idempotent() {
        for x in [0, 999, 1_000, 5_000, 75_000, 1_000_000, 2_000_000] {
            assert_eq!(check_milestone_crossed(x, x), None);
        }
        assert_eq!(check_milestone_crossed(6_000, 4_000), None);
    }

    #[test]
    fn test_accessible_phase_gate() {
        assert_eq!(accessible_phase(Phase::FOUR, false), Phase::TWO);
        assert_eq!(accessible_phase(Phase::ONE, false), Phase::ONE);
        assert_eq!(accessible_phase(Phase::FOUR, true), Phase::FOUR);
    }
}
