//! Phase sequencing.
//!
//! Turns a [`BlockSpec`] into the ordered list of phases a session walks
//! through. The computation is pure: the same spec always yields the same
//! [`Sequence`], so sessions only persist the block id and rebuild the
//! sequence on demand.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    Work,
    ShortBreak,
    LongBreak,
}

impl PhaseKind {
    pub fn label(&self) -> &'static str {
        match self {
            PhaseKind::Work => "Pomodoro",
            PhaseKind::ShortBreak => "Short Break",
            PhaseKind::LongBreak => "Long Break",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseKind::Work => "work",
            PhaseKind::ShortBreak => "short_break",
            PhaseKind::LongBreak => "long_break",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "work" => Some(PhaseKind::Work),
            "short_break" => Some(PhaseKind::ShortBreak),
            "long_break" => Some(PhaseKind::LongBreak),
            _ => None,
        }
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One segment of a block. Produced only by [`compute_sequence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseStep {
    pub kind: PhaseKind,
    pub duration_seconds: u32,
    /// 1-based position in the sequence.
    pub ordinal: u32,
}

/// Upper limit for every duration of a block: one week. Keeps durations in
/// seconds inside `u32` and bounds the number of phases.
pub const MAX_BLOCK_MINUTES: u32 = 7 * 24 * 60;

/// Durations (in minutes) that define a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSpec {
    pub total_minutes: u32,
    pub work_minutes: u32,
    pub short_break_minutes: u32,
    pub long_break_minutes: u32,
}

impl BlockSpec {
    pub fn new(
        total_minutes: u32,
        work_minutes: u32,
        short_break_minutes: u32,
        long_break_minutes: u32,
    ) -> Self {
        Self {
            total_minutes,
            work_minutes,
            short_break_minutes,
            long_break_minutes,
        }
    }

    /// Break lengths may be zero; the total and the work phase may not. No
    /// duration may exceed [`MAX_BLOCK_MINUTES`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.total_minutes < 1 {
            return Err(ValidationError::BelowMinimum {
                field: "total_minutes",
                min: 1,
                value: self.total_minutes,
            });
        }
        if self.work_minutes < 1 {
            return Err(ValidationError::BelowMinimum {
                field: "work_minutes",
                min: 1,
                value: self.work_minutes,
            });
        }
        for (field, value) in [
            ("total_minutes", self.total_minutes),
            ("work_minutes", self.work_minutes),
            ("short_break_minutes", self.short_break_minutes),
            ("long_break_minutes", self.long_break_minutes),
        ] {
            if value > MAX_BLOCK_MINUTES {
                return Err(ValidationError::InvalidValue {
                    field: field.to_string(),
                    message: format!("must be at most {MAX_BLOCK_MINUTES} minutes, got {value}"),
                });
            }
        }
        Ok(())
    }

    /// Number of work phases that fit in the block.
    ///
    /// Never less than one: a total too small for the arithmetic still
    /// gets a single work phase.
    pub fn work_phase_count(&self) -> u32 {
        let cycle = self.work_minutes.saturating_add(self.short_break_minutes);
        let available = self.total_minutes.saturating_sub(self.long_break_minutes);
        if available < self.work_minutes {
            return 1;
        }
        available.checked_div(cycle).unwrap_or(1).max(1)
    }
}

impl Default for BlockSpec {
    fn default() -> Self {
        Self::new(120, 25, 5, 30)
    }
}

/// Ordered phases of a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequence {
    pub total_minutes: u32,
    pub number_of_work_phases: u32,
    pub steps: Vec<PhaseStep>,
}

impl Sequence {
    pub fn total_phases(&self) -> usize {
        self.steps.len()
    }

    pub fn step(&self, index: usize) -> Option<&PhaseStep> {
        self.steps.get(index)
    }

    pub fn first(&self) -> &PhaseStep {
        // compute_sequence always emits at least one work phase.
        &self.steps[0]
    }

    pub fn is_last(&self, index: usize) -> bool {
        index + 1 >= self.steps.len()
    }

    pub fn planned_seconds(&self) -> u64 {
        self.steps.iter().map(|s| s.duration_seconds as u64).sum()
    }

    pub fn planned_minutes(&self) -> u64 {
        self.planned_seconds() / 60
    }
}

fn minutes_to_seconds(minutes: u32) -> u32 {
    minutes.saturating_mul(60)
}

/// Compute the phase sequence for `spec`.
///
/// Work phases are separated by short breaks (none after the last one),
/// followed by a single long break when its length is non-zero.
pub fn compute_sequence(spec: &BlockSpec) -> Sequence {
    let work_phases = spec.work_phase_count();
    let mut steps = Vec::with_capacity(work_phases.min(MAX_BLOCK_MINUTES) as usize * 2 + 1);
    let mut ordinal = 1;

    let mut push = |kind: PhaseKind, minutes: u32| {
        steps.push(PhaseStep {
            kind,
            duration_seconds: minutes_to_seconds(minutes),
            ordinal,
        });
        ordinal += 1;
    };

    for i in 0..work_phases {
        push(PhaseKind::Work, spec.work_minutes);
        if i + 1 < work_phases {
            push(PhaseKind::ShortBreak, spec.short_break_minutes);
        }
    }

    if spec.long_break_minutes > 0 {
        push(PhaseKind::LongBreak, spec.long_break_minutes);
    }

    Sequence {
        total_minutes: spec.total_minutes,
        number_of_work_phases: work_phases,
        steps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn kinds(seq: &Sequence) -> Vec<PhaseKind> {
        seq.steps.iter().map(|s| s.kind).collect()
    }

    #[test]
    fn default_block_has_three_pomodoros() {
        let seq = compute_sequence(&BlockSpec::new(120, 25, 5, 30));
        assert_eq!(seq.number_of_work_phases, 3);
        assert_eq!(
            kinds(&seq),
            vec![
                PhaseKind::Work,
                PhaseKind::ShortBreak,
                PhaseKind::Work,
                PhaseKind::ShortBreak,
                PhaseKind::Work,
                PhaseKind::LongBreak,
            ]
        );
        let seconds: Vec<u32> = seq.steps.iter().map(|s| s.duration_seconds).collect();
        assert_eq!(seconds, vec![1500, 300, 1500, 300, 1500, 1800]);
        let ordinals: Vec<u32> = seq.steps.iter().map(|s| s.ordinal).collect();
        assert_eq!(ordinals, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn too_short_total_still_gets_one_work_phase() {
        let seq = compute_sequence(&BlockSpec::new(10, 25, 5, 0));
        assert_eq!(seq.number_of_work_phases, 1);
        assert_eq!(kinds(&seq), vec![PhaseKind::Work]);
        assert_eq!(seq.steps[0].duration_seconds, 25 * 60);
    }

    #[test]
    fn long_break_longer_than_total_floors_to_one() {
        let spec = BlockSpec::new(20, 25, 5, 45);
        assert_eq!(spec.work_phase_count(), 1);
        let seq = compute_sequence(&spec);
        assert_eq!(kinds(&seq), vec![PhaseKind::Work, PhaseKind::LongBreak]);
    }

    #[test]
    fn available_between_work_and_cycle_floors_to_one() {
        // 28 >= 25 but 28 / 30 == 0.
        let seq = compute_sequence(&BlockSpec::new(28, 25, 5, 0));
        assert_eq!(seq.number_of_work_phases, 1);
        assert!(!seq.steps.is_empty());
    }

    #[test]
    fn zero_short_break_emits_zero_length_step() {
        let seq = compute_sequence(&BlockSpec::new(50, 25, 0, 0));
        assert_eq!(
            kinds(&seq),
            vec![PhaseKind::Work, PhaseKind::ShortBreak, PhaseKind::Work]
        );
        assert_eq!(seq.steps[1].duration_seconds, 0);
    }

    #[test]
    fn zero_long_break_suppresses_trailing_phase() {
        let seq = compute_sequence(&BlockSpec::new(60, 25, 5, 0));
        assert_eq!(seq.steps.last().map(|s| s.kind), Some(PhaseKind::Work));
    }

    #[test]
    fn validate_rejects_zero_work_and_total() {
        assert!(BlockSpec::new(0, 25, 5, 30).validate().is_err());
        assert_eq!(
            BlockSpec::new(60, 0, 5, 30).validate(),
            Err(ValidationError::BelowMinimum {
                field: "work_minutes",
                min: 1,
                value: 0
            })
        );
        assert!(BlockSpec::new(1, 1, 0, 0).validate().is_ok());
    }

    #[test]
    fn validate_rejects_durations_over_a_week() {
        let max = MAX_BLOCK_MINUTES;
        assert!(BlockSpec::new(max, max, max, max).validate().is_ok());
        assert_eq!(
            BlockSpec::new(u32::MAX, 1, 0, 0).validate(),
            Err(ValidationError::InvalidValue {
                field: "total_minutes".to_string(),
                message: format!("must be at most {max} minutes, got {}", u32::MAX),
            })
        );
        let err = BlockSpec::new(80_000_000, 1, 0, 79_999_999).validate().unwrap_err();
        assert!(matches!(err, ValidationError::InvalidValue { ref field, .. } if field == "total_minutes"));
        let err = BlockSpec::new(60, 25, max + 1, 0).validate().unwrap_err();
        assert!(matches!(err, ValidationError::InvalidValue { ref field, .. } if field == "short_break_minutes"));
    }

    #[test]
    fn largest_block_stays_in_range() {
        let spec = BlockSpec::new(MAX_BLOCK_MINUTES, 1, 0, MAX_BLOCK_MINUTES - 1);
        let seq = compute_sequence(&spec);
        assert_eq!(seq.number_of_work_phases, 1);
        assert_eq!(seq.steps[1].duration_seconds, (MAX_BLOCK_MINUTES - 1) * 60);

        let seq = compute_sequence(&BlockSpec::new(MAX_BLOCK_MINUTES, 1, 0, 0));
        assert_eq!(seq.total_phases(), MAX_BLOCK_MINUTES as usize * 2 - 1);
        assert_eq!(seq.planned_minutes(), MAX_BLOCK_MINUTES as u64);
    }

    #[test]
    fn planned_time_and_last_phase() {
        let seq = compute_sequence(&BlockSpec::default());
        assert_eq!(seq.planned_minutes(), 115);
        assert!(seq.is_last(5));
        assert!(!seq.is_last(4));
    }

    fn valid_spec() -> impl Strategy<Value = BlockSpec> {
        (1u32..=480, 1u32..=120, 0u32..=60, 0u32..=90).prop_filter_map(
            "work must fit in total",
            |(total, work, short, long)| {
                (work <= total).then(|| BlockSpec::new(total, work, short, long))
            },
        )
    }

    proptest! {
        #[test]
        fn sequence_is_never_empty(spec in valid_spec()) {
            let seq = compute_sequence(&spec);
            prop_assert!(!seq.steps.is_empty());
            prop_assert_eq!(seq.steps[0].kind, PhaseKind::Work);
        }

        #[test]
        fn short_breaks_only_between_work_phases(spec in valid_spec()) {
            let seq = compute_sequence(&spec);
            prop_assert_ne!(seq.steps.last().map(|s| s.kind), Some(PhaseKind::ShortBreak));
            for pair in seq.steps.windows(2) {
                prop_assert!(
                    !(pair[0].kind == PhaseKind::ShortBreak && pair[1].kind == PhaseKind::ShortBreak)
                );
            }
        }

        #[test]
        fn fits_total_when_no_floor_applied(spec in valid_spec()) {
            let available = spec.total_minutes.saturating_sub(spec.long_break_minutes);
            let cycle = spec.work_minutes + spec.short_break_minutes;
            prop_assume!(available >= cycle);
            let seq = compute_sequence(&spec);
            prop_assert!(seq.planned_minutes() <= spec.total_minutes as u64);
        }

        #[test]
        fn ordinals_are_contiguous(spec in valid_spec()) {
            let seq = compute_sequence(&spec);
            for (i, step) in seq.steps.iter().enumerate() {
                prop_assert_eq!(step.ordinal as usize, i + 1);
            }
            let work = seq.steps.iter().filter(|s| s.kind == PhaseKind::Work).count();
            prop_assert_eq!(work as u32, seq.number_of_work_phases);
        }

        #[test]
        fn deterministic(spec in valid_spec()) {
            prop_assert_eq!(compute_sequence(&spec), compute_sequence(&spec));
        }
    }
}
