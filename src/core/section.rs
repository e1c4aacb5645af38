//! Trial timeline.
//!
//! Every phase-dependent decision goes through [`SectionTimings::section_at`];
//! nothing else re-derives section boundaries.

use serde::{Deserialize, Serialize};

/// Phases of one trial, totally ordered by elapsed time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialSection {
    Start,
    Prep,
    Move,
    LockedWithFeedback,
    Grasp,
    Post,
    EndTrial,
}

/// Section durations in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SectionTimings {
    pub time_prep: f64,
    pub time_move: f64,
    pub time_locked_with_feedback: f64,
    pub time_grasp: f64,
    pub time_post: f64,
}

impl SectionTimings {
    pub fn duration_ms(&self) -> f64 {
        self.time_prep + self.time_move + self.time_locked_with_feedback + self.time_grasp + self.time_post
    }

    /// Cumulative end times of prep, move, locked and grasp windows.
    pub fn boundaries(&self) -> [f64; 4] {
        let prep = self.time_prep;
        let moving = prep + self.time_move;
        let locked = moving + self.time_locked_with_feedback;
        let grasp = locked + self.time_grasp;
        [prep, moving, locked, grasp]
    }

    /// Start and end (ms) of the movement window.
    pub fn move_window(&self) -> (f64, f64) {
        (self.time_prep, self.time_prep + self.time_move)
    }

    /// Classify an elapsed trial time.
    ///
    /// Windows are closed on the right: a time exactly on a boundary still
    /// belongs to the earlier section. Everything at or past the trial duration
    /// is `EndTrial`.
    pub fn section_at(&self, curr_time_ms: f64) -> TrialSection {
        let [prep, moving, locked, grasp] = self.boundaries();
        if curr_time_ms <= 0.0 {
            TrialSection::Start
        } else if curr_time_ms <= prep {
            TrialSection::Prep
        } else if curr_time_ms <= moving {
            TrialSection::Move
        } else if curr_time_ms <= locked {
            TrialSection::LockedWithFeedback
        } else if curr_time_ms <= grasp {
            TrialSection::Grasp
        } else if curr_time_ms < self.duration_ms() {
            TrialSection::Post
        } else {
            TrialSection::EndTrial
        }
    }

    /// Number of synchronization rounds in one trial.
    pub fn total_steps(&self, resolution_ms: f64) -> usize {
        (self.duration_ms() / resolution_ms).round() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timings() -> SectionTimings {
        SectionTimings {
            time_prep: 50.0,
            time_move: 250.0,
            time_locked_with_feedback: 100.0,
            time_grasp: 50.0,
            time_post: 150.0,
        }
    }

    #[test]
    fn sections_are_monotonic_over_time() {
        let t = timings();
        let res = 0.1;
        let mut prev = TrialSection::Start;
        let mut transitions = Vec::new();
        for step in 0..=((t.duration_ms() + 5.0) / res) as usize {
            let now = step as f64 * res;
            let s = t.section_at(now);
            assert!(s >= prev, "{s:?} after {prev:?} at {now}");
            if s != prev {
                transitions.push((prev, s, now));
            }
            prev = s;
        }
        let order: Vec<_> = transitions.iter().map(|(_, s, _)| *s).collect();
        assert_eq!(
            order,
            vec![
                TrialSection::Prep,
                TrialSection::Move,
                TrialSection::LockedWithFeedback,
                TrialSection::Grasp,
                TrialSection::Post,
                TrialSection::EndTrial,
            ]
        );
        let expected = [0.0, 50.0, 300.0, 400.0, 450.0, 600.0];
        for ((_, _, at), boundary) in transitions.iter().zip(expected) {
            // first sample strictly past the boundary (or at it, for the end)
            assert!(*at >= boundary - 1e-9 && *at <= boundary + res + 1e-9, "{at} vs {boundary}");
        }
    }

    #[test]
    fn boundary_times_belong_to_earlier_section() {
        let t = timings();
        assert_eq!(t.section_at(0.0), TrialSection::Start);
        assert_eq!(t.section_at(50.0), TrialSection::Prep);
        assert_eq!(t.section_at(50.0001), TrialSection::Move);
        assert_eq!(t.section_at(300.0), TrialSection::Move);
        assert_eq!(t.section_at(400.0), TrialSection::LockedWithFeedback);
        assert_eq!(t.section_at(450.0), TrialSection::Grasp);
        assert_eq!(t.section_at(599.9), TrialSection::Post);
        assert_eq!(t.section_at(600.0), TrialSection::EndTrial);
        assert_eq!(t.section_at(10_000.0), TrialSection::EndTrial);
    }

    #[test]
    fn empty_windows_are_skipped() {
        let t = SectionTimings {
            time_prep: 10.0,
            time_move: 20.0,
            time_locked_with_feedback: 0.0,
            time_grasp: 0.0,
            time_post: 5.0,
        };
        assert_eq!(t.section_at(30.5), TrialSection::Post);
        assert_eq!(t.total_steps(0.5), 70);
    }

    #[test]
    fn step_count_rounds_duration() {
        assert_eq!(timings().total_steps(0.1), 6000);
        assert_eq!(timings().total_steps(1.0), 600);
    }
}
