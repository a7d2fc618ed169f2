//! # Load Guard
//!
//! Overload protection for a single relay-switched load.
//!
//! A load episode starts when active power rises strictly above the
//! threshold and ends when it falls strictly below it. If an episode lasts
//! longer than `max_run_ms` the guard trips: relay and lamp are forced off
//! and stay off until a manual reset. A reading exactly at the threshold
//! neither starts nor stops an episode.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};
use validator::Validate;

use crate::domain::OutputState;

/// Guard limits, fixed at startup.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct GuardConfig {
    /// Power above which the load counts as running (W)
    #[validate(range(exclusive_min = 0.0))]
    pub power_threshold_w: f64,
    /// Longest allowed continuous episode (ms)
    #[validate(range(min = 1))]
    pub max_run_ms: u32,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            power_threshold_w: 100.0,
            max_run_ms: 900_000, // 15 minutes
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum GuardState {
    /// No episode in progress
    Idle,
    /// Episode in progress, elapsed time tracked
    Running,
    /// Cutoff fired, waiting for a manual reset
    Tripped,
}

/// A contiguous run above the power threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadEpisode {
    pub started_at_ms: u32,
}

impl LoadEpisode {
    /// Time since the episode started, wrap-safe.
    pub fn elapsed_ms(&self, now_ms: u32) -> u32 {
        now_ms.wrapping_sub(self.started_at_ms)
    }
}

/// What a single evaluation changed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum GuardTransition {
    Unchanged,
    EpisodeStarted { at_ms: u32 },
    EpisodeEnded { ran_ms: u32 },
    Tripped { ran_ms: u32 },
}

/// Overload state machine.
///
/// Owns the episode and output state; everything is mutated through
/// [`LoadGuard::evaluate`] and [`LoadGuard::reset`].
#[derive(Debug, Clone)]
pub struct LoadGuard {
    config: GuardConfig,
    phase: Phase,
    outputs: OutputState,
}

/// Internal state; the episode only exists while running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running(LoadEpisode),
    Tripped,
}

impl LoadGuard {
    /// Boot state: idle with both outputs on.
    pub fn new(config: GuardConfig) -> Self {
        Self {
            config,
            phase: Phase::Idle,
            outputs: OutputState::ON,
        }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn state(&self) -> GuardState {
        match self.phase {
            Phase::Idle => GuardState::Idle,
            Phase::Running(_) => GuardState::Running,
            Phase::Tripped => GuardState::Tripped,
        }
    }

    pub fn episode(&self) -> Option<LoadEpisode> {
        match self.phase {
            Phase::Running(episode) => Some(episode),
            _ => None,
        }
    }

    pub fn outputs(&self) -> OutputState {
        self.outputs
    }

    pub fn is_tripped(&self) -> bool {
        self.phase == Phase::Tripped
    }

    /// Elapsed time of the running episode, if any.
    pub fn episode_elapsed_ms(&self, now_ms: u32) -> Option<u32> {
        self.episode().map(|e| e.elapsed_ms(now_ms))
    }

    /// Run one tick with the latest active power reading.
    pub fn evaluate(&mut self, power_w: f64, now_ms: u32) -> GuardTransition {
        let threshold = self.config.power_threshold_w;

        match self.phase {
            Phase::Idle if power_w > threshold => {
                self.phase = Phase::Running(LoadEpisode {
                    started_at_ms: now_ms,
                });
                GuardTransition::EpisodeStarted { at_ms: now_ms }
            }
            Phase::Running(episode) => {
                let ran_ms = episode.elapsed_ms(now_ms);
                if power_w < threshold {
                    self.phase = Phase::Idle;
                    GuardTransition::EpisodeEnded { ran_ms }
                } else if ran_ms > self.config.max_run_ms {
                    self.phase = Phase::Tripped;
                    self.outputs = OutputState::OFF;
                    GuardTransition::Tripped { ran_ms }
                } else {
                    GuardTransition::Unchanged
                }
            }
            Phase::Idle | Phase::Tripped => GuardTransition::Unchanged,
        }
    }

    /// Manual reset: clear the episode, re-enable outputs and go idle.
    ///
    /// Applies regardless of state, so it also restarts the clock of a load
    /// that is merely running. Returns the state before the reset.
    pub fn reset(&mut self) -> GuardState {
        let previous = self.state();
        self.phase = Phase::Idle;
        self.outputs = OutputState::ON;
        previous
    }
}
