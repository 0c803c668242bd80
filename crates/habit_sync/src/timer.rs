//! Single-device bound timer.
//!
//! The binding is captured when a session starts and is only released on
//! stop or on cancelling a countdown; switching the selected item or date in
//! between never moves it.

use std::fmt;

use chrono::{DateTime, Utc};
use habit_domain::{BindingTarget, HabitService};
use tracing::{debug, info};

use crate::error::TimerError;

#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    Idle,
    Countdown { remaining: u32 },
    Running { started_at: DateTime<Utc>, accumulated: f64 },
    Paused { accumulated: f64 },
}

/// Seconds to add at a binding target, produced by stopping a timer.
#[derive(Debug, Clone, PartialEq)]
pub struct TimerCommit {
    pub target: BindingTarget,
    pub seconds: f64,
}

impl TimerCommit {
    /// Adds the timed seconds on top of whatever is stored at the target now.
    pub fn apply(&self, service: &HabitService) -> Result<f64, TimerError> {
        service
            .add_raw_value_at(&self.target, self.seconds)
            .map_err(|source| TimerError::Commit {
                commit: self.clone(),
                source,
            })
    }
}

impl fmt::Display for TimerCommit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s to {}", self.seconds, self.target)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TimerAction {
    Started,
    Cancelled,
    Committed(Option<TimerCommit>),
    Ignored,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundTimer {
    phase: Phase,
    target: Option<BindingTarget>,
    countdown_seconds: u32,
}

impl BoundTimer {
    pub fn new(countdown_seconds: u32) -> Self {
        Self {
            phase: Phase::Idle,
            target: None,
            countdown_seconds,
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn target(&self) -> Option<&BindingTarget> {
        self.target.as_ref()
    }

    /// Counting down or running.
    pub fn is_timing(&self) -> bool {
        matches!(self.phase, Phase::Countdown { .. } | Phase::Running { .. })
    }

    /// From idle: binds `selection` and begins the countdown. From paused:
    /// resumes against the existing binding and ignores `selection`.
    pub fn start(&mut self, selection: BindingTarget, now: DateTime<Utc>) -> bool {
        match self.phase {
            Phase::Idle => {
                debug!(target = %selection, "timer bound");
                self.target = Some(selection);
                self.phase = if self.countdown_seconds == 0 {
                    Phase::Running {
                        started_at: now,
                        accumulated: 0.0,
                    }
                } else {
                    Phase::Countdown {
                        remaining: self.countdown_seconds,
                    }
                };
                true
            }
            Phase::Paused { .. } => self.resume(now),
            _ => false,
        }
    }

    /// One countdown second elapsed. Returns the seconds still remaining.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<u32> {
        let Phase::Countdown { remaining } = self.phase else {
            return None;
        };
        let remaining = remaining.saturating_sub(1);
        self.phase = if remaining == 0 {
            Phase::Running {
                started_at: now,
                accumulated: 0.0,
            }
        } else {
            Phase::Countdown { remaining }
        };
        Some(remaining)
    }

    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> f64 {
        match self.phase {
            Phase::Running {
                started_at,
                accumulated,
            } => {
                let ms = (now - started_at).num_milliseconds().max(0);
                accumulated + (ms / 1000) as f64
            }
            Phase::Paused { accumulated } => accumulated,
            _ => 0.0,
        }
    }

    pub fn pause(&mut self, now: DateTime<Utc>) -> bool {
        if !matches!(self.phase, Phase::Running { .. }) {
            return false;
        }
        self.phase = Phase::Paused {
            accumulated: self.elapsed_seconds(now),
        };
        true
    }

    pub fn resume(&mut self, now: DateTime<Utc>) -> bool {
        let Phase::Paused { accumulated } = self.phase else {
            return false;
        };
        self.phase = Phase::Running {
            started_at: now,
            accumulated,
        };
        true
    }

    /// Ends a running or paused session and releases the binding. The commit
    /// is `None` when nothing was timed.
    pub fn stop(&mut self, now: DateTime<Utc>) -> Option<TimerCommit> {
        if !matches!(self.phase, Phase::Running { .. } | Phase::Paused { .. }) {
            return None;
        }
        let seconds = self.elapsed_seconds(now);
        self.phase = Phase::Idle;
        let target = self.target.take()?;
        info!(%target, seconds, "timer stopped");
        (seconds > 0.0).then_some(TimerCommit { target, seconds })
    }

    /// Aborts a countdown. Running sessions cannot be cancelled, only stopped.
    pub fn cancel(&mut self) -> bool {
        if !matches!(self.phase, Phase::Countdown { .. }) {
            return false;
        }
        self.phase = Phase::Idle;
        self.target = None;
        true
    }

    /// Single-button control: start when idle or paused, cancel a countdown,
    /// stop when running.
    pub fn toggle(&mut self, selection: BindingTarget, now: DateTime<Utc>) -> TimerAction {
        match self.phase {
            Phase::Idle | Phase::Paused { .. } => {
                if self.start(selection, now) {
                    TimerAction::Started
                } else {
                    TimerAction::Ignored
                }
            }
            Phase::Countdown { .. } => {
                self.cancel();
                TimerAction::Cancelled
            }
            Phase::Running { .. } => TimerAction::Committed(self.stop(now)),
        }
    }
}
