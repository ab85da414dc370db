use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

use crate::telemetry::tags;

/// Lifecycle of a [`Pipeline`](crate::Pipeline).
///
/// ```text
/// Idle -> Running -> Draining -> Completed
///            \           \
///             +-----------+----> Faulted
/// Completed | Faulted -> Running (next run)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PipelineState {
    Idle = 0,
    Running = 1,
    Draining = 2,
    Completed = 3,
    Faulted = 4,
}

impl PipelineState {
    pub fn can_transition_to(self, next: Self) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Idle | Completed | Faulted, Running)
                | (Running, Draining)
                | (Running | Draining, Faulted)
                | (Draining, Completed)
        )
    }

    /// True once a run has finished, successfully or not.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Faulted)
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Idle,
            1 => Self::Running,
            2 => Self::Draining,
            3 => Self::Completed,
            _ => Self::Faulted,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Completed => "completed",
            Self::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// Atomic holder for the current [`PipelineState`].
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(PipelineState::Idle as u8))
    }

    pub(crate) fn get(&self) -> PipelineState {
        PipelineState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Moves to `next` if the edge is legal; returns whether it happened.
    pub(crate) fn advance(&self, next: PipelineState) -> bool {
        let moved = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                PipelineState::from_u8(raw)
                    .can_transition_to(next)
                    .then_some(next as u8)
            });
        match moved {
            Ok(previous) => {
                tracing::debug!(
                    target: tags::LOG_PIPELINE,
                    from = %PipelineState::from_u8(previous),
                    to = %next,
                    "pipeline state transition"
                );
                true
            }
            Err(_) => false,
        }
    }
}
