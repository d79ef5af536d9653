use serde::{Deserialize, Serialize};

use crate::record::Step;

/// Sequencer phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Entering,
    Confirming,
    /// Terminal: both entries matched.
    Succeeded,
}

impl Phase {
    pub fn step(self) -> Step {
        match self {
            Phase::Entering => Step::Enter,
            Phase::Confirming | Phase::Succeeded => Step::Confirm,
        }
    }
}

/// Transient display signal reflecting the last comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feedback {
    #[default]
    Idle,
    Error,
    Success,
}

/// What a display needs to draw the dot row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct View {
    pub filled: usize,
    pub length: usize,
    pub feedback: Feedback,
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

impl View {
    /// Render as a row of dots, e.g. `● ● ○ ○`. Error shows every dot as `✕`.
    pub fn dots(&self) -> String {
        (0..self.length)
            .map(|i| match self.feedback {
                Feedback::Error => "✕",
                _ if i < self.filled => "●",
                _ => "○",
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}
