use serde::{Deserialize, Serialize};

/// Where a grading run is. Inspected after every [`step`](super::RubricEngine::step).
///
/// ```text
/// Pending -> Running(0) -> Running(1) -> ... -> Completed
///                  \              \
///                   +--------------+--> Aborted | InternalError
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(tag = "state", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EngineState {
    Pending,

    /// `check_index` is the next check to run.
    Running { check_index: usize },

    Completed,

    /// The blocking check at `check_index` did not pass.
    Aborted { check_index: usize },

    /// The grading host failed while running the check at `check_index`.
    InternalError { check_index: usize },
}

impl EngineState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EngineState::Completed | EngineState::Aborted { .. } | EngineState::InternalError { .. }
        )
    }

    /// Index of the check the next step will run, if any.
    pub fn next_check(&self) -> Option<usize> {
        match self {
            EngineState::Pending => Some(0),
            EngineState::Running { check_index } => Some(*check_index),
            _ => None,
        }
    }
}
