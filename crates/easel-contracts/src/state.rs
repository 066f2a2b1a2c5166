use serde::{Deserialize, Serialize};

/// Lifecycle of a single inference request.
///
/// `Idle` is the initial state. `Validating` is only observable while a
/// dispatch checks its input; a failed validation restores whatever state
/// was current before.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    #[default]
    Idle,
    Validating,
    InFlight,
    Succeeded,
    Failed,
}

impl RequestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::Idle => "idle",
            RequestState::Validating => "validating",
            RequestState::InFlight => "in_flight",
            RequestState::Succeeded => "succeeded",
            RequestState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Succeeded | RequestState::Failed)
    }

    /// Whether a new dispatch may start from this state.
    pub fn accepts_dispatch(&self) -> bool {
        matches!(
            self,
            RequestState::Idle | RequestState::Succeeded | RequestState::Failed
        )
    }
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
