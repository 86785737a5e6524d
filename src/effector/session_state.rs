use crate::lead::AuthTokenRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::Display;

/// Lifecycle state of one effector session.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Armed,
    Firing,
    Safed,
    Aborted,
    Malfunction,
}

impl SessionState {
    /// States that only an explicit reset leaves.
    pub fn is_terminal(self) -> bool { matches!(self, Self::Safed | Self::Aborted | Self::Malfunction) }
}

/// Evidence payload of one state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTransition {
    pub effector_id: String,
    pub from: SessionState,
    pub to: SessionState,
    pub at: DateTime<Utc>,
    /// Command that caused the transition.
    pub cause: String,
    pub token_ref: Option<AuthTokenRef>,
}
