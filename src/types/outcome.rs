use std::fmt;

use crate::browser::ElementHandle;

/// Outcome of resolving an element description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found(ElementHandle),
    /// No strategy matched; callers skip the action.
    NotFound,
}

/// Outcome of running one action fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    Success,
    /// Carries the error text of the first failure.
    Failure(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObstacleKind {
    Overlay,
    BotChallenge,
}

impl fmt::Display for ObstacleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObstacleKind::Overlay => f.write_str("overlay"),
            ObstacleKind::BotChallenge => f.write_str("bot challenge"),
        }
    }
}
