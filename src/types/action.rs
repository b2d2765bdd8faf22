use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Upper bound applied to any model-requested wait.
pub const MAX_WAIT_MS: u64 = 10_000;

/// One browser action from the closed vocabulary the synthesizer may emit.
///
/// Serialised as a single JSON object tagged by `action`, e.g.
/// `{"action":"type","target":"search","text":"couch"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Click { target: String },
    Clear { target: String },
    Type { target: String, text: String },
    Scroll { pixels: i64 },
    Wait { ms: u64 },
}

impl Action {
    pub fn parse_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }

    /// Element description this action resolves, if any.
    pub fn target(&self) -> Option<&str> {
        match self {
            Action::Click { target } | Action::Clear { target } | Action::Type { target, .. } => {
                Some(target)
            }
            Action::Scroll { .. } | Action::Wait { .. } => None,
        }
    }

    /// Whether the action changes the page and must be followed by a settle wait.
    pub fn is_interaction(&self) -> bool {
        !matches!(self, Action::Wait { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Action::Click { .. } => "click",
            Action::Clear { .. } => "clear",
            Action::Type { .. } => "type",
            Action::Scroll { .. } => "scroll",
            Action::Wait { .. } => "wait",
        }
    }
}

/// Ordered list of actions produced for one step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionFragment {
    actions: Vec<Action>,
}

impl ActionFragment {
    /// Normalise model output: clamp waits and insert a `settle` wait after
    /// every interaction the model left without one.
    pub fn new(actions: Vec<Action>, settle: Duration) -> Self {
        let settle_ms = u64::try_from(settle.as_millis())
            .unwrap_or(MAX_WAIT_MS)
            .min(MAX_WAIT_MS);
        let mut normalised = Vec::with_capacity(actions.len() * 2);
        let mut iter = actions.into_iter().peekable();
        while let Some(action) = iter.next() {
            let action = match action {
                Action::Wait { ms } => Action::Wait {
                    ms: ms.min(MAX_WAIT_MS),
                },
                other => other,
            };
            let needs_settle =
                action.is_interaction() && !matches!(iter.peek(), Some(Action::Wait { .. }));
            normalised.push(action);
            if needs_settle {
                normalised.push(Action::Wait { ms: settle_ms });
            }
        }
        Self {
            actions: normalised,
        }
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}
