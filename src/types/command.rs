use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::CommandMode;

/// One operator line, classified by how it should be carried out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// A single action description, executed as one step.
    Atomic(String),
    /// Several instructions that must be decomposed into steps first.
    Paragraph(String),
}

const CLAUSE_JOINERS: &[&str] = &["and", "then", "after", "afterwards", "next", "finally"];

impl Command {
    pub fn classify(line: &str, mode: CommandMode) -> Self {
        let text = line.trim().to_string();
        match mode {
            CommandMode::Atomic => Command::Atomic(text),
            CommandMode::Paragraph => Command::Paragraph(text),
            CommandMode::Auto if looks_like_paragraph(&text) => Command::Paragraph(text),
            CommandMode::Auto => Command::Atomic(text),
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Command::Atomic(text) | Command::Paragraph(text) => text,
        }
    }
}

/// Several sentences, a clause separator, or a joining word between clauses.
fn looks_like_paragraph(text: &str) -> bool {
    if text.contains(';') || text.contains(',') || text.contains('\n') {
        return true;
    }

    let sentence_break = text.match_indices(['.', '!', '?']).any(|(index, mark)| {
        let rest = &text[index + mark.len()..];
        rest.starts_with(char::is_whitespace) && !rest.trim().is_empty()
    });
    if sentence_break {
        return true;
    }

    text.split_whitespace()
        .skip(1)
        .map(|word| word.trim_matches(|c: char| !c.is_alphanumeric()).to_ascii_lowercase())
        .any(|word| CLAUSE_JOINERS.contains(&word.as_str()))
}

/// An atomic single-action description; steps run in list order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Step(String);

impl Step {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn text(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Step {
    fn from(value: &str) -> Self {
        Step::new(value)
    }
}
