//! Core data structures shared by the resolver, synthesizer, executor and
//! session loop.

pub mod action;
pub mod command;
pub mod outcome;

pub use action::{Action, ActionFragment, MAX_WAIT_MS};
pub use command::{Command, Step};
pub use outcome::{ExecutionResult, ObstacleKind, Resolution};
