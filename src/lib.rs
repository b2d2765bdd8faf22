//! Natural-language browser driving.
//!
//! An operator types commands such as "search for a couch"; the
//! [`session::SessionLoop`] turns each into steps, asks a vision model for a
//! closed-vocabulary [`types::ActionFragment`] from a snapshot of the page,
//! and runs it through the [`executor::ActionExecutor`], clearing overlays and
//! bot challenges before and after every action.
//!
//! The browser sits behind [`browser::BrowserSession`] (implemented over
//! chromiumoxide in [`runtime`]) and the model behind
//! [`llm::ChatCompletionProvider`] (implemented over async-openai).

pub mod browser;
pub mod config;
pub mod decomposer;
pub mod dom_scripts;
pub mod executor;
pub mod llm;
pub mod logging;
pub mod metrics;
pub mod obstacles;
pub mod resolver;
pub mod runtime;
pub mod session;
pub mod snapshot;
pub mod synthesizer;
pub mod types;

#[cfg(test)]
mod testing;

pub use browser::{BrowserSession, ElementHandle, SessionError};
pub use config::{CommandMode, HelmsmanConfig, HelmsmanConfigOverrides, Timings};
pub use llm::{ChatCompletionProvider, ModelClient, OpenAiChatProvider};
pub use session::{CommandSource, ScriptedCommands, SessionLoop, SessionReport, StdinCommands};
pub use types::{Action, ActionFragment, Command, ExecutionResult, Resolution, Step};
