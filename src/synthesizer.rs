//! Snapshot plus instruction in, closed-vocabulary action fragment out.
//!
//! The model is shown the current page and asked for one JSON action per
//! line. Its reply is sanitised (fences, lifecycle lines and blanks dropped)
//! and parsed strictly: any line outside the vocabulary rejects the whole
//! fragment. Model text is never executed.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use thiserror::Error;

use crate::browser::BrowserSession;
use crate::llm::prompts::{
    DESCRIBE_MAX_TOKENS, SYNTHESIZE_MAX_TOKENS, SYNTHESIZE_TEMPERATURE,
    build_synthesize_system_prompt, build_synthesize_user_text, describe_instruction,
    image_data_url, system_message, user_image_message,
};
use crate::llm::{ChatCompletionOptions, ChatCompletionProvider, ModelClient};
use crate::logging::{CATEGORY_SYNTHESIZE, HelmsmanLogger};
use crate::metrics::HelmsmanFunctionName;
use crate::snapshot::SnapshotStore;
use crate::types::{Action, ActionFragment};

/// Non-JSON lines containing any of these are dropped before parsing.
pub const LIFECYCLE_KEYWORDS: &[&str] = &[
    "import ",
    "webdriver",
    "driver =",
    "driver=",
    "driver.get",
    "driver.quit",
    "driver.close",
    "browser.close",
    "window.location",
    "def ",
    "fn ",
];

#[derive(Debug, Error, PartialEq)]
pub enum FragmentError {
    #[error("no actions left after sanitising the model response")]
    Empty,
    #[error("unparseable action line {line:?}: {message}")]
    Unparseable { line: String, message: String },
}

/// Strip markdown fences, lifecycle lines and blank lines.
///
/// JSON object lines always survive, so action payloads such as typed text
/// are never matched against the lifecycle keywords.
pub fn sanitize_response(text: &str) -> Vec<&str> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with("```"))
        .filter(|line| is_json_object(line) || !is_lifecycle_line(line))
        .collect()
}

fn is_json_object(line: &str) -> bool {
    serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(line).is_ok()
}

fn is_lifecycle_line(line: &str) -> bool {
    LIFECYCLE_KEYWORDS
        .iter()
        .any(|keyword| line.contains(keyword))
}

/// Parse a sanitised response into a fragment, inserting `settle` waits.
pub fn parse_fragment(text: &str, settle: Duration) -> Result<ActionFragment, FragmentError> {
    let lines = sanitize_response(text);
    if lines.is_empty() {
        return Err(FragmentError::Empty);
    }

    let actions = lines
        .into_iter()
        .map(|line| {
            Action::parse_line(line).map_err(|err| FragmentError::Unparseable {
                line: line.to_string(),
                message: err.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ActionFragment::new(actions, settle))
}

pub struct ActionSynthesizer<P: ChatCompletionProvider> {
    client: Arc<ModelClient<P>>,
    snapshots: Arc<SnapshotStore>,
    settle: Duration,
    logger: Arc<HelmsmanLogger>,
}

impl<P: ChatCompletionProvider> ActionSynthesizer<P> {
    pub fn new(
        client: Arc<ModelClient<P>>,
        snapshots: Arc<SnapshotStore>,
        settle: Duration,
        logger: Arc<HelmsmanLogger>,
    ) -> Self {
        Self {
            client,
            snapshots,
            settle,
            logger,
        }
    }

    /// Produce a fragment for `instruction`, or `None` when the snapshot,
    /// the request, or the response is unusable.
    pub async fn synthesize<S>(&self, session: &S, instruction: &str) -> Option<ActionFragment>
    where
        S: BrowserSession + ?Sized,
    {
        self.logger.info(
            "Taking screenshot for visual context...",
            Some(CATEGORY_SYNTHESIZE),
            None,
        );
        let image = match self.snapshots.capture_base64(session).await {
            Ok(image) => image,
            Err(err) => {
                self.logger.error(
                    format!("Snapshot failed: {err}"),
                    Some(CATEGORY_SYNTHESIZE),
                    None,
                );
                return None;
            }
        };

        let messages = vec![
            system_message(build_synthesize_system_prompt()),
            user_image_message(build_synthesize_user_text(instruction), image_data_url(&image)),
        ];
        let options =
            ChatCompletionOptions::limits(SYNTHESIZE_MAX_TOKENS, Some(SYNTHESIZE_TEMPERATURE));

        let text = match self
            .client
            .complete_text(messages, options, Some(HelmsmanFunctionName::Synthesize))
            .await
        {
            Ok(text) => text,
            Err(err) => {
                self.logger.error(
                    format!("Error getting actions: {err}"),
                    Some(CATEGORY_SYNTHESIZE),
                    None,
                );
                return None;
            }
        };

        match parse_fragment(&text, self.settle) {
            Ok(fragment) => {
                self.logger.info(
                    "Generated actions",
                    Some(CATEGORY_SYNTHESIZE),
                    Some(json!({ "instruction": instruction, "actions": fragment.actions() })),
                );
                Some(fragment)
            }
            Err(err) => {
                self.logger.error(
                    format!("Rejected model response: {err}"),
                    Some(CATEGORY_SYNTHESIZE),
                    Some(json!({ "response": text })),
                );
                None
            }
        }
    }

    /// Ask the model for a short description of the current page.
    pub async fn describe_page<S>(&self, session: &S) -> Option<String>
    where
        S: BrowserSession + ?Sized,
    {
        let image = match self.snapshots.capture_base64(session).await {
            Ok(image) => image,
            Err(err) => {
                self.logger.error(
                    format!("Snapshot failed: {err}"),
                    Some(CATEGORY_SYNTHESIZE),
                    None,
                );
                return None;
            }
        };

        let messages = vec![user_image_message(
            describe_instruction(),
            image_data_url(&image),
        )];
        let options = ChatCompletionOptions::limits(DESCRIBE_MAX_TOKENS, None);

        match self
            .client
            .complete_text(messages, options, Some(HelmsmanFunctionName::Describe))
            .await
        {
            Ok(description) => Some(description),
            Err(err) => {
                self.logger.error(
                    format!("Error describing page: {err}"),
                    Some(CATEGORY_SYNTHESIZE),
                    None,
                );
                None
            }
        }
    }
}
