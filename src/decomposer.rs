//! Splits a multi-instruction paragraph into ordered atomic steps.

use std::sync::Arc;

use serde_json::json;

use crate::llm::prompts::{
    DECOMPOSE_MAX_TOKENS, DECOMPOSE_TEMPERATURE, build_decompose_prompt, user_text_message,
};
use crate::llm::{ChatCompletionOptions, ChatCompletionProvider, ModelClient};
use crate::logging::{CATEGORY_DECOMPOSE, HelmsmanLogger};
use crate::metrics::HelmsmanFunctionName;
use crate::types::Step;

pub struct InstructionDecomposer<P: ChatCompletionProvider> {
    client: Arc<ModelClient<P>>,
    logger: Arc<HelmsmanLogger>,
}

impl<P: ChatCompletionProvider> InstructionDecomposer<P> {
    pub fn new(client: Arc<ModelClient<P>>, logger: Arc<HelmsmanLogger>) -> Self {
        Self { client, logger }
    }

    /// Ordered steps for `paragraph`; empty on blank input or any model failure.
    pub async fn decompose(&self, paragraph: &str) -> Vec<Step> {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            return Vec::new();
        }

        let options =
            ChatCompletionOptions::limits(DECOMPOSE_MAX_TOKENS, Some(DECOMPOSE_TEMPERATURE));
        let text = match self
            .client
            .complete_text(
                vec![user_text_message(build_decompose_prompt(paragraph))],
                options,
                Some(HelmsmanFunctionName::Decompose),
            )
            .await
        {
            Ok(text) => text,
            Err(err) => {
                self.logger.error(
                    format!("Error breaking down instructions: {err}"),
                    Some(CATEGORY_DECOMPOSE),
                    None,
                );
                return Vec::new();
            }
        };

        let steps = parse_steps(&text);
        self.logger.info(
            "Broken down steps",
            Some(CATEGORY_DECOMPOSE),
            Some(json!({ "steps": steps })),
        );
        for (idx, step) in steps.iter().enumerate() {
            self.logger
                .info(format!("Step {}: {step}", idx + 1), Some(CATEGORY_DECOMPOSE), None);
        }
        steps
    }
}

/// One step per non-blank line, with list markers removed.
pub fn parse_steps(text: &str) -> Vec<Step> {
    text.lines()
        .map(strip_list_marker)
        .filter(|line| !line.is_empty())
        .map(Step::new)
        .collect()
}

fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();
    for bullet in ['-', '*', '•'] {
        if let Some(rest) = line.strip_prefix(bullet) {
            return rest.trim_start();
        }
    }

    // "1." / "12)" enumerators, but not bare numbers such as "4.5 stars".
    let digits = line.len() - line.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix(['.', ')']) {
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                return rest.trim_start();
            }
        }
    }
    line
}
