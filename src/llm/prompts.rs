//! Prompt text and message builders for the three model-backed operations.

use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage,
    ChatCompletionRequestMessageContentPartText, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
    ChatCompletionRequestUserMessageContent, ChatCompletionRequestUserMessageContentPart,
    ImageUrl,
};

pub const SYNTHESIZE_MAX_TOKENS: u32 = 500;
pub const SYNTHESIZE_TEMPERATURE: f32 = 0.3;
pub const DECOMPOSE_MAX_TOKENS: u32 = 200;
pub const DECOMPOSE_TEMPERATURE: f32 = 0.2;
pub const DESCRIBE_MAX_TOKENS: u32 = 300;

const DESCRIBE_INSTRUCTION: &str = "Describe in a few sentences what you see in this image.";

/// System prompt restricting the model to the closed action vocabulary.
pub fn build_synthesize_system_prompt() -> String {
    [
        "You are a browser action planner that can see the current webpage. Produce the actions needed to carry out the user's instruction against the visible elements.",
        "IMPORTANT: the browser is already open on the right page. Output actions only.",
        "",
        "Rules:",
        "1. Output one JSON object per line and nothing else. No prose, no code, no markdown.",
        "2. Every object has an \"action\" field. The only allowed actions are:",
        "   {\"action\": \"click\", \"target\": \"<element description>\"}",
        "   {\"action\": \"clear\", \"target\": \"<element description>\"}",
        "   {\"action\": \"type\", \"target\": \"<element description>\", \"text\": \"<text to type>\"}",
        "   {\"action\": \"scroll\", \"pixels\": <signed integer>}",
        "   {\"action\": \"wait\", \"ms\": <milliseconds>}",
        "3. Describe targets by their visible text, label or purpose (for example \"search\" or \"Add to Cart\"); the runtime locates them.",
        "4. For search and input: clear the field, then type into it.",
        "5. Always add {\"action\": \"wait\", \"ms\": 2000} after every click, clear, type or scroll.",
        "6. DO NOT navigate to other URLs, close or quit the browser, import anything, define functions, or call other models.",
    ]
    .join("\n")
}

pub fn build_synthesize_user_text(instruction: &str) -> String {
    format!(
        "Looking at this screenshot of the current page, produce ONLY the actions needed to: {instruction}"
    )
}

pub fn build_decompose_prompt(instructions: &str) -> String {
    format!(
        "Break down the following instructions into extremely basic, single-sentence steps. \
Each step should describe one simple action (for example, 'click on the search bar', \
'type in couch', or 'select the first search suggestion').\n\n\
Instructions: {instructions}\n\nSteps:"
    )
}

pub fn describe_instruction() -> &'static str {
    DESCRIBE_INSTRUCTION
}

/// Inline data URL for a base64-encoded snapshot.
pub fn image_data_url(base64_image: &str) -> String {
    format!("data:image/png;base64,{base64_image}")
}

pub fn system_message(text: impl Into<String>) -> ChatCompletionRequestMessage {
    ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
        content: ChatCompletionRequestSystemMessageContent::Text(text.into()),
        name: None,
    })
}

pub fn user_text_message(text: impl Into<String>) -> ChatCompletionRequestMessage {
    ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
        content: ChatCompletionRequestUserMessageContent::Text(text.into()),
        name: None,
    })
}

/// User message carrying instruction text followed by an inline image.
pub fn user_image_message(
    text: impl Into<String>,
    image_url: impl Into<String>,
) -> ChatCompletionRequestMessage {
    let parts = vec![
        ChatCompletionRequestUserMessageContentPart::Text(
            ChatCompletionRequestMessageContentPartText { text: text.into() },
        ),
        ChatCompletionRequestUserMessageContentPart::ImageUrl(
            ChatCompletionRequestMessageContentPartImage {
                image_url: ImageUrl {
                    url: image_url.into(),
                    detail: None,
                },
            },
        ),
    ];
    ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
        content: ChatCompletionRequestUserMessageContent::Array(parts),
        name: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesize_prompt_lists_only_closed_vocabulary() {
        let prompt = build_synthesize_system_prompt();
        for action in ["\"click\"", "\"clear\"", "\"type\"", "\"scroll\"", "\"wait\""] {
            assert!(prompt.contains(action), "missing {action}");
        }
        assert!(prompt.contains("DO NOT navigate"));
    }

    #[test]
    fn decompose_prompt_embeds_instructions() {
        let prompt = build_decompose_prompt("open the menu and click settings");
        assert!(prompt.contains("Instructions: open the menu and click settings"));
        assert!(prompt.ends_with("Steps:"));
    }

    #[test]
    fn image_message_has_text_then_image() {
        let message = user_image_message("do it", image_data_url("QUJD"));
        let ChatCompletionRequestMessage::User(user) = message else {
            panic!("expected user message");
        };
        let ChatCompletionRequestUserMessageContent::Array(parts) = user.content else {
            panic!("expected multi-part content");
        };
        assert_eq!(parts.len(), 2);
        match &parts[1] {
            ChatCompletionRequestUserMessageContentPart::ImageUrl(image) => {
                assert_eq!(image.image_url.url, "data:image/png;base64,QUJD");
            }
            other => panic!("unexpected part {other:?}"),
        }
    }
}
