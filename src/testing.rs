//! In-memory browser and scripted model used by unit tests.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_openai::error::{ApiError, OpenAIError};
use async_openai::types::{CreateChatCompletionRequest, CreateChatCompletionResponse};
use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};

use crate::browser::{BrowserSession, ElementHandle, ElementState, SessionError};
use crate::llm::ChatCompletionProvider;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Navigate(String),
    Screenshot(PathBuf),
    Click(String),
    ScriptClick(String),
    Clear(String),
    Type(String, String),
    ScrollIntoView(String),
    ScrollBy(i64),
    PressAndHold(String, Duration),
    Terminate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Failure {
    Intercepted,
    NotInteractable,
    Other,
}

impl Failure {
    fn into_error(self, xpath: &str) -> SessionError {
        match self {
            Failure::Intercepted => {
                SessionError::ClickIntercepted(format!("{xpath} is covered by div.modal"))
            }
            Failure::NotInteractable => {
                SessionError::NotInteractable(format!("{xpath} is not displayed"))
            }
            Failure::Other => SessionError::Message(format!("{xpath} detached during click")),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct FakeElement {
    pub state: ElementState,
    /// Elements removed from the page when this one is clicked or held.
    pub dismisses: Vec<String>,
    /// Outcomes for successive native clicks; empty means success.
    pub failures: VecDeque<Failure>,
}

impl FakeElement {
    pub fn visible(tag: &str) -> Self {
        Self::with_state(ElementState {
            tag: tag.to_string(),
            displayed: true,
            enabled: true,
            class: None,
            disabled_attr: None,
        })
    }

    pub fn with_state(state: ElementState) -> Self {
        Self {
            state,
            dismisses: Vec::new(),
            failures: VecDeque::new(),
        }
    }

    pub fn dismissing(mut self, xpaths: &[&str]) -> Self {
        self.dismisses = xpaths.iter().map(|x| x.to_string()).collect();
        self
    }

    pub fn failing(mut self, failures: &[Failure]) -> Self {
        self.failures = failures.iter().copied().collect();
        self
    }
}

#[derive(Default)]
struct FakeState {
    elements: HashMap<String, FakeElement>,
    calls: Vec<Call>,
    navigation_failure: Option<String>,
}

#[derive(Default)]
pub(crate) struct FakeSession {
    state: Mutex<FakeState>,
}

impl FakeSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, xpath: &str, element: FakeElement) {
        self.state
            .lock()
            .unwrap()
            .elements
            .insert(xpath.to_string(), element);
    }

    /// Make every subsequent `navigate` fail with `message`.
    pub fn fail_navigation(&self, message: &str) {
        self.state.lock().unwrap().navigation_failure = Some(message.to_string());
    }

    pub fn contains(&self, xpath: &str) -> bool {
        self.state.lock().unwrap().elements.contains_key(xpath)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn activate(&self, xpath: &str, native: bool) -> Result<(), SessionError> {
        let mut state = self.state.lock().unwrap();
        let element = state
            .elements
            .get_mut(xpath)
            .ok_or_else(|| SessionError::StaleElement(xpath.to_string()))?;
        if native {
            if let Some(failure) = element.failures.pop_front() {
                return Err(failure.into_error(xpath));
            }
        }
        let dismissed = element.dismisses.clone();
        for target in dismissed {
            state.elements.remove(&target);
        }
        Ok(())
    }

    fn require(&self, xpath: &str) -> Result<(), SessionError> {
        if self.contains(xpath) {
            Ok(())
        } else {
            Err(SessionError::StaleElement(xpath.to_string()))
        }
    }
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn navigate(&self, url: &str) -> Result<(), SessionError> {
        self.record(Call::Navigate(url.to_string()));
        match self.state.lock().unwrap().navigation_failure.clone() {
            Some(message) => Err(SessionError::Message(message)),
            None => Ok(()),
        }
    }

    async fn save_screenshot(&self, path: &Path) -> Result<(), SessionError> {
        self.record(Call::Screenshot(path.to_path_buf()));
        std::fs::write(path, b"fake-png")?;
        Ok(())
    }

    async fn evaluate(&self, _script: &str) -> Result<JsonValue, SessionError> {
        Ok(JsonValue::Null)
    }

    async fn find_element(&self, xpath: &str) -> Result<Option<ElementHandle>, SessionError> {
        Ok(self.contains(xpath).then(|| ElementHandle::new(xpath)))
    }

    async fn element_state(&self, element: &ElementHandle) -> Result<ElementState, SessionError> {
        self.state
            .lock()
            .unwrap()
            .elements
            .get(element.xpath())
            .map(|el| el.state.clone())
            .ok_or_else(|| SessionError::StaleElement(element.xpath().to_string()))
    }

    async fn click(&self, element: &ElementHandle) -> Result<(), SessionError> {
        self.record(Call::Click(element.xpath().to_string()));
        self.activate(element.xpath(), true)
    }

    async fn script_click(&self, element: &ElementHandle) -> Result<(), SessionError> {
        self.record(Call::ScriptClick(element.xpath().to_string()));
        self.activate(element.xpath(), false)
    }

    async fn clear(&self, element: &ElementHandle) -> Result<(), SessionError> {
        self.record(Call::Clear(element.xpath().to_string()));
        self.require(element.xpath())
    }

    async fn type_text(&self, element: &ElementHandle, text: &str) -> Result<(), SessionError> {
        self.record(Call::Type(element.xpath().to_string(), text.to_string()));
        self.require(element.xpath())
    }

    async fn scroll_into_view(&self, element: &ElementHandle) -> Result<(), SessionError> {
        self.record(Call::ScrollIntoView(element.xpath().to_string()));
        self.require(element.xpath())
    }

    async fn scroll_by(&self, pixels: i64) -> Result<(), SessionError> {
        self.record(Call::ScrollBy(pixels));
        Ok(())
    }

    async fn press_and_hold(
        &self,
        element: &ElementHandle,
        hold: Duration,
    ) -> Result<(), SessionError> {
        self.record(Call::PressAndHold(element.xpath().to_string(), hold));
        tokio::time::sleep(hold).await;
        self.activate(element.xpath(), false)
    }

    async fn terminate(&self) -> Result<(), SessionError> {
        self.record(Call::Terminate);
        Ok(())
    }
}

/// Replies with canned text (or an API error) in order and records every
/// request it was sent.
#[derive(Default)]
pub(crate) struct ScriptedProvider {
    replies: tokio::sync::Mutex<VecDeque<Result<String, String>>>,
    requests: tokio::sync::Mutex<Vec<CreateChatCompletionRequest>>,
}

impl ScriptedProvider {
    pub fn replying(replies: Vec<Result<String, String>>) -> Self {
        Self {
            replies: tokio::sync::Mutex::new(replies.into()),
            requests: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    pub async fn requests(&self) -> Vec<CreateChatCompletionRequest> {
        self.requests.lock().await.clone()
    }
}

pub(crate) fn completion_with_content(content: &str) -> CreateChatCompletionResponse {
    serde_json::from_value(json!({
        "id": "cmpl-test",
        "object": "chat.completion",
        "created": 0,
        "model": "gpt-4o-mini",
        "choices": [{
            "index": 0,
            "finish_reason": "stop",
            "message": { "role": "assistant", "content": content },
            "logprobs": null
        }],
        "usage": { "prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5 }
    }))
    .unwrap()
}

#[async_trait]
impl ChatCompletionProvider for ScriptedProvider {
    async fn create_chat_completion(
        &self,
        request: CreateChatCompletionRequest,
    ) -> Result<CreateChatCompletionResponse, OpenAIError> {
        self.requests.lock().await.push(request);
        let reply = self
            .replies
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err("no reply scripted".to_string()));
        match reply {
            Ok(content) => Ok(completion_with_content(&content)),
            Err(message) => Err(OpenAIError::ApiError(ApiError {
                message,
                r#type: None,
                param: None,
                code: None,
            })),
        }
    }
}
