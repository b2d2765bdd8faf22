use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_openai::types::{
    ChatCompletionRequestMessage, CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
    CreateChatCompletionResponse, Stop,
};

use crate::config::HelmsmanConfig;
use crate::logging::{CATEGORY_LLM, HelmsmanLogger};
use crate::metrics::HelmsmanFunctionName;

use super::error::ModelError;
use super::openai::OpenAiChatProvider;
use super::provider::ChatCompletionProvider;

/// Callback invoked after a successful completion to capture metrics.
pub type MetricsCallback = Arc<
    dyn Fn(&CreateChatCompletionResponse, Duration, Option<HelmsmanFunctionName>)
        + Send
        + Sync
        + 'static,
>;

/// Optional parameters that influence chat completion requests.
#[derive(Debug, Default, Clone)]
pub struct ChatCompletionOptions {
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub seed: Option<i64>,
    pub stop: Option<Stop>,
    pub user: Option<String>,
}

impl ChatCompletionOptions {
    pub fn limits(max_tokens: u32, temperature: Option<f32>) -> Self {
        Self {
            max_tokens: Some(max_tokens),
            temperature,
            ..Default::default()
        }
    }
}

/// Provider-neutral model client.
pub struct ModelClient<P: ChatCompletionProvider> {
    provider: P,
    default_model: String,
    logger: Option<Arc<HelmsmanLogger>>,
    metrics_callback: Option<MetricsCallback>,
}

impl<P> fmt::Debug for ModelClient<P>
where
    P: ChatCompletionProvider + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelClient")
            .field("provider", &self.provider)
            .field("default_model", &self.default_model)
            .field("logger_attached", &self.logger.is_some())
            .field("metrics_callback", &self.metrics_callback.is_some())
            .finish()
    }
}

impl<P: ChatCompletionProvider> ModelClient<P> {
    pub fn new(default_model: impl Into<String>, provider: P) -> Self {
        Self {
            provider,
            default_model: default_model.into(),
            logger: None,
            metrics_callback: None,
        }
    }

    pub fn with_logger(mut self, logger: Option<Arc<HelmsmanLogger>>) -> Self {
        self.logger = logger;
        self
    }

    /// Attach a metrics callback invoked after successful completions.
    pub fn with_metrics_callback(mut self, callback: Option<MetricsCallback>) -> Self {
        self.metrics_callback = callback;
        self
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Access the underlying provider (primarily for testing).
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Construct an [`async_openai`] chat completion request using the provided messages and
    /// options.
    pub fn build_request(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
        options: ChatCompletionOptions,
    ) -> Result<CreateChatCompletionRequest, ModelError> {
        let model = options
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        if model.trim().is_empty() {
            return Err(ModelError::MissingDefaultModel);
        }

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder.model(model);
        builder.messages(messages);
        apply_options(&mut builder, options);

        builder
            .build()
            .map_err(|err| ModelError::InvalidRequest(err.to_string()))
    }

    pub async fn create_chat_completion(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
        options: ChatCompletionOptions,
        function_name: Option<HelmsmanFunctionName>,
    ) -> Result<CreateChatCompletionResponse, ModelError> {
        let request = self.build_request(messages, options)?;
        self.execute_request(request, function_name).await
    }

    /// Run a completion and return the trimmed text of the first choice.
    pub async fn complete_text(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
        options: ChatCompletionOptions,
        function_name: Option<HelmsmanFunctionName>,
    ) -> Result<String, ModelError> {
        let response = self
            .create_chat_completion(messages, options, function_name)
            .await?;
        first_choice_text(&response).ok_or(ModelError::EmptyResponse)
    }

    async fn execute_request(
        &self,
        request: CreateChatCompletionRequest,
        function_name: Option<HelmsmanFunctionName>,
    ) -> Result<CreateChatCompletionResponse, ModelError> {
        let model = request.model.clone();
        let label = function_name.map(HelmsmanFunctionName::as_str).unwrap_or("n/a");
        self.log_debug(&format!(
            "Sending chat completion request to model={model} function={label}"
        ));

        let start = Instant::now();
        match self.provider.create_chat_completion(request).await {
            Ok(response) => {
                let elapsed = start.elapsed();
                if let Some(callback) = &self.metrics_callback {
                    callback(&response, elapsed, function_name);
                }
                self.log_debug(&format!(
                    "Chat completion succeeded: model={} duration={}ms",
                    model,
                    elapsed.as_millis()
                ));
                Ok(response)
            }
            Err(err) => {
                self.log_error(&format!("Chat completion failed for model={model}: {err}"));
                Err(ModelError::OpenAi(err))
            }
        }
    }

    fn log_debug(&self, message: &str) {
        if let Some(logger) = &self.logger {
            logger.debug(message, Some(CATEGORY_LLM), None);
        }
    }

    fn log_error(&self, message: &str) {
        if let Some(logger) = &self.logger {
            logger.error(message, Some(CATEGORY_LLM), None);
        }
    }
}

impl ModelClient<OpenAiChatProvider> {
    /// Wire the OpenAI provider from configuration.
    pub fn from_config(
        config: &HelmsmanConfig,
        logger: Option<Arc<HelmsmanLogger>>,
        metrics_callback: Option<MetricsCallback>,
    ) -> Result<Self, ModelError> {
        let provider = OpenAiChatProvider::from_config(config)?;
        Ok(ModelClient::new(config.model_name.as_str(), provider)
            .with_logger(logger)
            .with_metrics_callback(metrics_callback))
    }
}

fn first_choice_text(response: &CreateChatCompletionResponse) -> Option<String> {
    response
        .choices
        .first()
        .and_then(|choice| choice.message.content.as_deref())
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn apply_options(builder: &mut CreateChatCompletionRequestArgs, options: ChatCompletionOptions) {
    let ChatCompletionOptions {
        model: _,
        max_tokens,
        temperature,
        top_p,
        seed,
        stop,
        user,
    } = options;

    if let Some(max_tokens) = max_tokens {
        builder.max_tokens(max_tokens);
    }
    if let Some(temperature) = temperature {
        builder.temperature(temperature);
    }
    if let Some(top_p) = top_p {
        builder.top_p(top_p);
    }
    if let Some(seed) = seed {
        builder.seed(seed);
    }
    if let Some(stop) = stop {
        builder.stop(stop);
    }
    if let Some(user) = user {
        builder.user(user);
    }
}
