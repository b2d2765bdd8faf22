//! Strongly-typed configuration for the helmsman command loop.
//!
//! Configuration values can be constructed from defaults, loaded from
//! environment variables (with optional `.env` support), or merged with
//! explicit overrides. Every timing constant used by the resolver, obstacle
//! handler and executor lives here so tests and operators can tune them.

use std::env;
use std::fmt;
use std::num::ParseIntError;
use std::path::PathBuf;
use std::time::Duration;

use dotenvy::dotenv;
use serde::de::{Deserialize, Deserializer, Error as DeError};
use serde::ser::{Serialize, Serializer};
use serde::{Deserialize as DeriveDeserialize, Serialize as DeriveSerialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use thiserror::Error;

use crate::logging::LogCallback;

type JsonObject = JsonMap<String, JsonValue>;

/// Page opened when the session boots.
pub const DEFAULT_START_URL: &str = "https://www.wayfair.com";

/// Verbosity level for helmsman logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    Minimal,
    #[default]
    Medium,
    Detailed,
}

impl Verbosity {
    fn as_u8(self) -> u8 {
        match self {
            Verbosity::Minimal => 0,
            Verbosity::Medium => 1,
            Verbosity::Detailed => 2,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Verbosity::Minimal),
            1 => Some(Verbosity::Medium),
            2 => Some(Verbosity::Detailed),
            _ => None,
        }
    }
}

impl Serialize for Verbosity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for Verbosity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = u8::deserialize(deserializer)?;
        Verbosity::from_u8(value).ok_or_else(|| {
            DeError::custom(format!(
                "invalid verbosity value {value}; expected 0, 1, or 2"
            ))
        })
    }
}

/// Vision-capable chat models the synthesizer is known to work with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, DeriveSerialize, DeriveDeserialize)]
pub enum ModelName {
    #[serde(rename = "gpt-4o")]
    Gpt4o,
    #[default]
    #[serde(rename = "gpt-4o-mini")]
    Gpt4oMini,
    #[serde(rename = "gpt-4.1")]
    Gpt41,
    #[serde(rename = "gpt-4.1-mini")]
    Gpt41Mini,
}

impl ModelName {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "gpt-4o" => Some(ModelName::Gpt4o),
            "gpt-4o-mini" => Some(ModelName::Gpt4oMini),
            "gpt-4.1" => Some(ModelName::Gpt41),
            "gpt-4.1-mini" => Some(ModelName::Gpt41Mini),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelName::Gpt4o => "gpt-4o",
            ModelName::Gpt4oMini => "gpt-4o-mini",
            ModelName::Gpt41 => "gpt-4.1",
            ModelName::Gpt41Mini => "gpt-4.1-mini",
        }
    }
}

/// How operator lines are turned into steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, DeriveSerialize, DeriveDeserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandMode {
    /// Classify each line as atomic or paragraph.
    #[default]
    Auto,
    /// Every line is a single step.
    Atomic,
    /// Every line goes through the decomposer.
    Paragraph,
}

impl CommandMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(CommandMode::Auto),
            "atomic" => Some(CommandMode::Atomic),
            "paragraph" => Some(CommandMode::Paragraph),
            _ => None,
        }
    }
}

/// Configuration values for a helmsman session.
#[derive(DeriveSerialize, DeriveDeserialize, Clone)]
#[serde(default)]
pub struct HelmsmanConfig {
    #[serde(alias = "startUrl")]
    pub start_url: String,
    #[serde(alias = "modelName")]
    pub model_name: ModelName,
    #[serde(alias = "modelApiKey")]
    pub model_api_key: Option<String>,
    #[serde(alias = "modelClientOptions")]
    pub model_client_options: Option<JsonObject>,
    #[serde(skip_serializing, skip_deserializing)]
    pub logger: Option<LogCallback>,
    pub verbose: Verbosity,
    pub headless: bool,
    #[serde(alias = "localBrowserLaunchOptions")]
    pub local_browser_launch_options: JsonObject,
    #[serde(alias = "outputDir")]
    pub output_dir: PathBuf,
    #[serde(alias = "exitKeyword")]
    pub exit_keyword: String,
    #[serde(alias = "describeKeyword")]
    pub describe_keyword: String,
    #[serde(alias = "commandMode")]
    pub command_mode: CommandMode,
    #[serde(alias = "elementTimeoutMs")]
    pub element_timeout_ms: u64,
    #[serde(alias = "closeButtonTimeoutMs")]
    pub close_button_timeout_ms: u64,
    #[serde(alias = "challengeTimeoutMs")]
    pub challenge_timeout_ms: u64,
    #[serde(alias = "holdDurationMs")]
    pub hold_duration_ms: u64,
    #[serde(alias = "challengeSettleMs")]
    pub challenge_settle_ms: u64,
    #[serde(alias = "popupSettleMs")]
    pub popup_settle_ms: u64,
    #[serde(alias = "actionSettleMs")]
    pub action_settle_ms: u64,
    #[serde(alias = "stepSettleMs")]
    pub step_settle_ms: u64,
    #[serde(alias = "pageLoadSettleMs")]
    pub page_load_settle_ms: u64,
    #[serde(alias = "pollIntervalMs")]
    pub poll_interval_ms: u64,
}

impl Default for HelmsmanConfig {
    fn default() -> Self {
        HelmsmanConfig {
            start_url: DEFAULT_START_URL.to_string(),
            model_name: ModelName::default(),
            model_api_key: None,
            model_client_options: None,
            logger: None,
            verbose: Verbosity::default(),
            headless: false,
            local_browser_launch_options: JsonObject::new(),
            output_dir: PathBuf::from("outputs"),
            exit_keyword: "quit".to_string(),
            describe_keyword: "describe".to_string(),
            command_mode: CommandMode::default(),
            element_timeout_ms: 3_000,
            close_button_timeout_ms: 2_000,
            challenge_timeout_ms: 5_000,
            hold_duration_ms: 3_000,
            challenge_settle_ms: 4_000,
            popup_settle_ms: 1_000,
            action_settle_ms: 1_000,
            step_settle_ms: 2_000,
            page_load_settle_ms: 5_000,
            poll_interval_ms: 250,
        }
    }
}

impl HelmsmanConfig {
    /// Construct a configuration by reading relevant environment variables, after
    /// loading a `.env` file if present.
    pub fn from_env() -> Result<Self, HelmsmanConfigError> {
        let _ = dotenv();
        let mut config = HelmsmanConfig::default();

        if let Some(value) = env_var("HELMSMAN_START_URL") {
            config.start_url = value;
        }

        if let Some(value) = env_var("MODEL_API_KEY").or_else(|| env_var("OPENAI_API_KEY")) {
            config.model_api_key = Some(value);
        }

        if let Some(value) = env_var("MODEL_NAME") {
            config.model_name = ModelName::parse(&value)
                .ok_or_else(|| HelmsmanConfigError::invalid_enum("MODEL_NAME", value.clone()))?;
        }

        if let Some(value) = env_var("HELMSMAN_MODEL_CLIENT_OPTIONS") {
            config.model_client_options =
                Some(parse_json_object("HELMSMAN_MODEL_CLIENT_OPTIONS", &value)?);
        }

        if let Some(value) = env_var("HELMSMAN_VERBOSE") {
            let parsed = parse_u8("HELMSMAN_VERBOSE", &value)?;
            config.verbose = Verbosity::from_u8(parsed).ok_or_else(|| {
                HelmsmanConfigError::invalid_enum("HELMSMAN_VERBOSE", parsed.to_string())
            })?;
        }

        if let Some(value) = env_var("HELMSMAN_HEADLESS") {
            config.headless = parse_bool("HELMSMAN_HEADLESS", &value)?;
        }

        if let Some(value) = env_var("HELMSMAN_LOCAL_BROWSER_LAUNCH_OPTIONS") {
            config.local_browser_launch_options =
                parse_json_object("HELMSMAN_LOCAL_BROWSER_LAUNCH_OPTIONS", &value)?;
        }

        if let Some(value) = env_var("HELMSMAN_CHROME_BIN") {
            config
                .local_browser_launch_options
                .insert("chromeExecutable".to_string(), JsonValue::String(value));
        }

        if let Some(value) = env_var("HELMSMAN_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(value);
        }

        if let Some(value) = env_var("HELMSMAN_EXIT_KEYWORD") {
            config.exit_keyword = value;
        }

        if let Some(value) = env_var("HELMSMAN_COMMAND_MODE") {
            config.command_mode = CommandMode::parse(&value).ok_or_else(|| {
                HelmsmanConfigError::invalid_enum("HELMSMAN_COMMAND_MODE", value.clone())
            })?;
        }

        if let Some(value) = env_var("HELMSMAN_ELEMENT_TIMEOUT_MS") {
            config.element_timeout_ms = parse_u64("HELMSMAN_ELEMENT_TIMEOUT_MS", &value)?;
        }

        if let Some(value) = env_var("HELMSMAN_CLOSE_BUTTON_TIMEOUT_MS") {
            config.close_button_timeout_ms =
                parse_u64("HELMSMAN_CLOSE_BUTTON_TIMEOUT_MS", &value)?;
        }

        if let Some(value) = env_var("HELMSMAN_CHALLENGE_TIMEOUT_MS") {
            config.challenge_timeout_ms = parse_u64("HELMSMAN_CHALLENGE_TIMEOUT_MS", &value)?;
        }

        if let Some(value) = env_var("HELMSMAN_HOLD_DURATION_MS") {
            config.hold_duration_ms = parse_u64("HELMSMAN_HOLD_DURATION_MS", &value)?;
        }

        if let Some(value) = env_var("HELMSMAN_PAGE_LOAD_SETTLE_MS") {
            config.page_load_settle_ms = parse_u64("HELMSMAN_PAGE_LOAD_SETTLE_MS", &value)?;
        }

        Ok(config)
    }

    /// Create a new configuration with explicit field overrides applied.
    pub fn with_overrides(&self, overrides: HelmsmanConfigOverrides) -> HelmsmanConfig {
        let mut next = self.clone();

        if let Some(value) = overrides.start_url {
            next.start_url = value;
        }
        if let Some(value) = overrides.model_name {
            next.model_name = value;
        }
        if let Some(value) = overrides.model_api_key {
            next.model_api_key = value;
        }
        if let Some(value) = overrides.logger {
            next.logger = value;
        }
        if let Some(value) = overrides.verbose {
            next.verbose = value;
        }
        if let Some(value) = overrides.headless {
            next.headless = value;
        }
        if let Some(value) = overrides.output_dir {
            next.output_dir = value;
        }
        if let Some(value) = overrides.command_mode {
            next.command_mode = value;
        }

        next
    }

    /// Timing constants as [`Duration`]s.
    pub fn timings(&self) -> Timings {
        Timings {
            element_timeout: Duration::from_millis(self.element_timeout_ms),
            close_button_timeout: Duration::from_millis(self.close_button_timeout_ms),
            challenge_timeout: Duration::from_millis(self.challenge_timeout_ms),
            hold_duration: Duration::from_millis(self.hold_duration_ms),
            challenge_settle: Duration::from_millis(self.challenge_settle_ms),
            popup_settle: Duration::from_millis(self.popup_settle_ms),
            action_settle: Duration::from_millis(self.action_settle_ms),
            step_settle: Duration::from_millis(self.step_settle_ms),
            page_load_settle: Duration::from_millis(self.page_load_settle_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
        }
    }
}

/// Bounded waits and settle delays shared by every component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Presence wait per locator strategy.
    pub element_timeout: Duration,
    /// Clickability wait per close-button selector.
    pub close_button_timeout: Duration,
    /// Presence wait for the press-and-hold control.
    pub challenge_timeout: Duration,
    pub hold_duration: Duration,
    pub challenge_settle: Duration,
    pub popup_settle: Duration,
    pub action_settle: Duration,
    pub step_settle: Duration,
    pub page_load_settle: Duration,
    pub poll_interval: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        HelmsmanConfig::default().timings()
    }
}

/// Field-level overrides for [`HelmsmanConfig::with_overrides`].
#[derive(Default, Clone)]
pub struct HelmsmanConfigOverrides {
    pub start_url: Option<String>,
    pub model_name: Option<ModelName>,
    pub model_api_key: Option<Option<String>>,
    pub logger: Option<Option<LogCallback>>,
    pub verbose: Option<Verbosity>,
    pub headless: Option<bool>,
    pub output_dir: Option<PathBuf>,
    pub command_mode: Option<CommandMode>,
}

impl HelmsmanConfigOverrides {
    pub fn start_url(mut self, url: impl Into<String>) -> Self {
        self.start_url = Some(url.into());
        self
    }

    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = Some(headless);
        self
    }

    pub fn command_mode(mut self, mode: CommandMode) -> Self {
        self.command_mode = Some(mode);
        self
    }

    pub fn verbose(mut self, verbose: Verbosity) -> Self {
        self.verbose = Some(verbose);
        self
    }

    pub fn logger(mut self, logger: Option<LogCallback>) -> Self {
        self.logger = Some(logger);
        self
    }
}

impl fmt::Debug for HelmsmanConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HelmsmanConfig")
            .field("start_url", &self.start_url)
            .field("model_name", &self.model_name)
            .field("model_api_key", &self.model_api_key.as_ref().map(|_| "<redacted>"))
            .field("model_client_options", &self.model_client_options)
            .field("verbose", &self.verbose)
            .field("headless", &self.headless)
            .field(
                "local_browser_launch_options",
                &self.local_browser_launch_options,
            )
            .field("output_dir", &self.output_dir)
            .field("exit_keyword", &self.exit_keyword)
            .field("describe_keyword", &self.describe_keyword)
            .field("command_mode", &self.command_mode)
            .field("timings", &self.timings())
            .field("logger_present", &self.logger.is_some())
            .finish()
    }
}

impl fmt::Debug for HelmsmanConfigOverrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HelmsmanConfigOverrides")
            .field("start_url", &self.start_url)
            .field("model_name", &self.model_name)
            .field("logger", &self.logger.as_ref().map(|inner| inner.is_some()))
            .field("verbose", &self.verbose)
            .field("headless", &self.headless)
            .field("output_dir", &self.output_dir)
            .field("command_mode", &self.command_mode)
            .finish()
    }
}

/// Errors that can arise while constructing a [`HelmsmanConfig`].
#[derive(Debug, Error)]
pub enum HelmsmanConfigError {
    #[error("invalid value '{value}' for {field}")]
    InvalidEnumVariant { field: &'static str, value: String },
    #[error("invalid boolean '{value}' for {field}")]
    InvalidBool { field: &'static str, value: String },
    #[error("invalid number '{value}' for {field}: {source}")]
    InvalidNumber {
        field: &'static str,
        value: String,
        #[source]
        source: ParseIntError,
    },
    #[error("{field} must be a JSON object")]
    InvalidJsonType { field: &'static str },
    #[error("invalid JSON for {field}: {source}")]
    InvalidJson {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl HelmsmanConfigError {
    fn invalid_enum(field: &'static str, value: String) -> Self {
        HelmsmanConfigError::InvalidEnumVariant { field, value }
    }
}

fn env_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_bool(field: &'static str, value: &str) -> Result<bool, HelmsmanConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(HelmsmanConfigError::InvalidBool {
            field,
            value: value.to_string(),
        }),
    }
}

fn parse_u8(field: &'static str, value: &str) -> Result<u8, HelmsmanConfigError> {
    value
        .trim()
        .parse::<u8>()
        .map_err(|source| HelmsmanConfigError::InvalidNumber {
            field,
            value: value.to_string(),
            source,
        })
}

fn parse_u64(field: &'static str, value: &str) -> Result<u64, HelmsmanConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|source| HelmsmanConfigError::InvalidNumber {
            field,
            value: value.to_string(),
            source,
        })
}

fn parse_json_object(field: &'static str, value: &str) -> Result<JsonObject, HelmsmanConfigError> {
    let parsed: JsonValue = serde_json::from_str(value)
        .map_err(|source| HelmsmanConfigError::InvalidJson { field, source })?;
    match parsed {
        JsonValue::Object(map) => Ok(map),
        _ => Err(HelmsmanConfigError::InvalidJsonType { field }),
    }
}
