//! Structured logging for the command loop.
//!
//! Every component logs through [`HelmsmanLogger`] with a category naming the
//! stage that produced the record. An external sink can be installed so the
//! binary (or a test) receives records instead of the console printer.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{HelmsmanConfig, Verbosity};

/// Convenience alias for external logging callbacks.
pub type LogCallback = Arc<dyn Fn(&HelmsmanLogRecord) + Send + Sync + 'static>;

pub const CATEGORY_RESOLVE: &str = "resolve";
pub const CATEGORY_OBSTACLE: &str = "obstacle";
pub const CATEGORY_SYNTHESIZE: &str = "synthesize";
pub const CATEGORY_EXECUTE: &str = "execute";
pub const CATEGORY_DECOMPOSE: &str = "decompose";
pub const CATEGORY_SESSION: &str = "session";
pub const CATEGORY_LLM: &str = "llm";
pub const CATEGORY_BROWSER: &str = "browser";

#[derive(Clone, Default)]
pub struct LogConfig {
    pub verbose: Verbosity,
    pub external_logger: Option<LogCallback>,
}

impl LogConfig {
    pub fn new(verbose: Verbosity) -> Self {
        Self {
            verbose,
            ..Default::default()
        }
    }

    pub fn should_log(&self, level: LogLevel) -> bool {
        level == LogLevel::Error || level.as_u8() <= verbosity_to_u8(self.verbose)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error = 0,
    Info = 1,
    Debug = 2,
}

impl LogLevel {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

fn verbosity_to_u8(verbose: Verbosity) -> u8 {
    match verbose {
        Verbosity::Minimal => 0,
        Verbosity::Medium => 1,
        Verbosity::Detailed => 2,
    }
}

/// Structured log entry shared with external callbacks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HelmsmanLogRecord {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub level: LogLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auxiliary: Option<Value>,
}

impl HelmsmanLogRecord {
    pub fn new(
        message: impl Into<String>,
        level: LogLevel,
        category: Option<String>,
        auxiliary: Option<Value>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
            level,
            category,
            auxiliary,
        }
    }
}

/// Console printer used when no external logger is configured.
pub fn default_log_handler(record: &HelmsmanLogRecord) {
    let timestamp = record
        .timestamp
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    match &record.category {
        Some(category) => println!(
            "[{}] {:<5} [{}] {}",
            timestamp,
            record.level.label(),
            category,
            record.message
        ),
        None => println!(
            "[{}] {:<5} {}",
            timestamp,
            record.level.label(),
            record.message
        ),
    }
    if let Some(aux) = &record.auxiliary {
        if !aux.is_null() {
            println!("    {}", aux);
        }
    }
}

pub struct HelmsmanLogger {
    config: LogConfig,
    default_handler: LogCallback,
}

impl fmt::Debug for HelmsmanLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HelmsmanLogger")
            .field("verbosity", &self.config.verbose)
            .field("external_logger", &self.config.external_logger.is_some())
            .finish()
    }
}

impl HelmsmanLogger {
    pub fn with_config(config: LogConfig) -> Self {
        Self {
            config,
            default_handler: Arc::new(default_log_handler),
        }
    }

    pub fn new(verbose: Verbosity) -> Self {
        Self::with_config(LogConfig::new(verbose))
    }

    /// Logger honouring the configured verbosity and external sink.
    pub fn from_config(config: &HelmsmanConfig) -> Self {
        Self::with_config(LogConfig {
            verbose: config.verbose,
            external_logger: config.logger.clone(),
        })
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    pub fn set_verbose(&mut self, verbose: Verbosity) {
        self.config.verbose = verbose;
    }

    pub fn set_external_logger(&mut self, logger: Option<LogCallback>) {
        self.config.external_logger = logger;
    }

    pub fn log(
        &self,
        message: impl Into<String>,
        level: LogLevel,
        category: Option<&str>,
        auxiliary: Option<Value>,
    ) {
        if !self.config.should_log(level) {
            return;
        }

        let record =
            HelmsmanLogRecord::new(message, level, category.map(|c| c.to_string()), auxiliary);

        if let Some(callback) = &self.config.external_logger {
            callback(&record);
        } else {
            (self.default_handler)(&record);
        }
    }

    pub fn error(
        &self,
        message: impl Into<String>,
        category: Option<&str>,
        auxiliary: Option<Value>,
    ) {
        self.log(message, LogLevel::Error, category, auxiliary);
    }

    pub fn info(
        &self,
        message: impl Into<String>,
        category: Option<&str>,
        auxiliary: Option<Value>,
    ) {
        self.log(message, LogLevel::Info, category, auxiliary);
    }

    pub fn debug(
        &self,
        message: impl Into<String>,
        category: Option<&str>,
        auxiliary: Option<Value>,
    ) {
        self.log(message, LogLevel::Debug, category, auxiliary);
    }
}

/// Logger that records into a shared vector; used by unit and integration tests.
#[doc(hidden)]
pub fn capturing_logger(
    verbose: Verbosity,
) -> (
    Arc<HelmsmanLogger>,
    Arc<std::sync::Mutex<Vec<HelmsmanLogRecord>>>,
) {
    let records = Arc::new(std::sync::Mutex::new(Vec::new()));
    let capture = Arc::clone(&records);
    let callback: LogCallback = Arc::new(move |record| {
        if let Ok(mut guard) = capture.lock() {
            guard.push(record.clone());
        }
    });
    let logger = HelmsmanLogger::with_config(LogConfig {
        verbose,
        external_logger: Some(callback),
    });
    (Arc::new(logger), records)
}
