//! Diagnostics for the Percy SDK.
//!
//! Every notable event becomes a single-line, leveled record. Records go to an
//! external callback when one is configured, otherwise to the console using
//! the familiar `[percy] message` format.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Verbosity;

/// Convenience alias for external logging callbacks.
pub type LogCallback = Arc<dyn Fn(&PercyLogRecord) + Send + Sync + 'static>;

const LABEL: &str = "percy";
const DEBUG_LABEL: &str = "percy:rust";

/// Logging configuration shared by a [`Percy`](crate::percy::Percy) instance.
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

/// Log severity.
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
pub struct PercyLogRecord {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub level: LogLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl PercyLogRecord {
    pub fn new(message: impl Into<String>, level: LogLevel, category: Option<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
            level,
            category,
        }
    }
}

fn label_for(verbose: Verbosity) -> &'static str {
    if verbose == Verbosity::Detailed {
        DEBUG_LABEL
    } else {
        LABEL
    }
}

/// Console rendering of a record: `[label] message`, label in magenta.
pub fn format_console(label: &str, record: &PercyLogRecord) -> String {
    format!("[\u{1b}[35m{label}\u{1b}[39m] {}", record.message)
}

fn console_handler(label: &'static str) -> LogCallback {
    Arc::new(move |record: &PercyLogRecord| {
        println!("{}", format_console(label, record));
    })
}

/// SDK logger writing to an external callback or the console.
pub struct PercyLogger {
    config: LogConfig,
    default_handler: LogCallback,
}

impl fmt::Debug for PercyLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PercyLogger")
            .field("verbosity", &self.config.verbose)
            .field("external_logger", &self.config.external_logger.is_some())
            .finish()
    }
}

impl PercyLogger {
    pub fn with_config(config: LogConfig) -> Self {
        let default_handler = console_handler(label_for(config.verbose));
        Self {
            config,
            default_handler,
        }
    }

    pub fn new(verbose: Verbosity) -> Self {
        Self::with_config(LogConfig::new(verbose))
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    pub fn log(&self, message: impl Into<String>, level: LogLevel, category: Option<&str>) {
        if !self.config.should_log(level) {
            return;
        }

        let record = PercyLogRecord::new(message, level, category.map(|c| c.to_string()));

        if let Some(callback) = &self.config.external_logger {
            callback(&record);
        } else {
            (self.default_handler)(&record);
        }
    }

    pub fn error(&self, message: impl Into<String>, category: Option<&str>) {
        self.log(message, LogLevel::Error, category);
    }

    pub fn info(&self, message: impl Into<String>, category: Option<&str>) {
        self.log(message, LogLevel::Info, category);
    }

    pub fn debug(&self, message: impl Into<String>, category: Option<&str>) {
        self.log(message, LogLevel::Debug, category);
    }
}
