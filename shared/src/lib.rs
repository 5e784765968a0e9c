// lib.rs - LexConnect shared core

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod api;
pub mod capabilities;
pub mod config;
pub mod documents;
pub mod event;
pub mod logging;
pub mod model;
pub mod onboarding;
pub mod poller;
pub mod realtime;
pub mod session;
pub mod store;
pub mod update;
pub mod view;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub use app::App;
pub use capabilities::{Capabilities, Effect};
pub use crux_core::{render::Render, App as CruxApp};
pub use event::{Command, Event};
pub use model::Model;
pub use view::ViewModel;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2_500);
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(250);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const UPLOAD_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
pub const MAX_DOCUMENT_BYTES: usize = 25 * 1024 * 1024;
pub const MAX_MESSAGE_LENGTH: usize = 4_000;
pub const MAX_TICKET_SUBJECT_LENGTH: usize = 200;
pub const DESCRIPTION_PREVIEW_LENGTH: usize = 80;
pub const MAX_ID_LENGTH: usize = 128;

pub const DEFAULT_UPLOAD_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "image/jpeg",
    "image/png",
    "image/heic",
    "text/plain",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Transient,
    Permanent,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Network,
    Timeout,
    Authentication,
    Authorization,
    Validation,
    NotFound,
    Conflict,
    RateLimited,
    Server,
    Serialization,
    Deserialization,
    TaskFailed,
    Cancelled,
    Storage,
    Realtime,
    Configuration,
    InvalidState,
    Unknown,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Network => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Authentication => "AUTH_ERROR",
            Self::Authorization => "FORBIDDEN",
            Self::Validation => "VALIDATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::RateLimited => "RATE_LIMITED",
            Self::Server => "SERVER_ERROR",
            Self::Serialization => "SERIALIZATION_ERROR",
            Self::Deserialization => "DESERIALIZATION_ERROR",
            Self::TaskFailed => "TASK_FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Storage => "STORAGE_ERROR",
            Self::Realtime => "REALTIME_ERROR",
            Self::Configuration => "CONFIG_ERROR",
            Self::InvalidState => "INVALID_STATE",
            Self::Unknown => "UNKNOWN_ERROR",
        }
    }

    #[must_use]
    pub const fn default_severity(self) -> ErrorSeverity {
        match self {
            Self::Network
            | Self::Timeout
            | Self::Conflict
            | Self::RateLimited
            | Self::Server
            | Self::Storage
            | Self::Realtime
            | Self::Cancelled => ErrorSeverity::Transient,

            Self::Serialization
            | Self::Deserialization
            | Self::Configuration
            | Self::InvalidState => ErrorSeverity::Fatal,

            Self::Authentication
            | Self::Authorization
            | Self::Validation
            | Self::NotFound
            | Self::TaskFailed
            | Self::Unknown => ErrorSeverity::Permanent,
        }
    }

    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Network
                | Self::Timeout
                | Self::RateLimited
                | Self::Server
                | Self::Storage
                | Self::Realtime
                | Self::Conflict
        )
    }

    /// What the screen offers the user once this error lands in view state.
    #[must_use]
    pub const fn recovery(self) -> Recovery {
        match self {
            Self::NotFound => Recovery::GoBack,
            Self::Authentication => Recovery::SignIn,
            Self::Validation => Recovery::FixInput,
            Self::TaskFailed | Self::Authorization => Recovery::Dismiss,
            _ if self.is_retryable() => Recovery::Retry,
            _ => Recovery::Dismiss,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Recovery {
    Retry,
    GoBack,
    SignIn,
    FixInput,
    Dismiss,
}

/// A validation failure attached to one form field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub severity: ErrorSeverity,
    pub message: String,
    pub internal_message: Option<String>,
    pub retry_after_ms: Option<u64>,
    pub field_errors: Vec<FieldError>,
    pub context: HashMap<String, String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            message: message.into(),
            internal_message: None,
            retry_after_ms: None,
            field_errors: Vec::new(),
            context: HashMap::new(),
        }
    }

    #[must_use]
    pub fn not_found(what: &str, id: &str) -> Self {
        Self::new(ErrorKind::NotFound, format!("{what} {id} does not exist"))
            .with_context("entity", what)
            .with_context("id", id)
    }

    #[must_use]
    pub fn validation(field_errors: Vec<FieldError>) -> Self {
        let message = field_errors
            .first()
            .map_or_else(|| "Invalid input".to_string(), |e| e.message.clone());
        let mut err = Self::new(ErrorKind::Validation, message);
        err.field_errors = field_errors;
        err
    }

    #[must_use]
    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal_message = Some(internal.into());
        self
    }

    #[must_use]
    pub fn with_retry_after(mut self, ms: u64) -> Self {
        self.retry_after_ms = Some(ms);
        self
    }

    #[must_use]
    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable() && !matches!(self.severity, ErrorSeverity::Fatal)
    }

    #[must_use]
    pub fn field_error(&self, field: &str) -> Option<&str> {
        self.field_errors
            .iter()
            .find(|e| e.field == field)
            .map(|e| e.message.as_str())
    }

    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self.kind {
            ErrorKind::Network => {
                "Unable to connect. Please check your internet connection and try again.".into()
            }
            ErrorKind::Timeout => "The request timed out. Please try again.".into(),
            ErrorKind::Authentication => {
                "Your session has expired. Please sign in again.".into()
            }
            ErrorKind::Authorization => {
                "You don't have permission to perform this action.".into()
            }
            ErrorKind::Validation | ErrorKind::TaskFailed => self.message.clone(),
            ErrorKind::NotFound => "This item is no longer available.".into(),
            ErrorKind::Conflict => {
                "This action conflicts with a recent change. Please refresh and try again.".into()
            }
            ErrorKind::RateLimited => {
                if let Some(retry_after) = self.retry_after_ms {
                    let seconds = retry_after / 1000;
                    format!("Too many requests. Please wait {seconds} seconds and try again.")
                } else {
                    "Too many requests. Please wait a moment and try again.".into()
                }
            }
            ErrorKind::Server => {
                "Something went wrong on our side. Please try again shortly.".into()
            }
            ErrorKind::Storage => "The file could not be stored. Please try again.".into(),
            ErrorKind::Realtime => "Live updates are unavailable right now.".into(),
            ErrorKind::Cancelled => "The operation was cancelled.".into(),
            ErrorKind::Serialization | ErrorKind::Deserialization => {
                "A data error occurred. Please contact support if this persists.".into()
            }
            ErrorKind::Configuration | ErrorKind::InvalidState => {
                "The app is in an invalid state. Please restart the app.".into()
            }
            ErrorKind::Unknown => {
                "An unexpected error occurred. Please try again or contact support.".into()
            }
        }
    }

    #[must_use]
    pub fn from_http_status(status: u16, body: Option<&[u8]>) -> Self {
        let kind = match status {
            400 | 422 => ErrorKind::Validation,
            401 => ErrorKind::Authentication,
            403 => ErrorKind::Authorization,
            404 | 410 => ErrorKind::NotFound,
            408 => ErrorKind::Timeout,
            409 => ErrorKind::Conflict,
            429 => ErrorKind::RateLimited,
            500..=599 => ErrorKind::Server,
            _ => ErrorKind::Unknown,
        };

        let parsed = body.and_then(|b| serde_json::from_slice::<ApiErrorResponse>(b).ok());

        let mut err = match parsed {
            Some(resp) => {
                let message = if resp.message.is_empty() {
                    format!("HTTP error: {status}")
                } else {
                    resp.message
                };
                let mut err = Self::new(kind, message);
                err.field_errors = resp.errors;
                if let Some(code) = resp.code {
                    err = err.with_context("api_code", code);
                }
                if let Some(retry_after_ms) = resp.retry_after_ms {
                    err = err.with_retry_after(retry_after_ms);
                }
                err
            }
            None => Self::new(kind, format!("HTTP error: {status}")),
        };

        err.context.insert("http_status".into(), status.to_string());
        err
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)?;
        if let Some(internal) = &self.internal_message {
            write!(f, " (internal: {internal})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiErrorResponse {
    #[serde(default, alias = "error")]
    message: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    errors: Vec<FieldError>,
    #[serde(default)]
    retry_after_ms: Option<u64>,
}

pub type AppResult<T> = Result<T, AppError>;

#[must_use]
pub fn text_preview(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let mut preview: String = text.chars().take(max_len.saturating_sub(3)).collect();
    preview.push_str("...");
    preview
}

#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_file_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    let b = bytes as f64;
    if b < KB {
        format!("{bytes} B")
    } else if b < MB {
        format!("{:.0} KB", b / KB)
    } else {
        format!("{:.1} MB", b / MB)
    }
}

pub mod app {
    use super::{Capabilities, Event, Model, ViewModel};

    #[derive(Default)]
    pub struct App;

    impl crux_core::App for App {
        type Event = Event;
        type Model = Model;
        type ViewModel = ViewModel;
        type Capabilities = Capabilities;

        fn update(&self, event: Event, model: &mut Model, caps: &Capabilities) {
            model.update(event);
            for command in model.drain_commands() {
                caps.host.execute(command);
            }
            caps.render.render();
        }

        fn view(&self, model: &Model) -> ViewModel {
            ViewModel::from(model)
        }
    }
}
