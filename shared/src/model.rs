use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::fmt;

use crate::event::Command;
use crate::onboarding::LawyerApplication;
use crate::{AppError, ErrorKind, FieldError, Recovery, MAX_ID_LENGTH};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{kind} cannot be empty")]
    EmptyId { kind: &'static str },
    #[error("{kind} is too long ({len} > {max})")]
    IdTooLong {
        kind: &'static str,
        len: usize,
        max: usize,
    },
    #[error("{kind} contains control characters")]
    InvalidId { kind: &'static str },
    #[error("{field} is required")]
    Required { field: &'static str },
    #[error("{field} is too long ({len} > {max})")]
    TooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
}

impl ValidationError {
    fn field(&self) -> &'static str {
        match self {
            Self::EmptyId { kind } | Self::IdTooLong { kind, .. } | Self::InvalidId { kind } => {
                *kind
            }
            Self::Required { field } | Self::TooLong { field, .. } => *field,
        }
    }
}

impl From<ValidationError> for AppError {
    fn from(e: ValidationError) -> Self {
        AppError::validation(vec![FieldError::new(e.field(), e.to_string())])
    }
}

// --- Typed IDs: opaque, non-empty, validated on decode ---

macro_rules! typed_id {
    ($name:ident, $label:literal) => {
        #[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Result<Self, ValidationError> {
                let s = s.into();
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Err(ValidationError::EmptyId { kind: $label });
                }
                if trimmed.len() > MAX_ID_LENGTH {
                    return Err(ValidationError::IdTooLong {
                        kind: $label,
                        len: trimmed.len(),
                        max: MAX_ID_LENGTH,
                    });
                }
                if trimmed.chars().any(char::is_control) {
                    return Err(ValidationError::InvalidId { kind: $label });
                }
                Ok(Self(trimmed.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::new(s)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

typed_id!(TaskId, "task id");
typed_id!(CaseId, "case id");
typed_id!(DocumentId, "document id");
typed_id!(TicketId, "ticket id");
typed_id!(MessageId, "message id");
typed_id!(UserId, "user id");

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Client,
    Lawyer,
}

// --- Tasks ---

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const GENERIC_TASK_FAILURE: &str = "The analysis could not be completed.";

/// Body of `GET /tasks/{id}`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TaskStatusResponse {
    pub status: TaskStatus,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// A backend job as last observed by the client. `error` is set iff the
/// status is `failed`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl Task {
    #[must_use]
    pub fn from_response(id: TaskId, resp: TaskStatusResponse) -> Self {
        let error = match resp.status {
            TaskStatus::Failed => Some(
                resp.error
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or_else(|| GENERIC_TASK_FAILURE.to_string()),
            ),
            _ => None,
        };
        Self {
            id,
            status: resp.status,
            result: resp.result,
            error,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    #[must_use]
    pub fn result_field(&self, key: &str) -> Option<&Value> {
        self.result.as_ref().and_then(|r| r.get(key))
    }

    #[must_use]
    pub fn result_str(&self, key: &str) -> Option<&str> {
        self.result_field(key).and_then(Value::as_str)
    }
}

// --- Server records (read-only mirrors) ---

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Draft,
    Open,
    Matched,
    InProgress,
    Closed,
    #[serde(other)]
    Unknown,
}

impl CaseStatus {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Draft => "Draft",
            Self::Open => "Open",
            Self::Matched => "Matched",
            Self::InProgress => "In progress",
            Self::Closed => "Closed",
            Self::Unknown => "Unknown",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Case {
    pub id: CaseId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: CaseStatus,
    #[serde(default)]
    pub category: Option<String>,
    pub client_id: UserId,
    #[serde(default)]
    pub lawyer_id: Option<UserId>,
    pub created_at: String,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct NewCase {
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CaseAnalysis {
    pub case_id: CaseId,
    pub summary: String,
    #[serde(default)]
    pub key_issues: Vec<String>,
    #[serde(default)]
    pub recommended_actions: Vec<String>,
    #[serde(default)]
    pub applicable_laws: Vec<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub generated_at: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Document {
    pub id: DocumentId,
    pub case_id: CaseId,
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub storage_path: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub checksum: Option<String>,
    pub uploaded_at: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct NewDocumentRecord {
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub storage_path: String,
    pub url: String,
    pub checksum: String,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    InProgress,
    Resolved,
    Closed,
}

impl TicketStatus {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Open => "Open",
            Self::InProgress => "In progress",
            Self::Resolved => "Resolved",
            Self::Closed => "Closed",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TicketPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Ticket {
    pub id: TicketId,
    pub subject: String,
    pub description: String,
    pub status: TicketStatus,
    #[serde(default)]
    pub priority: TicketPriority,
    pub created_at: String,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct NewTicket {
    pub subject: String,
    pub description: String,
    #[serde(default)]
    pub priority: TicketPriority,
    #[serde(default)]
    pub case_id: Option<CaseId>,
}

impl NewTicket {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let subject = self.subject.trim();
        if subject.is_empty() {
            return Err(ValidationError::Required { field: "subject" });
        }
        let len = subject.chars().count();
        if len > crate::MAX_TICKET_SUBJECT_LENGTH {
            return Err(ValidationError::TooLong {
                field: "subject",
                len,
                max: crate::MAX_TICKET_SUBJECT_LENGTH,
            });
        }
        if self.description.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "description",
            });
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub case_id: CaseId,
    pub sender_id: UserId,
    pub body: String,
    pub created_at: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LawyerMatch {
    pub lawyer_id: UserId,
    pub name: String,
    pub score: f32,
    #[serde(default)]
    pub specialties: Vec<String>,
    #[serde(default)]
    pub years_experience: Option<u32>,
    #[serde(default)]
    pub hourly_rate_cents: Option<u64>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct VideoSession {
    pub room_url: String,
    #[serde(default)]
    pub tokens: HashMap<UserRole, String>,
    #[serde(default)]
    pub expires_at: Option<String>,
}

impl VideoSession {
    #[must_use]
    pub fn token_for(&self, role: UserRole) -> Option<&str> {
        self.tokens.get(&role).map(String::as_str)
    }
}

// --- Local view state ---

/// What a screen shows after a failure: message, code and the affordance
/// the shell offers (retry, go back, ...).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UserFacingError {
    pub message: String,
    pub error_code: String,
    pub is_retryable: bool,
    pub recovery: Recovery,
    pub field_errors: Vec<FieldError>,
}

impl From<&AppError> for UserFacingError {
    fn from(e: &AppError) -> Self {
        Self {
            message: e.user_facing_message(),
            error_code: e.code().to_string(),
            is_retryable: e.is_retryable(),
            recovery: e.kind.recovery(),
            field_errors: e.field_errors.clone(),
        }
    }
}

impl UserFacingError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.error_code == ErrorKind::NotFound.code()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Loadable<T> {
    Idle,
    Loading,
    Loaded(T),
    Failed(UserFacingError),
}

impl<T> Default for Loadable<T> {
    fn default() -> Self {
        Self::Idle
    }
}

impl<T> Loadable<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Loaded(v) => Some(v),
            _ => None,
        }
    }

    pub fn value_mut(&mut self) -> Option<&mut T> {
        match self {
            Self::Loaded(v) => Some(v),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&UserFacingError> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    /// Starts a fetch. A refresh keeps showing what is already loaded.
    pub fn begin(&mut self) {
        if !matches!(self, Self::Loaded(_)) {
            *self = Self::Loading;
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoadStatus {
    #[default]
    Idle,
    Loading,
    Ready,
}

/// Chat transcript for the open case. Kept separate from `Loadable` because
/// pushed messages may arrive before the initial fetch completes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChatState {
    pub messages: Vec<Message>,
    pub status: LoadStatus,
    pub error: Option<UserFacingError>,
    pub sending: bool,
}

impl ChatState {
    /// Inserts or replaces by message id, keeping the transcript ordered by
    /// `created_at`. Returns true when the message was new.
    pub fn upsert(&mut self, message: Message) -> bool {
        if let Some(existing) = self.messages.iter_mut().find(|m| m.id == message.id) {
            *existing = message;
            return false;
        }
        let pos = self
            .messages
            .partition_point(|m| m.created_at <= message.created_at);
        self.messages.insert(pos, message);
        true
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TriageState {
    pub task_id: Option<TaskId>,
    pub task: Option<Task>,
    pub is_polling: bool,
    pub starting: bool,
    pub last_poll_error: Option<String>,
}

impl TriageState {
    pub fn status(&self) -> Option<TaskStatus> {
        self.task.as_ref().map(|t| t.status)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CaseScreen {
    pub case_id: Option<CaseId>,
    pub case: Loadable<Case>,
    pub analysis: Loadable<CaseAnalysis>,
    pub documents: Loadable<Vec<Document>>,
    pub matches: Loadable<Vec<LawyerMatch>>,
    pub chat: ChatState,
    pub triage: TriageState,
    pub video: Loadable<VideoSession>,
    pub uploading: bool,
    pub refreshing: bool,
}

impl CaseScreen {
    #[must_use]
    pub fn open(case_id: CaseId) -> Self {
        Self {
            case_id: Some(case_id),
            case: Loadable::Loading,
            analysis: Loadable::Loading,
            documents: Loadable::Loading,
            matches: Loadable::Loading,
            chat: ChatState {
                status: LoadStatus::Loading,
                ..ChatState::default()
            },
            ..Self::default()
        }
    }

    pub fn is_showing(&self, case_id: &CaseId) -> bool {
        self.case_id.as_ref() == Some(case_id)
    }

    /// The server reported the open case as deleted.
    pub fn is_gone(&self) -> bool {
        self.case.error().is_some_and(UserFacingError::is_not_found)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TicketScreen {
    pub tickets: Loadable<Vec<Ticket>>,
    pub refreshing: bool,
    pub open_ticket: Option<TicketId>,
    pub creating: bool,
    pub form_errors: Vec<FieldError>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct OnboardingScreen {
    pub submitting: bool,
    pub submitted: bool,
    pub field_errors: Vec<FieldError>,
    pub draft: Option<LawyerApplication>,
}

/// A destructive action waiting for the user to confirm it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PendingConfirmation {
    DeleteDocument {
        document_id: DocumentId,
        storage_path: String,
        file_name: String,
    },
    DeleteTask {
        task_id: TaskId,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct SessionInfo {
    pub user_id: UserId,
    pub role: UserRole,
}

#[derive(Clone, Debug, Default)]
pub struct Model {
    pub session: Option<SessionInfo>,

    pub cases: Loadable<Vec<Case>>,
    pub cases_refreshing: bool,

    pub case_screen: CaseScreen,
    pub tickets: TicketScreen,
    pub onboarding: OnboardingScreen,

    /// One-shot alert (task failure, failed write). Cleared on dismiss.
    pub alert: Option<UserFacingError>,
    pub pending_confirmation: Option<PendingConfirmation>,

    /// Work the reducer asked the host to perform, in order.
    pub outbox: VecDeque<Command>,

    /// Bumped on every sign-out. Results of work started under an older
    /// generation belong to an ended session and must not be applied.
    pub session_generation: u64,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_command(&mut self, command: Command) {
        self.outbox.push_back(command);
    }

    pub fn drain_commands(&mut self) -> Vec<Command> {
        self.outbox.drain(..).collect()
    }

    pub fn is_signed_in(&self) -> bool {
        self.session.is_some()
    }

    pub fn current_case(&self) -> Option<&CaseId> {
        self.case_screen.case_id.as_ref()
    }

    /// Drops every piece of session state and starts a new generation.
    pub fn reset_session(&mut self) {
        let session_generation = self.session_generation.wrapping_add(1);
        *self = Self {
            session_generation,
            ..Self::default()
        };
    }
}
