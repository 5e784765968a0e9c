use serde::{Deserialize, Serialize};

use crate::capabilities::{ChannelScope, RealtimeEvent};
use crate::model::{
    Case, CaseAnalysis, CaseId, Document, DocumentId, LawyerMatch, Message, NewTicket, TaskId,
    Ticket, TicketId, UserId, UserRole, VideoSession,
};
use crate::onboarding::LawyerApplication;
use crate::poller::PollSnapshot;
use crate::AppResult;

// --- Event enum: every mutation of the view state goes through one of these ---

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum Event {
    // Session lifecycle
    SessionStarted {
        user_id: UserId,
        role: UserRole,
    },
    SessionEnded,

    // Case list
    CasesRequested,
    CasesRefreshRequested,
    CasesLoaded(Box<AppResult<Vec<Case>>>),

    // Case detail
    CaseOpened {
        case_id: CaseId,
    },
    CaseClosed,
    CaseRefreshRequested,
    CaseLoaded {
        case_id: CaseId,
        result: Box<AppResult<Case>>,
    },
    AnalysisLoaded {
        case_id: CaseId,
        result: Box<AppResult<CaseAnalysis>>,
    },
    DocumentsLoaded {
        case_id: CaseId,
        result: Box<AppResult<Vec<Document>>>,
    },
    MatchesLoaded {
        case_id: CaseId,
        result: Box<AppResult<Vec<LawyerMatch>>>,
    },
    MessagesLoaded {
        case_id: CaseId,
        result: Box<AppResult<Vec<Message>>>,
    },

    // AI triage
    TriageRequested,
    TriageStarted {
        case_id: CaseId,
        result: Box<AppResult<TaskId>>,
    },
    TaskObserved(Box<PollSnapshot>),
    TaskDeleted {
        task_id: TaskId,
        result: Box<AppResult<()>>,
    },

    // Documents
    DocumentUploadStarted {
        case_id: CaseId,
        file_name: String,
    },
    DocumentUploaded {
        case_id: CaseId,
        result: Box<AppResult<Document>>,
    },
    DocumentDeleted {
        document_id: DocumentId,
        result: Box<AppResult<()>>,
    },

    // Destructive actions are confirmed first
    DeleteDocumentRequested {
        document_id: DocumentId,
    },
    DeleteTaskRequested,
    DeleteConfirmed,
    DeleteCancelled,

    // Chat
    MessageSendRequested {
        body: String,
    },
    MessageSent {
        case_id: CaseId,
        result: Box<AppResult<Message>>,
    },

    // Pushed from an open realtime channel
    RealtimeReceived {
        scope: ChannelScope,
        event: Box<RealtimeEvent>,
    },
    RealtimeFailed {
        scope: ChannelScope,
        error: Box<crate::AppError>,
    },

    // Support tickets
    TicketsRequested,
    TicketsRefreshRequested,
    TicketsLoaded(Box<AppResult<Vec<Ticket>>>),
    TicketCreateRequested(Box<NewTicket>),
    TicketCreated(Box<AppResult<Ticket>>),
    TicketOpened {
        ticket_id: TicketId,
    },
    TicketClosed,

    // Video consultation
    VideoSessionRequested,
    VideoSessionReady {
        case_id: CaseId,
        result: Box<AppResult<VideoSession>>,
    },

    // Lawyer onboarding
    LawyerApplicationSubmitted(Box<LawyerApplication>),
    LawyerApplicationResult(Box<AppResult<()>>),

    AlertDismissed,
}

impl Event {
    /// Short name for logs; payloads may carry user content.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SessionStarted { .. } => "session_started",
            Self::SessionEnded => "session_ended",
            Self::CasesRequested => "cases_requested",
            Self::CasesRefreshRequested => "cases_refresh_requested",
            Self::CasesLoaded(_) => "cases_loaded",
            Self::CaseOpened { .. } => "case_opened",
            Self::CaseClosed => "case_closed",
            Self::CaseRefreshRequested => "case_refresh_requested",
            Self::CaseLoaded { .. } => "case_loaded",
            Self::AnalysisLoaded { .. } => "analysis_loaded",
            Self::DocumentsLoaded { .. } => "documents_loaded",
            Self::MatchesLoaded { .. } => "matches_loaded",
            Self::MessagesLoaded { .. } => "messages_loaded",
            Self::TriageRequested => "triage_requested",
            Self::TriageStarted { .. } => "triage_started",
            Self::TaskObserved(_) => "task_observed",
            Self::TaskDeleted { .. } => "task_deleted",
            Self::DocumentUploadStarted { .. } => "document_upload_started",
            Self::DocumentUploaded { .. } => "document_uploaded",
            Self::DocumentDeleted { .. } => "document_deleted",
            Self::DeleteDocumentRequested { .. } => "delete_document_requested",
            Self::DeleteTaskRequested => "delete_task_requested",
            Self::DeleteConfirmed => "delete_confirmed",
            Self::DeleteCancelled => "delete_cancelled",
            Self::MessageSendRequested { .. } => "message_send_requested",
            Self::MessageSent { .. } => "message_sent",
            Self::RealtimeReceived { .. } => "realtime_received",
            Self::RealtimeFailed { .. } => "realtime_failed",
            Self::TicketsRequested => "tickets_requested",
            Self::TicketsRefreshRequested => "tickets_refresh_requested",
            Self::TicketsLoaded(_) => "tickets_loaded",
            Self::TicketCreateRequested(_) => "ticket_create_requested",
            Self::TicketCreated(_) => "ticket_created",
            Self::TicketOpened { .. } => "ticket_opened",
            Self::TicketClosed => "ticket_closed",
            Self::VideoSessionRequested => "video_session_requested",
            Self::VideoSessionReady { .. } => "video_session_ready",
            Self::LawyerApplicationSubmitted(_) => "lawyer_application_submitted",
            Self::LawyerApplicationResult(_) => "lawyer_application_result",
            Self::AlertDismissed => "alert_dismissed",
        }
    }
}

/// Side effects requested by the reducer. The host executes them in order
/// and feeds the outcome back as an [`Event`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum Command {
    FetchCases,
    FetchCase(CaseId),
    FetchAnalysis(CaseId),
    FetchDocuments(CaseId),
    FetchMatches(CaseId),
    FetchMessages(CaseId),
    SubscribeCase(CaseId),
    ReleaseCaseChannel,

    StartTriage(CaseId),
    PollTask(TaskId),
    CancelPolling,
    DeleteTask(TaskId),

    DeleteDocument {
        document_id: DocumentId,
        storage_path: String,
    },

    SendMessage {
        case_id: CaseId,
        body: String,
    },

    FetchTickets,
    CreateTicket(NewTicket),
    SubscribeTicket(TicketId),
    ReleaseTicketChannel,

    CreateVideoSession(CaseId),
    SubmitLawyerApplication(LawyerApplication),

    ReleaseAll,
}
