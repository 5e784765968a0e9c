//! Serializable projection of [`Model`] rendered by the shell.

use serde::{Deserialize, Serialize};

use crate::model::{
    Case, CaseAnalysis, ChatState, Document, LawyerMatch, LoadStatus, Loadable, Model,
    PendingConfirmation, TaskStatus, Ticket, TicketPriority, TriageState, UserFacingError,
    UserId, UserRole, VideoSession,
};
use crate::{format_file_size, text_preview, FieldError, DESCRIPTION_PREVIEW_LENGTH};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SliceState {
    #[default]
    Idle,
    Loading,
    Ready,
    Failed,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SliceView<T> {
    pub state: SliceState,
    pub data: Option<T>,
    pub error: Option<UserFacingError>,
    pub refreshing: bool,
}

impl<T> Default for SliceView<T> {
    fn default() -> Self {
        Self {
            state: SliceState::Idle,
            data: None,
            error: None,
            refreshing: false,
        }
    }
}

impl<T> SliceView<T> {
    fn project<'a, S>(slice: &'a Loadable<S>, refreshing: bool, f: impl FnOnce(&'a S) -> T) -> Self {
        match slice {
            Loadable::Idle => Self::default(),
            Loadable::Loading => Self {
                state: SliceState::Loading,
                ..Self::default()
            },
            Loadable::Loaded(value) => Self {
                state: SliceState::Ready,
                data: Some(f(value)),
                error: None,
                refreshing,
            },
            Loadable::Failed(err) => Self {
                state: SliceState::Failed,
                error: Some(err.clone()),
                ..Self::default()
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CaseView {
    pub id: String,
    pub title: String,
    pub status: String,
    pub description_preview: Option<String>,
    pub category: Option<String>,
    pub created_at: String,
    pub has_lawyer: bool,
}

impl From<&Case> for CaseView {
    fn from(case: &Case) -> Self {
        Self {
            id: case.id.to_string(),
            title: case.title.clone(),
            status: case.status.label().to_string(),
            description_preview: case
                .description
                .as_deref()
                .map(|d| text_preview(d, DESCRIPTION_PREVIEW_LENGTH)),
            category: case.category.clone(),
            created_at: case.created_at.clone(),
            has_lawyer: case.lawyer_id.is_some(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AnalysisView {
    pub summary: String,
    pub key_issues: Vec<String>,
    pub recommended_actions: Vec<String>,
    pub applicable_laws: Vec<String>,
    pub confidence_percent: Option<u8>,
}

impl From<&CaseAnalysis> for AnalysisView {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn from(a: &CaseAnalysis) -> Self {
        Self {
            summary: a.summary.clone(),
            key_issues: a.key_issues.clone(),
            recommended_actions: a.recommended_actions.clone(),
            applicable_laws: a.applicable_laws.clone(),
            confidence_percent: a
                .confidence
                .map(|c| (c.clamp(0.0, 1.0) * 100.0).round() as u8),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DocumentView {
    pub id: String,
    pub file_name: String,
    pub mime_type: String,
    pub size: String,
    pub uploaded_at: String,
}

impl From<&Document> for DocumentView {
    fn from(d: &Document) -> Self {
        Self {
            id: d.id.to_string(),
            file_name: d.file_name.clone(),
            mime_type: d.mime_type.clone(),
            size: format_file_size(d.size_bytes),
            uploaded_at: d.uploaded_at.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MatchView {
    pub lawyer_id: String,
    pub name: String,
    pub score_percent: u8,
    pub specialties: Vec<String>,
    pub years_experience: Option<u32>,
    pub hourly_rate: Option<String>,
}

impl From<&LawyerMatch> for MatchView {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn from(m: &LawyerMatch) -> Self {
        Self {
            lawyer_id: m.lawyer_id.to_string(),
            name: m.name.clone(),
            score_percent: (m.score.clamp(0.0, 1.0) * 100.0).round() as u8,
            specialties: m.specialties.clone(),
            years_experience: m.years_experience,
            hourly_rate: m
                .hourly_rate_cents
                .map(|c| format!("${}.{:02}/h", c / 100, c % 100)),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MessageView {
    pub id: String,
    pub body: String,
    pub from_me: bool,
    pub created_at: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct ChatView {
    pub messages: Vec<MessageView>,
    pub loading: bool,
    pub sending: bool,
    pub error: Option<UserFacingError>,
}

impl ChatView {
    fn project(chat: &ChatState, me: Option<&UserId>) -> Self {
        Self {
            messages: chat
                .messages
                .iter()
                .map(|m| MessageView {
                    id: m.id.to_string(),
                    body: m.body.clone(),
                    from_me: me == Some(&m.sender_id),
                    created_at: m.created_at.clone(),
                })
                .collect(),
            loading: chat.status == LoadStatus::Loading,
            sending: chat.sending,
            error: chat.error.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct TriageView {
    pub status: Option<TaskStatus>,
    pub is_polling: bool,
    pub starting: bool,
    pub poll_error: Option<String>,
    pub failure: Option<String>,
    pub can_start: bool,
    pub can_delete: bool,
}

impl From<&TriageState> for TriageView {
    fn from(t: &TriageState) -> Self {
        let busy = t.starting || t.is_polling;
        Self {
            status: t.status(),
            is_polling: t.is_polling,
            starting: t.starting,
            poll_error: t.last_poll_error.clone(),
            failure: t.task.as_ref().and_then(|task| task.error.clone()),
            can_start: !busy,
            can_delete: t.task_id.is_some(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct VideoView {
    pub room_url: String,
    /// Join token for the signed-in user's role.
    pub token: Option<String>,
    pub expires_at: Option<String>,
}

impl VideoView {
    fn project(session: &VideoSession, role: Option<UserRole>) -> Self {
        Self {
            room_url: session.room_url.clone(),
            token: role.and_then(|r| session.token_for(r)).map(str::to_string),
            expires_at: session.expires_at.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CaseDetailView {
    pub case_id: String,
    pub case: SliceView<CaseView>,
    pub analysis: SliceView<AnalysisView>,
    pub documents: SliceView<Vec<DocumentView>>,
    pub matches: SliceView<Vec<MatchView>>,
    pub chat: ChatView,
    pub triage: TriageView,
    pub video: SliceView<VideoView>,
    pub uploading: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TicketView {
    pub id: String,
    pub subject: String,
    pub description_preview: String,
    pub status: String,
    pub priority: TicketPriority,
    pub created_at: String,
}

impl From<&Ticket> for TicketView {
    fn from(t: &Ticket) -> Self {
        Self {
            id: t.id.to_string(),
            subject: t.subject.clone(),
            description_preview: text_preview(&t.description, DESCRIPTION_PREVIEW_LENGTH),
            status: t.status.label().to_string(),
            priority: t.priority,
            created_at: t.created_at.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct TicketsView {
    pub list: SliceView<Vec<TicketView>>,
    pub creating: bool,
    pub form_errors: Vec<FieldError>,
    pub open_ticket: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct OnboardingView {
    pub submitting: bool,
    pub submitted: bool,
    pub field_errors: Vec<FieldError>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ConfirmationView {
    pub title: String,
    pub message: String,
    pub confirm_label: String,
}

impl From<&PendingConfirmation> for ConfirmationView {
    fn from(p: &PendingConfirmation) -> Self {
        match p {
            PendingConfirmation::DeleteDocument { file_name, .. } => Self {
                title: "Delete document?".into(),
                message: format!("\"{file_name}\" will be permanently removed from this case."),
                confirm_label: "Delete".into(),
            },
            PendingConfirmation::DeleteTask { .. } => Self {
                title: "Discard analysis?".into(),
                message: "The AI analysis task and its results will be deleted.".into(),
                confirm_label: "Discard".into(),
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct ViewModel {
    pub signed_in: bool,
    pub role: Option<UserRole>,
    pub cases: SliceView<Vec<CaseView>>,
    pub case_detail: Option<CaseDetailView>,
    pub tickets: TicketsView,
    pub onboarding: OnboardingView,
    pub alert: Option<UserFacingError>,
    pub confirmation: Option<ConfirmationView>,
}

impl From<&Model> for ViewModel {
    fn from(model: &Model) -> Self {
        let me = model.session.as_ref().map(|s| &s.user_id);
        let role = model.session.as_ref().map(|s| s.role);
        let screen = &model.case_screen;

        let case_detail = screen.case_id.as_ref().map(|case_id| CaseDetailView {
            case_id: case_id.to_string(),
            case: SliceView::project(&screen.case, screen.refreshing, CaseView::from),
            analysis: SliceView::project(&screen.analysis, screen.refreshing, AnalysisView::from),
            documents: SliceView::project(&screen.documents, screen.refreshing, |docs| {
                docs.iter().map(DocumentView::from).collect()
            }),
            matches: SliceView::project(&screen.matches, screen.refreshing, |ms| {
                ms.iter().map(MatchView::from).collect()
            }),
            chat: ChatView::project(&screen.chat, me),
            triage: TriageView::from(&screen.triage),
            video: SliceView::project(&screen.video, false, |v| VideoView::project(v, role)),
            uploading: screen.uploading,
        });

        Self {
            signed_in: model.is_signed_in(),
            role,
            cases: SliceView::project(&model.cases, model.cases_refreshing, |cases| {
                cases.iter().map(CaseView::from).collect()
            }),
            case_detail,
            tickets: TicketsView {
                list: SliceView::project(&model.tickets.tickets, model.tickets.refreshing, |ts| {
                    ts.iter().map(TicketView::from).collect()
                }),
                creating: model.tickets.creating,
                form_errors: model.tickets.form_errors.clone(),
                open_ticket: model.tickets.open_ticket.as_ref().map(ToString::to_string),
            },
            onboarding: OnboardingView {
                submitting: model.onboarding.submitting,
                submitted: model.onboarding.submitted,
                field_errors: model.onboarding.field_errors.clone(),
            },
            alert: model.alert.clone(),
            confirmation: model.pending_confirmation.as_ref().map(ConfirmationView::from),
        }
    }
}
