//! The reducer. Every state change goes through [`Model::update`]; work it
//! wants done is queued as [`Command`]s on `model.outbox`.
//!
//! Results addressed to a case that is no longer on screen are dropped, so a
//! slow response can never paint over the case the user navigated to.

use tracing::{debug, info, warn};

use crate::api::validate_message;
use crate::capabilities::{ChannelScope, RealtimeEvent, RealtimeEventKind};
use crate::event::{Command, Event};
use crate::model::{
    Case, CaseId, CaseScreen, Document, LoadStatus, Loadable, Model, PendingConfirmation,
    SessionInfo, TaskStatus, Ticket, TicketId, TriageState, UserFacingError,
};
use crate::poller::PollSnapshot;
use crate::{AppError, AppResult, ErrorKind};

/// Applies a fetch result. A failed reload keeps data already on screen and
/// raises an alert instead, except when the entity is gone.
fn settle_slice<T>(slice: &mut Loadable<T>, result: AppResult<T>, alert: &mut Option<UserFacingError>) {
    match result {
        Ok(value) => *slice = Loadable::Loaded(value),
        Err(err) => {
            warn!(code = err.code(), error = %err, "Load failed");
            if slice.value().is_some() && err.kind != ErrorKind::NotFound {
                *alert = Some(UserFacingError::from(&err));
            } else {
                *slice = Loadable::Failed(UserFacingError::from(&err));
            }
        }
    }
}

impl Model {
    pub fn update(&mut self, event: Event) {
        debug!(event = event.name(), "Applying event");

        match event {
            Event::SessionStarted { user_id, role } => {
                info!(user_id = %user_id, "Signed in");
                self.session = Some(SessionInfo { user_id, role });
            }
            Event::SessionEnded => {
                self.reset_session();
                info!(generation = self.session_generation, "Signed out");
                self.push_command(Command::ReleaseAll);
            }

            // --- Case list ---
            Event::CasesRequested => {
                self.cases.begin();
                self.push_command(Command::FetchCases);
            }
            Event::CasesRefreshRequested => {
                self.cases_refreshing = true;
                self.cases.begin();
                self.push_command(Command::FetchCases);
            }
            Event::CasesLoaded(result) => {
                if result.is_ok() && !self.admits_session_data("cases") {
                    return;
                }
                self.cases_refreshing = false;
                settle_slice(&mut self.cases, *result, &mut self.alert);
            }

            // --- Case detail ---
            Event::CaseOpened { case_id } => self.open_case(case_id),
            Event::CaseClosed => self.close_case(),
            Event::CaseRefreshRequested => {
                let Some(case_id) = self.current_case().cloned() else {
                    return;
                };
                let screen = &mut self.case_screen;
                screen.refreshing = true;
                screen.case.begin();
                screen.analysis.begin();
                screen.documents.begin();
                screen.matches.begin();
                self.fetch_case_slices(&case_id);
            }
            Event::CaseLoaded { case_id, result } => {
                if !self.accepts(&case_id, "case") {
                    return;
                }
                self.case_screen.refreshing = false;
                let result = *result;
                if let Ok(case) = &result {
                    self.replace_in_case_list(case);
                }
                let gone = matches!(&result, Err(e) if e.kind == ErrorKind::NotFound);
                settle_slice(&mut self.case_screen.case, result, &mut self.alert);
                if gone {
                    self.push_command(Command::CancelPolling);
                    self.push_command(Command::ReleaseCaseChannel);
                }
            }
            Event::AnalysisLoaded { case_id, result } => {
                if !self.accepts(&case_id, "analysis") {
                    return;
                }
                match *result {
                    // No analysis has been produced for this case yet.
                    Err(e) if e.kind == ErrorKind::NotFound => {
                        self.case_screen.analysis = Loadable::Idle;
                    }
                    result => settle_slice(&mut self.case_screen.analysis, result, &mut self.alert),
                }
            }
            Event::DocumentsLoaded { case_id, result } => {
                if self.accepts(&case_id, "documents") {
                    settle_slice(&mut self.case_screen.documents, *result, &mut self.alert);
                }
            }
            Event::MatchesLoaded { case_id, result } => {
                if self.accepts(&case_id, "matches") {
                    settle_slice(&mut self.case_screen.matches, *result, &mut self.alert);
                }
            }
            Event::MessagesLoaded { case_id, result } => {
                if !self.accepts(&case_id, "messages") {
                    return;
                }
                let chat = &mut self.case_screen.chat;
                chat.status = LoadStatus::Ready;
                match *result {
                    Ok(messages) => {
                        chat.error = None;
                        for message in messages {
                            chat.upsert(message);
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "Messages failed to load");
                        chat.error = Some(UserFacingError::from(&err));
                    }
                }
            }

            // --- Triage ---
            Event::TriageRequested => {
                let Some(case_id) = self.current_case().cloned() else {
                    return;
                };
                let triage = &self.case_screen.triage;
                if triage.starting || triage.is_polling {
                    debug!("Triage already running");
                    return;
                }
                self.case_screen.triage = TriageState {
                    starting: true,
                    ..TriageState::default()
                };
                self.push_command(Command::StartTriage(case_id));
            }
            Event::TriageStarted { case_id, result } => {
                if !self.accepts(&case_id, "triage") {
                    return;
                }
                self.case_screen.triage.starting = false;
                match *result {
                    Ok(task_id) => {
                        info!(task_id = %task_id, "Triage task started");
                        self.case_screen.triage.task_id = Some(task_id.clone());
                        self.case_screen.triage.is_polling = true;
                        self.push_command(Command::PollTask(task_id));
                    }
                    Err(err) => self.raise(&err),
                }
            }
            Event::TaskObserved(snapshot) => self.observe_task(*snapshot),
            Event::TaskDeleted { task_id, result } => match *result {
                Ok(()) => {
                    if self.case_screen.triage.task_id.as_ref() == Some(&task_id) {
                        self.case_screen.triage = TriageState::default();
                    }
                }
                Err(err) => self.raise(&err),
            },

            // --- Documents ---
            Event::DocumentUploadStarted { case_id, file_name } => {
                if self.accepts(&case_id, "upload") {
                    debug!(file_name = %file_name, "Upload in progress");
                    self.case_screen.uploading = true;
                }
            }
            Event::DocumentUploaded { case_id, result } => {
                if !self.accepts(&case_id, "upload") {
                    return;
                }
                self.case_screen.uploading = false;
                match *result {
                    Ok(document) => self.upsert_document(document),
                    Err(err) => self.raise(&err),
                }
            }
            Event::DocumentDeleted {
                document_id,
                result,
            } => match *result {
                Ok(()) => {
                    if let Some(docs) = self.case_screen.documents.value_mut() {
                        docs.retain(|d| d.id != document_id);
                    }
                }
                Err(err) => self.raise(&err),
            },

            // --- Two-step deletes ---
            Event::DeleteDocumentRequested { document_id } => {
                let found = self
                    .case_screen
                    .documents
                    .value()
                    .and_then(|docs| docs.iter().find(|d| d.id == document_id));
                match found {
                    Some(doc) => {
                        self.pending_confirmation = Some(PendingConfirmation::DeleteDocument {
                            document_id: doc.id.clone(),
                            storage_path: doc.storage_path.clone(),
                            file_name: doc.file_name.clone(),
                        });
                    }
                    None => self.raise(&AppError::not_found("document", document_id.as_str())),
                }
            }
            Event::DeleteTaskRequested => {
                if let Some(task_id) = self.case_screen.triage.task_id.clone() {
                    self.pending_confirmation = Some(PendingConfirmation::DeleteTask { task_id });
                }
            }
            Event::DeleteConfirmed => match self.pending_confirmation.take() {
                Some(PendingConfirmation::DeleteDocument {
                    document_id,
                    storage_path,
                    ..
                }) => self.push_command(Command::DeleteDocument {
                    document_id,
                    storage_path,
                }),
                Some(PendingConfirmation::DeleteTask { task_id }) => {
                    self.push_command(Command::CancelPolling);
                    self.push_command(Command::DeleteTask(task_id));
                }
                None => debug!("Nothing to confirm"),
            },
            Event::DeleteCancelled => {
                self.pending_confirmation = None;
            }

            // --- Chat ---
            Event::MessageSendRequested { body } => {
                let Some(case_id) = self.current_case().cloned() else {
                    return;
                };
                if self.case_screen.chat.sending {
                    debug!("Message already sending");
                    return;
                }
                if let Err(err) = validate_message(&body) {
                    self.case_screen.chat.error = Some(UserFacingError::from(&err));
                    return;
                }
                self.case_screen.chat.sending = true;
                self.case_screen.chat.error = None;
                self.push_command(Command::SendMessage {
                    case_id,
                    body: body.trim().to_string(),
                });
            }
            Event::MessageSent { case_id, result } => {
                if !self.accepts(&case_id, "message") {
                    return;
                }
                self.case_screen.chat.sending = false;
                match *result {
                    Ok(message) => {
                        self.case_screen.chat.upsert(message);
                    }
                    Err(err) => self.raise(&err),
                }
            }

            // --- Realtime ---
            Event::RealtimeReceived { scope, event } => self.apply_realtime(&scope, &event),
            Event::RealtimeFailed { scope, error } => {
                warn!(topic = %scope.topic(), error = %error, "Realtime channel failed");
                self.alert = Some(UserFacingError::from(error.as_ref()));
            }

            // --- Tickets ---
            Event::TicketsRequested => {
                self.tickets.tickets.begin();
                self.push_command(Command::FetchTickets);
            }
            Event::TicketsRefreshRequested => {
                self.tickets.refreshing = true;
                self.tickets.tickets.begin();
                self.push_command(Command::FetchTickets);
            }
            Event::TicketsLoaded(result) => {
                if result.is_ok() && !self.admits_session_data("tickets") {
                    return;
                }
                self.tickets.refreshing = false;
                settle_slice(&mut self.tickets.tickets, *result, &mut self.alert);
            }
            Event::TicketCreateRequested(ticket) => {
                if let Err(err) = ticket.validate() {
                    self.tickets.form_errors = AppError::from(err).field_errors;
                    return;
                }
                self.tickets.form_errors.clear();
                self.tickets.creating = true;
                self.push_command(Command::CreateTicket(*ticket));
            }
            Event::TicketCreated(result) => {
                if !self.admits_session_data("ticket") {
                    return;
                }
                self.tickets.creating = false;
                match *result {
                    Ok(ticket) => self.upsert_ticket(ticket),
                    Err(err) if err.kind == ErrorKind::Validation => {
                        warn!(error = %err, "Ticket rejected");
                        self.tickets.form_errors = err.field_errors;
                    }
                    Err(err) => self.raise(&err),
                }
            }
            Event::TicketOpened { ticket_id } => {
                if self.tickets.open_ticket.as_ref() == Some(&ticket_id) {
                    return;
                }
                if self.tickets.open_ticket.is_some() {
                    self.push_command(Command::ReleaseTicketChannel);
                }
                self.tickets.open_ticket = Some(ticket_id.clone());
                self.push_command(Command::SubscribeTicket(ticket_id));
            }
            Event::TicketClosed => {
                if self.tickets.open_ticket.take().is_some() {
                    self.push_command(Command::ReleaseTicketChannel);
                }
            }

            // --- Video ---
            Event::VideoSessionRequested => {
                let Some(case_id) = self.current_case().cloned() else {
                    return;
                };
                self.case_screen.video = Loadable::Loading;
                self.push_command(Command::CreateVideoSession(case_id));
            }
            Event::VideoSessionReady { case_id, result } => {
                if self.accepts(&case_id, "video") {
                    settle_slice(&mut self.case_screen.video, *result, &mut self.alert);
                }
            }

            // --- Onboarding ---
            Event::LawyerApplicationSubmitted(application) => {
                let onboarding = &mut self.onboarding;
                if onboarding.submitting {
                    return;
                }
                match application.validate() {
                    Err(errors) => {
                        onboarding.field_errors = errors;
                        onboarding.draft = Some(*application);
                    }
                    Ok(()) => {
                        onboarding.field_errors.clear();
                        onboarding.submitting = true;
                        onboarding.draft = Some((*application).clone());
                        self.push_command(Command::SubmitLawyerApplication(*application));
                    }
                }
            }
            Event::LawyerApplicationResult(result) => {
                if !self.admits_session_data("application") {
                    return;
                }
                self.onboarding.submitting = false;
                match *result {
                    Ok(()) => {
                        info!("Lawyer application submitted");
                        self.onboarding.submitted = true;
                        self.onboarding.draft = None;
                    }
                    Err(err) if err.kind == ErrorKind::Validation => {
                        warn!(error = %err, "Lawyer application rejected");
                        self.onboarding.field_errors = err.field_errors;
                    }
                    Err(err) => self.raise(&err),
                }
            }

            Event::AlertDismissed => {
                self.alert = None;
            }
        }
    }

    fn open_case(&mut self, case_id: CaseId) {
        if self.case_screen.is_showing(&case_id) {
            debug!(case_id = %case_id, "Case already open");
            return;
        }
        if self.case_screen.case_id.is_some() {
            self.push_command(Command::CancelPolling);
            self.push_command(Command::ReleaseCaseChannel);
        }
        self.pending_confirmation = None;
        self.case_screen = CaseScreen::open(case_id.clone());
        self.fetch_case_slices(&case_id);
        self.push_command(Command::SubscribeCase(case_id));
    }

    fn close_case(&mut self) {
        if self.case_screen.case_id.take().is_none() {
            return;
        }
        self.case_screen = CaseScreen::default();
        self.pending_confirmation = None;
        self.push_command(Command::CancelPolling);
        self.push_command(Command::ReleaseCaseChannel);
    }

    fn fetch_case_slices(&mut self, case_id: &CaseId) {
        self.push_command(Command::FetchCase(case_id.clone()));
        self.push_command(Command::FetchAnalysis(case_id.clone()));
        self.push_command(Command::FetchDocuments(case_id.clone()));
        self.push_command(Command::FetchMatches(case_id.clone()));
        self.push_command(Command::FetchMessages(case_id.clone()));
    }

    /// True when `case_id` is the case on screen; otherwise the result is stale.
    fn accepts(&self, case_id: &CaseId, what: &'static str) -> bool {
        let current = self.case_screen.is_showing(case_id);
        if !current {
            debug!(case_id = %case_id, what, "Dropping result for a case no longer on screen");
        }
        current
    }

    /// Account data is only shown while someone is signed in.
    fn admits_session_data(&self, what: &'static str) -> bool {
        if !self.is_signed_in() {
            debug!(what, "Dropping result that arrived while signed out");
        }
        self.is_signed_in()
    }

    /// Records a one-shot alert. Every error shown this way is logged here.
    fn raise(&mut self, err: &AppError) {
        warn!(code = err.code(), error = %err, "Operation failed");
        self.alert = Some(UserFacingError::from(err));
    }

    fn observe_task(&mut self, snapshot: PollSnapshot) {
        let triage = &mut self.case_screen.triage;
        if snapshot.task_id.is_none() || snapshot.task_id != triage.task_id {
            debug!(task_id = ?snapshot.task_id, "Ignoring snapshot for another task");
            return;
        }

        let was_terminal = triage.task.as_ref().is_some_and(|t| t.is_terminal());
        triage.is_polling = snapshot.is_polling;
        triage.last_poll_error = snapshot.last_error.as_ref().map(AppError::user_facing_message);

        let Some(task) = snapshot.task else {
            if let Some(err) = snapshot.last_error.filter(|_| !snapshot.is_polling) {
                self.raise(&err);
            }
            return;
        };
        let status = task.status;
        let failure = task.error.clone();
        triage.task = Some(task);

        if was_terminal || !status.is_terminal() {
            if !snapshot.is_polling {
                if let Some(err) = snapshot.last_error {
                    self.raise(&err);
                }
            }
            return;
        }

        match status {
            TaskStatus::Completed => {
                info!("Triage completed, loading analysis");
                if let Some(case_id) = self.current_case().cloned() {
                    self.case_screen.analysis.begin();
                    self.case_screen.matches.begin();
                    self.push_command(Command::FetchAnalysis(case_id.clone()));
                    self.push_command(Command::FetchMatches(case_id));
                }
            }
            TaskStatus::Failed => {
                let message = failure.unwrap_or_else(|| crate::model::GENERIC_TASK_FAILURE.into());
                self.raise(&AppError::new(ErrorKind::TaskFailed, message));
            }
            TaskStatus::Pending | TaskStatus::Processing => {}
        }
    }

    fn apply_realtime(&mut self, scope: &ChannelScope, event: &RealtimeEvent) {
        match scope {
            ChannelScope::Case(case_id) => {
                if !self.accepts(case_id, "realtime") {
                    return;
                }
                match &event.kind {
                    RealtimeEventKind::MessageInserted | RealtimeEventKind::MessageUpdated => {
                        match event.as_message() {
                            Ok(message) if &message.case_id == case_id => {
                                let added = self.case_screen.chat.upsert(message);
                                debug!(added, "Chat message pushed");
                            }
                            Ok(message) => {
                                warn!(message_case = %message.case_id, "Message for another case on channel");
                            }
                            Err(e) => warn!(error = %e, "Undecodable message payload"),
                        }
                    }
                    RealtimeEventKind::CaseUpdated => {
                        match serde_json::from_value::<Case>(event.payload.clone()) {
                            Ok(case) if &case.id == case_id => {
                                self.replace_in_case_list(&case);
                                self.case_screen.case = Loadable::Loaded(case);
                            }
                            Ok(_) => warn!("Case update for another case on channel"),
                            Err(e) => warn!(error = %e, "Undecodable case payload"),
                        }
                    }
                    other => debug!(kind = ?other, "Unhandled case channel event"),
                }
            }
            ChannelScope::Ticket(ticket_id) => match &event.kind {
                RealtimeEventKind::TicketStatusChanged => match event.as_ticket_status() {
                    Ok(change) if &change.ticket_id == ticket_id => {
                        self.apply_ticket_status(ticket_id, change.status, change.updated_at);
                    }
                    Ok(_) => warn!("Status change for another ticket on channel"),
                    Err(e) => warn!(error = %e, "Undecodable ticket payload"),
                },
                other => debug!(kind = ?other, "Unhandled ticket channel event"),
            },
        }
    }

    fn apply_ticket_status(
        &mut self,
        ticket_id: &TicketId,
        status: crate::model::TicketStatus,
        updated_at: Option<String>,
    ) {
        let Some(tickets) = self.tickets.tickets.value_mut() else {
            return;
        };
        if let Some(ticket) = tickets.iter_mut().find(|t| &t.id == ticket_id) {
            ticket.status = status;
            if updated_at.is_some() {
                ticket.updated_at = updated_at;
            }
        }
    }

    fn replace_in_case_list(&mut self, case: &Case) {
        if let Some(cases) = self.cases.value_mut() {
            if let Some(existing) = cases.iter_mut().find(|c| c.id == case.id) {
                *existing = case.clone();
            }
        }
    }

    fn upsert_document(&mut self, document: Document) {
        match self.case_screen.documents.value_mut() {
            Some(docs) => match docs.iter_mut().find(|d| d.id == document.id) {
                Some(existing) => *existing = document,
                None => docs.push(document),
            },
            None => self.case_screen.documents = Loadable::Loaded(vec![document]),
        }
    }

    fn upsert_ticket(&mut self, ticket: Ticket) {
        match self.tickets.tickets.value_mut() {
            Some(list) => {
                list.retain(|t| t.id != ticket.id);
                list.insert(0, ticket);
            }
            None => self.tickets.tickets = Loadable::Loaded(vec![ticket]),
        }
    }
}
