//! Typed client for the marketplace REST API.
//!
//! Every call attaches the session's bearer token, runs once through the
//! host's [`HttpTransport`] and maps the outcome into [`AppError`]. No
//! retries and no caching: writes are at-most-once.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::capabilities::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, ValidatedUrl};
use crate::config::ClientConfig;
use crate::model::{
    Case, CaseAnalysis, CaseId, CaseStatus, Document, DocumentId, LawyerMatch, Message, NewCase,
    NewDocumentRecord, NewTicket, Task, TaskId, TaskStatusResponse, Ticket, TicketId,
    TicketPriority, TicketStatus, VideoSession,
};
use crate::onboarding::LawyerApplication;
use crate::poller::TaskStatusSource;
use crate::session::Session;
use crate::{AppError, AppResult, ErrorKind, FieldError, MAX_MESSAGE_LENGTH};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct CaseUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<CaseStatus>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct TicketUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TicketStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<TicketPriority>,
}

#[derive(Deserialize)]
struct TriageStarted {
    task_id: TaskId,
}

#[derive(Serialize)]
struct NewMessage<'a> {
    body: &'a str,
}

#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn HttpTransport>,
    base_url: Url,
    session: Session,
    request_timeout: Duration,
    upload_timeout: Duration,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url.as_str())
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        session: Session,
        config: &ClientConfig,
    ) -> AppResult<Self> {
        config.validate()?;
        let validated = ValidatedUrl::new(config.api_base_url.clone())?;
        let base_url = Url::parse(validated.as_str()).map_err(|e| {
            AppError::new(ErrorKind::Configuration, format!("invalid API base URL: {e}"))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(AppError::new(
                ErrorKind::Configuration,
                "API base URL cannot carry a path",
            ));
        }
        Ok(Self {
            transport,
            base_url,
            session,
            request_timeout: config.request_timeout(),
            upload_timeout: config.upload_timeout(),
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    // --- Cases ---

    pub async fn list_cases(&self) -> AppResult<Vec<Case>> {
        self.get(&["cases"]).await
    }

    pub async fn get_case(&self, case_id: &CaseId) -> AppResult<Case> {
        self.get(&["cases", case_id.as_str()]).await
    }

    pub async fn create_case(&self, case: &NewCase) -> AppResult<Case> {
        if case.title.trim().is_empty() {
            return Err(AppError::validation(vec![FieldError::new(
                "title",
                "Title is required",
            )]));
        }
        self.send_json(HttpMethod::Post, &["cases"], case).await
    }

    pub async fn update_case(&self, case_id: &CaseId, update: &CaseUpdate) -> AppResult<Case> {
        self.send_json(HttpMethod::Patch, &["cases", case_id.as_str()], update)
            .await
    }

    pub async fn get_analysis(&self, case_id: &CaseId) -> AppResult<CaseAnalysis> {
        self.get(&["cases", case_id.as_str(), "analysis"]).await
    }

    pub async fn list_matches(&self, case_id: &CaseId) -> AppResult<Vec<LawyerMatch>> {
        let mut matches: Vec<LawyerMatch> =
            self.get(&["cases", case_id.as_str(), "matches"]).await?;
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(matches)
    }

    // --- Triage tasks ---

    pub async fn start_triage(&self, case_id: &CaseId) -> AppResult<TaskId> {
        let started: TriageStarted = self
            .send_json(
                HttpMethod::Post,
                &["cases", case_id.as_str(), "triage"],
                &serde_json::json!({}),
            )
            .await?;
        Ok(started.task_id)
    }

    pub async fn get_task(&self, task_id: &TaskId) -> AppResult<Task> {
        let response: TaskStatusResponse = self.get(&["tasks", task_id.as_str()]).await?;
        Ok(Task::from_response(task_id.clone(), response))
    }

    pub async fn delete_task(&self, task_id: &TaskId) -> AppResult<()> {
        self.delete(&["tasks", task_id.as_str()]).await
    }

    // --- Documents ---

    pub async fn list_documents(&self, case_id: &CaseId) -> AppResult<Vec<Document>> {
        self.get(&["cases", case_id.as_str(), "documents"]).await
    }

    /// Records a document already uploaded to object storage.
    pub async fn create_document(
        &self,
        case_id: &CaseId,
        record: &NewDocumentRecord,
    ) -> AppResult<Document> {
        let request = self
            .request(HttpMethod::Post, &["cases", case_id.as_str(), "documents"])?
            .with_timeout(self.upload_timeout)?
            .with_json(record)?;
        let response = self.execute(request).await?;
        decode(&response)
    }

    pub async fn delete_document(&self, document_id: &DocumentId) -> AppResult<()> {
        self.delete(&["documents", document_id.as_str()]).await
    }

    // --- Support tickets ---

    pub async fn list_tickets(&self) -> AppResult<Vec<Ticket>> {
        self.get(&["tickets"]).await
    }

    pub async fn get_ticket(&self, ticket_id: &TicketId) -> AppResult<Ticket> {
        self.get(&["tickets", ticket_id.as_str()]).await
    }

    pub async fn create_ticket(&self, ticket: &NewTicket) -> AppResult<Ticket> {
        ticket.validate()?;
        self.send_json(HttpMethod::Post, &["tickets"], ticket).await
    }

    pub async fn update_ticket(
        &self,
        ticket_id: &TicketId,
        update: &TicketUpdate,
    ) -> AppResult<Ticket> {
        self.send_json(HttpMethod::Patch, &["tickets", ticket_id.as_str()], update)
            .await
    }

    // --- Chat ---

    pub async fn list_messages(&self, case_id: &CaseId) -> AppResult<Vec<Message>> {
        self.get(&["cases", case_id.as_str(), "messages"]).await
    }

    pub async fn send_message(&self, case_id: &CaseId, body: &str) -> AppResult<Message> {
        validate_message(body)?;
        self.send_json(
            HttpMethod::Post,
            &["cases", case_id.as_str(), "messages"],
            &NewMessage { body: body.trim() },
        )
        .await
    }

    // --- Video ---

    pub async fn create_video_session(&self, case_id: &CaseId) -> AppResult<VideoSession> {
        self.send_json(
            HttpMethod::Post,
            &["cases", case_id.as_str(), "video-sessions"],
            &serde_json::json!({}),
        )
        .await
    }

    // --- Lawyer onboarding ---

    pub async fn submit_lawyer_application(&self, application: &LawyerApplication) -> AppResult<()> {
        application.validate().map_err(AppError::validation)?;
        let request = self
            .request(HttpMethod::Post, &["lawyers", "applications"])?
            .with_json(application)?;
        self.execute(request).await.map(drop)
    }

    // --- Plumbing ---

    async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> AppResult<T> {
        let request = self.request(HttpMethod::Get, segments)?;
        let response = self.execute(request).await?;
        decode(&response)
    }

    async fn delete(&self, segments: &[&str]) -> AppResult<()> {
        let request = self.request(HttpMethod::Delete, segments)?;
        self.execute(request).await.map(drop)
    }

    async fn send_json<B, T>(&self, method: HttpMethod, segments: &[&str], body: &B) -> AppResult<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let request = self.request(method, segments)?.with_json(body)?;
        let response = self.execute(request).await?;
        decode(&response)
    }

    fn endpoint(&self, segments: &[&str]) -> AppResult<ValidatedUrl> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| AppError::new(ErrorKind::Configuration, "API base URL cannot carry a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(ValidatedUrl::from_url(&url)?)
    }

    fn request(&self, method: HttpMethod, segments: &[&str]) -> AppResult<HttpRequest> {
        let token = self.session.bearer()?;
        let request = HttpRequest::new(method, self.endpoint(segments)?)
            .with_header("Accept", "application/json")?
            .with_bearer(&token)?
            .with_timeout(self.request_timeout)?;
        Ok(request)
    }

    #[instrument(
        skip(self, request),
        fields(
            method = request.method().as_str(),
            path = %request_path(&request),
            request_id = %request.request_id(),
        )
    )]
    async fn execute(&self, request: HttpRequest) -> AppResult<HttpResponse> {
        let response = self.transport.execute(request).await.map_err(|e| {
            warn!(error = %e, "Request failed in transport");
            AppError::from(e)
        })?;

        if !response.is_success() {
            let err = response.error();
            warn!(status = response.status(), code = err.code(), "Request rejected");
            return Err(err);
        }

        debug!(status = response.status(), bytes = response.body().len(), "Request succeeded");
        Ok(response)
    }
}

fn request_path(request: &HttpRequest) -> String {
    Url::parse(request.url().as_str())
        .map(|u| u.path().to_string())
        .unwrap_or_default()
}

fn decode<T: DeserializeOwned>(response: &HttpResponse) -> AppResult<T> {
    response.json().map_err(|e| {
        warn!(error = %e, request_id = response.request_id(), "Response body did not decode");
        AppError::from(e)
    })
}

pub fn validate_message(body: &str) -> AppResult<()> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(AppError::validation(vec![FieldError::new(
            "body",
            "Message cannot be empty",
        )]));
    }
    if trimmed.chars().count() > MAX_MESSAGE_LENGTH {
        return Err(AppError::validation(vec![FieldError::new(
            "body",
            format!("Message must be at most {MAX_MESSAGE_LENGTH} characters"),
        )]));
    }
    Ok(())
}

#[async_trait]
impl TaskStatusSource for ApiClient {
    async fn fetch_status(&self, task_id: &TaskId) -> AppResult<Task> {
        self.get_task(task_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{HttpError, HttpHeaders, HttpResult};
    use crate::model::{TaskStatus, UserId, UserRole};
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeHttp {
        responses: Mutex<VecDeque<Result<(u16, Value), HttpError>>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl FakeHttp {
        fn respond(&self, status: u16, body: Value) {
            self.responses.lock().unwrap().push_back(Ok((status, body)));
        }

        fn fail(&self, err: HttpError) {
            self.responses.lock().unwrap().push_back(Err(err));
        }

        fn last_request(&self) -> HttpRequest {
            self.requests.lock().unwrap().last().cloned().unwrap()
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl HttpTransport for FakeHttp {
        async fn execute(&self, request: HttpRequest) -> HttpResult {
            let request_id = request.request_id().to_string();
            self.requests.lock().unwrap().push(request);
            let (status, body) = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected request")?;
            Ok(HttpResponse::new(
                status,
                HttpHeaders::new(),
                serde_json::to_vec(&body).unwrap(),
                request_id,
            ))
        }
    }

    fn client(http: &Arc<FakeHttp>) -> ApiClient {
        let session = Session::signed_in(UserId::new("u1").unwrap(), UserRole::Client, "tok-1");
        let config = ClientConfig {
            api_base_url: "https://api.example.com/v1/".into(),
            ..ClientConfig::default()
        };
        ApiClient::new(http.clone(), session, &config).unwrap()
    }

    fn case_json(id: &str) -> Value {
        json!({
            "id": id,
            "title": "Unpaid wages",
            "status": "open",
            "client_id": "u1",
            "created_at": "2024-03-01T09:00:00Z"
        })
    }

    #[tokio::test]
    async fn test_get_case_builds_authorized_request() {
        let http = Arc::new(FakeHttp::default());
        http.respond(200, case_json("c1"));
        let api = client(&http);

        let case = api.get_case(&CaseId::new("c1").unwrap()).await.unwrap();
        assert_eq!(case.id.as_str(), "c1");

        let request = http.last_request();
        assert_eq!(request.method(), HttpMethod::Get);
        assert_eq!(request.url().as_str(), "https://api.example.com/v1/cases/c1");
        assert_eq!(request.headers().get("Authorization"), Some("Bearer tok-1"));
    }

    #[tokio::test]
    async fn test_ids_are_path_encoded() {
        let http = Arc::new(FakeHttp::default());
        http.respond(200, json!([]));
        let api = client(&http);

        api.list_documents(&CaseId::new("a/b c").unwrap()).await.unwrap();
        assert_eq!(
            http.last_request().url().as_str(),
            "https://api.example.com/v1/cases/a%2Fb%20c/documents"
        );
    }

    #[tokio::test]
    async fn test_not_found_maps_to_kind() {
        let http = Arc::new(FakeHttp::default());
        http.respond(404, json!({"message": "case not found"}));
        let api = client(&http);

        let err = api.get_case(&CaseId::new("missing").unwrap()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(err.kind.recovery(), crate::Recovery::GoBack);
    }

    #[tokio::test]
    async fn test_validation_errors_preserved() {
        let http = Arc::new(FakeHttp::default());
        http.respond(
            422,
            json!({"message": "invalid", "errors": [{"field": "subject", "message": "too vague"}]}),
        );
        let api = client(&http);
        let ticket = NewTicket {
            subject: "Help".into(),
            description: "Billing question".into(),
            priority: TicketPriority::Normal,
            case_id: None,
        };

        let err = api.create_ticket(&ticket).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert_eq!(err.field_error("subject"), Some("too vague"));
    }

    #[tokio::test]
    async fn test_local_validation_skips_network() {
        let http = Arc::new(FakeHttp::default());
        let api = client(&http);

        let err = api
            .send_message(&CaseId::new("c1").unwrap(), "   ")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert_eq!(http.request_count(), 0);
    }

    #[tokio::test]
    async fn test_transport_failures_map_to_kinds() {
        let http = Arc::new(FakeHttp::default());
        http.fail(HttpError::Timeout {
            timeout_ms: 30_000,
            request_id: "r1".into(),
        });
        http.respond(200, json!({"unexpected": true}));
        let api = client(&http);

        let err = api.list_cases().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);

        let err = api.list_cases().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Deserialization);
    }

    #[tokio::test]
    async fn test_ended_session_is_rejected_locally() {
        let http = Arc::new(FakeHttp::default());
        let api = client(&http);
        api.session().end();

        let err = api.list_tickets().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Authentication);
        assert_eq!(http.request_count(), 0);
    }

    #[tokio::test]
    async fn test_task_status_source() {
        let http = Arc::new(FakeHttp::default());
        http.respond(200, json!({"status": "failed", "error": "x"}));
        let api = client(&http);

        let task = api.fetch_status(&TaskId::new("t2").unwrap()).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("x"));
        assert_eq!(http.last_request().url().as_str(), "https://api.example.com/v1/tasks/t2");
    }

    #[tokio::test]
    async fn test_start_triage_and_delete_task() {
        let http = Arc::new(FakeHttp::default());
        http.respond(202, json!({"task_id": "t9"}));
        http.respond(204, Value::Null);
        let api = client(&http);

        let task_id = api.start_triage(&CaseId::new("c1").unwrap()).await.unwrap();
        assert_eq!(task_id.as_str(), "t9");
        assert_eq!(
            http.last_request().url().as_str(),
            "https://api.example.com/v1/cases/c1/triage"
        );

        api.delete_task(&task_id).await.unwrap();
        assert_eq!(http.last_request().method(), HttpMethod::Delete);
    }

    fn ticket_json(id: &str, status: &str) -> Value {
        json!({
            "id": id,
            "subject": "Billing question",
            "description": "I was charged twice.",
            "status": status,
            "created_at": "2024-03-01T09:00:00Z"
        })
    }

    fn sent_body(request: &HttpRequest) -> Value {
        serde_json::from_slice(request.body().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_update_case() {
        let http = Arc::new(FakeHttp::default());
        http.respond(201, case_json("c7"));
        let mut updated = case_json("c7");
        updated["status"] = json!("in_progress");
        http.respond(200, updated);
        let api = client(&http);

        let case = api
            .create_case(&NewCase {
                title: "Unpaid wages".into(),
                description: Some("Three months of overtime".into()),
                category: None,
            })
            .await
            .unwrap();
        let request = http.last_request();
        assert_eq!(request.method(), HttpMethod::Post);
        assert_eq!(request.url().as_str(), "https://api.example.com/v1/cases");
        assert_eq!(sent_body(&request)["title"], "Unpaid wages");

        let update = CaseUpdate {
            status: Some(CaseStatus::InProgress),
            ..CaseUpdate::default()
        };
        let case = api.update_case(&case.id, &update).await.unwrap();
        assert_eq!(case.status, CaseStatus::InProgress);
        let request = http.last_request();
        assert_eq!(request.method(), HttpMethod::Patch);
        assert_eq!(request.url().as_str(), "https://api.example.com/v1/cases/c7");
        assert_eq!(sent_body(&request), json!({"status": "in_progress"}));
    }

    #[tokio::test]
    async fn test_blank_case_title_not_sent() {
        let http = Arc::new(FakeHttp::default());
        let api = client(&http);
        let err = api
            .create_case(&NewCase {
                title: "  ".into(),
                description: None,
                category: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.field_error("title"), Some("Title is required"));
        assert_eq!(http.request_count(), 0);
    }

    #[tokio::test]
    async fn test_get_and_update_ticket() {
        let http = Arc::new(FakeHttp::default());
        http.respond(200, ticket_json("tk-1", "open"));
        http.respond(200, ticket_json("tk-1", "closed"));
        let api = client(&http);
        let ticket_id = TicketId::new("tk-1").unwrap();

        let ticket = api.get_ticket(&ticket_id).await.unwrap();
        assert_eq!(ticket.status, TicketStatus::Open);
        let request = http.last_request();
        assert_eq!(request.method(), HttpMethod::Get);
        assert_eq!(request.url().as_str(), "https://api.example.com/v1/tickets/tk-1");

        let update = TicketUpdate {
            status: Some(TicketStatus::Closed),
            ..TicketUpdate::default()
        };
        let ticket = api.update_ticket(&ticket_id, &update).await.unwrap();
        assert_eq!(ticket.status, TicketStatus::Closed);
        let request = http.last_request();
        assert_eq!(request.method(), HttpMethod::Patch);
        assert_eq!(request.url().as_str(), "https://api.example.com/v1/tickets/tk-1");
        assert_eq!(sent_body(&request), json!({"status": "closed"}));
    }

    #[tokio::test]
    async fn test_matches_sorted_by_score() {
        let http = Arc::new(FakeHttp::default());
        http.respond(
            200,
            json!([
                {"lawyer_id": "l1", "name": "A", "score": 0.4},
                {"lawyer_id": "l2", "name": "B", "score": 0.9}
            ]),
        );
        let api = client(&http);
        let matches = api.list_matches(&CaseId::new("c1").unwrap()).await.unwrap();
        assert_eq!(matches[0].lawyer_id.as_str(), "l2");
    }

    #[tokio::test]
    async fn test_invalid_application_not_sent() {
        let http = Arc::new(FakeHttp::default());
        let api = client(&http);
        let err = api
            .submit_lawyer_application(&LawyerApplication::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(err.field_error("bar_number").is_some());
        assert_eq!(http.request_count(), 0);
    }
}
