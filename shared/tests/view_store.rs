mod common;

use bytes::Bytes;
use serde_json::json;
use std::time::Duration;

use common::{analysis_json, case_id, case_json, document_json, eventually, Harness};
use shared::capabilities::ChannelScope;
use shared::documents::DocumentUpload;
use shared::event::Event;
use shared::model::{DocumentId, TaskStatus, TicketId, UserId, UserRole};
use shared::onboarding::LawyerApplication;
use shared::view::SliceState;
use shared::ErrorKind;

fn contract() -> DocumentUpload {
    DocumentUpload {
        file_name: "contract.pdf".into(),
        mime_type: "application/pdf".into(),
        bytes: Bytes::from_static(b"%PDF-1.7 employment contract"),
    }
}

async fn open(h: &Harness, id: &str) {
    h.store
        .dispatch(Event::CaseOpened { case_id: case_id(id) })
        .await
        .unwrap();
    h.store.settle().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn opening_a_case_loads_every_slice() {
    let h = Harness::signed_in().await;
    h.serve_case("c1");
    h.http.set(
        "GET",
        "cases/c1/matches",
        200,
        json!([
            {"lawyer_id": "l1", "name": "A. Counsel", "score": 0.41},
            {"lawyer_id": "l2", "name": "B. Advocate", "score": 0.93, "hourly_rate_cents": 25050}
        ]),
    );
    open(&h, "c1").await;

    let view = h.store.view();
    let detail = view.case_detail.expect("case screen is open");
    assert_eq!(detail.case_id, "c1");
    assert_eq!(detail.case.state, SliceState::Ready);
    assert_eq!(detail.case.data.unwrap().title, "Unpaid wages");
    // No triage has run yet.
    assert_eq!(detail.analysis.state, SliceState::Idle);
    assert_eq!(detail.documents.state, SliceState::Ready);

    let matches = detail.matches.data.unwrap();
    assert_eq!(matches[0].lawyer_id, "l2");
    assert_eq!(matches[0].hourly_rate.as_deref(), Some("$250.50/h"));
    assert!(view.alert.is_none());
    assert_eq!(h.realtime.open_now(&ChannelScope::Case(case_id("c1"))), 1);
}

#[tokio::test(start_paused = true)]
async fn missing_case_shows_not_found() {
    let h = Harness::signed_in().await;
    h.serve_case("nope");
    h.http
        .set("GET", "cases/nope", 404, json!({"message": "case not found"}));
    open(&h, "nope").await;

    let detail = h.store.view().case_detail.unwrap();
    assert_eq!(detail.case.state, SliceState::Failed);
    let error = detail.case.error.unwrap();
    assert!(error.is_not_found());
    assert_eq!(error.error_code, ErrorKind::NotFound.code());
    eventually(|| h.realtime.open_now(&ChannelScope::Case(case_id("nope"))) == 0).await;
}

#[tokio::test(start_paused = true)]
async fn triage_polls_then_loads_analysis() {
    let h = Harness::signed_in().await;
    h.serve_case("c1");
    h.http
        .on("GET", "cases/c1/analysis", 200, analysis_json("c1"))
        .on("POST", "cases/c1/triage", 200, json!({"task_id": "t1"}))
        .on("GET", "tasks/t1", 200, json!({"status": "pending"}))
        .on(
            "GET",
            "tasks/t1",
            200,
            json!({"status": "completed", "result": {"case_id": "c1"}}),
        );
    open(&h, "c1").await;
    assert_eq!(
        h.store.view().case_detail.unwrap().analysis.state,
        SliceState::Idle
    );

    h.store.dispatch(Event::TriageRequested).await.unwrap();
    let view = h
        .view_until(|v| {
            v.case_detail
                .as_ref()
                .is_some_and(|d| d.analysis.state == SliceState::Ready)
        })
        .await;

    let detail = view.case_detail.unwrap();
    assert_eq!(detail.triage.status, Some(TaskStatus::Completed));
    assert!(!detail.triage.is_polling);
    assert_eq!(detail.analysis.data.unwrap().confidence_percent, Some(82));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.http.count("GET", "tasks/t1"), 2);
    assert_eq!(h.http.count("POST", "cases/c1/triage"), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_triage_raises_alert() {
    let h = Harness::signed_in().await;
    h.serve_case("c1");
    h.http
        .on("POST", "cases/c1/triage", 200, json!({"task_id": "t2"}))
        .on("GET", "tasks/t2", 200, json!({"status": "failed", "error": "x"}));
    open(&h, "c1").await;

    h.store.dispatch(Event::TriageRequested).await.unwrap();
    let view = h.view_until(|v| v.alert.is_some()).await;

    let alert = view.alert.unwrap();
    assert_eq!(alert.error_code, ErrorKind::TaskFailed.code());
    assert_eq!(alert.message, "x");
    let triage = view.case_detail.unwrap().triage;
    assert_eq!(triage.status, Some(TaskStatus::Failed));
    assert_eq!(triage.failure.as_deref(), Some("x"));

    h.store.dispatch(Event::AlertDismissed).await.unwrap();
    assert!(h.store.view().alert.is_none());
}

#[tokio::test(start_paused = true)]
async fn deleting_the_task_stops_polling() {
    let h = Harness::signed_in().await;
    h.serve_case("c1");
    h.http
        .on("POST", "cases/c1/triage", 200, json!({"task_id": "t3"}))
        .on("GET", "tasks/t3", 200, json!({"status": "processing"}))
        .on("DELETE", "tasks/t3", 204, json!(null));
    open(&h, "c1").await;
    h.store.dispatch(Event::TriageRequested).await.unwrap();
    h.view_until(|v| {
        v.case_detail
            .as_ref()
            .is_some_and(|d| d.triage.status == Some(TaskStatus::Processing))
    })
    .await;

    h.store.dispatch(Event::DeleteTaskRequested).await.unwrap();
    assert!(h.store.view().confirmation.is_some());
    assert_eq!(h.http.count("DELETE", "tasks/t3"), 0);

    h.store.dispatch(Event::DeleteConfirmed).await.unwrap();
    h.store.settle().await.unwrap();
    assert_eq!(h.http.count("DELETE", "tasks/t3"), 1);

    let fetched = h.http.count("GET", "tasks/t3");
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.http.count("GET", "tasks/t3"), fetched);
    let triage = h.store.view().case_detail.unwrap().triage;
    assert_eq!(triage.status, None);
    assert!(triage.can_start);
}

#[tokio::test(start_paused = true)]
async fn upload_then_delete_document() {
    let h = Harness::signed_in().await;
    h.serve_case("c1");
    open(&h, "c1").await;

    h.store.upload(case_id("c1"), contract()).unwrap();
    h.store.settle().await.unwrap();

    let posted = h
        .http
        .requests()
        .into_iter()
        .find(|r| r.method == "POST" && r.path == "cases/c1/documents");
    // No route was set for the record, so the upload is rolled back.
    assert!(posted.is_some());
    assert!(h.storage.paths().is_empty());
    assert_eq!(h.storage.deleted().len(), 1);
    assert!(h.storage.deleted()[0].starts_with("cases/c1/"));
    assert!(h.store.view().alert.is_some());
    h.store.dispatch(Event::AlertDismissed).await.unwrap();

    h.http.on(
        "POST",
        "cases/c1/documents",
        201,
        document_json("d1", "c1", "cases/c1/d1-contract.pdf"),
    );
    h.store.upload(case_id("c1"), contract()).unwrap();
    h.store.settle().await.unwrap();

    let record = h
        .http
        .requests()
        .into_iter()
        .filter(|r| r.method == "POST" && r.path == "cases/c1/documents")
        .last()
        .and_then(|r| r.body)
        .unwrap();
    assert_eq!(record["mime_type"], "application/pdf");
    assert_eq!(record["checksum"].as_str().unwrap().len(), 64);
    assert_eq!(h.storage.paths().len(), 1);

    let detail = h.store.view().case_detail.unwrap();
    assert!(!detail.uploading);
    assert_eq!(detail.documents.data.as_ref().unwrap().len(), 1);
    assert!(h.store.view().alert.is_none());

    h.http.on("DELETE", "documents/d1", 204, json!(null));
    h.store
        .dispatch(Event::DeleteDocumentRequested {
            document_id: DocumentId::new("d1").unwrap(),
        })
        .await
        .unwrap();
    let confirmation = h.store.view().confirmation.unwrap();
    assert!(confirmation.message.contains("contract.pdf"));

    h.store.dispatch(Event::DeleteConfirmed).await.unwrap();
    h.store.settle().await.unwrap();
    assert_eq!(h.http.count("DELETE", "documents/d1"), 1);
    assert!(h.store.view().case_detail.unwrap().documents.data.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn rejected_upload_never_reaches_storage() {
    let h = Harness::signed_in().await;
    h.serve_case("c1");
    open(&h, "c1").await;

    let upload = DocumentUpload {
        mime_type: "application/x-msdownload".into(),
        ..contract()
    };
    h.store.upload(case_id("c1"), upload).unwrap();
    h.store.settle().await.unwrap();

    let alert = h.store.view().alert.unwrap();
    assert_eq!(alert.error_code, ErrorKind::Validation.code());
    assert!(h.storage.paths().is_empty());
    assert!(h.storage.deleted().is_empty());
}

#[tokio::test(start_paused = true)]
async fn refresh_failure_keeps_loaded_cases() {
    let h = Harness::signed_in().await;
    h.http
        .on("GET", "cases", 200, json!([case_json("c1"), case_json("c2")]))
        .on("GET", "cases", 503, json!({"message": "maintenance"}));
    h.store.dispatch(Event::CasesRequested).await.unwrap();
    h.store.settle().await.unwrap();
    assert_eq!(h.store.view().cases.data.unwrap().len(), 2);

    h.store.dispatch(Event::CasesRefreshRequested).await.unwrap();
    assert!(h.store.view().cases.refreshing);
    h.store.settle().await.unwrap();

    let view = h.store.view();
    assert_eq!(view.cases.state, SliceState::Ready);
    assert_eq!(view.cases.data.unwrap().len(), 2);
    assert!(!view.cases.refreshing);
    assert_eq!(view.alert.unwrap().error_code, ErrorKind::Server.code());
}

#[tokio::test(start_paused = true)]
async fn chat_send_appends_message() {
    let h = Harness::signed_in().await;
    h.serve_case("c1");
    h.http.on(
        "POST",
        "cases/c1/messages",
        201,
        json!({
            "id": "m9",
            "case_id": "c1",
            "sender_id": "u1",
            "body": "Can we talk tomorrow?",
            "created_at": "2024-03-03T08:00:00Z"
        }),
    );
    open(&h, "c1").await;

    h.store
        .dispatch(Event::MessageSendRequested {
            body: "  Can we talk tomorrow?  ".into(),
        })
        .await
        .unwrap();
    assert!(h.store.view().case_detail.unwrap().chat.sending);
    h.store.settle().await.unwrap();

    let sent = h
        .http
        .requests()
        .into_iter()
        .find(|r| r.method == "POST" && r.path == "cases/c1/messages")
        .and_then(|r| r.body)
        .unwrap();
    assert_eq!(sent, json!({"body": "Can we talk tomorrow?"}));

    let chat = h.store.view().case_detail.unwrap().chat;
    assert!(!chat.sending);
    assert_eq!(chat.messages.len(), 1);
    assert!(chat.messages[0].from_me);
}

#[tokio::test(start_paused = true)]
async fn video_session_token_matches_role() {
    let h = Harness::signed_in().await;
    h.serve_case("c1");
    h.http.on(
        "POST",
        "cases/c1/video-sessions",
        201,
        json!({
            "room_url": "https://video.test/room-c1",
            "tokens": {"client": "tok-client", "lawyer": "tok-lawyer"}
        }),
    );
    open(&h, "c1").await;

    h.store.dispatch(Event::VideoSessionRequested).await.unwrap();
    h.store.settle().await.unwrap();

    let video = h.store.view().case_detail.unwrap().video.data.unwrap();
    assert_eq!(video.room_url, "https://video.test/room-c1");
    assert_eq!(video.token.as_deref(), Some("tok-client"));
}

#[tokio::test(start_paused = true)]
async fn lawyer_application_validates_before_submitting() {
    let h = Harness::signed_in().await;
    h.http
        .on("POST", "lawyers/applications", 201, json!({"id": "app-1"}));

    h.store
        .dispatch(Event::LawyerApplicationSubmitted(Box::default()))
        .await
        .unwrap();
    let onboarding = h.store.view().onboarding;
    assert!(!onboarding.field_errors.is_empty());
    assert!(!onboarding.submitting);
    assert_eq!(h.http.count("POST", "lawyers/applications"), 0);

    let application = LawyerApplication {
        full_name: "Dana Reyes".into(),
        email: "dana@reyeslaw.test".into(),
        bar_number: "CA-123456".into(),
        jurisdictions: vec!["California".into()],
        specialties: vec!["Employment".into()],
        years_experience: 9,
        bio: None,
    };
    h.store
        .dispatch(Event::LawyerApplicationSubmitted(Box::new(application)))
        .await
        .unwrap();
    h.store.settle().await.unwrap();

    let onboarding = h.store.view().onboarding;
    assert!(onboarding.submitted);
    assert!(onboarding.field_errors.is_empty());
    assert_eq!(h.http.count("POST", "lawyers/applications"), 1);
}

#[tokio::test(start_paused = true)]
async fn sign_out_releases_everything() {
    let h = Harness::signed_in().await;
    h.serve_case("c1");
    h.http
        .on("GET", "tickets", 200, json!([]))
        .on("POST", "cases/c1/triage", 200, json!({"task_id": "t7"}))
        .on("GET", "tasks/t7", 200, json!({"status": "processing"}));
    open(&h, "c1").await;
    h.store.dispatch(Event::TriageRequested).await.unwrap();
    h.store
        .dispatch(Event::TicketOpened {
            ticket_id: TicketId::new("tk-1").unwrap(),
        })
        .await
        .unwrap();
    h.store.settle().await.unwrap();
    assert!(h.session.is_active());

    let case_scope = ChannelScope::Case(case_id("c1"));
    let ticket_scope = ChannelScope::Ticket(TicketId::new("tk-1").unwrap());
    assert_eq!(h.realtime.open_now(&case_scope), 1);
    assert_eq!(h.realtime.open_now(&ticket_scope), 1);

    h.store.sign_out().await.unwrap();

    let view = h.store.view();
    assert!(!view.signed_in);
    assert!(view.case_detail.is_none());
    assert!(!h.session.is_active());
    eventually(|| {
        h.realtime.open_now(&case_scope) == 0 && h.realtime.open_now(&ticket_scope) == 0
    })
    .await;

    let fetched = h.http.count("GET", "tasks/t7");
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.http.count("GET", "tasks/t7"), fetched);
}

#[tokio::test(start_paused = true)]
async fn requests_without_a_session_are_refused() {
    let h = Harness::new();
    h.http.on("GET", "cases", 200, json!([]));

    h.store.dispatch(Event::CasesRequested).await.unwrap();
    h.store.settle().await.unwrap();

    let view = h.store.view();
    assert_eq!(view.cases.state, SliceState::Failed);
    assert_eq!(
        view.cases.error.unwrap().error_code,
        ErrorKind::Authentication.code()
    );
    assert!(h.http.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn results_from_an_ended_session_are_dropped() {
    let h = Harness::signed_in().await;
    h.http
        .on("GET", "cases", 200, json!([case_json("c-secret")]))
        .on("GET", "tickets", 200, json!([{
            "id": "tk-1",
            "subject": "Billing question",
            "description": "I was charged twice.",
            "status": "open",
            "created_at": "2024-03-01T09:00:00Z"
        }]));
    h.http.set_latency(Duration::from_secs(2));

    h.store.dispatch(Event::CasesRequested).await.unwrap();
    h.store.dispatch(Event::TicketsRequested).await.unwrap();
    h.store.sign_out().await.unwrap();
    h.store
        .sign_in(UserId::new("u2").unwrap(), UserRole::Lawyer, "tok-2")
        .await
        .unwrap();
    h.store.settle().await.unwrap();

    let model = h.store.model().await.unwrap();
    assert!(model.is_signed_in());
    assert!(model.cases.value().is_none());
    assert!(model.tickets.tickets.value().is_none());
    assert_eq!(h.http.count("GET", "cases"), 1);
    assert_eq!(h.http.count("GET", "tickets"), 1);
}
