// In-memory transports shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use shared::capabilities::{
    Channel, ChannelId, ChannelScope, HttpError, HttpHeaders, HttpRequest, HttpResponse,
    HttpResult, HttpTransport, ObjectMetadata, ObjectStorage, RealtimeError, RealtimeEvent,
    RealtimeEventKind, RealtimeTransport, StorageError, StoredObject,
};
use shared::config::ClientConfig;
use shared::model::{CaseId, UserId, UserRole};
use shared::session::Session;
use shared::store::{Services, ViewStore};
use shared::view::ViewModel;

pub const BASE_URL: &str = "https://api.test/v1/";

pub fn config() -> ClientConfig {
    ClientConfig {
        api_base_url: BASE_URL.into(),
        poll_interval_ms: 1_000,
        ..ClientConfig::default()
    }
}

pub fn case_id(id: &str) -> CaseId {
    CaseId::new(id).unwrap()
}

// --- HTTP ---

#[derive(Clone, Debug, PartialEq)]
pub struct Recorded {
    pub method: &'static str,
    pub path: String,
    pub body: Option<Value>,
}

/// Routes requests by method and path (relative to [`BASE_URL`]). Each
/// route plays its queued replies in order and repeats the last one.
#[derive(Default)]
pub struct FakeHttp {
    routes: Mutex<HashMap<(String, String), VecDeque<(u16, Value)>>>,
    requests: Mutex<Vec<Recorded>>,
    latency: Mutex<Option<Duration>>,
}

impl FakeHttp {
    pub fn on(&self, method: &str, path: &str, status: u16, body: Value) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .entry((method.to_string(), path.to_string()))
            .or_default()
            .push_back((status, body));
        self
    }

    /// Replaces whatever the route had queued.
    pub fn set(&self, method: &str, path: &str, status: u16, body: Value) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .insert((method.to_string(), path.to_string()), VecDeque::from([(status, body)]));
        self
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, method: &str, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .count()
    }

    fn reply(&self, method: &str, path: &str) -> Option<(u16, Value)> {
        let mut routes = self.routes.lock().unwrap();
        let queue = routes.get_mut(&(method.to_string(), path.to_string()))?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl HttpTransport for FakeHttp {
    async fn execute(&self, request: HttpRequest) -> HttpResult {
        let method = request.method().as_str();
        let path = request
            .url()
            .as_str()
            .strip_prefix(BASE_URL)
            .unwrap_or_default()
            .to_string();
        let body = request
            .body()
            .map(|b| serde_json::from_slice(b).unwrap_or(Value::Null));
        self.requests.lock().unwrap().push(Recorded {
            method,
            path: path.clone(),
            body,
        });

        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let Some((status, body)) = self.reply(method, &path) else {
            return Err(HttpError::ConnectionError {
                host: "api.test".into(),
                message: format!("no route for {method} {path}"),
            });
        };
        let body = if body.is_null() {
            Vec::new()
        } else {
            serde_json::to_vec(&body).unwrap()
        };
        Ok(HttpResponse::new(
            status,
            HttpHeaders::new(),
            body,
            request.request_id().to_string(),
        ))
    }
}

// --- Realtime ---

struct OpenChannel {
    scope: ChannelScope,
    id: ChannelId,
    tx: mpsc::Sender<RealtimeEvent>,
}

#[derive(Default)]
pub struct FakeRealtime {
    channels: Mutex<Vec<OpenChannel>>,
    closed: Mutex<Vec<ChannelId>>,
}

impl FakeRealtime {
    /// Delivers `event` on every channel ever opened for `scope`, closed
    /// ones included, the way a late server push would.
    pub async fn push(&self, scope: &ChannelScope, event: RealtimeEvent) {
        let senders: Vec<_> = self
            .channels
            .lock()
            .unwrap()
            .iter()
            .filter(|c| &c.scope == scope)
            .map(|c| c.tx.clone())
            .collect();
        for tx in senders {
            let _ = tx.send(event.clone()).await;
        }
    }

    pub fn opened(&self, scope: &ChannelScope) -> usize {
        self.channels
            .lock()
            .unwrap()
            .iter()
            .filter(|c| &c.scope == scope)
            .count()
    }

    pub fn open_now(&self, scope: &ChannelScope) -> usize {
        let closed = self.closed.lock().unwrap();
        self.channels
            .lock()
            .unwrap()
            .iter()
            .filter(|c| &c.scope == scope && !closed.contains(&c.id))
            .count()
    }
}

#[async_trait]
impl RealtimeTransport for FakeRealtime {
    async fn open(
        &self,
        scope: &ChannelScope,
        _kinds: &[RealtimeEventKind],
    ) -> Result<Channel, RealtimeError> {
        let (tx, events) = mpsc::channel(config().realtime_buffer);
        let id = ChannelId::generate();
        self.channels.lock().unwrap().push(OpenChannel {
            scope: scope.clone(),
            id: id.clone(),
            tx,
        });
        Ok(Channel { id, events })
    }

    async fn close(&self, channel_id: &ChannelId) -> Result<(), RealtimeError> {
        self.closed.lock().unwrap().push(channel_id.clone());
        Ok(())
    }
}

// --- Storage ---

#[derive(Default)]
pub struct FakeStorage {
    objects: Mutex<HashMap<String, Bytes>>,
    deleted: Mutex<Vec<String>>,
}

impl FakeStorage {
    pub fn paths(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn put(&self, path: &str, bytes: &'static [u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(path.to_string(), Bytes::from_static(bytes));
    }
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn upload(
        &self,
        body: Bytes,
        metadata: ObjectMetadata,
    ) -> Result<StoredObject, StorageError> {
        self.objects
            .lock()
            .unwrap()
            .insert(metadata.path.clone(), body);
        Ok(StoredObject {
            url: format!("https://files.test/{}", metadata.path),
            path: metadata.path,
        })
    }

    async fn download(&self, path: &str) -> Result<Bytes, StorageError> {
        self.objects
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound { path: path.into() })
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        self.deleted.lock().unwrap().push(path.to_string());
        self.objects
            .lock()
            .unwrap()
            .remove(path)
            .map(drop)
            .ok_or_else(|| StorageError::NotFound { path: path.into() })
    }
}

// --- Store harness ---

pub struct Harness {
    pub http: Arc<FakeHttp>,
    pub realtime: Arc<FakeRealtime>,
    pub storage: Arc<FakeStorage>,
    pub session: Session,
    pub store: ViewStore,
}

impl Harness {
    pub fn new() -> Self {
        let http = Arc::new(FakeHttp::default());
        let realtime = Arc::new(FakeRealtime::default());
        let storage = Arc::new(FakeStorage::default());
        let session = Session::anonymous();
        let services = Services::new(
            &config(),
            session.clone(),
            http.clone(),
            realtime.clone(),
            storage.clone(),
        )
        .unwrap();
        let store = ViewStore::new(services).unwrap();
        Self {
            http,
            realtime,
            storage,
            session,
            store,
        }
    }

    pub async fn signed_in() -> Self {
        let harness = Self::new();
        harness
            .store
            .sign_in(UserId::new("u1").unwrap(), UserRole::Client, "tok-1")
            .await
            .unwrap();
        harness
    }

    /// Routes every slice of a case screen with empty but valid data.
    pub fn serve_case(&self, id: &str) {
        self.http
            .on("GET", &format!("cases/{id}"), 200, case_json(id))
            .on("GET", &format!("cases/{id}/analysis"), 404, json!({"message": "no analysis"}))
            .on("GET", &format!("cases/{id}/documents"), 200, json!([]))
            .on("GET", &format!("cases/{id}/matches"), 200, json!([]))
            .on("GET", &format!("cases/{id}/messages"), 200, json!([]));
    }

    /// Waits until the published view satisfies `pred`.
    pub async fn view_until(&self, pred: impl Fn(&ViewModel) -> bool) -> ViewModel {
        let mut rx = self.store.subscribe_view();
        let wait = rx.wait_for(|view| pred(view));
        let view = tokio::time::timeout(Duration::from_secs(60), wait)
            .await
            .expect("view never reached the expected state")
            .expect("view store stopped");
        view.clone()
    }
}

pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never became true");
}

// --- Fixtures ---

pub fn case_json(id: &str) -> Value {
    json!({
        "id": id,
        "title": "Unpaid wages",
        "description": "My employer has not paid the last two months of salary.",
        "status": "open",
        "client_id": "u1",
        "created_at": "2024-03-01T09:00:00Z"
    })
}

pub fn analysis_json(case: &str) -> Value {
    json!({
        "case_id": case,
        "summary": "Likely wage claim under state labor law.",
        "key_issues": ["unpaid salary"],
        "recommended_actions": ["send demand letter"],
        "confidence": 0.82
    })
}

pub fn message_json(id: &str, case: &str, at: &str) -> Value {
    json!({
        "id": id,
        "case_id": case,
        "sender_id": "lawyer-7",
        "body": format!("message {id}"),
        "created_at": at
    })
}

pub fn document_json(id: &str, case: &str, path: &str) -> Value {
    json!({
        "id": id,
        "case_id": case,
        "file_name": "contract.pdf",
        "mime_type": "application/pdf",
        "size_bytes": 2048,
        "storage_path": path,
        "uploaded_at": "2024-03-02T12:00:00Z"
    })
}

pub fn message_event(id: &str, case: &str, at: &str) -> RealtimeEvent {
    RealtimeEvent::new(
        RealtimeEventKind::MessageInserted,
        message_json(id, case, at),
    )
}
