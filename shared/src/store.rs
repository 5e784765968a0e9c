//! Host-side driver for the reducer.
//!
//! A single runner task owns the [`Model`]. Events arrive on its inbox, the
//! reducer applies them, and the commands it queues are executed as spawned
//! tasks whose results come back through the same inbox. Poll snapshots and
//! realtime pushes are forwarded into the inbox as events too, so the model
//! only ever changes on the runner task, one event at a time.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::api::ApiClient;
use crate::capabilities::{
    ChannelScope, HttpTransport, ObjectStorage, RealtimeEventKind, RealtimeTransport,
};
use crate::config::ClientConfig;
use crate::documents::{DocumentUpload, DocumentUploader, UploadLimits};
use crate::event::{Command, Event};
use crate::model::{CaseId, Model, UserId, UserRole};
use crate::poller::{PollerConfig, TaskPoller};
use crate::realtime::{RealtimeSubscriber, SubscriptionHandle};
use crate::session::Session;
use crate::view::ViewModel;
use crate::{AppError, AppResult, ErrorKind};

const CASE_CHANNEL_KINDS: &[RealtimeEventKind] = &[
    RealtimeEventKind::MessageInserted,
    RealtimeEventKind::MessageUpdated,
    RealtimeEventKind::CaseUpdated,
];

const TICKET_CHANNEL_KINDS: &[RealtimeEventKind] = &[RealtimeEventKind::TicketStatusChanged];

/// The collaborators commands are executed against.
#[derive(Clone, Debug)]
pub struct Services {
    pub api: ApiClient,
    pub realtime: RealtimeSubscriber,
    pub uploader: DocumentUploader,
    pub poller: PollerConfig,
}

impl Services {
    pub fn new(
        config: &ClientConfig,
        session: Session,
        http: Arc<dyn HttpTransport>,
        realtime: Arc<dyn RealtimeTransport>,
        storage: Arc<dyn ObjectStorage>,
    ) -> AppResult<Self> {
        let api = ApiClient::new(http, session, config)?;
        let poller = PollerConfig::from(config);
        poller.validate()?;
        Ok(Self {
            uploader: DocumentUploader::new(api.clone(), storage, UploadLimits::from(config)),
            realtime: RealtimeSubscriber::new(realtime),
            api,
            poller,
        })
    }
}

enum StoreMsg {
    Event(Event, Option<oneshot::Sender<()>>),
    Upload {
        case_id: CaseId,
        upload: DocumentUpload,
    },
    Completed {
        generation: u64,
        outcome: Outcome,
    },
    Settle(oneshot::Sender<()>),
    Inspect(oneshot::Sender<Model>),
}

enum Outcome {
    Event(Event),
    Subscribed(SubscriptionHandle),
}

pub struct ViewStore {
    tx: mpsc::UnboundedSender<StoreMsg>,
    view: watch::Receiver<ViewModel>,
    session: Session,
    runner: JoinHandle<()>,
}

impl std::fmt::Debug for ViewStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewStore")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl ViewStore {
    /// Spawns the runner on the current tokio runtime.
    pub fn new(services: Services) -> AppResult<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            AppError::new(ErrorKind::InvalidState, "view store needs an async runtime")
                .with_internal(e.to_string())
        })?;

        let (tx, inbox) = mpsc::unbounded_channel();
        let model = Model::new();
        let (view_tx, view) = watch::channel(ViewModel::from(&model));
        let session = services.api.session().clone();
        let poller = TaskPoller::new(Arc::new(services.api.clone()), services.poller);

        let mut snapshots = poller.subscribe();
        let forward = tx.clone();
        runtime.spawn(async move {
            while snapshots.changed().await.is_ok() {
                let snapshot = snapshots.borrow_and_update().clone();
                let event = Event::TaskObserved(Box::new(snapshot));
                if forward.send(StoreMsg::Event(event, None)).is_err() {
                    break;
                }
            }
        });

        let runner = Runner {
            model,
            services,
            inbox,
            loopback: tx.clone(),
            view_tx,
            poller,
            case_channel: None,
            ticket_channel: None,
            in_flight: 0,
            settle_waiters: Vec::new(),
        };

        Ok(Self {
            tx,
            view,
            session,
            runner: runtime.spawn(runner.run()),
        })
    }

    /// Applies `event` and starts the work it triggers. Resolves once the
    /// reducer has run and the new view is published.
    pub async fn dispatch(&self, event: Event) -> AppResult<()> {
        let (ack, done) = oneshot::channel();
        self.post(StoreMsg::Event(event, Some(ack)))?;
        done.await.map_err(|_| stopped())
    }

    /// Queues `event` without waiting for it.
    pub fn send(&self, event: Event) -> AppResult<()> {
        self.post(StoreMsg::Event(event, None))
    }

    /// Starts uploading `upload` to `case_id`. The outcome arrives as a
    /// `DocumentUploaded` event.
    pub fn upload(&self, case_id: CaseId, upload: DocumentUpload) -> AppResult<()> {
        self.post(StoreMsg::Upload { case_id, upload })
    }

    /// Resolves when every request started so far has finished and its
    /// result has been applied. Polling and open channels do not count.
    pub async fn settle(&self) -> AppResult<()> {
        let (ack, done) = oneshot::channel();
        self.post(StoreMsg::Settle(ack))?;
        done.await.map_err(|_| stopped())
    }

    pub async fn model(&self) -> AppResult<Model> {
        let (ack, done) = oneshot::channel();
        self.post(StoreMsg::Inspect(ack))?;
        done.await.map_err(|_| stopped())
    }

    pub fn view(&self) -> ViewModel {
        self.view.borrow().clone()
    }

    pub fn subscribe_view(&self) -> watch::Receiver<ViewModel> {
        self.view.clone()
    }

    pub async fn sign_in(
        &self,
        user_id: UserId,
        role: UserRole,
        access_token: impl Into<String>,
    ) -> AppResult<()> {
        self.session.start(user_id.clone(), role, access_token);
        self.dispatch(Event::SessionStarted { user_id, role }).await
    }

    /// Clears local state, closes channels, stops polling and ends the session.
    pub async fn sign_out(&self) -> AppResult<()> {
        self.dispatch(Event::SessionEnded).await
    }

    fn post(&self, msg: StoreMsg) -> AppResult<()> {
        self.tx.send(msg).map_err(|_| stopped())
    }
}

impl Drop for ViewStore {
    fn drop(&mut self) {
        self.runner.abort();
    }
}

fn stopped() -> AppError {
    AppError::new(ErrorKind::InvalidState, "view store has stopped")
}

struct Runner {
    model: Model,
    services: Services,
    inbox: mpsc::UnboundedReceiver<StoreMsg>,
    loopback: mpsc::UnboundedSender<StoreMsg>,
    view_tx: watch::Sender<ViewModel>,
    poller: TaskPoller,
    case_channel: Option<SubscriptionHandle>,
    ticket_channel: Option<SubscriptionHandle>,
    in_flight: usize,
    settle_waiters: Vec<oneshot::Sender<()>>,
}

impl Runner {
    async fn run(mut self) {
        info!("View store running");
        while let Some(msg) = self.inbox.recv().await {
            let ack = self.handle(msg);
            self.publish_view();
            if let Some(ack) = ack {
                let _ = ack.send(());
            }
            if self.in_flight == 0 {
                for waiter in self.settle_waiters.drain(..) {
                    let _ = waiter.send(());
                }
            }
        }
    }

    fn handle(&mut self, msg: StoreMsg) -> Option<oneshot::Sender<()>> {
        match msg {
            StoreMsg::Event(event, ack) => {
                self.apply(event);
                return ack;
            }
            StoreMsg::Upload { case_id, upload } => {
                self.apply(Event::DocumentUploadStarted {
                    case_id: case_id.clone(),
                    file_name: upload.file_name.clone(),
                });
                let uploader = self.services.uploader.clone();
                self.spawn(async move {
                    let result = uploader.upload(&case_id, upload).await;
                    Outcome::Event(Event::DocumentUploaded {
                        case_id,
                        result: Box::new(result),
                    })
                });
            }
            StoreMsg::Completed {
                generation,
                outcome,
            } => {
                self.in_flight = self.in_flight.saturating_sub(1);
                if generation != self.model.session_generation {
                    debug!(generation, "Dropping result from an ended session");
                    if let Outcome::Subscribed(handle) = outcome {
                        release(Some(handle));
                    }
                    return None;
                }
                match outcome {
                    Outcome::Event(event) => self.apply(event),
                    Outcome::Subscribed(handle) => self.attach(handle),
                }
            }
            StoreMsg::Settle(waiter) => self.settle_waiters.push(waiter),
            StoreMsg::Inspect(reply) => {
                let _ = reply.send(self.model.clone());
            }
        }
        None
    }

    fn apply(&mut self, event: Event) {
        self.model.update(event);
        for command in self.model.drain_commands() {
            self.execute(command);
        }
    }

    fn publish_view(&self) {
        let next = ViewModel::from(&self.model);
        self.view_tx.send_if_modified(|view| {
            if *view == next {
                false
            } else {
                *view = next;
                true
            }
        });
    }

    /// Runs `work` off the runner. Its outcome is applied only if the
    /// session that started it is still the current one.
    fn spawn<F>(&mut self, work: F)
    where
        F: Future<Output = Outcome> + Send + 'static,
    {
        self.in_flight += 1;
        let generation = self.model.session_generation;
        let loopback = self.loopback.clone();
        tokio::spawn(async move {
            let outcome = work.await;
            let _ = loopback.send(StoreMsg::Completed {
                generation,
                outcome,
            });
        });
    }

    fn execute(&mut self, command: Command) {
        let api = self.services.api.clone();
        match command {
            Command::FetchCases => self.spawn(async move {
                Outcome::Event(Event::CasesLoaded(Box::new(api.list_cases().await)))
            }),
            Command::FetchCase(case_id) => self.spawn(async move {
                let result = api.get_case(&case_id).await;
                Outcome::Event(Event::CaseLoaded {
                    case_id,
                    result: Box::new(result),
                })
            }),
            Command::FetchAnalysis(case_id) => self.spawn(async move {
                let result = api.get_analysis(&case_id).await;
                Outcome::Event(Event::AnalysisLoaded {
                    case_id,
                    result: Box::new(result),
                })
            }),
            Command::FetchDocuments(case_id) => self.spawn(async move {
                let result = api.list_documents(&case_id).await;
                Outcome::Event(Event::DocumentsLoaded {
                    case_id,
                    result: Box::new(result),
                })
            }),
            Command::FetchMatches(case_id) => self.spawn(async move {
                let result = api.list_matches(&case_id).await;
                Outcome::Event(Event::MatchesLoaded {
                    case_id,
                    result: Box::new(result),
                })
            }),
            Command::FetchMessages(case_id) => self.spawn(async move {
                let result = api.list_messages(&case_id).await;
                Outcome::Event(Event::MessagesLoaded {
                    case_id,
                    result: Box::new(result),
                })
            }),
            Command::SubscribeCase(case_id) => {
                self.subscribe(ChannelScope::Case(case_id), CASE_CHANNEL_KINDS);
            }
            Command::ReleaseCaseChannel => release(self.case_channel.take()),

            Command::StartTriage(case_id) => self.spawn(async move {
                let result = api.start_triage(&case_id).await;
                Outcome::Event(Event::TriageStarted {
                    case_id,
                    result: Box::new(result),
                })
            }),
            Command::PollTask(task_id) => {
                if let Err(err) = self.poller.start(task_id) {
                    error!(error = %err, "Could not start polling");
                }
            }
            Command::CancelPolling => self.poller.cancel(),
            Command::DeleteTask(task_id) => self.spawn(async move {
                let result = api.delete_task(&task_id).await;
                Outcome::Event(Event::TaskDeleted {
                    task_id,
                    result: Box::new(result),
                })
            }),

            Command::DeleteDocument {
                document_id,
                storage_path,
            } => {
                let uploader = self.services.uploader.clone();
                self.spawn(async move {
                    let result = uploader.delete(&document_id, &storage_path).await;
                    Outcome::Event(Event::DocumentDeleted {
                        document_id,
                        result: Box::new(result),
                    })
                });
            }

            Command::SendMessage { case_id, body } => self.spawn(async move {
                let result = api.send_message(&case_id, &body).await;
                Outcome::Event(Event::MessageSent {
                    case_id,
                    result: Box::new(result),
                })
            }),

            Command::FetchTickets => self.spawn(async move {
                Outcome::Event(Event::TicketsLoaded(Box::new(api.list_tickets().await)))
            }),
            Command::CreateTicket(ticket) => self.spawn(async move {
                Outcome::Event(Event::TicketCreated(Box::new(
                    api.create_ticket(&ticket).await,
                )))
            }),
            Command::SubscribeTicket(ticket_id) => {
                self.subscribe(ChannelScope::Ticket(ticket_id), TICKET_CHANNEL_KINDS);
            }
            Command::ReleaseTicketChannel => release(self.ticket_channel.take()),

            Command::CreateVideoSession(case_id) => self.spawn(async move {
                let result = api.create_video_session(&case_id).await;
                Outcome::Event(Event::VideoSessionReady {
                    case_id,
                    result: Box::new(result),
                })
            }),
            Command::SubmitLawyerApplication(application) => self.spawn(async move {
                Outcome::Event(Event::LawyerApplicationResult(Box::new(
                    api.submit_lawyer_application(&application).await,
                )))
            }),

            Command::ReleaseAll => {
                self.poller.cancel();
                release(self.case_channel.take());
                release(self.ticket_channel.take());
                self.services.api.session().end();
            }
        }
    }

    fn subscribe(&mut self, scope: ChannelScope, kinds: &'static [RealtimeEventKind]) {
        let realtime = self.services.realtime.clone();
        let loopback = self.loopback.clone();
        self.spawn(async move {
            let handler_scope = scope.clone();
            let handler = move |event| {
                let event = Event::RealtimeReceived {
                    scope: handler_scope.clone(),
                    event: Box::new(event),
                };
                let _ = loopback.send(StoreMsg::Event(event, None));
            };
            match realtime.subscribe(scope.clone(), kinds, handler).await {
                Ok(handle) => Outcome::Subscribed(handle),
                Err(error) => Outcome::Event(Event::RealtimeFailed {
                    scope,
                    error: Box::new(error),
                }),
            }
        });
    }

    /// Keeps a freshly opened channel only if its scope is still on screen.
    fn attach(&mut self, handle: SubscriptionHandle) {
        let slot = match handle.scope() {
            ChannelScope::Case(id)
                if self.model.current_case() == Some(id) && !self.model.case_screen.is_gone() =>
            {
                &mut self.case_channel
            }
            ChannelScope::Ticket(id) if self.model.tickets.open_ticket.as_ref() == Some(id) => {
                &mut self.ticket_channel
            }
            scope => {
                debug!(topic = %scope.topic(), "Channel opened after its screen closed");
                release(Some(handle));
                return;
            }
        };
        release(slot.replace(handle));
    }
}

fn release(handle: Option<SubscriptionHandle>) {
    if let Some(handle) = handle {
        tokio::spawn(async move {
            // Failures are logged by `unsubscribe`.
            let _ = handle.unsubscribe().await;
        });
    }
}
