//! Realtime subscriptions.
//!
//! Each `subscribe` opens one channel on the transport and spawns a pump that
//! hands events to the caller's handler in arrival order. The handler sits
//! behind a mutex the pump holds while delivering, and `unsubscribe` removes
//! it under that same mutex. Once `unsubscribe` returns, no delivery is in
//! progress and none will start.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::capabilities::{
    ChannelId, ChannelScope, RealtimeError, RealtimeEvent, RealtimeEventKind, RealtimeTransport,
};
use crate::AppResult;

pub type EventHandler = Box<dyn FnMut(RealtimeEvent) + Send + 'static>;

type HandlerSlot = Arc<Mutex<Option<EventHandler>>>;

fn lock_slot(slot: &HandlerSlot) -> MutexGuard<'_, Option<EventHandler>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
pub struct RealtimeSubscriber {
    transport: Arc<dyn RealtimeTransport>,
}

impl std::fmt::Debug for RealtimeSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeSubscriber").finish_non_exhaustive()
    }
}

impl RealtimeSubscriber {
    pub fn new(transport: Arc<dyn RealtimeTransport>) -> Self {
        Self { transport }
    }

    /// Opens exactly one channel for `scope` and forwards every event whose
    /// kind is in `kinds` to `handler`. An empty `kinds` list forwards
    /// everything the channel delivers.
    #[instrument(skip(self, kinds, handler), fields(topic = %scope.topic()))]
    pub async fn subscribe<F>(
        &self,
        scope: ChannelScope,
        kinds: &[RealtimeEventKind],
        handler: F,
    ) -> AppResult<SubscriptionHandle>
    where
        F: FnMut(RealtimeEvent) + Send + 'static,
    {
        let channel = self.transport.open(&scope, kinds).await.map_err(|e| {
            warn!(error = %e, "Failed to open realtime channel");
            crate::AppError::from(e)
        })?;
        info!(channel_id = %channel.id, "Realtime channel opened");

        let slot: HandlerSlot = Arc::new(Mutex::new(Some(Box::new(handler))));
        let pump = tokio::spawn(pump(
            channel.events,
            Arc::clone(&slot),
            kinds.to_vec(),
            channel.id.clone(),
        ));

        Ok(SubscriptionHandle {
            scope,
            channel_id: channel.id,
            slot,
            pump: Some(pump),
            transport: Some(Arc::clone(&self.transport)),
        })
    }
}

async fn pump(
    mut events: tokio::sync::mpsc::Receiver<RealtimeEvent>,
    slot: HandlerSlot,
    kinds: Vec<RealtimeEventKind>,
    channel_id: ChannelId,
) {
    while let Some(event) = events.recv().await {
        if !kinds.is_empty() && !kinds.contains(&event.kind) {
            debug!(channel_id = %channel_id, kind = ?event.kind, "Ignoring unsubscribed event kind");
            continue;
        }
        let mut guard = lock_slot(&slot);
        match guard.as_mut() {
            Some(handler) => handler(event),
            None => break,
        }
    }
    debug!(channel_id = %channel_id, "Realtime pump finished");
}

/// Owned by the screen that subscribed. Dropping it releases the channel.
pub struct SubscriptionHandle {
    scope: ChannelScope,
    channel_id: ChannelId,
    slot: HandlerSlot,
    pump: Option<JoinHandle<()>>,
    transport: Option<Arc<dyn RealtimeTransport>>,
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("scope", &self.scope)
            .field("channel_id", &self.channel_id)
            .finish_non_exhaustive()
    }
}

impl SubscriptionHandle {
    pub fn scope(&self) -> &ChannelScope {
        &self.scope
    }

    pub fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    pub fn is_active(&self) -> bool {
        lock_slot(&self.slot).is_some()
    }

    /// Detaches the handler, stops the pump and closes the channel.
    #[instrument(skip(self), fields(channel_id = %self.channel_id))]
    pub async fn unsubscribe(mut self) -> Result<(), RealtimeError> {
        self.detach();
        match self.transport.take() {
            Some(transport) => {
                let result = transport.close(&self.channel_id).await;
                match &result {
                    Ok(()) => info!("Realtime channel closed"),
                    Err(e) => warn!(error = %e, "Realtime channel close failed"),
                }
                result
            }
            None => Ok(()),
        }
    }

    fn detach(&mut self) {
        lock_slot(&self.slot).take();
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.detach();
        let Some(transport) = self.transport.take() else {
            return;
        };
        let channel_id = self.channel_id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = transport.close(&channel_id).await {
                        warn!(channel_id = %channel_id, error = %e, "Realtime channel close failed");
                    }
                });
            }
            Err(_) => {
                warn!(channel_id = %channel_id, "Subscription dropped outside a runtime, channel left open");
            }
        }
    }
}
