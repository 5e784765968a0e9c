use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::model::{CaseId, Message, TicketId, TicketStatus};
use crate::{AppError, ErrorKind};

/// The entity a channel is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelScope {
    Case(CaseId),
    Ticket(TicketId),
}

impl ChannelScope {
    pub fn topic(&self) -> String {
        match self {
            Self::Case(id) => format!("case:{id}"),
            Self::Ticket(id) => format!("ticket:{id}"),
        }
    }
}

impl fmt::Display for ChannelScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.topic())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RealtimeEventKind {
    MessageInserted,
    MessageUpdated,
    TicketStatusChanged,
    CaseUpdated,
    #[serde(untagged)]
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeEvent {
    pub kind: RealtimeEventKind,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketStatusChange {
    pub ticket_id: TicketId,
    pub status: TicketStatus,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl RealtimeEvent {
    pub fn new(kind: RealtimeEventKind, payload: Value) -> Self {
        Self { kind, payload }
    }

    pub fn as_message(&self) -> Result<Message, RealtimeError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| RealtimeError::InvalidPayload {
            kind: format!("{:?}", self.kind),
            reason: e.to_string(),
        })
    }

    pub fn as_ticket_status(&self) -> Result<TicketStatusChange, RealtimeError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| RealtimeError::InvalidPayload {
            kind: format!("{:?}", self.kind),
            reason: e.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub String);

impl ChannelId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An open channel: its id and the stream of pushed events in arrival order.
#[derive(Debug)]
pub struct Channel {
    pub id: ChannelId,
    pub events: mpsc::Receiver<RealtimeEvent>,
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum RealtimeError {
    #[error("could not open channel {topic}: {reason}")]
    OpenFailed { topic: String, reason: String },

    #[error("channel {channel_id} is not open")]
    NotOpen { channel_id: String },

    #[error("invalid {kind} payload: {reason}")]
    InvalidPayload { kind: String, reason: String },

    #[error("realtime service unavailable: {message}")]
    Unavailable { message: String },
}

impl From<RealtimeError> for AppError {
    fn from(e: RealtimeError) -> Self {
        let kind = match &e {
            RealtimeError::InvalidPayload { .. } => ErrorKind::Deserialization,
            RealtimeError::OpenFailed { .. }
            | RealtimeError::NotOpen { .. }
            | RealtimeError::Unavailable { .. } => ErrorKind::Realtime,
        };
        AppError::new(kind, e.to_string())
    }
}

/// Server-push channel service (Supabase Realtime in production).
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    async fn open(
        &self,
        scope: &ChannelScope,
        kinds: &[RealtimeEventKind],
    ) -> Result<Channel, RealtimeError>;

    async fn close(&self, channel_id: &ChannelId) -> Result<(), RealtimeError>;
}
