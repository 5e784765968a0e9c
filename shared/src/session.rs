//! Signed-in session context.
//!
//! Created at sign-in and handed to the [`crate::api::ApiClient`] explicitly.
//! Clones share the same state, so `end()` on any clone signs every holder
//! out.

use secrecy::{ExposeSecret, SecretString};
use std::sync::{Arc, RwLock};
use tracing::info;

use crate::model::{SessionInfo, UserId, UserRole};
use crate::{AppError, AppResult, ErrorKind};

struct SessionState {
    user_id: UserId,
    role: UserRole,
    access_token: SecretString,
}

#[derive(Clone, Default)]
pub struct Session {
    state: Arc<RwLock<Option<SessionState>>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("info", &self.info())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// A session with no signed-in user.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn signed_in(user_id: UserId, role: UserRole, access_token: impl Into<String>) -> Self {
        let session = Self::default();
        session.start(user_id, role, access_token);
        session
    }

    pub fn start(&self, user_id: UserId, role: UserRole, access_token: impl Into<String>) {
        info!(user_id = %user_id, role = ?role, "Session started");
        let state = SessionState {
            user_id,
            role,
            access_token: SecretString::new(access_token.into()),
        };
        *self.write() = Some(state);
    }

    /// Clears the token. Requests made afterwards fail with `Authentication`.
    pub fn end(&self) {
        if self.write().take().is_some() {
            info!("Session ended");
        }
    }

    pub fn is_active(&self) -> bool {
        self.read().is_some()
    }

    pub fn info(&self) -> Option<SessionInfo> {
        self.read().as_ref().map(|s| SessionInfo {
            user_id: s.user_id.clone(),
            role: s.role,
        })
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.read().as_ref().map(|s| s.user_id.clone())
    }

    pub fn role(&self) -> Option<UserRole> {
        self.read().as_ref().map(|s| s.role)
    }

    /// Token for the `Authorization` header.
    pub fn bearer(&self) -> AppResult<String> {
        self.read()
            .as_ref()
            .map(|s| s.access_token.expose_secret().clone())
            .ok_or_else(|| AppError::new(ErrorKind::Authentication, "No active session"))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Option<SessionState>> {
        self.state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Option<SessionState>> {
        self.state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
