use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{AppError, ErrorKind};

pub const MAX_STORAGE_PATH_LENGTH: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub path: String,
    pub content_type: String,
    /// Hex blake3 digest of the object body.
    pub checksum: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub url: String,
    pub path: String,
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum StorageError {
    #[error("invalid storage path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("object not found: {path}")]
    NotFound { path: String },

    #[error("object too large: {size} bytes exceeds maximum of {max} bytes")]
    TooLarge { size: usize, max: usize },

    #[error("storage permission denied for {path}")]
    PermissionDenied { path: String },

    #[error("storage unavailable: {message}")]
    Unavailable { message: String },
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        let kind = match &e {
            StorageError::InvalidPath { .. } | StorageError::TooLarge { .. } => {
                ErrorKind::Validation
            }
            StorageError::NotFound { .. } => ErrorKind::NotFound,
            StorageError::PermissionDenied { .. } => ErrorKind::Authorization,
            StorageError::Unavailable { .. } => ErrorKind::Storage,
        };
        AppError::new(kind, e.to_string())
    }
}

/// Validates an object path: relative, no traversal, no control characters.
pub fn validate_path(path: &str) -> Result<(), StorageError> {
    let invalid = |reason: &str| StorageError::InvalidPath {
        path: path.chars().take(100).collect(),
        reason: reason.to_string(),
    };

    if path.is_empty() {
        return Err(invalid("path cannot be empty"));
    }
    if path.len() > MAX_STORAGE_PATH_LENGTH {
        return Err(invalid("path is too long"));
    }
    if path.starts_with('/') {
        return Err(invalid("path must be relative"));
    }
    if path.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
        return Err(invalid("path contains an empty or relative segment"));
    }
    if path.chars().any(char::is_control) {
        return Err(invalid("path contains control characters"));
    }
    Ok(())
}

/// Blob storage bucket (Supabase Storage in production).
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn upload(&self, body: Bytes, metadata: ObjectMetadata)
        -> Result<StoredObject, StorageError>;

    async fn download(&self, path: &str) -> Result<Bytes, StorageError>;

    async fn delete(&self, path: &str) -> Result<(), StorageError>;
}
