//! Case document upload: object storage first, then the database record.

use bytes::Bytes;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::api::ApiClient;
use crate::capabilities::{validate_path, ObjectMetadata, ObjectStorage, StorageError};
use crate::config::ClientConfig;
use crate::model::{CaseId, Document, DocumentId, NewDocumentRecord};
use crate::{format_file_size, AppError, AppResult, ErrorKind, ErrorSeverity, FieldError};

const MAX_FILE_NAME_LENGTH: usize = 100;

/// A file picked by the user, ready to upload.
#[derive(Clone, Debug, PartialEq)]
pub struct DocumentUpload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Bytes,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadLimits {
    pub max_bytes: usize,
    pub allowed_mime_types: Vec<String>,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

impl From<&ClientConfig> for UploadLimits {
    fn from(config: &ClientConfig) -> Self {
        Self {
            max_bytes: config.max_upload_bytes,
            allowed_mime_types: config
                .allowed_mime_types
                .iter()
                .map(|m| m.to_lowercase())
                .collect(),
        }
    }
}

impl UploadLimits {
    /// Checks size and type. Returns the normalized MIME type.
    pub fn check(&self, upload: &DocumentUpload) -> AppResult<String> {
        if upload.file_name.trim().is_empty() {
            return Err(AppError::validation(vec![FieldError::new(
                "file_name",
                "File name is required",
            )]));
        }
        if upload.bytes.is_empty() {
            return Err(AppError::validation(vec![FieldError::new(
                "file",
                "The file is empty",
            )]));
        }
        if upload.bytes.len() > self.max_bytes {
            return Err(AppError::validation(vec![FieldError::new(
                "file",
                format!(
                    "The file is {}; the limit is {}",
                    format_file_size(upload.bytes.len() as u64),
                    format_file_size(self.max_bytes as u64)
                ),
            )]));
        }

        let mime = normalize_mime(&upload.mime_type);
        if !self.allowed_mime_types.iter().any(|m| *m == mime) {
            return Err(AppError::validation(vec![FieldError::new(
                "mime_type",
                format!("Files of type '{mime}' are not accepted"),
            )]));
        }
        Ok(mime)
    }
}

fn normalize_mime(raw: &str) -> String {
    raw.split(';').next().unwrap_or_default().trim().to_lowercase()
}

/// Replaces anything outside `[A-Za-z0-9._-]` so the name is a safe path
/// segment.
fn sanitize_segment(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_FILE_NAME_LENGTH)
        .collect();
    let cleaned = cleaned.trim_matches('.').to_string();
    if cleaned.is_empty() {
        "document".to_string()
    } else {
        cleaned
    }
}

pub fn content_checksum(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

#[derive(Clone)]
pub struct DocumentUploader {
    api: ApiClient,
    storage: Arc<dyn ObjectStorage>,
    limits: UploadLimits,
}

impl std::fmt::Debug for DocumentUploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentUploader")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl DocumentUploader {
    pub fn new(api: ApiClient, storage: Arc<dyn ObjectStorage>, limits: UploadLimits) -> Self {
        Self {
            api,
            storage,
            limits,
        }
    }

    pub fn limits(&self) -> &UploadLimits {
        &self.limits
    }

    /// Validates, uploads the bytes, then creates the document record. If the
    /// record cannot be created the stored object is removed again.
    #[instrument(skip(self, upload), fields(case_id = %case_id, size = upload.bytes.len()))]
    pub async fn upload(&self, case_id: &CaseId, upload: DocumentUpload) -> AppResult<Document> {
        let mime_type = self.limits.check(&upload)?;
        let checksum = content_checksum(&upload.bytes);
        let path = format!(
            "cases/{}/{}-{}",
            sanitize_segment(case_id.as_str()),
            uuid::Uuid::new_v4(),
            sanitize_segment(&upload.file_name)
        );
        validate_path(&path)?;

        let size_bytes = upload.bytes.len() as u64;
        let stored = self
            .storage
            .upload(
                upload.bytes,
                ObjectMetadata {
                    path,
                    content_type: mime_type.clone(),
                    checksum: checksum.clone(),
                },
            )
            .await
            .map_err(|e| {
                warn!(error = %e, "Object upload failed");
                AppError::from(e)
            })?;

        let record = NewDocumentRecord {
            file_name: upload.file_name.trim().to_string(),
            mime_type,
            size_bytes,
            storage_path: stored.path.clone(),
            url: stored.url,
            checksum,
        };

        match self.api.create_document(case_id, &record).await {
            Ok(document) => {
                info!(document_id = %document.id, "Document uploaded");
                Ok(document)
            }
            Err(err) => {
                warn!(error = %err, path = %stored.path, "Document record failed, removing stored object");
                if let Err(cleanup) = self.storage.delete(&stored.path).await {
                    error!(error = %cleanup, path = %stored.path, "Orphaned object left in storage");
                }
                Err(err)
            }
        }
    }

    /// Deletes the record, then the stored object. A missing object is not
    /// an error; other storage failures are logged and left for cleanup.
    #[instrument(skip(self), fields(document_id = %document_id))]
    pub async fn delete(&self, document_id: &DocumentId, storage_path: &str) -> AppResult<()> {
        self.api.delete_document(document_id).await?;
        match self.storage.delete(storage_path).await {
            Ok(()) | Err(StorageError::NotFound { .. }) => {}
            Err(e) => warn!(error = %e, path = storage_path, "Stored object not removed"),
        }
        info!("Document deleted");
        Ok(())
    }

    /// Fetches the stored bytes and checks them against the recorded
    /// checksum when one exists.
    #[instrument(skip(self, document), fields(document_id = %document.id))]
    pub async fn download(&self, document: &Document) -> AppResult<Bytes> {
        let bytes = self.storage.download(&document.storage_path).await?;
        if let Some(expected) = &document.checksum {
            let actual = content_checksum(&bytes);
            if !actual.eq_ignore_ascii_case(expected) {
                error!(expected = %expected, actual = %actual, "Document checksum mismatch");
                return Err(AppError::new(ErrorKind::Storage, "Document checksum mismatch")
                    .with_severity(ErrorSeverity::Permanent)
                    .with_context("document_id", document.id.as_str()));
            }
        }
        Ok(bytes)
    }
}
