//! Document payload retrieval.
//!
//! Storage itself belongs to the surrounding application. The extraction
//! subsystem only needs `fetch_payload(document_id) -> (bytes, category)`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::DocumentCategory;
use crate::ocr::error::OcrError;

/// Payloads above this size are refused (100MB).
pub const MAX_PAYLOAD_SIZE: u64 = 100 * 1024 * 1024;

/// File extensions uploads are stored under.
pub const STORED_EXTENSIONS: &[&str] = &[
    "pdf", "png", "jpg", "jpeg", "tif", "tiff", "gif", "bmp", "webp",
];

#[derive(Debug, Clone)]
pub struct DocumentPayload {
    pub bytes: Arc<[u8]>,
    pub mime_type: String,
    pub category: DocumentCategory,
}

impl DocumentPayload {
    /// Build a payload, sniffing the MIME type from the bytes.
    pub fn sniffed(bytes: Vec<u8>, filename: Option<&str>) -> Self {
        let mime_type = detect_mime_type(&bytes, filename);
        Self {
            category: DocumentCategory::from_mime_type(&mime_type),
            bytes: Arc::from(bytes),
            mime_type,
        }
    }
}

#[async_trait]
pub trait PayloadSource: Send + Sync {
    async fn fetch_payload(&self, document_id: Uuid) -> Result<DocumentPayload, OcrError>;
}

/// Magic bytes first, file extension second.
pub fn detect_mime_type(content: &[u8], filename: Option<&str>) -> String {
    if let Some(detected) = infer::get(content) {
        debug!("Magic bytes detected MIME type: {}", detected.mime_type());
        return detected.mime_type().to_string();
    }

    filename
        .and_then(|name| mime_guess::from_path(name).first())
        .map(|mime| mime.essence_str().to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

/// Documents stored as `<root>/<document_id>[.<ext>]`.
#[derive(Debug, Clone)]
pub struct FilesystemPayloadSource {
    root: PathBuf,
    max_size: u64,
}

impl FilesystemPayloadSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_size: MAX_PAYLOAD_SIZE,
        }
    }

    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Try `<root>/<id>` and `<root>/<id>.<ext>` for each stored extension.
    async fn locate(&self, document_id: Uuid) -> std::io::Result<Option<PathBuf>> {
        let stem = document_id.to_string();
        let candidates = std::iter::once(self.root.join(&stem)).chain(
            STORED_EXTENSIONS
                .iter()
                .map(|ext| self.root.join(format!("{}.{}", stem, ext))),
        );

        for path in candidates {
            match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => return Ok(Some(path)),
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl PayloadSource for FilesystemPayloadSource {
    async fn fetch_payload(&self, document_id: Uuid) -> Result<DocumentPayload, OcrError> {
        let failure = |details: String| OcrError::PayloadRetrievalFailure {
            document_id,
            details,
        };

        let path = self
            .locate(document_id)
            .await
            .map_err(|e| failure(format!("cannot read {}: {}", self.root.display(), e)))?
            .ok_or_else(|| failure("no stored file for document".to_string()))?;

        let size = tokio::fs::metadata(&path)
            .await
            .map_err(|e| failure(e.to_string()))?
            .len();
        if size > self.max_size {
            warn!("Refusing {} byte payload for document {}", size, document_id);
            return Err(failure(format!(
                "file is {} bytes, maximum is {} bytes",
                size, self.max_size
            )));
        }

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| failure(e.to_string()))?;
        let payload = DocumentPayload::sniffed(bytes, path.file_name().and_then(|n| n.to_str()));
        debug!(
            "Loaded document {} from {} ({}, {})",
            document_id,
            path.display(),
            payload.mime_type,
            payload.category
        );
        Ok(payload)
    }
}

/// Payloads held in memory, for tests and embedding.
#[derive(Default)]
pub struct InMemoryPayloadSource {
    payloads: RwLock<HashMap<Uuid, DocumentPayload>>,
}

impl InMemoryPayloadSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, document_id: Uuid, payload: DocumentPayload) {
        self.payloads.write().await.insert(document_id, payload);
    }
}

#[async_trait]
impl PayloadSource for InMemoryPayloadSource {
    async fn fetch_payload(&self, document_id: Uuid) -> Result<DocumentPayload, OcrError> {
        self.payloads
            .read()
            .await
            .get(&document_id)
            .cloned()
            .ok_or(OcrError::PayloadRetrievalFailure {
                document_id,
                details: "no stored payload for document".to_string(),
            })
    }
}
