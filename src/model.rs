//! Data types shared by the selector, orchestrator and exporter, plus the
//! wire formats spoken by the OCR service.

use std::fmt;

use schemars::JsonSchema;

use crate::{error::ValidationError, prelude::*};

/// Number of pages requested per batch. Fixed for the whole session so that
/// page-range math stays deterministic.
pub const BATCH_SIZE: u32 = 5;

/// Largest local payload the service accepts (16 MiB).
pub const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// File extensions the service knows how to OCR.
pub const ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tiff", "pdf", "djvu"];

/// The language we pre-select when the catalog offers it.
pub const DEFAULT_LANGUAGE: &str = "eng";

/// Where the document comes from. Exactly one variant is ever active.
#[derive(Clone, PartialEq, Eq)]
pub enum DocumentSource {
    /// A file uploaded from the local machine.
    LocalFile {
        /// Raw file contents.
        payload: Vec<u8>,
        /// File name, used for the multipart part and MIME detection.
        filename: String,
    },
    /// A document the service downloads itself.
    RemoteUrl(String),
}

impl DocumentSource {
    /// Build a local file source, checking the extension and size limits the
    /// service would otherwise reject after a full upload.
    pub fn local_file(
        payload: Vec<u8>,
        filename: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let filename = filename.into();
        let allowed = Path::new(&filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                ALLOWED_EXTENSIONS
                    .iter()
                    .any(|allowed| ext.eq_ignore_ascii_case(allowed))
            })
            .unwrap_or(false);
        if !allowed {
            return Err(ValidationError::UnsupportedFileType(filename));
        }
        if payload.len() > MAX_UPLOAD_BYTES {
            return Err(ValidationError::FileTooLarge {
                size: payload.len(),
                limit: MAX_UPLOAD_BYTES,
            });
        }
        Ok(DocumentSource::LocalFile { payload, filename })
    }

    /// Build a remote URL source.
    pub fn remote_url(url: impl Into<String>) -> Result<Self, ValidationError> {
        let url = url.into();
        let trimmed = url.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyUrl);
        }
        Ok(DocumentSource::RemoteUrl(trimmed.to_owned()))
    }

    /// Does this source need a real upload? Remote URLs carry no payload worth
    /// measuring.
    pub fn has_payload(&self) -> bool {
        matches!(self, DocumentSource::LocalFile { .. })
    }
}

// Payloads can be megabytes, so keep them out of logs.
impl fmt::Debug for DocumentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentSource::LocalFile { payload, filename } => f
                .debug_struct("LocalFile")
                .field("filename", filename)
                .field("len", &payload.len())
                .finish(),
            DocumentSource::RemoteUrl(url) => f.debug_tuple("RemoteUrl").field(url).finish(),
        }
    }
}

/// An opaque language identifier from the service's catalog, like `eng`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(transparent)]
pub struct LanguageCode(String);

impl LanguageCode {
    /// Wrap a raw code.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// The raw code.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LanguageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A catalog entry returned by `GET /languages`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub struct Language {
    /// Tesseract language code.
    pub code: String,

    /// Human-readable name.
    pub name: String,

    /// Writing system.
    pub script: String,
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<8}{} ({})", self.code, self.name, self.script)
    }
}

/// Everything needed to ask the service for one batch. Never mutated once a
/// request is in flight; the orchestrator hands out owned snapshots.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchRequestParams {
    pub source: DocumentSource,
    pub language: LanguageCode,
    /// 1-based.
    pub batch_index: u32,
    pub batch_size: u32,
}

/// The JSON body returned by `POST /ocr`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub struct OcrResponse {
    /// Extracted text, pages joined with a page-break marker.
    pub text: String,

    /// Total pages in the whole document.
    #[serde(default)]
    pub total_pages: u32,

    /// The batch the service actually returned. Images are always batch 1.
    #[serde(default)]
    pub batch: Option<u32>,

    /// The batch size the service actually used. Images are always 1.
    #[serde(default)]
    pub batch_size: Option<u32>,

    /// Pages included in this batch. May be short for the final batch.
    #[serde(default)]
    pub pages: u32,
}

/// Error body the service sends with non-success statuses.
#[derive(Clone, Debug, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// A batch of OCR text, as displayed to the user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchResult {
    pub text: String,
    pub total_pages: u32,
    pub batch_index: u32,
    pub batch_size: u32,
    pub pages_in_batch: u32,
}

impl BatchResult {
    /// Interpret a response to `params`. The response's own `batch` and
    /// `batch_size` win over what we asked for, because single images come
    /// back as one-page batches regardless of the request.
    pub fn from_response(params: &BatchRequestParams, response: OcrResponse) -> Self {
        Self {
            text: response.text,
            total_pages: response.total_pages,
            batch_index: response.batch.filter(|&b| b > 0).unwrap_or(params.batch_index),
            batch_size: response
                .batch_size
                .filter(|&s| s > 0)
                .unwrap_or(params.batch_size),
            pages_in_batch: response.pages,
        }
    }

    /// The pages this result covers.
    pub fn page_range(&self) -> BatchPageRange {
        BatchPageRange::new(self.batch_index, self.batch_size, self.pages_in_batch)
    }
}

/// Inclusive page numbers covered by a batch. A zero-page batch has
/// `end == start - 1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchPageRange {
    pub start: u32,
    pub end: u32,
}

impl BatchPageRange {
    /// Compute the range for a batch. A `batch_index` of 0 is treated as 1.
    /// Page numbers saturate at `u32::MAX` instead of wrapping, whatever the
    /// service sends.
    pub fn new(batch_index: u32, batch_size: u32, pages_in_batch: u32) -> Self {
        let start = Self::first_page(batch_index, batch_size);
        // `start >= 1`, so this never underflows, even for empty batches.
        let end = (start - 1).saturating_add(pages_in_batch);
        Self { start, end }
    }

    /// The range we expect a request to cover before the response tells us
    /// how many pages it really has.
    pub fn expected(batch_index: u32, batch_size: u32, total_pages: u32) -> Self {
        let start = Self::first_page(batch_index, batch_size);
        let end = (start - 1)
            .saturating_add(batch_size)
            .min(total_pages)
            .max(start - 1);
        Self { start, end }
    }

    fn first_page(batch_index: u32, batch_size: u32) -> u32 {
        (batch_index.max(1) - 1)
            .saturating_mul(batch_size)
            .saturating_add(1)
    }

    /// Does this range hold no pages?
    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

impl fmt::Display for BatchPageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}–{}", self.start, self.end)
    }
}
