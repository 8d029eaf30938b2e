//! The remote OCR service.
//!
//! All OCR work happens on the server. We only need to list languages, ask for
//! a batch of text, and ask for the same batch rendered as a PDF.

use async_trait::async_trait;

use crate::{
    error::ServiceFailure,
    model::{BatchRequestParams, Language, OcrResponse},
    progress::ProgressTracker,
};

pub mod http;

pub use self::http::HttpOcrService;

/// Operations the orchestrator needs from the OCR service.
#[async_trait]
pub trait OcrService: Send + Sync {
    /// `GET /languages`: the supported languages, in display order.
    async fn languages(&self) -> Result<Vec<Language>, ServiceFailure>;

    /// `POST /ocr`: OCR one batch. Upload progress is reported to `progress`.
    async fn recognize(
        &self,
        params: &BatchRequestParams,
        progress: &ProgressTracker,
    ) -> Result<OcrResponse, ServiceFailure>;

    /// `POST /ocr/pdf`: the same batch as a rendered PDF.
    async fn render_pdf(&self, params: &BatchRequestParams)
    -> Result<Vec<u8>, ServiceFailure>;

    /// `GET /health`.
    async fn health(&self) -> Result<(), ServiceFailure>;
}
