//! Command-line entry points.

use std::{sync::Arc, time::Duration};

use clap::Args;

use crate::{orchestrator::Orchestrator, prelude::*, service::HttpOcrService};

pub mod health;
pub mod languages;
pub mod process;
pub mod schema;

/// Default base URL of the OCR service.
pub const DEFAULT_API_BASE: &str = "http://localhost:5000/api";

/// Options for talking to the OCR service.
#[derive(Debug, Clone, Args)]
pub struct ServiceOpts {
    /// Base URL of the OCR service. The `languages`, `ocr`, `ocr/pdf` and
    /// `health` endpoints are resolved relative to it.
    #[clap(long, env = "OCR_API_BASE", default_value = DEFAULT_API_BASE)]
    pub api_base: String,

    /// Give up on any single request after this many seconds. By default we
    /// wait as long as the service takes, which can be minutes for large
    /// documents.
    #[clap(long, env = "OCR_TIMEOUT")]
    pub timeout: Option<u64>,
}

impl ServiceOpts {
    /// Create an HTTP client for the configured service.
    pub fn http_service(&self) -> Result<HttpOcrService> {
        debug!(api_base = %self.api_base, timeout = ?self.timeout, "Connecting to OCR service");
        HttpOcrService::new(&self.api_base, self.timeout.map(Duration::from_secs))
    }

    /// Create an orchestrator backed by the configured service.
    pub fn orchestrator(&self) -> Result<Orchestrator> {
        Ok(Orchestrator::new(Arc::new(self.http_service()?)))
    }
}
