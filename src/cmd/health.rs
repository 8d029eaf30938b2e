//! The `health` subcommand.

use clap::Args;

use crate::{cmd::ServiceOpts, prelude::*, service::OcrService as _};

/// Health check command line arguments.
#[derive(Debug, Args)]
pub struct HealthOpts {
    #[clap(flatten)]
    pub service: ServiceOpts,
}

/// The `health` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_health(opts: &HealthOpts) -> Result<()> {
    let service = opts.service.http_service()?;
    service
        .health()
        .await
        .with_context(|| format!("OCR service at {} is not healthy", opts.service.api_base))?;
    println!("OCR service at {} is healthy", opts.service.api_base);
    Ok(())
}
