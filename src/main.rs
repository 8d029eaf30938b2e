use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::Directive, fmt::format::FmtSpan, layer::SubscriberExt,
    util::SubscriberInitExt as _,
};

use self::{prelude::*, ui::Ui};

mod cmd;
mod error;
mod export;
mod model;
mod orchestrator;
mod prelude;
mod progress;
mod selector;
mod service;
mod ui;

/// OCR scanned documents with a remote OCR service, a few pages at a time.
#[derive(Debug, Parser)]
#[clap(
    version,
    author,
    after_help = r#"
Environment Variables:
  - OCR_API_BASE (optional): Override the OCR service URL.
  - OCR_TIMEOUT (optional): Per-request timeout, in seconds.
  - RUST_LOG (optional): Logging filter, like `debug` or `ocr_batcher=trace`.

  These variables may be set in a standard `.env` file.
"#
)]
struct Opts {
    #[clap(subcommand)]
    subcmd: Cmd,
}

/// The subcommands we support.
#[derive(Debug, Subcommand)]
enum Cmd {
    /// List the languages the OCR service supports.
    Languages(cmd::languages::LanguagesOpts),
    /// OCR a document batch by batch, printing and optionally saving each one.
    Process(cmd::process::ProcessOpts),
    /// Check that the OCR service is up.
    Health(cmd::health::HealthOpts),
    /// Print schemas for the service's JSON formats.
    Schema(cmd::schema::SchemaOpts),
}

/// Our entry point, which can return an error. [`anyhow::Result`] will
/// automatically print a nice error message with optional backtrace.
#[tokio::main]
async fn main() -> Result<()> {
    let ui = Ui::init();

    // Initialize tracing.
    let directive =
        Directive::from_str("info").expect("built-in directive should be valid");
    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_writer(ui.get_stderr_writer())
        .with_filter(env_filter);

    // We can stack multiple layers here if we need to.
    tracing_subscriber::registry().with(subscriber).init();

    // Call our real `main` function now that logging is set up.
    real_main(ui).await
}

/// Our real entry point.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main(ui: Ui) -> Result<()> {
    // Load environment variables from a `.env` file, if it exists.
    dotenvy::dotenv().ok();

    // Parse command-line arguments.
    let opts = Opts::parse();
    debug!("Parsed options: {:?}", opts);

    match &opts.subcmd {
        Cmd::Languages(opts) => cmd::languages::cmd_languages(opts).await,
        Cmd::Process(opts) => cmd::process::cmd_process(ui, opts).await,
        Cmd::Health(opts) => cmd::health::cmd_health(opts).await,
        Cmd::Schema(opts) => cmd::schema::cmd_schema(opts).await,
    }
}
