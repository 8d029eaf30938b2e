//! The `process` subcommand.

use anyhow::anyhow;
use clap::{ArgGroup, Args};
use tokio::io::{AsyncBufReadExt as _, BufReader};

use crate::{
    cmd::ServiceOpts,
    error::{OcrError, ValidationError},
    export::{export_pdf, export_text, is_nothing_to_export, save_artifact},
    orchestrator::{Orchestrator, OrchestratorState, Phase},
    prelude::*,
    ui::Ui,
};

/// Process command line arguments.
#[derive(Debug, Args)]
#[clap(group(ArgGroup::new("source").required(true).args(["file", "url"])))]
pub struct ProcessOpts {
    #[clap(flatten)]
    pub service: ServiceOpts,

    /// A local PDF, DjVu or image (PNG, JPEG, TIFF) to upload.
    #[clap(short = 'f', long, value_name = "PATH")]
    pub file: Option<PathBuf>,

    /// A URL the service should download the document from, such as a
    /// Wikimedia Commons or Wikisource file page.
    #[clap(short = 'u', long, value_name = "URL")]
    pub url: Option<String>,

    /// The OCR language code. Defaults to `eng` when the service offers it.
    #[clap(short = 'l', long)]
    pub language: Option<String>,

    /// The batch to start with. Batch 1 is pages 1-5, batch 2 pages 6-10,
    /// and so on.
    #[clap(short = 'b', long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub batch: u32,

    /// Where to save exported files.
    #[clap(short = 'o', long = "out-dir", default_value = ".")]
    pub out_dir: PathBuf,

    /// Save each displayed batch as `ocr_result_<start>-<end>.txt`.
    #[clap(long)]
    pub txt: bool,

    /// Save each displayed batch as `ocr_result_<start>-<end>.pdf`, rendered
    /// by the service.
    #[clap(long)]
    pub pdf: bool,

    /// Keep going until the last batch of the document.
    #[clap(long, conflicts_with = "interactive")]
    pub all: bool,

    /// Navigate batches with commands read from standard input.
    #[clap(short = 'i', long)]
    pub interactive: bool,
}

/// A user action that triggers a batch request.
#[derive(Clone, Copy, Debug)]
enum Step {
    Batch(u32),
    Next,
    Previous,
    Retry,
}

/// The `process` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_process(ui: Ui, opts: &ProcessOpts) -> Result<()> {
    let orchestrator = opts.service.orchestrator()?;
    orchestrator.load_catalog().await?;

    if let Some(code) = &opts.language {
        if !orchestrator.select_language(code) {
            return Err(OcrError::from(ValidationError::UnknownLanguage(code.clone())))
                .context("run `ocr-batcher languages` to list the available codes");
        }
    }

    match orchestrator.language() {
        Some(code) => info!(%code, "Using OCR language"),
        None => {
            return Err(OcrError::from(ValidationError::NoLanguage))
                .context("the service does not offer `eng`, so pass --language");
        }
    }

    match (&opts.file, &opts.url) {
        (Some(path), None) => select_file(&orchestrator, path).await?,
        (None, Some(url)) => orchestrator.select_remote_url(url.as_str())?,
        _ => return Err(anyhow!("pass exactly one of --file or --url")),
    }

    perform(&ui, &orchestrator, Step::Batch(opts.batch)).await?;
    show_and_export(&orchestrator, opts).await?;

    if opts.all {
        while orchestrator.state().can_go_next() {
            perform(&ui, &orchestrator, Step::Next).await?;
            show_and_export(&orchestrator, opts).await?;
        }
    } else if opts.interactive {
        interact(&ui, &orchestrator, opts).await?;
    }
    Ok(())
}

/// Read a local document and make it the current source.
async fn select_file(orchestrator: &Orchestrator, path: &Path) -> Result<()> {
    let payload = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {:?}", path))?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("{:?} does not name a file", path))?;
    orchestrator.select_local_file(payload, filename)?;
    Ok(())
}

/// Switch to another document, given as a URL or a local path, and show its
/// first batch.
async fn open_document(ui: &Ui, orchestrator: &Orchestrator, target: &str) -> Result<()> {
    orchestrator.clear_source()?;
    if target.starts_with("http://") || target.starts_with("https://") {
        orchestrator.select_remote_url(target)?;
    } else {
        select_file(orchestrator, Path::new(target)).await?;
    }
    navigate(ui, orchestrator, Step::Batch(1)).await
}

/// Run one step with progress displayed.
async fn perform(ui: &Ui, orchestrator: &Orchestrator, step: Step) -> Result<(), OcrError> {
    let state = orchestrator.state();
    let target = match step {
        Step::Batch(batch_index) => batch_index,
        Step::Next => state.batch_index.saturating_add(1),
        Step::Previous => state.batch_index.saturating_sub(1).max(1),
        Step::Retry => state.last_requested.unwrap_or(state.batch_index),
    };
    let status = state.status_message(target);
    let progress = orchestrator.subscribe_progress();
    match step {
        Step::Batch(batch_index) => {
            ui.show_progress(progress, &status, orchestrator.request_batch(batch_index))
                .await
        }
        Step::Next => ui.show_progress(progress, &status, orchestrator.next()).await,
        Step::Previous => {
            ui.show_progress(progress, &status, orchestrator.previous())
                .await
        }
        Step::Retry => ui.show_progress(progress, &status, orchestrator.retry()).await,
    }
}

/// Print the displayed batch and save any requested exports.
async fn show_and_export(orchestrator: &Orchestrator, opts: &ProcessOpts) -> Result<()> {
    print_displayed(orchestrator);
    if opts.txt {
        save_text(orchestrator, opts).await?;
    }
    if opts.pdf {
        save_pdf(orchestrator, opts).await?;
    }
    Ok(())
}

fn print_displayed(orchestrator: &Orchestrator) {
    let state = orchestrator.state();
    if let (Some(label), Some(result)) = (state.range_label(), state.displayed_result()) {
        println!("===== {label} =====");
        if result.page_range().is_empty() {
            println!("(no pages in this batch)");
        } else {
            println!("{}", result.text);
        }
    }
}

async fn save_text(orchestrator: &Orchestrator, opts: &ProcessOpts) -> Result<()> {
    let artifact = export_text(orchestrator)?;
    let path = save_artifact(&opts.out_dir, &artifact).await?;
    eprintln!("Saved {}", path.display());
    Ok(())
}

async fn save_pdf(orchestrator: &Orchestrator, opts: &ProcessOpts) -> Result<()> {
    let artifact = export_pdf(orchestrator).await?;
    let path = save_artifact(&opts.out_dir, &artifact).await?;
    eprintln!("Saved {}", path.display());
    Ok(())
}

/// Read navigation commands from standard input until `q` or end of input.
///
/// Errors here are reported and the session carries on, the way a UI would
/// show an error banner.
async fn interact(ui: &Ui, orchestrator: &Orchestrator, opts: &ProcessOpts) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print_prompt(orchestrator);
        let Some(line) = lines
            .next_line()
            .await
            .context("Failed to read from standard input")?
        else {
            return Ok(());
        };
        let line = line.trim();
        let (command, argument) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(command, rest)| (command, rest.trim()));
        let outcome = match command {
            "o" | "open" if !argument.is_empty() => {
                open_document(ui, orchestrator, argument).await
            }
            "n" | "next" => navigate(ui, orchestrator, Step::Next).await,
            "p" | "prev" | "previous" => navigate(ui, orchestrator, Step::Previous).await,
            "r" | "retry" => navigate(ui, orchestrator, Step::Retry).await,
            "t" | "txt" => save_text(orchestrator, opts).await,
            "f" | "pdf" => save_pdf(orchestrator, opts).await,
            "q" | "quit" => return Ok(()),
            "" => Ok(()),
            other => Err(anyhow!("unknown command {:?}", other)),
        };
        if let Err(err) = outcome {
            match err.downcast_ref::<OcrError>() {
                Some(ocr_err) if is_nothing_to_export(ocr_err) => {
                    eprintln!("Nothing to export yet.")
                }
                _ => eprintln!("Error: {err:#}"),
            }
        }
    }
}

async fn navigate(ui: &Ui, orchestrator: &Orchestrator, step: Step) -> Result<()> {
    perform(ui, orchestrator, step).await?;
    print_displayed(orchestrator);
    Ok(())
}

fn print_prompt(orchestrator: &Orchestrator) {
    let commands = prompt_commands(&orchestrator.state(), orchestrator.phase());
    eprint!("{} > ", commands.join(" "));
}

/// The commands worth offering in `phase`.
fn prompt_commands(state: &OrchestratorState, phase: Phase) -> Vec<&'static str> {
    let mut commands = vec![];
    if matches!(phase, Phase::Displaying | Phase::Failed) {
        if state.can_go_previous() {
            commands.push("[p]rev");
        }
        if state.can_go_next() {
            commands.push("[n]ext");
        }
    }
    if phase == Phase::Failed {
        commands.push("[r]etry");
    }
    if state.can_export() {
        commands.push("[t]xt");
        commands.push("pd[f]");
    }
    commands.push("[o]pen <url|path>");
    commands.push("[q]uit");
    commands
}
