//! Terminal UI: upload bars, processing spinners, and a stderr writer that
//! plays nicely with both.
//!
//! This is adapted from `substudy` by Eric Kidd, which is licensed under
//! Apache-2.0 OR MIT. Used with permission.

use std::{borrow::Cow, io, sync::Arc, time::Duration};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::watch;

use crate::progress::Progress;

/// Application UI state.
#[derive(Clone)]
pub struct Ui {
    /// Our progress bars, shared with the stderr writer.
    multi_progress: Arc<MultiProgress>,
}

impl Ui {
    /// Create a new UI.
    pub fn init() -> Ui {
        let multi_progress = Arc::new(MultiProgress::new());
        Ui { multi_progress }
    }

    /// Create a new UI for unit tests.
    #[cfg(test)]
    pub fn init_for_tests() -> Ui {
        let multi_progress =
            Arc::new(MultiProgress::with_draw_target(indicatif::ProgressDrawTarget::hidden()));
        Ui { multi_progress }
    }

    /// Get a writer than can be used to write to stderr, for use with `tracing`
    /// and other output code.
    pub fn get_stderr_writer(&self) -> SafeStderrWriter {
        SafeStderrWriter { ui: self.clone() }
    }

    /// Get a reference to our progress bars.
    pub fn multi_progress(&self) -> &MultiProgress {
        &self.multi_progress
    }

    /// Create a new progress bar with default settings.
    pub fn new_progress_bar(&self, config: &ProgressConfig<'_>, len: u64) -> ProgressBar {
        let pb = ProgressBar::new(len).with_style(default_progress_style());
        let pb = self.multi_progress.add(pb);
        #[cfg(test)]
        pb.set_draw_target(indicatif::ProgressDrawTarget::hidden());
        pb.set_prefix(config.emoji.to_owned());
        pb.set_message(config.msg.to_owned());
        pb.enable_steady_tick(Duration::from_millis(250));
        pb.with_finish(indicatif::ProgressFinish::WithMessage(Cow::Owned(
            config.done_msg.to_owned(),
        )))
    }

    /// Create a new spinner with default settings.
    pub fn new_spinner(&self, config: &ProgressConfig<'_>) -> ProgressBar {
        let sp = ProgressBar::new_spinner().with_style(default_spinner_style());
        let sp = self.multi_progress.add(sp);
        #[cfg(test)]
        sp.set_draw_target(indicatif::ProgressDrawTarget::hidden());
        sp.set_prefix(config.emoji.to_owned());
        sp.set_message(config.msg.to_owned());
        sp.enable_steady_tick(Duration::from_millis(250));
        sp.with_finish(indicatif::ProgressFinish::WithMessage(Cow::Owned(
            config.done_msg.to_owned(),
        )))
    }

    /// Show `progress` until `fut` completes, then return its output.
    ///
    /// Uploads get a percentage bar. Once the upload is done (or right away,
    /// for remote URLs) we switch to a spinner showing `status`.
    pub async fn show_progress<F>(
        &self,
        mut progress: watch::Receiver<Progress>,
        status: &str,
        fut: F,
    ) -> F::Output
    where
        F: Future,
    {
        let mut view = ProgressView::new(self, status);
        tokio::pin!(fut);
        loop {
            tokio::select! {
                output = &mut fut => {
                    view.finish();
                    return output;
                }
                changed = progress.changed() => {
                    if changed.is_err() {
                        // Nobody is publishing any more; just wait it out.
                        let output = fut.await;
                        view.finish();
                        return output;
                    }
                    let current = *progress.borrow_and_update();
                    view.update(current);
                }
            }
        }
    }
}

/// The bar or spinner currently on screen for one request.
struct ProgressView<'a> {
    ui: &'a Ui,
    status: &'a str,
    upload: Option<ProgressBar>,
    processing: Option<ProgressBar>,
}

impl<'a> ProgressView<'a> {
    fn new(ui: &'a Ui, status: &'a str) -> Self {
        Self {
            ui,
            status,
            upload: None,
            processing: None,
        }
    }

    fn update(&mut self, progress: Progress) {
        match progress {
            Progress::Idle => {}
            Progress::Transferring { percent } => {
                let ui = self.ui;
                let bar = self.upload.get_or_insert_with(|| {
                    ui.new_progress_bar(
                        &ProgressConfig {
                            emoji: "📤",
                            msg: "Uploading",
                            done_msg: "Uploaded",
                        },
                        100,
                    )
                });
                bar.set_position(u64::from(percent));
            }
            Progress::Processing => {
                if let Some(bar) = self.upload.take() {
                    bar.set_position(100);
                    bar.finish();
                }
                if self.processing.is_none() {
                    self.processing = Some(self.ui.new_spinner(&ProgressConfig {
                        emoji: "🔎",
                        msg: self.status,
                        done_msg: "Done",
                    }));
                }
            }
        }
    }

    fn finish(&mut self) {
        for bar in [self.upload.take(), self.processing.take()]
            .into_iter()
            .flatten()
        {
            bar.finish_and_clear();
        }
    }
}

/// Configuration for a progress bar.
pub struct ProgressConfig<'a> {
    /// Emoji to display in the progress bar.
    pub emoji: &'a str,
    /// Message to display in a running progress bar.
    pub msg: &'a str,
    /// Message to display in a progress bar when it is done.
    pub done_msg: &'a str,
}

fn default_progress_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("  {prefix:3}{msg:25} {pos:>3}% {elapsed_precise} {wide_bar:.cyan/blue}")
        .expect("bad progress bar template")
}

fn default_spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner} {prefix:3}{msg} {elapsed}")
        .expect("bad progress bar template")
}

/// A writer which can used to write to `stderr`. It will hide and show progress
/// bars as needed, so that they don't interfere with the output.
#[derive(Clone)]
pub struct SafeStderrWriter {
    ui: Ui,
}

// The `tracing-indicatif` crate suggests that we should implement the following
// methods.
impl io::Write for SafeStderrWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ui.multi_progress().suspend(|| io::stderr().write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.ui.multi_progress().suspend(|| io::stderr().flush())
    }

    fn write_vectored(&mut self, bufs: &[io::IoSlice<'_>]) -> io::Result<usize> {
        self.ui
            .multi_progress()
            .suspend(|| io::stderr().write_vectored(bufs))
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.ui
            .multi_progress()
            .suspend(|| io::stderr().write_all(buf))
    }

    fn write_fmt(&mut self, fmt: std::fmt::Arguments<'_>) -> io::Result<()> {
        self.ui
            .multi_progress()
            .suspend(|| io::stderr().write_fmt(fmt))
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SafeStderrWriter {
    type Writer = SafeStderrWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
