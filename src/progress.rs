//! Upload and processing progress.
//!
//! We can only measure the bytes we send. Once the upload is done the service
//! is downloading, converting and OCRing, and we have no idea how long that
//! takes, so we switch to an indeterminate "processing" state.

use std::sync::Arc;

use tokio::sync::watch;

/// What the current request is doing, as far as we can tell.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Progress {
    /// No request in flight.
    #[default]
    Idle,

    /// Uploading a local file. Never decreases during one request.
    Transferring { percent: u8 },

    /// Waiting for the service. Indeterminate.
    Processing,
}

impl Progress {
    /// Do we know how far along we are?
    pub fn is_determinate(self) -> bool {
        matches!(self, Progress::Transferring { .. })
    }

    /// Percentage of the request body sent so far.
    pub fn transfer_percent(self) -> u8 {
        match self {
            Progress::Idle => 0,
            Progress::Transferring { percent } => percent,
            Progress::Processing => 100,
        }
    }
}

/// Publishes [`Progress`] for the orchestrator's current request. Any number
/// of observers may [`subscribe`](Self::subscribe). Clones share the same
/// channel, so a request body stream can report into it.
#[derive(Clone, Debug)]
pub struct ProgressTracker {
    tx: Arc<watch::Sender<Progress>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Progress::Idle);
        Self { tx: Arc::new(tx) }
    }

    /// Watch progress changes.
    pub fn subscribe(&self) -> watch::Receiver<Progress> {
        self.tx.subscribe()
    }

    /// The latest progress value.
    pub fn current(&self) -> Progress {
        *self.tx.borrow()
    }

    /// A request is starting. Remote URLs have nothing meaningful to upload,
    /// so they go straight to [`Progress::Processing`].
    pub(crate) fn begin(&self, has_payload: bool) {
        let initial = if has_payload {
            Progress::Transferring { percent: 0 }
        } else {
            Progress::Processing
        };
        self.tx.send_replace(initial);
    }

    /// Record that `sent` of `total` request bytes have gone out. Updates that
    /// would move the percentage backwards are ignored.
    pub fn record_transfer(&self, sent: u64, total: u64) {
        let percent = percent_of(sent, total);
        self.tx.send_if_modified(|progress| match progress {
            Progress::Transferring { .. } if percent >= 100 => {
                *progress = Progress::Processing;
                true
            }
            Progress::Transferring { percent: current } if percent > *current => {
                *current = percent;
                true
            }
            _ => false,
        });
    }

    /// The request finished, one way or another.
    pub(crate) fn finish(&self) {
        self.tx.send_replace(Progress::Idle);
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Rounded percentage, clamped to 100. An empty body counts as fully sent.
fn percent_of(sent: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let percent = (u128::from(sent) * 100 + u128::from(total) / 2) / u128::from(total);
    u8::try_from(percent.min(100)).unwrap_or(100)
}
