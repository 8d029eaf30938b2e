//! The batch orchestrator.
//!
//! One user action ("process this document") becomes a series of page-batch
//! requests. The orchestrator owns the session state, issues one request at a
//! time, and works out which neighbouring batches can be reached from the
//! page counts the service reports.
//!
//! Other components read [`OrchestratorState`] snapshots and change state
//! only by calling methods here. The `is_busy` flag is the only concurrency
//! control: anything attempted while a request is in flight is refused, not
//! queued.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::{
    error::{OcrError, ValidationError},
    model::{
        BATCH_SIZE, BatchPageRange, BatchRequestParams, BatchResult, Language, LanguageCode,
    },
    prelude::*,
    progress::{Progress, ProgressTracker},
    selector::{Catalog, InputSelector},
    service::OcrService,
};

/// Where the session is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Nothing has happened yet.
    Idle,
    /// Fetching the language catalog.
    AwaitingCatalog,
    /// Catalog loaded; waiting for the user to process something.
    Ready,
    /// Uploading a local file.
    Transferring,
    /// Waiting for the service to OCR the batch.
    Processing,
    /// Showing a batch result.
    Displaying,
    /// The catalog or the last batch request failed.
    Failed,
}

/// The session state. Cloned out as a snapshot by
/// [`Orchestrator::state`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrchestratorState {
    /// The batch currently displayed (or 1 before anything is displayed).
    pub batch_index: u32,

    /// The last successful result. Kept while a later request fails, so it
    /// stays visible under the error message.
    pub result: Option<BatchResult>,

    /// The exact request that produced `result`.
    pub result_params: Option<BatchRequestParams>,

    /// Total pages in the document, or 0 if unknown.
    pub total_pages: u32,

    /// Upload progress of the current (or last) request.
    pub transfer_progress_percent: u8,

    pub is_busy: bool,

    /// The single user-visible message slot.
    pub last_error: Option<OcrError>,

    /// The batch index of the last request we started, for retries.
    pub last_requested: Option<u32>,
}

impl Default for OrchestratorState {
    fn default() -> Self {
        Self {
            batch_index: 1,
            result: None,
            result_params: None,
            total_pages: 0,
            transfer_progress_percent: 0,
            is_busy: false,
            last_error: None,
            last_requested: None,
        }
    }
}

impl OrchestratorState {
    /// The result to show right now. Hidden while a request is in flight, so
    /// stale text never looks like the answer to the new request.
    pub fn displayed_result(&self) -> Option<&BatchResult> {
        if self.is_busy {
            None
        } else {
            self.result.as_ref()
        }
    }

    /// Pages covered by the displayed result.
    pub fn page_range(&self) -> Option<BatchPageRange> {
        self.displayed_result().map(BatchResult::page_range)
    }

    pub fn can_go_next(&self) -> bool {
        !self.is_busy
            && self.total_pages > 0
            && self
                .result
                .as_ref()
                .is_some_and(|result| result.page_range().end < self.total_pages)
    }

    pub fn can_go_previous(&self) -> bool {
        !self.is_busy && self.batch_index > 1
    }

    pub fn can_export(&self) -> bool {
        self.displayed_result().is_some()
    }

    /// A label like `Pages 6–10 of 23`.
    pub fn range_label(&self) -> Option<String> {
        self.page_range()
            .map(|range| format!("Pages {range} of {}", self.total_pages))
    }

    /// What to say while waiting for `batch_index`.
    pub fn status_message(&self, batch_index: u32) -> String {
        if self.total_pages == 0 {
            "Detecting pages or downloading/converting file...".to_owned()
        } else {
            let range = BatchPageRange::expected(batch_index, BATCH_SIZE, self.total_pages);
            format!(
                "Processing batch: Pages {range} of {}",
                self.total_pages
            )
        }
    }

    /// Forget everything about the previous document.
    fn reset_document(&mut self) {
        *self = OrchestratorState::default();
    }
}

/// Everything behind the orchestrator's lock.
#[derive(Debug, Default)]
struct Inner {
    selector: InputSelector,
    state: OrchestratorState,
    /// Is the request in flight uploading a local file?
    uploading: bool,
}

impl Inner {
    /// Store `err` in the message slot and hand it back.
    fn fail<T>(&mut self, err: impl Into<OcrError>) -> Result<T, OcrError> {
        let err = err.into();
        self.state.last_error = Some(err.clone());
        Err(err)
    }

    /// Check preconditions and freeze the parameters for a request.
    fn begin_request(&mut self, batch_index: u32) -> Result<BatchRequestParams, OcrError> {
        // Refusals while busy must leave the state untouched.
        if self.state.is_busy {
            return Err(ValidationError::Busy.into());
        }
        if let Catalog::Unavailable(message) = self.selector.catalog() {
            let message = message.clone();
            return self.fail(OcrError::CatalogUnavailable(message));
        }
        if batch_index == 0 {
            return self.fail(ValidationError::InvalidBatchIndex);
        }
        let Some(language) = self.selector.language().cloned() else {
            return self.fail(ValidationError::NoLanguage);
        };
        let Some(source) = self.selector.source().cloned() else {
            return self.fail(ValidationError::NoSource);
        };

        self.state.is_busy = true;
        self.state.last_error = None;
        self.state.transfer_progress_percent = 0;
        self.state.last_requested = Some(batch_index);
        self.uploading = source.has_payload();
        Ok(BatchRequestParams {
            source,
            language,
            batch_index,
            batch_size: BATCH_SIZE,
        })
    }

    /// Bytes sent so far by the current request. URL requests upload nothing
    /// worth measuring and stay at 0.
    fn transfer_percent(&self, progress: &ProgressTracker) -> u8 {
        if self.uploading {
            progress.current().transfer_percent()
        } else {
            0
        }
    }

    /// Request over: record the final upload percentage and clear busy.
    fn settle(&mut self, progress: &ProgressTracker) {
        self.state.transfer_progress_percent = self.transfer_percent(progress);
        self.state.is_busy = false;
        self.uploading = false;
        progress.finish();
    }

    /// Source changes are refused mid-request, and reset the document state
    /// when accepted.
    fn change_source(
        &mut self,
        change: impl FnOnce(&mut InputSelector) -> Result<(), ValidationError>,
    ) -> Result<(), OcrError> {
        if self.state.is_busy {
            return Err(ValidationError::Busy.into());
        }
        match change(&mut self.selector) {
            Ok(()) => {
                self.state.reset_document();
                Ok(())
            }
            Err(err) => self.fail(err),
        }
    }
}

/// Drives batch requests against an [`OcrService`].
pub struct Orchestrator {
    service: Arc<dyn OcrService>,
    inner: Mutex<Inner>,
    progress: ProgressTracker,
}

impl Orchestrator {
    pub fn new(service: Arc<dyn OcrService>) -> Self {
        Self {
            service,
            inner: Mutex::new(Inner::default()),
            progress: ProgressTracker::new(),
        }
    }

    /// Lock our state, ignoring poisoning.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A snapshot of the session state.
    pub fn state(&self) -> OrchestratorState {
        let inner = self.lock();
        let mut state = inner.state.clone();
        if state.is_busy {
            state.transfer_progress_percent = inner.transfer_percent(&self.progress);
        }
        state
    }

    /// Where we are in the lifecycle.
    pub fn phase(&self) -> Phase {
        let inner = self.lock();
        let state = &inner.state;
        match inner.selector.catalog() {
            Catalog::Loading => return Phase::AwaitingCatalog,
            Catalog::Unavailable(_) => return Phase::Failed,
            Catalog::NotLoaded | Catalog::Loaded(_) => {}
        }
        if state.is_busy {
            return if self.progress.current().is_determinate() {
                Phase::Transferring
            } else {
                Phase::Processing
            };
        }
        if state.last_error.as_ref().is_some_and(OcrError::is_fetch_failure) {
            Phase::Failed
        } else if state.result.is_some() {
            Phase::Displaying
        } else if matches!(inner.selector.catalog(), Catalog::Loaded(_)) {
            Phase::Ready
        } else {
            Phase::Idle
        }
    }

    /// Watch upload and processing progress.
    pub fn subscribe_progress(&self) -> watch::Receiver<Progress> {
        self.progress.subscribe()
    }

    /// The loaded language catalog (empty until loaded).
    pub fn languages(&self) -> Vec<Language> {
        self.lock().selector.catalog().languages().to_vec()
    }

    /// The selected language, if any.
    pub fn language(&self) -> Option<LanguageCode> {
        self.lock().selector.language().cloned()
    }

    /// Fetch the language catalog. Call once at startup; calling it again is
    /// the manual retry after a failure.
    #[instrument(level = "debug", skip_all)]
    pub async fn load_catalog(&self) -> Result<(), OcrError> {
        self.lock().selector.catalog_loading();
        let fetched = self.service.languages().await;

        let mut inner = self.lock();
        match fetched {
            Ok(languages) => {
                info!(count = languages.len(), "Loaded language catalog");
                inner.selector.catalog_loaded(languages);
                if matches!(inner.state.last_error, Some(OcrError::CatalogUnavailable(_))) {
                    inner.state.last_error = None;
                }
                Ok(())
            }
            Err(failure) => {
                error!(%failure, "Failed to load language catalog");
                let message = failure.to_string();
                inner.selector.catalog_failed(message.clone());
                inner.fail(OcrError::CatalogUnavailable(message))
            }
        }
    }

    /// Choose a language from the catalog. Unknown codes are ignored and
    /// `false` is returned.
    pub fn select_language(&self, code: &str) -> bool {
        self.lock().selector.set_language(code)
    }

    /// Choose a local file. Refused while a URL is selected.
    pub fn select_local_file(
        &self,
        payload: Vec<u8>,
        filename: impl Into<String>,
    ) -> Result<(), OcrError> {
        let filename = filename.into();
        self.lock()
            .change_source(|selector| selector.set_local_file(payload, filename))
    }

    /// Choose a remote URL. Refused while a local file is selected.
    pub fn select_remote_url(&self, url: impl Into<String>) -> Result<(), OcrError> {
        let url = url.into();
        self.lock()
            .change_source(|selector| selector.set_remote_url(url))
    }

    /// Forget the current source.
    pub fn clear_source(&self) -> Result<(), OcrError> {
        self.lock().change_source(|selector| {
            selector.clear_source();
            Ok(())
        })
    }

    /// Request batch `batch_index` (1-based) of the selected document.
    ///
    /// Fails without touching the network if no language or source is
    /// selected, or if another request is in flight. Failed requests are never
    /// retried automatically.
    #[instrument(level = "debug", skip(self))]
    pub async fn request_batch(&self, batch_index: u32) -> Result<(), OcrError> {
        let params = self.lock().begin_request(batch_index)?;
        let guard = BusyGuard::arm(self, params.source.has_payload());

        info!(batch = batch_index, source = ?params.source, "Requesting batch");
        let response = self.service.recognize(&params, &self.progress).await;

        guard.complete(|inner| match response {
            Ok(response) => {
                let result = BatchResult::from_response(&params, response);
                let range = result.page_range();
                info!(
                    batch = result.batch_index,
                    start = range.start,
                    end = range.end,
                    total = result.total_pages,
                    "Received batch"
                );
                inner.state.batch_index = result.batch_index;
                inner.state.total_pages = result.total_pages;
                inner.state.result = Some(result);
                inner.state.result_params = Some(params);
                Ok(())
            }
            Err(failure) => {
                error!(batch = batch_index, %failure, "Batch request failed");
                inner.fail(failure)
            }
        })
    }

    /// Request the batch after the displayed one.
    pub async fn next(&self) -> Result<(), OcrError> {
        let batch_index = {
            let state = &self.lock().state;
            if state.is_busy {
                return Err(ValidationError::Busy.into());
            }
            if !state.can_go_next() {
                return Err(ValidationError::AtLastBatch.into());
            }
            state.batch_index.saturating_add(1)
        };
        self.request_batch(batch_index).await
    }

    /// Request the batch before the displayed one.
    pub async fn previous(&self) -> Result<(), OcrError> {
        let batch_index = {
            let state = &self.lock().state;
            if state.is_busy {
                return Err(ValidationError::Busy.into());
            }
            if !state.can_go_previous() {
                return Err(ValidationError::AtFirstBatch.into());
            }
            state.batch_index - 1
        };
        self.request_batch(batch_index).await
    }

    /// Re-issue the last request we started, typically after a failure.
    pub async fn retry(&self) -> Result<(), OcrError> {
        let batch_index = {
            let state = &self.lock().state;
            state.last_requested.unwrap_or(state.batch_index)
        };
        self.request_batch(batch_index).await
    }

    /// The displayed result and the request that produced it, if an export
    /// is allowed right now.
    pub(crate) fn exportable(&self) -> Result<(BatchResult, BatchRequestParams), OcrError> {
        let inner = self.lock();
        let state = &inner.state;
        if state.is_busy {
            return Err(ValidationError::Busy.into());
        }
        match (&state.result, &state.result_params) {
            (Some(result), Some(params)) => Ok((result.clone(), params.clone())),
            _ => Err(ValidationError::NoResult.into()),
        }
    }

    /// Put an error in the message slot without touching anything else.
    pub(crate) fn report(&self, err: OcrError) {
        self.lock().state.last_error = Some(err);
    }

    pub(crate) fn service(&self) -> &dyn OcrService {
        self.service.as_ref()
    }
}

/// Clears `is_busy` when a request ends, including when its future is
/// dropped before completing.
struct BusyGuard<'a> {
    orchestrator: &'a Orchestrator,
    armed: bool,
}

impl<'a> BusyGuard<'a> {
    fn arm(orchestrator: &'a Orchestrator, has_payload: bool) -> Self {
        orchestrator.progress.begin(has_payload);
        Self {
            orchestrator,
            armed: true,
        }
    }

    /// Apply the request's outcome and clear `is_busy` under one lock, so no
    /// one sees a half-finished update.
    fn complete<T>(mut self, apply: impl FnOnce(&mut Inner) -> T) -> T {
        self.armed = false;
        let mut inner = self.orchestrator.lock();
        let output = apply(&mut inner);
        inner.settle(&self.orchestrator.progress);
        output
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!("Batch request abandoned before completion");
            self.orchestrator
                .lock()
                .settle(&self.orchestrator.progress);
        }
    }
}
