//! Downloadable copies of the displayed batch.
//!
//! Text exports are built locally from the result we already have. PDF
//! exports ask the service to render the same batch again, using exactly the
//! request that produced the displayed text.

use tokio::fs;

use crate::{
    error::{OcrError, ValidationError},
    model::BatchPageRange,
    orchestrator::Orchestrator,
    prelude::*,
};

/// The kinds of file we can export.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactKind {
    Text,
    Pdf,
}

impl ArtifactKind {
    fn extension(self) -> &'static str {
        match self {
            ArtifactKind::Text => "txt",
            ArtifactKind::Pdf => "pdf",
        }
    }
}

/// An exported file, ready to be saved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Artifact {
    pub kind: ArtifactKind,
    /// Like `ocr_result_6-10.txt`.
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl Artifact {
    fn new(kind: ArtifactKind, range: BatchPageRange, bytes: Vec<u8>) -> Self {
        Self {
            kind,
            file_name: artifact_file_name(range, kind),
            bytes,
        }
    }
}

/// The file name for an export of `range`.
pub fn artifact_file_name(range: BatchPageRange, kind: ArtifactKind) -> String {
    format!(
        "ocr_result_{}-{}.{}",
        range.start,
        range.end,
        kind.extension()
    )
}

/// Export the displayed batch's text, byte for byte. No network access.
pub fn export_text(orchestrator: &Orchestrator) -> Result<Artifact, OcrError> {
    let (result, _params) = orchestrator.exportable()?;
    Ok(Artifact::new(
        ArtifactKind::Text,
        result.page_range(),
        result.text.into_bytes(),
    ))
}

/// Ask the service to render the displayed batch as a PDF.
///
/// Failures land in the orchestrator's message slot as
/// [`OcrError::ExportFailed`]; the displayed result and navigation are left
/// alone.
#[instrument(level = "debug", skip_all)]
pub async fn export_pdf(orchestrator: &Orchestrator) -> Result<Artifact, OcrError> {
    let (result, params) = orchestrator.exportable()?;
    let range = result.page_range();
    match orchestrator.service().render_pdf(&params).await {
        Ok(bytes) => {
            debug!(len = bytes.len(), %range, "Received rendered PDF");
            Ok(Artifact::new(ArtifactKind::Pdf, range, bytes))
        }
        Err(failure) => {
            error!(%failure, "PDF export failed");
            let err = OcrError::ExportFailed(failure.to_string());
            orchestrator.report(err.clone());
            Err(err)
        }
    }
}

/// Write `artifact` into `dir`, returning the path written.
pub async fn save_artifact(dir: &Path, artifact: &Artifact) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create output directory {:?}", dir))?;
    let path = dir.join(&artifact.file_name);
    fs::write(&path, &artifact.bytes)
        .await
        .with_context(|| format!("Failed to write {:?}", path))?;
    info!(kind = ?artifact.kind, path = %path.display(), "Saved export");
    Ok(path)
}

/// Is `err` the "nothing to export" refusal?
pub fn is_nothing_to_export(err: &OcrError) -> bool {
    matches!(err, OcrError::Validation(ValidationError::NoResult))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        model::BatchPageRange,
        orchestrator::{
            Phase,
            tests::{FakeService, ready},
        },
    };

    #[test]
    fn file_names_follow_the_page_range() {
        let range = BatchPageRange { start: 6, end: 10 };
        assert_eq!(
            artifact_file_name(range, ArtifactKind::Text),
            "ocr_result_6-10.txt"
        );
        assert_eq!(
            artifact_file_name(range, ArtifactKind::Pdf),
            "ocr_result_6-10.pdf"
        );
    }

    #[tokio::test]
    async fn nothing_to_export_before_a_result() {
        let orchestrator = ready(Arc::new(FakeService::new(23))).await;
        let err = export_text(&orchestrator).unwrap_err();
        assert!(is_nothing_to_export(&err));
        let err = export_pdf(&orchestrator).await.unwrap_err();
        assert!(is_nothing_to_export(&err));
    }

    #[tokio::test]
    async fn text_export_is_the_displayed_text() {
        let orchestrator = ready(Arc::new(FakeService::new(23))).await;
        orchestrator.request_batch(2).await.unwrap();

        let artifact = export_text(&orchestrator).unwrap();
        assert_eq!(artifact.kind, ArtifactKind::Text);
        assert_eq!(artifact.file_name, "ocr_result_6-10.txt");
        let shown = orchestrator.state().result.unwrap().text;
        assert_eq!(artifact.bytes, shown.into_bytes());
    }

    #[tokio::test]
    async fn pdf_export_reuses_the_displayed_request() {
        let orchestrator = ready(Arc::new(FakeService::new(23))).await;
        orchestrator.request_batch(5).await.unwrap();

        let artifact = export_pdf(&orchestrator).await.unwrap();
        assert_eq!(artifact.file_name, "ocr_result_21-23.pdf");
        assert_eq!(artifact.bytes, b"%PDF batch 5");
    }

    #[tokio::test]
    async fn pdf_failure_leaves_the_result_alone() {
        let service = Arc::new(FakeService::new(23).with_pdf_failure());
        let orchestrator = ready(service).await;
        orchestrator.request_batch(1).await.unwrap();
        let before = orchestrator.state();

        let err = export_pdf(&orchestrator).await.unwrap_err();
        assert!(matches!(err, OcrError::ExportFailed(_)));

        let after = orchestrator.state();
        assert_eq!(after.last_error, Some(err));
        assert_eq!(after.result, before.result);
        assert_eq!(after.batch_index, before.batch_index);
        assert!(after.can_go_next());
        assert_eq!(orchestrator.phase(), Phase::Displaying);

        // Text export still works.
        assert_eq!(
            export_text(&orchestrator).unwrap().file_name,
            "ocr_result_1-5.txt"
        );
    }

    #[tokio::test]
    async fn saves_artifacts_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = Artifact::new(
            ArtifactKind::Text,
            BatchPageRange { start: 1, end: 5 },
            "Page one\n\n--- Page Break ---\n\nPage two".as_bytes().to_vec(),
        );
        let out_dir = dir.path().join("exports");
        let path = save_artifact(&out_dir, &artifact).await.unwrap();
        assert_eq!(path, out_dir.join("ocr_result_1-5.txt"));
        assert_eq!(std::fs::read(&path).unwrap(), artifact.bytes);
    }
}
