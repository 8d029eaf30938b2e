//! HTTP client for the OCR service.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt as _;
use reqwest::{
    Body, Response,
    multipart::{Form, Part},
};

use crate::{
    error::ServiceFailure,
    model::{BatchRequestParams, DocumentSource, ErrorResponse, Language, OcrResponse},
    prelude::*,
    progress::ProgressTracker,
};

use super::OcrService;

/// Size of the chunks we feed to the upload body. Smaller chunks give
/// smoother progress.
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Talks to the OCR service over HTTP.
#[derive(Debug, Clone)]
pub struct HttpOcrService {
    client: reqwest::Client,

    /// Base URL, like `http://localhost:5000/api`.
    api_base: String,
}

impl HttpOcrService {
    /// Create a client for the service at `api_base`. With a `timeout`, every
    /// request fails once it has been running that long.
    pub fn new(api_base: &str, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            api_base: api_base.to_owned(),
        })
    }

    /// Build a URL for an endpoint.
    fn url(&self, endpoint: &str) -> String {
        let mut url = self.api_base.clone();
        if !url.ends_with('/') {
            url.push('/');
        }
        url.push_str(endpoint);
        url
    }

    /// Post a batch form to `endpoint`.
    async fn post_batch(
        &self,
        endpoint: &str,
        params: &BatchRequestParams,
        progress: &ProgressTracker,
    ) -> Result<Response, ServiceFailure> {
        let url = self.url(endpoint);
        debug!(%url, batch = params.batch_index, "Posting batch request");
        let form = batch_form(params, progress)?;
        let response = self.client.post(&url).multipart(form).send().await?;
        check_status(response).await
    }
}

#[async_trait]
impl OcrService for HttpOcrService {
    #[instrument(level = "debug", skip_all)]
    async fn languages(&self) -> Result<Vec<Language>, ServiceFailure> {
        let response = self.client.get(self.url("languages")).send().await?;
        let languages = check_status(response)
            .await?
            .json::<Vec<Language>>()
            .await?;
        debug!(count = languages.len(), "Fetched language catalog");
        Ok(languages)
    }

    #[instrument(level = "debug", skip_all, fields(batch = params.batch_index))]
    async fn recognize(
        &self,
        params: &BatchRequestParams,
        progress: &ProgressTracker,
    ) -> Result<OcrResponse, ServiceFailure> {
        let response = self.post_batch("ocr", params, progress).await?;
        Ok(response.json::<OcrResponse>().await?)
    }

    #[instrument(level = "debug", skip_all, fields(batch = params.batch_index))]
    async fn render_pdf(
        &self,
        params: &BatchRequestParams,
    ) -> Result<Vec<u8>, ServiceFailure> {
        // Nobody watches export uploads, so report into a detached tracker.
        let response = self
            .post_batch("ocr/pdf", params, &ProgressTracker::new())
            .await?;
        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }

    #[instrument(level = "debug", skip_all)]
    async fn health(&self) -> Result<(), ServiceFailure> {
        #[derive(Deserialize)]
        struct Health {
            status: String,
        }

        let response = self.client.get(self.url("health")).send().await?;
        let health = check_status(response).await?.json::<Health>().await?;
        if health.status == "healthy" {
            Ok(())
        } else {
            Err(ServiceFailure::Rejected {
                message: format!("service reports status {:?}", health.status),
            })
        }
    }
}

/// Turn non-success statuses into [`ServiceFailure::Rejected`], using the
/// service's `{"error": ...}` message when it sends one.
async fn check_status(response: Response) -> Result<Response, ServiceFailure> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = match response.json::<ErrorResponse>().await {
        Ok(body) => body.error,
        Err(_) => format!("HTTP {status}"),
    };
    warn!(%status, %message, "OCR service returned an error");
    Err(ServiceFailure::Rejected { message })
}

/// Build the multipart form shared by `/ocr` and `/ocr/pdf`.
fn batch_form(
    params: &BatchRequestParams,
    progress: &ProgressTracker,
) -> Result<Form, ServiceFailure> {
    let form = match &params.source {
        DocumentSource::LocalFile { payload, filename } => {
            Form::new().part("file", file_part(payload, filename, progress.clone())?)
        }
        DocumentSource::RemoteUrl(url) => Form::new().text("file_url", url.clone()),
    };
    Ok(form
        .text("language", params.language.to_string())
        .text("batch", params.batch_index.to_string())
        .text("batch_size", params.batch_size.to_string()))
}

/// A file part whose body reports upload progress as it is consumed.
fn file_part(
    payload: &[u8],
    filename: &str,
    progress: ProgressTracker,
) -> Result<Part, ServiceFailure> {
    let total = payload.len() as u64;
    let chunks = payload
        .chunks(UPLOAD_CHUNK_SIZE)
        .map(<[u8]>::to_vec)
        .collect::<Vec<_>>();
    let mut sent = 0u64;
    let stream = futures::stream::iter(chunks).map(move |chunk| {
        sent += chunk.len() as u64;
        progress.record_transfer(sent, total);
        Ok::<_, std::io::Error>(chunk)
    });
    let mime = mime_guess::from_path(filename).first_or_octet_stream();
    let part = Part::stream_with_length(Body::wrap_stream(stream), total)
        .file_name(filename.to_owned())
        .mime_str(mime.as_ref())?;
    Ok(part)
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    };

    use axum::{
        Json, Router,
        extract::{Multipart, State},
        http::StatusCode,
        response::{IntoResponse, Response},
        routing::{get, post},
    };
    use serde_json::json;

    use super::*;
    use crate::{model::LanguageCode, progress::Progress};

    /// The fields of the last form the fake service received.
    type Received = Arc<Mutex<HashMap<String, Vec<u8>>>>;

    async fn read_form(received: &Received, mut multipart: Multipart) {
        let mut fields = HashMap::new();
        while let Some(field) = multipart.next_field().await.unwrap() {
            let name = field.name().unwrap_or_default().to_owned();
            let data = field.bytes().await.unwrap().to_vec();
            fields.insert(name, data);
        }
        *received.lock().unwrap() = fields;
    }

    fn field(received: &Received, name: &str) -> Option<String> {
        received
            .lock()
            .unwrap()
            .get(name)
            .map(|data| String::from_utf8_lossy(data).into_owned())
    }

    async fn languages() -> Json<serde_json::Value> {
        Json(json!([
            {"code": "eng", "name": "English", "script": "Latin"},
            {"code": "hin", "name": "Hindi", "script": "Devanagari"},
        ]))
    }

    async fn ocr(State(received): State<Received>, multipart: Multipart) -> Response {
        read_form(&received, multipart).await;
        if field(&received, "file_url").is_some_and(|url| url.ends_with(".exe")) {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "File type not allowed."})),
            )
                .into_response();
        }
        let batch: u32 = field(&received, "batch").unwrap().parse().unwrap();
        Json(json!({
            "success": true,
            "text": format!("text of batch {batch}"),
            "pages": 5,
            "batch": batch,
            "batch_size": 5,
            "total_pages": 23,
        }))
        .into_response()
    }

    async fn pdf(State(received): State<Received>, multipart: Multipart) -> Vec<u8> {
        read_form(&received, multipart).await;
        b"%PDF-1.4 fake".to_vec()
    }

    async fn health() -> Json<serde_json::Value> {
        Json(json!({"status": "healthy"}))
    }

    async fn broken() -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    /// Start a fake OCR service and return its API base URL.
    async fn spawn_service() -> (String, Received) {
        let received = Received::default();
        let app = Router::new()
            .route("/api/languages", get(languages))
            .route("/api/ocr", post(ocr))
            .route("/api/ocr/pdf", post(pdf))
            .route("/api/health", get(health))
            .route("/broken/languages", get(broken))
            .with_state(received.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("http://{addr}/api"), received)
    }

    fn url_params(url: &str, batch_index: u32) -> BatchRequestParams {
        BatchRequestParams {
            source: DocumentSource::RemoteUrl(url.to_owned()),
            language: LanguageCode::new("eng"),
            batch_index,
            batch_size: 5,
        }
    }

    #[test]
    fn urls_are_joined_to_the_base() {
        let service = HttpOcrService::new("http://localhost:5000/api", None).unwrap();
        assert_eq!(service.url("ocr/pdf"), "http://localhost:5000/api/ocr/pdf");
        let service = HttpOcrService::new("http://localhost:5000/api/", None).unwrap();
        assert_eq!(service.url("languages"), "http://localhost:5000/api/languages");
    }

    #[tokio::test]
    async fn fetches_languages_in_order() {
        let (base, _) = spawn_service().await;
        let service = HttpOcrService::new(&base, None).unwrap();
        let languages = service.languages().await.unwrap();
        let codes = languages.iter().map(|l| l.code.as_str()).collect::<Vec<_>>();
        assert_eq!(codes, ["eng", "hin"]);
        assert_eq!(languages[1].script, "Devanagari");
    }

    #[tokio::test]
    async fn sends_url_batches_as_form_fields() {
        let (base, received) = spawn_service().await;
        let service = HttpOcrService::new(&base, None).unwrap();
        let response = service
            .recognize(
                &url_params("https://example.org/book.pdf", 2),
                &ProgressTracker::new(),
            )
            .await
            .unwrap();
        assert_eq!(response.text, "text of batch 2");
        assert_eq!(response.total_pages, 23);
        assert_eq!(response.batch, Some(2));

        assert_eq!(
            field(&received, "file_url").as_deref(),
            Some("https://example.org/book.pdf")
        );
        assert_eq!(field(&received, "file"), None);
        assert_eq!(field(&received, "language").as_deref(), Some("eng"));
        assert_eq!(field(&received, "batch").as_deref(), Some("2"));
        assert_eq!(field(&received, "batch_size").as_deref(), Some("5"));
    }

    #[tokio::test]
    async fn uploads_local_files_and_reports_progress() {
        let (base, received) = spawn_service().await;
        let service = HttpOcrService::new(&base, None).unwrap();
        let payload = (0..200_000u32).map(|i| (i % 251) as u8).collect::<Vec<_>>();
        let params = BatchRequestParams {
            source: DocumentSource::local_file(payload.clone(), "scan.pdf").unwrap(),
            language: LanguageCode::new("hin"),
            batch_index: 1,
            batch_size: 5,
        };
        let tracker = ProgressTracker::new();
        tracker.begin(true);
        service.recognize(&params, &tracker).await.unwrap();

        assert_eq!(tracker.current(), Progress::Processing);
        assert_eq!(received.lock().unwrap().get("file"), Some(&payload));
        assert_eq!(field(&received, "file_url"), None);
    }

    #[tokio::test]
    async fn service_error_messages_are_surfaced() {
        let (base, _) = spawn_service().await;
        let service = HttpOcrService::new(&base, None).unwrap();
        let err = service
            .recognize(
                &url_params("https://example.org/virus.exe", 1),
                &ProgressTracker::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ServiceFailure::Rejected {
                message: "File type not allowed.".to_owned()
            }
        );
    }

    #[tokio::test]
    async fn bare_error_statuses_are_reported() {
        let (base, _) = spawn_service().await;
        let base = base.replace("/api", "/broken");
        let service = HttpOcrService::new(&base, None).unwrap();
        let err = service.languages().await.unwrap_err();
        assert_eq!(
            err,
            ServiceFailure::Rejected {
                message: "HTTP 500 Internal Server Error".to_owned()
            }
        );
    }

    #[tokio::test]
    async fn unreachable_services_are_transport_failures() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let service = HttpOcrService::new(&format!("http://{addr}/api"), None).unwrap();
        let err = service.languages().await.unwrap_err();
        assert!(matches!(err, ServiceFailure::Transport(_)), "{err:?}");
    }

    #[tokio::test]
    async fn downloads_pdf_bytes_and_checks_health() {
        let (base, received) = spawn_service().await;
        let service = HttpOcrService::new(&base, None).unwrap();
        let pdf = service
            .render_pdf(&url_params("https://example.org/book.pdf", 3))
            .await
            .unwrap();
        assert_eq!(pdf, b"%PDF-1.4 fake");
        assert_eq!(field(&received, "batch").as_deref(), Some("3"));

        service.health().await.unwrap();
    }
}
