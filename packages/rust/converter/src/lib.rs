//! Converter: submits PDFs to the document-conversion API and collects Markdown.
//!
//! The provider is asynchronous from our perspective:
//! 1. `POST /api/v2/parse/preupload` returns a one-shot upload URL and a job uid.
//! 2. The PDF bytes are `PUT` to the upload URL.
//! 3. `GET /api/v2/parse/status?uid=<uid>` is polled until the job reports
//!    `success` or `failed`, or our deadline elapses.
//!
//! The result's per-page Markdown is concatenated and written to
//! `<markdown_dir>/<id>.md`. Failures are per-record
//! [`DigestError::Conversion`]s; the caller drops the record and continues.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use paperdigest_shared::{DigestError, Result};

/// Per-request timeout in seconds (uploads can be slow).
const REQUEST_TIMEOUT_SECS: u64 = 120;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Configuration for the conversion client.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Conversion API base URL.
    pub base_url: String,
    /// Bearer token for the API.
    pub api_key: String,
    /// Interval between status polls.
    pub poll_interval: Duration,
    /// Overall deadline for one conversion job.
    pub timeout: Duration,
    /// Directory converted Markdown is written to.
    pub markdown_dir: PathBuf,
}

/// Local path a record's converted Markdown is written to.
pub fn markdown_path(markdown_dir: &Path, id: &str) -> PathBuf {
    markdown_dir.join(format!("{id}.md"))
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Envelope wrapping every conversion API response.
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    code: String,
    #[serde(default)]
    msg: Option<String>,
    data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    /// Unwrap the payload, turning a non-success code into an error.
    fn into_data(self, context: &str) -> Result<T> {
        if self.code != "success" {
            return Err(DigestError::Conversion(format!(
                "{context}: provider returned code {:?}: {}",
                self.code,
                self.msg.unwrap_or_default()
            )));
        }
        self.data
            .ok_or_else(|| DigestError::Conversion(format!("{context}: missing data payload")))
    }
}

#[derive(Debug, Deserialize)]
struct PreuploadData {
    url: String,
    uid: String,
}

#[derive(Debug, Deserialize)]
struct StatusData {
    status: String,
    #[serde(default)]
    progress: Option<u32>,
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    result: Option<ParseResult>,
}

#[derive(Debug, Deserialize)]
struct ParseResult {
    pages: Vec<ParsedPage>,
}

#[derive(Debug, Deserialize)]
struct ParsedPage {
    #[serde(default)]
    md: String,
}

// ---------------------------------------------------------------------------
// Converter
// ---------------------------------------------------------------------------

/// Client for the submit-then-poll conversion API.
pub struct Converter {
    client: Client,
    opts: ConvertOptions,
}

impl Converter {
    /// Create a new converter with the given options.
    pub fn new(opts: ConvertOptions) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| DigestError::Conversion(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, opts })
    }

    /// Convert one PDF to Markdown, returning the written Markdown path.
    #[instrument(skip_all, fields(id = %record_id, pdf = %pdf_path.display()))]
    pub async fn convert(&self, record_id: &str, pdf_path: &Path) -> Result<PathBuf> {
        let pdf_bytes = std::fs::read(pdf_path).map_err(|e| DigestError::io(pdf_path, e))?;

        let upload = self.preupload().await?;
        debug!(uid = %upload.uid, "preupload granted");

        self.upload(&upload.url, pdf_bytes).await?;

        let markdown = self.poll_until_done(&upload.uid).await?;

        let target = markdown_path(&self.opts.markdown_dir, record_id);
        std::fs::write(&target, &markdown).map_err(|e| DigestError::io(&target, e))?;

        info!(path = %target.display(), bytes = markdown.len(), "conversion complete");
        Ok(target)
    }

    /// Request an upload slot from the provider.
    async fn preupload(&self) -> Result<PreuploadData> {
        let url = format!("{}/api/v2/parse/preupload", self.opts.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.opts.api_key))
            .send()
            .await
            .map_err(|e| DigestError::Conversion(format!("preupload: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DigestError::Conversion(format!("preupload: HTTP {status}")));
        }

        let envelope: ApiEnvelope<PreuploadData> = response
            .json()
            .await
            .map_err(|e| DigestError::Conversion(format!("preupload: invalid response: {e}")))?;

        envelope.into_data("preupload")
    }

    /// PUT the PDF bytes to the provider's upload URL.
    async fn upload(&self, upload_url: &str, bytes: Vec<u8>) -> Result<()> {
        let response = self
            .client
            .put(upload_url)
            .body(bytes)
            .send()
            .await
            .map_err(|e| DigestError::Conversion(format!("upload: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DigestError::Conversion(format!("upload: HTTP {status}")));
        }

        Ok(())
    }

    /// Poll the job status until success, failure, or deadline.
    async fn poll_until_done(&self, uid: &str) -> Result<String> {
        let deadline = std::time::Instant::now() + self.opts.timeout;

        loop {
            let status = self.get_status(uid).await?;

            match status.status.as_str() {
                "success" => {
                    let result = status.result.ok_or_else(|| {
                        DigestError::Conversion(format!("uid {uid}: success without result"))
                    })?;
                    let markdown: String = result
                        .pages
                        .into_iter()
                        .map(|page| page.md)
                        .collect::<Vec<_>>()
                        .join("\n\n");
                    return Ok(markdown);
                }
                "failed" => {
                    return Err(DigestError::Conversion(format!(
                        "uid {uid}: parse failed: {}",
                        status.detail.unwrap_or_default()
                    )));
                }
                "processing" => {
                    debug!(uid, progress = status.progress, "conversion in progress");
                }
                other => {
                    warn!(uid, status = other, "unknown conversion status, continuing to poll");
                }
            }

            if std::time::Instant::now() >= deadline {
                return Err(DigestError::Conversion(format!(
                    "uid {uid}: conversion did not finish within {:?}",
                    self.opts.timeout
                )));
            }

            tokio::time::sleep(self.opts.poll_interval).await;
        }
    }

    /// One status request.
    async fn get_status(&self, uid: &str) -> Result<StatusData> {
        let url = format!("{}/api/v2/parse/status", self.opts.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("uid", uid)])
            .header("Authorization", format!("Bearer {}", self.opts.api_key))
            .send()
            .await
            .map_err(|e| DigestError::Conversion(format!("status: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DigestError::Conversion(format!("status: HTTP {status}")));
        }

        let envelope: ApiEnvelope<StatusData> = response
            .json()
            .await
            .map_err(|e| DigestError::Conversion(format!("status: invalid response: {e}")))?;

        envelope.into_data("status")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "pd-converter-test-{}-{:?}",
            std::process::id(),
            std::time::Instant::now()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn opts(server: &MockServer, dir: &Path) -> ConvertOptions {
        ConvertOptions {
            base_url: server.uri(),
            api_key: "doc2x-test".into(),
            poll_interval: Duration::from_millis(10),
            timeout: Duration::from_millis(500),
            markdown_dir: dir.to_path_buf(),
        }
    }

    fn write_pdf(dir: &Path) -> PathBuf {
        let pdf = dir.join("input.pdf");
        std::fs::write(&pdf, b"%PDF-1.4 fake").unwrap();
        pdf
    }

    async fn mount_preupload(server: &MockServer, uid: &str) {
        Mock::given(method("POST"))
            .and(path("/api/v2/parse/preupload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": "success",
                "data": {"url": format!("{}/upload/{uid}", server.uri()), "uid": uid}
            })))
            .mount(server)
            .await;
        Mock::given(method("PUT"))
            .and(path(format!("/upload/{uid}")))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn converts_after_processing_then_success() {
        let server = MockServer::start().await;
        let dir = temp_dir();
        mount_preupload(&server, "job-1").await;

        // First poll reports processing, subsequent polls succeed.
        Mock::given(method("GET"))
            .and(path("/api/v2/parse/status"))
            .and(query_param("uid", "job-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": "success",
                "data": {"status": "processing", "progress": 40}
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/parse/status"))
            .and(query_param("uid", "job-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": "success",
                "data": {
                    "status": "success",
                    "result": {"pages": [{"md": "# Page One"}, {"md": "Page two text."}]}
                }
            })))
            .mount(&server)
            .await;

        let converter = Converter::new(opts(&server, &dir)).unwrap();
        let pdf = write_pdf(&dir);
        let written = converter.convert("abc123", &pdf).await.unwrap();

        assert_eq!(written, markdown_path(&dir, "abc123"));
        let markdown = std::fs::read_to_string(&written).unwrap();
        assert!(markdown.contains("# Page One"));
        assert!(markdown.contains("Page two text."));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn provider_failure_is_a_conversion_error() {
        let server = MockServer::start().await;
        let dir = temp_dir();
        mount_preupload(&server, "job-2").await;

        Mock::given(method("GET"))
            .and(path("/api/v2/parse/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": "success",
                "data": {"status": "failed", "detail": "unsupported format"}
            })))
            .mount(&server)
            .await;

        let converter = Converter::new(opts(&server, &dir)).unwrap();
        let pdf = write_pdf(&dir);
        let err = converter.convert("abc123", &pdf).await.unwrap_err();

        assert!(matches!(err, DigestError::Conversion(_)));
        assert!(err.to_string().contains("unsupported format"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn stuck_job_times_out() {
        let server = MockServer::start().await;
        let dir = temp_dir();
        mount_preupload(&server, "job-3").await;

        Mock::given(method("GET"))
            .and(path("/api/v2/parse/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": "success",
                "data": {"status": "processing", "progress": 10}
            })))
            .mount(&server)
            .await;

        let mut options = opts(&server, &dir);
        options.timeout = Duration::from_millis(50);

        let converter = Converter::new(options).unwrap();
        let pdf = write_pdf(&dir);
        let err = converter.convert("abc123", &pdf).await.unwrap_err();

        assert!(matches!(err, DigestError::Conversion(_)));
        assert!(err.to_string().contains("did not finish"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn preupload_rejection_is_a_conversion_error() {
        let server = MockServer::start().await;
        let dir = temp_dir();

        Mock::given(method("POST"))
            .and(path("/api/v2/parse/preupload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": "unauthorized", "msg": "bad token"
            })))
            .mount(&server)
            .await;

        let converter = Converter::new(opts(&server, &dir)).unwrap();
        let pdf = write_pdf(&dir);
        let err = converter.convert("abc123", &pdf).await.unwrap_err();

        assert!(matches!(err, DigestError::Conversion(_)));
        assert!(err.to_string().contains("bad token"));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
