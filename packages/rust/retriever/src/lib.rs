//! Retriever: resolves each paper's PDF link and downloads it locally.
//!
//! The paper's detail page is fetched and scanned for a PDF link (a badge
//! anchor labeled "PDF", else the first `.pdf` href). The PDF is written to
//! `<pdf_dir>/<id>.pdf` — the path depends only on the record id, so
//! re-running with the same inputs overwrites deterministically.
//!
//! All failures here are per-record [`DigestError::Download`]s; the caller
//! drops the record and continues the batch.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Client;
use scraper::{Html, Selector};
use tracing::{debug, info, instrument};
use url::Url;

use paperdigest_shared::{DigestError, PaperRecord, Result};

/// User-Agent string for download requests.
const USER_AGENT: &str = concat!("paperdigest/", env!("CARGO_PKG_VERSION"));

/// Per-request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 60;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Configuration for PDF retrieval.
#[derive(Debug, Clone)]
pub struct RetrieveOptions {
    /// Directory PDFs are written to.
    pub pdf_dir: PathBuf,
    /// Maximum accepted PDF size in bytes.
    pub max_pdf_bytes: u64,
}

/// Local path a record's PDF is written to.
pub fn pdf_path(pdf_dir: &Path, id: &str) -> PathBuf {
    pdf_dir.join(format!("{id}.pdf"))
}

// ---------------------------------------------------------------------------
// Retriever
// ---------------------------------------------------------------------------

/// Downloads paper PDFs to deterministic local paths.
pub struct Retriever {
    client: Client,
    opts: RetrieveOptions,
}

impl Retriever {
    /// Create a new retriever with the given options.
    pub fn new(opts: RetrieveOptions) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| DigestError::Download(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, opts })
    }

    /// Download the PDF for one record, returning its local path.
    #[instrument(skip_all, fields(id = %record.id, url = %record.url))]
    pub async fn retrieve(&self, record: &PaperRecord) -> Result<PathBuf> {
        let page_url = Url::parse(&record.url)
            .map_err(|e| DigestError::Download(format!("invalid paper URL {}: {e}", record.url)))?;

        let page_html = self.fetch_text(&page_url).await?;
        let pdf_url = extract_pdf_link(&page_html)
            .and_then(|href| page_url.join(&href).ok())
            .ok_or_else(|| {
                DigestError::Download(format!("no PDF link found on {}", record.url))
            })?;

        debug!(%pdf_url, "resolved PDF link");

        let bytes = self.fetch_pdf(&pdf_url).await?;
        let target = pdf_path(&self.opts.pdf_dir, &record.id);
        std::fs::write(&target, &bytes).map_err(|e| DigestError::io(&target, e))?;

        info!(path = %target.display(), size = bytes.len(), "PDF downloaded");
        Ok(target)
    }

    /// GET a page and return its text body.
    async fn fetch_text(&self, url: &Url) -> Result<String> {
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| DigestError::Download(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DigestError::Download(format!("{url}: HTTP {status}")));
        }

        response
            .text()
            .await
            .map_err(|e| DigestError::Download(format!("{url}: failed to read body: {e}")))
    }

    /// GET the PDF itself, enforcing the size limit.
    async fn fetch_pdf(&self, url: &Url) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| DigestError::Download(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DigestError::Download(format!("{url}: HTTP {status}")));
        }

        if let Some(len) = response.content_length() {
            if len > self.opts.max_pdf_bytes {
                return Err(DigestError::Download(format!(
                    "{url}: PDF too large ({len} bytes, max {})",
                    self.opts.max_pdf_bytes
                )));
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| DigestError::Download(format!("{url}: failed to read body: {e}")))?;

        // Content-Length can lie or be absent; check the actual size too.
        if bytes.len() as u64 > self.opts.max_pdf_bytes {
            return Err(DigestError::Download(format!(
                "{url}: PDF too large ({} bytes, max {})",
                bytes.len(),
                self.opts.max_pdf_bytes
            )));
        }

        Ok(bytes.to_vec())
    }
}

// ---------------------------------------------------------------------------
// PDF link extraction
// ---------------------------------------------------------------------------

/// Find the PDF href on a paper page.
///
/// Prefers a badge anchor containing a "PDF" span; falls back to the first
/// anchor whose href contains `.pdf`.
pub fn extract_pdf_link(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);

    let badge_sel = Selector::parse("a.badge-light").expect("static selector");
    let span_sel = Selector::parse("span").expect("static selector");

    for badge in doc.select(&badge_sel) {
        let has_pdf_label = badge
            .select(&span_sel)
            .any(|span| span.text().collect::<String>().trim() == "PDF");
        if has_pdf_label {
            if let Some(href) = badge.value().attr("href") {
                return Some(href.to_string());
            }
        }
    }

    let anchor_sel = Selector::parse("a").expect("static selector");
    doc.select(&anchor_sel)
        .filter_map(|a| a.value().attr("href"))
        .find(|href| href.contains(".pdf"))
        .map(|href| href.to_string())
}
