//! The `run_digest` pipeline: scrape listing, rank, download, convert,
//! summarize, assemble.
//!
//! Stages run strictly in sequence. Per-record failures (download,
//! conversion, summarization) drop the record and the batch continues;
//! listing failures and filesystem errors abort the run. A ranking
//! response that cannot be parsed degrades to listing order rather than
//! aborting.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use tracing::{info, instrument, warn};
use url::Url;

use paperdigest_converter::{ConvertOptions, Converter};
use paperdigest_fetcher::{fetch_listing, FetchOptions};
use paperdigest_llm::ChatClient;
use paperdigest_retriever::{RetrieveOptions, Retriever};
use paperdigest_shared::{DigestError, DroppedPaper, PaperRecord, Result, StageOutcome};

use crate::assembler::{assemble, AssembleConfig};
use crate::ranker::{rank, RankOptions};
use crate::summarizer::{summarize, SummaryOptions};

/// Directory under the output root holding downloaded PDFs.
const PDFS_DIR: &str = "pdfs";

/// Directory under the output root holding converted Markdown.
const MARKDOWN_DIR: &str = "markdown";

// ---------------------------------------------------------------------------
// Run config & result
// ---------------------------------------------------------------------------

/// Completion API settings shared by the Ranker and the Summarizer.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    /// API key (resolved from the environment by the caller).
    pub api_key: String,
    /// OpenAI-compatible base URL.
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
}

/// Conversion API settings.
#[derive(Debug, Clone)]
pub struct ConverterSettings {
    /// API key (resolved from the environment by the caller).
    pub api_key: String,
    /// Conversion API base URL.
    pub base_url: String,
    /// Interval between status polls.
    pub poll_interval: Duration,
    /// Overall deadline for one conversion job.
    pub timeout: Duration,
    /// Maximum accepted PDF size in bytes.
    pub max_pdf_bytes: u64,
}

/// Summary formatting passed through to the Summarizer.
#[derive(Debug, Clone)]
pub struct SummaryFormat {
    /// Output language.
    pub language: String,
    /// Target length guidance.
    pub target_length: String,
    /// Audience framing.
    pub audience: String,
    /// Sections to cover, in order.
    pub sections: Vec<String>,
}

/// Everything one digest run needs.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Listing URL to scrape.
    pub listing_url: Url,
    /// Candidate pool size.
    pub target_count: usize,
    /// Maximum listing pages to visit.
    pub max_pages: u32,
    /// Delay in ms between listing page requests.
    pub request_delay_ms: u64,
    /// How many papers the Ranker selects.
    pub shortlist: usize,
    /// Max completion tokens for the ranking response.
    pub rank_max_tokens: u32,
    /// Completion API settings.
    pub llm: LlmSettings,
    /// Conversion API settings.
    pub converter: ConverterSettings,
    /// Summary formatting.
    pub summary: SummaryFormat,
    /// Run output root.
    pub output_root: PathBuf,
    /// Run date, stamped into output filenames.
    pub date: NaiveDate,
}

/// Result summary of one digest run.
#[derive(Debug)]
pub struct DigestRunResult {
    /// Path of the written digest; `None` when every paper was dropped.
    pub digest_path: Option<PathBuf>,
    /// Candidates scraped from the listing.
    pub discovered: usize,
    /// Papers selected by the Ranker.
    pub ranked: usize,
    /// Papers that made it into the digest.
    pub summarized: usize,
    /// Papers dropped along the way, with stage and reason.
    pub dropped: Vec<DroppedPaper>,
    /// Total elapsed time.
    pub elapsed: Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after a paper finishes a per-record stage.
    fn paper_processed(&self, title: &str, stage: &str, current: usize, total: usize);
    /// Called when a paper is dropped.
    fn paper_dropped(&self, title: &str, stage: &str, reason: &str);
    /// Called when the pipeline completes.
    fn done(&self, result: &DigestRunResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn paper_processed(&self, _title: &str, _stage: &str, _current: usize, _total: usize) {}
    fn paper_dropped(&self, _title: &str, _stage: &str, _reason: &str) {}
    fn done(&self, _result: &DigestRunResult) {}
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Run the full digest pipeline:
/// 1. Scrape the paper listing
/// 2. Rank candidates via the completion API
/// 3. Download the selected PDFs
/// 4. Convert PDFs to Markdown
/// 5. Summarize each paper
/// 6. Assemble per-paper summaries and the aggregate digest
#[instrument(skip_all, fields(listing = %config.listing_url, date = %config.date))]
pub async fn run_digest(
    config: &RunConfig,
    progress: &dyn ProgressReporter,
) -> Result<DigestRunResult> {
    let start = Instant::now();

    let pdf_dir = config.output_root.join(PDFS_DIR);
    let markdown_dir = config.output_root.join(MARKDOWN_DIR);
    std::fs::create_dir_all(&pdf_dir).map_err(|e| DigestError::io(&pdf_dir, e))?;
    std::fs::create_dir_all(&markdown_dir).map_err(|e| DigestError::io(&markdown_dir, e))?;

    // --- Fetch ---
    progress.phase("Fetching paper listing");
    let candidates = fetch_listing(&FetchOptions {
        listing_url: config.listing_url.clone(),
        target_count: config.target_count,
        max_pages: config.max_pages,
        request_delay_ms: config.request_delay_ms,
    })
    .await?;
    let discovered = candidates.len();
    info!(discovered, "listing scraped");

    // --- Rank ---
    progress.phase("Ranking papers");
    let chat_client = ChatClient::new(&config.llm.api_key, &config.llm.base_url)
        .map_err(|e| DigestError::config(e.to_string()))?;
    let rank_opts = RankOptions {
        shortlist: config.shortlist,
        model: config.llm.model.clone(),
        temperature: config.llm.temperature,
        max_tokens: config.rank_max_tokens,
    };
    let ranked = match rank(&chat_client, &candidates, &rank_opts).await {
        Ok(ranked) => ranked,
        Err(DigestError::RankParse(reason)) => {
            warn!(%reason, "ranking unusable, falling back to listing order");
            fallback_shortlist(&candidates, config.shortlist)
        }
        Err(e) => return Err(e),
    };
    let ranked_count = ranked.len();

    // --- Download ---
    progress.phase("Downloading PDFs");
    let retriever = Retriever::new(RetrieveOptions {
        pdf_dir,
        max_pdf_bytes: config.converter.max_pdf_bytes,
    })?;
    let mut downloaded = StageOutcome::default();
    let total = ranked.len();
    for (i, mut record) in ranked.into_iter().enumerate() {
        match retriever.retrieve(&record).await {
            Ok(path) => {
                record.local_pdf_path = Some(path);
                progress.paper_processed(&record.title, "retrieve", i + 1, total);
                downloaded.push_ok(record);
            }
            Err(e) if e.is_per_record() => {
                warn!(id = %record.id, title = %record.title, error = %e, "download failed, dropping paper");
                progress.paper_dropped(&record.title, "retrieve", &e.to_string());
                downloaded.push_dropped(&record, "retrieve", e.to_string());
            }
            Err(e) => return Err(e),
        }
    }

    // --- Convert ---
    progress.phase("Converting PDFs to Markdown");
    let converter = Converter::new(ConvertOptions {
        base_url: config.converter.base_url.clone(),
        api_key: config.converter.api_key.clone(),
        poll_interval: config.converter.poll_interval,
        timeout: config.converter.timeout,
        markdown_dir,
    })?;
    let mut converted = StageOutcome::default();
    converted.dropped = downloaded.dropped;
    let total = downloaded.records.len();
    for (i, mut record) in downloaded.records.into_iter().enumerate() {
        // local_pdf_path is set for every record that survived retrieval
        let pdf = match &record.local_pdf_path {
            Some(path) => path.clone(),
            None => {
                return Err(DigestError::validation(format!(
                    "paper {} reached conversion without a PDF",
                    record.id
                )));
            }
        };
        match converter.convert(&record.id, &pdf).await {
            Ok(path) => {
                record.markdown_path = Some(path);
                progress.paper_processed(&record.title, "convert", i + 1, total);
                converted.push_ok(record);
            }
            Err(e) if e.is_per_record() => {
                warn!(id = %record.id, title = %record.title, error = %e, "conversion failed, dropping paper");
                progress.paper_dropped(&record.title, "convert", &e.to_string());
                converted.push_dropped(&record, "convert", e.to_string());
            }
            Err(e) => return Err(e),
        }
    }

    // --- Summarize ---
    progress.phase("Summarizing papers");
    let summary_opts = SummaryOptions {
        language: config.summary.language.clone(),
        target_length: config.summary.target_length.clone(),
        audience: config.summary.audience.clone(),
        sections: config.summary.sections.clone(),
        model: config.llm.model.clone(),
        temperature: config.llm.temperature,
    };
    let mut summarized = StageOutcome::default();
    summarized.dropped = converted.dropped;
    let total = converted.records.len();
    for (i, mut record) in converted.records.into_iter().enumerate() {
        let markdown_file = match &record.markdown_path {
            Some(path) => path.clone(),
            None => {
                return Err(DigestError::validation(format!(
                    "paper {} reached summarization without Markdown",
                    record.id
                )));
            }
        };
        let markdown = std::fs::read_to_string(&markdown_file)
            .map_err(|e| DigestError::io(&markdown_file, e))?;

        match summarize(&chat_client, &record, &markdown, &summary_opts).await {
            Ok(summary) => {
                record.summary_text = Some(summary);
                progress.paper_processed(&record.title, "summarize", i + 1, total);
                summarized.push_ok(record);
            }
            Err(e) if e.is_per_record() => {
                warn!(id = %record.id, title = %record.title, error = %e, "summarization failed, dropping paper");
                progress.paper_dropped(&record.title, "summarize", &e.to_string());
                summarized.push_dropped(&record, "summarize", e.to_string());
            }
            Err(e) => return Err(e),
        }
    }

    // --- Assemble ---
    let digest_path = if summarized.records.is_empty() {
        warn!("no papers survived the pipeline, skipping digest");
        None
    } else {
        progress.phase("Assembling digest");
        let result = assemble(
            &AssembleConfig {
                output_root: config.output_root.clone(),
                date: config.date,
            },
            &summarized.records,
        )?;
        Some(result.digest_path)
    };

    let result = DigestRunResult {
        digest_path,
        discovered,
        ranked: ranked_count,
        summarized: summarized.records.len(),
        dropped: summarized.dropped,
        elapsed: start.elapsed(),
    };

    info!(
        discovered = result.discovered,
        ranked = result.ranked,
        summarized = result.summarized,
        dropped = result.dropped.len(),
        elapsed_ms = result.elapsed.as_millis(),
        "digest run complete"
    );

    progress.done(&result);
    Ok(result)
}

/// Listing-order fallback used when the ranking response is unusable.
fn fallback_shortlist(candidates: &[PaperRecord], shortlist: usize) -> Vec<PaperRecord> {
    candidates
        .iter()
        .take(shortlist)
        .enumerate()
        .map(|(i, record)| {
            let mut record = record.clone();
            record.rank_score = Some((i + 1) as f32);
            record
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
    }

    fn temp_root() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "pd-pipeline-test-{}-{}",
            std::process::id(),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    fn run_config(server: &MockServer, output_root: PathBuf, papers: usize) -> RunConfig {
        RunConfig {
            listing_url: Url::parse(&format!("{}/latest", server.uri())).expect("listing url"),
            target_count: papers,
            max_pages: 1,
            request_delay_ms: 0,
            shortlist: papers,
            rank_max_tokens: 100,
            llm: LlmSettings {
                api_key: "sk-test".into(),
                base_url: server.uri(),
                model: "test-model".into(),
                temperature: 0.7,
            },
            converter: ConverterSettings {
                api_key: "doc2x-test".into(),
                base_url: server.uri(),
                poll_interval: Duration::from_millis(10),
                timeout: Duration::from_secs(5),
                max_pdf_bytes: 1024 * 1024,
            },
            summary: SummaryFormat {
                language: "Chinese".into(),
                target_length: "800-1200 words".into(),
                audience: "machine learning practitioners".into(),
                sections: vec!["motivation".into(), "method".into()],
            },
            output_root,
            date: date(),
        }
    }

    fn listing_html(count: usize) -> String {
        let mut html = String::from("<html><body>");
        for i in 1..=count {
            html.push_str(&format!(
                r#"<div class="row infinite-item item paper-card">
                    <h1><a href="/paper/p{i}">Title {i}</a></h1>
                    <p class="item-strip-abstract">Abstract {i}</p>
                    <span class="item-date-pub">12 Mar 2025</span>
                </div>"#
            ));
        }
        html.push_str("</body></html>");
        html
    }

    fn paper_page(server: &MockServer, i: usize) -> String {
        format!(
            r#"<html><body>
                <a class="badge badge-light" href="{}/pdf/p{i}.pdf"><span>PDF</span></a>
            </body></html>"#,
            server.uri()
        )
    }

    fn chat_response(content: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": content}}]
        }))
    }

    async fn mount_listing(server: &MockServer, count: usize) {
        Mock::given(method("GET"))
            .and(path("/latest"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing_html(count)))
            .mount(server)
            .await;
    }

    async fn mount_paper(server: &MockServer, i: usize, pdf_ok: bool) {
        Mock::given(method("GET"))
            .and(path(format!("/paper/p{i}")))
            .respond_with(ResponseTemplate::new(200).set_body_string(paper_page(server, i)))
            .mount(server)
            .await;

        let pdf = if pdf_ok {
            ResponseTemplate::new(200).set_body_bytes(format!("%PDF-1.4 paper {i}").into_bytes())
        } else {
            ResponseTemplate::new(404)
        };
        Mock::given(method("GET"))
            .and(path(format!("/pdf/p{i}.pdf")))
            .respond_with(pdf)
            .mount(server)
            .await;
    }

    /// Mount the conversion endpoints for papers 1..=count, skipping the
    /// given indices. Preupload grants are consumed in mount order, so the
    /// job uids line up with the per-paper upload and status mocks.
    async fn mount_conversion(server: &MockServer, count: usize, skip: &[usize]) {
        for i in 1..=count {
            if skip.contains(&i) {
                continue;
            }
            Mock::given(method("POST"))
                .and(path("/api/v2/parse/preupload"))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "code": "success",
                    "data": {"url": format!("{}/upload/{i}", server.uri()), "uid": format!("job-{i}")}
                })))
                .up_to_n_times(1)
                .mount(server)
                .await;

            Mock::given(method("PUT"))
                .and(path(format!("/upload/{i}")))
                .respond_with(ResponseTemplate::new(200))
                .mount(server)
                .await;

            Mock::given(method("GET"))
                .and(path("/api/v2/parse/status"))
                .and(query_param("uid", format!("job-{i}")))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "code": "success",
                    "data": {
                        "status": "success",
                        "result": {"pages": [{"md": format!("Paper {i} content")}]}
                    }
                })))
                .mount(server)
                .await;
        }
    }

    /// Per-paper summary responses, matched on the converted Markdown that
    /// appears in the prompt. The ranking call never contains "content".
    async fn mount_summaries(server: &MockServer, count: usize, skip: &[usize]) {
        for i in 1..=count {
            if skip.contains(&i) {
                continue;
            }
            Mock::given(method("POST"))
                .and(path("/chat/completions"))
                .and(body_string_contains(format!("Paper {i} content")))
                .respond_with(chat_response(&format!("摘要{i}")))
                .mount(server)
                .await;
        }
    }

    async fn mount_ranking(server: &MockServer, response: &str) {
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_string_contains("JSON array"))
            .respond_with(chat_response(response))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn end_to_end_three_papers() {
        let server = MockServer::start().await;
        let root = temp_root();

        mount_listing(&server, 3).await;
        for i in 1..=3 {
            mount_paper(&server, i, true).await;
        }
        mount_conversion(&server, 3, &[]).await;
        mount_ranking(&server, "[1, 2, 3]").await;
        mount_summaries(&server, 3, &[]).await;

        let config = run_config(&server, root.clone(), 3);
        let result = run_digest(&config, &SilentProgress).await.expect("run");

        assert_eq!(result.discovered, 3);
        assert_eq!(result.ranked, 3);
        assert_eq!(result.summarized, 3);
        assert!(result.dropped.is_empty());

        let digest_path = result.digest_path.expect("digest written");
        let digest = std::fs::read_to_string(&digest_path).expect("read digest");

        // Three sections, in ranking order, each followed by its summary.
        let positions: Vec<usize> = (1..=3)
            .map(|i| digest.find(&format!("## Title {i}")).expect("section"))
            .collect();
        assert!(positions[0] < positions[1] && positions[1] < positions[2]);
        for i in 1..=3 {
            let section = digest.find(&format!("## Title {i}")).unwrap();
            let summary = digest.find(&format!("摘要{i}")).expect("summary");
            assert!(section < summary);
        }
        assert_eq!(digest.matches("## ").count(), 3);

        // Per-paper artifacts exist.
        assert_eq!(std::fs::read_dir(root.join(PDFS_DIR)).unwrap().count(), 3);
        assert_eq!(std::fs::read_dir(root.join(MARKDOWN_DIR)).unwrap().count(), 3);
        assert_eq!(std::fs::read_dir(root.join("summaries")).unwrap().count(), 3);

        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn download_failure_drops_one_paper() {
        let server = MockServer::start().await;
        let root = temp_root();

        mount_listing(&server, 5).await;
        for i in 1..=5 {
            mount_paper(&server, i, i != 3).await;
        }
        mount_conversion(&server, 5, &[3]).await;
        mount_ranking(&server, "[1, 2, 3, 4, 5]").await;
        mount_summaries(&server, 5, &[3]).await;

        let config = run_config(&server, root.clone(), 5);
        let result = run_digest(&config, &SilentProgress).await.expect("run");

        assert_eq!(result.summarized, 4);
        assert_eq!(result.dropped.len(), 1);
        assert_eq!(result.dropped[0].stage, "retrieve");
        assert_eq!(result.dropped[0].title, "Title 3");

        let digest = std::fs::read_to_string(result.digest_path.expect("digest")).expect("read");
        assert!(!digest.contains("Title 3"));
        assert_eq!(digest.matches("## ").count(), 4);

        // Survivors keep their original relative order.
        let positions: Vec<usize> = [1, 2, 4, 5]
            .iter()
            .map(|i| digest.find(&format!("## Title {i}")).expect("section"))
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));

        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn unparseable_ranking_degrades_to_listing_order() {
        let server = MockServer::start().await;
        let root = temp_root();

        mount_listing(&server, 3).await;
        for i in 1..=3 {
            mount_paper(&server, i, true).await;
        }
        mount_conversion(&server, 3, &[]).await;
        mount_ranking(&server, "I am unable to rank these papers.").await;
        mount_summaries(&server, 3, &[]).await;

        let mut config = run_config(&server, root.clone(), 3);
        config.shortlist = 2;
        let result = run_digest(&config, &SilentProgress).await.expect("run");

        // First two candidates in listing order.
        assert_eq!(result.ranked, 2);
        let digest = std::fs::read_to_string(result.digest_path.expect("digest")).expect("read");
        assert!(digest.contains("## Title 1"));
        assert!(digest.contains("## Title 2"));
        assert!(!digest.contains("## Title 3"));

        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn unreachable_listing_aborts_the_run() {
        let server = MockServer::start().await;
        let root = temp_root();

        Mock::given(method("GET"))
            .and(path("/latest"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let config = run_config(&server, root.clone(), 3);
        let err = run_digest(&config, &SilentProgress).await.unwrap_err();
        assert!(matches!(err, DigestError::Fetch { .. }));

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn fallback_takes_listing_prefix() {
        let candidates: Vec<PaperRecord> = (1..=4)
            .map(|i| {
                PaperRecord::new(
                    format!("Paper {i}"),
                    format!("https://p.example.com/{i}"),
                    date(),
                )
            })
            .collect();

        let picked = fallback_shortlist(&candidates, 2);
        assert_eq!(picked.len(), 2);
        assert_eq!(picked[0].title, "Paper 1");
        assert_eq!(picked[1].title, "Paper 2");
        assert_eq!(picked[0].rank_score, Some(1.0));
        assert_eq!(picked[1].rank_score, Some(2.0));
    }
}
