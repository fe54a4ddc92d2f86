//! Core domain types for the paperdigest pipeline.

use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Length of the stable paper identifier (hex chars of the URL's SHA-256).
const STABLE_ID_LEN: usize = 12;

// ---------------------------------------------------------------------------
// PaperRecord
// ---------------------------------------------------------------------------

/// The per-paper state object flowing through all pipeline stages.
///
/// Created by the Fetcher with listing metadata, then progressively enriched:
/// the Ranker sets `rank_score`, the Retriever `local_pdf_path`, the
/// Converter `markdown_path`, and the Summarizer `summary_text`. Never
/// deleted during a run; discarded at process exit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperRecord {
    /// Stable identifier derived from the paper URL (see [`stable_id`]).
    pub id: String,
    /// Paper title as shown on the listing.
    pub title: String,
    /// URL of the paper's detail page.
    pub url: String,
    /// Abstract text from the listing card (may be empty).
    #[serde(rename = "abstract", default)]
    pub abstract_text: String,
    /// Linked code repository, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_link: Option<String>,
    /// Repository star count from the listing card.
    #[serde(default)]
    pub stars: u32,
    /// Publication date (falls back to the run date when the card has none).
    pub publication_date: NaiveDate,
    /// Rank position assigned by the Ranker (1.0 = most interesting).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank_score: Option<f32>,
    /// Local path of the downloaded PDF, set by the Retriever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_pdf_path: Option<PathBuf>,
    /// Local path of the converted Markdown, set by the Converter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markdown_path: Option<PathBuf>,
    /// Generated summary, set by the Summarizer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_text: Option<String>,
}

impl PaperRecord {
    /// Create a fresh record as produced by the Fetcher.
    pub fn new(title: impl Into<String>, url: impl Into<String>, publication_date: NaiveDate) -> Self {
        let url = url.into();
        Self {
            id: stable_id(&url),
            title: title.into(),
            url,
            abstract_text: String::new(),
            code_link: None,
            stars: 0,
            publication_date,
            rank_score: None,
            local_pdf_path: None,
            markdown_path: None,
            summary_text: None,
        }
    }
}

/// Derive a stable identifier from a paper URL.
///
/// Re-running the pipeline with the same inputs yields the same id, so
/// downloaded PDFs and generated summaries overwrite deterministically.
pub fn stable_id(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    let hash = format!("{:x}", hasher.finalize());
    hash[..STABLE_ID_LEN].to_string()
}

// ---------------------------------------------------------------------------
// StageOutcome
// ---------------------------------------------------------------------------

/// A paper dropped by a per-record stage, with the reason.
#[derive(Debug, Clone)]
pub struct DroppedPaper {
    /// Stable paper id.
    pub id: String,
    /// Paper title.
    pub title: String,
    /// Stage that dropped the record (e.g., "retrieve", "convert").
    pub stage: String,
    /// Human-readable failure reason.
    pub reason: String,
}

/// Partitioned outcome of a per-record stage: successes in their original
/// relative order, plus the records dropped along the way.
///
/// Models the drop-and-continue error policy explicitly rather than as ad
/// hoc skip logic.
#[derive(Debug, Default)]
pub struct StageOutcome {
    /// Records that passed the stage, order preserved.
    pub records: Vec<PaperRecord>,
    /// Records dropped by the stage.
    pub dropped: Vec<DroppedPaper>,
}

impl StageOutcome {
    /// Record a success.
    pub fn push_ok(&mut self, record: PaperRecord) {
        self.records.push(record);
    }

    /// Record a per-record failure.
    pub fn push_dropped(&mut self, record: &PaperRecord, stage: &str, reason: impl Into<String>) {
        self.dropped.push(DroppedPaper {
            id: record.id.clone(),
            title: record.title.clone(),
            stage: stage.to_string(),
            reason: reason.into(),
        });
    }
}

// ---------------------------------------------------------------------------
// Output naming
// ---------------------------------------------------------------------------

/// Filename of the aggregate digest report for a given run date.
pub fn digest_filename(date: NaiveDate) -> String {
    format!("paper_digest_{}.md", date.format("%Y-%m-%d"))
}

/// Filename of an individual paper summary for a given run date.
pub fn summary_filename(id: &str, date: NaiveDate) -> String {
    format!("summary_{id}_{}.md", date.format("%Y-%m-%d"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
    }

    #[test]
    fn stable_id_is_deterministic() {
        let a = stable_id("https://example.com/paper/attention-is-all-you-need");
        let b = stable_id("https://example.com/paper/attention-is-all-you-need");
        assert_eq!(a, b);
        assert_eq!(a.len(), STABLE_ID_LEN);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn stable_id_differs_per_url() {
        let a = stable_id("https://example.com/paper/a");
        let b = stable_id("https://example.com/paper/b");
        assert_ne!(a, b);
    }

    #[test]
    fn new_record_has_no_enrichment() {
        let record = PaperRecord::new("Test Paper", "https://example.com/paper/test", date());
        assert_eq!(record.id, stable_id("https://example.com/paper/test"));
        assert!(record.rank_score.is_none());
        assert!(record.local_pdf_path.is_none());
        assert!(record.markdown_path.is_none());
        assert!(record.summary_text.is_none());
    }

    #[test]
    fn record_serialization_roundtrip() {
        let mut record = PaperRecord::new("Test", "https://example.com/paper/test", date());
        record.abstract_text = "An abstract.".into();
        record.summary_text = Some("A summary.".into());

        let json = serde_json::to_string(&record).expect("serialize");
        assert!(json.contains("\"abstract\""));
        let parsed: PaperRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.id, record.id);
        assert_eq!(parsed.summary_text.as_deref(), Some("A summary."));
    }

    #[test]
    fn stage_outcome_partitions() {
        let good = PaperRecord::new("Good", "https://example.com/paper/good", date());
        let bad = PaperRecord::new("Bad", "https://example.com/paper/bad", date());

        let mut outcome = StageOutcome::default();
        outcome.push_ok(good);
        outcome.push_dropped(&bad, "retrieve", "HTTP 404");

        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.dropped.len(), 1);
        assert_eq!(outcome.dropped[0].stage, "retrieve");
        assert_eq!(outcome.dropped[0].reason, "HTTP 404");
    }

    #[test]
    fn output_filenames_are_date_stamped() {
        assert_eq!(digest_filename(date()), "paper_digest_2025-03-14.md");
        assert_eq!(summary_filename("abc123", date()), "summary_abc123_2025-03-14.md");
    }
}
