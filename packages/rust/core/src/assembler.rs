//! Digest assembler: writes per-paper summary files and the aggregate
//! daily digest.
//!
//! Output layout under the run's output root:
//!
//! ```text
//! summaries/summary_<id>_<date>.md
//! paper_digest_<date>.md
//! ```
//!
//! Filesystem errors here are fatal; all the expensive work already
//! happened, so failing loudly beats a silent half-written run.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::{info, instrument};

use paperdigest_shared::{
    digest_filename, summary_filename, DigestError, PaperRecord, Result,
};

/// Directory under the output root holding per-paper summary files.
const SUMMARIES_DIR: &str = "summaries";

/// Where and for which date the digest is assembled.
#[derive(Debug, Clone)]
pub struct AssembleConfig {
    /// Run output root.
    pub output_root: PathBuf,
    /// Run date, stamped into every filename.
    pub date: NaiveDate,
}

/// Paths produced by one assembly pass.
#[derive(Debug)]
pub struct AssembleResult {
    /// Aggregate digest file.
    pub digest_path: PathBuf,
    /// One summary file per paper, in digest order.
    pub summary_paths: Vec<PathBuf>,
    /// Number of papers in the digest.
    pub paper_count: usize,
}

/// Write summary files and the aggregate digest for the given records.
///
/// Records must arrive fully enriched; a record with an empty summary or
/// no converted Markdown indicates an upstream bug and is a
/// [`DigestError::Validation`]. Record order is preserved in the digest.
#[instrument(skip_all, fields(papers = records.len(), date = %config.date))]
pub fn assemble(config: &AssembleConfig, records: &[PaperRecord]) -> Result<AssembleResult> {
    for record in records {
        validate_record(record)?;
    }

    let summaries_dir = config.output_root.join(SUMMARIES_DIR);
    std::fs::create_dir_all(&summaries_dir).map_err(|e| DigestError::io(&summaries_dir, e))?;

    let mut summary_paths = Vec::with_capacity(records.len());
    for record in records {
        let path = summaries_dir.join(summary_filename(&record.id, config.date));
        std::fs::write(&path, summary_file_content(record))
            .map_err(|e| DigestError::io(&path, e))?;
        summary_paths.push(path);
    }

    let digest_path = config.output_root.join(digest_filename(config.date));
    std::fs::write(&digest_path, digest_content(config.date, records))
        .map_err(|e| DigestError::io(&digest_path, e))?;

    info!(digest = %digest_path.display(), papers = records.len(), "digest written");

    Ok(AssembleResult {
        digest_path,
        summary_paths,
        paper_count: records.len(),
    })
}

fn validate_record(record: &PaperRecord) -> Result<()> {
    let summary_ok = record
        .summary_text
        .as_deref()
        .is_some_and(|s| !s.trim().is_empty());
    if !summary_ok {
        return Err(DigestError::validation(format!(
            "paper {} reached assembly without a summary",
            record.id
        )));
    }
    if record.markdown_path.is_none() {
        return Err(DigestError::validation(format!(
            "paper {} reached assembly without converted Markdown",
            record.id
        )));
    }
    Ok(())
}

/// Content of one standalone summary file.
fn summary_file_content(record: &PaperRecord) -> String {
    let summary = record.summary_text.as_deref().unwrap_or_default();
    format!("# {}\n\n{}\n", record.title, summary)
}

/// Content of the aggregate digest file.
fn digest_content(date: NaiveDate, records: &[PaperRecord]) -> String {
    let mut out = format!("# Paper Digest — {}\n\n", date.format("%Y-%m-%d"));

    let sections: Vec<String> = records.iter().map(paper_section).collect();
    out.push_str(&sections.join("\n---\n\n"));
    out.push('\n');
    out
}

fn paper_section(record: &PaperRecord) -> String {
    let mut section = format!("## {}\n\n", record.title);
    section.push_str(&format!("- Paper: {}\n", record.url));
    if let Some(code) = &record.code_link {
        section.push_str(&format!("- Code: {code} ({} stars)\n", record.stars));
    }
    section.push_str(&format!("- Published: {}\n\n", record.publication_date));
    section.push_str(record.summary_text.as_deref().unwrap_or_default());
    section.push('\n');
    section
}

/// Path the digest will be written to, without writing it.
pub fn digest_path(output_root: &Path, date: NaiveDate) -> PathBuf {
    output_root.join(digest_filename(date))
}
