//! Summarizer: turns a paper's converted Markdown into a structured summary.

use tracing::{debug, instrument};

use paperdigest_llm::{ChatClient, ChatRequest, Message};
use paperdigest_shared::{DigestError, PaperRecord, Result};

/// Cap on how much paper content goes into the prompt. Long papers are
/// truncated at a char boundary; the front matter carries the abstract,
/// method, and usually the main results.
const MAX_CONTENT_CHARS: usize = 60_000;

/// Configuration for one summarization call.
#[derive(Debug, Clone)]
pub struct SummaryOptions {
    /// Output language of the summary.
    pub language: String,
    /// Target length guidance, e.g. "800-1200 words".
    pub target_length: String,
    /// Audience framing, e.g. "machine learning practitioners".
    pub audience: String,
    /// Sections the summary should cover, in order.
    pub sections: Vec<String>,
    /// Model identifier.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
}

/// Summarize one paper's Markdown content.
///
/// Any API failure or an empty completion is a [`DigestError::Summarize`],
/// which the pipeline treats as a per-record drop rather than a fatal error.
#[instrument(skip_all, fields(paper = %record.id, title = %record.title))]
pub async fn summarize(
    client: &ChatClient,
    record: &PaperRecord,
    markdown: &str,
    opts: &SummaryOptions,
) -> Result<String> {
    let content = truncate_content(markdown);
    if content.len() < markdown.len() {
        debug!(
            original = markdown.len(),
            truncated = content.len(),
            "paper content truncated for prompt"
        );
    }

    let request = ChatRequest::new(&opts.model)
        .message(Message::system(system_prompt(opts)))
        .message(Message::user(user_prompt(record, content)))
        .temperature(opts.temperature);

    let response = client
        .chat_completion(&request)
        .await
        .map_err(|e| DigestError::Summarize(format!("completion failed: {e}")))?;

    let summary = response.content.trim().to_string();
    if summary.is_empty() {
        return Err(DigestError::Summarize("model returned an empty summary".into()));
    }

    debug!(chars = summary.len(), "summary generated");
    Ok(summary)
}

/// Build the system prompt from the formatting options.
pub fn system_prompt(opts: &SummaryOptions) -> String {
    let sections = opts.sections.join(", ");
    format!(
        "You are a research paper summarizer writing for {}. \
         Summarize the paper in {} ({}), covering in order: {}. \
         Use Markdown formatting with a short heading per section. \
         Be faithful to the paper; do not invent results.",
        opts.audience, opts.language, opts.target_length, sections
    )
}

/// Metadata header prepended to the paper content so the model can cite
/// the source and the code repository.
pub fn metadata_header(record: &PaperRecord) -> String {
    let mut header = format!("Title: {}\nPaper: {}\n", record.title, record.url);
    if let Some(code) = &record.code_link {
        header.push_str(&format!("Code: {code} ({} stars)\n", record.stars));
    }
    header.push_str(&format!("Published: {}\n", record.publication_date));
    header
}

fn user_prompt(record: &PaperRecord, content: &str) -> String {
    format!("{}\nPaper content:\n\n{}", metadata_header(record), content)
}

/// Truncate to [`MAX_CONTENT_CHARS`], backing off to a char boundary.
fn truncate_content(markdown: &str) -> &str {
    if markdown.len() <= MAX_CONTENT_CHARS {
        return markdown;
    }
    let mut end = MAX_CONTENT_CHARS;
    while end > 0 && !markdown.is_char_boundary(end) {
        end -= 1;
    }
    &markdown[..end]
}
