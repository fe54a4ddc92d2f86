//! Ranker: asks the completion model to pick the most interesting candidates.
//!
//! Candidates are numbered 1..N in the prompt; the model is asked for a JSON
//! array of numbers in preference order. The response is mapped back onto
//! the candidate list, so the output is always drawn from the input and
//! the model cannot synthesize papers. Numbers that don't
//! correspond to any candidate are logged and discarded; only a response
//! with zero usable numbers is a [`DigestError::RankParse`].

use regex::Regex;
use tracing::{info, instrument, warn};

use paperdigest_llm::{ChatClient, ChatRequest, Message};
use paperdigest_shared::{DigestError, PaperRecord, Result};

/// System prompt fixing the response format.
const SYSTEM_PROMPT: &str =
    "You are a research paper analyst. Respond only with a JSON array of paper numbers.";

/// Configuration for one ranking call.
#[derive(Debug, Clone)]
pub struct RankOptions {
    /// How many papers to select.
    pub shortlist: usize,
    /// Model identifier.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion token cap (the response is a short array).
    pub max_tokens: u32,
}

/// Rank candidates and return the selected subsequence, best first.
///
/// Each returned record carries its 1-based preference position in
/// `rank_score`. Requesting more papers than exist is not an error; the
/// model simply ranks what it was given.
#[instrument(skip_all, fields(candidates = candidates.len(), shortlist = opts.shortlist))]
pub async fn rank(
    client: &ChatClient,
    candidates: &[PaperRecord],
    opts: &RankOptions,
) -> Result<Vec<PaperRecord>> {
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let prompt = build_prompt(candidates, opts.shortlist);
    let request = ChatRequest::new(&opts.model)
        .message(Message::system(SYSTEM_PROMPT))
        .message(Message::user(prompt))
        .temperature(opts.temperature)
        .max_tokens(opts.max_tokens);

    let response = client
        .chat_completion(&request)
        .await
        .map_err(|e| DigestError::RankParse(format!("completion failed: {e}")))?;

    let selection = parse_selection(&response.content, candidates.len(), opts.shortlist)?;
    let ranked = apply_selection(candidates, &selection);

    info!(
        selected = ranked.len(),
        titles = ?ranked.iter().map(|r| r.title.as_str()).collect::<Vec<_>>(),
        "ranking complete"
    );

    Ok(ranked)
}

/// Build the ranking prompt from candidate metadata.
pub fn build_prompt(candidates: &[PaperRecord], shortlist: usize) -> String {
    let pick = shortlist.min(candidates.len());

    let mut prompt = format!(
        "Below are {} research papers. Analyze them and select the {} most \
         interesting papers based on their potential impact, innovation, and \
         practical applications. Return only a JSON array containing the \
         numbers of the selected papers in order of preference. \
         Example format: [2, 7, 4]\n\n",
        candidates.len(),
        pick
    );

    for (i, paper) in candidates.iter().enumerate() {
        prompt.push_str(&format!(
            "Paper {}:\nTitle: {}\nAbstract: {}\n\n",
            i + 1,
            paper.title,
            paper.abstract_text
        ));
    }

    prompt
}

/// Parse the model's response into 1-based candidate positions.
///
/// Tries strict JSON first, then falls back to extracting digit runs from
/// free text. Out-of-range numbers are dropped with a warning, duplicates
/// keep their first occurrence, and the result is capped at `shortlist`.
pub fn parse_selection(raw: &str, candidate_count: usize, shortlist: usize) -> Result<Vec<usize>> {
    let trimmed = raw.trim();

    let numbers: Vec<i64> = match serde_json::from_str::<Vec<i64>>(trimmed) {
        Ok(parsed) => parsed,
        Err(_) => {
            let re = Regex::new(r"\d+").expect("static regex");
            let extracted: Vec<i64> = re
                .find_iter(trimmed)
                .filter_map(|m| m.as_str().parse().ok())
                .collect();
            if !extracted.is_empty() {
                warn!(response = %truncate_for_log(trimmed), "ranking response was not JSON, extracted digit runs");
            }
            extracted
        }
    };

    let mut selection: Vec<usize> = Vec::new();
    for number in numbers {
        if number < 1 || number as usize > candidate_count {
            warn!(number, candidate_count, "ranking referenced unknown paper, discarding");
            continue;
        }
        let index = number as usize;
        if !selection.contains(&index) {
            selection.push(index);
        }
    }

    if selection.is_empty() {
        return Err(DigestError::RankParse(format!(
            "no usable paper numbers in response: {}",
            truncate_for_log(trimmed)
        )));
    }

    selection.truncate(shortlist.min(candidate_count));
    Ok(selection)
}

/// Map 1-based positions back onto the candidate records.
fn apply_selection(candidates: &[PaperRecord], selection: &[usize]) -> Vec<PaperRecord> {
    selection
        .iter()
        .enumerate()
        .map(|(rank, &position)| {
            let mut record = candidates[position - 1].clone();
            record.rank_score = Some((rank + 1) as f32);
            record
        })
        .collect()
}

fn truncate_for_log(s: &str) -> String {
    const MAX: usize = 200;
    if s.len() <= MAX {
        return s.to_string();
    }
    let mut end = MAX;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
