//! Paper-card parsing for the listing page.
//!
//! The listing's DOM schema is owned by the external site and brittle by
//! nature. Cards that fail to parse are skipped with a warning; a page with
//! zero parseable cards is the caller's signal of schema drift.

use chrono::NaiveDate;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::warn;
use url::Url;

use paperdigest_shared::PaperRecord;

/// Date format used by the listing cards (e.g., "14 Mar 2025").
const CARD_DATE_FORMAT: &str = "%d %b %Y";

/// Parse all paper cards from a listing page.
///
/// Relative links are resolved against `base`. Cards missing a title link
/// are skipped. `fallback_date` is used when a card carries no date element.
pub fn parse_listing(html: &str, base: &Url, fallback_date: NaiveDate) -> Vec<PaperRecord> {
    let doc = Html::parse_document(html);
    let card_sel = selector("div.paper-card");

    let mut records = Vec::new();
    for card in doc.select(&card_sel) {
        match parse_card(&card, base, fallback_date) {
            Some(record) => records.push(record),
            None => {
                warn!("skipping malformed paper card (no title link)");
            }
        }
    }

    records
}

/// Parse a single paper card element.
fn parse_card(card: &ElementRef<'_>, base: &Url, fallback_date: NaiveDate) -> Option<PaperRecord> {
    let title_sel = selector("h1 a");
    let title_elem = card.select(&title_sel).next()?;
    let title = element_text(&title_elem);
    let href = title_elem.value().attr("href")?;
    let paper_url = base.join(href).ok()?;

    if title.is_empty() {
        return None;
    }

    let publication_date = select_text(card, "span.item-date-pub")
        .and_then(|text| NaiveDate::parse_from_str(text.trim(), CARD_DATE_FORMAT).ok())
        .unwrap_or(fallback_date);

    let mut record = PaperRecord::new(title, paper_url.to_string(), publication_date);

    if let Some(abstract_text) = select_text(card, "p.item-strip-abstract") {
        record.abstract_text = abstract_text;
    }

    let code_sel = selector("span.item-github-link a");
    record.code_link = card
        .select(&code_sel)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(|href| href.to_string());

    if let Some(stars_text) = select_text(card, "span.badge-secondary") {
        record.stars = extract_stars(&stars_text);
    }

    Some(record)
}

/// Pull the first digit run out of a star badge like "1,024" or " 37 stars".
fn extract_stars(text: &str) -> u32 {
    let re = Regex::new(r"\d+").expect("static regex");
    let cleaned = text.replace(',', "");
    re.find(&cleaned)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Text content of the first element matching `css` within `card`.
fn select_text(card: &ElementRef<'_>, css: &str) -> Option<String> {
    let sel = selector(css);
    card.select(&sel).next().map(|el| element_text(&el))
}

fn element_text(el: &ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}
