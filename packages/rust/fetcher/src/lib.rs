//! Source Fetcher: scrapes the paper listing into candidate [`PaperRecord`]s.
//!
//! The listing is paginated (`?page=N`). We collect cards until the target
//! count is reached, a page yields no cards, or the page cap is hit. A first
//! page with zero parseable cards means the site's layout drifted away from
//! our selectors; that aborts the run rather than silently producing an
//! empty digest.

mod parser;

use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use tracing::{debug, info, instrument, warn};
use url::Url;

use paperdigest_shared::{DigestError, PaperRecord, Result};

pub use parser::parse_listing;

/// User-Agent string for listing requests.
const USER_AGENT: &str = concat!("paperdigest/", env!("CARGO_PKG_VERSION"));

/// Per-request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of redirects to follow.
const MAX_REDIRECTS: usize = 3;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Configuration for a listing fetch.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Listing URL (without the page query parameter).
    pub listing_url: Url,
    /// Number of candidate papers to collect.
    pub target_count: usize,
    /// Maximum listing pages to visit.
    pub max_pages: u32,
    /// Delay in ms between page requests.
    pub request_delay_ms: u64,
}

// ---------------------------------------------------------------------------
// Fetching
// ---------------------------------------------------------------------------

/// Fetch candidate papers from the listing, paginating until `target_count`
/// records are collected or the listing runs out.
///
/// Fails with [`DigestError::Fetch`] when the listing is unreachable or the
/// first page yields no parseable cards (schema drift).
#[instrument(skip_all, fields(listing = %opts.listing_url, target = opts.target_count))]
pub async fn fetch_listing(opts: &FetchOptions) -> Result<Vec<PaperRecord>> {
    let client = build_client()?;
    let fallback_date = Utc::now().date_naive();

    let mut records: Vec<PaperRecord> = Vec::new();
    let mut page: u32 = 1;

    while records.len() < opts.target_count && page <= opts.max_pages {
        let page_records = match fetch_page(&client, &opts.listing_url, page).await {
            Ok(html) => parse_listing(&html, &opts.listing_url, fallback_date),
            Err(e) if page == 1 => return Err(e),
            Err(e) => {
                warn!(page, error = %e, "listing page fetch failed, stopping pagination");
                break;
            }
        };

        if page_records.is_empty() {
            if page == 1 {
                return Err(DigestError::fetch(format!(
                    "no paper cards found at {} — the listing layout may have changed",
                    opts.listing_url
                )));
            }
            debug!(page, "no cards on page, end of listing");
            break;
        }

        records.extend(page_records);
        info!(page, total = records.len(), "scraped listing page");
        page += 1;

        if opts.request_delay_ms > 0 && records.len() < opts.target_count {
            tokio::time::sleep(Duration::from_millis(opts.request_delay_ms)).await;
        }
    }

    records.truncate(opts.target_count);

    info!(count = records.len(), "listing fetch complete");
    Ok(records)
}

/// Fetch one listing page and return its HTML body.
async fn fetch_page(client: &Client, listing_url: &Url, page: u32) -> Result<String> {
    let mut page_url = listing_url.clone();
    page_url
        .query_pairs_mut()
        .append_pair("page", &page.to_string());

    let response = client
        .get(page_url.as_str())
        .send()
        .await
        .map_err(|e| DigestError::fetch(format!("{page_url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(DigestError::fetch(format!("{page_url}: HTTP {status}")));
    }

    response
        .text()
        .await
        .map_err(|e| DigestError::fetch(format!("{page_url}: failed to read body: {e}")))
}

/// Build a reqwest client with appropriate settings.
fn build_client() -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .map_err(|e| DigestError::fetch(format!("failed to build HTTP client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn load_fixture(name: &str) -> String {
        let path = format!("../../../fixtures/html/{name}");
        std::fs::read_to_string(&path).unwrap_or_else(|_| panic!("missing fixture: {path}"))
    }

    fn opts(server: &MockServer, target_count: usize) -> FetchOptions {
        FetchOptions {
            listing_url: Url::parse(&format!("{}/latest", server.uri())).unwrap(),
            target_count,
            max_pages: 5,
            request_delay_ms: 0,
        }
    }

    #[tokio::test]
    async fn fetches_and_paginates() {
        let server = MockServer::start().await;
        let listing = load_fixture("listing.html");
        let empty = load_fixture("listing-empty.html");

        Mock::given(method("GET"))
            .and(path("/latest"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(&listing))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/latest"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(&empty))
            .mount(&server)
            .await;

        let records = fetch_listing(&opts(&server, 100)).await.unwrap();

        // Page 1 has 4 parseable cards; page 2 is empty and stops pagination.
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].title, "Sparse Attention for Long Documents");
    }

    #[tokio::test]
    async fn target_count_caps_results() {
        let server = MockServer::start().await;
        let listing = load_fixture("listing.html");

        Mock::given(method("GET"))
            .and(path("/latest"))
            .respond_with(ResponseTemplate::new(200).set_body_string(&listing))
            .mount(&server)
            .await;

        let records = fetch_listing(&opts(&server, 2)).await.unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn schema_drift_on_first_page_is_fatal() {
        let server = MockServer::start().await;
        let empty = load_fixture("listing-empty.html");

        Mock::given(method("GET"))
            .and(path("/latest"))
            .respond_with(ResponseTemplate::new(200).set_body_string(&empty))
            .mount(&server)
            .await;

        let err = fetch_listing(&opts(&server, 100)).await.unwrap_err();
        assert!(matches!(err, DigestError::Fetch { .. }));
        assert!(err.to_string().contains("layout"));
    }

    #[tokio::test]
    async fn unreachable_listing_is_fatal() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/latest"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = fetch_listing(&opts(&server, 100)).await.unwrap_err();
        assert!(matches!(err, DigestError::Fetch { .. }));
    }

    #[tokio::test]
    async fn later_page_error_degrades_to_partial_set() {
        let server = MockServer::start().await;
        let listing = load_fixture("listing.html");

        Mock::given(method("GET"))
            .and(path("/latest"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(&listing))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/latest"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let records = fetch_listing(&opts(&server, 100)).await.unwrap();
        assert_eq!(records.len(), 4);
    }
}
