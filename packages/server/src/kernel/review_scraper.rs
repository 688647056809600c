//! HTTP review scraper for TripAdvisor restaurant pages.
//!
//! - Uses reqwest for HTTP requests
//! - Uses scraper crate for HTML parsing
//! - Follows the "next" pagination link until the review cap is reached
//!
//! Limitations:
//! - No JavaScript rendering; review text hidden behind "Read more" is truncated

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::StatusCode;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info};
use url::Url;

use super::{BaseReviewScraper, Review, ScrapeError, ScrapeOutput, ScrapeRequest};

lazy_static! {
    static ref RATING_RE: Regex = Regex::new(r"(\d+\.?\d*)\s*of\s*5").expect("valid regex");
    static ref DATE_RE: Regex = Regex::new(r"(\w+\s+\d{4})").expect("valid regex");
}

/// Review cards, newest layout first
const CARD_SELECTORS: [&str; 2] = ["div[data-automation='reviewCard']", "div.reviewSelector"];
const RATING_SELECTOR: &str = "svg.UctUV[aria-label]";
const USERNAME_SELECTOR: &str = "a.BMQDV._F.G-.wSSLS.SwZTJ.FGwzt";
const TEXT_SELECTOR: &str = "div.biGQs._P.pZUbB.KxBGd";
/// Shared by the date line and the "location / contributions" line
const META_SELECTOR: &str = "div.biGQs._P.pZUbB.osNWb";
const NEXT_PAGE_SELECTOR: &str = "a.ui_button.nav.next.primary";

/// Reviews and pagination extracted from one page.
#[derive(Debug, Default)]
pub struct ParsedPage {
    pub reviews: Vec<Review>,
    pub next_page: Option<Url>,
}

pub struct HttpReviewScraper {
    client: reqwest::Client,
    /// Pause between page fetches
    page_delay: Duration,
}

impl HttpReviewScraper {
    pub fn new() -> Result<Self> {
        // Use a browser-like User-Agent to avoid bot detection
        let user_agent = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            reqwest::header::HeaderValue::from_static("en-US,en;q=0.5"),
        );

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(user_agent)
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            page_delay: Duration::from_secs(1),
        })
    }

    pub fn with_page_delay(mut self, page_delay: Duration) -> Self {
        self.page_delay = page_delay;
        self
    }

    async fn fetch_html(&self, url: &Url) -> Result<String, ScrapeError> {
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| ScrapeError::Network(e.to_string()))?;

        classify_status(response.status())?;

        response
            .text()
            .await
            .map_err(|e| ScrapeError::Network(e.to_string()))
    }
}

/// Map a non-success HTTP status to a scrape error.
pub fn classify_status(status: StatusCode) -> Result<(), ScrapeError> {
    if status.is_success() {
        return Ok(());
    }
    Err(match status {
        StatusCode::TOO_MANY_REQUESTS => ScrapeError::RateLimited,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ScrapeError::AccessDenied(status.as_u16())
        }
        s if s.is_server_error() => ScrapeError::Upstream(s.as_u16()),
        s => ScrapeError::InvalidTarget(format!("HTTP {s}")),
    })
}

#[async_trait]
impl BaseReviewScraper for HttpReviewScraper {
    async fn scrape(&self, request: &ScrapeRequest) -> Result<ScrapeOutput, ScrapeError> {
        let mut url = Url::parse(&request.url)
            .map_err(|e| ScrapeError::InvalidTarget(format!("{}: {e}", request.url)))?;
        let mut output = ScrapeOutput::default();

        loop {
            let html = self.fetch_html(&url).await?;
            let page = parse_page(&html, &url);
            output.pages_fetched += 1;

            debug!(url = %url, reviews = page.reviews.len(), "fetched review page");

            if page.reviews.is_empty() {
                if output.pages_fetched == 1 {
                    return Err(ScrapeError::Parse(format!("no review cards found at {url}")));
                }
                break;
            }

            let remaining = request.max_reviews.saturating_sub(output.reviews.len());
            output.reviews.extend(page.reviews.into_iter().take(remaining));

            match page.next_page {
                Some(next) if output.reviews.len() < request.max_reviews => {
                    url = next;
                    tokio::time::sleep(self.page_delay).await;
                }
                _ => break,
            }
        }

        info!(
            url = %request.url,
            reviews = output.reviews.len(),
            pages = output.pages_fetched,
            "scrape finished"
        );
        Ok(output)
    }
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Extract reviews and the next-page link from a review page.
///
/// Cards without a rating are skipped.
pub fn parse_page(html: &str, page_url: &Url) -> ParsedPage {
    let document = Html::parse_document(html);

    let reviews = CARD_SELECTORS
        .iter()
        .filter_map(|css| selector(css))
        .map(|card| {
            document
                .select(&card)
                .filter_map(parse_card)
                .collect::<Vec<_>>()
        })
        .find(|reviews| !reviews.is_empty())
        .unwrap_or_default();

    let next_page = selector(NEXT_PAGE_SELECTOR)
        .and_then(|next| document.select(&next).next())
        .filter(|link| !link.value().classes().any(|c| c == "disabled"))
        .and_then(|link| link.value().attr("href"))
        .and_then(|href| page_url.join(href).ok());

    ParsedPage { reviews, next_page }
}

fn parse_card(card: ElementRef<'_>) -> Option<Review> {
    let rating = extract_rating(card)?;

    let username = selector(USERNAME_SELECTOR)
        .and_then(|s| card.select(&s).next())
        .map(element_text)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "Anonymous".to_string());

    let text = selector(TEXT_SELECTOR)
        .and_then(|s| card.select(&s).next())
        .map(element_text)
        .unwrap_or_default();

    let meta: Vec<ElementRef<'_>> = selector(META_SELECTOR)
        .map(|s| card.select(&s).collect())
        .unwrap_or_default();

    Some(Review {
        username,
        location: extract_location(&meta),
        rating,
        date: extract_date(&meta),
        text,
    })
}

fn extract_rating(card: ElementRef<'_>) -> Option<f32> {
    let bubble = card.select(&selector(RATING_SELECTOR)?).next()?;
    let label = bubble.value().attr("aria-label")?;
    RATING_RE.captures(label)?.get(1)?.as_str().parse().ok()
}

fn extract_date(meta: &[ElementRef<'_>]) -> Option<String> {
    meta.iter()
        .map(|el| element_text(*el))
        .find(|text| text.to_lowercase().contains("wrote a review"))
        .and_then(|text| DATE_RE.captures(&text)?.get(1).map(|m| m.as_str().to_string()))
}

fn extract_location(meta: &[ElementRef<'_>]) -> Option<String> {
    let contributions = meta
        .iter()
        .find(|el| element_text(**el).to_lowercase().contains(" contribution"))?;

    contributions
        .text()
        .map(str::trim)
        .find(|piece| piece.len() > 2 && !piece.to_lowercase().contains("contribution"))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <div data-automation="reviewCard">
            <a class="BMQDV _F G- wSSLS SwZTJ FGwzt" href="/Profile/ana">Ana K</a>
            <div class="biGQs _P pZUbB osNWb"><span>Zagreb, Croatia</span><span>12 contributions</span></div>
            <svg class="UctUV" aria-label="5.0 of 5 bubbles"></svg>
            <div class="biGQs _P pZUbB ncFvv osNWb">Ana K wrote a review June 2024</div>
            <div class="biGQs _P pZUbB KxBGd">Great fish, friendly staff.</div>
          </div>
          <div data-automation="reviewCard">
            <svg class="UctUV" aria-label="2 of 5 bubbles"></svg>
            <div class="biGQs _P pZUbB KxBGd">Too slow.</div>
          </div>
          <div data-automation="reviewCard">
            <div class="biGQs _P pZUbB KxBGd">No rating, skipped.</div>
          </div>
          <a class="ui_button nav next primary" href="/Restaurant_Review-g1-d2-Reviews-or15-Nautika.html">Next</a>
        </body></html>
    "#;

    fn page_url() -> Url {
        Url::parse("https://www.tripadvisor.com/Restaurant_Review-g1-d2-Reviews-Nautika.html")
            .unwrap()
    }

    #[test]
    fn parses_review_cards() {
        let page = parse_page(PAGE, &page_url());
        assert_eq!(page.reviews.len(), 2);

        let first = &page.reviews[0];
        assert_eq!(first.username, "Ana K");
        assert_eq!(first.location.as_deref(), Some("Zagreb, Croatia"));
        assert_eq!(first.rating, 5.0);
        assert_eq!(first.date.as_deref(), Some("June 2024"));
        assert_eq!(first.text, "Great fish, friendly staff.");

        let second = &page.reviews[1];
        assert_eq!(second.username, "Anonymous");
        assert_eq!(second.location, None);
        assert_eq!(second.rating, 2.0);
    }

    #[test]
    fn resolves_next_page_link() {
        let page = parse_page(PAGE, &page_url());
        assert_eq!(
            page.next_page.unwrap().as_str(),
            "https://www.tripadvisor.com/Restaurant_Review-g1-d2-Reviews-or15-Nautika.html"
        );
    }

    #[test]
    fn disabled_next_link_ends_pagination() {
        let html = r#"<div class="reviewSelector"><svg class="UctUV" aria-label="4 of 5"></svg></div>
            <a class="ui_button nav next primary disabled" href="/next">Next</a>"#;
        let page = parse_page(html, &page_url());
        assert_eq!(page.reviews.len(), 1);
        assert!(page.next_page.is_none());
    }

    #[test]
    fn page_without_cards_is_empty() {
        let page = parse_page("<html><body><p>captcha</p></body></html>", &page_url());
        assert!(page.reviews.is_empty());
        assert!(page.next_page.is_none());
    }

    #[test]
    fn status_classification() {
        assert!(classify_status(StatusCode::OK).is_ok());
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            Err(ScrapeError::RateLimited)
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN),
            Err(ScrapeError::AccessDenied(403))
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY),
            Err(ScrapeError::Upstream(502))
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND),
            Err(ScrapeError::InvalidTarget(_))
        ));
    }
}
