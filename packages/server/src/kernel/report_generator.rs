//! Static HTML report writer.
//!
//! Writes `<reports_path>/<report_id>/index.html` plus the raw
//! `reviews.json` and returns the public URL `<base_url>/r/<report_id>`.
//! Writing the same `report_id` twice overwrites the previous artifact.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

use super::{BaseReportGenerator, ReportRequest, Review};

/// Ratings at or above this count as positive
const POSITIVE_RATING: f32 = 4.0;

/// Headline numbers shown at the top of a report.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportStats {
    pub total_reviews: usize,
    pub countries_count: usize,
    pub avg_rating: f32,
    pub positive_pct: f32,
}

impl ReportStats {
    pub fn from_reviews(reviews: &[Review]) -> Self {
        let total_reviews = reviews.len();
        if total_reviews == 0 {
            return Self {
                total_reviews,
                countries_count: 0,
                avg_rating: 0.0,
                positive_pct: 0.0,
            };
        }

        let countries: HashSet<&str> = reviews.iter().filter_map(country_of).collect();
        let rating_sum: f32 = reviews.iter().map(|r| r.rating).sum();
        let positive = reviews
            .iter()
            .filter(|r| r.rating >= POSITIVE_RATING)
            .count();

        Self {
            total_reviews,
            countries_count: countries.len(),
            avg_rating: rating_sum / total_reviews as f32,
            positive_pct: positive as f32 * 100.0 / total_reviews as f32,
        }
    }
}

/// Country part of a "City, Country" location.
fn country_of(review: &Review) -> Option<&str> {
    review
        .location
        .as_deref()
        .and_then(|loc| loc.rsplit(',').next())
        .map(str::trim)
        .filter(|country| !country.is_empty())
}

pub struct HtmlReportGenerator {
    reports_path: PathBuf,
    base_url: String,
}

impl HtmlReportGenerator {
    pub fn new(reports_path: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            reports_path: reports_path.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn report_url(&self, report_id: &str) -> String {
        format!("{}/r/{}", self.base_url, report_id)
    }
}

#[async_trait]
impl BaseReportGenerator for HtmlReportGenerator {
    async fn generate(&self, request: &ReportRequest) -> Result<String> {
        let dir = self.reports_path.join(&request.report_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create report directory {}", dir.display()))?;

        let stats = ReportStats::from_reviews(&request.reviews);

        let reviews_json =
            serde_json::to_vec_pretty(&request.reviews).context("Failed to serialize reviews")?;
        tokio::fs::write(dir.join("reviews.json"), reviews_json)
            .await
            .context("Failed to write reviews.json")?;

        tokio::fs::write(dir.join("index.html"), render_html(request, &stats))
            .await
            .context("Failed to write index.html")?;

        info!(
            report_id = %request.report_id,
            total_reviews = stats.total_reviews,
            countries = stats.countries_count,
            "report written"
        );

        Ok(self.report_url(&request.report_id))
    }
}

pub(crate) fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn render_html(request: &ReportRequest, stats: &ReportStats) -> String {
    let mut by_country: BTreeMap<&str, (usize, f32)> = BTreeMap::new();
    for review in &request.reviews {
        let entry = by_country
            .entry(country_of(review).unwrap_or("Unknown"))
            .or_default();
        entry.0 += 1;
        entry.1 += review.rating;
    }

    let country_rows: String = by_country
        .iter()
        .map(|(country, (count, sum))| {
            format!(
                "<tr><td>{}</td><td>{}</td><td>{:.1}</td></tr>\n",
                escape(country),
                count,
                sum / *count as f32
            )
        })
        .collect();

    let review_items: String = request
        .reviews
        .iter()
        .map(|r| {
            format!(
                "<li><strong>{}</strong> ({}) {:.0}/5 {}<p>{}</p></li>\n",
                escape(&r.username),
                escape(r.location.as_deref().unwrap_or("Unknown")),
                r.rating,
                escape(r.date.as_deref().unwrap_or("")),
                escape(&r.text)
            )
        })
        .collect();

    let name = escape(&request.restaurant_name);
    format!(
        r#"<!DOCTYPE html>
<html lang="hr">
<head>
<meta charset="utf-8">
<title>ReviewIQ - {name}</title>
</head>
<body>
<h1>{name}</h1>
<p><a href="{url}">{url}</a></p>
<section class="stats">
<div>Total reviews: {total}</div>
<div>Countries: {countries}</div>
<div>Average rating: {avg:.1}</div>
<div>Positive: {positive:.0}%</div>
</section>
<h2>By country</h2>
<table>
<tr><th>Country</th><th>Reviews</th><th>Average</th></tr>
{country_rows}</table>
<h2>Reviews</h2>
<ul>
{review_items}</ul>
</body>
</html>
"#,
        url = escape(&request.restaurant_url),
        total = stats.total_reviews,
        countries = stats.countries_count,
        avg = stats.avg_rating,
        positive = stats.positive_pct,
    )
}
