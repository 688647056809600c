use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::report_generator::escape;
use super::{BaseNotifier, ReportEmail};

const RESEND_API_URL: &str = "https://api.resend.com/emails";

/// Resend API client for report emails
pub struct ResendNotifier {
    api_key: String,
    from: String,
    client: reqwest::Client,
}

/// Resend API request
#[derive(Debug, Serialize)]
struct ResendRequest<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: String,
    html: String,
    text: String,
}

/// Resend API response
#[derive(Debug, Deserialize)]
struct ResendResponse {
    id: String,
}

impl ResendNotifier {
    /// Create a new Resend client
    pub fn new(api_key: String, from: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            from,
            client,
        })
    }
}

fn subject(email: &ReportEmail) -> String {
    format!(
        "Vaš ReviewIQ izvještaj za {} je spreman!",
        email.restaurant_name
    )
}

fn text_body(email: &ReportEmail) -> String {
    format!(
        "ReviewIQ - Vaš izvještaj je spreman!\n\n\
         Vaša analiza recenzija za {} je završena.\n\n\
         Pogledaj izvještaj: {}\n\n\
         Link vrijedi do {}.\n\n\
         --\nReviewIQ\ninfo@reviewiq.hr\n",
        email.restaurant_name,
        email.report_url,
        email.expires_at.format("%d.%m.%Y."),
    )
}

fn html_body(email: &ReportEmail) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: 'Segoe UI', Arial, sans-serif;">
<h1>Review<span style="color: #10b981;">IQ</span></h1>
<p>Vaša analiza recenzija za <strong>{name}</strong> je završena.</p>
<p><a href="{url}">Pogledaj izvještaj</a></p>
<p style="color: #b45309;">Link vrijedi do {expires}.</p>
<p style="color: #6b7280;">Imate pitanja? Javite nam se na info@reviewiq.hr</p>
</body>
</html>
"#,
        name = escape(&email.restaurant_name),
        url = escape(&email.report_url),
        expires = email.expires_at.format("%d.%m.%Y."),
    )
}

#[async_trait]
impl BaseNotifier for ResendNotifier {
    async fn send(&self, email: &ReportEmail, dedup_key: &str) -> Result<()> {
        let request = ResendRequest {
            from: &self.from,
            to: vec![email.to.as_str()],
            subject: subject(email),
            html: html_body(email),
            text: text_body(email),
        };

        let response = self
            .client
            .post(RESEND_API_URL)
            .bearer_auth(&self.api_key)
            .header("Idempotency-Key", dedup_key)
            .json(&request)
            .send()
            .await
            .context("Failed to send Resend request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Resend API error {}: {}", status, body);
        }

        let sent: ResendResponse = response
            .json()
            .await
            .context("Failed to parse Resend response")?;

        info!(email_id = %sent.id, dedup_key, "report email sent");
        Ok(())
    }
}

/// Notifier that only logs, for local runs without an API key
pub struct LogNotifier;

#[async_trait]
impl BaseNotifier for LogNotifier {
    async fn send(&self, email: &ReportEmail, dedup_key: &str) -> Result<()> {
        debug!(
            to = %email.to,
            report_url = %email.report_url,
            dedup_key,
            "email delivery disabled, skipping"
        );
        Ok(())
    }
}
