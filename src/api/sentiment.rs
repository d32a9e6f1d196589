//! Market sentiment feeds: the Fear & Greed index and CryptoPanic headlines.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::types::{CryptoPanicResponse, FearGreedResponse};

const FEAR_GREED_URL: &str = "https://api.alternative.me/fng/?limit=1";
const CRYPTO_PANIC_URL: &str = "https://cryptopanic.com/api/v1/posts/";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Neutral Fear & Greed reading used when the feed is unavailable.
pub const NEUTRAL_FEAR_GREED: f64 = 0.5;

/// Neutral headline score used when CryptoPanic is unavailable.
pub const NEUTRAL_HEADLINES: f64 = 0.0;

/// Snapshot of both sentiment readings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SentimentReading {
    /// 0 = extreme fear, 1 = extreme greed
    pub fear_greed: f64,
    /// Mean headline sentiment in [-1, 1]
    pub headlines: f64,
}

impl Default for SentimentReading {
    fn default() -> Self {
        Self {
            fear_greed: NEUTRAL_FEAR_GREED,
            headlines: NEUTRAL_HEADLINES,
        }
    }
}

/// Fall back to a neutral score on any fault, logging the cause.
pub fn or_neutral(score: Result<f64>, neutral: f64, source: &str) -> f64 {
    match score {
        Ok(value) => value,
        Err(e) => {
            warn!(source, error = %e, neutral, "Sentiment unavailable, using neutral value");
            neutral
        }
    }
}

#[async_trait]
pub trait SentimentSource: Send + Sync {
    async fn fear_greed_score(&self) -> Result<f64>;

    async fn headline_score(&self) -> Result<f64>;

    /// Both readings with the neutral-on-fault policy applied.
    async fn reading(&self) -> SentimentReading {
        SentimentReading {
            fear_greed: or_neutral(self.fear_greed_score().await, NEUTRAL_FEAR_GREED, "fear_greed"),
            headlines: or_neutral(self.headline_score().await, NEUTRAL_HEADLINES, "crypto_panic"),
        }
    }
}

/// HTTP client for the public sentiment endpoints.
pub struct SentimentClient {
    client: Client,
    fear_greed_url: String,
    crypto_panic_url: String,
    crypto_panic_token: Option<String>,
    headline_limit: u32,
}

impl SentimentClient {
    pub fn new(crypto_panic_token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            fear_greed_url: FEAR_GREED_URL.to_string(),
            crypto_panic_url: CRYPTO_PANIC_URL.to_string(),
            crypto_panic_token,
            headline_limit: 20,
        })
    }

    /// Reads `CRYPTOPANIC_TOKEN`; headlines stay neutral without it.
    pub fn from_env() -> Result<Self> {
        let token = std::env::var("CRYPTOPANIC_TOKEN").ok().filter(|t| !t.trim().is_empty());
        Self::new(token)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> Result<T> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", url))?;

        if !response.status().is_success() {
            let status = response.status();
            anyhow::bail!("Sentiment request failed: {}", status);
        }

        response.json().await.context("Failed to parse sentiment response")
    }
}

#[async_trait]
impl SentimentSource for SentimentClient {
    async fn fear_greed_score(&self) -> Result<f64> {
        let resp: FearGreedResponse = self.get_json(&self.fear_greed_url, &[]).await?;
        let score = fear_greed_from_response(&resp)?;
        debug!(score, "Fear & Greed index");
        Ok(score)
    }

    async fn headline_score(&self) -> Result<f64> {
        let token = self
            .crypto_panic_token
            .as_deref()
            .context("CRYPTOPANIC_TOKEN not set")?;
        let query = [
            ("auth_token", token.to_string()),
            ("public", "true".to_string()),
            ("kind", "news".to_string()),
            ("limit", self.headline_limit.to_string()),
        ];
        let resp: CryptoPanicResponse = self.get_json(&self.crypto_panic_url, &query).await?;
        Ok(headline_score_from_response(&resp))
    }
}

/// Index value / 100. An empty payload reads neutral.
pub fn fear_greed_from_response(resp: &FearGreedResponse) -> Result<f64> {
    let Some(entry) = resp.data.first() else {
        return Ok(NEUTRAL_FEAR_GREED);
    };
    let value: f64 = entry
        .value
        .trim()
        .parse()
        .with_context(|| format!("Invalid Fear & Greed value {:?}", entry.value))?;
    Ok((value / 100.0).clamp(0.0, 1.0))
}

/// +1 per positive post, -1 per negative, averaged over all posts.
pub fn headline_score_from_response(resp: &CryptoPanicResponse) -> f64 {
    if resp.results.is_empty() {
        return NEUTRAL_HEADLINES;
    }
    let total: f64 = resp
        .results
        .iter()
        .map(|post| match post.sentiment.as_ref().map(|s| s.kind.as_str()) {
            Some("positive") => 1.0,
            Some("negative") => -1.0,
            _ => 0.0,
        })
        .sum();
    total / resp.results.len() as f64
}
