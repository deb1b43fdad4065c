//! News headlines fetcher.
//!
//! Wraps the newsapi.org "everything" endpoint. The free tier is capped at
//! 100 requests per day; the upstream reports exhaustion through an error
//! envelope, which surfaces here as [`NewsError::RateLimited`] so the
//! scheduler can back off.

use crate::model::Article;
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::fmt;
use thiserror::Error;
use tracing::debug;

const NEWS_API_BASE: &str = "https://newsapi.org/";

#[derive(Debug, Error)]
pub enum NewsError {
    #[error("news API key is not configured")]
    MissingApiKey,
    #[error("news API rate limit exhausted")]
    RateLimited,
    #[error("news API error {code}: {message}")]
    Upstream { code: String, message: String },
    #[error("news API transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

#[async_trait]
pub trait NewsApi: Send + Sync {
    /// Articles matching `terms`, most recently published first.
    async fn everything(&self, terms: &str, api_key: &str) -> Result<Vec<Article>, NewsError>;
}

#[derive(Clone)]
pub struct NewsClient {
    http: Client,
    base_url: Url,
}

impl fmt::Debug for NewsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewsClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl Default for NewsClient {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    status: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    articles: Vec<RawArticle>,
}

#[derive(Debug, Deserialize)]
struct RawArticle {
    title: Option<String>,
    url: Option<String>,
}

impl NewsClient {
    pub fn new() -> Self {
        let base_url = Url::parse(NEWS_API_BASE).expect("valid default news API URL");
        Self::with_base_url(base_url)
    }

    pub fn with_base_url(base_url: Url) -> Self {
        let http = Client::builder()
            .user_agent("coviddash/0.1")
            .build()
            .expect("reqwest client");
        Self { http, base_url }
    }
}

#[async_trait]
impl NewsApi for NewsClient {
    async fn everything(&self, terms: &str, api_key: &str) -> Result<Vec<Article>, NewsError> {
        let endpoint = self
            .base_url
            .join("v2/everything")
            .expect("valid news API endpoint");
        let request = self
            .http
            .get(endpoint)
            .query(&[
                ("q", terms),
                ("sortBy", "publishedAt"),
                ("apiKey", api_key),
            ])
            .build()?;
        debug!(url = %request.url(), "sending news API request");

        let envelope: Envelope = self.http.execute(request).await?.json().await?;
        if envelope.status == "error" {
            let code = envelope.code.unwrap_or_default();
            if code == "rateLimited" {
                return Err(NewsError::RateLimited);
            }
            return Err(NewsError::Upstream {
                code,
                message: envelope.message.unwrap_or_default(),
            });
        }

        let articles = envelope
            .articles
            .into_iter()
            .filter_map(|a| {
                Some(Article {
                    title: a.title?,
                    url: a.url?,
                })
            })
            .collect();
        Ok(articles)
    }
}

/// Drop articles whose URL is blacklisted.
pub fn filter_blacklisted(articles: Vec<Article>, blacklist: &[String]) -> Vec<Article> {
    articles
        .into_iter()
        .filter(|a| !blacklist.iter().any(|b| *b == a.url))
        .collect()
}

/// Query for headlines and apply the blacklist. An empty API key never goes
/// upstream.
pub async fn fetch_news(
    api: &dyn NewsApi,
    terms: &str,
    api_key: &str,
    blacklist: &[String],
) -> Result<Vec<Article>, NewsError> {
    if api_key.trim().is_empty() {
        return Err(NewsError::MissingApiKey);
    }
    let articles = api.everything(terms, api_key).await?;
    Ok(filter_blacklisted(articles, blacklist))
}
