use crate::errors::NewsFetchFailed;
use crate::models::NewsItem;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

#[async_trait]
pub trait NewsSource: Send + Sync {
    async fn fetch_headlines(&self, ticker: &str, limit: usize) -> Result<Vec<NewsItem>, NewsFetchFailed>;
}

/// Headlines for one ticker, plus the reason they are missing when the lookup failed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewsOutcome {
    pub items: Vec<NewsItem>,
    pub failure: Option<NewsFetchFailed>,
}

impl NewsOutcome {
    /// Text shown in place of headlines, if any.
    pub fn note(&self) -> Option<String> {
        match (&self.failure, self.items.is_empty()) {
            (Some(err), _) => Some(err.to_string()),
            (None, true) => Some("No recent news found.".to_string()),
            (None, false) => None,
        }
    }
}

/// Looks up headlines and folds any failure into the outcome instead of returning it.
pub async fn fetch_news_or_note(source: &dyn NewsSource, ticker: &str, limit: usize) -> NewsOutcome {
    match source.fetch_headlines(ticker, limit).await {
        Ok(items) => NewsOutcome { items, failure: None },
        Err(err) => {
            warn!(ticker, error = %err, "news lookup degraded to empty list");
            NewsOutcome {
                items: Vec::new(),
                failure: Some(err),
            }
        }
    }
}

// --- Search response ---

#[derive(Deserialize, Debug, Default)]
struct SearchResponse {
    // Left untyped: a `news` value that is not an array counts as no news.
    #[serde(default)]
    news: Option<Value>,
}

/// Keeps entries carrying string `title` and `link`; anything else is skipped.
fn headlines_from_body(body: &[u8], limit: usize) -> Result<Vec<NewsItem>, NewsFetchFailed> {
    let parsed: SearchResponse =
        serde_json::from_slice(body).map_err(|e| NewsFetchFailed::Malformed(e.to_string()))?;

    let articles = parsed.news.as_ref().and_then(Value::as_array);
    Ok(articles
        .into_iter()
        .flatten()
        .filter_map(|article| {
            let title = article.get("title")?.as_str()?;
            let link = article.get("link")?.as_str()?;
            Some(NewsItem {
                title: title.to_string(),
                link: link.to_string(),
            })
        })
        .take(limit)
        .collect())
}

pub struct YahooNewsSearch {
    client: Client,
    search_url: String,
}

impl YahooNewsSearch {
    pub fn new(client: Client, search_url: impl Into<String>) -> Self {
        Self {
            client,
            search_url: search_url.into(),
        }
    }
}

#[async_trait]
impl NewsSource for YahooNewsSearch {
    async fn fetch_headlines(&self, ticker: &str, limit: usize) -> Result<Vec<NewsItem>, NewsFetchFailed> {
        let response = self
            .client
            .get(&self.search_url)
            .query(&[("q", ticker)])
            .send()
            .await
            .map_err(|e| NewsFetchFailed::Transport(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(NewsFetchFailed::Status(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| NewsFetchFailed::Transport(e.to_string()))?;
        headlines_from_body(&body, limit)
    }
}
