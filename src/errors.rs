use thiserror::Error;

/// Failures raised by a [`MarketDataProvider`](crate::history::MarketDataProvider).
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network failure, timeout or an undecodable transport payload.
    #[error("market data request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The provider answered with a non-success status or an explicit error body.
    #[error("market data provider error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The body decoded but did not have the expected chart layout.
    #[error("malformed market data response: {0}")]
    Malformed(String),
}

/// Reasons a headline lookup degraded to an empty list.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum NewsFetchFailed {
    #[error("Unable to fetch news at this time. (HTTP {0})")]
    Status(u16),

    #[error("Error fetching news: {0}")]
    Transport(String),

    #[error("Error fetching news: unreadable response ({0})")]
    Malformed(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndicatorError {
    #[error("invalid indicator window: {0}")]
    InvalidWindow(usize),
}

/// Errors surfaced by the per-ticker analytics pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The provider returned no observations; the ticker is skipped.
    #[error("No data found for {0}")]
    NoDataAvailable(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Indicator(#[from] IndicatorError),
}
