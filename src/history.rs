use crate::errors::ProviderError;
use crate::models::{Observation, Period, Series};
use async_trait::async_trait;
use chrono::DateTime;
use reqwest::{Client, StatusCode};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt;
use tracing::{debug, warn};

/// Source of daily OHLCV history.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Returns the date-ordered daily observations for `ticker` over `period`.
    /// An unknown ticker yields an empty series rather than an error.
    async fn fetch_history(&self, ticker: &str, period: Period) -> Result<Series, ProviderError>;
}

// --- Response Structures & Lenient Deserialization ---

#[derive(Deserialize, Debug)]
struct ChartEnvelope {
    chart: ChartBody,
}

#[derive(Deserialize, Debug)]
struct ChartBody {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Deserialize, Debug)]
struct ChartError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize, Debug)]
struct ChartResult {
    #[serde(default)]
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: ChartIndicators,
}

#[derive(Deserialize, Debug, Default)]
struct ChartMeta {
    #[serde(default)]
    gmtoffset: i64,
}

#[derive(Deserialize, Debug)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<QuoteColumns>,
}

#[derive(Deserialize, Debug, Default)]
struct QuoteColumns {
    #[serde(default, deserialize_with = "deserialize_f64_column")]
    open: Vec<Option<f64>>,
    #[serde(default, deserialize_with = "deserialize_f64_column")]
    high: Vec<Option<f64>>,
    #[serde(default, deserialize_with = "deserialize_f64_column")]
    low: Vec<Option<f64>>,
    #[serde(default, deserialize_with = "deserialize_f64_column")]
    close: Vec<Option<f64>>,
    #[serde(default, deserialize_with = "deserialize_f64_column")]
    volume: Vec<Option<f64>>,
}

struct LenientF64Visitor;

impl<'de> Visitor<'de> for LenientF64Visitor {
    type Value = Option<f64>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a float, an integer, a numeric string or null")
    }

    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
        Ok(v.is_finite().then_some(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
        Ok(Some(v as f64))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
        Ok(Some(v as f64))
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        if v.trim().is_empty() {
            Ok(None)
        } else {
            v.trim().parse::<f64>().map(Some).map_err(E::custom)
        }
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_none<E>(self) -> Result<Self::Value, E> {
        Ok(None)
    }
}

struct LenientF64(Option<f64>);

impl<'de> Deserialize<'de> for LenientF64 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(LenientF64Visitor).map(LenientF64)
    }
}

fn deserialize_f64_column<'de, D>(deserializer: D) -> Result<Vec<Option<f64>>, D::Error>
where
    D: Deserializer<'de>,
{
    let cells: Option<Vec<LenientF64>> = Option::deserialize(deserializer)?;
    Ok(cells.unwrap_or_default().into_iter().map(|c| c.0).collect())
}

// --- Conversion ---

fn cell(col: &[Option<f64>], i: usize) -> Option<f64> {
    col.get(i).copied().flatten()
}

/// Zips the column arrays into observations, dropping rows with any gap.
fn observations_from_chart(result: ChartResult) -> Vec<Observation> {
    let quote = result.indicators.quote.into_iter().next().unwrap_or_default();
    let offset = result.meta.gmtoffset;

    result
        .timestamp
        .iter()
        .enumerate()
        .filter_map(|(i, &ts)| {
            let date = DateTime::from_timestamp(ts + offset, 0)?.date_naive();
            Some(Observation {
                date,
                open: cell(&quote.open, i)?,
                high: cell(&quote.high, i)?,
                low: cell(&quote.low, i)?,
                close: cell(&quote.close, i)?,
                volume: cell(&quote.volume, i)?.max(0.0) as u64,
            })
        })
        .collect()
}

fn parse_chart(ticker: &str, body: &[u8]) -> Result<Series, ProviderError> {
    let envelope: ChartEnvelope =
        serde_json::from_slice(body).map_err(|e| ProviderError::Malformed(e.to_string()))?;

    if let Some(err) = envelope.chart.error {
        if err.code.eq_ignore_ascii_case("Not Found") {
            return Ok(Series::new(ticker, Vec::new()));
        }
        return Err(ProviderError::Api {
            status: StatusCode::OK.as_u16(),
            message: format!("{}: {}", err.code, err.description),
        });
    }

    let observations = envelope
        .chart
        .result
        .and_then(|results| results.into_iter().next())
        .map(observations_from_chart)
        .unwrap_or_default();

    Ok(Series::new(ticker, observations))
}

// --- Provider ---

pub struct YahooChartProvider {
    client: Client,
    chart_url: String,
}

impl YahooChartProvider {
    pub fn new(client: Client, chart_url: impl Into<String>) -> Self {
        Self {
            client,
            chart_url: chart_url.into(),
        }
    }
}

#[async_trait]
impl MarketDataProvider for YahooChartProvider {
    async fn fetch_history(&self, ticker: &str, period: Period) -> Result<Series, ProviderError> {
        let url = format!("{}/{}", self.chart_url.trim_end_matches('/'), ticker);
        let query = [("range", period.as_str()), ("interval", "1d")];

        let response = self.client.get(&url).query(&query).send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            warn!(ticker, "chart endpoint does not know this symbol");
            return Ok(Series::new(ticker, Vec::new()));
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown API error".to_string());
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.bytes().await?;
        let series = parse_chart(ticker, &body)?;
        debug!(ticker, %period, rows = series.len(), "history fetched");
        Ok(series)
    }
}
