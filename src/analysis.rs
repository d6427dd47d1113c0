//! This module contains the core analysis pipeline logic.

use crate::combined::CombinedTable;
use crate::errors::PipelineError;
use crate::history::{MarketDataProvider, YahooChartProvider};
use crate::indicators::{DerivedMetrics, detect_crossovers};
use crate::models::{CrossSignal, Period, Series};
use crate::news::{NewsOutcome, NewsSource, YahooNewsSearch, fetch_news_or_note};
use crate::storage_utils::AppConfig;
use anyhow::Result;
use reqwest::Client;
use tracing::{info, warn};

/// Headline numbers for the most recent trading day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub last_close: f64,
    pub previous_close: f64,
    pub pct_change: f64,
    pub latest_volume: u64,
}

impl Snapshot {
    /// `None` only for an empty series. With a single observation the
    /// previous close falls back to the last close.
    pub fn from_series(series: &Series) -> Option<Self> {
        let last = series.last()?;
        let previous_close = series
            .len()
            .checked_sub(2)
            .map_or(last.close, |i| series.observations()[i].close);

        Some(Self {
            last_close: last.close,
            previous_close,
            pct_change: pct_change(last.close, previous_close),
            latest_volume: last.volume,
        })
    }
}

/// Percent change from `previous` to `last`; 0 when `previous` is exactly 0.
pub fn pct_change(last: f64, previous: f64) -> f64 {
    if previous == 0.0 {
        0.0
    } else {
        (last - previous) / previous * 100.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Analytics {
    pub snapshot: Snapshot,
    pub metrics: DerivedMetrics,
    pub signals: Vec<CrossSignal>,
}

/// Pure part of the pipeline: everything derived from one fetched series.
pub fn analyze_series(series: &Series) -> Result<Analytics, PipelineError> {
    let snapshot = Snapshot::from_series(series)
        .ok_or_else(|| PipelineError::NoDataAvailable(series.ticker.clone()))?;

    let metrics = DerivedMetrics::compute(&series.closes())?;
    let obs = series.observations();
    let signals = detect_crossovers(&metrics.ma20, &metrics.ma50)
        .into_iter()
        .map(|index| CrossSignal {
            index,
            date: obs[index].date,
            close: obs[index].close,
        })
        .collect();

    Ok(Analytics {
        snapshot,
        metrics,
        signals,
    })
}

#[derive(Debug, Clone)]
pub struct TickerReport {
    pub ticker: String,
    pub period: Period,
    pub series: Series,
    pub analytics: Analytics,
    pub news: NewsOutcome,
}

#[derive(Debug, Clone)]
pub enum TickerSection {
    Ready(Box<TickerReport>),
    /// The provider had no observations; shown as a warning only.
    Missing { ticker: String },
}

impl TickerSection {
    pub fn ticker(&self) -> &str {
        match self {
            TickerSection::Ready(report) => &report.ticker,
            TickerSection::Missing { ticker } => ticker,
        }
    }
}

/// What the user picked: tickers in selection order and one lookback period.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub tickers: Vec<String>,
    pub period: Period,
}

#[derive(Debug, Clone)]
pub struct DashboardRun {
    pub period: Period,
    pub sections: Vec<TickerSection>,
    pub combined: CombinedTable,
}

impl DashboardRun {
    pub fn warnings(&self) -> Vec<String> {
        self.sections
            .iter()
            .filter_map(|s| match s {
                TickerSection::Missing { ticker } => Some(format!("No data found for {}", ticker)),
                TickerSection::Ready(_) => None,
            })
            .collect()
    }
}

pub struct Pipeline {
    history: Box<dyn MarketDataProvider>,
    news: Box<dyn NewsSource>,
    news_limit: usize,
}

impl Pipeline {
    pub fn new(history: Box<dyn MarketDataProvider>, news: Box<dyn NewsSource>, news_limit: usize) -> Self {
        Self {
            history,
            news,
            news_limit,
        }
    }

    /// Wires the Yahoo chart and search endpoints from `config`.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.market.user_agent.clone())
            .build()?;

        Ok(Self::new(
            Box::new(YahooChartProvider::new(client.clone(), config.market.chart_url.clone())),
            Box::new(YahooNewsSearch::new(client, config.market.news_url.clone())),
            config.market.news_limit,
        ))
    }

    /// Runs history, indicators, signal detection and the news lookup for one ticker.
    pub async fn analyze_ticker(&self, ticker: &str, period: Period) -> Result<TickerReport, PipelineError> {
        let series = self.history.fetch_history(ticker, period).await?;
        let analytics = analyze_series(&series)?;
        info!(
            ticker,
            %period,
            rows = series.len(),
            signals = analytics.signals.len(),
            "ticker analyzed"
        );

        let news = fetch_news_or_note(self.news.as_ref(), ticker, self.news_limit).await;

        Ok(TickerReport {
            ticker: ticker.to_string(),
            period,
            series,
            analytics,
            news,
        })
    }

    /// Analyzes every selected ticker in order. Tickers without data become
    /// `Missing` sections and stay out of the combined table; any other
    /// failure aborts the run.
    pub async fn run_dashboard(&self, selection: &Selection) -> Result<DashboardRun, PipelineError> {
        let mut sections = Vec::with_capacity(selection.tickers.len());
        let mut combined = CombinedTable::new();

        for ticker in &selection.tickers {
            match self.analyze_ticker(ticker, selection.period).await {
                Ok(report) => {
                    combined.add_series(&report.series);
                    sections.push(TickerSection::Ready(Box::new(report)));
                }
                Err(PipelineError::NoDataAvailable(ticker)) => {
                    warn!(%ticker, "no data available, skipping");
                    sections.push(TickerSection::Missing { ticker });
                }
                Err(e) => return Err(e),
            }
        }

        Ok(DashboardRun {
            period: selection.period,
            sections,
            combined,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{NewsFetchFailed, ProviderError};
    use crate::models::{NewsItem, Observation};
    use async_trait::async_trait;
    use chrono::{Duration, NaiveDate};
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct StubHistory {
        closes: HashMap<String, Vec<f64>>,
        calls: Mutex<Vec<String>>,
    }

    impl StubHistory {
        fn new(entries: &[(&str, Vec<f64>)]) -> Self {
            Self {
                closes: entries.iter().map(|(t, c)| (t.to_string(), c.clone())).collect(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    fn make_series(ticker: &str, closes: &[f64], start_day: i64) -> Series {
        let base = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let obs = closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Observation {
                date: base + Duration::days(start_day + i as i64),
                open: close,
                high: close,
                low: close,
                close,
                volume: 1_000 + i as u64,
            })
            .collect();
        Series::new(ticker, obs)
    }

    #[async_trait]
    impl MarketDataProvider for StubHistory {
        async fn fetch_history(&self, ticker: &str, _period: Period) -> Result<Series, ProviderError> {
            self.calls.lock().unwrap().push(ticker.to_string());
            if ticker == "BOOM" {
                return Err(ProviderError::Malformed("unexpected layout".to_string()));
            }
            let closes = self.closes.get(ticker).cloned().unwrap_or_default();
            let offset = if ticker == "TSLA" { 1 } else { 0 };
            Ok(make_series(ticker, &closes, offset))
        }
    }

    struct SharedHistory(std::sync::Arc<StubHistory>);

    #[async_trait]
    impl MarketDataProvider for SharedHistory {
        async fn fetch_history(&self, ticker: &str, period: Period) -> Result<Series, ProviderError> {
            self.0.fetch_history(ticker, period).await
        }
    }

    struct StubNews(Result<Vec<NewsItem>, NewsFetchFailed>);

    #[async_trait]
    impl NewsSource for StubNews {
        async fn fetch_headlines(&self, _ticker: &str, limit: usize) -> Result<Vec<NewsItem>, NewsFetchFailed> {
            self.0.clone().map(|items| items.into_iter().take(limit).collect())
        }
    }

    fn headlines(n: usize) -> Vec<NewsItem> {
        (0..n)
            .map(|i| NewsItem {
                title: format!("Headline {}", i),
                link: format!("https://news/{}", i),
            })
            .collect()
    }

    /// Falls for 60 days, then rallies hard: MA20 crosses MA50 once.
    fn v_shape() -> Vec<f64> {
        (0..60)
            .map(|i| 100.0 - i as f64 * 0.5)
            .chain((0..40).map(|i| 70.0 + i as f64 * 2.0))
            .collect()
    }

    #[test]
    fn snapshot_metrics() {
        let snap = Snapshot::from_series(&make_series("AAPL", &[10.0, 12.0, 15.0], 0)).unwrap();
        assert_eq!(snap.last_close, 15.0);
        assert_eq!(snap.previous_close, 12.0);
        assert!((snap.pct_change - 25.0).abs() < 1e-12);
        assert_eq!(snap.latest_volume, 1_002);
    }

    #[test]
    fn single_observation_has_zero_change() {
        let snap = Snapshot::from_series(&make_series("AAPL", &[42.0], 0)).unwrap();
        assert_eq!(snap.previous_close, 42.0);
        assert_eq!(snap.pct_change, 0.0);
    }

    #[test]
    fn zero_previous_close_reports_zero_change() {
        assert_eq!(pct_change(5.0, 0.0), 0.0);
        let snap = Snapshot::from_series(&make_series("AAPL", &[0.0, 5.0], 0)).unwrap();
        assert_eq!(snap.pct_change, 0.0);
    }

    #[test]
    fn analyze_series_finds_the_cross() {
        let series = make_series("AAPL", &v_shape(), 0);
        let analytics = analyze_series(&series).unwrap();

        assert_eq!(analytics.metrics.ma20.len(), series.len());
        assert_eq!(analytics.signals.len(), 1);
        let signal = &analytics.signals[0];
        let m = &analytics.metrics;
        assert!(m.ma20[signal.index].unwrap() > m.ma50[signal.index].unwrap());
        assert!(m.ma20[signal.index - 1].unwrap() <= m.ma50[signal.index - 1].unwrap());
        assert_eq!(signal.close, series.observations()[signal.index].close);
        assert_eq!(signal.date, series.observations()[signal.index].date);
    }

    #[test]
    fn empty_series_is_no_data() {
        let err = analyze_series(&Series::new("ZZZZ", Vec::new())).unwrap_err();
        assert!(matches!(err, PipelineError::NoDataAvailable(t) if t == "ZZZZ"));
    }

    #[tokio::test]
    async fn missing_ticker_is_skipped_and_left_out_of_combined() {
        let history = StubHistory::new(&[("AAPL", v_shape()), ("TSLA", vec![200.0, 201.0, 199.0])]);
        let pipeline = Pipeline::new(Box::new(history), Box::new(StubNews(Ok(headlines(8)))), 5);
        let selection = Selection {
            tickers: vec!["AAPL".into(), "ZZZZ".into(), "TSLA".into()],
            period: Period::SixMonths,
        };

        let run = pipeline.run_dashboard(&selection).await.unwrap();

        let order: Vec<&str> = run.sections.iter().map(TickerSection::ticker).collect();
        assert_eq!(order, vec!["AAPL", "ZZZZ", "TSLA"]);
        assert!(matches!(run.sections[1], TickerSection::Missing { .. }));
        assert_eq!(run.warnings(), vec!["No data found for ZZZZ".to_string()]);

        assert_eq!(run.combined.tickers(), ["AAPL".to_string(), "TSLA".to_string()]);
        assert_eq!(run.combined.len(), 100);
        let tsla = run.combined.column("TSLA").unwrap();
        assert_eq!(tsla[0], None);
        assert_eq!(tsla[1], Some(200.0));

        match &run.sections[0] {
            TickerSection::Ready(report) => assert_eq!(report.news.items.len(), 5),
            other => panic!("expected report, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn news_failure_does_not_abort_pipeline() {
        let history = StubHistory::new(&[("AAPL", v_shape())]);
        let news = StubNews(Err(NewsFetchFailed::Status(500)));
        let pipeline = Pipeline::new(Box::new(history), Box::new(news), 5);

        let report = pipeline.analyze_ticker("AAPL", Period::OneYear).await.unwrap();
        assert!(report.news.items.is_empty());
        assert_eq!(report.news.failure, Some(NewsFetchFailed::Status(500)));
        assert_eq!(report.analytics.signals.len(), 1);
        assert_eq!(report.period, Period::OneYear);
    }

    #[tokio::test]
    async fn provider_failure_halts_the_run() {
        let history = StubHistory::new(&[("AAPL", v_shape())]);
        let history = std::sync::Arc::new(history);
        let pipeline = Pipeline::new(Box::new(SharedHistory(history.clone())), Box::new(StubNews(Ok(vec![]))), 5);
        let selection = Selection {
            tickers: vec!["BOOM".into(), "AAPL".into()],
            period: Period::Max,
        };

        let err = pipeline.run_dashboard(&selection).await.unwrap_err();
        assert!(matches!(err, PipelineError::Provider(_)));
        assert_eq!(*history.calls.lock().unwrap(), vec!["BOOM".to_string()]);
    }
}
