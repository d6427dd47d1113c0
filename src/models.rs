//! Shared domain types: lookback periods, daily observations and price series.

use anyhow::{Result, anyhow};
use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static TICKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z0-9][A-Z0-9.\-^=]{0,14}$").unwrap());

/// Checks that `symbol` looks like an exchange ticker (e.g. `AAPL`, `BRK-B`, `^GSPC`).
pub fn validate_ticker(symbol: &str) -> Result<()> {
    let bare = symbol.strip_prefix('^').unwrap_or(symbol);
    if TICKER_RE.is_match(bare) {
        Ok(())
    } else {
        Err(anyhow!("invalid ticker symbol: {:?}", symbol))
    }
}

// --- Period ---

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Period {
    #[serde(rename = "1mo")]
    OneMonth,
    #[serde(rename = "3mo")]
    ThreeMonths,
    #[default]
    #[serde(rename = "6mo")]
    SixMonths,
    #[serde(rename = "1y")]
    OneYear,
    #[serde(rename = "5y")]
    FiveYears,
    #[serde(rename = "max")]
    Max,
}

impl Period {
    pub const ALL: [Period; 6] = [
        Period::OneMonth,
        Period::ThreeMonths,
        Period::SixMonths,
        Period::OneYear,
        Period::FiveYears,
        Period::Max,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Period::OneMonth => "1mo",
            Period::ThreeMonths => "3mo",
            Period::SixMonths => "6mo",
            Period::OneYear => "1y",
            Period::FiveYears => "5y",
            Period::Max => "max",
        }
    }

    pub fn next(self) -> Period {
        let idx = Self::ALL.iter().position(|p| *p == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }

    pub fn prev(self) -> Period {
        let idx = Self::ALL.iter().position(|p| *p == self).unwrap_or(0);
        Self::ALL[(idx + Self::ALL.len() - 1) % Self::ALL.len()]
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| anyhow!("unknown period {:?}", s))
    }
}

// --- Series ---

/// One trading day of OHLCV data.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Observation {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

/// Date-ordered daily observations for one ticker.
///
/// Construction sorts by date and collapses duplicate dates (the later row
/// wins), so `observations` is always strictly ascending.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub ticker: String,
    observations: Vec<Observation>,
}

impl Series {
    pub fn new(ticker: impl Into<String>, mut observations: Vec<Observation>) -> Self {
        // Stable sort keeps provider order among equal dates, so the last one is the newest row.
        observations.sort_by_key(|o| o.date);
        let mut deduped: Vec<Observation> = Vec::with_capacity(observations.len());
        for obs in observations {
            match deduped.last_mut() {
                Some(last) if last.date == obs.date => *last = obs,
                _ => deduped.push(obs),
            }
        }
        Self {
            ticker: ticker.into(),
            observations: deduped,
        }
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn closes(&self) -> Vec<f64> {
        self.observations.iter().map(|o| o.close).collect()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.observations.iter().map(|o| o.date).collect()
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn last(&self) -> Option<&Observation> {
        self.observations.last()
    }
}

// --- Events & news ---

/// A day on which MA20 moved from at-or-below MA50 to strictly above it.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct CrossSignal {
    pub index: usize,
    pub date: NaiveDate,
    pub close: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NewsItem {
    pub title: String,
    pub link: String,
}
