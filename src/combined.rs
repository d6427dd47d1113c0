//! Date-aligned close prices across every ticker that returned data.

use crate::models::Series;
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Outer join of close prices keyed by date. Column order follows insertion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CombinedTable {
    tickers: Vec<String>,
    rows: BTreeMap<NaiveDate, Vec<Option<f64>>>,
}

impl CombinedTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `series` as a new column. Empty series are ignored; adding the
    /// same ticker twice replaces its column.
    pub fn add_series(&mut self, series: &Series) {
        if series.is_empty() {
            return;
        }

        let col = match self.tickers.iter().position(|t| *t == series.ticker) {
            Some(existing) => {
                for row in self.rows.values_mut() {
                    row[existing] = None;
                }
                existing
            }
            None => {
                self.tickers.push(series.ticker.clone());
                for row in self.rows.values_mut() {
                    row.push(None);
                }
                self.tickers.len() - 1
            }
        };

        let width = self.tickers.len();
        for obs in series.observations() {
            self.rows.entry(obs.date).or_insert_with(|| vec![None; width])[col] = Some(obs.close);
        }
        self.rows.retain(|_, row| row.iter().any(Option::is_some));
    }

    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    pub fn rows(&self) -> impl Iterator<Item = (&NaiveDate, &[Option<f64>])> {
        self.rows.iter().map(|(date, row)| (date, row.as_slice()))
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.rows.keys().copied().collect()
    }

    /// One ticker's closes over the shared date axis, `None` where it has no row.
    pub fn column(&self, ticker: &str) -> Option<Vec<Option<f64>>> {
        let col = self.tickers.iter().position(|t| t == ticker)?;
        Some(self.rows.values().map(|row| row[col]).collect())
    }

    /// The last `n` dated rows, oldest first.
    pub fn tail(&self, n: usize) -> Vec<(NaiveDate, Vec<Option<f64>>)> {
        self.rows()
            .skip(self.len().saturating_sub(n))
            .map(|(date, row)| (*date, row.to_vec()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
