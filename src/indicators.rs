//! Trailing-window indicators derived from a close-price series.
//!
//! Every output vector has the same length as its input. Positions before a
//! window has filled are `None`; nothing here looks ahead of the current index.

use crate::errors::IndicatorError;
use ta::indicators::{SimpleMovingAverage, StandardDeviation};
use ta::{Next, Reset};

pub const FAST_MA_WINDOW: usize = 20;
pub const SLOW_MA_WINDOW: usize = 50;
pub const VOLATILITY_WINDOW: usize = 20;
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Moving averages, returns and volatility for one series, index-aligned with it.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedMetrics {
    pub ma20: Vec<Option<f64>>,
    pub ma50: Vec<Option<f64>>,
    pub returns: Vec<Option<f64>>,
    pub volatility: Vec<Option<f64>>,
}

impl DerivedMetrics {
    pub fn compute(closes: &[f64]) -> Result<Self, IndicatorError> {
        let returns = pct_returns(closes);
        Ok(Self {
            ma20: moving_average(closes, FAST_MA_WINDOW)?,
            ma50: moving_average(closes, SLOW_MA_WINDOW)?,
            volatility: annualized_volatility(&returns, VOLATILITY_WINDOW)?,
            returns,
        })
    }

    pub fn latest_ma20(&self) -> Option<f64> {
        self.ma20.last().copied().flatten()
    }

    pub fn latest_ma50(&self) -> Option<f64> {
        self.ma50.last().copied().flatten()
    }

    pub fn latest_volatility(&self) -> Option<f64> {
        self.volatility.last().copied().flatten()
    }
}

/// Simple moving average over `window` closes, inclusive of the current day.
pub fn moving_average(values: &[f64], window: usize) -> Result<Vec<Option<f64>>, IndicatorError> {
    let mut sma = SimpleMovingAverage::new(window).map_err(|_| IndicatorError::InvalidWindow(window))?;

    Ok(values
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            let avg = sma.next(value);
            (i + 1 >= window).then_some(avg)
        })
        .collect())
}

/// Day-over-day fractional change. Index 0, and any day whose previous close
/// is zero, has no return.
pub fn pct_returns(closes: &[f64]) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(closes.len());
    if closes.is_empty() {
        return out;
    }
    out.push(None);
    out.extend(closes.windows(2).map(|w| {
        let ret = (w[1] - w[0]) / w[0];
        ret.is_finite().then_some(ret)
    }));
    out
}

/// Rolling sample standard deviation of `returns`, scaled by √252.
///
/// A value exists only when the trailing `window` returns are all defined.
pub fn annualized_volatility(
    returns: &[Option<f64>],
    window: usize,
) -> Result<Vec<Option<f64>>, IndicatorError> {
    if window < 2 {
        return Err(IndicatorError::InvalidWindow(window));
    }
    let mut sd = StandardDeviation::new(window).map_err(|_| IndicatorError::InvalidWindow(window))?;
    // `ta` reports the population deviation; rescale to the n-1 estimator.
    let bessel = (window as f64 / (window as f64 - 1.0)).sqrt();
    let annualize = TRADING_DAYS_PER_YEAR.sqrt();

    let mut run = 0usize;
    Ok(returns
        .iter()
        .map(|ret| match ret {
            Some(r) => {
                let population = sd.next(*r);
                run += 1;
                let vol = population * bessel * annualize;
                (run >= window && vol.is_finite()).then_some(vol)
            }
            None => {
                sd.reset();
                run = 0;
                None
            }
        })
        .collect())
}

/// Indices where `fast` closes strictly above `slow` after being at or below
/// it on the previous day. Both averages must be defined on both days.
pub fn detect_crossovers(fast: &[Option<f64>], slow: &[Option<f64>]) -> Vec<usize> {
    let len = fast.len().min(slow.len());
    (1..len)
        .filter(|&i| match (fast[i - 1], slow[i - 1], fast[i], slow[i]) {
            (Some(f_prev), Some(s_prev), Some(f), Some(s)) => f > s && f_prev <= s_prev,
            _ => false,
        })
        .collect()
}
