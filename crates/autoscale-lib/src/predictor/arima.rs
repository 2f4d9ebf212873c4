//! ARIMA(2,1,2) on the queue-depth series
//!
//! Estimated with the Hannan-Rissanen two-stage regression on the
//! first-differenced series:
//! 1. fit a long autoregression and keep its residuals as innovation proxies
//! 2. regress each difference on two lagged differences and two lagged
//!    residuals
//!
//! Forecasting re-derives innovations over the supplied history with the
//! fitted coefficients, so one fitted model can forecast from any origin.

use crate::stats;
use serde::{Deserialize, Serialize};

const AR_ORDER: usize = 2;
const MA_ORDER: usize = 2;
const MAX_LONG_AR_ORDER: usize = 10;

/// Fitted ARIMA(2,1,2) coefficients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arima {
    pub intercept: f64,
    pub ar: [f64; AR_ORDER],
    pub ma: [f64; MA_ORDER],
    /// Standard deviation of the second-stage residuals
    pub sigma: f64,
}

impl Arima {
    /// Fit on `series`; `None` when the series is too short or the
    /// regressions are degenerate
    pub fn fit(series: &[f64]) -> Option<Self> {
        let diffs = difference(series);
        let long_order = (diffs.len() / 4).clamp(AR_ORDER + MA_ORDER, MAX_LONG_AR_ORDER);
        if diffs.len() < long_order + AR_ORDER.max(MA_ORDER) + 8 {
            return None;
        }

        // Stage 1: long AR for innovation estimates
        let rows: Vec<Vec<f64>> = (long_order..diffs.len())
            .map(|t| {
                let mut row = Vec::with_capacity(long_order + 1);
                row.push(1.0);
                row.extend((1..=long_order).map(|lag| diffs[t - lag]));
                row
            })
            .collect();
        let targets: Vec<f64> = diffs[long_order..].to_vec();
        let long_coef = stats::least_squares(&rows, &targets)?;

        let mut innovations = vec![0.0; diffs.len()];
        for (offset, row) in rows.iter().enumerate() {
            let fitted: f64 = row.iter().zip(&long_coef).map(|(x, c)| x * c).sum();
            innovations[long_order + offset] = diffs[long_order + offset] - fitted;
        }

        // Stage 2: ARMA regression on lagged differences and innovations
        let start = long_order + MA_ORDER;
        let rows: Vec<Vec<f64>> = (start..diffs.len())
            .map(|t| {
                vec![
                    1.0,
                    diffs[t - 1],
                    diffs[t - 2],
                    innovations[t - 1],
                    innovations[t - 2],
                ]
            })
            .collect();
        let targets: Vec<f64> = diffs[start..].to_vec();
        let coef = stats::least_squares(&rows, &targets)?;
        if coef.iter().any(|c| !c.is_finite()) {
            return None;
        }

        let residuals: Vec<f64> = rows
            .iter()
            .zip(&targets)
            .map(|(row, y)| y - row.iter().zip(&coef).map(|(x, c)| x * c).sum::<f64>())
            .collect();

        Some(Self {
            intercept: coef[0],
            ar: [coef[1], coef[2]],
            ma: [coef[3], coef[4]],
            sigma: stats::population_std_dev(&residuals),
        })
    }

    fn step(&self, d1: f64, d2: f64, e1: f64, e2: f64) -> f64 {
        self.intercept + self.ar[0] * d1 + self.ar[1] * d2 + self.ma[0] * e1 + self.ma[1] * e2
    }

    /// Level forecast `horizon` steps after the end of `history`
    pub fn forecast(&self, history: &[f64], horizon: usize) -> Option<f64> {
        let last = *history.last()?;
        let mut diffs = difference(history);
        if diffs.len() < AR_ORDER {
            return None;
        }

        let mut innovations = vec![0.0; diffs.len()];
        for t in AR_ORDER..diffs.len() {
            let fitted = self.step(
                diffs[t - 1],
                diffs[t - 2],
                innovations[t - 1],
                innovations[t - 2],
            );
            innovations[t] = diffs[t] - fitted;
        }

        let mut level = last;
        for _ in 0..horizon {
            let t = diffs.len();
            let next = self.step(
                diffs[t - 1],
                diffs[t - 2],
                innovations[t - 1],
                innovations[t - 2],
            );
            diffs.push(next);
            innovations.push(0.0);
            level += next;
        }

        level.is_finite().then_some(level)
    }
}

fn difference(series: &[f64]) -> Vec<f64> {
    series.windows(2).map(|w| w[1] - w[0]).collect()
}
