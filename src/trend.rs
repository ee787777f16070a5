//! Additive trend + yearly seasonality regression.
//!
//! `y(t) = a + b * t + sum_k (s_k * sin(2 pi k d / P) + c_k * cos(2 pi k d / P))`
//! where `t` is time scaled to the training span and `d` is days since the
//! Unix epoch. Coefficients are fitted by penalised least squares; the ridge
//! terms act as zero-mean Gaussian priors on the slope and seasonal weights
//! so a high Fourier order stays solvable on monthly data.

use std::f64::consts::PI;

use chrono::NaiveDate;
use nalgebra::{DMatrix, DVector};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone)]
pub struct SeasonalTrendConfig {
    pub fourier_order: usize,
    pub period_days: f64,
    pub seasonality_prior_scale: f64,
    pub trend_prior_scale: f64,
}

impl Default for SeasonalTrendConfig {
    fn default() -> Self {
        Self {
            fourier_order: 10,
            period_days: 365.25,
            seasonality_prior_scale: 10.0,
            trend_prior_scale: 5.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SeasonalTrendModel {
    config: SeasonalTrendConfig,
    start: NaiveDate,
    span_days: f64,
    y_scale: f64,
    coefficients: DVector<f64>,
}

fn epoch_days(date: NaiveDate) -> f64 {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or(NaiveDate::MIN);
    (date - epoch).num_days() as f64
}

impl SeasonalTrendModel {
    pub fn fit(points: &[(NaiveDate, f64)], config: SeasonalTrendConfig) -> Result<Self> {
        let (first, last) = match (
            points.iter().map(|(date, _)| *date).min(),
            points.iter().map(|(date, _)| *date).max(),
        ) {
            (Some(first), Some(last)) => (first, last),
            _ => {
                return Err(PipelineError::Computation(
                    "cannot fit a seasonal model on an empty series".to_string(),
                ))
            }
        };
        if points.iter().any(|(_, y)| !y.is_finite()) {
            return Err(PipelineError::Computation(
                "series contains non-finite values".to_string(),
            ));
        }

        let y_scale = points
            .iter()
            .map(|(_, y)| y.abs())
            .fold(0.0_f64, f64::max);
        let mut model = Self {
            config,
            start: first,
            span_days: ((last - first).num_days() as f64).max(1.0),
            y_scale: if y_scale > 0.0 { y_scale } else { 1.0 },
            coefficients: DVector::zeros(0),
        };

        let p = model.width();
        let mut xtx = DMatrix::<f64>::zeros(p, p);
        let mut xty = DVector::<f64>::zeros(p);
        for (date, y) in points {
            let row = DVector::from_vec(model.features(*date));
            xtx += &row * row.transpose();
            xty += &row * (y / model.y_scale);
        }

        let trend_penalty = 1.0 / model.config.trend_prior_scale.powi(2);
        let seasonal_penalty = 1.0 / model.config.seasonality_prior_scale.powi(2);
        xtx[(1, 1)] += trend_penalty;
        for j in 2..p {
            xtx[(j, j)] += seasonal_penalty;
        }

        let solution = match xtx.clone().cholesky() {
            Some(chol) => Some(chol.solve(&xty)),
            None => xtx.lu().solve(&xty),
        };
        model.coefficients = solution.ok_or_else(|| {
            PipelineError::Computation("seasonal model normal equations are singular".to_string())
        })?;
        Ok(model)
    }

    pub fn predict(&self, date: NaiveDate) -> f64 {
        let features = self.features(date);
        let scaled: f64 = features
            .iter()
            .zip(self.coefficients.iter())
            .map(|(x, beta)| x * beta)
            .sum();
        scaled * self.y_scale
    }

    fn width(&self) -> usize {
        2 + 2 * self.config.fourier_order
    }

    fn features(&self, date: NaiveDate) -> Vec<f64> {
        let mut row = Vec::with_capacity(self.width());
        row.push(1.0);
        row.push((date - self.start).num_days() as f64 / self.span_days);

        let day = epoch_days(date);
        for k in 1..=self.config.fourier_order {
            let angle = 2.0 * PI * k as f64 * day / self.config.period_days;
            row.push(angle.sin());
            row.push(angle.cos());
        }
        row
    }
}
