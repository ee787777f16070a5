use std::collections::BTreeMap;

use chrono::{Datelike, Months, NaiveDate};
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::models::{month_start, ForecastSeriesPoint, MonthlyBaselineRecord};
use crate::trend::{SeasonalTrendConfig, SeasonalTrendModel};

pub const DEFAULT_HORIZON_MONTHS: u32 = 24;

/// First and last calendar year of the pandemic window.
pub const PANDEMIC_YEARS: (i32, i32) = (2020, 2022);

fn in_pandemic_window(date: NaiveDate) -> bool {
    (PANDEMIC_YEARS.0..=PANDEMIC_YEARS.1).contains(&date.year())
}

/// Moves every prediction to the first of its month, averaging collisions.
pub fn coalesce_to_month_start(predictions: &[(NaiveDate, f64)]) -> Vec<(NaiveDate, f64)> {
    let mut months: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();
    for (date, value) in predictions {
        let Some(start) = month_start(date.year(), date.month()) else {
            continue;
        };
        let entry = months.entry(start).or_insert((0.0, 0));
        entry.0 += value;
        entry.1 += 1;
    }
    months
        .into_iter()
        .map(|(date, (sum, count))| (date, sum / count as f64))
        .collect()
}

/// Observed monthly deaths against a seasonal baseline fitted on pre-2020 data.
///
/// `series` is the already-selected monthly series for one country (or the
/// world sum). The model is extended `horizon_months` past the last training
/// month; forecasts are kept for 2020-2022 only, observations for every
/// month before 2023. Totals cover the pandemic window and repeat on each row.
pub fn forecast(
    country: &str,
    series: &[MonthlyBaselineRecord],
    horizon_months: u32,
) -> Result<Vec<ForecastSeriesPoint>> {
    let mut points = Vec::with_capacity(series.len());
    for record in series {
        let date = month_start(record.year, record.month).ok_or_else(|| {
            PipelineError::DataFormat(format!(
                "invalid month {}-{} for {}",
                record.year, record.month, record.country_name
            ))
        })?;
        points.push((date, record.deaths_allcause));
    }
    points.sort_by_key(|(date, _)| *date);

    let training: Vec<(NaiveDate, f64)> = points
        .iter()
        .copied()
        .filter(|(date, _)| date.year() < PANDEMIC_YEARS.0)
        .collect();
    let Some(&(last_training, _)) = training.last() else {
        return Err(PipelineError::InsufficientTrainingData {
            country: country.to_string(),
        });
    };

    let country_name = series
        .first()
        .map(|record| record.country_name.clone())
        .unwrap_or_else(|| country.to_string());

    let model = SeasonalTrendModel::fit(&training, SeasonalTrendConfig::default())?;
    debug!(
        country = %country_name,
        training_months = training.len(),
        horizon_months,
        "seasonal baseline fitted"
    );

    let mut prediction_dates: Vec<NaiveDate> = training.iter().map(|(date, _)| *date).collect();
    for step in 1..=horizon_months {
        if let Some(date) = last_training.checked_add_months(Months::new(step)) {
            prediction_dates.push(date);
        }
    }
    let predictions: Vec<(NaiveDate, f64)> = prediction_dates
        .into_iter()
        .map(|date| (date, model.predict(date)))
        .collect();

    let mut joined: BTreeMap<NaiveDate, (Option<f64>, Option<f64>)> = BTreeMap::new();
    for (date, value) in points {
        if date.year() <= PANDEMIC_YEARS.1 {
            joined.entry(date).or_insert((None, None)).0 = Some(value);
        }
    }
    for (date, value) in coalesce_to_month_start(&predictions) {
        if in_pandemic_window(date) {
            joined.entry(date).or_insert((None, None)).1 = Some(value);
        }
    }

    let observed_total: f64 = joined
        .iter()
        .filter(|(date, _)| in_pandemic_window(**date))
        .filter_map(|(_, (observed, _))| *observed)
        .sum();
    let forecast_total: f64 = joined
        .iter()
        .filter(|(date, _)| in_pandemic_window(**date))
        .filter_map(|(_, (_, forecast))| *forecast)
        .sum();

    info!(
        country = %country_name,
        observed_total,
        forecast_total,
        "forecast built"
    );

    Ok(joined
        .into_iter()
        .map(|(date, (observed, forecast))| ForecastSeriesPoint {
            country_name: country_name.clone(),
            date,
            observed,
            forecast,
            observed_total,
            forecast_total,
        })
        .collect())
}

/// Excess mortality over the pandemic window, read off a forecast series.
#[derive(Debug, Clone, PartialEq)]
pub struct ExcessSummary {
    pub observed_total: f64,
    pub forecast_total: f64,
    pub excess: f64,
    pub excess_pct: Option<f64>,
    /// Months with both values, ordered by largest observed-minus-forecast gap.
    pub largest_gaps: Vec<(NaiveDate, f64)>,
}

pub fn excess_summary(points: &[ForecastSeriesPoint]) -> Option<ExcessSummary> {
    let first = points.first()?;
    let excess = first.observed_total - first.forecast_total;

    let mut largest_gaps: Vec<(NaiveDate, f64)> = points
        .iter()
        .filter_map(|point| match (point.observed, point.forecast) {
            (Some(observed), Some(forecast)) => Some((point.date, observed - forecast)),
            _ => None,
        })
        .collect();
    largest_gaps.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    Some(ExcessSummary {
        observed_total: first.observed_total,
        forecast_total: first.forecast_total,
        excess,
        excess_pct: (first.forecast_total != 0.0).then(|| excess / first.forecast_total * 100.0),
        largest_gaps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(
        country: &str,
        years: std::ops::RangeInclusive<i32>,
        deaths: f64,
    ) -> Vec<MonthlyBaselineRecord> {
        let mut records = Vec::new();
        for year in years {
            for month in 1..=12 {
                records.push(MonthlyBaselineRecord {
                    country_name: country.to_string(),
                    year,
                    month,
                    deaths_allcause: if year >= 2020 { deaths + 600.0 } else { deaths },
                });
            }
        }
        records
    }

    #[test]
    fn forecast_dates_stay_in_pandemic_window() {
        let points = forecast("Lithuania", &series("Lithuania", 2015..=2023, 3000.0), 36).unwrap();
        let lower = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let upper = NaiveDate::from_ymd_opt(2022, 12, 1).unwrap();
        for point in points.iter().filter(|point| point.forecast.is_some()) {
            assert!(point.date >= lower && point.date <= upper, "{}", point.date);
        }
        assert_eq!(points.iter().filter(|p| p.forecast.is_some()).count(), 36);
        // 2023 observations are not part of the observed series.
        assert!(points.iter().all(|point| point.date.year() < 2023));
    }

    #[test]
    fn observed_total_matches_window_sum() {
        let points = forecast("Lithuania", &series("Lithuania", 2015..=2022, 3000.0), 24).unwrap();
        let expected: f64 = points
            .iter()
            .filter(|point| in_pandemic_window(point.date))
            .filter_map(|point| point.observed)
            .sum();
        assert!(points.iter().all(|point| point.observed_total == expected));
        assert_eq!(expected, 36.0 * 3600.0);

        let forecast_sum: f64 = points.iter().filter_map(|point| point.forecast).sum();
        assert!(points.iter().all(|point| (point.forecast_total - forecast_sum).abs() < 1e-6));
    }

    #[test]
    fn default_horizon_covers_two_years() {
        let points = forecast("Lithuania", &series("Lithuania", 2015..=2022, 3000.0), 24).unwrap();
        let forecast_dates: Vec<NaiveDate> = points
            .iter()
            .filter(|point| point.forecast.is_some())
            .map(|point| point.date)
            .collect();
        assert_eq!(forecast_dates.len(), 24);
        assert_eq!(forecast_dates[0], NaiveDate::from_ymd_opt(2020, 1, 1).unwrap());
        assert_eq!(forecast_dates[23], NaiveDate::from_ymd_opt(2021, 12, 1).unwrap());

        // 2022 has observations but no forecast: null, not zero.
        let late = points
            .iter()
            .find(|point| point.date == NaiveDate::from_ymd_opt(2022, 6, 1).unwrap())
            .unwrap();
        assert_eq!(late.forecast, None);
        assert_eq!(late.observed, Some(3600.0));
    }

    #[test]
    fn pre_pandemic_rows_have_no_forecast() {
        let points = forecast("Lithuania", &series("Lithuania", 2015..=2022, 3000.0), 24).unwrap();
        let first = &points[0];
        assert_eq!(first.date, NaiveDate::from_ymd_opt(2015, 1, 1).unwrap());
        assert_eq!(first.forecast, None);
        assert_eq!(first.observed, Some(3000.0));
    }

    #[test]
    fn rejects_series_without_training_years() {
        let err = forecast("Lithuania", &series("Lithuania", 2020..=2022, 3000.0), 24).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InsufficientTrainingData { ref country } if country == "Lithuania"
        ));
        assert!(matches!(
            forecast("Atlantis", &[], 24),
            Err(PipelineError::InsufficientTrainingData { .. })
        ));
    }

    #[test]
    fn coalesces_mid_month_predictions() {
        let coalesced = coalesce_to_month_start(&[
            (NaiveDate::from_ymd_opt(2020, 1, 31).unwrap(), 10.0),
            (NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(), 20.0),
            (NaiveDate::from_ymd_opt(2020, 2, 29).unwrap(), 5.0),
        ]);
        assert_eq!(
            coalesced,
            vec![
                (NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(), 15.0),
                (NaiveDate::from_ymd_opt(2020, 2, 1).unwrap(), 5.0),
            ]
        );
    }

    #[test]
    fn excess_is_observed_minus_forecast() {
        let points = forecast("Lithuania", &series("Lithuania", 2015..=2022, 3000.0), 36).unwrap();
        let summary = excess_summary(&points).unwrap();
        assert!((summary.excess - (summary.observed_total - summary.forecast_total)).abs() < 1e-9);
        assert!(summary.excess > 0.0);
        assert_eq!(summary.largest_gaps.len(), 36);
        assert!(excess_summary(&[]).is_none());
    }
}
