use tracing::warn;

use crate::models::MergedRecord;

/// Sets `deaths_without_covid = deaths_allcause - deaths_covid` on each row.
///
/// Negative results are kept as-is; they point at reporting mismatches
/// between the two sources.
pub fn annotate(mut merged: Vec<MergedRecord>) -> Vec<MergedRecord> {
    for record in merged.iter_mut() {
        record.deaths_without_covid = record
            .deaths_allcause
            .map(|allcause| allcause - record.deaths_covid);

        if let Some(value) = record.deaths_without_covid {
            if value < 0.0 {
                warn!(
                    country = %record.country_name,
                    date = %record.date,
                    deaths_without_covid = value,
                    "covid deaths exceed all-cause deaths"
                );
            }
        }
    }
    merged
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CounterfactualSummary {
    pub months: usize,
    pub deaths_allcause: f64,
    pub deaths_covid: f64,
    pub deaths_without_covid: f64,
    pub negative_months: usize,
}

pub fn summarize(annotated: &[MergedRecord]) -> CounterfactualSummary {
    let mut summary = CounterfactualSummary::default();
    for record in annotated {
        let (Some(allcause), Some(without)) = (record.deaths_allcause, record.deaths_without_covid)
        else {
            continue;
        };
        summary.months += 1;
        summary.deaths_allcause += allcause;
        summary.deaths_covid += record.deaths_covid;
        summary.deaths_without_covid += without;
        if without < 0.0 {
            summary.negative_months += 1;
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::{merge, JoinPolicy};
    use crate::models::{MonthlyBaselineRecord, MonthlyPandemicRecord};
    use chrono::NaiveDate;

    fn merged(allcause: Option<f64>, covid: f64) -> MergedRecord {
        MergedRecord {
            country_name: "Lithuania".to_string(),
            year: 2021,
            month: 1,
            deaths_allcause: allcause,
            deaths_covid: covid,
            deaths_without_covid: None,
            date: NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
        }
    }

    #[test]
    fn lithuania_january_scenario() {
        let baseline = vec![MonthlyBaselineRecord {
            country_name: "Lithuania".to_string(),
            year: 2021,
            month: 1,
            deaths_allcause: 3000.0,
        }];
        let pandemic = vec![MonthlyPandemicRecord {
            country_name: "Lithuania".to_string(),
            year: 2021,
            month: 1,
            deaths_covid: Some(500.0),
            cases_covid: None,
        }];

        let rows = annotate(merge(&baseline, &pandemic, JoinPolicy::Inner).unwrap());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].country_name, "Lithuania");
        assert_eq!(rows[0].deaths_allcause, Some(3000.0));
        assert_eq!(rows[0].deaths_covid, 500.0);
        assert_eq!(rows[0].deaths_without_covid, Some(2500.0));
    }

    #[test]
    fn difference_holds_for_every_row() {
        let rows = annotate(vec![merged(Some(10.5), 0.25), merged(Some(7.0), 0.0)]);
        for row in &rows {
            assert_eq!(
                row.deaths_without_covid,
                row.deaths_allcause.map(|a| a - row.deaths_covid)
            );
        }
    }

    #[test]
    fn negative_values_pass_through() {
        let rows = annotate(vec![merged(Some(100.0), 150.0)]);
        assert_eq!(rows[0].deaths_without_covid, Some(-50.0));
    }

    #[test]
    fn missing_baseline_stays_null() {
        let rows = annotate(vec![merged(None, 12.0)]);
        assert_eq!(rows[0].deaths_without_covid, None);
    }

    #[test]
    fn summary_counts_anomalies() {
        let rows = annotate(vec![
            merged(Some(3000.0), 500.0),
            merged(Some(100.0), 150.0),
            merged(None, 9.0),
        ]);
        let summary = summarize(&rows);
        assert_eq!(summary.months, 2);
        assert_eq!(summary.deaths_allcause, 3100.0);
        assert_eq!(summary.deaths_covid, 650.0);
        assert_eq!(summary.deaths_without_covid, 2450.0);
        assert_eq!(summary.negative_months, 1);
    }
}
