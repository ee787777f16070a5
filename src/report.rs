use std::collections::BTreeMap;
use std::fmt::Write;

use crate::counterfactual::{self, CounterfactualSummary};
use crate::forecast::ExcessSummary;
use crate::models::MergedRecord;

/// Counterfactual totals for one calendar year.
#[derive(Debug, Clone, PartialEq)]
pub struct YearSummary {
    pub year: i32,
    pub totals: CounterfactualSummary,
}

pub fn summarize_by_year(merged: &[MergedRecord]) -> Vec<YearSummary> {
    let mut years: BTreeMap<i32, Vec<MergedRecord>> = BTreeMap::new();
    for record in merged {
        years.entry(record.year).or_default().push(record.clone());
    }

    years
        .into_iter()
        .map(|(year, records)| YearSummary {
            year,
            totals: counterfactual::summarize(&records),
        })
        .collect()
}

/// Markdown excess-mortality report for one country.
///
/// `excess` is `None` when no baseline could be fitted for the country.
pub fn build_report(
    country: &str,
    horizon_months: u32,
    excess: Option<&ExcessSummary>,
    merged: &[MergedRecord],
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Excess Mortality Report");
    let _ = writeln!(
        output,
        "Generated for {} (seasonal baseline projected {} months past 2019)",
        country, horizon_months
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Observed vs Expected, 2020-2022");

    match excess {
        None => {
            let _ = writeln!(output, "No pre-2020 baseline available for this country.");
        }
        Some(summary) => {
            let _ = writeln!(output, "- Observed deaths: {:.0}", summary.observed_total);
            let _ = writeln!(output, "- Expected deaths: {:.0}", summary.forecast_total);
            match summary.excess_pct {
                Some(pct) => {
                    let _ = writeln!(output, "- Excess deaths: {:.0} ({:+.1}%)", summary.excess, pct);
                }
                None => {
                    let _ = writeln!(output, "- Excess deaths: {:.0}", summary.excess);
                }
            }

            let _ = writeln!(output);
            let _ = writeln!(output, "## Largest Monthly Gaps");
            if summary.largest_gaps.is_empty() {
                let _ = writeln!(output, "No months with both observed and expected deaths.");
            } else {
                for (date, gap) in summary.largest_gaps.iter().take(5) {
                    let _ = writeln!(output, "- {}: {:+.0} deaths", date.format("%Y-%m"), gap);
                }
            }
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Deaths Without COVID");

    let years = summarize_by_year(merged);
    if years.iter().all(|year| year.totals.months == 0) {
        let _ = writeln!(output, "No months covered by both sources.");
    } else {
        for year in years.iter().filter(|year| year.totals.months > 0) {
            let totals = &year.totals;
            let _ = writeln!(
                output,
                "- {}: {:.0} all-cause, {:.0} covid, {:.0} without covid over {} months",
                year.year,
                totals.deaths_allcause,
                totals.deaths_covid,
                totals.deaths_without_covid,
                totals.months
            );
        }
        let negative: usize = years.iter().map(|year| year.totals.negative_months).sum();
        if negative > 0 {
            let _ = writeln!(output);
            let _ = writeln!(
                output,
                "{negative} month(s) report more covid deaths than all-cause deaths; check source alignment."
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn merged(year: i32, month: u32, allcause: f64, covid: f64) -> MergedRecord {
        MergedRecord {
            country_name: "Lithuania".to_string(),
            year,
            month,
            deaths_allcause: Some(allcause),
            deaths_covid: covid,
            deaths_without_covid: Some(allcause - covid),
            date: NaiveDate::from_ymd_opt(year, month, 1).unwrap(),
        }
    }

    fn excess() -> ExcessSummary {
        ExcessSummary {
            observed_total: 120_000.0,
            forecast_total: 100_000.0,
            excess: 20_000.0,
            excess_pct: Some(20.0),
            largest_gaps: vec![
                (NaiveDate::from_ymd_opt(2020, 12, 1).unwrap(), 2_400.0),
                (NaiveDate::from_ymd_opt(2021, 11, 1).unwrap(), 1_900.0),
            ],
        }
    }

    #[test]
    fn groups_counterfactuals_by_year() {
        let records = vec![
            merged(2020, 12, 4000.0, 800.0),
            merged(2021, 1, 3000.0, 500.0),
            merged(2021, 2, 2800.0, 300.0),
        ];
        let years = summarize_by_year(&records);
        assert_eq!(years.len(), 2);
        assert_eq!(years[1].year, 2021);
        assert_eq!(years[1].totals.months, 2);
        assert_eq!(years[1].totals.deaths_without_covid, 5000.0);
    }

    #[test]
    fn report_lists_excess_and_gaps() {
        let report = build_report(
            "Lithuania",
            24,
            Some(&excess()),
            &[merged(2021, 1, 3000.0, 500.0)],
        );
        assert!(report.starts_with("# Excess Mortality Report"));
        assert!(report.contains("- Excess deaths: 20000 (+20.0%)"));
        assert!(report.contains("- 2020-12: +2400 deaths"));
        assert!(report.contains("- 2021: 3000 all-cause, 500 covid, 2500 without covid over 1 months"));
    }

    #[test]
    fn report_handles_missing_inputs() {
        let report = build_report("Atlantis", 24, None, &[]);
        assert!(report.contains("No pre-2020 baseline available"));
        assert!(report.contains("No months covered by both sources."));
    }

    #[test]
    fn negative_counterfactuals_are_flagged() {
        let report = build_report("Lithuania", 24, None, &[merged(2021, 1, 400.0, 500.0)]);
        assert!(report.contains("1 month(s) report more covid deaths"));
    }
}
