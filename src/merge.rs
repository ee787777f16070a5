use std::collections::BTreeMap;
use std::str::FromStr;

use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::models::{
    country_key, month_start, MergedRecord, MonthlyBaselineRecord, MonthlyPandemicRecord,
};

/// How months covered by only one source are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinPolicy {
    /// Keep only months present in both sources.
    #[default]
    Inner,
    /// Keep every month; the side without data is left null.
    Outer,
}

impl FromStr for JoinPolicy {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "inner" => Ok(JoinPolicy::Inner),
            "outer" => Ok(JoinPolicy::Outer),
            other => Err(PipelineError::InvalidArgument(format!(
                "unknown join policy {other:?} (expected inner or outer)"
            ))),
        }
    }
}

type MonthKey = (String, i32, u32);

fn key(country: &str, year: i32, month: u32) -> MonthKey {
    (country_key(country), year, month)
}

/// Joins monthly baseline and pandemic deaths on country, year and month.
///
/// Country names match case-insensitively; the baseline spelling wins.
/// Null pandemic deaths are filled with zero after the join. The
/// counterfactual column is left for [`crate::counterfactual::annotate`].
pub fn merge(
    baseline: &[MonthlyBaselineRecord],
    pandemic: &[MonthlyPandemicRecord],
    policy: JoinPolicy,
) -> Result<Vec<MergedRecord>> {
    let mut covid: BTreeMap<MonthKey, (String, Option<f64>)> = BTreeMap::new();
    for record in pandemic {
        let entry = covid
            .entry(key(&record.country_name, record.year, record.month))
            .or_insert_with(|| (record.country_name.clone(), None));
        if let Some(deaths) = record.deaths_covid {
            entry.1 = Some(entry.1.unwrap_or(0.0) + deaths);
        }
    }

    let mut joined: BTreeMap<MonthKey, (String, Option<f64>, Option<f64>)> = BTreeMap::new();
    for record in baseline {
        let month_key = key(&record.country_name, record.year, record.month);
        let covid_deaths = match covid.get(&month_key) {
            Some((_, deaths)) => *deaths,
            None if policy == JoinPolicy::Inner => continue,
            None => None,
        };
        let entry = joined
            .entry(month_key)
            .or_insert_with(|| (record.country_name.clone(), None, covid_deaths));
        entry.1 = Some(entry.1.unwrap_or(0.0) + record.deaths_allcause);
    }

    if policy == JoinPolicy::Outer {
        for (month_key, (country_name, deaths)) in &covid {
            joined
                .entry(month_key.clone())
                .or_insert_with(|| (country_name.clone(), None, *deaths));
        }
    }

    let mut merged = Vec::with_capacity(joined.len());
    for ((_, year, month), (country_name, deaths_allcause, deaths_covid)) in joined {
        let date = month_start(year, month).ok_or_else(|| {
            PipelineError::DataFormat(format!("invalid month {year}-{month} for {country_name}"))
        })?;
        merged.push(MergedRecord {
            country_name,
            year,
            month,
            deaths_allcause,
            deaths_covid: deaths_covid.unwrap_or(0.0),
            deaths_without_covid: None,
            date,
        });
    }

    if merged.is_empty() {
        debug!(?policy, "merge produced no overlapping months");
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(country: &str, year: i32, month: u32, deaths: f64) -> MonthlyBaselineRecord {
        MonthlyBaselineRecord {
            country_name: country.to_string(),
            year,
            month,
            deaths_allcause: deaths,
        }
    }

    fn covid(country: &str, year: i32, month: u32, deaths: Option<f64>) -> MonthlyPandemicRecord {
        MonthlyPandemicRecord {
            country_name: country.to_string(),
            year,
            month,
            deaths_covid: deaths,
            cases_covid: None,
        }
    }

    #[test]
    fn inner_join_keeps_shared_months_only() {
        let baseline = vec![
            base("Lithuania", 2021, 1, 3000.0),
            base("Lithuania", 2021, 2, 2800.0),
        ];
        let pandemic = vec![
            covid("Lithuania", 2021, 1, Some(500.0)),
            covid("Lithuania", 2021, 3, Some(200.0)),
        ];
        let merged = merge(&baseline, &pandemic, JoinPolicy::Inner).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].month, 1);
        assert_eq!(merged[0].deaths_allcause, Some(3000.0));
        assert_eq!(merged[0].deaths_covid, 500.0);
        assert_eq!(merged[0].date.to_string(), "2021-01-01");
    }

    #[test]
    fn null_covid_deaths_become_zero() {
        let merged = merge(
            &[base("Lithuania", 2020, 2, 3100.0)],
            &[covid("Lithuania", 2020, 2, None)],
            JoinPolicy::Inner,
        )
        .unwrap();
        assert_eq!(merged[0].deaths_covid, 0.0);
    }

    #[test]
    fn country_names_match_case_insensitively() {
        let merged = merge(
            &[base("Lithuania", 2021, 1, 3000.0)],
            &[covid("LITHUANIA", 2021, 1, Some(1.0))],
            JoinPolicy::Inner,
        )
        .unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].country_name, "Lithuania");
    }

    #[test]
    fn no_overlap_is_empty_not_an_error() {
        let merged = merge(
            &[base("Lithuania", 2019, 1, 3000.0)],
            &[covid("Lithuania", 2021, 1, Some(1.0))],
            JoinPolicy::Inner,
        )
        .unwrap();
        assert!(merged.is_empty());
    }

    #[test]
    fn outer_join_keeps_both_sides() {
        let merged = merge(
            &[base("Lithuania", 2019, 12, 3000.0)],
            &[covid("Lithuania", 2020, 3, Some(4.0))],
            JoinPolicy::Outer,
        )
        .unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].deaths_allcause, Some(3000.0));
        assert_eq!(merged[0].deaths_covid, 0.0);
        assert_eq!(merged[1].deaths_allcause, None);
        assert_eq!(merged[1].deaths_covid, 4.0);
    }

    #[test]
    fn merging_twice_gives_identical_output() {
        let baseline = vec![base("Peru", 2021, 5, 20_000.0), base("Chile", 2021, 5, 12_000.0)];
        let pandemic = vec![
            covid("Chile", 2021, 5, Some(3_000.0)),
            covid("Peru", 2021, 5, Some(9_000.0)),
        ];
        let first = merge(&baseline, &pandemic, JoinPolicy::Inner).unwrap();
        let second = merge(&baseline, &pandemic, JoinPolicy::Inner).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn parses_policy_names() {
        assert_eq!("Inner".parse::<JoinPolicy>().unwrap(), JoinPolicy::Inner);
        assert_eq!("outer".parse::<JoinPolicy>().unwrap(), JoinPolicy::Outer);
        assert!("left".parse::<JoinPolicy>().is_err());
    }
}
