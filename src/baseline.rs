use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::models::{is_world, same_country, MonthlyBaselineRecord, RawMortalityRow, WORLD};

const WEEKLY: &str = "weekly";
const MONTHLY: &str = "monthly";
const REQUIRED_COLUMNS: [&str; 5] = ["country_name", "year", "time", "time_unit", "deaths"];

/// Monday of ISO week `week` in `year`.
///
/// Week numbers past the last ISO week of the year roll forward into the
/// following January rather than failing.
pub fn week_monday(year: i32, week: u32) -> Option<NaiveDate> {
    let first = NaiveDate::from_isoywd_opt(year, 1, Weekday::Mon)?;
    first.checked_add_signed(Duration::weeks(i64::from(week) - 1))
}

/// Sums weekly all-cause deaths into calendar months per country.
///
/// Each week lands in the calendar month of its Monday, so ISO week 1 can
/// belong to the previous December. Rows with another recognised unit are
/// skipped.
pub fn aggregate_weekly(rows: &[RawMortalityRow]) -> Result<Vec<MonthlyBaselineRecord>> {
    let mut totals: BTreeMap<(String, i32, u32), f64> = BTreeMap::new();

    for (index, row) in rows.iter().enumerate() {
        match row.time_unit.trim() {
            WEEKLY => {}
            MONTHLY => continue,
            other => {
                return Err(PipelineError::DataFormat(format!(
                    "row {index}: unrecognised time_unit {other:?}"
                )))
            }
        }

        if row.country_name.trim().is_empty() {
            return Err(PipelineError::DataFormat(format!(
                "row {index}: missing country_name"
            )));
        }
        if !(1..=53).contains(&row.time) {
            return Err(PipelineError::DataFormat(format!(
                "row {index}: week {} out of range for {}",
                row.time, row.country_name
            )));
        }

        let monday = week_monday(row.year, row.time).ok_or_else(|| {
            PipelineError::DataFormat(format!(
                "row {index}: cannot anchor week {} of {}",
                row.time, row.year
            ))
        })?;

        let entry = totals
            .entry((row.country_name.clone(), monday.year(), monday.month()))
            .or_insert(0.0);
        *entry += row.deaths.unwrap_or(0.0);
    }

    Ok(totals
        .into_iter()
        .map(|((country_name, year, month), deaths_allcause)| MonthlyBaselineRecord {
            country_name,
            year,
            month,
            deaths_allcause,
        })
        .collect())
}

/// Sums every country's monthly deaths into one `World` series.
pub fn world_series(records: &[MonthlyBaselineRecord]) -> Vec<MonthlyBaselineRecord> {
    let mut totals: BTreeMap<(i32, u32), f64> = BTreeMap::new();
    for record in records {
        *totals.entry((record.year, record.month)).or_insert(0.0) += record.deaths_allcause;
    }

    totals
        .into_iter()
        .map(|((year, month), deaths_allcause)| MonthlyBaselineRecord {
            country_name: WORLD.to_string(),
            year,
            month,
            deaths_allcause,
        })
        .collect()
}

/// Monthly baseline mortality, built once per process and only read after.
#[derive(Debug, Clone, Default)]
pub struct BaselineStore {
    records: Vec<MonthlyBaselineRecord>,
}

impl BaselineStore {
    pub fn from_records(records: Vec<MonthlyBaselineRecord>) -> Self {
        Self { records }
    }

    pub fn from_raw(rows: &[RawMortalityRow]) -> Result<Self> {
        Ok(Self::from_records(aggregate_weekly(rows)?))
    }

    pub fn load_csv(path: &Path) -> Result<Self> {
        let rows = read_mortality_csv(path)?;
        let store = Self::from_raw(&rows)?;
        info!(
            path = %path.display(),
            raw_rows = rows.len(),
            monthly_rows = store.records.len(),
            "baseline mortality loaded"
        );
        Ok(store)
    }

    pub fn countries(&self) -> BTreeSet<&str> {
        self.records
            .iter()
            .map(|record| record.country_name.as_str())
            .collect()
    }

    /// Monthly series for one country (case-insensitive) or the world sum.
    pub fn series(&self, country: &str) -> Vec<MonthlyBaselineRecord> {
        if is_world(country) {
            return world_series(&self.records);
        }

        let series: Vec<MonthlyBaselineRecord> = self
            .records
            .iter()
            .filter(|record| same_country(&record.country_name, country))
            .cloned()
            .collect();
        if series.is_empty() {
            debug!(country, "no baseline rows for country");
        }
        series
    }
}

pub fn read_mortality_csv(path: &Path) -> Result<Vec<RawMortalityRow>> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    for column in REQUIRED_COLUMNS {
        if !headers.iter().any(|header| header.trim() == column) {
            return Err(PipelineError::DataFormat(format!(
                "{} is missing column {column}",
                path.display()
            )));
        }
    }

    let mut rows = Vec::new();
    for (index, result) in reader.deserialize::<RawMortalityRow>().enumerate() {
        let row = result.map_err(|err| {
            PipelineError::DataFormat(format!("{} row {}: {err}", path.display(), index + 1))
        })?;
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn weekly(country: &str, year: i32, week: u32, deaths: f64) -> RawMortalityRow {
        RawMortalityRow {
            country_name: country.to_string(),
            year,
            time: week,
            time_unit: "weekly".to_string(),
            deaths: Some(deaths),
        }
    }

    #[test]
    fn week_monday_follows_iso_calendar() {
        // ISO week 1 of 2020 starts on Monday 30 December 2019.
        assert_eq!(week_monday(2020, 1), NaiveDate::from_ymd_opt(2019, 12, 30));
        assert_eq!(week_monday(2021, 1), NaiveDate::from_ymd_opt(2021, 1, 4));
        assert_eq!(week_monday(2021, 10), NaiveDate::from_ymd_opt(2021, 3, 8));
    }

    #[test]
    fn week_one_starting_in_december_belongs_to_previous_year() {
        let rows = vec![
            weekly("Lithuania", 2020, 1, 1000.0),
            weekly("Lithuania", 2020, 53, 900.0),
        ];
        let monthly = aggregate_weekly(&rows).unwrap();
        let months: Vec<(i32, u32, f64)> = monthly
            .iter()
            .map(|record| (record.year, record.month, record.deaths_allcause))
            .collect();
        // Week 53 of 2020 starts on Monday 28 December 2020.
        assert_eq!(months, vec![(2019, 12, 1000.0), (2020, 12, 900.0)]);
    }

    #[test]
    fn sums_weeks_within_month() {
        let rows = vec![
            weekly("Lithuania", 2021, 1, 700.0),
            weekly("Lithuania", 2021, 2, 800.0),
            weekly("Lithuania", 2021, 3, 750.0),
            weekly("Lithuania", 2021, 5, 600.0),
        ];
        let monthly = aggregate_weekly(&rows).unwrap();
        assert_eq!(monthly.len(), 2);
        assert_eq!(monthly[0].month, 1);
        assert_eq!(monthly[0].deaths_allcause, 2250.0);
        assert_eq!(monthly[1].month, 2);
        assert_eq!(monthly[1].deaths_allcause, 600.0);
    }

    #[test]
    fn keeps_countries_apart() {
        let rows = vec![weekly("Latvia", 2021, 2, 100.0), weekly("Estonia", 2021, 2, 50.0)];
        let monthly = aggregate_weekly(&rows).unwrap();
        assert_eq!(monthly.len(), 2);
        assert_eq!(monthly[0].country_name, "Estonia");
        assert_eq!(monthly[1].country_name, "Latvia");
    }

    #[test]
    fn monthly_rows_are_skipped() {
        let mut row = weekly("Peru", 2021, 4, 900.0);
        row.time_unit = "monthly".to_string();
        assert!(aggregate_weekly(&[row]).unwrap().is_empty());
    }

    #[test]
    fn unknown_time_unit_is_rejected() {
        let mut row = weekly("Peru", 2021, 4, 900.0);
        row.time_unit = "daily".to_string();
        let err = aggregate_weekly(&[row]).unwrap_err();
        assert!(matches!(err, PipelineError::DataFormat(_)));
    }

    #[test]
    fn week_out_of_range_is_rejected() {
        let err = aggregate_weekly(&[weekly("Peru", 2021, 54, 1.0)]).unwrap_err();
        assert!(matches!(err, PipelineError::DataFormat(_)));
    }

    #[test]
    fn world_series_sums_countries() {
        let store = BaselineStore::from_raw(&[
            weekly("Latvia", 2019, 2, 100.0),
            weekly("Estonia", 2019, 2, 50.0),
            weekly("Estonia", 2019, 7, 40.0),
        ])
        .unwrap();
        let world = store.series("world");
        assert_eq!(world.len(), 2);
        assert_eq!(world[0].country_name, WORLD);
        assert_eq!(world[0].deaths_allcause, 150.0);
        assert_eq!(world[1].deaths_allcause, 40.0);
    }

    #[test]
    fn series_lookup_ignores_case() {
        let store = BaselineStore::from_raw(&[weekly("Lithuania", 2019, 2, 10.0)]).unwrap();
        assert_eq!(store.series("LITHUANIA").len(), 1);
        assert_eq!(store.series(" lithuania ").len(), 1);
        assert!(store.series("Poland").is_empty());

        let store = BaselineStore::from_raw(&[weekly("Réunion", 2019, 2, 10.0)]).unwrap();
        assert_eq!(store.series("RÉUNION").len(), 1);
    }

    #[test]
    fn loads_csv_export() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "iso3c,country_name,year,time,time_unit,deaths").unwrap();
        writeln!(file, "LTU,Lithuania,2021,1,weekly,700").unwrap();
        writeln!(file, "LTU,Lithuania,2021,2,weekly,800").unwrap();
        writeln!(file, "PER,Peru,2021,1,monthly,9000").unwrap();
        file.flush().unwrap();

        let store = BaselineStore::load_csv(file.path()).unwrap();
        let series = store.series("Lithuania");
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].deaths_allcause, 1500.0);
        assert_eq!(store.countries().into_iter().collect::<Vec<_>>(), vec!["Lithuania"]);
    }

    #[test]
    fn csv_without_time_unit_is_a_format_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "country_name,year,time,deaths").unwrap();
        writeln!(file, "Lithuania,2021,1,700").unwrap();
        file.flush().unwrap();

        let err = BaselineStore::load_csv(file.path()).unwrap_err();
        assert!(matches!(err, PipelineError::DataFormat(_)));
    }
}
