use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{Datelike, NaiveDate};

use crate::error::{PipelineError, Result};
use crate::models::{
    is_world, same_country, DailyCovidRow, MonthlyPandemicRecord, VaccinationRecord,
    WeeklyCovidRow, WeeklyPandemicRecord, WORLD,
};

/// Pandemic source tables the pipeline reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceTable {
    EcdcGlobal,
    EcdcGlobalWeekly,
    OwidVaccinations,
}

/// Source column name to canonical field name, per table.
const ECDC_GLOBAL_COLUMNS: &[(&str, &str)] = &[
    ("COUNTRY_REGION", "country_name"),
    ("DATE", "date"),
    ("CASES", "cases_covid"),
    ("DEATHS", "deaths_covid"),
    ("POPULATION", "population"),
];

const ECDC_GLOBAL_WEEKLY_COLUMNS: &[(&str, &str)] = &[
    ("COUNTRY_REGION", "country_name"),
    ("DATE", "date"),
    ("CASES_WEEKLY", "cases_weekly"),
    ("DEATHS_WEEKLY", "deaths_weekly"),
    ("POPULATION", "population"),
];

const OWID_VACCINATIONS_COLUMNS: &[(&str, &str)] = &[
    ("COUNTRY_REGION", "country_name"),
    ("DATE", "date"),
    ("PEOPLE_VACCINATED", "people_vaccinated"),
    ("PEOPLE_FULLY_VACCINATED", "people_fully_vaccinated"),
    ("TOTAL_VACCINATIONS", "total_vaccinations"),
];

impl SourceTable {
    pub const ALL: [SourceTable; 3] = [
        SourceTable::EcdcGlobal,
        SourceTable::EcdcGlobalWeekly,
        SourceTable::OwidVaccinations,
    ];

    /// Accepts the upstream table name in any case.
    pub fn parse(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|table| table.source_name().eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| PipelineError::InvalidArgument(format!("invalid table name: {name}")))
    }

    pub fn source_name(self) -> &'static str {
        match self {
            SourceTable::EcdcGlobal => "ECDC_GLOBAL",
            SourceTable::EcdcGlobalWeekly => "ECDC_GLOBAL_WEEKLY",
            SourceTable::OwidVaccinations => "OWID_VACCINATIONS",
        }
    }

    /// Qualified Postgres table holding this source.
    pub fn relation(self) -> &'static str {
        match self {
            SourceTable::EcdcGlobal => "covid.ecdc_global",
            SourceTable::EcdcGlobalWeekly => "covid.ecdc_global_weekly",
            SourceTable::OwidVaccinations => "covid.owid_vaccinations",
        }
    }

    pub fn column_map(self) -> &'static [(&'static str, &'static str)] {
        match self {
            SourceTable::EcdcGlobal => ECDC_GLOBAL_COLUMNS,
            SourceTable::EcdcGlobalWeekly => ECDC_GLOBAL_WEEKLY_COLUMNS,
            SourceTable::OwidVaccinations => OWID_VACCINATIONS_COLUMNS,
        }
    }

    pub fn canonical(self, source_column: &str) -> Option<&'static str> {
        self.column_map()
            .iter()
            .find(|(source, _)| source.eq_ignore_ascii_case(source_column.trim()))
            .map(|(_, canonical)| *canonical)
    }

    /// Maps each source column to its position in `headers`.
    ///
    /// Every mapped column must be present; unmapped extra headers are ignored.
    pub fn resolve_headers<'a, I>(self, headers: I) -> Result<HashMap<&'static str, usize>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut positions = HashMap::new();
        for (index, header) in headers.into_iter().enumerate() {
            if let Some(canonical) = self.canonical(header) {
                positions.insert(canonical, index);
            }
        }

        let missing: Vec<&str> = self
            .column_map()
            .iter()
            .filter(|(_, canonical)| !positions.contains_key(canonical))
            .map(|(source, _)| *source)
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::DataFormat(format!(
                "{} is missing columns: {}",
                self.source_name(),
                missing.join(", ")
            )));
        }
        Ok(positions)
    }
}

impl fmt::Display for SourceTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.source_name())
    }
}

fn add_opt(total: &mut Option<f64>, value: Option<f64>) {
    if let Some(value) = value {
        *total = Some(total.unwrap_or(0.0) + value);
    }
}

/// Sums daily rows into calendar months per country.
///
/// A month whose rows carry no values for a metric keeps `None` for it.
pub fn aggregate_monthly(rows: &[DailyCovidRow]) -> Vec<MonthlyPandemicRecord> {
    let mut totals: BTreeMap<(String, i32, u32), (Option<f64>, Option<f64>)> = BTreeMap::new();
    for row in rows {
        let entry = totals
            .entry((row.country_region.clone(), row.date.year(), row.date.month()))
            .or_insert((None, None));
        add_opt(&mut entry.0, row.deaths);
        add_opt(&mut entry.1, row.cases);
    }

    totals
        .into_iter()
        .map(
            |((country_name, year, month), (deaths_covid, cases_covid))| MonthlyPandemicRecord {
                country_name,
                year,
                month,
                deaths_covid,
                cases_covid,
            },
        )
        .collect()
}

/// Collapses the country dimension: one `World` row per month.
pub fn aggregate_monthly_world(rows: &[DailyCovidRow]) -> Vec<MonthlyPandemicRecord> {
    let mut totals: BTreeMap<(i32, u32), (Option<f64>, Option<f64>)> = BTreeMap::new();
    for row in rows {
        let entry = totals
            .entry((row.date.year(), row.date.month()))
            .or_insert((None, None));
        add_opt(&mut entry.0, row.deaths);
        add_opt(&mut entry.1, row.cases);
    }

    totals
        .into_iter()
        .map(|((year, month), (deaths_covid, cases_covid))| MonthlyPandemicRecord {
            country_name: WORLD.to_string(),
            year,
            month,
            deaths_covid,
            cases_covid,
        })
        .collect()
}

/// Monthly series for `country`, or the world sum for `World`.
pub fn monthly_series(rows: &[DailyCovidRow], country: &str) -> Vec<MonthlyPandemicRecord> {
    if is_world(country) {
        return aggregate_monthly_world(rows);
    }
    let matching: Vec<DailyCovidRow> = rows
        .iter()
        .filter(|row| same_country(&row.country_region, country))
        .cloned()
        .collect();
    aggregate_monthly(&matching)
}

/// Which weekly metric a caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum WeeklyMetric {
    Cases,
    Deaths,
}

/// Weekly cases or deaths, date-ordered; `World` sums every country per date.
pub fn weekly_series(
    rows: &[WeeklyCovidRow],
    country: &str,
    metric: WeeklyMetric,
) -> Vec<WeeklyPandemicRecord> {
    let pick = |row: &WeeklyCovidRow| match metric {
        WeeklyMetric::Cases => (row.cases_weekly, None),
        WeeklyMetric::Deaths => (None, row.deaths_weekly),
    };

    if is_world(country) {
        let mut totals: BTreeMap<NaiveDate, (Option<f64>, Option<f64>, Option<f64>)> =
            BTreeMap::new();
        for row in rows {
            let (cases, deaths) = pick(row);
            let entry = totals.entry(row.date).or_insert((None, None, None));
            add_opt(&mut entry.0, cases);
            add_opt(&mut entry.1, deaths);
            add_opt(&mut entry.2, row.population);
        }
        return totals
            .into_iter()
            .map(|(date, (cases_weekly, deaths_weekly, population))| WeeklyPandemicRecord {
                country_name: WORLD.to_string(),
                date,
                cases_weekly,
                deaths_weekly,
                population,
            })
            .collect();
    }

    let mut series: Vec<WeeklyPandemicRecord> = rows
        .iter()
        .filter(|row| same_country(&row.country_region, country))
        .map(|row| {
            let (cases_weekly, deaths_weekly) = pick(row);
            WeeklyPandemicRecord {
                country_name: row.country_region.clone(),
                date: row.date,
                cases_weekly,
                deaths_weekly,
                population: row.population,
            }
        })
        .collect();
    series.sort_by_key(|record| record.date);
    series
}

/// Sums vaccination counts per date and attaches the world population.
pub fn world_vaccinations(
    rows: &[VaccinationRecord],
    world_population: Option<f64>,
) -> Vec<VaccinationRecord> {
    let mut totals: BTreeMap<NaiveDate, [Option<f64>; 3]> = BTreeMap::new();
    for row in rows {
        let entry = totals.entry(row.date).or_insert([None; 3]);
        add_opt(&mut entry[0], row.people_vaccinated);
        add_opt(&mut entry[1], row.people_fully_vaccinated);
        add_opt(&mut entry[2], row.total_vaccinations);
    }

    totals
        .into_iter()
        .map(|(date, [people, fully, total])| VaccinationRecord {
            country_name: WORLD.to_string(),
            date,
            people_vaccinated: people,
            people_fully_vaccinated: fully,
            total_vaccinations: total,
            population: world_population,
        })
        .collect()
}
