use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Synthetic country name for cross-country sums.
pub const WORLD: &str = "World";

/// Case- and whitespace-insensitive form of a country name.
pub fn country_key(country: &str) -> String {
    country.trim().to_lowercase()
}

pub fn same_country(a: &str, b: &str) -> bool {
    country_key(a) == country_key(b)
}

pub fn is_world(country: &str) -> bool {
    same_country(country, WORLD)
}

/// One row of the world mortality CSV export.
#[derive(Debug, Clone, Deserialize)]
pub struct RawMortalityRow {
    pub country_name: String,
    pub year: i32,
    pub time: u32,
    pub time_unit: String,
    pub deaths: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyBaselineRecord {
    pub country_name: String,
    pub year: i32,
    pub month: u32,
    pub deaths_allcause: f64,
}

/// Daily case/death row as stored in the ECDC source table.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyCovidRow {
    pub country_region: String,
    pub date: NaiveDate,
    pub cases: Option<f64>,
    pub deaths: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyPandemicRecord {
    pub country_name: String,
    pub year: i32,
    pub month: u32,
    pub deaths_covid: Option<f64>,
    pub cases_covid: Option<f64>,
}

/// Weekly case/death row as stored in the weekly ECDC source table.
#[derive(Debug, Clone, PartialEq)]
pub struct WeeklyCovidRow {
    pub country_region: String,
    pub date: NaiveDate,
    pub cases_weekly: Option<f64>,
    pub deaths_weekly: Option<f64>,
    pub population: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklyPandemicRecord {
    pub country_name: String,
    pub date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cases_weekly: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deaths_weekly: Option<f64>,
    pub population: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VaccinationRecord {
    pub country_name: String,
    pub date: NaiveDate,
    pub people_vaccinated: Option<f64>,
    pub people_fully_vaccinated: Option<f64>,
    pub total_vaccinations: Option<f64>,
    pub population: Option<f64>,
}

/// Baseline and pandemic deaths for one country-month.
///
/// `deaths_allcause` is only `None` under the outer join policy, for months
/// the baseline does not cover. `deaths_without_covid` stays `None` until
/// the counterfactual is annotated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedRecord {
    pub country_name: String,
    pub year: i32,
    pub month: u32,
    pub deaths_allcause: Option<f64>,
    pub deaths_covid: f64,
    pub deaths_without_covid: Option<f64>,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastSeriesPoint {
    pub country_name: String,
    pub date: NaiveDate,
    pub observed: Option<f64>,
    pub forecast: Option<f64>,
    pub observed_total: f64,
    pub forecast_total: f64,
}

/// Yearly pandemic totals for one country, the clustering input.
#[derive(Debug, Clone, PartialEq)]
pub struct ImpactRow {
    pub country: String,
    pub year: i32,
    pub deaths: Option<f64>,
    pub cases: Option<f64>,
    pub population: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountryFeatureVector {
    pub country: String,
    pub deaths_2020_per100k: f64,
    pub deaths_2021_per100k: f64,
    pub deaths_2022_per100k: f64,
    pub cases_2020_per100k: f64,
    pub cases_2021_per100k: f64,
    pub cases_2022_per100k: f64,
    pub cluster: usize,
}

impl CountryFeatureVector {
    pub fn deaths(&self) -> [f64; 3] {
        [
            self.deaths_2020_per100k,
            self.deaths_2021_per100k,
            self.deaths_2022_per100k,
        ]
    }

    pub fn cases(&self) -> [f64; 3] {
        [
            self.cases_2020_per100k,
            self.cases_2021_per100k,
            self.cases_2022_per100k,
        ]
    }
}

pub fn month_start(year: i32, month: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1)
}
