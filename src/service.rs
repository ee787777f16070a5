use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sqlx::PgPool;
use tracing::debug;

use crate::baseline::BaselineStore;
use crate::cluster::{self, ClusterProfile};
use crate::counterfactual;
use crate::db;
use crate::eda::{self, EdaSummary};
use crate::error::{PipelineError, Result};
use crate::forecast;
use crate::merge::{self, JoinPolicy};
use crate::models::{
    country_key, is_world, CountryFeatureVector, ForecastSeriesPoint, MergedRecord,
    MonthlyBaselineRecord, MonthlyPandemicRecord, VaccinationRecord, WeeklyPandemicRecord, WORLD,
};
use crate::pandemic::{self, SourceTable, WeeklyMetric};
use crate::table::Table;

/// Keeps typed pipeline errors raised below the database layer; anything
/// else coming out of it is an upstream failure.
fn upstream(err: anyhow::Error) -> PipelineError {
    match err.downcast::<PipelineError>() {
        Ok(err) => err,
        Err(err) => PipelineError::UpstreamSource(format!("{err:#}")),
    }
}

/// `None` for the synthetic world country so queries load every country.
fn country_scope(country: &str) -> Option<&str> {
    (!is_world(country)).then_some(country)
}

/// Database countries that also have baseline data, in baseline spelling.
pub fn intersect_countries<'a, I>(
    database: I,
    baseline: &std::collections::BTreeSet<&str>,
    include_world: bool,
) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let by_key: BTreeMap<String, &str> = baseline
        .iter()
        .map(|name| (country_key(name), *name))
        .collect();
    let mut countries: Vec<String> = database
        .into_iter()
        .filter_map(|name| by_key.get(&country_key(name)))
        .map(|name| name.to_string())
        .collect();
    countries.sort();
    countries.dedup();
    if include_world {
        countries.insert(0, WORLD.to_string());
    }
    countries
}

/// Entry point for every pipeline read.
///
/// The baseline store is shared read-only; pandemic data is fetched fresh
/// from Postgres on each call.
#[derive(Clone)]
pub struct Pipeline {
    baseline: Arc<BaselineStore>,
    pool: PgPool,
    reports_dir: PathBuf,
}

impl Pipeline {
    pub fn new(baseline: Arc<BaselineStore>, pool: PgPool, reports_dir: impl Into<PathBuf>) -> Self {
        Self {
            baseline,
            pool,
            reports_dir: reports_dir.into(),
        }
    }

    pub fn reports_dir(&self) -> &Path {
        &self.reports_dir
    }

    pub fn get_baseline_series(&self, country: &str) -> Vec<MonthlyBaselineRecord> {
        self.baseline.series(country)
    }

    pub async fn get_pandemic_series(&self, country: &str) -> Result<Vec<MonthlyPandemicRecord>> {
        let rows = db::fetch_daily_rows(&self.pool, country_scope(country))
            .await
            .map_err(upstream)?;
        Ok(pandemic::monthly_series(&rows, country))
    }

    /// Baseline joined with pandemic deaths, annotated, ordered by date.
    pub async fn merge_and_annotate(
        &self,
        country: &str,
        policy: JoinPolicy,
    ) -> Result<Vec<MergedRecord>> {
        let baseline = self.get_baseline_series(country);
        let pandemic = self.get_pandemic_series(country).await?;
        let mut merged = counterfactual::annotate(merge::merge(&baseline, &pandemic, policy)?);
        merged.sort_by(|a, b| {
            a.date
                .cmp(&b.date)
                .then_with(|| a.country_name.cmp(&b.country_name))
        });
        Ok(merged)
    }

    pub fn forecast(&self, country: &str, horizon_months: u32) -> Result<Vec<ForecastSeriesPoint>> {
        forecast::forecast(country, &self.baseline.series(country), horizon_months)
    }

    pub async fn cluster(&self, k: usize) -> Result<Vec<CountryFeatureVector>> {
        let rows = db::fetch_impact_rows(&self.pool).await.map_err(upstream)?;
        cluster::cluster(&rows, k)
    }

    pub async fn explain(&self, k: usize) -> Result<Vec<ClusterProfile>> {
        Ok(cluster::explain_clusters(&self.cluster(k).await?))
    }

    pub async fn load_table(&self, table_name: &str) -> Result<Table> {
        let table = SourceTable::parse(table_name)?;
        db::fetch_table(&self.pool, table).await.map_err(upstream)
    }

    /// Profiles an allow-listed source table and writes its preview file.
    pub async fn describe(&self, table_name: &str) -> Result<EdaSummary> {
        let table = self.load_table(table_name).await?;
        Ok(eda::describe_with_preview(&table, &self.reports_dir))
    }

    pub fn describe_csv(&self, path: &Path) -> Result<EdaSummary> {
        let table = Table::from_csv_path(path)?;
        Ok(eda::describe_with_preview(&table, &self.reports_dir))
    }

    pub async fn detailed_report(&self, table_name: &str) -> Result<Vec<u8>> {
        let table = self.load_table(table_name).await?;
        let summary = eda::describe(&table);
        Ok(eda::detailed_report(&table, &summary))
    }

    pub async fn countries(&self, table_name: &str, include_world: bool) -> Result<Vec<String>> {
        let table = SourceTable::parse(table_name)?;
        let database = db::fetch_countries(&self.pool, table)
            .await
            .map_err(upstream)?;
        let countries = intersect_countries(
            database.iter().map(String::as_str),
            &self.baseline.countries(),
            include_world,
        );
        debug!(table = %table, countries = countries.len(), "countries listed");
        Ok(countries)
    }

    pub async fn get_weekly_series(
        &self,
        country: &str,
        metric: WeeklyMetric,
    ) -> Result<Vec<WeeklyPandemicRecord>> {
        let rows = db::fetch_weekly_rows(&self.pool, country_scope(country))
            .await
            .map_err(upstream)?;
        Ok(pandemic::weekly_series(&rows, country, metric))
    }

    pub async fn get_vaccination_series(&self, country: &str) -> Result<Vec<VaccinationRecord>> {
        let rows = db::fetch_vaccinations(&self.pool, country_scope(country))
            .await
            .map_err(upstream)?;
        if !is_world(country) {
            return Ok(rows);
        }
        let population = db::fetch_world_population(&self.pool)
            .await
            .map_err(upstream)?;
        Ok(pandemic::world_vaccinations(&rows, population))
    }
}
