use std::path::Path;

use anyhow::{bail, Context};
use chrono::NaiveDate;
use sqlx::{Column as _, PgPool, Row, TypeInfo};
use tracing::{debug, info};

use crate::models::{DailyCovidRow, ImpactRow, VaccinationRecord, WeeklyCovidRow};
use crate::pandemic::SourceTable;
use crate::table::{Column, ColumnType, Table, Value};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// (country, population, [(year, daily deaths, daily cases)])
type SeedCountry = (&'static str, f64, [(i32, f64, f64); 3]);

const SEED_COUNTRIES: [SeedCountry; 3] = [
    (
        "Lithuania",
        2_794_700.0,
        [(2020, 5.0, 420.0), (2021, 16.0, 1_150.0), (2022, 7.0, 2_300.0)],
    ),
    (
        "Latvia",
        1_907_675.0,
        [(2020, 2.0, 120.0), (2021, 9.0, 640.0), (2022, 6.0, 1_700.0)],
    ),
    (
        "Estonia",
        1_324_820.0,
        [(2020, 1.0, 80.0), (2021, 5.0, 650.0), (2022, 4.0, 1_250.0)],
    ),
];

fn seed_date(year: i32, month: u32, day: u32) -> anyhow::Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day).context("invalid date")
}

/// Inserts a small Baltic fixture set into all three source tables.
pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;

    for (country, population, years) in SEED_COUNTRIES {
        for (year, deaths, cases) in years {
            for month in 1..=12 {
                sqlx::query(
                    r#"
                    INSERT INTO covid.ecdc_global (country_region, date, cases, deaths, population)
                    VALUES ($1, $2, $3, $4, $5)
                    ON CONFLICT (country_region, date) DO UPDATE
                    SET cases = EXCLUDED.cases, deaths = EXCLUDED.deaths,
                        population = EXCLUDED.population
                    "#,
                )
                .bind(country)
                .bind(seed_date(year, month, 15)?)
                .bind(cases)
                .bind(deaths)
                .bind(population)
                .execute(&mut *tx)
                .await?;

                sqlx::query(
                    r#"
                    INSERT INTO covid.ecdc_global_weekly
                    (country_region, date, cases_weekly, deaths_weekly, population)
                    VALUES ($1, $2, $3, $4, $5)
                    ON CONFLICT (country_region, date) DO UPDATE
                    SET cases_weekly = EXCLUDED.cases_weekly,
                        deaths_weekly = EXCLUDED.deaths_weekly,
                        population = EXCLUDED.population
                    "#,
                )
                .bind(country)
                .bind(seed_date(year, month, 7)?)
                .bind(cases * 7.0)
                .bind(deaths * 7.0)
                .bind(population)
                .execute(&mut *tx)
                .await?;
            }
        }

        // One vaccination snapshot per half year from 2021 on.
        for (step, (year, month)) in [(2021, 6), (2021, 12), (2022, 6), (2022, 12)]
            .into_iter()
            .enumerate()
        {
            let share = 0.2 * (step + 1) as f64;
            sqlx::query(
                r#"
                INSERT INTO covid.owid_vaccinations
                (country_region, date, people_vaccinated, people_fully_vaccinated,
                 total_vaccinations)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (country_region, date) DO NOTHING
                "#,
            )
            .bind(country)
            .bind(seed_date(year, month, 30)?)
            .bind((population * share).round())
            .bind((population * share * 0.9).round())
            .bind((population * share * 2.1).round())
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;
    Ok(())
}

fn parse_source_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%d/%m/%Y"))
        .ok()
}

fn parse_measure(raw: &str) -> anyhow::Result<Option<f64>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    let value = raw
        .parse::<f64>()
        .with_context(|| format!("invalid number {raw:?}"))?;
    Ok(Some(value))
}

/// Loads an upstream CSV export into `table`, upserting on (country, date).
///
/// Headers are mapped through the table's column map; extra columns are
/// ignored and a missing mapped column fails the whole import.
pub async fn import_csv(pool: &PgPool, table: SourceTable, csv_path: &Path) -> anyhow::Result<usize> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let positions = table.resolve_headers(reader.headers()?.iter())?;

    let columns: Vec<String> = table
        .column_map()
        .iter()
        .map(|(source, _)| source.to_ascii_lowercase())
        .collect();
    let fields: Vec<usize> = table
        .column_map()
        .iter()
        .filter_map(|(_, canonical)| positions.get(canonical).copied())
        .collect();
    let [country_col, date_col, first, second, third] = columns.as_slice() else {
        bail!("{table} does not have five mapped columns");
    };
    let sql = format!(
        "INSERT INTO {relation} ({country_col}, {date_col}, {first}, {second}, {third}) \
         VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT ({country_col}, {date_col}) DO UPDATE \
         SET {first} = EXCLUDED.{first}, {second} = EXCLUDED.{second}, \
         {third} = EXCLUDED.{third}",
        relation = table.relation(),
    );

    let mut tx = pool.begin().await?;
    let mut imported = 0usize;
    for (index, record) in reader.records().enumerate() {
        let record = record?;
        let line = index + 2;
        let field = |position: usize| record.get(fields[position]).unwrap_or("");

        let country = field(0).trim();
        if country.is_empty() {
            bail!("line {line}: empty country");
        }
        let date = parse_source_date(field(1))
            .with_context(|| format!("line {line}: invalid date {:?}", field(1)))?;

        let result = sqlx::query(&sql)
            .bind(country)
            .bind(date)
            .bind(parse_measure(field(2)).with_context(|| format!("line {line}"))?)
            .bind(parse_measure(field(3)).with_context(|| format!("line {line}"))?)
            .bind(parse_measure(field(4)).with_context(|| format!("line {line}"))?)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() > 0 {
            imported += 1;
        }
    }
    tx.commit().await?;

    info!(table = %table, rows = imported, "csv imported");
    Ok(imported)
}

/// Appends a case-insensitive country filter when `country` is given.
fn country_filter(query: &mut String, column: &str, country: Option<&str>) {
    if country.is_some() {
        query.push_str(&format!(" WHERE UPPER({column}) = $1"));
    }
}

fn upper(country: Option<&str>) -> Option<String> {
    country.map(|value| value.trim().to_uppercase())
}

/// Daily rows for one country, or every country when `country` is `None`.
pub async fn fetch_daily_rows(
    pool: &PgPool,
    country: Option<&str>,
) -> anyhow::Result<Vec<DailyCovidRow>> {
    let mut query =
        String::from("SELECT country_region, date, cases, deaths FROM covid.ecdc_global");
    country_filter(&mut query, "country_region", country);
    query.push_str(" ORDER BY country_region, date");

    let mut rows = sqlx::query(&query);
    if let Some(value) = upper(country) {
        rows = rows.bind(value);
    }

    let mut conn = pool.acquire().await?;
    let records = rows.fetch_all(&mut *conn).await?;
    debug!(rows = records.len(), "daily rows fetched");

    let mut daily = Vec::with_capacity(records.len());
    for row in records {
        daily.push(DailyCovidRow {
            country_region: row.try_get("country_region")?,
            date: row.try_get("date")?,
            cases: row.try_get("cases")?,
            deaths: row.try_get("deaths")?,
        });
    }
    Ok(daily)
}

pub async fn fetch_weekly_rows(
    pool: &PgPool,
    country: Option<&str>,
) -> anyhow::Result<Vec<WeeklyCovidRow>> {
    let mut query = String::from(
        "SELECT country_region, date, cases_weekly, deaths_weekly, population \
         FROM covid.ecdc_global_weekly",
    );
    country_filter(&mut query, "country_region", country);
    query.push_str(" ORDER BY date, country_region");

    let mut rows = sqlx::query(&query);
    if let Some(value) = upper(country) {
        rows = rows.bind(value);
    }

    let mut conn = pool.acquire().await?;
    let records = rows.fetch_all(&mut *conn).await?;

    let mut weekly = Vec::with_capacity(records.len());
    for row in records {
        weekly.push(WeeklyCovidRow {
            country_region: row.try_get("country_region")?,
            date: row.try_get("date")?,
            cases_weekly: row.try_get("cases_weekly")?,
            deaths_weekly: row.try_get("deaths_weekly")?,
            population: row.try_get("population")?,
        });
    }
    Ok(weekly)
}

/// Yearly death/case totals and the largest reported population per country.
pub async fn fetch_impact_rows(pool: &PgPool) -> anyhow::Result<Vec<ImpactRow>> {
    let mut conn = pool.acquire().await?;
    let records = sqlx::query(
        r#"
        SELECT country_region,
               EXTRACT(YEAR FROM date)::INT4 AS year,
               SUM(deaths) AS deaths,
               SUM(cases) AS cases,
               MAX(population) AS population
        FROM covid.ecdc_global
        GROUP BY country_region, EXTRACT(YEAR FROM date)
        ORDER BY country_region, year
        "#,
    )
    .fetch_all(&mut *conn)
    .await?;

    let mut impact = Vec::with_capacity(records.len());
    for row in records {
        impact.push(ImpactRow {
            country: row.try_get("country_region")?,
            year: row.try_get("year")?,
            deaths: row.try_get("deaths")?,
            cases: row.try_get("cases")?,
            population: row.try_get("population")?,
        });
    }
    Ok(impact)
}

pub async fn fetch_countries(pool: &PgPool, table: SourceTable) -> anyhow::Result<Vec<String>> {
    let query = format!(
        "SELECT DISTINCT country_region FROM {} ORDER BY country_region",
        table.relation()
    );
    let mut conn = pool.acquire().await?;
    let records = sqlx::query(&query).fetch_all(&mut *conn).await?;

    let mut countries = Vec::with_capacity(records.len());
    for row in records {
        countries.push(row.try_get("country_region")?);
    }
    Ok(countries)
}

/// Vaccination rows with each country's population from the daily ECDC table.
pub async fn fetch_vaccinations(
    pool: &PgPool,
    country: Option<&str>,
) -> anyhow::Result<Vec<VaccinationRecord>> {
    let mut query = String::from(
        "SELECT v.country_region, v.date, v.people_vaccinated, v.people_fully_vaccinated, \
         v.total_vaccinations, p.population \
         FROM covid.owid_vaccinations v \
         LEFT JOIN (SELECT UPPER(country_region) AS country_key, MAX(population) AS population \
                    FROM covid.ecdc_global GROUP BY UPPER(country_region)) p \
         ON p.country_key = UPPER(v.country_region)",
    );
    country_filter(&mut query, "v.country_region", country);
    query.push_str(" ORDER BY v.date, v.country_region");

    let mut rows = sqlx::query(&query);
    if let Some(value) = upper(country) {
        rows = rows.bind(value);
    }

    let mut conn = pool.acquire().await?;
    let records = rows.fetch_all(&mut *conn).await?;

    let mut vaccinations = Vec::with_capacity(records.len());
    for row in records {
        vaccinations.push(VaccinationRecord {
            country_name: row.try_get("country_region")?,
            date: row.try_get("date")?,
            people_vaccinated: row.try_get("people_vaccinated")?,
            people_fully_vaccinated: row.try_get("people_fully_vaccinated")?,
            total_vaccinations: row.try_get("total_vaccinations")?,
            population: row.try_get("population")?,
        });
    }
    Ok(vaccinations)
}

/// Sum of the distinct per-country populations.
pub async fn fetch_world_population(pool: &PgPool) -> anyhow::Result<Option<f64>> {
    let mut conn = pool.acquire().await?;
    let population: Option<f64> = sqlx::query(
        r#"
        SELECT SUM(population) AS population
        FROM (SELECT DISTINCT country_region, population
              FROM covid.ecdc_global
              WHERE population IS NOT NULL) per_country
        "#,
    )
    .fetch_one(&mut *conn)
    .await?
    .try_get("population")?;
    Ok(population)
}

fn column_type(pg_type: &str) -> Option<ColumnType> {
    match pg_type {
        "INT2" | "INT4" | "INT8" => Some(ColumnType::Integer),
        "FLOAT4" | "FLOAT8" => Some(ColumnType::Float),
        "BOOL" => Some(ColumnType::Boolean),
        "DATE" => Some(ColumnType::Date),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => Some(ColumnType::Text),
        _ => None,
    }
}

fn decode_cell(row: &sqlx::postgres::PgRow, index: usize, pg_type: &str) -> anyhow::Result<Value> {
    let value = match pg_type {
        "INT2" => row.try_get::<Option<i16>, _>(index)?.map(|v| Value::Int(v.into())),
        "INT4" => row.try_get::<Option<i32>, _>(index)?.map(|v| Value::Int(v.into())),
        "INT8" => row.try_get::<Option<i64>, _>(index)?.map(Value::Int),
        "FLOAT4" => row.try_get::<Option<f32>, _>(index)?.map(|v| Value::Float(v.into())),
        "FLOAT8" => row.try_get::<Option<f64>, _>(index)?.map(Value::Float),
        "BOOL" => row.try_get::<Option<bool>, _>(index)?.map(Value::Bool),
        "DATE" => row.try_get::<Option<NaiveDate>, _>(index)?.map(Value::Date),
        _ => row.try_get::<Option<String>, _>(index)?.map(Value::Text),
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Whole source table as a generic [`Table`] for profiling.
pub async fn fetch_table(pool: &PgPool, table: SourceTable) -> anyhow::Result<Table> {
    let query = format!("SELECT * FROM {}", table.relation());
    let mut conn = pool.acquire().await?;
    let records = sqlx::query(&query).fetch_all(&mut *conn).await?;

    // An empty result carries no column metadata; fall back to the column map.
    let Some(first) = records.first() else {
        let columns = table
            .column_map()
            .iter()
            .map(|(source, _)| Column {
                name: source.to_ascii_lowercase(),
                dtype: if *source == "DATE" {
                    ColumnType::Date
                } else if *source == "COUNTRY_REGION" {
                    ColumnType::Text
                } else {
                    ColumnType::Float
                },
                values: Vec::new(),
            })
            .collect();
        return Ok(Table::new(table.relation(), columns)?);
    };

    let mut columns = Vec::with_capacity(first.columns().len());
    for column in first.columns() {
        let pg_type = column.type_info().name();
        let dtype = column_type(pg_type)
            .with_context(|| format!("unsupported column type {pg_type} for {}", column.name()))?;
        columns.push(Column {
            name: column.name().to_string(),
            dtype,
            values: Vec::with_capacity(records.len()),
        });
    }

    for row in &records {
        for (index, column) in row.columns().iter().enumerate() {
            let value = decode_cell(row, index, column.type_info().name())?;
            columns[index].values.push(value);
        }
    }

    Ok(Table::new(table.relation(), columns)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_upstream_date_layouts() {
        let expected = NaiveDate::from_ymd_opt(2020, 3, 14);
        assert_eq!(parse_source_date("2020-03-14"), expected);
        assert_eq!(parse_source_date("14/03/2020"), expected);
        assert_eq!(parse_source_date("March 14"), None);
    }

    #[test]
    fn blank_measures_are_null() {
        assert_eq!(parse_measure("").unwrap(), None);
        assert_eq!(parse_measure(" 12.5 ").unwrap(), Some(12.5));
        assert!(parse_measure("n/a").is_err());
    }

    #[test]
    fn country_filter_is_case_insensitive() {
        let mut query = String::from("SELECT * FROM covid.ecdc_global");
        country_filter(&mut query, "country_region", Some("lithuania"));
        assert!(query.ends_with("WHERE UPPER(country_region) = $1"));
        assert_eq!(upper(Some(" lithuania ")).as_deref(), Some("LITHUANIA"));

        let mut unfiltered = String::from("SELECT 1");
        country_filter(&mut unfiltered, "country_region", None);
        assert_eq!(unfiltered, "SELECT 1");
    }

    #[test]
    fn maps_postgres_types() {
        assert_eq!(column_type("INT4"), Some(ColumnType::Integer));
        assert_eq!(column_type("FLOAT8"), Some(ColumnType::Float));
        assert_eq!(column_type("TEXT"), Some(ColumnType::Text));
        assert_eq!(column_type("JSONB"), None);
    }

    #[test]
    fn seed_fixture_is_well_formed() {
        for (country, population, years) in SEED_COUNTRIES {
            assert!(!country.is_empty());
            assert!(population > 0.0);
            let listed: Vec<i32> = years.iter().map(|(year, _, _)| *year).collect();
            assert_eq!(listed, vec![2020, 2021, 2022]);
        }
    }
}
