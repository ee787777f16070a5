use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{ArgGroup, Parser, Subcommand};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tracing::warn;

mod baseline;
mod cluster;
mod config;
mod counterfactual;
mod db;
mod eda;
mod error;
mod forecast;
mod merge;
mod models;
mod pandemic;
mod report;
mod service;
mod table;
mod trend;

use crate::baseline::BaselineStore;
use crate::config::Settings;
use crate::error::PipelineError;
use crate::merge::JoinPolicy;
use crate::pandemic::{SourceTable, WeeklyMetric};
use crate::service::Pipeline;
use crate::table::Table;

#[derive(Parser)]
#[command(name = "excess-mortality")]
#[command(about = "Excess mortality analytics over baseline and COVID-19 sources", long_about = None)]
struct Cli {
    /// Log verbosity (error, warn, info, debug, trace); logs go to stderr
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the covid source tables
    InitDb,
    /// Load a small Baltic fixture set
    Seed,
    /// Import an ECDC or OWID CSV export
    Import {
        /// ECDC_GLOBAL, ECDC_GLOBAL_WEEKLY or OWID_VACCINATIONS
        #[arg(long)]
        table: String,
        #[arg(long)]
        csv: PathBuf,
    },
    /// List countries present in both a source table and the baseline
    Countries {
        #[arg(long, default_value = "ECDC_GLOBAL")]
        table: String,
        #[arg(long)]
        include_world: bool,
    },
    /// Monthly all-cause deaths
    Baseline {
        #[arg(long)]
        country: String,
    },
    /// Monthly COVID-19 deaths and cases
    Pandemic {
        #[arg(long)]
        country: String,
    },
    /// Weekly COVID-19 cases or deaths
    Weekly {
        #[arg(long)]
        country: String,
        #[arg(long, value_enum, default_value = "cases")]
        metric: WeeklyMetric,
    },
    /// Vaccination counts with population
    Vaccinations {
        #[arg(long)]
        country: String,
    },
    /// Merged baseline and COVID deaths with deaths without COVID
    Excess {
        #[arg(long)]
        country: String,
        /// inner keeps months in both sources, outer keeps every month
        #[arg(long, default_value = "inner")]
        join: JoinPolicy,
    },
    /// Observed vs expected monthly deaths
    Forecast {
        #[arg(long)]
        country: String,
        #[arg(long, default_value_t = forecast::DEFAULT_HORIZON_MONTHS)]
        horizon_months: u32,
    },
    /// Cluster countries by per-capita pandemic impact
    Cluster {
        #[arg(short, long, default_value_t = cluster::DEFAULT_K)]
        k: usize,
        /// Print per-cluster profiles instead of country rows
        #[arg(long)]
        explain: bool,
    },
    /// Descriptive statistics for a source table or CSV file
    #[command(group(
        ArgGroup::new("source")
            .args(["table", "csv"])
            .required(true)
            .multiple(false)
    ))]
    Eda {
        #[arg(long)]
        table: Option<String>,
        #[arg(long)]
        csv: Option<PathBuf>,
        /// Also write an HTML profile to the reports directory
        #[arg(long)]
        detailed: bool,
    },
    /// Generate a markdown excess mortality report
    Report {
        #[arg(long)]
        country: String,
        #[arg(long, default_value_t = forecast::DEFAULT_HORIZON_MONTHS)]
        horizon_months: u32,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

/// Report name and HTML bytes for the table or CSV being profiled.
async fn render_detailed(
    pipeline: &Pipeline,
    table: Option<&str>,
    csv: Option<&Path>,
) -> error::Result<(String, Vec<u8>)> {
    if let Some(name) = table {
        let relation = SourceTable::parse(name)?.relation();
        return Ok((relation.to_string(), pipeline.detailed_report(name).await?));
    }
    let path = csv.ok_or_else(|| {
        PipelineError::InvalidArgument("either --table or --csv is required".to_string())
    })?;
    let table = Table::from_csv_path(path)?;
    let summary = eda::describe(&table);
    Ok((table.name().to_string(), eda::detailed_report(&table, &summary)))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings::from_env()?;
    let pool = PgPoolOptions::new()
        .max_connections(settings.db_max_connections)
        .connect(&settings.database_url)
        .await
        .context("failed to connect to Postgres")?;

    let command = match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
            return Ok(());
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
            return Ok(());
        }
        Commands::Import { table, csv } => {
            let table = SourceTable::parse(&table)?;
            let imported = db::import_csv(&pool, table, &csv).await?;
            println!("Imported {imported} rows into {table} from {}.", csv.display());
            return Ok(());
        }
        command => command,
    };

    let baseline = BaselineStore::load_csv(&settings.mortality_csv).with_context(|| {
        format!(
            "failed to load baseline mortality from {}",
            settings.mortality_csv.display()
        )
    })?;
    let pipeline = Pipeline::new(Arc::new(baseline), pool, settings.reports_dir.clone());

    match command {
        Commands::Countries {
            table,
            include_world,
        } => print_json(&pipeline.countries(&table, include_world).await?)?,
        Commands::Baseline { country } => print_json(&pipeline.get_baseline_series(&country))?,
        Commands::Pandemic { country } => {
            print_json(&pipeline.get_pandemic_series(&country).await?)?
        }
        Commands::Weekly { country, metric } => {
            print_json(&pipeline.get_weekly_series(&country, metric).await?)?
        }
        Commands::Vaccinations { country } => {
            print_json(&pipeline.get_vaccination_series(&country).await?)?
        }
        Commands::Excess { country, join } => {
            print_json(&pipeline.merge_and_annotate(&country, join).await?)?
        }
        Commands::Forecast {
            country,
            horizon_months,
        } => print_json(&pipeline.forecast(&country, horizon_months)?)?,
        Commands::Cluster { k, explain } => {
            if explain {
                print_json(&pipeline.explain(k).await?)?
            } else {
                print_json(&pipeline.cluster(k).await?)?
            }
        }
        Commands::Eda {
            table,
            csv,
            detailed,
        } => {
            let summary = match (&table, &csv) {
                (Some(name), _) => pipeline.describe(name).await?,
                (None, Some(path)) => pipeline.describe_csv(path)?,
                (None, None) => anyhow::bail!("either --table or --csv is required"),
            };
            print_json(&summary)?;

            if detailed {
                match render_detailed(&pipeline, table.as_deref(), csv.as_deref()).await {
                    Ok((name, html)) => {
                        if let Some(path) = eda::write_report(pipeline.reports_dir(), &name, &html) {
                            eprintln!("Detailed report written to {}.", path.display());
                        }
                    }
                    Err(err) => warn!(error = %err, "detailed EDA report unavailable"),
                }
            }
        }
        Commands::Report {
            country,
            horizon_months,
            out,
        } => {
            let excess = match pipeline.forecast(&country, horizon_months) {
                Ok(points) => forecast::excess_summary(&points),
                Err(PipelineError::InsufficientTrainingData { .. }) => None,
                Err(err) => return Err(err.into()),
            };
            let merged = pipeline
                .merge_and_annotate(&country, JoinPolicy::Inner)
                .await?;
            let report = report::build_report(&country, horizon_months, excess.as_ref(), &merged);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::InitDb | Commands::Seed | Commands::Import { .. } => {}
    }

    Ok(())
}
