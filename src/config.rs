use std::path::PathBuf;

use anyhow::Context;

pub const DEFAULT_MORTALITY_CSV: &str = "data/world_mortality.csv";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_REPORTS_DIR: &str = "reports";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub database_url: String,
    pub mortality_csv: PathBuf,
    pub db_max_connections: u32,
    pub reports_dir: PathBuf,
}

impl Settings {
    /// Reads settings from the process environment, after loading `.env` if present.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|value| !value.trim().is_empty())
            .context("DATABASE_URL must be set to a Postgres instance holding the covid tables")?;

        let db_max_connections = match lookup("DB_MAX_CONNECTIONS") {
            Some(raw) => {
                let value: u32 = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("DB_MAX_CONNECTIONS must be a positive integer, got {raw:?}"))?;
                anyhow::ensure!(value > 0, "DB_MAX_CONNECTIONS must be at least 1");
                value
            }
            None => DEFAULT_MAX_CONNECTIONS,
        };

        Ok(Self {
            database_url,
            mortality_csv: lookup("MORTALITY_CSV")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MORTALITY_CSV)),
            db_max_connections,
            reports_dir: lookup("REPORTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_REPORTS_DIR)),
        })
    }
}
