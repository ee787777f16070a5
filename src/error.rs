use thiserror::Error;

/// Failures the analytics pipeline surfaces to its callers.
///
/// Empty inputs (no rows for a country, no overlapping months, too few
/// countries to cluster) are not errors; those resolve to empty results.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Source rows are structurally broken (missing fields, unknown units).
    #[error("data format error: {0}")]
    DataFormat(String),

    /// No pre-2020 observations to fit the seasonal baseline on.
    #[error("no training data available for {country}")]
    InsufficientTrainingData { country: String },

    /// The baseline file or the pandemic database could not be read.
    #[error("upstream source error: {0}")]
    UpstreamSource(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Numerical failure inside a model fit.
    #[error("computation error: {0}")]
    Computation(String),
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        PipelineError::UpstreamSource(err.to_string())
    }
}

impl From<csv::Error> for PipelineError {
    fn from(err: csv::Error) -> Self {
        PipelineError::UpstreamSource(err.to_string())
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::UpstreamSource(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
