use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Timestamp parse error: {0}")]
    Timestamp(#[from] chrono::ParseError),

    #[error("Input table '{table}' not found at {path}")]
    MissingTable { table: String, path: String },

    #[error("Input table '{table}' is empty")]
    EmptyTable { table: String },

    #[error("Malformed row {row} in '{table}': {reason}")]
    MalformedRow { table: String, row: usize, reason: String },

    #[error("Not enough data for {what}: need {needed}, got {actual}")]
    InsufficientData { what: String, needed: usize, actual: usize },

    #[error("Invalid experiment design: {0}")]
    InvalidDesign(String),

    #[error("Distribution error: {0}")]
    Distribution(String),

    #[error("Stage '{name}' not found")]
    StageNotFound { name: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
