use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Error reading config {path}: {msg}")]
    Config { path: String, msg: String },

    #[error("Error setting up logging: {0}")]
    Logging(#[from] tracing::subscriber::SetGlobalDefaultError),

    #[error(transparent)]
    Occupy(#[from] occupy::OccupyError),
}
