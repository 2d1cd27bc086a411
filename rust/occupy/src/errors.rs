use std::fmt;
use std::path::PathBuf;

/// Errors raised by the occupancy estimation stages.
///
/// Every variant is fatal for the run that produced it; recoverable
/// situations (tile count reduction, no-op low-pass) are logged instead.
#[derive(Debug)]
pub enum OccupyError {
    /// The volume is not cubic or not even-sized.
    InputShape {
        shape: [usize; 3],
        context: &'static str,
    },
    /// The solvent model could not be placed inside the histogram domain.
    ModelBounds {
        /// Which threshold scan or fitting step failed.
        threshold: &'static str,
        context: String,
    },
    /// Inconsistent or out-of-range settings, detected before numeric work starts.
    Configuration { msg: String },
    /// Malformed or unsupported volumetric file.
    MrcFormat { path: Option<PathBuf>, msg: String },
    Io {
        source: std::io::Error,
        path: Option<PathBuf>,
    },
    /// The run was cancelled between two stages.
    Cancelled { stage: &'static str },
}

pub type Result<T> = std::result::Result<T, OccupyError>;

impl OccupyError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration { msg: msg.into() }
    }

    pub fn with_path(self, path: impl Into<PathBuf>) -> Self {
        match self {
            Self::Io { source, .. } => Self::Io {
                source,
                path: Some(path.into()),
            },
            Self::MrcFormat { msg, .. } => Self::MrcFormat {
                path: Some(path.into()),
                msg,
            },
            other => other,
        }
    }
}

impl fmt::Display for OccupyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OccupyError::InputShape { shape, context } => write!(
                f,
                "{} must be cubic and even-sized, got {}x{}x{}",
                context, shape[0], shape[1], shape[2]
            ),
            OccupyError::ModelBounds { threshold, context } => write!(
                f,
                "Solvent model does not fit the data domain ({}): {}",
                threshold, context
            ),
            OccupyError::Configuration { msg } => write!(f, "Invalid configuration: {}", msg),
            OccupyError::MrcFormat { path, msg } => match path {
                Some(path) => write!(f, "Invalid MRC file {}: {}", path.display(), msg),
                None => write!(f, "Invalid MRC data: {}", msg),
            },
            OccupyError::Io { source, path } => match path {
                Some(path) => write!(f, "Error accessing file {}: {}", path.display(), source),
                None => write!(f, "I/O error: {}", source),
            },
            OccupyError::Cancelled { stage } => write!(f, "Cancelled before {}", stage),
        }
    }
}

impl std::error::Error for OccupyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OccupyError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<std::io::Error> for OccupyError {
    fn from(source: std::io::Error) -> Self {
        OccupyError::Io { source, path: None }
    }
}

impl From<serde_json::Error> for OccupyError {
    fn from(e: serde_json::Error) -> Self {
        OccupyError::Configuration { msg: e.to_string() }
    }
}
