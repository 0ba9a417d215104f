use std::{error::Error, fmt, io, path::PathBuf};

/// The pipeline's result type.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Failures surfaced by the segmentation pipeline.
#[derive(Debug)]
pub enum PipelineError {
    /// A case could not be materialized (unknown id or malformed volume).
    Load { id: String, reason: String },

    /// A shape invariant was violated (e.g. mismatched tensor dimensions).
    ShapeMismatch {
        /// Human-readable context for the mismatch (e.g. "weights", "slices").
        what: &'static str,
        /// Observed value.
        got: usize,
        /// Expected value.
        expected: usize,
    },

    /// Writing a model artifact failed; the artifact pair must be considered invalid.
    ArtifactWrite { path: PathBuf, source: io::Error },

    /// Reading or decoding a model artifact failed.
    ArtifactRead { path: PathBuf, reason: String },

    /// The model rejected an operation.
    Model(String),

    /// An underlying I/O error not covered by the above variants.
    Io(io::Error),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Load { id, reason } => {
                write!(f, "failed to load case {id}: {reason}")
            }
            PipelineError::ShapeMismatch { what, got, expected } => {
                write!(f, "shape mismatch for {what}: got {got}, expected {expected}")
            }
            PipelineError::ArtifactWrite { path, source } => {
                write!(f, "failed to write artifact {}: {source}", path.display())
            }
            PipelineError::ArtifactRead { path, reason } => {
                write!(f, "failed to read artifact {}: {reason}", path.display())
            }
            PipelineError::Model(msg) => write!(f, "model error: {msg}"),
            PipelineError::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for PipelineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PipelineError::ArtifactWrite { source, .. } => Some(source),
            PipelineError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for PipelineError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}
