use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StudioError>;

/// Errors raised by the upload/detect/materialize pipeline.
#[derive(Debug, Error)]
pub enum StudioError {
    #[error("failed to load model {path}: {message}")]
    ModelLoad { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transcode of {input} failed: {message}")]
    Transcode { input: PathBuf, message: String },

    #[error("detection failed on {source_path}: {message}")]
    Detection { source_path: PathBuf, message: String },

    #[error("{name} is not an accepted {kind} file")]
    UnsupportedExtension { name: String, kind: &'static str },

    #[error("output file not found: {0}")]
    MissingOutput(PathBuf),

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("OpenCV error: {0}")]
    OpenCv(#[from] opencv::Error),

    #[error("torch error: {0}")]
    Torch(#[from] tch::TchError),
}

impl StudioError {
    pub fn detection(source_path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Detection {
            source_path: source_path.into(),
            message: message.into(),
        }
    }

    pub fn transcode(input: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Transcode {
            input: input.into(),
            message: message.into(),
        }
    }
}
