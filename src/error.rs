use std::path::PathBuf;

use burn::record::RecorderError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FcnError {
    #[error("I/O error on `{path}`: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Unable to read image `{path}`: {source}")]
    Image {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("Invalid dataset: {0}")]
    Dataset(String),

    #[error("Unable to restore backbone weights from `{path}`: {source}")]
    Backbone {
        path: PathBuf,
        source: RecorderError,
    },

    #[error("Unable to import weights from `{path}`: {reason}")]
    Weights { path: PathBuf, reason: String },

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] RecorderError),

    #[error("Invalid training config: {0}")]
    Config(String),

    #[error("Unable to read tensor data: {0}")]
    TensorData(String),
}

impl FcnError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FcnError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type FcnResult<T> = Result<T, FcnError>;
