/*!
Error type shared by every helper of the crate.
 */

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The file could not be opened or decoded as an image.
    #[error("failed to load image from {path}: {source}")]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to save image to {path}: {source}")]
    ImageSave {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// An array or tensor does not have the layout the helper works on.
    #[error("shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    /// A label passed to the one-hot encoder is not a valid class index.
    #[error("label {label} at index {index} is outside [0, {n_classes})")]
    LabelOutOfRange {
        index: usize,
        label: i64,
        n_classes: usize,
    },

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("torch error: {0}")]
    Tch(#[from] tch::TchError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn shape(expected: impl Into<String>, actual: &[impl std::fmt::Debug]) -> Self {
        Error::ShapeMismatch {
            expected: expected.into(),
            actual: format!("{:?}", actual),
        }
    }

    pub(crate) fn invalid(name: &str, reason: impl Into<String>) -> Self {
        Error::InvalidParameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}
