//! Root-cause error taxonomy.
//!
//! Everything crosses module seams as `anyhow::Error`; these variants are the causes callers
//! downcast to when the distinction matters (startup fatality, retry accounting).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SorterError {
    #[error("device unavailable: {device}: {reason}")]
    DeviceUnavailable { device: String, reason: String },

    #[error("read error: {0}")]
    ReadError(String),

    #[error("write error: {0}")]
    WriteError(String),

    #[error("failed to load model {path}: {reason}")]
    ModelLoad { path: String, reason: String },

    #[error("detector returned unknown class id {0}")]
    UnknownClassId(usize),

    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

impl SorterError {
    pub fn device_unavailable(device: impl Into<String>, reason: impl ToString) -> Self {
        Self::DeviceUnavailable {
            device: device.into(),
            reason: reason.to_string(),
        }
    }

    pub fn model_load(path: impl Into<String>, reason: impl ToString) -> Self {
        Self::ModelLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
