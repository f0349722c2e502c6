use std::fmt::Debug;
use thiserror::Error;

/// Errors raised by the training core. Everything else (candle, io, csv) is propagated as is
/// through `anyhow`.
#[derive(Debug, Error)]
pub enum L2rlError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("shape mismatch in {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: String,
        actual: String,
    },
    #[error("gradient global norm is not finite ({norm})")]
    InvalidGradient { norm: f32 },
    #[error("environment {env_idx} failed: {message}")]
    Environment { env_idx: usize, message: String },
}

impl L2rlError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn shape_mismatch(what: &'static str, expected: impl Debug, actual: impl Debug) -> Self {
        Self::ShapeMismatch {
            what,
            expected: format!("{expected:?}"),
            actual: format!("{actual:?}"),
        }
    }

    pub fn environment(env_idx: usize, err: &anyhow::Error) -> Self {
        Self::Environment {
            env_idx,
            message: format!("{err:#}"),
        }
    }
}
