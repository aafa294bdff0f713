/// Convenience result alias used across the crate.
pub type SlimeResult<T> = Result<T, SlimeError>;

/// Crate-wide error type.
///
/// Every variant is fatal for the run that produced it: nothing in the simulation core retries.
/// Per-frame edge cases (sensing off-grid, luma ties) are defined behavior and never surface here.
#[derive(thiserror::Error, Debug)]
pub enum SlimeError {
    /// Simulation parameters failed validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// A startup configuration request cannot be satisfied (e.g. output index out of range).
    #[error("configuration error: {0}")]
    Config(String),

    /// Display or presentation setup failed.
    #[error("setup error: {0}")]
    Setup(String),

    /// GPU bring-up, dispatch or readback failed.
    #[error("gpu error: {0}")]
    Gpu(String),

    /// Parameter file could not be parsed or written.
    #[error("serialization error: {0}")]
    Serde(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SlimeError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn setup(msg: impl Into<String>) -> Self {
        Self::Setup(msg.into())
    }

    pub fn gpu(msg: impl Into<String>) -> Self {
        Self::Gpu(msg.into())
    }

    pub fn serde(msg: impl Into<String>) -> Self {
        Self::Serde(msg.into())
    }
}
