//! Error types for the erosion simulation.

use thiserror::Error;

/// A parameter failed validation. Setters return this instead of
/// storing a value the passes cannot integrate.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParamError {
    #[error("{name} must be finite, got {value}")]
    NotFinite { name: &'static str, value: f32 },
    #[error("{name} must be greater than zero, got {value}")]
    NonPositive { name: &'static str, value: f32 },
    #[error("{name} must lie in [{min}, {max}], got {value}")]
    OutOfRange {
        name: &'static str,
        value: f32,
        min: f32,
        max: f32,
    },
}

/// Failures of the wgpu compute backend.
#[derive(Debug, Error)]
pub enum GpuError {
    #[error("No suitable GPU adapter found")]
    NoAdapter,
    #[error("Failed to request device: {0}")]
    RequestDevice(String),
    #[error("Compute pipeline setup failed: {0}")]
    Pipeline(String),
    #[error("Buffer map failed: {0}")]
    BufferMap(String),
    #[error("Buffer map channel disconnected")]
    ChannelDisconnected,
}

#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid parameters: {0}")]
    InvalidParams(#[from] ParamError),
    #[error("grid must have at least one cell, got {width}x{height}")]
    EmptyGrid { width: usize, height: usize },
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("GPU backend: {0}")]
    Gpu(#[from] GpuError),
    #[error("heightfield is {}x{}, simulation grid is {}x{}", found.0, found.1, expected.0, expected.1)]
    ResolutionMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },
    #[error("heightfield contains {count} non-finite values")]
    NonFiniteHeights { count: usize },
}

impl SimError {
    /// Terrain errors leave the simulation usable with its previous grid.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SimError::ResolutionMismatch { .. }
                | SimError::NonFiniteHeights { .. }
                | SimError::InvalidParams(_)
        )
    }
}
