//! Execution backends for the pass pipeline.

use serde::{Deserialize, Serialize};

use crate::erosion::error::SimError;
use crate::erosion::params::GridParams;
use crate::erosion::state::{FieldSnapshot, GridDims};

/// Something that can advance the grids one step.
///
/// Implementations own their buffers. The controller only talks to them
/// between steps, so none of these calls may overlap a step in flight.
pub trait SimulationBackend {
    fn name(&self) -> &'static str;

    fn dims(&self) -> GridDims;

    /// Replace terrain in both buffer sets and zero every dynamic field.
    fn load_terrain(&mut self, heights: &[f32]) -> Result<(), SimError>;

    /// Zero water, sediment, velocity and flux, keeping terrain.
    fn clear_dynamic(&mut self) -> Result<(), SimError>;

    /// Flow, velocity and sediment passes in order, then swap.
    fn step(&mut self, params: &GridParams) -> Result<(), SimError>;

    /// Copy the authoritative terrain into `out` (row-major).
    fn download_heights(&mut self, out: &mut [f32]) -> Result<(), SimError>;

    /// Copy every authoritative field.
    fn snapshot(&mut self) -> Result<FieldSnapshot, SimError>;
}

/// Which backend the controller should construct.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComputeBackend {
    /// GPU if an adapter is available, otherwise CPU
    #[default]
    Auto,
    Cpu,
    Gpu,
}

impl std::fmt::Display for ComputeBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Gpu => write!(f, "gpu"),
        }
    }
}

impl std::str::FromStr for ComputeBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "gpu" => Ok(Self::Gpu),
            other => Err(format!("unknown backend '{}', expected auto, cpu or gpu", other)),
        }
    }
}

/// Build a backend for a `dims` grid.
///
/// `worker_threads` sizes the CPU pool (0 lets rayon decide). `Auto`
/// quietly drops to the CPU when no GPU can be opened; `Gpu` reports the
/// failure instead.
pub fn create_backend(
    kind: ComputeBackend,
    dims: GridDims,
    worker_threads: usize,
) -> Result<Box<dyn SimulationBackend>, SimError> {
    match kind {
        ComputeBackend::Cpu => Ok(Box::new(super::cpu::CpuBackend::new(dims, worker_threads)?)),
        ComputeBackend::Gpu => Ok(Box::new(super::gpu::GpuBackend::new(dims)?)),
        ComputeBackend::Auto => match super::gpu::GpuBackend::new(dims) {
            Ok(gpu) => {
                log::info!("Using GPU backend");
                Ok(Box::new(gpu))
            }
            Err(e) => {
                log::warn!("GPU not available ({}), using CPU backend", e);
                Ok(Box::new(super::cpu::CpuBackend::new(dims, worker_threads)?))
            }
        },
    }
}
