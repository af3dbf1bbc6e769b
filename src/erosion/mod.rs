//! Grid-based hydraulic erosion
//!
//! Water, sediment and terrain live on a fixed grid of cells and are advanced
//! by three data-parallel passes per step:
//! - **Flow**: virtual pipes between 4-neighbours carry water downhill
//!   (`flow`), with rain injected first (`rain`)
//! - **Velocity**: net flux through each cell gives a surface velocity
//!   (`velocity`)
//! - **Sediment**: suspended load moves with the water, the flow dissolves or
//!   drops material against its transport capacity, steep slopes weather, and
//!   water evaporates (`sediment`)
//!
//! All grids are double-buffered (`state`). Passes read the previous step's
//! set and write the other one; the controller swaps them afterwards. The
//! passes run either on a rayon pool (`cpu`) or as wgpu compute kernels
//! (`gpu`).

pub mod backend;
pub mod controller;
pub mod cpu;
pub mod error;
pub mod flow;
pub mod gpu;
pub mod params;
pub mod rain;
pub mod sediment;
pub mod state;
pub mod velocity;

pub use backend::{create_backend, ComputeBackend, SimulationBackend};
pub use controller::{SimPhase, SimulationController};
pub use error::{GpuError, ParamError, SimError};
pub use params::{BrushMode, BrushSettings, GridParams, SimulationProfile};
pub use rain::RainInjector;
pub use state::{FieldSnapshot, FieldTotals, GridDims};
