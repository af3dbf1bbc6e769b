//! Host-facing driver: owns the parameter block and the backend, orders the
//! passes, and tracks the run/pause lifecycle.

use crate::erosion::backend::{create_backend, ComputeBackend, SimulationBackend};
use crate::erosion::error::{ParamError, SimError};
use crate::erosion::params::{BrushMode, GridParams, SimulationProfile};
use crate::erosion::state::{FieldSnapshot, FieldTotals, GridDims};
use crate::heightmap::HeightfieldSource;
use crate::tilemap::Tilemap;

/// Lifecycle of a controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimPhase {
    /// Grids allocated, no terrain loaded yet
    Uninitialized,
    /// Terrain loaded, dynamic fields zero, not stepping
    Initialized,
    Running,
    /// Stopped after running; all state preserved
    Paused,
}

impl std::fmt::Display for SimPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Initialized => write!(f, "initialized"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

pub struct SimulationController {
    dims: GridDims,
    params: GridParams,
    backend: Box<dyn SimulationBackend>,
    phase: SimPhase,
    /// Last terrain accepted by `initialize_terrain`/`reset`, unscaled
    baked: Option<Tilemap<f32>>,
    /// Render-facing copy of the authoritative terrain
    height_out: Tilemap<f32>,
    steps_taken: u64,
}

impl SimulationController {
    /// Allocate a `width` x `height` simulation on the requested backend.
    /// Fails on invalid parameters, an empty grid, or a backend that cannot
    /// be built.
    pub fn new(width: usize, height: usize, params: GridParams, backend: ComputeBackend) -> Result<Self, SimError> {
        Self::with_worker_threads(width, height, params, backend, None)
    }

    /// As `new`, with an explicit CPU worker count (`None` lets rayon decide).
    pub fn with_worker_threads(
        width: usize,
        height: usize,
        params: GridParams,
        backend: ComputeBackend,
        worker_threads: Option<usize>,
    ) -> Result<Self, SimError> {
        params.validate()?;
        let dims = GridDims::new(width, height);
        if dims.cells() == 0 {
            return Err(SimError::EmptyGrid { width, height });
        }
        let backend = create_backend(backend, dims, worker_threads.unwrap_or(0))?;
        Self::with_backend(params, backend)
    }

    /// Drive an already constructed backend.
    pub fn with_backend(params: GridParams, backend: Box<dyn SimulationBackend>) -> Result<Self, SimError> {
        params.validate()?;
        let dims = backend.dims();
        if dims.cells() == 0 {
            return Err(SimError::EmptyGrid { width: dims.width, height: dims.height });
        }
        log::info!("Simulation {}x{} on {} backend", dims.width, dims.height, backend.name());
        Ok(Self {
            dims,
            params,
            backend,
            phase: SimPhase::Uninitialized,
            baked: None,
            height_out: Tilemap::new_with(dims.width, dims.height, 0.0),
            steps_taken: 0,
        })
    }

    // =========================================================================
    // Control
    // =========================================================================

    /// Bake `source`, copy it into both buffer sets and zero every dynamic
    /// field. Re-initializing while running discards all erosion so far and
    /// leaves the simulation stopped in `Initialized`.
    ///
    /// On a size mismatch or non-finite heights nothing changes: the
    /// previous grid and phase are kept and the error is returned.
    pub fn initialize_terrain(&mut self, source: &dyn HeightfieldSource) -> Result<(), SimError> {
        let terrain = self.bake_checked(source)?;
        if self.phase == SimPhase::Running {
            log::info!("Terrain rebaked while running; erosion progress discarded");
        }
        self.load(terrain)
    }

    /// Begin stepping. Ignored before the first terrain is loaded.
    pub fn start(&mut self) {
        match self.phase {
            SimPhase::Initialized | SimPhase::Paused => self.phase = SimPhase::Running,
            SimPhase::Running => {}
            SimPhase::Uninitialized => log::debug!("start() ignored: no terrain loaded"),
        }
    }

    /// Stop stepping after the current step; every field is preserved.
    pub fn stop(&mut self) {
        match self.phase {
            SimPhase::Running => self.phase = SimPhase::Paused,
            other => log::debug!("stop() ignored in phase {}", other),
        }
    }

    /// Return to `Initialized` with all water, sediment, velocity and flux
    /// cleared. With a source the terrain is rebaked; without one the last
    /// baked terrain is restored (or the current terrain kept if nothing
    /// was ever baked). Any pending brush rain is dropped.
    pub fn reset(&mut self, source: Option<&dyn HeightfieldSource>) -> Result<(), SimError> {
        match source {
            Some(source) => {
                let terrain = self.bake_checked(source)?;
                self.load(terrain)?;
            }
            None => match self.baked.clone() {
                Some(terrain) => self.load(terrain)?,
                None => {
                    self.backend.clear_dynamic()?;
                    self.backend.download_heights(self.height_out.as_mut_slice())?;
                    self.phase = SimPhase::Initialized;
                    self.steps_taken = 0;
                }
            },
        }
        self.params = self.params.without_brush_target();
        Ok(())
    }

    /// Advance one step if running: flow, velocity and sediment passes,
    /// buffer swap, then copy terrain to the render-facing grid.
    pub fn step(&mut self) -> Result<(), SimError> {
        if self.phase != SimPhase::Running {
            log::trace!("step() ignored in phase {}", self.phase);
            return Ok(());
        }
        self.backend.step(&self.params)?;
        self.params = self.params.after_step();
        self.backend.download_heights(self.height_out.as_mut_slice())?;
        self.steps_taken += 1;
        log::trace!("step {} done", self.steps_taken);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.phase == SimPhase::Running
    }

    pub fn is_initialized(&self) -> bool {
        self.phase != SimPhase::Uninitialized
    }

    fn bake_checked(&self, source: &dyn HeightfieldSource) -> Result<Tilemap<f32>, SimError> {
        let expected = (self.dims.width, self.dims.height);
        let declared = source.resolution();
        if declared != expected {
            log::warn!(
                "Heightfield is {}x{} but simulation grid is {}x{}; keeping previous terrain",
                declared.0, declared.1, expected.0, expected.1
            );
            return Err(SimError::ResolutionMismatch { expected, found: declared });
        }

        let terrain = source.bake();
        let found = (terrain.width, terrain.height);
        if found != expected {
            log::warn!("Heightfield baked to {}x{}, expected {}x{}", found.0, found.1, expected.0, expected.1);
            return Err(SimError::ResolutionMismatch { expected, found });
        }

        let count = terrain.as_slice().iter().filter(|v| !v.is_finite()).count();
        if count > 0 {
            log::warn!("Heightfield has {} non-finite values; keeping previous terrain", count);
            return Err(SimError::NonFiniteHeights { count });
        }
        Ok(terrain)
    }

    /// Scale `terrain` by the current parameters and upload it.
    fn load(&mut self, terrain: Tilemap<f32>) -> Result<(), SimError> {
        let scale = self.params.height_scale;
        let max = self.params.max_height;
        let mut scaled = terrain.clone();
        for h in scaled.as_mut_slice() {
            *h = (*h * scale).clamp(0.0, max);
        }
        self.backend.load_terrain(scaled.as_slice())?;
        self.height_out = scaled;
        self.baked = Some(terrain);
        self.phase = SimPhase::Initialized;
        self.steps_taken = 0;
        log::info!("Terrain loaded ({}x{})", self.dims.width, self.dims.height);
        Ok(())
    }

    // =========================================================================
    // Outputs
    // =========================================================================

    /// Terrain as of the last completed step.
    pub fn height_grid(&self) -> &Tilemap<f32> {
        &self.height_out
    }

    /// Copy of every authoritative field (reads back from the GPU if needed).
    pub fn snapshot(&mut self) -> Result<FieldSnapshot, SimError> {
        self.backend.snapshot()
    }

    pub fn totals(&mut self) -> Result<FieldTotals, SimError> {
        Ok(self.backend.snapshot()?.totals())
    }

    pub fn phase(&self) -> SimPhase {
        self.phase
    }

    pub fn params(&self) -> &GridParams {
        &self.params
    }

    pub fn dims(&self) -> GridDims {
        self.dims
    }

    pub fn steps_taken(&self) -> u64 {
        self.steps_taken
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    // =========================================================================
    // Parameters
    // =========================================================================

    pub fn set_rain_rate(&mut self, rate: f32) -> Result<(), ParamError> {
        self.params = self.params.with_rain_rate(rate)?;
        Ok(())
    }

    pub fn set_evaporation_rate(&mut self, rate: f32) -> Result<(), ParamError> {
        self.params = self.params.with_evaporation_rate(rate)?;
        Ok(())
    }

    pub fn set_sediment_capacity(&mut self, capacity: f32) -> Result<(), ParamError> {
        self.params = self.params.with_sediment_capacity(capacity)?;
        Ok(())
    }

    pub fn set_dissolving_rate(&mut self, rate: f32) -> Result<(), ParamError> {
        self.params = self.params.with_dissolving_rate(rate)?;
        Ok(())
    }

    pub fn set_deposition_rate(&mut self, rate: f32) -> Result<(), ParamError> {
        self.params = self.params.with_deposition_rate(rate)?;
        Ok(())
    }

    pub fn set_brush_strength(&mut self, strength: f32) -> Result<(), ParamError> {
        self.params = self.params.with_brush_strength(strength)?;
        Ok(())
    }

    pub fn set_brush_radius(&mut self, radius: f32) -> Result<(), ParamError> {
        self.params = self.params.with_brush_radius(radius)?;
        Ok(())
    }

    pub fn set_thermal(&mut self, rate: f32, threshold: f32) -> Result<(), ParamError> {
        self.params = self.params.with_thermal(rate, threshold)?;
        Ok(())
    }

    pub fn set_global_rain(&mut self, enabled: bool) {
        self.params = self.params.with_global_rain(enabled);
    }

    pub fn set_brush_enabled(&mut self, enabled: bool) {
        self.params = self.params.with_brush_enabled(enabled);
    }

    /// Replace every constant at once. Brush targets, which are
    /// interaction state rather than configuration, carry over.
    ///
    /// A new `height_scale` or `max_height` applies to the next terrain
    /// load, including `reset(None)`; the current terrain is untouched.
    pub fn set_params(&mut self, params: GridParams) -> Result<(), ParamError> {
        params.validate()?;
        let brush = self.params.brush;
        self.params = params;
        self.params.brush.continuous = brush.continuous;
        self.params.brush.one_shot = brush.one_shot;
        Ok(())
    }

    pub fn set_profile(&mut self, profile: SimulationProfile) -> Result<(), ParamError> {
        self.set_params(profile.params())
    }

    /// Rain under the brush at `(x, y)` for the next step only. Continuous
    /// rain, if any, keeps going.
    pub fn add_rain_at_position(&mut self, x: f32, y: f32) -> Result<(), ParamError> {
        self.params = self.params.with_brush_target(x, y, BrushMode::OneShot)?;
        Ok(())
    }

    /// Rain under the brush at `(x, y)` every step until stopped. Calling
    /// again moves the brush.
    pub fn start_continuous_rain_at_position(&mut self, x: f32, y: f32) -> Result<(), ParamError> {
        self.params = self.params.with_brush_target(x, y, BrushMode::Continuous)?;
        Ok(())
    }

    /// Stop the continuous brush. A pending one-shot burst still lands.
    pub fn stop_continuous_rain(&mut self) {
        self.params = self.params.without_continuous_target();
    }
}
