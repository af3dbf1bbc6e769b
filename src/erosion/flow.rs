//! Flow pass: virtual-pipe outflow between neighbouring cells.
//!
//! Runs as two data-parallel sub-stages so that no cell ever reads a value
//! another cell is writing in the same dispatch:
//! 1. `compute_flux` reads the read set and writes the write-set flux.
//! 2. `update_depth` reads the finished write-set flux and writes the
//!    write-set water depth.

use rayon::prelude::*;

use crate::erosion::params::GridParams;
use crate::erosion::rain::RainInjector;
use crate::erosion::state::{BufferSet, Direction, GridDims};

/// New outflow of one cell toward its four neighbours.
///
/// Total height of an absent neighbour is taken as 0, but any component
/// that would cross the grid edge is forced to zero afterwards, so the
/// boundary is closed.
#[inline]
pub fn cell_outflow(
    dims: GridDims,
    x: usize,
    y: usize,
    read: &BufferSet,
    rain: &RainInjector,
    params: &GridParams,
) -> [f32; 4] {
    let i = dims.index(x, y);
    let water = rain.rained(read.water[i], x, y);
    let total = read.height[i] + water;
    let k = params.flux_coefficient();
    let previous = read.flux[i];

    let mut out = [0.0f32; 4];
    for dir in Direction::ALL {
        let Some(j) = dims.neighbor(x, y, dir) else {
            continue;
        };
        let (nx, ny) = dims.coords(j);
        let neighbor_total = read.height[j] + rain.rained(read.water[j], nx, ny);
        out[dir.index()] = (previous[dir.index()] + k * (total - neighbor_total)).max(0.0);
    }

    // A cell can never emit more water than it holds this step.
    let sum: f32 = out.iter().sum();
    if sum > 0.0 {
        let available = water * params.cell_area() / params.time_step;
        if sum > available {
            let scale = available / sum;
            for f in &mut out {
                *f *= scale;
            }
        }
    }

    out
}

/// Water flowing into cell `(x, y)` from all four neighbours.
#[inline]
pub fn cell_inflow(dims: GridDims, x: usize, y: usize, flux: &[[f32; 4]]) -> [f32; 4] {
    let mut inflow = [0.0f32; 4];
    for dir in Direction::ALL {
        if let Some(j) = dims.neighbor(x, y, dir) {
            inflow[dir.index()] = flux[j][dir.opposite().index()];
        }
    }
    inflow
}

/// Sub-stage 1: write the new flux for every cell.
pub fn compute_flux(
    dims: GridDims,
    read: &BufferSet,
    rain: &RainInjector,
    params: &GridParams,
    out_flux: &mut [[f32; 4]],
) {
    out_flux.par_iter_mut().enumerate().for_each(|(i, flux)| {
        let (x, y) = dims.coords(i);
        *flux = cell_outflow(dims, x, y, read, rain, params);
    });
}

/// Sub-stage 2: apply net inflow to the rained water depth.
pub fn update_depth(
    dims: GridDims,
    read_water: &[f32],
    new_flux: &[[f32; 4]],
    rain: &RainInjector,
    params: &GridParams,
    out_water: &mut [f32],
) {
    let scale = params.time_step / params.cell_area();
    out_water.par_iter_mut().enumerate().for_each(|(i, water)| {
        let (x, y) = dims.coords(i);
        let inflow: f32 = cell_inflow(dims, x, y, new_flux).iter().sum();
        let outflow: f32 = new_flux[i].iter().sum();
        let depth = rain.rained(read_water[i], x, y) + scale * (inflow - outflow);
        *water = depth.max(0.0);
    });
}

/// Run both sub-stages, reading `read` and writing `write.flux` and
/// `write.water`.
pub fn run(dims: GridDims, read: &BufferSet, write: &mut BufferSet, rain: &RainInjector, params: &GridParams) {
    compute_flux(dims, read, rain, params, &mut write.flux);
    update_depth(dims, &read.water, &write.flux, rain, params, &mut write.water);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::erosion::state::HeightFieldState;

    fn state_with(dims: GridDims, height: &[f32], water: &[f32]) -> HeightFieldState {
        let mut state = HeightFieldState::new(dims);
        state.load_heights(height);
        state.read_mut().water.copy_from_slice(water);
        state
    }

    #[test]
    fn test_flat_water_has_no_flux() {
        let dims = GridDims::new(4, 4);
        let mut state = state_with(dims, &[0.0; 16], &[0.5; 16]);
        let params = GridParams::default();
        let rain = RainInjector::from_params(&params);

        let (read, write) = state.split();
        run(dims, read, write, &rain, &params);
        assert!(write.flux.iter().all(|f| *f == [0.0; 4]));
        assert!(write.water.iter().all(|&w| (w - 0.5).abs() < 1e-7));
    }

    #[test]
    fn test_boundary_flux_is_zero() {
        // Water piled along every edge would drain outward if the boundary were open.
        let dims = GridDims::new(5, 5);
        let water: Vec<f32> = (0..25)
            .map(|i| {
                let (x, y) = dims.coords(i);
                if x == 0 || y == 0 || x == 4 || y == 4 { 2.0 } else { 0.1 }
            })
            .collect();
        let mut state = state_with(dims, &[0.3; 25], &water);
        let params = GridParams::default();
        let rain = RainInjector::from_params(&params);

        let (read, write) = state.split();
        run(dims, read, write, &rain, &params);
        for y in 0..5 {
            assert_eq!(write.flux[dims.index(0, y)][Direction::Left.index()], 0.0);
            assert_eq!(write.flux[dims.index(4, y)][Direction::Right.index()], 0.0);
        }
        for x in 0..5 {
            assert_eq!(write.flux[dims.index(x, 0)][Direction::Top.index()], 0.0);
            assert_eq!(write.flux[dims.index(x, 4)][Direction::Bottom.index()], 0.0);
        }
        // Inward flow still happens.
        assert!(write.flux[dims.index(0, 2)][Direction::Right.index()] > 0.0);
    }

    #[test]
    fn test_outflow_never_exceeds_available_water() {
        // A thin film on a tall spike wants to shed far more than it holds.
        let dims = GridDims::new(3, 3);
        let mut height = [0.0f32; 9];
        height[4] = 50.0;
        let mut water = [0.0f32; 9];
        water[4] = 0.01;
        let mut state = state_with(dims, &height, &water);
        let params = GridParams::default();
        let rain = RainInjector::from_params(&params);

        let (read, write) = state.split();
        run(dims, read, write, &rain, &params);
        let emitted: f32 = write.flux[4].iter().sum::<f32>() * params.time_step;
        assert!(emitted <= 0.01 * params.cell_area() * (1.0 + 1e-5));
        assert!(emitted > 0.0);
        // Spike drained completely, neighbours split the water evenly.
        assert!(write.water[4].abs() < 1e-6);
        for j in [1, 3, 5, 7] {
            assert!((write.water[j] - 0.0025).abs() < 1e-6);
        }
        assert!(write.water.iter().all(|&w| w >= 0.0));
    }

    #[test]
    fn test_water_volume_conserved_by_flow() {
        let dims = GridDims::new(6, 4);
        let height: Vec<f32> = (0..24).map(|i| ((i * 7) % 5) as f32 * 0.2).collect();
        let water: Vec<f32> = (0..24).map(|i| ((i * 3) % 4) as f32 * 0.1).collect();
        let mut state = state_with(dims, &height, &water);
        let params = GridParams::default();
        let rain = RainInjector::from_params(&params);

        let before: f32 = water.iter().sum();
        let (read, write) = state.split();
        run(dims, read, write, &rain, &params);
        let after: f32 = write.water.iter().sum();
        assert!((before - after).abs() < 1e-5, "before {} after {}", before, after);
    }
}
