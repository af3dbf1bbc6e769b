//! Sediment pass: transport, erosion/deposition, thermal weathering and
//! evaporation.
//!
//! Suspended sediment is first carried along with the water that left each
//! cell during the flow pass (a gather over the four neighbours, so every
//! invocation writes only its own cell). The carried amount is then
//! compared against the transport capacity `Kc · slope · |v|`: below
//! capacity the cell dissolves terrain, above it the cell drops material.

use rayon::prelude::*;

use crate::erosion::params::GridParams;
use crate::erosion::rain::RainInjector;
use crate::erosion::state::{BufferSet, Direction, GridDims};

const DIAGONAL: f32 = std::f32::consts::SQRT_2;

/// Mean absolute gradient toward the in-bounds 8-neighbourhood, floored at
/// `min_slope`.
pub fn local_slope(dims: GridDims, x: usize, y: usize, height: &[f32], params: &GridParams) -> f32 {
    let h = height[dims.index(x, y)];
    let mut total = 0.0f32;
    let mut count = 0u32;
    for dy in -1i64..=1 {
        for dx in -1i64..=1 {
            if dx == 0 && dy == 0 {
                continue;
            }
            if let Some(j) = dims.offset(x, y, dx, dy) {
                let dist = if dx != 0 && dy != 0 { params.pipe_length * DIAGONAL } else { params.pipe_length };
                total += (h - height[j]).abs() / dist;
                count += 1;
            }
        }
    }
    let mean = if count > 0 { total / count as f32 } else { 0.0 };
    mean.max(params.min_slope)
}

/// Fraction of a cell's rained water that left through `dir` this step.
#[inline]
fn leaving_fraction(flux: f32, water: f32, params: &GridParams) -> f32 {
    if water <= 0.0 {
        return 0.0;
    }
    (flux * params.time_step / (water * params.cell_area())).min(1.0)
}

/// Sediment in cell `(x, y)` after being moved with the water.
pub fn advected_sediment(
    dims: GridDims,
    x: usize,
    y: usize,
    read: &BufferSet,
    flux: &[[f32; 4]],
    rain: &RainInjector,
    params: &GridParams,
) -> f32 {
    let i = dims.index(x, y);
    let own_water = rain.rained(read.water[i], x, y);
    let leaving: f32 = flux[i].iter().map(|&f| leaving_fraction(f, own_water, params)).sum();
    let mut sediment = read.sediment[i] * (1.0 - leaving.min(1.0));

    for dir in Direction::ALL {
        if let Some(j) = dims.neighbor(x, y, dir) {
            let (nx, ny) = dims.coords(j);
            let water = rain.rained(read.water[j], nx, ny);
            sediment += read.sediment[j] * leaving_fraction(flux[j][dir.opposite().index()], water, params);
        }
    }
    sediment
}

/// Exchange between terrain and suspended load. Returns the new
/// `(height, sediment)`. Neither quantity can go negative: erosion never
/// takes more terrain than exists and deposition never drops more sediment
/// than is carried.
#[inline]
pub fn exchange(height: f32, sediment: f32, slope: f32, speed: f32, params: &GridParams) -> (f32, f32) {
    let capacity = params.sediment_capacity * slope * speed;
    if capacity > sediment {
        let eroded = (params.dissolving_rate * (capacity - sediment)).min(height.max(0.0));
        (height - eroded, sediment + eroded)
    } else {
        let deposited = (params.deposition_rate * (sediment - capacity)).min(sediment);
        (height + deposited, sediment - deposited)
    }
}

/// Slope-driven weathering: steep cells lose terrain, half of which
/// becomes suspended load.
#[inline]
pub fn weather(height: f32, sediment: f32, slope: f32, params: &GridParams) -> (f32, f32) {
    if params.thermal_rate <= 0.0 || slope <= params.thermal_threshold {
        return (height, sediment);
    }
    let loss = (params.thermal_rate * slope * params.time_step).min(height.max(0.0));
    (height - loss, sediment + 0.5 * loss)
}

/// Write `write.height` and `write.sediment`, and evaporate `write.water`
/// in place. Reads terrain and sediment from the read set so neighbour
/// values are never the ones being written.
pub fn run(dims: GridDims, read: &BufferSet, write: &mut BufferSet, rain: &RainInjector, params: &GridParams) {
    let BufferSet { height, water, sediment, velocity, flux } = write;
    let flux: &[[f32; 4]] = flux;
    let velocity: &[[f32; 2]] = velocity;
    let keep = 1.0 - params.evaporation_rate;

    height
        .par_iter_mut()
        .zip(sediment.par_iter_mut())
        .zip(water.par_iter_mut())
        .enumerate()
        .for_each(|(i, ((h_out, s_out), w_out))| {
            let (x, y) = dims.coords(i);
            let carried = advected_sediment(dims, x, y, read, flux, rain, params);
            let slope = local_slope(dims, x, y, &read.height, params);
            let [u, v] = velocity[i];
            let speed = (u * u + v * v).sqrt();

            let (h, s) = exchange(read.height[i], carried, slope, speed, params);
            let (h, s) = weather(h, s, slope, params);

            *h_out = h.clamp(0.0, params.max_height);
            *s_out = s.max(0.0);
            *w_out = (*w_out * keep).max(0.0);
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::erosion::{flow, velocity};
    use crate::erosion::state::HeightFieldState;

    fn full_step(state: &mut HeightFieldState, params: &GridParams) {
        let dims = state.dims();
        let rain = RainInjector::from_params(params);
        let (read, write) = state.split();
        flow::run(dims, read, write, &rain, params);
        velocity::run(dims, read, write, &rain, params);
        run(dims, read, write, &rain, params);
        state.swap();
    }

    fn cross_flow_peak() -> (HeightFieldState, GridParams, usize) {
        let dims = GridDims::new(9, 9);
        let centre = dims.index(4, 4);
        let mut heights = vec![0.0f32; dims.cells()];
        heights[centre] = 1.0;

        let mut state = HeightFieldState::new(dims);
        state.load_heights(&heights);
        let set = state.read_mut();
        set.water.fill(1.0);
        for (i, flux) in set.flux.iter_mut().enumerate() {
            if dims.coords(i).0 < dims.width - 1 {
                flux[Direction::Right.index()] = 0.5;
            }
        }

        let params = GridParams {
            sediment_capacity: 0.5,
            dissolving_rate: 0.3,
            deposition_rate: 0.3,
            evaporation_rate: 0.0,
            thermal_rate: 0.0,
            ..GridParams::default()
        };
        (state, params, centre)
    }

    #[test]
    fn test_slope_uses_diagonal_distance() {
        let dims = GridDims::new(3, 3);
        let mut height = vec![0.0f32; 9];
        height[4] = 1.0;
        let params = GridParams::default();
        let expected = (4.0 + 4.0 / DIAGONAL) / 8.0;
        assert!((local_slope(dims, 1, 1, &height, &params) - expected).abs() < 1e-6);
        // Corner has three neighbours, one of them diagonal.
        let corner = (0.0 + 0.0 + 1.0 / DIAGONAL) / 3.0;
        assert!((local_slope(dims, 0, 0, &height, &params) - corner).abs() < 1e-6);
        // Flat ground falls back to the floor.
        assert_eq!(local_slope(dims, 1, 1, &[0.0; 9], &params), params.min_slope);
    }

    #[test]
    fn test_erosion_limited_by_available_terrain() {
        let params = GridParams { dissolving_rate: 1.0, ..GridParams::default() };
        let (h, s) = exchange(0.01, 0.0, 5.0, 1.0, &params);
        assert_eq!(h, 0.0);
        assert!((s - 0.01).abs() < 1e-7);
    }

    #[test]
    fn test_deposition_limited_by_carried_sediment() {
        let params = GridParams { deposition_rate: 1.0, ..GridParams::default() };
        let (h, s) = exchange(0.5, 0.2, 0.01, 0.0, &params);
        assert!((h - 0.7).abs() < 1e-6);
        assert_eq!(s, 0.0);
    }

    #[test]
    fn test_thermal_only_above_threshold() {
        let params = GridParams { thermal_rate: 0.6, thermal_threshold: 0.5, ..GridParams::default() };
        assert_eq!(weather(1.0, 0.0, 0.4, &params), (1.0, 0.0));
        let (h, s) = weather(1.0, 0.0, 1.0, &params);
        assert!((h - 0.99).abs() < 1e-6);
        assert!((s - 0.005).abs() < 1e-6);
    }

    #[test]
    fn test_flowing_water_erodes_peak_and_carries_sediment_downstream() {
        let (mut state, params, centre) = cross_flow_peak();
        let solid_before = state.read().height.iter().sum::<f32>();

        full_step(&mut state, &params);
        let after_one = state.read().height[centre];
        assert!(after_one < 1.0, "peak was not eroded: {}", after_one);
        assert!((after_one - 0.946).abs() < 2e-3, "unexpected peak height {}", after_one);
        let [u, v] = state.read().velocity[centre];
        assert!(u > 0.0);
        assert!(v.abs() < 1e-6);

        full_step(&mut state, &params);
        let east = centre + 1;
        assert!(state.read().sediment[east] > 0.0, "no sediment reached the east neighbour");
        assert!(state.read().height[centre] < after_one);

        let set = state.read();
        let solid_after: f32 = set.height.iter().sum::<f32>() + set.sediment.iter().sum::<f32>();
        assert!((solid_before - solid_after).abs() < 1e-4);
    }

    #[test]
    fn test_still_water_leaves_terrain_unchanged() {
        let dims = GridDims::new(4, 4);
        let heights: Vec<f32> = (0..16).map(|i| 0.2 + 0.01 * (i % 3) as f32).collect();
        let mut state = HeightFieldState::new(dims);
        state.load_heights(&heights);
        let params = GridParams { thermal_rate: 0.0, ..GridParams::default() };

        full_step(&mut state, &params);
        assert_eq!(state.read().height, heights);
        assert!(state.read().sediment.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_evaporation_scales_water() {
        let dims = GridDims::new(2, 2);
        let mut state = HeightFieldState::new(dims);
        state.load_heights(&[0.0; 4]);
        state.read_mut().water.fill(1.0);
        let params = GridParams { evaporation_rate: 0.25, ..GridParams::default() };

        full_step(&mut state, &params);
        assert!(state.read().water.iter().all(|&w| (w - 0.75).abs() < 1e-6));
    }
}
