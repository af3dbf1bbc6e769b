//! Velocity pass: horizontal water speed from the net flux through a cell.

use rayon::prelude::*;

use crate::erosion::flow::cell_inflow;
use crate::erosion::params::GridParams;
use crate::erosion::rain::RainInjector;
use crate::erosion::state::{BufferSet, Direction, GridDims};

/// Upper bound on speed magnitude, in cells per second.
pub const MAX_VELOCITY: f32 = 1.0;

/// Velocity of one cell, given its outflow, its inflow and the water depth
/// before (rained) and after the flow pass.
#[inline]
pub fn cell_velocity(outflow: [f32; 4], inflow: [f32; 4], depth_before: f32, depth_after: f32, params: &GridParams) -> [f32; 2] {
    let mean_depth = 0.5 * (depth_before + depth_after);
    if mean_depth <= params.depth_epsilon {
        return [0.0; 2];
    }

    let top = Direction::Top.index();
    let right = Direction::Right.index();
    let bottom = Direction::Bottom.index();
    let left = Direction::Left.index();

    // Water crossing the cell left-to-right and top-to-bottom, averaged
    // over both faces.
    let through_x = 0.5 * (inflow[left] - outflow[left] + outflow[right] - inflow[right]);
    let through_y = 0.5 * (inflow[top] - outflow[top] + outflow[bottom] - inflow[bottom]);

    let scale = 1.0 / (mean_depth * params.pipe_length);
    let mut u = through_x * scale;
    let mut v = through_y * scale;

    let speed = (u * u + v * v).sqrt();
    if speed > MAX_VELOCITY {
        let s = MAX_VELOCITY / speed;
        u *= s;
        v *= s;
    }
    [u, v]
}

/// Write `write.velocity` from the new flux and depth already in `write`.
pub fn run(dims: GridDims, read: &BufferSet, write: &mut BufferSet, rain: &RainInjector, params: &GridParams) {
    let flux = &write.flux;
    let water = &write.water;
    write.velocity.par_iter_mut().enumerate().for_each(|(i, velocity)| {
        let (x, y) = dims.coords(i);
        let before = rain.rained(read.water[i], x, y);
        *velocity = cell_velocity(flux[i], cell_inflow(dims, x, y, flux), before, water[i], params);
    });
}
