//! Water sources feeding the flow pass.
//!
//! Terms are summed per cell: a uniform global rain rate and up to two
//! brush cones (the continuous target and the pending one-shot target),
//! each falling off linearly to zero at the brush radius.

use crate::erosion::params::GridParams;

#[derive(Clone, Copy, Debug, PartialEq)]
struct BrushCone {
    x: f32,
    y: f32,
    radius: f32,
    strength: f32,
}

/// Per-step rain field, resolved from the parameter block before dispatch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RainInjector {
    global_rate: f32,
    /// Continuous cone, then one-shot cone
    brushes: [Option<BrushCone>; 2],
    time_step: f32,
}

impl RainInjector {
    pub fn from_params(params: &GridParams) -> Self {
        let global_rate = if params.global_rain { params.rain_rate } else { 0.0 };
        let brush = &params.brush;
        let cone = |target: Option<(f32, f32)>| match target {
            Some((x, y)) if brush.enabled && brush.strength > 0.0 => Some(BrushCone {
                x,
                y,
                radius: brush.radius,
                strength: brush.strength,
            }),
            _ => None,
        };

        Self {
            global_rate,
            brushes: [cone(brush.continuous), cone(brush.one_shot)],
            time_step: params.time_step,
        }
    }

    /// Water depth per second arriving at cell `(x, y)`.
    #[inline]
    pub fn rate_at(&self, x: usize, y: usize) -> f32 {
        let mut rate = self.global_rate;
        for cone in self.brushes.iter().flatten() {
            let dx = x as f32 - cone.x;
            let dy = y as f32 - cone.y;
            let dist = (dx * dx + dy * dy).sqrt();
            if dist < cone.radius {
                rate += cone.strength * (1.0 - dist / cone.radius);
            }
        }
        rate
    }

    /// Depth of cell `(x, y)` after this step's rain has landed.
    #[inline]
    pub fn rained(&self, water: f32, x: usize, y: usize) -> f32 {
        water + self.time_step * self.rate_at(x, y)
    }

    // Flattened fields for the GPU uniform block.
    pub(crate) fn global_rate(&self) -> f32 {
        self.global_rate
    }

    /// `[x, y, radius, strength]` per cone; an absent cone has zero strength.
    pub(crate) fn brush_uniforms(&self) -> [[f32; 4]; 2] {
        self.brushes.map(|brush| match brush {
            Some(cone) => [cone.x, cone.y, cone.radius, cone.strength],
            None => [0.0, 0.0, 1.0, 0.0],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::erosion::params::BrushMode;

    #[test]
    fn test_global_rain_is_uniform() {
        let params = GridParams::default().with_global_rain(true).with_rain_rate(0.6).unwrap();
        let rain = RainInjector::from_params(&params);
        assert_eq!(rain.rate_at(0, 0), 0.6);
        assert_eq!(rain.rate_at(17, 3), 0.6);
        assert!((rain.rained(1.0, 2, 2) - (1.0 + 0.6 / 60.0)).abs() < 1e-6);
    }

    #[test]
    fn test_brush_falls_off_linearly_and_clips() {
        let params = GridParams::default()
            .with_brush_radius(4.0)
            .and_then(|p| p.with_brush_strength(2.0))
            .and_then(|p| p.with_brush_target(10.0, 10.0, BrushMode::Continuous))
            .unwrap();
        let rain = RainInjector::from_params(&params);

        assert!((rain.rate_at(10, 10) - 2.0).abs() < 1e-6);
        assert!((rain.rate_at(12, 10) - 1.0).abs() < 1e-6);
        assert_eq!(rain.rate_at(14, 10), 0.0);
        assert_eq!(rain.rate_at(0, 0), 0.0);
    }

    #[test]
    fn test_disabled_brush_is_dry() {
        let params = GridParams::default()
            .with_brush_target(5.0, 5.0, BrushMode::Continuous)
            .unwrap()
            .with_brush_enabled(false);
        let rain = RainInjector::from_params(&params);
        assert_eq!(rain.rate_at(5, 5), 0.0);
        assert_eq!(rain.brush_uniforms()[0][3], 0.0);
        assert_eq!(RainInjector::from_params(&GridParams::default()).rate_at(0, 0), 0.0);
    }

    #[test]
    fn test_continuous_and_one_shot_cones_add_up() {
        let params = GridParams::default()
            .with_brush_radius(4.0)
            .and_then(|p| p.with_brush_strength(2.0))
            .and_then(|p| p.with_brush_target(2.0, 2.0, BrushMode::Continuous))
            .and_then(|p| p.with_brush_target(3.0, 2.0, BrushMode::OneShot))
            .unwrap();
        let rain = RainInjector::from_params(&params);
        assert!((rain.rate_at(2, 2) - (2.0 + 1.5)).abs() < 1e-6);
        assert!((rain.rate_at(20, 20)).abs() < 1e-6);

        let next = RainInjector::from_params(&params.after_step());
        assert!((next.rate_at(2, 2) - 2.0).abs() < 1e-6);
        assert_eq!(next.brush_uniforms()[1][3], 0.0);
    }
}
