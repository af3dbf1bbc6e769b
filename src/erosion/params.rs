//! Simulation parameter block and presets.
//!
//! `GridParams` is a plain value: the controller owns one, hands it to the
//! backend by reference for the duration of a step, and replaces it between
//! steps through the `with_*` builders, each of which validates the new
//! value before returning a fresh copy.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::erosion::error::ParamError;

/// Preset parameter blocks. Profiles only change constants; every profile
/// runs the same pass pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SimulationProfile {
    /// Multi-pass reference constants
    #[default]
    Reference,
    /// Slow dissolution, light rain
    Gentle,
    /// Heavy rain and aggressive carving
    Torrential,
    /// Fast evaporation, strong thermal weathering
    Arid,
}

impl SimulationProfile {
    pub fn all() -> &'static [Self] {
        &[Self::Reference, Self::Gentle, Self::Torrential, Self::Arid]
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Reference => "Balanced multi-pass constants",
            Self::Gentle => "Slow dissolution, light rain",
            Self::Torrential => "Heavy rain, deep channels",
            Self::Arid => "Fast evaporation, cliff weathering",
        }
    }

    /// Parameter block for this profile.
    pub fn params(&self) -> GridParams {
        match self {
            Self::Reference => GridParams::default(),
            Self::Gentle => GridParams {
                rain_rate: 0.04,
                sediment_capacity: 0.5,
                dissolving_rate: 0.1,
                deposition_rate: 0.1,
                thermal_rate: 0.02,
                ..GridParams::default()
            },
            Self::Torrential => GridParams {
                global_rain: true,
                rain_rate: 0.4,
                sediment_capacity: 2.0,
                dissolving_rate: 0.5,
                deposition_rate: 0.4,
                evaporation_rate: 0.002,
                ..GridParams::default()
            },
            Self::Arid => GridParams {
                rain_rate: 0.05,
                evaporation_rate: 0.05,
                thermal_rate: 0.2,
                thermal_threshold: 0.35,
                ..GridParams::default()
            },
        }
    }
}

impl std::fmt::Display for SimulationProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reference => write!(f, "reference"),
            Self::Gentle => write!(f, "gentle"),
            Self::Torrential => write!(f, "torrential"),
            Self::Arid => write!(f, "arid"),
        }
    }
}

impl std::str::FromStr for SimulationProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|p| p.to_string().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                let names: Vec<String> = Self::all().iter().map(|p| p.to_string()).collect();
                format!("unknown profile '{}', expected one of: {}", s, names.join(", "))
            })
    }
}

/// How long a brush target stays active.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BrushMode {
    /// Rains for exactly one step, then clears itself
    OneShot,
    /// Rains every step until explicitly stopped
    Continuous,
}

/// Localized rain with a linear radial falloff.
///
/// A continuous target and a one-shot target can be active at the same
/// time; each rains its own cone.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrushSettings {
    pub enabled: bool,
    /// Water depth per second at the brush center
    pub strength: f32,
    /// Falloff radius in cells
    pub radius: f32,
    /// Held until stopped, in cell coordinates. Never persisted.
    #[serde(skip)]
    pub continuous: Option<(f32, f32)>,
    /// Consumed by the next step, in cell coordinates. Never persisted.
    #[serde(skip)]
    pub one_shot: Option<(f32, f32)>,
}

impl Default for BrushSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            strength: 2.0,
            radius: 12.0,
            continuous: None,
            one_shot: None,
        }
    }
}

impl BrushSettings {
    /// True when the brush will inject water on the next step.
    pub fn is_active(&self) -> bool {
        self.enabled && (self.continuous.is_some() || self.one_shot.is_some())
    }

    /// Active targets, continuous first.
    pub fn targets(&self) -> impl Iterator<Item = (f32, f32)> {
        self.continuous.into_iter().chain(self.one_shot)
    }
}

/// Physical constants and rain state read by every pass.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridParams {
    // =========================================================================
    // Integrator
    // =========================================================================

    /// Seconds simulated per step
    pub time_step: f32,
    pub gravity: f32,
    /// Distance between cell centers; cell area is its square
    pub pipe_length: f32,
    /// Cross-section of the virtual pipe connecting two cells
    pub pipe_area: f32,
    /// Cells shallower than this have zero velocity
    pub depth_epsilon: f32,

    // =========================================================================
    // Terrain
    // =========================================================================

    /// Multiplier applied to baked [0, 1] heights on copy
    pub height_scale: f32,
    /// Terrain is clamped to [0, max_height]
    pub max_height: f32,

    // =========================================================================
    // Sediment
    // =========================================================================

    /// Kc: capacity per unit slope and speed
    pub sediment_capacity: f32,
    /// Ks: fraction of the capacity deficit dissolved per step
    pub dissolving_rate: f32,
    /// Kd: fraction of the capacity excess deposited per step
    pub deposition_rate: f32,
    /// Ke: fraction of water removed per step
    pub evaporation_rate: f32,
    /// Kt: thermal weathering per unit slope per second
    pub thermal_rate: f32,
    /// Slope above which thermal weathering applies
    pub thermal_threshold: f32,
    /// Slope floor so flat ground still carries a little sediment
    pub min_slope: f32,

    // =========================================================================
    // Rain
    // =========================================================================

    pub global_rain: bool,
    /// Water depth per second added everywhere when global rain is on
    pub rain_rate: f32,
    pub brush: BrushSettings,
}

impl Default for GridParams {
    fn default() -> Self {
        Self {
            time_step: 1.0 / 60.0,
            gravity: 9.81,
            pipe_length: 1.0,
            pipe_area: 1.0,
            depth_epsilon: 1e-4,

            height_scale: 1.0,
            max_height: 2.0,

            sediment_capacity: 1.0,
            dissolving_rate: 0.3,
            deposition_rate: 0.3,
            evaporation_rate: 0.005,
            thermal_rate: 0.05,
            thermal_threshold: 0.6,
            min_slope: 0.01,

            global_rain: false,
            rain_rate: 0.1,
            brush: BrushSettings::default(),
        }
    }
}

fn check_finite(name: &'static str, value: f32) -> Result<(), ParamError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ParamError::NotFinite { name, value })
    }
}

fn check_positive(name: &'static str, value: f32) -> Result<(), ParamError> {
    check_finite(name, value)?;
    if value > 0.0 {
        Ok(())
    } else {
        Err(ParamError::NonPositive { name, value })
    }
}

fn check_range(name: &'static str, value: f32, min: f32, max: f32) -> Result<(), ParamError> {
    check_finite(name, value)?;
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ParamError::OutOfRange { name, value, min, max })
    }
}

/// Ceiling for rates and coefficients that have no natural bound. Larger
/// values overflow water or terrain to infinity within a few hundred steps.
const MAX_RATE: f32 = 100.0;

impl GridParams {
    /// Load a (possibly partial) parameter block from JSON. Missing fields
    /// take their default values.
    pub fn from_json_str(json: &str) -> Result<Self, String> {
        let params: Self = serde_json::from_str(json).map_err(|e| e.to_string())?;
        params.validate().map_err(|e| e.to_string())?;
        Ok(params)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
        Self::from_json_str(&text)
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Check every constant. Degenerate geometry (zero pipe length, zero
    /// time step) is rejected here rather than left to blow up in a pass.
    pub fn validate(&self) -> Result<(), ParamError> {
        check_positive("time_step", self.time_step)?;
        check_range("gravity", self.gravity, 0.0, 1000.0)?;
        check_positive("pipe_length", self.pipe_length)?;
        check_positive("pipe_area", self.pipe_area)?;
        check_positive("depth_epsilon", self.depth_epsilon)?;
        check_positive("height_scale", self.height_scale)?;
        check_positive("max_height", self.max_height)?;
        check_range("sediment_capacity", self.sediment_capacity, 0.0, MAX_RATE)?;
        check_range("dissolving_rate", self.dissolving_rate, 0.0, 1.0)?;
        check_range("deposition_rate", self.deposition_rate, 0.0, 1.0)?;
        check_range("evaporation_rate", self.evaporation_rate, 0.0, 1.0)?;
        check_range("thermal_rate", self.thermal_rate, 0.0, MAX_RATE)?;
        check_range("thermal_threshold", self.thermal_threshold, 0.0, MAX_RATE)?;
        check_range("min_slope", self.min_slope, 0.0, MAX_RATE)?;
        check_range("rain_rate", self.rain_rate, 0.0, MAX_RATE)?;
        check_range("brush_strength", self.brush.strength, 0.0, MAX_RATE)?;
        check_positive("brush_radius", self.brush.radius)?;
        for (x, y) in self.brush.targets() {
            check_finite("brush_x", x)?;
            check_finite("brush_y", y)?;
        }
        Ok(())
    }

    fn validated(self) -> Result<Self, ParamError> {
        self.validate()?;
        Ok(self)
    }

    pub fn cell_area(&self) -> f32 {
        self.pipe_length * self.pipe_length
    }

    /// Δt · g · A / l, the flux gained per unit height difference.
    pub fn flux_coefficient(&self) -> f32 {
        self.time_step * self.gravity * self.pipe_area / self.pipe_length
    }

    pub fn with_rain_rate(self, rain_rate: f32) -> Result<Self, ParamError> {
        Self { rain_rate, ..self }.validated()
    }

    pub fn with_evaporation_rate(self, evaporation_rate: f32) -> Result<Self, ParamError> {
        Self { evaporation_rate, ..self }.validated()
    }

    pub fn with_sediment_capacity(self, sediment_capacity: f32) -> Result<Self, ParamError> {
        Self { sediment_capacity, ..self }.validated()
    }

    pub fn with_dissolving_rate(self, dissolving_rate: f32) -> Result<Self, ParamError> {
        Self { dissolving_rate, ..self }.validated()
    }

    pub fn with_deposition_rate(self, deposition_rate: f32) -> Result<Self, ParamError> {
        Self { deposition_rate, ..self }.validated()
    }

    pub fn with_thermal(self, thermal_rate: f32, thermal_threshold: f32) -> Result<Self, ParamError> {
        Self { thermal_rate, thermal_threshold, ..self }.validated()
    }

    pub fn with_time_step(self, time_step: f32) -> Result<Self, ParamError> {
        Self { time_step, ..self }.validated()
    }

    pub fn with_brush_strength(self, strength: f32) -> Result<Self, ParamError> {
        let brush = BrushSettings { strength, ..self.brush };
        Self { brush, ..self }.validated()
    }

    pub fn with_brush_radius(self, radius: f32) -> Result<Self, ParamError> {
        let brush = BrushSettings { radius, ..self.brush };
        Self { brush, ..self }.validated()
    }

    pub fn with_global_rain(self, global_rain: bool) -> Self {
        Self { global_rain, ..self }
    }

    pub fn with_brush_enabled(self, enabled: bool) -> Self {
        let brush = BrushSettings { enabled, ..self.brush };
        Self { brush, ..self }
    }

    /// Point the brush at `(x, y)` in cell coordinates. Only the target
    /// of the given mode moves; the other one is kept.
    pub fn with_brush_target(self, x: f32, y: f32, mode: BrushMode) -> Result<Self, ParamError> {
        let mut brush = self.brush;
        match mode {
            BrushMode::OneShot => brush.one_shot = Some((x, y)),
            BrushMode::Continuous => brush.continuous = Some((x, y)),
        }
        Self { brush, ..self }.validated()
    }

    pub fn without_continuous_target(self) -> Self {
        let brush = BrushSettings { continuous: None, ..self.brush };
        Self { brush, ..self }
    }

    /// Drop both brush targets.
    pub fn without_brush_target(self) -> Self {
        let brush = BrushSettings { continuous: None, one_shot: None, ..self.brush };
        Self { brush, ..self }
    }

    /// Parameter block for the step after this one: one-shot brush rain
    /// has been consumed.
    pub fn after_step(self) -> Self {
        let brush = BrushSettings { one_shot: None, ..self.brush };
        Self { brush, ..self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_profiles_validate() {
        for profile in SimulationProfile::all() {
            assert!(profile.params().validate().is_ok(), "{} failed validation", profile);
            assert_eq!(profile.to_string().parse::<SimulationProfile>(), Ok(*profile));
        }
        assert!("swamp".parse::<SimulationProfile>().is_err());
    }

    #[test]
    fn test_zero_pipe_length_rejected() {
        let params = GridParams { pipe_length: 0.0, ..GridParams::default() };
        assert_eq!(
            params.validate(),
            Err(ParamError::NonPositive { name: "pipe_length", value: 0.0 })
        );
    }

    #[test]
    fn test_setter_returns_new_block_and_keeps_old_on_error() {
        let params = GridParams::default();
        let updated = params.with_evaporation_rate(0.2).unwrap();
        assert_eq!(updated.evaporation_rate, 0.2);
        assert_eq!(params.evaporation_rate, GridParams::default().evaporation_rate);

        assert!(params.with_evaporation_rate(1.5).is_err());
        assert!(params.with_dissolving_rate(f32::NAN).is_err());
        assert!(params.with_brush_radius(0.0).is_err());
        assert!(params.with_brush_target(f32::INFINITY, 0.0, BrushMode::OneShot).is_err());
    }

    #[test]
    fn test_unbounded_rates_rejected() {
        let params = GridParams::default();
        assert!(matches!(
            params.with_rain_rate(1e30),
            Err(ParamError::OutOfRange { name: "rain_rate", .. })
        ));
        assert!(params.with_sediment_capacity(f32::MAX).is_err());
        assert!(params.with_thermal(1e6, 0.5).is_err());
        assert!(params.with_brush_strength(1e9).is_err());
        assert!(params.with_rain_rate(MAX_RATE).is_ok());
    }

    #[test]
    fn test_one_shot_target_clears_after_step() {
        let params = GridParams::default();
        let one_shot = params.with_brush_target(3.0, 4.0, BrushMode::OneShot).unwrap();
        assert!(one_shot.brush.is_active());
        assert!(!one_shot.after_step().brush.is_active());

        let continuous = params.with_brush_target(3.0, 4.0, BrushMode::Continuous).unwrap();
        assert!(continuous.after_step().after_step().brush.is_active());
        assert!(!continuous.with_brush_enabled(false).brush.is_active());
    }

    #[test]
    fn test_one_shot_does_not_replace_continuous_target() {
        let both = GridParams::default()
            .with_brush_target(3.0, 4.0, BrushMode::Continuous)
            .and_then(|p| p.with_brush_target(9.0, 1.0, BrushMode::OneShot))
            .unwrap();
        assert_eq!(both.brush.continuous, Some((3.0, 4.0)));
        assert_eq!(both.brush.one_shot, Some((9.0, 1.0)));

        let next = both.after_step();
        assert_eq!(next.brush.continuous, Some((3.0, 4.0)));
        assert_eq!(next.brush.one_shot, None);

        let moved = both.with_brush_target(5.0, 5.0, BrushMode::Continuous).unwrap();
        assert_eq!(moved.brush.one_shot, Some((9.0, 1.0)));
        assert!(!both.without_brush_target().brush.is_active());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let params = GridParams::from_json_str(r#"{ "rain_rate": 0.25, "brush": { "radius": 4.0 } }"#).unwrap();
        assert_eq!(params.rain_rate, 0.25);
        assert_eq!(params.brush.radius, 4.0);
        assert_eq!(params.brush.strength, BrushSettings::default().strength);
        assert_eq!(params.gravity, GridParams::default().gravity);

        assert!(GridParams::from_json_str(r#"{ "time_step": 0.0 }"#).is_err());

        let round_trip = GridParams::from_json_str(&params.to_json_pretty()).unwrap();
        assert_eq!(round_trip, params);
    }
}
