use std::path::Path;

use noise::{NoiseFn, Perlin, Seedable};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::tilemap::Tilemap;

// =============================================================================
// SOURCE TRAIT
// =============================================================================

/// Anything that can produce an initial terrain for the simulation.
///
/// `bake` returns a `resolution()`-sized grid with values in [0, 1]. The
/// simulation treats sources as opaque: it only checks that the size
/// matches and that every value is finite.
pub trait HeightfieldSource {
    fn resolution(&self) -> (usize, usize);

    fn bake(&self) -> Tilemap<f32>;
}

impl HeightfieldSource for Tilemap<f32> {
    fn resolution(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn bake(&self) -> Tilemap<f32> {
        self.clone()
    }
}

// =============================================================================
// FLAT
// =============================================================================

/// Constant-height plain. Mostly useful for rain experiments.
#[derive(Clone, Copy, Debug)]
pub struct FlatHeightfield {
    pub width: usize,
    pub height: usize,
    pub level: f32,
}

impl FlatHeightfield {
    pub fn new(width: usize, height: usize, level: f32) -> Self {
        Self { width, height, level }
    }
}

impl HeightfieldSource for FlatHeightfield {
    fn resolution(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn bake(&self) -> Tilemap<f32> {
        Tilemap::new_with(self.width, self.height, self.level)
    }
}

// =============================================================================
// NOISE
// =============================================================================

/// Parameters for procedural terrain
#[derive(Clone, Copy, Debug)]
pub struct TerrainParams {
    /// Base frequency in features per grid width (lower = larger features)
    pub base_frequency: f64,
    /// Number of noise octaves
    pub octaves: u32,
    /// Amplitude decay per octave (0.0-1.0)
    pub persistence: f64,
    /// Frequency multiplier per octave
    pub lacunarity: f64,
    /// Domain warping strength
    pub warp_strength: f64,
    /// Radial falloff toward the edges; 0 disables the island mask
    pub island_falloff: f64,
}

impl Default for TerrainParams {
    fn default() -> Self {
        Self {
            base_frequency: 3.0,
            octaves: 6,
            persistence: 0.5,
            lacunarity: 2.0,
            warp_strength: 0.15,
            island_falloff: 0.6,
        }
    }
}

/// Layered Perlin fBm with domain warping, remapped to [0, 1].
#[derive(Clone, Copy, Debug)]
pub struct NoiseHeightfield {
    pub width: usize,
    pub height: usize,
    pub seed: u64,
    pub params: TerrainParams,
}

impl NoiseHeightfield {
    pub fn new(width: usize, height: usize, seed: u64) -> Self {
        Self {
            width,
            height,
            seed,
            params: TerrainParams::default(),
        }
    }

    pub fn with_params(mut self, params: TerrainParams) -> Self {
        self.params = params;
        self
    }
}

impl HeightfieldSource for NoiseHeightfield {
    fn resolution(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn bake(&self) -> Tilemap<f32> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let terrain_noise = Perlin::new(1).set_seed(rng.gen());
        let warp_noise = Perlin::new(1).set_seed(rng.gen());
        let offset_x: f64 = rng.gen_range(0.0..256.0);
        let offset_y: f64 = rng.gen_range(0.0..256.0);

        let p = self.params;
        let scale = self.width.max(self.height).max(1) as f64;

        let mut map = Tilemap::from_fn(self.width, self.height, |x, y| {
            let nx = x as f64 / scale;
            let ny = y as f64 / scale;
            let (wx, wy) = apply_domain_warp(nx, ny, &warp_noise, p.warp_strength);
            let value = fbm(
                &terrain_noise,
                wx * p.base_frequency + offset_x,
                wy * p.base_frequency + offset_y,
                p.octaves,
                p.persistence,
                p.lacunarity,
            );
            let mut h = (value * 0.5 + 0.5).clamp(0.0, 1.0) as f32;

            if p.island_falloff > 0.0 {
                let cx = x as f64 / self.width.max(1) as f64 - 0.5;
                let cy = y as f64 / self.height.max(1) as f64 - 0.5;
                let r = (cx * cx + cy * cy).sqrt() * 2.0;
                let mask = (1.0 - (r * p.island_falloff).powi(2)).clamp(0.0, 1.0);
                h *= mask as f32;
            }
            h
        });

        normalize(&mut map);
        map
    }
}

/// Fractional Brownian Motion - multi-octave noise
fn fbm(noise: &Perlin, x: f64, y: f64, octaves: u32, persistence: f64, lacunarity: f64) -> f64 {
    let mut total = 0.0;
    let mut amplitude = 1.0;
    let mut frequency = 1.0;
    let mut max_value = 0.0;

    for _ in 0..octaves {
        total += amplitude * noise.get([x * frequency, y * frequency]);
        max_value += amplitude;
        amplitude *= persistence;
        frequency *= lacunarity;
    }

    if max_value > 0.0 { total / max_value } else { 0.0 }
}

/// Domain warping - distort coordinates for organic shapes
fn apply_domain_warp(x: f64, y: f64, noise: &Perlin, strength: f64) -> (f64, f64) {
    let warp_scale = 4.0;
    let warp_x = noise.get([x * warp_scale, y * warp_scale]);
    let warp_y = noise.get([x * warp_scale + 5.2, y * warp_scale + 1.3]);
    (x + warp_x * strength, y + warp_y * strength)
}

/// Stretch values to exactly [0, 1]. A constant map becomes all zeros.
pub fn normalize(map: &mut Tilemap<f32>) {
    let (min, max) = map.min_max();
    let range = max - min;
    for v in map.as_mut_slice() {
        *v = if range > f32::EPSILON { (*v - min) / range } else { 0.0 };
    }
}

// =============================================================================
// IMAGE
// =============================================================================

/// Grayscale image used as a heightmap (black = 0, white = 1).
#[derive(Clone, Debug)]
pub struct ImageHeightfield {
    map: Tilemap<f32>,
}

impl ImageHeightfield {
    /// Load any format the `image` crate can decode, at native resolution.
    pub fn open(path: &Path) -> Result<Self, image::ImageError> {
        let img = image::open(path)?.into_luma16();
        let (w, h) = img.dimensions();
        let map = Tilemap::from_fn(w as usize, h as usize, |x, y| {
            img.get_pixel(x as u32, y as u32)[0] as f32 / u16::MAX as f32
        });
        Ok(Self { map })
    }

    /// Resample to `width` x `height` with bilinear filtering.
    pub fn fit(&self, width: usize, height: usize) -> Self {
        if (width, height) == self.resolution() {
            return self.clone();
        }
        let sx = self.map.width.saturating_sub(1) as f32 / width.saturating_sub(1).max(1) as f32;
        let sy = self.map.height.saturating_sub(1) as f32 / height.saturating_sub(1).max(1) as f32;
        let map = Tilemap::from_fn(width, height, |x, y| self.map.sample_bilinear(x as f32 * sx, y as f32 * sy));
        Self { map }
    }
}

impl HeightfieldSource for ImageHeightfield {
    fn resolution(&self) -> (usize, usize) {
        (self.map.width, self.map.height)
    }

    fn bake(&self) -> Tilemap<f32> {
        self.map.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noise_is_normalized_and_seeded() {
        let a = NoiseHeightfield::new(48, 32, 7).bake();
        let b = NoiseHeightfield::new(48, 32, 7).bake();
        let c = NoiseHeightfield::new(48, 32, 8).bake();
        assert_eq!((a.width, a.height), (48, 32));
        assert_eq!(a.as_slice(), b.as_slice());
        assert_ne!(a.as_slice(), c.as_slice());

        let (min, max) = a.min_max();
        assert!(min.abs() < 1e-6);
        assert!((max - 1.0).abs() < 1e-6);
        assert!(a.as_slice().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_island_mask_lowers_edges() {
        let params = TerrainParams { island_falloff: 1.0, ..TerrainParams::default() };
        let map = NoiseHeightfield::new(64, 64, 3).with_params(params).bake();
        let edge: f32 = (0..64).map(|x| *map.get(x, 0)).sum::<f32>() / 64.0;
        assert!(edge < 1e-6);
        let centre: f32 = (28..36).map(|x| *map.get(x, 32)).sum::<f32>() / 8.0;
        assert!(edge < centre);
    }

    #[test]
    fn test_image_round_trip() {
        let dir = std::env::temp_dir().join(format!("heightfield_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("ramp.png");
        let img = image::GrayImage::from_fn(5, 3, |x, _| image::Luma([(x * 255 / 4) as u8]));
        img.save(&path).unwrap();

        let source = ImageHeightfield::open(&path).unwrap();
        assert_eq!(source.resolution(), (5, 3));
        let map = source.bake();
        assert!(map.get(0, 1).abs() < 1e-6);
        assert!((map.get(4, 1) - 1.0).abs() < 1e-6);

        let fitted = source.fit(9, 5);
        assert_eq!(fitted.resolution(), (9, 5));
        assert!((fitted.bake().get(4, 2) - 0.5).abs() < 0.01);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_flat_source() {
        let map = FlatHeightfield::new(3, 2, 0.4).bake();
        assert!(map.as_slice().iter().all(|&v| v == 0.4));
    }
}
