use std::path::Path;

use image::{ImageBuffer, Luma, Rgb, RgbImage};

use crate::erosion::FieldSnapshot;
use crate::tilemap::Tilemap;

/// Water shallower than this is not drawn.
const MIN_VISIBLE_WATER: f32 = 1e-3;

/// Settings for terrain rendering.
#[derive(Clone, Copy, Debug)]
pub struct RenderStyle {
    /// Height that maps to the top of the colour ramp
    pub max_height: f32,
    /// Vertical exaggeration for the hillshade normals
    pub relief: f32,
    /// Draw water depth on top of the terrain
    pub show_water: bool,
    /// Depth at which water reaches full opacity
    pub water_full_depth: f32,
}

impl Default for RenderStyle {
    fn default() -> Self {
        Self {
            max_height: 1.0,
            relief: 8.0,
            show_water: true,
            water_full_depth: 0.05,
        }
    }
}

fn lerp_color(a: [u8; 3], b: [u8; 3], t: f32) -> [u8; 3] {
    let t = t.clamp(0.0, 1.0);
    [
        (a[0] as f32 + (b[0] as f32 - a[0] as f32) * t) as u8,
        (a[1] as f32 + (b[1] as f32 - a[1] as f32) * t) as u8,
        (a[2] as f32 + (b[2] as f32 - a[2] as f32) * t) as u8,
    ]
}

/// Elevation ramp: sand -> green -> brown -> rock -> snow
fn land_color(t: f32) -> [u8; 3] {
    let stops: [(f32, [u8; 3]); 5] = [
        (0.0, [194, 178, 128]),
        (0.15, [80, 140, 60]),
        (0.5, [139, 115, 85]),
        (0.8, [120, 120, 120]),
        (1.0, [245, 245, 250]),
    ];
    let t = t.clamp(0.0, 1.0);
    for pair in stops.windows(2) {
        let (t0, c0) = pair[0];
        let (t1, c1) = pair[1];
        if t <= t1 {
            return lerp_color(c0, c1, (t - t0) / (t1 - t0));
        }
    }
    stops[stops.len() - 1].1
}

fn normalize_vec3(x: f32, y: f32, z: f32) -> [f32; 3] {
    let len = (x * x + y * y + z * z).sqrt();
    [x / len, y / len, z / len]
}

/// Lambert shade factor in [ambient, 1] from central differences, light
/// from the north-west.
fn hillshade(heightmap: &Tilemap<f32>, x: usize, y: usize, relief: f32) -> f32 {
    let h = *heightmap.get(x, y);
    let h_left = if x > 0 { *heightmap.get(x - 1, y) } else { h };
    let h_right = if x + 1 < heightmap.width { *heightmap.get(x + 1, y) } else { h };
    let h_up = if y > 0 { *heightmap.get(x, y - 1) } else { h };
    let h_down = if y + 1 < heightmap.height { *heightmap.get(x, y + 1) } else { h };

    let normal = normalize_vec3((h_left - h_right) * relief, (h_up - h_down) * relief, 1.0);
    let light = normalize_vec3(-1.0, -1.0, 2.0);
    let diffuse = (normal[0] * light[0] + normal[1] * light[1] + normal[2] * light[2]).max(0.0);
    let ambient = 0.35;
    ambient + (1.0 - ambient) * diffuse
}

/// Hillshaded terrain, optionally with water drawn over it.
pub fn render_terrain(heightmap: &Tilemap<f32>, water: Option<&Tilemap<f32>>, style: &RenderStyle) -> RgbImage {
    let mut img: RgbImage = ImageBuffer::new(heightmap.width as u32, heightmap.height as u32);
    let top = style.max_height.max(f32::EPSILON);

    for y in 0..heightmap.height {
        for x in 0..heightmap.width {
            let h = *heightmap.get(x, y);
            let shade = hillshade(heightmap, x, y, style.relief);
            let base = land_color(h / top);
            let mut color = [
                (base[0] as f32 * shade).clamp(0.0, 255.0) as u8,
                (base[1] as f32 * shade).clamp(0.0, 255.0) as u8,
                (base[2] as f32 * shade).clamp(0.0, 255.0) as u8,
            ];

            if let (true, Some(water)) = (style.show_water, water) {
                let depth = *water.get(x, y);
                if depth > MIN_VISIBLE_WATER {
                    let t = (depth / style.water_full_depth).clamp(0.0, 1.0);
                    let deep = lerp_color([90, 170, 230], [20, 50, 140], t);
                    color = lerp_color(color, deep, 0.35 + 0.6 * t);
                }
            }

            img.put_pixel(x as u32, y as u32, Rgb(color));
        }
    }
    img
}

/// Water depth as a blue ramp over black.
pub fn render_water_depth(water: &Tilemap<f32>, full_depth: f32) -> RgbImage {
    ImageBuffer::from_fn(water.width as u32, water.height as u32, |x, y| {
        let t = (*water.get(x as usize, y as usize) / full_depth.max(f32::EPSILON)).clamp(0.0, 1.0);
        Rgb(lerp_color([0, 0, 0], [120, 200, 255], t.sqrt()))
    })
}

/// Pack an image into minifb's 0RGB `u32` layout.
pub fn to_argb(img: &RgbImage) -> Vec<u32> {
    img.pixels()
        .map(|p| ((p[0] as u32) << 16) | ((p[1] as u32) << 8) | p[2] as u32)
        .collect()
}

/// Save the current simulation state as a shaded PNG.
pub fn export_snapshot(snapshot: &FieldSnapshot, style: &RenderStyle, path: &Path) -> Result<(), image::ImageError> {
    let water = snapshot.water_map();
    render_terrain(&snapshot.height_map(), Some(&water), style).save(path)
}

/// Save terrain as 16-bit grayscale, `max_height` mapping to white. The
/// result can be loaded back with `ImageHeightfield`.
pub fn export_heightmap_gray16(heightmap: &Tilemap<f32>, max_height: f32, path: &Path) -> Result<(), image::ImageError> {
    let top = max_height.max(f32::EPSILON);
    let img: ImageBuffer<Luma<u16>, Vec<u16>> =
        ImageBuffer::from_fn(heightmap.width as u32, heightmap.height as u32, |x, y| {
            let t = (*heightmap.get(x as usize, y as usize) / top).clamp(0.0, 1.0);
            Luma([(t * u16::MAX as f32).round() as u16])
        });
    img.save(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightmap::{HeightfieldSource, ImageHeightfield};

    #[test]
    fn test_water_tints_pixels_blue() {
        let terrain = Tilemap::new_with(4, 4, 0.3f32);
        let mut water = Tilemap::new_with(4, 4, 0.0f32);
        water.set(1, 1, 0.2);
        let img = render_terrain(&terrain, Some(&water), &RenderStyle::default());

        let dry = img.get_pixel(3, 3);
        let wet = img.get_pixel(1, 1);
        assert!(wet[2] > wet[0]);
        assert_ne!(dry, wet);

        let hidden = render_terrain(&terrain, Some(&water), &RenderStyle { show_water: false, ..RenderStyle::default() });
        assert_eq!(hidden.get_pixel(1, 1), dry);
    }

    #[test]
    fn test_color_ramp_endpoints() {
        assert_eq!(land_color(0.0), [194, 178, 128]);
        assert_eq!(land_color(1.0), [245, 245, 250]);
        assert_eq!(land_color(7.0), [245, 245, 250]);
    }

    #[test]
    fn test_gray16_reloads_as_heightfield() {
        let dir = std::env::temp_dir().join(format!("export_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("terrain.png");

        let terrain = Tilemap::from_fn(6, 4, |x, y| (x + y) as f32 * 0.2);
        export_heightmap_gray16(&terrain, 2.0, &path).unwrap();
        let loaded = ImageHeightfield::open(&path).unwrap();
        assert_eq!(loaded.resolution(), (6, 4));
        let baked = loaded.bake();
        for y in 0..4 {
            for x in 0..6 {
                let expected = terrain.get(x, y) / 2.0;
                assert!((baked.get(x, y) - expected).abs() < 1e-4);
            }
        }
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_water_depth_ramp() {
        let mut water = Tilemap::new_with(3, 1, 0.0f32);
        water.set(1, 0, 0.1);
        water.set(2, 0, 5.0);
        let img = render_water_depth(&water, 0.4);
        assert_eq!(img.dimensions(), (3, 1));
        assert_eq!(*img.get_pixel(0, 0), Rgb([0, 0, 0]));
        assert_eq!(*img.get_pixel(2, 0), Rgb([120, 200, 255]));
        let mid = img.get_pixel(1, 0);
        assert!(mid[2] > 0 && mid[2] < 255);
    }

    #[test]
    fn test_argb_packing() {
        let img = ImageBuffer::from_pixel(1, 1, Rgb([0x12u8, 0x34, 0x56]));
        assert_eq!(to_argb(&img), vec![0x123456]);
    }
}
