//! Debug tool for comparing simulation profiles visually.
//! Runs every profile on the same terrain and writes a grid of shaded
//! results (with water) to `erosion_comparison.png`.

use image::{ImageBuffer, Rgb, RgbImage};

use erosion_sandbox::erosion::{ComputeBackend, GridParams, SimulationController, SimulationProfile};
use erosion_sandbox::export::{self, RenderStyle};
use erosion_sandbox::heightmap::{HeightfieldSource, NoiseHeightfield};

const WIDTH: usize = 192;
const HEIGHT: usize = 192;
const SEED: u64 = 42;
const STEPS: usize = 900;

fn main() {
    env_logger::init();
    println!("Generating erosion comparison grid...");

    let source = NoiseHeightfield::new(WIDTH, HEIGHT, SEED);
    let style = RenderStyle::default();

    let mut variants: Vec<(String, Option<GridParams>)> = vec![("Initial terrain".to_string(), None)];
    for profile in SimulationProfile::all() {
        variants.push((format!("{} + global rain", profile), Some(profile.params().with_global_rain(true))));
    }
    variants.push((
        "reference, no thermal".to_string(),
        SimulationProfile::Reference
            .params()
            .with_global_rain(true)
            .with_thermal(0.0, 0.6)
            .ok(),
    ));

    let mut images: Vec<(String, RgbImage)> = Vec::new();
    for (name, params) in &variants {
        println!("  Processing: {}", name);
        let img = match params {
            None => export::render_terrain(&source.bake(), None, &style),
            Some(params) => match run_variant(&source, *params, &style) {
                Ok(img) => img,
                Err(e) => {
                    eprintln!("    failed: {}", e);
                    continue;
                }
            },
        };
        images.push((name.clone(), img));
    }

    let cols = 3;
    let rows = images.len().div_ceil(cols);
    let grid = create_grid(&images, cols, rows);
    grid.save("erosion_comparison.png").expect("Failed to save grid");

    println!("Layout (row-major):");
    for (i, (name, _)) in images.iter().enumerate() {
        println!("  [{}, {}] {}", i / cols, i % cols, name);
    }
    println!("Saved erosion_comparison.png");
}

fn run_variant(
    source: &dyn HeightfieldSource,
    params: GridParams,
    style: &RenderStyle,
) -> Result<RgbImage, erosion_sandbox::erosion::SimError> {
    let (width, height) = source.resolution();
    let mut sim = SimulationController::new(width, height, params, ComputeBackend::Auto)?;
    sim.initialize_terrain(source)?;
    sim.start();
    for _ in 0..STEPS {
        sim.step()?;
    }

    let snapshot = sim.snapshot()?;
    let totals = snapshot.totals();
    println!(
        "    terrain {:.2}, water {:.2}, sediment {:.3}",
        totals.height, totals.water, totals.sediment
    );
    Ok(export::render_terrain(&snapshot.height_map(), Some(&snapshot.water_map()), style))
}

fn create_grid(images: &[(String, RgbImage)], cols: usize, rows: usize) -> RgbImage {
    if images.is_empty() {
        return ImageBuffer::new(1, 1);
    }

    let cell_width = images[0].1.width();
    let cell_height = images[0].1.height();
    let gap = 4u32;

    let grid_width = (cell_width + gap) * cols as u32 + gap;
    let grid_height = (cell_height + gap) * rows as u32 + gap;

    let mut grid: RgbImage = ImageBuffer::from_pixel(grid_width, grid_height, Rgb([40, 40, 40]));

    for (idx, (_, img)) in images.iter().enumerate() {
        let col = (idx % cols) as u32;
        let row = (idx / cols) as u32;
        let x_offset = gap + col * (cell_width + gap);
        let y_offset = gap + row * (cell_height + gap);

        for y in 0..cell_height.min(img.height()) {
            for x in 0..cell_width.min(img.width()) {
                grid.put_pixel(x_offset + x, y_offset + y, *img.get_pixel(x, y));
            }
        }
    }

    grid
}
