use std::error::Error;
use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;

use erosion_sandbox::erosion::{ComputeBackend, GridParams, SimulationController, SimulationProfile};
use erosion_sandbox::export::{self, RenderStyle};
use erosion_sandbox::heightmap::{HeightfieldSource, ImageHeightfield, NoiseHeightfield};
use erosion_sandbox::viewer::{self, ViewerOptions};

#[derive(Parser, Debug)]
#[command(name = "erosion_sandbox")]
#[command(about = "Grid-based hydraulic erosion: run headless or explore interactively")]
struct Args {
    /// Grid width in cells
    #[arg(short = 'W', long, default_value = "256")]
    width: usize,

    /// Grid height in cells
    #[arg(short = 'H', long, default_value = "256")]
    height: usize,

    /// Terrain seed (uses random seed if not specified)
    #[arg(short, long)]
    seed: Option<u64>,

    /// Grayscale image to use as terrain instead of noise (resampled to the grid)
    #[arg(long)]
    terrain: Option<PathBuf>,

    /// Parameter preset: reference, gentle, torrential, arid
    #[arg(short, long, default_value = "reference")]
    profile: SimulationProfile,

    /// JSON parameter file; overrides the profile (missing fields use defaults)
    #[arg(long)]
    params: Option<PathBuf>,

    /// Print the effective parameters as JSON and exit
    #[arg(long)]
    dump_params: bool,

    /// Compute backend: auto, cpu, gpu
    #[arg(short, long, default_value = "auto")]
    backend: ComputeBackend,

    /// Worker threads for the CPU backend (default: one per core)
    #[arg(long)]
    threads: Option<usize>,

    /// Number of steps for a headless run
    #[arg(short = 'n', long, default_value = "600")]
    steps: usize,

    /// Enable uniform rain over the whole grid
    #[arg(long)]
    global_rain: bool,

    /// Continuous brush rain at "X,Y" (cell coordinates)
    #[arg(long, value_parser = parse_point)]
    rain: Option<(f32, f32)>,

    /// Shaded PNG written after a headless run
    #[arg(short, long, default_value = "erosion.png")]
    output: PathBuf,

    /// Also write the final terrain as a 16-bit grayscale PNG
    #[arg(long)]
    heightmap_out: Option<PathBuf>,

    /// Also write the final water depth as a PNG
    #[arg(long)]
    water_out: Option<PathBuf>,

    /// Open the interactive viewer instead of running headless
    #[arg(long)]
    view: bool,

    /// Simulation steps per frame in the viewer
    #[arg(long, default_value = "2")]
    steps_per_frame: usize,
}

fn parse_point(s: &str) -> Result<(f32, f32), String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y, got '{}'", s))?;
    let x = x.trim().parse::<f32>().map_err(|e| format!("bad X in '{}': {}", s, e))?;
    let y = y.trim().parse::<f32>().map_err(|e| format!("bad Y in '{}': {}", s, e))?;
    Ok((x, y))
}

fn load_params(args: &Args) -> Result<GridParams, String> {
    let params = match &args.params {
        Some(path) => GridParams::from_json_file(path)?,
        None => args.profile.params(),
    };
    Ok(if args.global_rain { params.with_global_rain(true) } else { params })
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let params = load_params(&args)?;
    if args.dump_params {
        println!("{}", params.to_json_pretty());
        return Ok(());
    }

    let seed = args.seed.unwrap_or_else(rand::random);
    let mut sim = SimulationController::with_worker_threads(
        args.width,
        args.height,
        params,
        args.backend,
        args.threads,
    )?;

    let source: Box<dyn HeightfieldSource> = match &args.terrain {
        Some(path) => {
            println!("Loading terrain from {}", path.display());
            Box::new(ImageHeightfield::open(path)?.fit(args.width, args.height))
        }
        None => {
            println!("Generating terrain with seed: {}", seed);
            Box::new(NoiseHeightfield::new(args.width, args.height, seed))
        }
    };
    sim.initialize_terrain(source.as_ref())?;

    if let Some((x, y)) = args.rain {
        sim.start_continuous_rain_at_position(x, y)?;
    }

    let style = RenderStyle {
        max_height: params.height_scale.min(params.max_height),
        ..RenderStyle::default()
    };

    if args.view {
        viewer::run_viewer(
            sim,
            ViewerOptions {
                seed,
                steps_per_frame: args.steps_per_frame,
                style,
            },
        )?;
        return Ok(());
    }

    println!(
        "Running {} steps on {}x{} ({} backend, profile {})",
        args.steps,
        args.width,
        args.height,
        sim.backend_name(),
        args.profile
    );
    let before = sim.totals()?;

    sim.start();
    let start = Instant::now();
    let report_every = (args.steps / 10).max(1);
    for i in 0..args.steps {
        sim.step()?;
        if (i + 1) % report_every == 0 {
            println!("  step {:>6}/{} ({:?})", i + 1, args.steps, start.elapsed());
        }
    }
    let elapsed = start.elapsed();
    sim.stop();

    let snapshot = sim.snapshot()?;
    let after = snapshot.totals();
    println!("\n=== Summary ===");
    println!("Steps:          {} in {:?} ({:.1} steps/s)", args.steps, elapsed, args.steps as f64 / elapsed.as_secs_f64().max(1e-9));
    println!("Terrain:        {:.3} -> {:.3}", before.height, after.height);
    println!("Water:          {:.3}", after.water);
    println!("Sediment:       {:.3}", after.sediment);
    println!("Max speed:      {:.3}", after.max_speed);

    export::export_snapshot(&snapshot, &style, &args.output)?;
    println!("Wrote {}", args.output.display());
    if let Some(path) = &args.heightmap_out {
        export::export_heightmap_gray16(&snapshot.height_map(), params.max_height, path)?;
        println!("Wrote {}", path.display());
    }
    if let Some(path) = &args.water_out {
        export::render_water_depth(&snapshot.water_map(), style.water_full_depth).save(path)?;
        println!("Wrote {}", path.display());
    }
    Ok(())
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
