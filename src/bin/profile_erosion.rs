//! Profiling tool: steps per second of each backend at a few grid sizes

use std::time::{Duration, Instant};

use erosion_sandbox::erosion::{ComputeBackend, SimulationController, SimulationProfile};
use erosion_sandbox::heightmap::NoiseHeightfield;

const SEED: u64 = 1337;
const WARMUP_STEPS: usize = 10;
const TIMED_STEPS: usize = 200;

fn profile(size: usize, backend: ComputeBackend) -> Result<(Duration, Duration, &'static str), erosion_sandbox::erosion::SimError> {
    let params = SimulationProfile::Torrential.params();

    let start = Instant::now();
    let mut sim = SimulationController::new(size, size, params, backend)?;
    sim.initialize_terrain(&NoiseHeightfield::new(size, size, SEED))?;
    let setup_time = start.elapsed();

    sim.start();
    for _ in 0..WARMUP_STEPS {
        sim.step()?;
    }

    let start = Instant::now();
    for _ in 0..TIMED_STEPS {
        sim.step()?;
    }
    let step_time = start.elapsed();
    Ok((setup_time, step_time, sim.backend_name()))
}

fn main() {
    env_logger::init();

    println!("=== Erosion Step Profiling ===");
    println!("Profile: torrential, {} timed steps after {} warm-up", TIMED_STEPS, WARMUP_STEPS);
    println!();

    let sizes = [128usize, 256, 512, 1024];
    let mut results = Vec::new();

    for &size in &sizes {
        for backend in [ComputeBackend::Cpu, ComputeBackend::Gpu] {
            match profile(size, backend) {
                Ok((setup, steps, name)) => {
                    println!("{:>5}x{:<5} {:>4}: setup {:?}, steps {:?}", size, size, name, setup, steps);
                    results.push((size, name, steps));
                }
                Err(e) => println!("{:>5}x{:<5} {:>4}: unavailable ({})", size, size, backend, e),
            }
        }
    }

    println!("\n=== Summary ===");
    println!("{:>11} {:>5} {:>12} {:>14}", "grid", "back", "steps/s", "Mcells/s");
    for (size, name, time) in results {
        let per_second = TIMED_STEPS as f64 / time.as_secs_f64().max(1e-9);
        let cells = (size * size) as f64 * per_second / 1e6;
        println!("{:>5}x{:<5} {:>5} {:>12.1} {:>14.1}", size, size, name, per_second, cells);
    }
}
