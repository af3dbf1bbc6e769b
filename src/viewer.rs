use minifb::{Key, KeyRepeat, MouseButton, MouseMode, Window, WindowOptions};

use crate::erosion::{SimulationController, SimulationProfile};
use crate::export::{self, RenderStyle};
use crate::heightmap::NoiseHeightfield;

/// Brush radius change per `[` / `]` press, in cells.
const RADIUS_STEP: f32 = 2.0;

/// Viewer options that don't belong to the simulation itself.
#[derive(Clone, Copy, Debug)]
pub struct ViewerOptions {
    /// Seed of the terrain currently loaded; N advances it
    pub seed: u64,
    /// Simulation steps per rendered frame
    pub steps_per_frame: usize,
    pub style: RenderStyle,
}

fn window_scale(width: usize, height: usize) -> usize {
    // Target ~900 pixels on the larger dimension
    let target_size = 900;
    if width.max(height) > target_size {
        1
    } else {
        (target_size / width.max(height).max(1)).max(1)
    }
}

/// Nearest-neighbour upscale of a 0RGB buffer.
fn upscale(pixels: &[u32], width: usize, height: usize, scale: usize) -> Vec<u32> {
    let mut out = Vec::with_capacity(width * height * scale * scale);
    for y in 0..height * scale {
        let row = &pixels[(y / scale) * width..(y / scale + 1) * width];
        for x in 0..width * scale {
            out.push(row[x / scale]);
        }
    }
    out
}

fn render(sim: &mut SimulationController, style: &RenderStyle, scale: usize) -> Vec<u32> {
    let dims = sim.dims();
    let img = if style.show_water {
        match sim.snapshot() {
            Ok(snapshot) => export::render_terrain(&snapshot.height_map(), Some(&snapshot.water_map()), style),
            Err(e) => {
                log::error!("Snapshot failed: {}", e);
                export::render_terrain(sim.height_grid(), None, style)
            }
        }
    } else {
        export::render_terrain(sim.height_grid(), None, style)
    };
    upscale(&export::to_argb(&img), dims.width, dims.height, scale)
}

/// Run the interactive erosion sandbox until the window is closed.
///
/// Space: run/pause, R: reset, N: new terrain, G: global rain, B: brush,
/// W: water overlay, P: next profile, [ ]: brush radius. Left drag rains
/// continuously under the cursor; right click drops one burst.
pub fn run_viewer(mut sim: SimulationController, options: ViewerOptions) -> Result<(), minifb::Error> {
    let dims = sim.dims();
    let scale = window_scale(dims.width, dims.height);
    let window_width = dims.width * scale;
    let window_height = dims.height * scale;

    let mut window = Window::new(
        "Erosion Sandbox - Space: Run/Pause, R: Reset, N: New, Esc: Exit",
        window_width,
        window_height,
        WindowOptions {
            resize: false,
            scale: minifb::Scale::X1,
            ..WindowOptions::default()
        },
    )?;

    // Limit to ~60fps
    window.set_target_fps(60);

    let mut seed = options.seed;
    let mut style = options.style;
    let mut profile_index = SimulationProfile::all()
        .iter()
        .position(|p| p.params() == *sim.params())
        .unwrap_or(0);
    let mut right_was_down = false;
    let mut left_was_down = false;

    println!("Viewer started. Controls:");
    println!("  Space: Run / pause");
    println!("  R: Reset to baked terrain");
    println!("  N: New terrain");
    println!("  G: Toggle global rain");
    println!("  B: Toggle brush");
    println!("  W: Toggle water overlay");
    println!("  P: Next profile");
    println!("  [ ]: Brush radius");
    println!("  Left drag: Continuous rain, Right click: Rain burst");
    println!("  Esc: Exit");

    while window.is_open() && !window.is_key_down(Key::Escape) {
        if window.is_key_pressed(Key::Space, KeyRepeat::No) {
            if sim.is_running() {
                sim.stop();
                println!("Paused at step {}", sim.steps_taken());
            } else {
                sim.start();
                println!("Running");
            }
        }

        if window.is_key_pressed(Key::R, KeyRepeat::No) {
            match sim.reset(None) {
                Ok(()) => println!("Reset"),
                Err(e) => log::error!("Reset failed: {}", e),
            }
        }

        if window.is_key_pressed(Key::N, KeyRepeat::No) {
            seed = seed.wrapping_add(1);
            println!("New terrain with seed: {}", seed);
            let source = NoiseHeightfield::new(dims.width, dims.height, seed);
            if let Err(e) = sim.reset(Some(&source)) {
                log::error!("Terrain generation failed: {}", e);
            }
        }

        if window.is_key_pressed(Key::G, KeyRepeat::No) {
            let enabled = !sim.params().global_rain;
            sim.set_global_rain(enabled);
            println!("Global rain: {}", if enabled { "on" } else { "off" });
        }

        if window.is_key_pressed(Key::B, KeyRepeat::No) {
            let enabled = !sim.params().brush.enabled;
            sim.set_brush_enabled(enabled);
            println!("Brush: {}", if enabled { "on" } else { "off" });
        }

        if window.is_key_pressed(Key::W, KeyRepeat::No) {
            style.show_water = !style.show_water;
        }

        if window.is_key_pressed(Key::P, KeyRepeat::No) {
            let profiles = SimulationProfile::all();
            profile_index = (profile_index + 1) % profiles.len();
            let profile = profiles[profile_index];
            match sim.set_profile(profile) {
                Ok(()) => println!("Profile: {} ({})", profile, profile.description()),
                Err(e) => log::error!("Profile {} rejected: {}", profile, e),
            }
        }

        let radius_delta = if window.is_key_pressed(Key::LeftBracket, KeyRepeat::Yes) {
            -RADIUS_STEP
        } else if window.is_key_pressed(Key::RightBracket, KeyRepeat::Yes) {
            RADIUS_STEP
        } else {
            0.0
        };
        if radius_delta != 0.0 {
            let radius = (sim.params().brush.radius + radius_delta).max(1.0);
            if sim.set_brush_radius(radius).is_ok() {
                println!("Brush radius: {}", radius);
            }
        }

        // Mouse rain, in grid coordinates
        let left_down = window.get_mouse_down(MouseButton::Left);
        let right_down = window.get_mouse_down(MouseButton::Right);
        if let Some((mx, my)) = window.get_mouse_pos(MouseMode::Clamp) {
            let gx = mx / scale as f32;
            let gy = my / scale as f32;
            if left_down {
                if let Err(e) = sim.start_continuous_rain_at_position(gx, gy) {
                    log::warn!("Brush rejected: {}", e);
                }
            }
            if right_down && !right_was_down {
                if let Err(e) = sim.add_rain_at_position(gx, gy) {
                    log::warn!("Brush rejected: {}", e);
                }
            }
        }
        if left_was_down && !left_down {
            sim.stop_continuous_rain();
        }
        left_was_down = left_down;
        right_was_down = right_down;

        for _ in 0..options.steps_per_frame {
            if let Err(e) = sim.step() {
                log::error!("Step failed, pausing: {}", e);
                sim.stop();
                break;
            }
        }

        let buffer = render(&mut sim, &style, scale);
        window.update_with_buffer(&buffer, window_width, window_height)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upscale_repeats_pixels() {
        let out = upscale(&[1, 2, 3, 4], 2, 2, 2);
        assert_eq!(out, vec![1, 1, 2, 2, 1, 1, 2, 2, 3, 3, 4, 4, 3, 3, 4, 4]);
    }

    #[test]
    fn test_window_scale_targets_900() {
        assert_eq!(window_scale(256, 128), 3);
        assert_eq!(window_scale(1024, 512), 1);
        assert_eq!(window_scale(10, 10), 90);
    }
}
