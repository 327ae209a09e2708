//! Sample-image generation.
//!
//! Runs the model's guided sampler and writes the batch as one tiled PNG,
//! step-suffixed so successive saves never collide.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use candle_core::Device;
use tracing::info;

use ddpmkd_core::Ddpm;

use crate::viz::render_image_grid;

/// Guidance weight used for evaluation samples.
pub const SAMPLE_GUIDE_W: f64 = 2.0;
/// Sample grids are tiled at a fixed ten columns.
pub const GRID_COLUMNS: usize = 10;
/// Pinned sample shape: single-channel 28×28.
pub const SAMPLE_SHAPE: (usize, usize, usize) = (1, 28, 28);

/// Sample `num_save_image` images from `model` and write
/// `<save_dir>/sample_image_step_<step>.png`.
///
/// Pixel intensity is inverted (the sampler produces white-on-black digits;
/// the saved grid is black-on-white) and the batch is tiled into
/// [`GRID_COLUMNS`] columns. `save_dir` is created if missing. Returns the
/// written path.
pub fn sample_images(
    model: &Ddpm,
    num_save_image: usize,
    save_dir: &Path,
    step: usize,
    device: &Device,
) -> Result<PathBuf> {
    let x = model
        .sample(num_save_image, SAMPLE_SHAPE, device, SAMPLE_GUIDE_W)
        .context("Sampling failed")?;

    // White-on-black to black-on-white.
    let x = x.affine(-1.0, 1.0)?.clamp(0f32, 1f32)?;

    let grid = render_image_grid(&x, num_save_image, GRID_COLUMNS)?;

    std::fs::create_dir_all(save_dir)
        .with_context(|| format!("Cannot create sample dir {}", save_dir.display()))?;
    let path = save_dir.join(format!("sample_image_step_{step}.png"));
    grid.save(&path)
        .with_context(|| format!("Cannot write {}", path.display()))?;

    info!(step, path = %path.display(), "Sample grid written");
    Ok(path)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
