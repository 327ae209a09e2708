//! Frozen teacher model.
//!
//! The teacher is the fully trained DDPM whose outputs guide the student.
//! Its weights are restored strictly from a SafeTensors checkpoint and held
//! as plain detached tensors, so nothing about it can receive a gradient —
//! the candle equivalent of switching to eval mode and disabling
//! `requires_grad` on every parameter.

use std::path::Path;

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use tracing::info;

use ddpmkd_core::{Ddpm, DdpmConfig};

/// A trained DDPM restored from disk, frozen for the rest of the run.
pub struct TeacherModel {
    model: Ddpm,
}

impl TeacherModel {
    /// Restore the pinned MNIST architecture from `model_path`.
    ///
    /// The load is strict: a missing file, a missing parameter, or a shape
    /// mismatch between the checkpoint and the constructed architecture is
    /// fatal and propagates to the caller.
    pub fn load(model_path: &Path, n_t: usize, device: &Device) -> Result<Self> {
        Self::load_with_config(model_path, DdpmConfig::mnist(n_t), device)
    }

    /// Like [`TeacherModel::load`] with an explicit architecture config.
    pub fn load_with_config(
        model_path: &Path,
        config: DdpmConfig,
        device: &Device,
    ) -> Result<Self> {
        let tensors = candle_core::safetensors::load(model_path, device)
            .with_context(|| format!("Cannot read teacher checkpoint {}", model_path.display()))?;

        let vb = VarBuilder::from_tensors(tensors, DType::F32, device);
        let model = Ddpm::new(config, vb).with_context(|| {
            format!(
                "Teacher checkpoint {} does not match the constructed architecture",
                model_path.display()
            )
        })?;

        info!(
            path = %model_path.display(),
            n_t = model.config().n_t,
            "Teacher model loaded; all parameters frozen"
        );
        Ok(Self { model })
    }

    pub fn model(&self) -> &Ddpm {
        &self.model
    }

    /// Guided sampling with the teacher's weights.
    pub fn sample(
        &self,
        n_sample: usize,
        size: (usize, usize, usize),
        device: &Device,
        guide_w: f64,
    ) -> Result<Tensor> {
        self.model
            .sample(n_sample, size, device, guide_w)
            .context("Teacher sampling failed")
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
