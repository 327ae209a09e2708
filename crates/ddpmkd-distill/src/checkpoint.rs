//! Training checkpoints.
//!
//! A checkpoint is one step-suffixed pair of files in the log directory:
//!
//! ```text
//! <logdir>/
//!   student_ckpt_step_<N>.safetensors   full student parameter set
//!   student_ckpt_step_<N>.json          {step, optimizer} metadata sidecar
//! ```
//!
//! candle's `AdamW` does not expose its moment buffers, so the optimiser
//! entry records the hyper-parameters it was built with; restoring rebuilds
//! the optimiser from those rather than resuming its internal state. Writes
//! are not atomic — a crash mid-write can leave a truncated file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use candle_nn::optim::ParamsAdamW;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::student::StudentModel;

/// Serializable AdamW hyper-parameter record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerState {
    pub lr: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    pub weight_decay: f64,
}

impl From<&ParamsAdamW> for OptimizerState {
    fn from(p: &ParamsAdamW) -> Self {
        Self {
            lr: p.lr,
            beta1: p.beta1,
            beta2: p.beta2,
            eps: p.eps,
            weight_decay: p.weight_decay,
        }
    }
}

impl From<OptimizerState> for ParamsAdamW {
    fn from(s: OptimizerState) -> Self {
        Self {
            lr: s.lr,
            beta1: s.beta1,
            beta2: s.beta2,
            eps: s.eps,
            weight_decay: s.weight_decay,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct CheckpointMeta {
    step: usize,
    optimizer: OptimizerState,
}

/// The `(weights, metadata)` paths a checkpoint for `step` occupies.
pub fn checkpoint_paths(logdir: &Path, step: usize) -> (PathBuf, PathBuf) {
    (
        logdir.join(format!("student_ckpt_step_{step}.safetensors")),
        logdir.join(format!("student_ckpt_step_{step}.json")),
    )
}

/// Write the student's parameters, the optimiser record, and the step.
///
/// Creates `logdir` if it does not exist (idempotent).
pub fn save_checkpoint(
    student: &StudentModel,
    optim: &ParamsAdamW,
    step: usize,
    logdir: &Path,
) -> Result<()> {
    std::fs::create_dir_all(logdir)
        .with_context(|| format!("Cannot create checkpoint dir {}", logdir.display()))?;

    let (weights_path, meta_path) = checkpoint_paths(logdir, step);

    student
        .varmap()
        .save(&weights_path)
        .with_context(|| format!("Cannot write {}", weights_path.display()))?;

    let meta = CheckpointMeta {
        step,
        optimizer: OptimizerState::from(optim),
    };
    std::fs::write(&meta_path, serde_json::to_string_pretty(&meta)?)
        .with_context(|| format!("Cannot write {}", meta_path.display()))?;

    info!(step, path = %weights_path.display(), "Checkpoint saved");
    Ok(())
}

/// Restore the checkpoint saved at `step` into `student`.
///
/// Returns the recorded step and the AdamW hyper-parameters to rebuild the
/// optimiser with. Parameters are restored bit-equal; a missing file or a
/// parameter absent from the weights file is fatal.
pub fn load_checkpoint(
    student: &mut StudentModel,
    logdir: &Path,
    step: usize,
) -> Result<(usize, ParamsAdamW)> {
    let (weights_path, meta_path) = checkpoint_paths(logdir, step);

    student
        .varmap_mut()
        .load(&weights_path)
        .with_context(|| format!("Cannot restore weights from {}", weights_path.display()))?;

    let meta: CheckpointMeta = serde_json::from_str(
        &std::fs::read_to_string(&meta_path)
            .with_context(|| format!("Cannot read {}", meta_path.display()))?,
    )
    .with_context(|| format!("Malformed checkpoint metadata {}", meta_path.display()))?;

    info!(step = meta.step, path = %weights_path.display(), "Checkpoint restored");
    Ok((meta.step, meta.optimizer.into()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
