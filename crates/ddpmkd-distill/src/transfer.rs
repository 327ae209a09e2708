//! Selective weight transfer and freeze.
//!
//! Copies the four embedding sub-layers of a pretrained DDPM checkpoint into
//! a freshly initialised student and disables gradient updates for them. All
//! other student parameters keep their fresh values.
//!
//! Membership is decided by structural sub-tree scoping: a checkpoint key
//! belongs to a layer iff its first dotted path segment equals the layer
//! name. This replaces infix substring matching, which could overwrite
//! unrelated parameters whose names merely contain one of the layer names.

use std::path::Path;

use anyhow::{Context, Result};
use candle_core::Device;
use tracing::{info, warn};

use crate::student::StudentModel;

/// The sub-layers transferred from the pretrained checkpoint, treated as one
/// unit: all four are copied, then all four are frozen.
pub const TRANSFER_LAYERS: [&str; 4] = [
    "timeembed1",
    "timeembed2",
    "contextembed1",
    "contextembed2",
];

/// Copy the [`TRANSFER_LAYERS`] sub-trees of `checkpoint_path` into
/// `student`, then freeze those sub-layers.
///
/// Non-strict on the key set, by design: checkpoint keys outside the four
/// sub-trees are ignored, and a transferable key with no matching student
/// parameter is skipped with a warning. A shape mismatch on a matched key is
/// fatal. An unreadable checkpoint file propagates as an error.
pub fn load_pretrained_weights(student: &mut StudentModel, checkpoint_path: &Path) -> Result<()> {
    let checkpoint = candle_core::safetensors::load(checkpoint_path, &Device::Cpu)
        .with_context(|| format!("Cannot read pretrained checkpoint {}", checkpoint_path.display()))?;

    let mut transferred = 0usize;
    {
        let data = student.varmap().data().lock().unwrap();
        for (name, tensor) in checkpoint.iter() {
            if !TRANSFER_LAYERS.iter().any(|l| in_subtree(name, l)) {
                continue;
            }
            match data.get(name) {
                Some(var) => {
                    let t = tensor
                        .to_device(var.device())?
                        .to_dtype(var.dtype())?;
                    var.set(&t).with_context(|| {
                        format!("Shape mismatch while transferring '{name}'")
                    })?;
                    transferred += 1;
                }
                None => {
                    warn!(name = %name, "Checkpoint tensor has no student counterpart; skipped");
                }
            }
        }
    }

    for layer in TRANSFER_LAYERS {
        student.freeze_layer(layer);
    }

    info!(
        transferred,
        layers = ?TRANSFER_LAYERS,
        "Pretrained weights loaded and embedding sub-layers frozen"
    );
    Ok(())
}

/// Whether `param_name` is inside the sub-tree rooted at `layer`.
fn in_subtree(param_name: &str, layer: &str) -> bool {
    param_name.split('.').next() == Some(layer)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use ddpmkd_core::DdpmConfig;

    fn tiny_config() -> DdpmConfig {
        DdpmConfig {
            in_channels: 1,
            n_feat: 8,
            n_classes: 4,
            betas: (1e-4, 0.02),
            n_t: 4,
            drop_prob: 0.1,
        }
    }

    fn param_values(student: &StudentModel, name: &str) -> Vec<f32> {
        let data = student.varmap().data().lock().unwrap();
        data[name]
            .as_tensor()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap()
    }

    #[test]
    fn transfers_embedding_layers_and_leaves_the_rest_fresh() {
        let dev = Device::Cpu;
        let dir = tempfile::tempdir().unwrap();
        let ckpt = dir.path().join("pretrained.safetensors");

        let pretrained = StudentModel::with_config(tiny_config(), &dev).unwrap();
        pretrained.varmap().save(&ckpt).unwrap();

        let mut student = StudentModel::with_config(tiny_config(), &dev).unwrap();
        let fresh_init_conv = param_values(&student, "init_conv.conv1.weight");

        load_pretrained_weights(&mut student, &ckpt).unwrap();

        // Every parameter under the four sub-layers equals the checkpoint's.
        let embed_names: Vec<String> = {
            let data = student.varmap().data().lock().unwrap();
            data.keys()
                .filter(|n| TRANSFER_LAYERS.iter().any(|l| in_subtree(n, l)))
                .cloned()
                .collect()
        };
        for layer in TRANSFER_LAYERS {
            assert!(
                embed_names.iter().any(|n| in_subtree(n, layer)),
                "no parameters under '{layer}'"
            );
        }
        for name in &embed_names {
            assert_eq!(
                param_values(&student, name),
                param_values(&pretrained, name),
                "'{name}' not transferred"
            );
        }

        // Untouched parameters keep their fresh initialisation.
        assert_eq!(param_values(&student, "init_conv.conv1.weight"), fresh_init_conv);
    }

    #[test]
    fn transferred_layers_are_frozen() {
        let dev = Device::Cpu;
        let dir = tempfile::tempdir().unwrap();
        let ckpt = dir.path().join("pretrained.safetensors");

        let pretrained = StudentModel::with_config(tiny_config(), &dev).unwrap();
        pretrained.varmap().save(&ckpt).unwrap();

        let mut student = StudentModel::with_config(tiny_config(), &dev).unwrap();
        let total = student.num_params();
        load_pretrained_weights(&mut student, &ckpt).unwrap();

        for layer in TRANSFER_LAYERS {
            assert!(student.frozen_layers().contains(&layer.to_string()));
        }

        let embed_params = {
            let data = student.varmap().data().lock().unwrap();
            data.keys()
                .filter(|n| TRANSFER_LAYERS.iter().any(|l| in_subtree(n, l)))
                .count()
        };
        assert_eq!(student.trainable_vars().len(), total - embed_params);
    }

    #[test]
    fn subtree_scoping_rejects_name_containment() {
        assert!(in_subtree("timeembed1.fc1.weight", "timeembed1"));
        assert!(!in_subtree("timeembed10.fc1.weight", "timeembed1"));
        assert!(!in_subtree("up1.timeembed1.weight", "timeembed1"));
    }

    #[test]
    fn missing_checkpoint_is_fatal() {
        let dev = Device::Cpu;
        let mut student = StudentModel::with_config(tiny_config(), &dev).unwrap();
        let err = load_pretrained_weights(&mut student, Path::new("/nonexistent/ckpt.safetensors"));
        assert!(err.is_err());
    }
}
