//! Trainable student model.
//!
//! The student shares the teacher's architecture but starts from fresh
//! random weights held in a [`candle_nn::VarMap`], so every parameter can be
//! handed to an optimiser. Sub-layers are frozen structurally, by top-level
//! sub-module name: their vars are simply withheld from
//! [`StudentModel::trainable_vars`].

use anyhow::{Context, Result};
use candle_core::{DType, Device, Var};
use candle_nn::{VarBuilder, VarMap};
use tracing::info;

use ddpmkd_core::{Ddpm, DdpmConfig};

/// A DDPM under training, with its parameter map and freeze bookkeeping.
pub struct StudentModel {
    model: Ddpm,
    varmap: VarMap,
    frozen: Vec<String>,
    device: Device,
}

impl StudentModel {
    /// Construct the pinned MNIST architecture with fresh weights.
    ///
    /// No checkpoint is restored; the model is fully trainable.
    pub fn new(n_t: usize, device: &Device) -> Result<Self> {
        Self::with_config(DdpmConfig::mnist(n_t), device)
    }

    /// Like [`StudentModel::new`] with an explicit architecture config.
    pub fn with_config(config: DdpmConfig, device: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = Ddpm::new(config, vb).context("Cannot construct student model")?;

        info!(n_t = model.config().n_t, "Student model initialised without checkpoint");
        Ok(Self {
            model,
            varmap,
            frozen: Vec::new(),
            device: device.clone(),
        })
    }

    pub fn model(&self) -> &Ddpm {
        &self.model
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    pub fn varmap_mut(&mut self) -> &mut VarMap {
        &mut self.varmap
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Mark a top-level sub-module as frozen.
    ///
    /// Idempotent; the name must match the sub-module's registration name
    /// exactly (`"timeembed1"` does not freeze a hypothetical
    /// `"timeembed10"`).
    pub fn freeze_layer(&mut self, layer: &str) {
        if !self.frozen.iter().any(|l| l == layer) {
            self.frozen.push(layer.to_string());
        }
    }

    pub fn frozen_layers(&self) -> &[String] {
        &self.frozen
    }

    /// Whether `param_name` lives inside a frozen sub-module's sub-tree.
    pub fn is_frozen(&self, param_name: &str) -> bool {
        let root = param_name.split('.').next().unwrap_or(param_name);
        self.frozen.iter().any(|l| l == root)
    }

    /// Vars to hand to the optimiser.
    ///
    /// Frozen sub-layers are withheld, which is how gradient updates are
    /// disabled for them under candle.
    pub fn trainable_vars(&self) -> Vec<Var> {
        let data = self.varmap.data().lock().unwrap();
        data.iter()
            .filter(|(name, _)| !self.is_frozen(name))
            .map(|(_, var)| var.clone())
            .collect()
    }

    /// Total number of registered parameter tensors, frozen or not.
    pub fn num_params(&self) -> usize {
        self.varmap.data().lock().unwrap().len()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
