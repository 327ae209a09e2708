//! DDPM wrapper: config, schedule, and the classifier-free-guidance sampler.

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use tracing::debug;

use crate::error::CoreResult;
use crate::schedule::NoiseSchedule;
use crate::unet::ContextUnet;

/// Architecture and schedule configuration for a [`Ddpm`].
#[derive(Debug, Clone)]
pub struct DdpmConfig {
    pub in_channels: usize,
    /// Base feature width; the bottleneck is `2 * n_feat` channels.
    pub n_feat: usize,
    pub n_classes: usize,
    /// Linear noise-schedule bounds `(beta1, beta2)`.
    pub betas: (f64, f64),
    /// Number of diffusion steps `n_T`.
    pub n_t: usize,
    /// Probability of dropping the class context during training; carried in
    /// the config for the external training loop, unused by sampling.
    pub drop_prob: f64,
}

impl DdpmConfig {
    /// The pinned MNIST architecture used by the teacher/student loaders.
    ///
    /// Everything is a literal constant except the step count; the device is
    /// supplied separately at construction time.
    pub fn mnist(n_t: usize) -> Self {
        Self {
            in_channels: 1,
            n_feat: 128,
            n_classes: 10,
            betas: (1e-4, 0.02),
            n_t,
            drop_prob: 0.1,
        }
    }
}

/// A denoising diffusion model: a [`ContextUnet`] noise predictor plus the
/// precomputed [`NoiseSchedule`] its sampler walks.
pub struct Ddpm {
    nn_model: ContextUnet,
    schedule: NoiseSchedule,
    config: DdpmConfig,
}

impl Ddpm {
    /// Builds the model's parameters through `vb`.
    ///
    /// With a `VarMap`-backed builder this registers fresh trainable
    /// variables; with a tensor-backed builder it performs a strict restore
    /// (missing tensors and shape mismatches are fatal).
    pub fn new(config: DdpmConfig, vb: VarBuilder) -> CoreResult<Self> {
        let schedule = NoiseSchedule::linear(config.betas.0, config.betas.1, config.n_t)?;
        let nn_model = ContextUnet::new(config.in_channels, config.n_feat, config.n_classes, vb)?;
        Ok(Self {
            nn_model,
            schedule,
            config,
        })
    }

    pub fn config(&self) -> &DdpmConfig {
        &self.config
    }

    pub fn schedule(&self) -> &NoiseSchedule {
        &self.schedule
    }

    pub fn nn_model(&self) -> &ContextUnet {
        &self.nn_model
    }

    /// Ancestral sampling with classifier-free guidance.
    ///
    /// Class labels cycle over `0..n_classes` across the batch. Each reverse
    /// step runs a doubled batch: the first half keeps the class context, the
    /// second half masks it out, and the two noise estimates are combined as
    /// `(1 + w)·eps_cond − w·eps_uncond`.
    ///
    /// Returns a `[n_sample, c, h, w]` tensor on `device`.
    pub fn sample(
        &self,
        n_sample: usize,
        size: (usize, usize, usize),
        device: &Device,
        guide_w: f64,
    ) -> CoreResult<Tensor> {
        let (c, h, w) = size;
        let n_classes = self.config.n_classes;
        let n_t = self.config.n_t;

        let mut x_i = Tensor::randn(0f32, 1f32, (n_sample, c, h, w), device)?;

        let mut onehot = vec![0f32; n_sample * n_classes];
        for i in 0..n_sample {
            onehot[i * n_classes + (i % n_classes)] = 1.0;
        }
        let class_onehot = Tensor::from_vec(onehot, (n_sample, n_classes), device)?;
        let class_onehot = Tensor::cat(&[&class_onehot, &class_onehot], 0)?;

        // Doubled batch: second half has the context dropped.
        let context_mask = Tensor::cat(
            &[
                &Tensor::zeros((n_sample, 1), DType::F32, device)?,
                &Tensor::ones((n_sample, 1), DType::F32, device)?,
            ],
            0,
        )?;

        let s = &self.schedule;
        for t in (1..=n_t).rev() {
            debug!(t, "sampling step");
            let t_norm = Tensor::full(t as f32 / n_t as f32, (2 * n_sample, 1), device)?;
            let x_doubled = Tensor::cat(&[&x_i, &x_i], 0)?;

            let eps = self
                .nn_model
                .forward(&x_doubled, &class_onehot, &t_norm, &context_mask)?;
            let eps_cond = eps.narrow(0, 0, n_sample)?;
            let eps_uncond = eps.narrow(0, n_sample, n_sample)?;
            let eps = ((eps_cond * (1.0 + guide_w))? - (eps_uncond * guide_w)?)?;

            let z = if t > 1 {
                Tensor::randn(0f32, 1f32, (n_sample, c, h, w), device)?
            } else {
                Tensor::zeros((n_sample, c, h, w), DType::F32, device)?
            };

            let mean = ((&x_i - (eps * s.mab_over_sqrtmab[t])?)? * s.oneover_sqrta[t])?;
            x_i = (mean + (z * s.sqrt_beta_t[t])?)?;
        }

        Ok(x_i)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::{VarBuilder, VarMap};

    fn tiny_config(n_t: usize) -> DdpmConfig {
        DdpmConfig {
            in_channels: 1,
            n_feat: 8,
            n_classes: 4,
            betas: (1e-4, 0.02),
            n_t,
            drop_prob: 0.1,
        }
    }

    #[test]
    fn mnist_config_pins_architecture_constants() {
        let cfg = DdpmConfig::mnist(400);
        assert_eq!(cfg.in_channels, 1);
        assert_eq!(cfg.n_feat, 128);
        assert_eq!(cfg.n_classes, 10);
        assert_eq!(cfg.betas, (1e-4, 0.02));
        assert_eq!(cfg.n_t, 400);
        assert!((cfg.drop_prob - 0.1).abs() < 1e-12);
    }

    #[test]
    fn sample_returns_requested_batch_shape() {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let model = Ddpm::new(tiny_config(4), vb).unwrap();

        let x = model.sample(3, (1, 28, 28), &dev, 2.0).unwrap();
        assert_eq!(x.dims(), &[3, 1, 28, 28]);

        let vals = x.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(vals.iter().all(|v| v.is_finite()));
    }
}
