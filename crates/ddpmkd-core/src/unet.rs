//! Conditional context UNet for square single-channel images.
//!
//! minDiffusion-style architecture: a residual conv encoder, a bottleneck
//! vector, and a decoder that is modulated at each resolution by learned
//! embeddings of the diffusion step and the class label.
//!
//! The top-level sub-module names are part of the crate's public contract —
//! the distillation helpers transfer and freeze the four embedding sub-trees
//! (`timeembed1`, `timeembed2`, `contextembed1`, `contextembed2`) by these
//! names, so renaming them breaks existing checkpoints.

use candle_core::Tensor;
use candle_nn::{
    conv2d, conv_transpose2d, group_norm, linear, Conv2d, Conv2dConfig, ConvTranspose2d,
    ConvTranspose2dConfig, GroupNorm, Linear, Module, VarBuilder,
};

use crate::error::{CoreError, CoreResult};

const NORM_GROUPS: usize = 8;
const NORM_EPS: f64 = 1e-5;

// ── Building blocks ───────────────────────────────────────────────────────────

/// Two 3×3 conv + GroupNorm + GELU stages with an optional residual path.
///
/// When the block is residual and input/output channel counts differ, the
/// skip connection taps the output of the first stage instead of the input.
struct ResidualConvBlock {
    conv1: Conv2d,
    norm1: GroupNorm,
    conv2: Conv2d,
    norm2: GroupNorm,
    same_channels: bool,
    is_res: bool,
}

impl ResidualConvBlock {
    fn new(in_c: usize, out_c: usize, is_res: bool, vb: VarBuilder) -> candle_core::Result<Self> {
        let cfg = Conv2dConfig {
            padding: 1,
            ..Default::default()
        };
        Ok(Self {
            conv1: conv2d(in_c, out_c, 3, cfg, vb.pp("conv1"))?,
            norm1: group_norm(NORM_GROUPS, out_c, NORM_EPS, vb.pp("norm1"))?,
            conv2: conv2d(out_c, out_c, 3, cfg, vb.pp("conv2"))?,
            norm2: group_norm(NORM_GROUPS, out_c, NORM_EPS, vb.pp("norm2"))?,
            same_channels: in_c == out_c,
            is_res,
        })
    }

    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let x1 = self.norm1.forward(&self.conv1.forward(x)?)?.gelu()?;
        let x2 = self.norm2.forward(&self.conv2.forward(&x1)?)?.gelu()?;
        if self.is_res {
            let skip = if self.same_channels { x } else { &x1 };
            // 1/sqrt(2) keeps the residual sum's variance in check.
            (skip + x2)? / 1.414
        } else {
            Ok(x2)
        }
    }
}

/// Residual conv block followed by 2× max-pool downsampling.
struct UnetDown {
    block: ResidualConvBlock,
}

impl UnetDown {
    fn new(in_c: usize, out_c: usize, vb: VarBuilder) -> candle_core::Result<Self> {
        Ok(Self {
            block: ResidualConvBlock::new(in_c, out_c, false, vb.pp("block"))?,
        })
    }

    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        self.block.forward(x)?.max_pool2d(2)
    }
}

/// 2× transposed-conv upsampling over the concatenation of the input with
/// the matching skip connection, then two residual conv blocks.
struct UnetUp {
    up: ConvTranspose2d,
    block1: ResidualConvBlock,
    block2: ResidualConvBlock,
}

impl UnetUp {
    fn new(in_c: usize, out_c: usize, vb: VarBuilder) -> candle_core::Result<Self> {
        let cfg = ConvTranspose2dConfig {
            stride: 2,
            ..Default::default()
        };
        Ok(Self {
            up: conv_transpose2d(in_c, out_c, 2, cfg, vb.pp("up"))?,
            block1: ResidualConvBlock::new(out_c, out_c, false, vb.pp("block1"))?,
            block2: ResidualConvBlock::new(out_c, out_c, false, vb.pp("block2"))?,
        })
    }

    fn forward(&self, x: &Tensor, skip: &Tensor) -> candle_core::Result<Tensor> {
        let x = Tensor::cat(&[x, skip], 1)?;
        let x = self.up.forward(&x)?;
        self.block2.forward(&self.block1.forward(&x)?)
    }
}

/// Two-layer MLP embedding, reshaped to `[batch, emb_dim, 1, 1]` so it can
/// broadcast over feature maps.
struct EmbedFc {
    fc1: Linear,
    fc2: Linear,
    emb_dim: usize,
}

impl EmbedFc {
    fn new(input_dim: usize, emb_dim: usize, vb: VarBuilder) -> candle_core::Result<Self> {
        Ok(Self {
            fc1: linear(input_dim, emb_dim, vb.pp("fc1"))?,
            fc2: linear(emb_dim, emb_dim, vb.pp("fc2"))?,
            emb_dim,
        })
    }

    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let batch = x.dim(0)?;
        let h = self.fc2.forward(&self.fc1.forward(x)?.gelu()?)?;
        h.reshape((batch, self.emb_dim, 1, 1))
    }
}

// ── ContextUnet ───────────────────────────────────────────────────────────────

/// Noise-prediction UNet conditioned on diffusion step and class label.
///
/// Geometry is pinned to 28×28 inputs: two 2× downsampling stages reach 7×7,
/// a 7×7 average pool collapses to the bottleneck vector, and `up0` is a
/// 7×7-kernel transposed conv that restores the 7×7 map.
pub struct ContextUnet {
    init_conv: ResidualConvBlock,
    down1: UnetDown,
    down2: UnetDown,
    timeembed1: EmbedFc,
    timeembed2: EmbedFc,
    contextembed1: EmbedFc,
    contextembed2: EmbedFc,
    up0_deconv: ConvTranspose2d,
    up0_norm: GroupNorm,
    up1: UnetUp,
    up2: UnetUp,
    out_conv1: Conv2d,
    out_norm: GroupNorm,
    out_conv2: Conv2d,
}

impl ContextUnet {
    /// Registered top-level sub-module names, in construction order.
    pub const SUBMODULES: [&'static str; 11] = [
        "init_conv",
        "down1",
        "down2",
        "timeembed1",
        "timeembed2",
        "contextembed1",
        "contextembed2",
        "up0",
        "up1",
        "up2",
        "out",
    ];

    pub fn new(
        in_channels: usize,
        n_feat: usize,
        n_classes: usize,
        vb: VarBuilder,
    ) -> CoreResult<Self> {
        if n_feat % NORM_GROUPS != 0 {
            return Err(CoreError::Config {
                field: "n_feat".to_string(),
                reason: format!("must be divisible by {NORM_GROUPS}, got {n_feat}"),
            });
        }

        let conv_cfg = Conv2dConfig {
            padding: 1,
            ..Default::default()
        };
        let up0_cfg = ConvTranspose2dConfig {
            stride: 7,
            ..Default::default()
        };

        Ok(Self {
            init_conv: ResidualConvBlock::new(in_channels, n_feat, true, vb.pp("init_conv"))?,
            down1: UnetDown::new(n_feat, n_feat, vb.pp("down1"))?,
            down2: UnetDown::new(n_feat, 2 * n_feat, vb.pp("down2"))?,
            timeembed1: EmbedFc::new(1, 2 * n_feat, vb.pp("timeembed1"))?,
            timeembed2: EmbedFc::new(1, n_feat, vb.pp("timeembed2"))?,
            contextembed1: EmbedFc::new(n_classes, 2 * n_feat, vb.pp("contextembed1"))?,
            contextembed2: EmbedFc::new(n_classes, n_feat, vb.pp("contextembed2"))?,
            up0_deconv: conv_transpose2d(2 * n_feat, 2 * n_feat, 7, up0_cfg, vb.pp("up0").pp("deconv"))?,
            up0_norm: group_norm(NORM_GROUPS, 2 * n_feat, NORM_EPS, vb.pp("up0").pp("norm"))?,
            up1: UnetUp::new(4 * n_feat, n_feat, vb.pp("up1"))?,
            up2: UnetUp::new(2 * n_feat, n_feat, vb.pp("up2"))?,
            out_conv1: conv2d(2 * n_feat, n_feat, 3, conv_cfg, vb.pp("out").pp("conv1"))?,
            out_norm: group_norm(NORM_GROUPS, n_feat, NORM_EPS, vb.pp("out").pp("norm"))?,
            out_conv2: conv2d(n_feat, in_channels, 3, conv_cfg, vb.pp("out").pp("conv2"))?,
        })
    }

    /// Predict the noise component of `x`.
    ///
    /// * `x` — noisy images, `[batch, in_channels, 28, 28]`.
    /// * `class_onehot` — one-hot class rows, `[batch, n_classes]`.
    /// * `t_norm` — diffusion step scaled to `t / n_T`, `[batch, 1]`.
    /// * `context_mask` — `[batch, 1]`, 1.0 drops the class conditioning
    ///   (the unconditional branch of classifier-free guidance).
    pub fn forward(
        &self,
        x: &Tensor,
        class_onehot: &Tensor,
        t_norm: &Tensor,
        context_mask: &Tensor,
    ) -> candle_core::Result<Tensor> {
        let x0 = self.init_conv.forward(x)?;
        let d1 = self.down1.forward(&x0)?;
        let d2 = self.down2.forward(&d1)?;
        let hidden = d2.avg_pool2d(7)?.gelu()?;

        // Mask value 1 zeroes the one-hot row, removing the conditioning.
        let keep = context_mask.affine(-1.0, 1.0)?;
        let c = class_onehot.broadcast_mul(&keep)?;

        let cemb1 = self.contextembed1.forward(&c)?;
        let temb1 = self.timeembed1.forward(t_norm)?;
        let cemb2 = self.contextembed2.forward(&c)?;
        let temb2 = self.timeembed2.forward(t_norm)?;

        let u0 = self
            .up0_norm
            .forward(&self.up0_deconv.forward(&hidden)?)?
            .relu()?;
        let u1 = self.up1.forward(&cemb1.broadcast_mul(&u0)?.broadcast_add(&temb1)?, &d2)?;
        let u2 = self.up2.forward(&cemb2.broadcast_mul(&u1)?.broadcast_add(&temb2)?, &d1)?;

        let h = Tensor::cat(&[&u2, &x0], 1)?;
        let h = self.out_norm.forward(&self.out_conv1.forward(&h)?)?.relu()?;
        self.out_conv2.forward(&h)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, Tensor};
    use candle_nn::{VarBuilder, VarMap};

    fn tiny_unet(varmap: &VarMap) -> ContextUnet {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu);
        ContextUnet::new(1, 8, 4, vb).unwrap()
    }

    #[test]
    fn forward_preserves_image_shape() {
        let varmap = VarMap::new();
        let unet = tiny_unet(&varmap);
        let dev = Device::Cpu;

        let x = Tensor::randn(0f32, 1f32, (2, 1, 28, 28), &dev).unwrap();
        let c = Tensor::from_vec(
            vec![1f32, 0., 0., 0., 0., 0., 1., 0.],
            (2, 4),
            &dev,
        )
        .unwrap();
        let t = Tensor::from_vec(vec![0.5f32, 0.25], (2, 1), &dev).unwrap();
        let mask = Tensor::zeros((2, 1), DType::F32, &dev).unwrap();

        let eps = unet.forward(&x, &c, &t, &mask).unwrap();
        assert_eq!(eps.dims(), &[2, 1, 28, 28]);
    }

    #[test]
    fn parameters_register_under_declared_submodules() {
        let varmap = VarMap::new();
        let _unet = tiny_unet(&varmap);

        let data = varmap.data().lock().unwrap();
        for name in data.keys() {
            let root = name.split('.').next().unwrap();
            assert!(
                ContextUnet::SUBMODULES.contains(&root),
                "unexpected parameter root '{root}' in '{name}'"
            );
        }
        for layer in ["timeembed1", "timeembed2", "contextembed1", "contextembed2"] {
            assert!(
                data.keys().any(|k| k.starts_with(&format!("{layer}."))),
                "no parameters registered under '{layer}'"
            );
        }
    }

    #[test]
    fn rejects_feature_width_not_divisible_by_groups() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        assert!(ContextUnet::new(1, 10, 4, vb).is_err());
    }
}
