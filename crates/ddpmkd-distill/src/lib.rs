//! # ddpmkd-distill
//!
//! Helper routines for distilling a trained DDPM *teacher* into a fresh
//! *student*, in the order a training driver calls them:
//!
//! 1. [`TeacherModel::load`] / [`StudentModel::new`] — construct the pinned
//!    MNIST architecture; the teacher restores a checkpoint and is fully
//!    frozen, the student starts from fresh trainable weights.
//! 2. [`load_pretrained_weights`] — copy the four embedding sub-layers from a
//!    pretrained checkpoint into the student and freeze them.
//! 3. [`save_checkpoint`] / [`load_checkpoint`] — step-suffixed training
//!    snapshots (SafeTensors weights + JSON metadata sidecar).
//! 4. [`sample_images`] — guided sampling into a tiled PNG grid.
//! 5. [`show_images`] — tile an in-memory batch and PNG-encode it into any
//!    caller-supplied sink.
//! 6. [`visualize_t_cache_distribution`] — histogram of sampled diffusion
//!    steps, overwriting a fixed frame path on every call.
//!
//! ## Freezing under candle
//!
//! candle has no per-parameter `requires_grad` flag; a parameter receives
//! gradient updates only if its `Var` is handed to the optimiser. The teacher
//! is frozen by loading its weights as plain detached tensors, and the
//! student freezes sub-layers by withholding their vars from
//! [`StudentModel::trainable_vars`].

pub mod checkpoint;
pub mod sampling;
pub mod student;
pub mod teacher;
pub mod transfer;
pub mod viz;

pub use checkpoint::{load_checkpoint, save_checkpoint, OptimizerState};
pub use sampling::sample_images;
pub use student::StudentModel;
pub use teacher::TeacherModel;
pub use transfer::{load_pretrained_weights, TRANSFER_LAYERS};
pub use viz::{render_image_grid, show_images, visualize_t_cache_distribution};
