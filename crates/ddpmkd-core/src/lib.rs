//! # ddpmkd-core
//!
//! The conditional DDPM used by the ddpmkd distillation helpers: a
//! minDiffusion-style context UNet, a linear noise schedule, and a
//! classifier-free-guidance ancestral sampler, all built on `candle`.
//!
//! The model is parameterised by a [`DdpmConfig`]; [`DdpmConfig::mnist`]
//! pins the architecture used by the teacher/student loaders in
//! `ddpmkd-distill` (28×28 single-channel images, 10 classes).
//!
//! ## Feature Flags
//!
//! | Flag | Effect |
//! |---|---|
//! | `cuda` | Enable CUDA GPU acceleration |
//! | `metal` | Enable Apple Metal GPU acceleration |

pub mod ddpm;
pub mod device;
pub mod error;
pub mod schedule;
pub mod unet;

pub use ddpm::{Ddpm, DdpmConfig};
pub use device::{device_name, select_device};
pub use error::{CoreError, CoreResult};
pub use schedule::NoiseSchedule;
pub use unet::ContextUnet;
