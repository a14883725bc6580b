//! Decode sizing and resampling.

pub mod resize;
pub mod sample;

pub use sample::{DownsamplePlan, compute_downsample, plan_decode, preferred_format};

pub type Result<T> = crate::Result<T>;
