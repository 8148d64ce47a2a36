//! Probability building blocks for the GoE toolkit.
//!
//! This crate hosts reusable probability math used by the sampler and models:
//! - numerically stable log/exp/sigmoid primitives
//! - Normal density kernels
//! - transforms/bijectors (for constrained parameterizations)

pub mod math;
pub mod normal;
pub mod transforms;
