//! # goe-core
//!
//! Core types, traits, and error handling for the GoE inference toolkit.
//!
//! This crate provides:
//! - Common error types
//! - The [`LogDensityModel`] trait that samplers are written against
//! - Shared, serializable summary types

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::LogDensityModel;
pub use types::{ParameterScale, ParameterSummary};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
