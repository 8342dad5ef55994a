//! Shared foundation for the binfit workspace
//!
//! This crate provides the unified error type used across all binfit crates
//! and small random-number utilities for reproducible Monte-Carlo studies.

pub mod error;
pub mod random;

pub use error::{Error, Result};
pub use random::{fill_normal, fill_uniform, seeded_rng};
