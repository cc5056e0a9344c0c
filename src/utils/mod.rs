//! Pure utility functions.
//!
//! These are stateless helpers used across the codebase.

pub mod bootstrap;
pub mod duration;
