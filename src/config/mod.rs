//! # Loam Configuration Module
//!
//! This module centralizes all configuration constants for loam. Constants are
//! grouped by their functional area and interdependencies are documented and
//! enforced through compile-time assertions.
//!
//! ## Why Centralization?
//!
//! The node's on-page format, the page cache, and the encoder layer all agree
//! on a handful of values (`PAGE_SIZE`, the inline thresholds, the encoders
//! version). Scattering these across modules invites mismatch bugs between
//! writers and readers of the same page generation, so they live here with
//! compile-time checks.
//!
//! ## Module Organization
//!
//! - [`constants`]: All numeric configuration values with dependency documentation

pub mod constants;
pub use constants::*;
