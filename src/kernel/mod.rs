//! Thin wrappers around kernel primitives.
//!
//! All `unsafe` code is concentrated here.

pub mod signal;
