//! Safety and cleanup
//!
//! Run-scoped staging of submitted programs with guaranteed removal.

pub mod staging;
