//! Utilities
//!
//! Bounded output collection for supervised processes.

pub mod output;
