//! Execution control
//!
//! Supervises one interpreter process per request and projects what happened
//! into the caller-facing result.

pub mod cancel;
pub mod coordinator;
pub mod outcome;
pub mod supervisor;
