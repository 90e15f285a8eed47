//! Observability
//!
//! Structured audit events for execution lifecycle visibility.

pub mod audit;
