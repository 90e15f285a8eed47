//! nimble-runner: time-bounded execution of submitted programs
//! through an external interpreter binary.
//!
//! # Architecture
//!
//! ## Execution Control ([`exec`])
//! - [`exec::coordinator`]: stage, supervise, release, project to `{output, error}`
//! - [`exec::supervisor`]: one interpreter process per call, deadline and teardown
//! - [`exec::outcome`]: internal outcome and caller-facing result types
//! - [`exec::cancel`]: cancellation token observed alongside the deadline
//!
//! ## Safety & Cleanup ([`safety`])
//! - [`safety::staging`]: uniquely named, scoped program artifacts
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::signal`]: process-group teardown and runner signal handling
//!
//! ## Utilities ([`utils`])
//! - [`utils::output`]: bounded output collection
//!
//! ## Observability ([`observability`])
//! - [`observability::audit`]: structured lifecycle events
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: configuration and error types
//! - [`config::loader`]: JSON loading and overrides
//! - [`config::validator`]: startup validation
//!
//! # Example
//!
//! ```no_run
//! use nimble_runner::{ExecutionCoordinator, RunnerConfig};
//!
//! let coordinator = ExecutionCoordinator::new(RunnerConfig::default())?;
//! let result = coordinator.execute("print 1 + 1;");
//! println!("{}", result.output);
//! # Ok::<(), nimble_runner::RunnerError>(())
//! ```

// Execution Control
pub mod exec;

// Safety & Cleanup
pub mod safety;

// Kernel Primitives
pub mod kernel;

// Utilities
pub mod utils;

// Observability
pub mod observability;

// Configuration
pub mod config;

// CLI entrypoint wiring for the nimble-run binary.
pub mod cli;

pub use config::types::{OutputIntegrity, Result, RunnerConfig, RunnerError};
pub use exec::cancel::CancelToken;
pub use exec::coordinator::ExecutionCoordinator;
pub use exec::outcome::{ExecutionOutcome, ExecutionRequest, ExecutionResult};
pub use exec::supervisor::Supervisor;
pub use safety::staging::{StagedProgram, StagingArea};
