//! Compilation orchestration for compiled prefetch artifacts.
//!
//! For a given (package, activity, version) the [`Controller`] gathers
//! the eligible raw traces from launch history, decides whether
//! (re)compilation is warranted, runs the external compiler process over
//! them, and records the resulting artifact. Package- and device-wide
//! sweeps compose over the per-activity procedure with per-unit failure
//! isolation.
//!
//! The compiler runs as a separate process through the injected
//! [`ProcessLauncher`]; the calling thread blocks until the child exits.
//! Exit code 0 is the only success; any other normal exit, or
//! termination by signal, fails that unit of work.

pub mod controller;
pub mod error;
pub mod launcher;


pub use controller::{
    CompilationInput, CompileOutcome, Controller, ControllerParameters, LastJobInfo,
    NO_TIMESTAMP_LIMIT,
};
pub use error::MaintenanceError;
pub use launcher::{ProcessLauncher, SystemLauncher};
