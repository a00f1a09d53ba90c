//! Compiler process launching.
//!
//! [`ProcessLauncher`] is the spawn-and-wait seam between the controller
//! and the operating system. The daemon injects [`SystemLauncher`]; tests
//! inject a recording fake that returns configured exit statuses without
//! spawning anything.

use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};

use tracing::debug;

/// Capability to run the external compiler to completion.
pub trait ProcessLauncher: Send + Sync {
    /// Spawns `program` with `argv` and blocks until it exits.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the process cannot be spawned
    /// at all; callers treat that as fatal to the orchestrating call.
    fn spawn_and_wait(&self, program: &Path, argv: &[String]) -> std::io::Result<ExitStatus>;
}

/// Real launcher over [`std::process::Command`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLauncher;

impl ProcessLauncher for SystemLauncher {
    fn spawn_and_wait(&self, program: &Path, argv: &[String]) -> std::io::Result<ExitStatus> {
        debug!(program = %program.display(), args = argv.join(" "), "spawning compiler");
        let status = Command::new(program)
            .args(argv)
            .stdin(Stdio::null())
            .status()?;
        debug!(code = ?status.code(), "compiler exited");
        Ok(status)
    }
}
