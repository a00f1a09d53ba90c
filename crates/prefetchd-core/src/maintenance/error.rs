//! Compilation orchestration error types.

use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

use crate::db::DbError;

/// Errors from a single unit of compilation work.
///
/// Per-unit failures are isolated: a package loop logs the failed
/// activity and continues with its siblings. The one exception is
/// [`Launch`](Self::Launch) — a spawn failure means resource exhaustion
/// or misconfiguration and aborts the whole orchestrating call.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MaintenanceError {
    /// No package row for the requested name and version.
    #[error("package not found: {package}@{version}")]
    PackageNotFound {
        /// Package name.
        package: String,
        /// Package version.
        version: i64,
    },

    /// No activity row with this name inside the package.
    #[error("activity not found: {activity} (package_id={package_id})")]
    ActivityNotFound {
        /// Owning package row id.
        package_id: i64,
        /// Activity name.
        activity: String,
    },

    /// Fewer eligible raw traces than the configured minimum.
    #[error("not enough traces: have {have}, need {need}")]
    NotEnoughTraces {
        /// Eligible traces collected.
        have: usize,
        /// Configured minimum.
        need: usize,
    },

    /// The artifact's parent directory could not be created.
    #[error("failed to create artifact directory {path}: {source}")]
    CreateDir {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The compiler could not be spawned at all. Fatal to the
    /// orchestrating call.
    #[error("failed to launch compiler: {0}")]
    Launch(#[source] std::io::Error),

    /// The compiler exited non-zero or was terminated by a signal.
    #[error("compiler process failed: {status}")]
    CompilerFailed {
        /// The child's exit status.
        status: ExitStatus,
    },

    /// Persistence failure.
    #[error(transparent)]
    Db(#[from] DbError),
}
