//! Compilation orchestration.
//!
//! Decides, per (package, activity, version), whether a compiled prefetch
//! artifact should be produced, and produces it by running the external
//! compiler over the activity's accumulated raw traces.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};
use tracing::{debug, error, warn};

use crate::config::DaemonConfig;
use crate::db::{
    ActivityModel, AppLaunchHistoryModel, DbHandle, PackageModel, PrefetchFileModel, RawTraceModel,
    VersionedComponentName,
};

use super::error::MaintenanceError;
use super::launcher::ProcessLauncher;

/// Timestamp cutoff meaning "do not truncate the trace".
pub const NO_TIMESTAMP_LIMIT: u64 = u64::MAX;

/// One raw trace to feed the compiler: its file plus the point in the
/// launch after which recorded I/O is discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationInput {
    /// Path of the raw trace file.
    pub trace_path: PathBuf,
    /// Truncation cutoff in ns, [`NO_TIMESTAMP_LIMIT`] if unbounded.
    pub timestamp_limit_ns: u64,
}

/// Configuration for one orchestration run.
#[derive(Clone)]
pub struct ControllerParameters {
    /// Recompile even when an artifact already exists.
    pub recompile: bool,
    /// Minimum eligible traces before the compiler is invoked.
    pub min_traces: usize,
    /// Pass `--verbose` to the compiler.
    pub verbose: bool,
    /// Ask the compiler for a text rendition of the output.
    pub output_text: bool,
    /// Optional inode-to-filename resolution cache for the compiler.
    pub inode_textcache: Option<PathBuf>,
    /// Root directory for compiled artifacts.
    pub compiled_trace_root: PathBuf,
    /// Path of the compiler binary.
    pub compiler_path: PathBuf,
    /// Injected spawn-and-wait capability.
    pub launcher: Arc<dyn ProcessLauncher>,
}

impl ControllerParameters {
    /// Builds run parameters from the daemon configuration.
    /// Recompilation is off unless explicitly forced.
    #[must_use]
    pub fn from_config(config: &DaemonConfig, launcher: Arc<dyn ProcessLauncher>) -> Self {
        Self {
            recompile: false,
            min_traces: config.min_traces,
            verbose: config.verbose,
            output_text: config.output_text,
            inode_textcache: config.inode_textcache.clone(),
            compiled_trace_root: config.compiled_trace_root.clone(),
            compiler_path: config.compiler_path.clone(),
            launcher,
        }
    }
}

impl std::fmt::Debug for ControllerParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerParameters")
            .field("recompile", &self.recompile)
            .field("min_traces", &self.min_traces)
            .field("verbose", &self.verbose)
            .field("output_text", &self.output_text)
            .field("inode_textcache", &self.inode_textcache)
            .field("compiled_trace_root", &self.compiled_trace_root)
            .field("compiler_path", &self.compiler_path)
            .finish_non_exhaustive()
    }
}

/// Summary of the most recent maintenance run.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastJobInfo {
    /// When the last device-wide run finished.
    pub last_run: Option<DateTime<Local>>,
    /// Activities the run attempted to compile.
    pub activities_compiled: usize,
}

/// How a per-activity compile concluded successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileOutcome {
    /// The compiler produced a new artifact and it was recorded.
    Compiled,
    /// A usable artifact already existed; nothing was done.
    AlreadyCompiled,
}

/// The compilation orchestrator.
///
/// Per-activity compiles carry no shared state; only the run summary
/// sits behind a lock, distinct from any per-activity data. The design
/// assumes at most one maintenance run is active device-wide at a time,
/// enforced by the external job scheduler.
pub struct Controller {
    params: ControllerParameters,
    job_info: Mutex<LastJobInfo>,
}

impl Controller {
    /// Creates a controller with the given run parameters.
    #[must_use]
    pub fn new(params: ControllerParameters) -> Self {
        Self {
            params,
            job_info: Mutex::new(LastJobInfo::default()),
        }
    }

    /// The run parameters this controller was built with.
    #[must_use]
    pub fn params(&self) -> &ControllerParameters {
        &self.params
    }

    /// A copy of the last-run summary.
    #[must_use]
    pub fn last_job_info(&self) -> LastJobInfo {
        *self.job_info.lock().unwrap()
    }

    /// Compiles one activity of one package version.
    ///
    /// Short-circuits with [`CompileOutcome::AlreadyCompiled`] when the
    /// artifact already exists and recompilation was not forced. Does not
    /// invoke the compiler when fewer than `min_traces` eligible traces
    /// exist.
    pub fn compile_activity(
        &self,
        db: &DbHandle,
        package_id: i64,
        package_name: &str,
        activity_name: &str,
        version: i64,
    ) -> Result<CompileOutcome, MaintenanceError> {
        let vcn = VersionedComponentName {
            package: package_name.to_string(),
            activity: activity_name.to_string(),
            version,
        };
        let output_path = vcn.compiled_trace_path(&self.params.compiled_trace_root);

        if !self.params.recompile && output_path.exists() {
            debug!(component = %vcn, path = %output_path.display(), "compiled trace exists");
            return Ok(CompileOutcome::AlreadyCompiled);
        }

        let activity = ActivityModel::select_by_name_and_package_id(db, activity_name, package_id)?
            .ok_or_else(|| MaintenanceError::ActivityNotFound {
                package_id,
                activity: activity_name.to_string(),
            })?;

        let histories = AppLaunchHistoryModel::select_for_compile(db, activity.id)?;
        let inputs = gather_compilation_inputs(db, &histories)?;

        if inputs.len() < self.params.min_traces {
            debug!(
                component = %vcn,
                have = inputs.len(),
                need = self.params.min_traces,
                "not enough traces to compile"
            );
            return Err(MaintenanceError::NotEnoughTraces {
                have: inputs.len(),
                need: self.params.min_traces,
            });
        }

        self.job_info.lock().unwrap().activities_compiled += 1;

        debug!(
            component = %vcn,
            output = %output_path.display(),
            traces = inputs.len(),
            "compiling activity"
        );

        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| MaintenanceError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let argv = make_compiler_argv(&inputs, &output_path, &self.params);
        let status = self
            .params
            .launcher
            .spawn_and_wait(&self.params.compiler_path, &argv)
            .map_err(MaintenanceError::Launch)?;
        if !status.success() {
            error!(component = %vcn, %status, "compilation failed");
            return Err(MaintenanceError::CompilerFailed { status });
        }

        PrefetchFileModel::insert(db, activity.id, &output_path.to_string_lossy())?;
        Ok(CompileOutcome::Compiled)
    }

    /// Compiles every activity of a package version.
    ///
    /// Per-activity failures are logged and isolated; the result is
    /// `true` only if every activity succeeded. A launcher spawn failure
    /// aborts the loop and propagates.
    pub fn compile_package(
        &self,
        db: &DbHandle,
        package_name: &str,
        version: i64,
    ) -> Result<bool, MaintenanceError> {
        let package = PackageModel::select_by_name_and_version(db, package_name, version)?
            .ok_or_else(|| MaintenanceError::PackageNotFound {
                package: package_name.to_string(),
                version,
            })?;

        let activities = ActivityModel::select_by_package_id(db, package.id)?;
        let mut all_ok = true;
        for activity in &activities {
            match self.compile_activity(db, package.id, &package.name, &activity.name, version) {
                Ok(_) => {}
                Err(err @ MaintenanceError::Launch(_)) => return Err(err),
                Err(err) => {
                    warn!(
                        package = package_name,
                        activity = activity.name,
                        %err,
                        "activity compile failed"
                    );
                    all_ok = false;
                }
            }
        }
        Ok(all_ok)
    }

    /// Compiles every known package at its current version.
    ///
    /// Resets the run counter first and records the completion timestamp
    /// regardless of individual outcomes.
    pub fn compile_device(&self, db: &DbHandle) -> Result<bool, MaintenanceError> {
        {
            let mut info = self.job_info.lock().unwrap();
            info.activities_compiled = 0;
        }

        let result = self.compile_device_inner(db);

        let mut info = self.job_info.lock().unwrap();
        info.last_run = Some(Local::now());
        result
    }

    fn compile_device_inner(&self, db: &DbHandle) -> Result<bool, MaintenanceError> {
        let packages = PackageModel::select_all(db)?;
        let mut all_ok = true;
        for package in &packages {
            match self.compile_package(db, &package.name, package.version) {
                Ok(ok) => all_ok &= ok,
                Err(err @ MaintenanceError::Launch(_)) => return Err(err),
                Err(err) => {
                    warn!(package = package.name, %err, "package compile failed");
                    all_ok = false;
                }
            }
        }
        Ok(all_ok)
    }

    /// Renders the last-run summary and, for every known package and
    /// activity, the compiled artifact's status or the raw-trace backlog.
    ///
    /// The job-info lock is taken non-blocking so a dump can never
    /// deadlock against a stuck run.
    #[must_use]
    pub fn dump(&self, db: &DbHandle) -> String {
        let mut out = String::new();
        out.push_str("Background job:\n");

        match self.job_info.try_lock() {
            Ok(info) => {
                match info.last_run {
                    Some(at) => {
                        let _ = writeln!(out, "  Last run at: {}", format_local_time(at));
                    }
                    None => out.push_str("  Last run at: (None)\n"),
                }
                let _ = writeln!(out, "  Activities last compiled: {}", info.activities_compiled);
            }
            Err(_) => out.push_str("  (possible deadlock)\n"),
        }

        out.push('\n');
        out.push_str("Package history in database:\n");
        match PackageModel::select_all(db) {
            Ok(packages) => {
                for package in &packages {
                    self.dump_package(db, package, &mut out);
                }
            }
            Err(err) => {
                let _ = writeln!(out, "  (database unavailable: {err})");
            }
        }
        out
    }

    fn dump_package(&self, db: &DbHandle, package: &PackageModel, out: &mut String) {
        let activities = ActivityModel::select_by_package_id(db, package.id).unwrap_or_default();
        for activity in &activities {
            self.dump_package_activity(db, package, activity, out);
        }
    }

    fn dump_package_activity(
        &self,
        db: &DbHandle,
        package: &PackageModel,
        activity: &ActivityModel,
        out: &mut String,
    ) {
        let vcn = VersionedComponentName {
            package: package.name.clone(),
            activity: activity.name.clone(),
            version: package.version,
        };
        let _ = writeln!(out, "  {vcn}");

        let histories = AppLaunchHistoryModel::select_for_compile(db, activity.id)
            .unwrap_or_default();
        let inputs = gather_compilation_inputs(db, &histories).unwrap_or_default();

        let prefetch_file = PrefetchFileModel::select_by_versioned_component(db, &vcn)
            .ok()
            .flatten();
        if let Some(prefetch_file) = prefetch_file {
            let path = Path::new(&prefetch_file.file_path);
            match std::fs::metadata(path) {
                Ok(meta) => {
                    out.push_str("    Compiled Status: Usable compiled trace\n");
                    let _ = writeln!(out, "      Bytes to be prefetched: {}", meta.len());
                    match meta.modified() {
                        Ok(mtime) => {
                            let _ = writeln!(
                                out,
                                "      Time compiled: {}",
                                format_local_time(DateTime::<Local>::from(mtime))
                            );
                        }
                        Err(err) => {
                            let _ = writeln!(out, "      Time compiled: (unavailable: {err})");
                        }
                    }
                }
                Err(_) => {
                    out.push_str("    Compiled Status: Prefetch file deleted from disk.\n");
                }
            }
            let _ = writeln!(out, "      {}", prefetch_file.file_path);
        } else if inputs.len() >= self.params.min_traces {
            let _ = writeln!(
                out,
                "    Compiled Status: Raw traces pending compilation ({})",
                inputs.len()
            );
        } else {
            let _ = writeln!(
                out,
                "    Compiled Status: Need {} more traces for compilation",
                self.params.min_traces - inputs.len()
            );
        }

        out.push_str("    Raw traces:\n");
        let _ = writeln!(out, "      Trace count: {}", inputs.len());
        for input in &inputs {
            let _ = writeln!(out, "      {}", input.trace_path.display());
        }
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Resolves each history's raw trace file and timestamp cutoff.
///
/// The cutoff prefers the app's "fully drawn" report, falls back to the
/// total launch time, and is unbounded when neither is known. Histories
/// without a raw trace are logged and skipped.
pub(crate) fn gather_compilation_inputs(
    db: &DbHandle,
    histories: &[AppLaunchHistoryModel],
) -> Result<Vec<CompilationInput>, MaintenanceError> {
    let mut inputs = Vec::with_capacity(histories.len());
    for history in histories {
        let Some(raw_trace) = RawTraceModel::select_by_history_id(db, history.id)? else {
            error!(history_id = history.id, "no raw trace for history");
            continue;
        };

        let timestamp_limit_ns = if let Some(ns) = history.report_fully_drawn_ns {
            ns as u64
        } else if let Some(ns) = history.total_time_ns {
            ns as u64
        } else {
            error!(history_id = history.id, "no timestamp on history, not truncating");
            NO_TIMESTAMP_LIMIT
        };

        inputs.push(CompilationInput {
            trace_path: PathBuf::from(raw_trace.file_path),
            timestamp_limit_ns,
        });
    }
    Ok(inputs)
}

/// Derives the compiler's argument vector. Deterministic and
/// order-sensitive: input paths in list order, then one
/// `--timestamp_limit_ns` pair per input in the same order, then the
/// flags.
pub(crate) fn make_compiler_argv(
    inputs: &[CompilationInput],
    output_path: &Path,
    params: &ControllerParameters,
) -> Vec<String> {
    let mut argv = Vec::new();

    for input in inputs {
        argv.push(input.trace_path.to_string_lossy().into_owned());
    }
    for input in inputs {
        argv.push("--timestamp_limit_ns".to_string());
        argv.push(input.timestamp_limit_ns.to_string());
    }

    if params.output_text {
        argv.push("--output-text".to_string());
    }

    argv.push("--output-proto".to_string());
    argv.push(output_path.to_string_lossy().into_owned());

    if let Some(textcache) = &params.inode_textcache {
        argv.push("--inode-textcache".to_string());
        argv.push(textcache.to_string_lossy().into_owned());
    }

    if params.verbose {
        argv.push("--verbose".to_string());
    }

    argv
}

fn format_local_time(at: DateTime<Local>) -> String {
    at.format("%a %b %d %H:%M:%S %Y").to_string()
}
