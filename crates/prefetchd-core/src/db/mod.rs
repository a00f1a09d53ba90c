//! `SQLite`-backed launch-history and artifact records.
//!
//! The compilation orchestrator consumes this surface: packages and their
//! activities, the recorded launch histories eligible for compilation,
//! the raw trace file behind each history, and the compiled prefetch
//! artifact rows. `SQLite` runs in WAL mode; the connection sits behind a
//! mutex and each query takes it for its own duration only.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

/// Schema SQL embedded at compile time.
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Errors from the persistence layer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DbError {
    /// Database error from `SQLite`.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O error during database operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Handle to the prefetchd database.
pub struct DbHandle {
    conn: Mutex<Connection>,
}

impl DbHandle {
    /// Opens (creating if needed) the database at `path` and applies the
    /// schema.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        Self::initialize(conn)
    }

    /// Opens an in-memory database. Test fixtures only.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(conn: Connection) -> Result<Self, DbError> {
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    ) -> Result<T, DbError> {
        let conn = self.conn.lock().unwrap();
        Ok(f(&conn)?)
    }
}

impl std::fmt::Debug for DbHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbHandle").finish_non_exhaustive()
    }
}

/// The (package, activity, version) triple identifying one compilable
/// unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedComponentName {
    /// Package name, e.g. `com.example.settings`.
    pub package: String,
    /// Activity name within the package.
    pub activity: String,
    /// Package version code.
    pub version: i64,
}

impl VersionedComponentName {
    /// Canonical path of the compiled artifact for this component under
    /// the configured artifact root:
    /// `<root>/<package>/<version>/<activity>/compiled_trace.pb`.
    #[must_use]
    pub fn compiled_trace_path(&self, root: &Path) -> PathBuf {
        root.join(&self.package)
            .join(self.version.to_string())
            .join(&self.activity)
            .join("compiled_trace.pb")
    }
}

impl std::fmt::Display for VersionedComponentName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}@{}", self.package, self.activity, self.version)
    }
}

/// One installed package version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageModel {
    /// Row id.
    pub id: i64,
    /// Package name.
    pub name: String,
    /// Version code.
    pub version: i64,
}

impl PackageModel {
    /// Inserts a package row, returning the stored model.
    pub fn insert(db: &DbHandle, name: &str, version: i64) -> Result<Self, DbError> {
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO packages (name, version) VALUES (?1, ?2)",
                params![name, version],
            )?;
            Ok(Self {
                id: conn.last_insert_rowid(),
                name: name.to_string(),
                version,
            })
        })
    }

    /// Looks up a package by name and version.
    pub fn select_by_name_and_version(
        db: &DbHandle,
        name: &str,
        version: i64,
    ) -> Result<Option<Self>, DbError> {
        db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, version FROM packages WHERE name = ?1 AND version = ?2",
                params![name, version],
                |row| {
                    Ok(Self {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        version: row.get(2)?,
                    })
                },
            )
            .optional()
        })
    }

    /// Lists every known package.
    pub fn select_all(db: &DbHandle) -> Result<Vec<Self>, DbError> {
        db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, name, version FROM packages ORDER BY id")?;
            let rows = stmt.query_map([], |row| {
                Ok(Self {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    version: row.get(2)?,
                })
            })?;
            rows.collect()
        })
    }
}

/// One launchable activity of a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityModel {
    /// Row id.
    pub id: i64,
    /// Activity name.
    pub name: String,
    /// Owning package row id.
    pub package_id: i64,
}

impl ActivityModel {
    /// Inserts an activity row, returning the stored model.
    pub fn insert(db: &DbHandle, name: &str, package_id: i64) -> Result<Self, DbError> {
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO activities (name, package_id) VALUES (?1, ?2)",
                params![name, package_id],
            )?;
            Ok(Self {
                id: conn.last_insert_rowid(),
                name: name.to_string(),
                package_id,
            })
        })
    }

    /// Lists the activities of a package.
    pub fn select_by_package_id(db: &DbHandle, package_id: i64) -> Result<Vec<Self>, DbError> {
        db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, package_id FROM activities WHERE package_id = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![package_id], |row| {
                Ok(Self {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    package_id: row.get(2)?,
                })
            })?;
            rows.collect()
        })
    }

    /// Looks up an activity by name within a package.
    pub fn select_by_name_and_package_id(
        db: &DbHandle,
        name: &str,
        package_id: i64,
    ) -> Result<Option<Self>, DbError> {
        db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, package_id FROM activities
                 WHERE name = ?1 AND package_id = ?2",
                params![name, package_id],
                |row| {
                    Ok(Self {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        package_id: row.get(2)?,
                    })
                },
            )
            .optional()
        })
    }
}

/// Launch temperature of a recorded history. Only cold launches produce
/// traces worth compiling.
pub const TEMPERATURE_COLD: i64 = 1;

/// One recorded app launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppLaunchHistoryModel {
    /// Row id.
    pub id: i64,
    /// Launched activity row id.
    pub activity_id: i64,
    /// Launch temperature; see [`TEMPERATURE_COLD`].
    pub temperature: i64,
    /// Whether tracing was active during this launch.
    pub trace_enabled: bool,
    /// "Fully drawn" timestamp reported by the app, if any.
    pub report_fully_drawn_ns: Option<i64>,
    /// Total launch time, if measured.
    pub total_time_ns: Option<i64>,
}

impl AppLaunchHistoryModel {
    /// Inserts a launch-history row, returning the stored model.
    pub fn insert(
        db: &DbHandle,
        activity_id: i64,
        temperature: i64,
        trace_enabled: bool,
        report_fully_drawn_ns: Option<i64>,
        total_time_ns: Option<i64>,
    ) -> Result<Self, DbError> {
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO app_launch_histories
                 (activity_id, temperature, trace_enabled, report_fully_drawn_ns, total_time_ns)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    activity_id,
                    temperature,
                    trace_enabled,
                    report_fully_drawn_ns,
                    total_time_ns
                ],
            )?;
            Ok(Self {
                id: conn.last_insert_rowid(),
                activity_id,
                temperature,
                trace_enabled,
                report_fully_drawn_ns,
                total_time_ns,
            })
        })
    }

    /// Lists an activity's histories eligible for compilation: cold
    /// launches recorded with tracing enabled.
    pub fn select_for_compile(db: &DbHandle, activity_id: i64) -> Result<Vec<Self>, DbError> {
        db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, activity_id, temperature, trace_enabled,
                        report_fully_drawn_ns, total_time_ns
                 FROM app_launch_histories
                 WHERE activity_id = ?1 AND trace_enabled = 1 AND temperature = ?2
                 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![activity_id, TEMPERATURE_COLD], |row| {
                Ok(Self {
                    id: row.get(0)?,
                    activity_id: row.get(1)?,
                    temperature: row.get(2)?,
                    trace_enabled: row.get(3)?,
                    report_fully_drawn_ns: row.get(4)?,
                    total_time_ns: row.get(5)?,
                })
            })?;
            rows.collect()
        })
    }
}

/// One raw trace file recorded during a launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTraceModel {
    /// Row id.
    pub id: i64,
    /// Owning launch-history row id.
    pub history_id: i64,
    /// Path of the raw trace file on disk.
    pub file_path: String,
}

impl RawTraceModel {
    /// Inserts a raw-trace row, returning the stored model.
    pub fn insert(db: &DbHandle, history_id: i64, file_path: &str) -> Result<Self, DbError> {
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO raw_traces (history_id, file_path) VALUES (?1, ?2)",
                params![history_id, file_path],
            )?;
            Ok(Self {
                id: conn.last_insert_rowid(),
                history_id,
                file_path: file_path.to_string(),
            })
        })
    }

    /// Looks up the raw trace recorded for a launch history.
    pub fn select_by_history_id(db: &DbHandle, history_id: i64) -> Result<Option<Self>, DbError> {
        db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, history_id, file_path FROM raw_traces WHERE history_id = ?1",
                params![history_id],
                |row| {
                    Ok(Self {
                        id: row.get(0)?,
                        history_id: row.get(1)?,
                        file_path: row.get(2)?,
                    })
                },
            )
            .optional()
        })
    }
}

/// One compiled prefetch artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefetchFileModel {
    /// Row id.
    pub id: i64,
    /// Activity the artifact was compiled for.
    pub activity_id: i64,
    /// Path of the artifact on disk.
    pub file_path: String,
}

impl PrefetchFileModel {
    /// Records a compiled artifact for an activity. Replaces any earlier
    /// artifact row for the same activity.
    pub fn insert(db: &DbHandle, activity_id: i64, file_path: &str) -> Result<Self, DbError> {
        db.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO prefetch_files (activity_id, file_path) VALUES (?1, ?2)",
                params![activity_id, file_path],
            )?;
            Ok(Self {
                id: conn.last_insert_rowid(),
                activity_id,
                file_path: file_path.to_string(),
            })
        })
    }

    /// Looks up the artifact recorded for a versioned component.
    pub fn select_by_versioned_component(
        db: &DbHandle,
        vcn: &VersionedComponentName,
    ) -> Result<Option<Self>, DbError> {
        db.with_conn(|conn| {
            conn.query_row(
                "SELECT p.id, p.activity_id, p.file_path
                 FROM prefetch_files p
                 JOIN activities a ON a.id = p.activity_id
                 JOIN packages k ON k.id = a.package_id
                 WHERE k.name = ?1 AND k.version = ?2 AND a.name = ?3",
                params![vcn.package, vcn.version, vcn.activity],
                |row| {
                    Ok(Self {
                        id: row.get(0)?,
                        activity_id: row.get(1)?,
                        file_path: row.get(2)?,
                    })
                },
            )
            .optional()
        })
    }
}
