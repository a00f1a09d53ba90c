//! Core library for `prefetchd`, an on-device app-startup accelerator.
//!
//! `prefetchd` records an application's I/O access pattern during launch
//! ("raw traces") and later replays a compiled, replay-ready "prefetch"
//! artifact to warm the page cache before the app needs the data. This
//! crate holds the two stateful cores of that service:
//!
//! - [`session`]: the tracing-handle lifecycle tracker, a validation layer
//!   over the external tracing subsystem's opaque session handles.
//! - [`maintenance`]: the compilation orchestrator, which batches raw
//!   traces per (package, activity, version), decides eligibility, and
//!   spawns the external compiler process.
//!
//! Supporting modules: [`packages`] (package-name → version cache),
//! [`db`] (sqlite-backed launch-history and artifact records), and
//! [`config`] (daemon configuration).
//!
//! The binder/RPC surface that feeds launch and job events into these
//! cores lives in the daemon crate, not here.

pub mod config;
pub mod db;
pub mod maintenance;
pub mod packages;
pub mod session;
