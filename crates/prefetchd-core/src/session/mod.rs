//! Tracing-session handle lifecycle tracking.
//!
//! The external tracing subsystem hands out opaque integer handles for
//! live tracing sessions. Its own handle-validity contract is not
//! caller-checkable (it may silently misbehave on a bad handle), so this
//! module wraps every subsystem call with an internally-maintained state
//! machine that fails loudly on programmer error and keeps a live debug
//! snapshot of every in-flight session.
//!
//! # State Machine
//!
//! ```text
//!   ┌───────────┐  create   ┌─────────┐  start_tracing  ┌────────────────┐
//!   │ Uncreated │──────────►│ Created │────────────────►│ StartedTracing │
//!   └───────────┘           └────┬────┘                 └───────┬────────┘
//!                                │                              │ read_trace
//!                                │ destroy                      ▼
//!                                │                      ┌─────────────┐
//!                                │                      │ ReadTracing │
//!                                │                      └──────┬──────┘
//!                                ▼          destroy            │
//!                          ┌───────────┐◄─────────────────────┘
//!                          │ Destroyed │
//!                          └───────────┘
//! ```
//!
//! Transitions are strictly forward; nothing leaves `Destroyed`.
//! `TimedOutDestroyed` is a reserved terminal alternative for a future
//! timeout-driven destruction path; no code transitions into it yet.
//!
//! # Handle numbering
//!
//! Handles start at [`INVALID_HANDLE`]` + 1` and increase by exactly one
//! per creation, never reused. The tracker asserts this on every
//! `create`; a violation is a broken fundamental assumption and panics.
//! The numbering is what lets [`SessionTracker::describe`] classify
//! handles outside the live set as already-destroyed versus never-created.

pub mod backend;
pub mod tracker;

#[cfg(test)]
mod tests;

pub use backend::{BackendState, Handle, StateCallback, TraceBackend, TraceBuffer, INVALID_HANDLE};
pub use tracker::{HandleDescription, SessionTracker, StateKind};
