//! Raw tracing-subsystem capability.
//!
//! [`TraceBackend`] is the seam between the tracker and the real tracing
//! subsystem binding. The daemon injects the real implementation at
//! startup; tests inject a scripted double. The tracker never talks to
//! the subsystem except through this trait.

use std::fmt;

/// Opaque identifier for one tracing session.
///
/// Issued by the subsystem, strictly increasing by one per creation,
/// never reused.
pub type Handle = i64;

/// Reserved sentinel: never identifies a real session.
pub const INVALID_HANDLE: Handle = 0;

/// Raw trace bytes read back from a session.
pub type TraceBuffer = Vec<u8>;

/// Callback invoked by the subsystem when a session's state changes.
pub type StateCallback = Box<dyn Fn(Handle, BackendState) + Send + Sync>;

/// The subsystem's own view of a session's state.
///
/// Recorded on every tracker transition for diagnostics. The tracker
/// never bases a correctness decision on it; only [`super::StateKind`]
/// matters for validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    /// The session failed and will produce no trace.
    TraceFailed,
    /// The connection to the subsystem was lost.
    ConnectionError,
    /// The subsystem does not know this handle.
    SessionNotFound,
    /// No session activity yet.
    Idle,
    /// Session is connecting to the subsystem.
    Connecting,
    /// Session is configured and ready to start.
    Configured,
    /// Session is actively tracing.
    Tracing,
    /// Tracing finished; the buffer is readable.
    TraceEnded,
}

impl fmt::Display for BackendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TraceFailed => "TraceFailed",
            Self::ConnectionError => "ConnectionError",
            Self::SessionNotFound => "SessionNotFound",
            Self::Idle => "Idle",
            Self::Connecting => "Connecting",
            Self::Configured => "Configured",
            Self::Tracing => "Tracing",
            Self::TraceEnded => "TraceEnded",
        };
        write!(f, "{name}")
    }
}

/// Capability over the raw tracing subsystem's session API.
///
/// Methods take `&self`; implementations carry their own interior
/// mutability. [`poll_state`](Self::poll_state) must be callable without
/// any tracker lock held.
pub trait TraceBackend: Send + Sync {
    /// Creates a new tracing session from a serialized config, returning
    /// its handle. The callback fires on subsystem-side state changes.
    fn create(&self, config: &[u8], callback: StateCallback) -> Handle;

    /// Starts tracing on an existing session.
    fn start_tracing(&self, handle: Handle);

    /// Reads the accumulated trace buffer for a session.
    fn read_trace(&self, handle: Handle) -> TraceBuffer;

    /// Destroys a session and frees its buffer.
    fn destroy(&self, handle: Handle);

    /// Polls the subsystem's own state for a handle.
    fn poll_state(&self, handle: Handle) -> BackendState;
}
