//! Lifecycle tracker over the raw tracing backend.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, error, trace, warn};

use super::backend::{
    BackendState, Handle, StateCallback, TraceBackend, TraceBuffer, INVALID_HANDLE,
};

/// The tracker's own lifecycle state for a handle.
///
/// Required for correctness, unlike the backend-reported
/// [`BackendState`] which is recorded purely for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    /// Handle was never issued.
    Uncreated,
    /// Session created, tracing not started.
    Created,
    /// Tracing started.
    StartedTracing,
    /// Trace buffer has been read.
    ReadTracing,
    /// Destroyed by a future timeout policy. Reserved: nothing
    /// transitions into this state yet.
    TimedOutDestroyed,
    /// Destroyed by an explicit `destroy` call.
    Destroyed,
}

impl StateKind {
    /// Returns the state name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Uncreated => "Uncreated",
            Self::Created => "Created",
            Self::StartedTracing => "StartedTracing",
            Self::ReadTracing => "ReadTracing",
            Self::TimedOutDestroyed => "TimedOutDestroyed",
            Self::Destroyed => "Destroyed",
        }
    }
}

impl std::fmt::Display for StateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-handle record kept while a session is live.
///
/// Created on `create`, mutated on every transition, removed on
/// `destroy` so that only live sessions occupy memory.
#[derive(Debug, Clone)]
pub struct HandleDescription {
    /// The handle value.
    pub handle: Handle,
    /// The tracker's own lifecycle state.
    pub kind: StateKind,
    /// The backend-reported state at the last transition.
    pub backend_state: BackendState,
    /// When tracing last started, ns since the Unix epoch.
    pub started_tracing_ns: Option<u64>,
    /// When the last lifecycle transition happened, ns since the epoch.
    pub last_transition_ns: u64,
}

impl HandleDescription {
    fn untracked(handle: Handle, kind: StateKind) -> Self {
        Self {
            handle,
            kind,
            backend_state: BackendState::SessionNotFound,
            started_tracing_ns: None,
            last_transition_ns: 0,
        }
    }
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// State behind the tracker's single lock.
struct TrackerInner {
    /// Live handles only; destroyed handles are removed.
    live: BTreeMap<Handle, HandleDescription>,
    /// Highest handle ever issued.
    last_created: Handle,
    /// Handle of the most recent destroy.
    last_destroyed: Handle,
}

impl TrackerInner {
    fn update_description(&mut self, backend: &dyn TraceBackend, handle: Handle, kind: StateKind) {
        let now = now_ns();
        let entry = self
            .live
            .entry(handle)
            .or_insert_with(|| HandleDescription::untracked(handle, kind));
        entry.kind = kind;
        entry.backend_state = backend.poll_state(handle);
        entry.last_transition_ns = now;
        if kind == StateKind::StartedTracing {
            entry.started_tracing_ns = Some(now);
        }
    }

    /// Whether an untracked handle was destroyed at some point.
    ///
    /// Relies on the increment-by-one numbering: a value at or below the
    /// destruction watermark, or inside the live set's range but absent
    /// from it, must have been tracked once.
    fn is_destroyed(&self, handle: Handle) -> bool {
        if self.live.contains_key(&handle) || handle == INVALID_HANDLE {
            return false;
        }
        if handle <= self.last_destroyed {
            return true;
        }
        match (self.live.keys().next(), self.live.keys().next_back()) {
            (Some(&min), Some(&max)) => handle >= min && handle <= max,
            _ => false,
        }
    }

    /// Whether an untracked handle was never issued.
    fn is_uncreated(&self, handle: Handle) -> bool {
        if self.live.contains_key(&handle) {
            return false;
        }
        if handle == INVALID_HANDLE {
            // An invalid handle can never have been created.
            return true;
        }
        if handle <= self.last_destroyed {
            return false;
        }
        match self.live.keys().next_back() {
            Some(&max) => handle > max,
            None => handle > self.last_destroyed,
        }
    }
}

/// Validation and introspection wrapper over a [`TraceBackend`].
///
/// Construct one instance at startup and share it (`Arc`) with every
/// consumer: the handle space is global, so the tracking state must be
/// too. A single internal lock serializes every operation except
/// [`poll_state`](Self::poll_state), the backend call included; if the
/// backend blocks, all tracker operations stall. Accepted trade-off for
/// strict invariant checking.
pub struct SessionTracker {
    backend: Arc<dyn TraceBackend>,
    inner: Mutex<TrackerInner>,
}

impl SessionTracker {
    /// Creates a tracker over the given backend.
    #[must_use]
    pub fn new(backend: Arc<dyn TraceBackend>) -> Self {
        Self {
            backend,
            inner: Mutex::new(TrackerInner {
                live: BTreeMap::new(),
                last_created: INVALID_HANDLE,
                last_destroyed: INVALID_HANDLE,
            }),
        }
    }

    /// Creates a new tracing session and begins tracking it.
    ///
    /// # Panics
    ///
    /// Panics if the backend violates its numbering contract (the new
    /// handle must equal the previous one plus one, and must not be
    /// live). That is a broken fundamental assumption, not a runtime
    /// error: the untracked-handle classification in
    /// [`describe`](Self::describe) depends on the numbering.
    pub fn create(&self, config: &[u8], callback: StateCallback) -> Handle {
        trace!(config_len = config.len(), "session create");
        let mut inner = self.inner.lock().unwrap();
        let handle = self.backend.create(config, callback);

        inner.last_created += 1;
        assert_eq!(
            handle, inner.last_created,
            "trace backend issued handle {handle}, expected {}: numbering contract violated",
            inner.last_created
        );
        assert!(
            !inner.live.contains_key(&handle),
            "trace backend re-used handle {handle}"
        );

        inner.update_description(self.backend.as_ref(), handle, StateKind::Created);
        handle
    }

    /// Starts tracing on a tracked session.
    ///
    /// On an untracked handle this logs an error and does nothing.
    pub fn start_tracing(&self, handle: Handle) {
        debug!(handle, "session start_tracing");
        let mut inner = self.inner.lock().unwrap();
        if !inner.live.contains_key(&handle) {
            error!(handle, "cannot start_tracing: untracked handle");
            return;
        }
        self.backend.start_tracing(handle);
        inner.update_description(self.backend.as_ref(), handle, StateKind::StartedTracing);
    }

    /// Reads the trace buffer of a tracked session.
    ///
    /// On an untracked handle this logs an error and returns an empty
    /// buffer.
    pub fn read_trace(&self, handle: Handle) -> TraceBuffer {
        debug!(handle, "session read_trace");
        let mut inner = self.inner.lock().unwrap();
        if !inner.live.contains_key(&handle) {
            error!(handle, "cannot read_trace: untracked handle");
            return TraceBuffer::new();
        }
        let buffer = self.backend.read_trace(handle);
        inner.update_description(self.backend.as_ref(), handle, StateKind::ReadTracing);
        buffer
    }

    /// Destroys a tracked session and stops tracking it.
    ///
    /// Calling destroy more than once is an accepted caller pattern, not
    /// an error: a repeated call logs and returns.
    pub fn destroy(&self, handle: Handle) {
        trace!(handle, "session destroy");
        let mut inner = self.inner.lock().unwrap();
        if !inner.live.contains_key(&handle) {
            debug!(handle, "destroy on untracked handle (already destroyed?)");
            return;
        }
        self.backend.destroy(handle);
        inner.update_description(self.backend.as_ref(), handle, StateKind::Destroyed);
        inner.last_destroyed = handle;
        // Only live sessions stay resident.
        inner.live.remove(&handle);
    }

    /// Polls the backend's own state for a handle.
    ///
    /// Pure pass-through; takes no tracker lock and does not require the
    /// handle to be tracked.
    #[must_use]
    pub fn poll_state(&self, handle: Handle) -> BackendState {
        self.backend.poll_state(handle)
    }

    /// Fetches or infers a handle's description.
    ///
    /// For untracked handles the lifecycle state is inferred from the
    /// numbering invariants: at or below the historical live range means
    /// `Destroyed`, above it means `Uncreated`. Diagnostics only; never
    /// use this for a correctness decision.
    #[must_use]
    pub fn describe(&self, handle: Handle) -> HandleDescription {
        let inner = self.inner.lock().unwrap();
        if let Some(desc) = inner.live.get(&handle) {
            return desc.clone();
        }
        if inner.is_destroyed(handle) {
            return HandleDescription::untracked(handle, StateKind::Destroyed);
        }
        if !inner.is_uncreated(handle) {
            // Out-of-order destruction can leave a handle that neither
            // predicate classifies.
            warn!(handle, "inconsistent untracked-handle classification");
        }
        HandleDescription::untracked(handle, StateKind::Uncreated)
    }

    /// Renders the watermarks and every live handle's description.
    ///
    /// Uses a non-blocking lock attempt so a diagnostic dump can never
    /// deadlock against a stuck operation; on failure the report notes
    /// the fact and carries no per-handle data.
    #[must_use]
    pub fn snapshot(&self) -> String {
        let mut out = String::new();
        out.push_str("Tracing session tracker:\n");

        let Ok(inner) = self.inner.try_lock() else {
            out.push_str("  (possible deadlock: tracker lock unavailable, state omitted)\n");
            return out;
        };

        let _ = writeln!(out, "  Last created handle: {}", inner.last_created);
        let _ = writeln!(out, "  Last destroyed handle: {}", inner.last_destroyed);
        out.push_str("\n  In-flight handles:\n");
        for desc in inner.live.values() {
            let _ = writeln!(out, "    Handle {}", desc.handle);
            let _ = writeln!(out, "      Kind: {}", desc.kind);
            let _ = writeln!(out, "      Backend state: {}", desc.backend_state);
            let _ = writeln!(
                out,
                "      Started tracing at: {}",
                desc.started_tracing_ns.unwrap_or(0)
            );
            let _ = writeln!(out, "      Last transition at: {}", desc.last_transition_ns);
        }
        if inner.live.is_empty() {
            out.push_str("    (None)\n");
        }
        out
    }
}

impl std::fmt::Debug for SessionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTracker").finish_non_exhaustive()
    }
}
