//! Integration and property tests for the session lifecycle tracker.
//!
//! These verify:
//! - Handle numbering: create sequences yield 1, 2, 3, ... in call order
//! - Untracked-handle no-ops leave tracker state unchanged
//! - Double destroy is tolerated
//! - Untracked-handle classification from the watermarks

use std::sync::{Arc, Mutex};

use proptest::prelude::*;

use super::backend::{BackendState, Handle, StateCallback, TraceBackend, TraceBuffer};
use super::tracker::{SessionTracker, StateKind};

// ============================================================================
// Test double
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum BackendCall {
    Create,
    StartTracing(Handle),
    ReadTrace(Handle),
    Destroy(Handle),
}

/// Scripted backend: issues sequential handles starting after
/// `first_handle - 1` and records every call.
struct FakeBackend {
    next_handle: Mutex<Handle>,
    calls: Mutex<Vec<BackendCall>>,
    trace_bytes: Vec<u8>,
}

impl FakeBackend {
    fn new() -> Self {
        Self::starting_at(1)
    }

    fn starting_at(first_handle: Handle) -> Self {
        Self {
            next_handle: Mutex::new(first_handle),
            calls: Mutex::new(Vec::new()),
            trace_bytes: b"trace-bytes".to_vec(),
        }
    }

    fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl TraceBackend for FakeBackend {
    fn create(&self, _config: &[u8], _callback: StateCallback) -> Handle {
        self.calls.lock().unwrap().push(BackendCall::Create);
        let mut next = self.next_handle.lock().unwrap();
        let handle = *next;
        *next += 1;
        handle
    }

    fn start_tracing(&self, handle: Handle) {
        self.calls
            .lock()
            .unwrap()
            .push(BackendCall::StartTracing(handle));
    }

    fn read_trace(&self, handle: Handle) -> TraceBuffer {
        self.calls
            .lock()
            .unwrap()
            .push(BackendCall::ReadTrace(handle));
        self.trace_bytes.clone()
    }

    fn destroy(&self, handle: Handle) {
        self.calls.lock().unwrap().push(BackendCall::Destroy(handle));
    }

    fn poll_state(&self, _handle: Handle) -> BackendState {
        BackendState::Configured
    }
}

fn tracker_with_fake() -> (Arc<FakeBackend>, SessionTracker) {
    let backend = Arc::new(FakeBackend::new());
    let tracker = SessionTracker::new(backend.clone());
    (backend, tracker)
}

fn noop_callback() -> StateCallback {
    Box::new(|_, _| {})
}

// ============================================================================
// Handle numbering
// ============================================================================

#[test]
fn test_create_issues_sequential_handles() {
    let (_backend, tracker) = tracker_with_fake();
    for expected in 1..=5 {
        let handle = tracker.create(b"config", noop_callback());
        assert_eq!(handle, expected);
    }
}

#[test]
#[should_panic(expected = "numbering contract violated")]
fn test_backend_numbering_violation_panics() {
    let backend = Arc::new(FakeBackend::starting_at(7));
    let tracker = SessionTracker::new(backend);
    tracker.create(b"config", noop_callback());
}

// ============================================================================
// Lifecycle transitions
// ============================================================================

#[test]
fn test_create_then_destroy_removes_from_live_set() {
    let (backend, tracker) = tracker_with_fake();
    let handle = tracker.create(b"config", noop_callback());
    tracker.destroy(handle);

    let desc = tracker.describe(handle);
    assert_eq!(desc.kind, StateKind::Destroyed);
    assert!(backend.calls().contains(&BackendCall::Destroy(handle)));
}

#[test]
fn test_start_tracing_records_timestamp() {
    let (backend, tracker) = tracker_with_fake();
    let handle = tracker.create(b"config", noop_callback());

    assert!(tracker.describe(handle).started_tracing_ns.is_none());
    tracker.start_tracing(handle);

    let desc = tracker.describe(handle);
    assert_eq!(desc.kind, StateKind::StartedTracing);
    let started = desc.started_tracing_ns.expect("timestamp recorded");
    assert_eq!(started, desc.last_transition_ns);
    assert!(backend.calls().contains(&BackendCall::StartTracing(handle)));
}

#[test]
fn test_read_trace_returns_backend_buffer() {
    let (_backend, tracker) = tracker_with_fake();
    let handle = tracker.create(b"config", noop_callback());
    tracker.start_tracing(handle);

    let buffer = tracker.read_trace(handle);
    assert_eq!(buffer, b"trace-bytes");
    assert_eq!(tracker.describe(handle).kind, StateKind::ReadTracing);
}

// ============================================================================
// Untracked-handle handling
// ============================================================================

#[test]
fn test_start_tracing_on_unknown_handle_is_noop() {
    let (backend, tracker) = tracker_with_fake();
    for _ in 0..5 {
        tracker.create(b"config", noop_callback());
    }

    tracker.start_tracing(9999);

    // No backend call, no state change.
    assert!(!backend
        .calls()
        .iter()
        .any(|c| matches!(c, BackendCall::StartTracing(_))));
    assert_eq!(tracker.describe(9999).kind, StateKind::Uncreated);
}

#[test]
fn test_read_trace_on_unknown_handle_returns_empty() {
    let (backend, tracker) = tracker_with_fake();
    let buffer = tracker.read_trace(42);
    assert!(buffer.is_empty());
    assert!(backend.calls().is_empty());
}

#[test]
fn test_double_destroy_is_tolerated() {
    let (backend, tracker) = tracker_with_fake();
    let handle = tracker.create(b"config", noop_callback());
    tracker.destroy(handle);
    tracker.destroy(handle);

    let destroys = backend
        .calls()
        .iter()
        .filter(|c| matches!(c, BackendCall::Destroy(_)))
        .count();
    assert_eq!(destroys, 1);
    assert_eq!(tracker.describe(handle).kind, StateKind::Destroyed);
}

// ============================================================================
// Untracked-handle classification
// ============================================================================

#[test]
fn test_describe_infers_uncreated_above_watermark() {
    let (_backend, tracker) = tracker_with_fake();
    for _ in 0..3 {
        tracker.create(b"config", noop_callback());
    }
    assert_eq!(tracker.describe(4).kind, StateKind::Uncreated);
    assert_eq!(tracker.describe(9999).kind, StateKind::Uncreated);
}

#[test]
fn test_describe_infers_destroyed_within_created_range() {
    let (_backend, tracker) = tracker_with_fake();
    for _ in 0..4 {
        tracker.create(b"config", noop_callback());
    }
    tracker.destroy(2);

    // 2 is inside [1, last_created] but not live.
    assert_eq!(tracker.describe(2).kind, StateKind::Destroyed);
    // Live handles describe as themselves.
    assert_eq!(tracker.describe(1).kind, StateKind::Created);
    assert_eq!(tracker.describe(3).kind, StateKind::Created);
}

#[test]
fn test_describe_after_all_destroyed_in_order() {
    let (_backend, tracker) = tracker_with_fake();
    for _ in 0..3 {
        tracker.create(b"config", noop_callback());
    }
    for handle in 1..=3 {
        tracker.destroy(handle);
    }
    for handle in 1..=3 {
        assert_eq!(tracker.describe(handle).kind, StateKind::Destroyed);
    }
    assert_eq!(tracker.describe(4).kind, StateKind::Uncreated);
}

// ============================================================================
// Snapshot
// ============================================================================

#[test]
fn test_snapshot_reports_live_handles_and_watermarks() {
    let (_backend, tracker) = tracker_with_fake();
    let first = tracker.create(b"config", noop_callback());
    let second = tracker.create(b"config", noop_callback());
    tracker.start_tracing(second);
    tracker.destroy(first);

    let snapshot = tracker.snapshot();
    assert!(snapshot.contains("Last created handle: 2"));
    assert!(snapshot.contains("Last destroyed handle: 1"));
    assert!(snapshot.contains("Handle 2"));
    assert!(snapshot.contains("Kind: StartedTracing"));
    assert!(!snapshot.contains("Handle 1\n"));
}

#[test]
fn test_snapshot_on_empty_tracker() {
    let (_backend, tracker) = tracker_with_fake();
    let snapshot = tracker.snapshot();
    assert!(snapshot.contains("(None)"));
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    /// Creating n sessions yields handles 1..=n regardless of how many
    /// destroys are interleaved afterwards.
    #[test]
    fn prop_handles_sequential(creates in 1usize..20) {
        let (_backend, tracker) = tracker_with_fake();
        let handles: Vec<Handle> =
            (0..creates).map(|_| tracker.create(b"c", noop_callback())).collect();
        let expected: Vec<Handle> = (1..=creates as Handle).collect();
        prop_assert_eq!(handles, expected);
    }

    /// After destroying an in-order prefix, every destroyed handle
    /// classifies as Destroyed, every live one keeps its description,
    /// and everything above the creation watermark is Uncreated.
    #[test]
    fn prop_prefix_destroy_classification(
        creates in 1usize..16,
        destroys in 0usize..16,
    ) {
        let destroys = destroys.min(creates);
        let (_backend, tracker) = tracker_with_fake();
        for _ in 0..creates {
            tracker.create(b"c", noop_callback());
        }
        for handle in 1..=destroys as Handle {
            tracker.destroy(handle);
        }

        for handle in 1..=creates as Handle {
            let expected = if handle <= destroys as Handle {
                StateKind::Destroyed
            } else {
                StateKind::Created
            };
            prop_assert_eq!(tracker.describe(handle).kind, expected);
        }
        prop_assert_eq!(
            tracker.describe(creates as Handle + 1).kind,
            StateKind::Uncreated
        );
    }
}
