//! Bridge between the DOM recorder and the replay buffer
//!
//! The recorder inspects the full document when it starts, so recording only
//! begins once the page reports `ReadyState::Complete`, either immediately or
//! from the `load` event. Every event it emits is appended to the buffer in
//! emission order. A session's first page load also requests one full snapshot
//! so every session starts from a complete baseline.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::platform::Page;
use crate::replay::ReplaySink;
use crate::types::{ReadyState, SessionIdentity};

/// Recorder options; fixed privacy/performance policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordOptions {
    pub mask_all_inputs: bool,
    pub record_canvas: bool,
    pub record_cross_origin_iframes: bool,
}

impl RecordOptions {
    pub const PRIVACY_DEFAULT: RecordOptions = RecordOptions {
        mask_all_inputs: true,
        record_canvas: false,
        record_cross_origin_iframes: false,
    };
}

/// Stop function returned by the recorder when recording starts
pub struct RecorderStop(Box<dyn FnOnce() + Send>);

impl RecorderStop {
    pub fn new(stop: impl FnOnce() + Send + 'static) -> Self {
        Self(Box::new(stop))
    }

    fn call(self) {
        (self.0)()
    }
}

/// The third-party DOM recorder
pub trait Recorder: Send + Sync {
    /// Start recording, emitting every event into `sink`
    fn record(&self, options: RecordOptions, sink: ReplaySink) -> Result<RecorderStop>;

    /// Emit a complete serialization of the current DOM
    fn take_full_snapshot(&self);
}

enum RecordingState {
    /// Waiting for the page to finish loading
    Pending,
    Recording(RecorderStop),
    Unavailable,
    Stopped,
}

/// Handle to a started (or pending) recording
#[derive(Clone)]
pub struct RecordingHandle {
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingHandle {
    fn with_state(state: RecordingState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn is_recording(&self) -> bool {
        matches!(*self.state.lock(), RecordingState::Recording(_))
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.state.lock(), RecordingState::Pending)
    }

    /// Stop the recorder; a pending start will no longer happen
    pub fn stop(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), RecordingState::Stopped);
        if let RecordingState::Recording(stop) = previous {
            stop.call();
            tracing::debug!("Recording stopped");
        }
    }
}

/// Start recording once the page has loaded
///
/// A missing recorder is not fatal: replay is skipped and analytics events
/// keep flowing.
pub fn start(
    page: &dyn Page,
    recorder: Option<Arc<dyn Recorder>>,
    sink: ReplaySink,
    session: &SessionIdentity,
) -> RecordingHandle {
    let Some(recorder) = recorder else {
        let e = Error::RecorderUnavailable("no recorder loaded on the page".to_string());
        tracing::warn!(error = %e, "Skipping session recording");
        return RecordingHandle::with_state(RecordingState::Unavailable);
    };

    let handle = RecordingHandle::with_state(RecordingState::Pending);
    let take_snapshot = session.is_new;

    if page.ready_state() == ReadyState::Complete {
        begin(&handle, recorder.as_ref(), sink, take_snapshot);
    } else {
        tracing::debug!("Deferring recording until page load");
        let deferred = handle.clone();
        page.on_load(Box::new(move || {
            begin(&deferred, recorder.as_ref(), sink, take_snapshot);
        }));
    }

    handle
}

fn begin(handle: &RecordingHandle, recorder: &dyn Recorder, sink: ReplaySink, take_snapshot: bool) {
    if !handle.is_pending() {
        return;
    }

    match recorder.record(RecordOptions::PRIVACY_DEFAULT, sink) {
        Ok(stop) => {
            let mut state = handle.state.lock();
            if matches!(*state, RecordingState::Pending) {
                *state = RecordingState::Recording(stop);
            } else {
                // Stopped while the recorder was starting
                drop(state);
                stop.call();
                return;
            }
        }
        Err(e) => {
            *handle.state.lock() = RecordingState::Unavailable;
            tracing::warn!(error = %e, "Recorder failed to start");
            return;
        }
    }

    if take_snapshot {
        tracing::debug!("New session, taking full snapshot");
        recorder.take_full_snapshot();
    }
    tracing::info!("Recording started");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::memory::{MemoryPage, MemoryRecorder};
    use crate::replay::ReplayBuffer;
    use serde_json::json;

    fn session(is_new: bool) -> SessionIdentity {
        SessionIdentity {
            session_id: "s".to_string(),
            is_new,
        }
    }

    #[test]
    fn test_starts_immediately_when_loaded() {
        let page = MemoryPage::new("https://www.example.com/");
        let recorder = Arc::new(MemoryRecorder::new());
        let buffer = ReplayBuffer::new();

        let handle = start(&page, Some(recorder.clone()), buffer.sink(), &session(false));

        assert!(handle.is_recording());
        assert_eq!(recorder.start_count(), 1);
        assert_eq!(recorder.options(), Some(RecordOptions::PRIVACY_DEFAULT));
        assert_eq!(recorder.snapshot_count(), 0);
    }

    #[test]
    fn test_deferred_until_load() {
        let page = MemoryPage::loading("https://www.example.com/");
        let recorder = Arc::new(MemoryRecorder::new());
        let buffer = ReplayBuffer::new();

        let handle = start(&page, Some(recorder.clone()), buffer.sink(), &session(true));
        assert!(handle.is_pending());
        assert_eq!(recorder.start_count(), 0);

        page.fire_load();
        assert!(handle.is_recording());
        assert_eq!(recorder.start_count(), 1);
        assert_eq!(recorder.snapshot_count(), 1);
    }

    #[test]
    fn test_new_session_takes_one_snapshot() {
        let page = MemoryPage::new("https://www.example.com/");
        let recorder = Arc::new(MemoryRecorder::new());
        let buffer = ReplayBuffer::new();

        start(&page, Some(recorder.clone()), buffer.sink(), &session(true));

        assert_eq!(recorder.snapshot_count(), 1);
        // The snapshot lands in the buffer like any other event
        assert!(!buffer.is_empty());
    }

    #[test]
    fn test_emitted_events_appended_in_order() {
        let page = MemoryPage::new("https://www.example.com/");
        let recorder = Arc::new(MemoryRecorder::new());
        let buffer = ReplayBuffer::new();
        start(&page, Some(recorder.clone()), buffer.sink(), &session(false));

        for i in 0..4 {
            assert!(recorder.emit(json!({ "type": 3, "seq": i })));
        }

        let seqs: Vec<_> = buffer
            .drain()
            .into_iter()
            .map(|e| e.into_value()["seq"].as_i64().unwrap())
            .collect();
        assert_eq!(seqs, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_missing_recorder_is_not_fatal() {
        let page = MemoryPage::new("https://www.example.com/");
        let handle = start(&page, None, ReplayBuffer::new().sink(), &session(true));
        assert!(!handle.is_recording());
        assert!(!handle.is_pending());
        handle.stop();
    }

    #[test]
    fn test_failing_recorder_is_not_fatal() {
        let page = MemoryPage::new("https://www.example.com/");
        let recorder = Arc::new(MemoryRecorder::failing());
        let handle = start(
            &page,
            Some(recorder.clone()),
            ReplayBuffer::new().sink(),
            &session(true),
        );
        assert!(!handle.is_recording());
        assert_eq!(recorder.snapshot_count(), 0);
    }

    #[test]
    fn test_stop_calls_recorder_stop() {
        let page = MemoryPage::new("https://www.example.com/");
        let recorder = Arc::new(MemoryRecorder::new());
        let handle = start(
            &page,
            Some(recorder.clone()),
            ReplayBuffer::new().sink(),
            &session(false),
        );

        handle.stop();
        assert!(recorder.is_stopped());
        assert!(!recorder.emit(json!({"type": 3})));
    }

    #[test]
    fn test_stop_before_load_cancels_start() {
        let page = MemoryPage::loading("https://www.example.com/");
        let recorder = Arc::new(MemoryRecorder::new());
        let handle = start(
            &page,
            Some(recorder.clone()),
            ReplayBuffer::new().sink(),
            &session(true),
        );

        handle.stop();
        page.fire_load();
        assert_eq!(recorder.start_count(), 0);
        assert!(!handle.is_recording());
    }
}
