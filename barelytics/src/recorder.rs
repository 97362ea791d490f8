//! Recorder that plays back a recorded JSONL event stream
//!
//! Each non-blank line of the file is one recorder event. The whole stream is
//! emitted as soon as recording starts.

use std::path::Path;

use anyhow::{Context, Result};
use barelytics_core::recording::{RecordOptions, Recorder, RecorderStop};
use barelytics_core::replay::ReplaySink;
use barelytics_core::ReplayEvent;

pub struct JsonlRecorder {
    events: Vec<serde_json::Value>,
}

impl JsonlRecorder {
    pub fn open(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;

        let events = content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                serde_json::from_str(line)
                    .with_context(|| format!("{}:{}: invalid JSON event", path.display(), i + 1))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { events })
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl Recorder for JsonlRecorder {
    fn record(
        &self,
        _options: RecordOptions,
        sink: ReplaySink,
    ) -> barelytics_core::Result<RecorderStop> {
        for event in &self.events {
            sink.push(ReplayEvent::new(event.clone()));
        }
        Ok(RecorderStop::new(|| {}))
    }

    fn take_full_snapshot(&self) {
        // A recorded stream carries its own snapshots
        tracing::debug!(events = self.events.len(), "Snapshot request ignored for recorded stream");
    }
}
