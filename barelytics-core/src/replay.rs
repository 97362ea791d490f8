//! Replay event buffer and flush scheduling
//!
//! The recorder pushes into the buffer through a [`ReplaySink`]; the
//! [`ReplayFlusher`] drains it, either from the [`FlushScheduler`] timer or
//! from a manual `flush_replays()`. A drain takes the whole buffer in one lock
//! acquisition, so an event is either in the drained batch or stays for the
//! next one, never both and never lost.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::transport::{EventDetail, Transport};
use crate::types::ReplayEvent;

/// Ordered, unbounded-until-flush buffer of recorder events
#[derive(Clone, Default)]
pub struct ReplayBuffer {
    events: Arc<Mutex<Vec<ReplayEvent>>>,
}

impl ReplayBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push-only handle for the recorder side
    pub fn sink(&self) -> ReplaySink {
        ReplaySink {
            events: Arc::clone(&self.events),
        }
    }

    /// Take every buffered event, leaving the buffer empty
    pub fn drain(&self) -> Vec<ReplayEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

/// Producer end of the replay buffer, handed to the recorder
#[derive(Clone)]
pub struct ReplaySink {
    events: Arc<Mutex<Vec<ReplayEvent>>>,
}

impl ReplaySink {
    /// Append an event; never blocks on delivery
    pub fn push(&self, event: ReplayEvent) {
        self.events.lock().push(event);
    }
}

/// Drains the buffer into one `replay` event per non-empty flush
#[derive(Clone)]
pub struct ReplayFlusher {
    buffer: ReplayBuffer,
    transport: Arc<Transport>,
}

impl ReplayFlusher {
    pub fn new(buffer: ReplayBuffer, transport: Arc<Transport>) -> Self {
        Self { buffer, transport }
    }

    /// Drain and send the buffered events as a single batch
    ///
    /// Returns the number of events handed to the transport; an empty buffer
    /// sends nothing.
    pub fn flush(&self) -> usize {
        let events = self.buffer.drain();
        if events.is_empty() {
            return 0;
        }

        let count = events.len();
        tracing::debug!(events = count, "Flushing replay batch");
        self.transport.send(EventDetail::Replay { events });
        count
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// Periodic flush task
///
/// The first flush happens one full period after the scheduler starts.
/// Dropping the scheduler stops it.
pub struct FlushScheduler {
    task: JoinHandle<()>,
}

impl FlushScheduler {
    pub fn spawn(flusher: ReplayFlusher, period: Duration, runtime: &Handle) -> Self {
        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                flusher.flush();
            }
        });

        Self { task }
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for FlushScheduler {
    fn drop(&mut self) {
        self.task.abort();
    }
}
