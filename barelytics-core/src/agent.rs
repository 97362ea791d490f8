//! Agent initialization and the public capture API
//!
//! Start-up order:
//! 1. validate configuration (a missing client id aborts here);
//! 2. localhost gate: on a local host with `disable_localhost`, stop with no
//!    side effects;
//! 3. resolve session and visitor ids (may write cookies);
//! 4. start the recording bridge (deferred to page load if needed);
//! 5. start the flush timer;
//! 6. send the initial page view and follow history navigation.

use std::sync::Arc;

use tokio::runtime::Handle;

use crate::config::{AgentConfig, AgentSettings};
use crate::error::{Error, Result};
use crate::identity::IdentityStore;
use crate::navigation::NavigationTracker;
use crate::platform::{CookieJar, LocalStorage, NavigationSource, Page};
use crate::recording::{self, Recorder, RecordingHandle};
use crate::replay::{FlushScheduler, ReplayBuffer, ReplayFlusher};
use crate::transport::{Channel, DeliveryStats, EventDetail, Transport};
use crate::types::{SessionIdentity, VisitorIdentity};

/// Everything the agent needs from its host
pub struct Platform {
    pub page: Arc<dyn Page>,
    pub navigation: Arc<dyn NavigationSource>,
    pub cookies: Arc<dyn CookieJar>,
    pub storage: Arc<dyn LocalStorage>,
    pub channel: Arc<dyn Channel>,
    /// `None` when the recorder script is not loaded
    pub recorder: Option<Arc<dyn Recorder>>,
}

/// A running agent
pub struct Agent {
    config: Arc<AgentConfig>,
    session: SessionIdentity,
    visitor: VisitorIdentity,
    transport: Arc<Transport>,
    flusher: ReplayFlusher,
    recording: RecordingHandle,
    scheduler: FlushScheduler,
    navigation: NavigationTracker,
}

impl Agent {
    /// Start the agent
    ///
    /// Returns `Ok(None)` when tracking is disabled for this host, and an
    /// error for invalid configuration or a missing async runtime.
    pub fn init(settings: &AgentSettings, platform: Platform) -> Result<Option<Self>> {
        let config = Arc::new(settings.validate()?);
        let runtime = Handle::try_current()
            .map_err(|e| Error::Runtime(format!("agent needs a tokio runtime: {}", e)))?;

        let hostname = platform.page.hostname();
        if config.is_disabled_for(&hostname) {
            tracing::info!(hostname = %hostname, "Tracking disabled on local host");
            return Ok(None);
        }

        let identity = IdentityStore::new(platform.cookies, platform.storage, &hostname);
        let session = identity.resolve_session();
        let visitor = identity.resolve_distinct_id();

        let transport = Arc::new(Transport::new(
            Arc::clone(&config),
            &session,
            &visitor,
            Arc::clone(&platform.page),
            platform.channel,
        ));

        let buffer = ReplayBuffer::new();
        let recording = recording::start(
            platform.page.as_ref(),
            platform.recorder,
            buffer.sink(),
            &session,
        );

        let flusher = ReplayFlusher::new(buffer, Arc::clone(&transport));
        let scheduler = FlushScheduler::spawn(flusher.clone(), config.flush_interval, &runtime);

        let navigation = NavigationTracker::start(
            Arc::clone(&transport),
            platform.navigation.as_ref(),
            config.track_history,
            &runtime,
        );

        tracing::info!(
            client_id = %config.client_id,
            session_id = %session.session_id,
            new_session = session.is_new,
            "Barelytics agent started"
        );

        Ok(Some(Self {
            config,
            session,
            visitor,
            transport,
            flusher,
            recording,
            scheduler,
            navigation,
        }))
    }

    /// Handle for host-page instrumentation
    pub fn capture_api(&self) -> CaptureApi {
        CaptureApi {
            transport: Arc::clone(&self.transport),
            flusher: self.flusher.clone(),
        }
    }

    pub fn capture(&self, name: &str) {
        self.capture_api().capture(name);
    }

    pub fn flush_replays(&self) -> usize {
        self.flusher.flush()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn session(&self) -> &SessionIdentity {
        &self.session
    }

    pub fn visitor(&self) -> &VisitorIdentity {
        &self.visitor
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_recording()
    }

    /// Replay events waiting for the next flush
    pub fn pending_replay_events(&self) -> usize {
        self.flusher.pending()
    }

    pub fn stats(&self) -> DeliveryStats {
        self.transport.stats()
    }

    /// Stop timers, history tracking and the recorder
    ///
    /// Buffered replay events are not flushed; call
    /// [`Agent::flush_replays`] first to send them. Dropping the agent has
    /// the same effect.
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.scheduler.stop();
        self.navigation.stop();
        // Nothing drains the buffer once the timer is gone
        self.recording.stop();
        tracing::info!(
            pending = self.flusher.pending(),
            "Barelytics agent stopped"
        );
    }
}

/// Public in-page API (`window.barelytics`)
#[derive(Clone)]
pub struct CaptureApi {
    transport: Arc<Transport>,
    flusher: ReplayFlusher,
}

impl CaptureApi {
    /// Send a `custom` event
    pub fn capture(&self, name: &str) {
        self.transport.send(EventDetail::Custom {
            name: name.to_string(),
        });
    }

    /// Drain the replay buffer now instead of waiting for the timer
    pub fn flush_replays(&self) -> usize {
        self.flusher.flush()
    }
}

/// Script-tag entry point
///
/// Reads configuration from the page's current `<script>` tag and starts the
/// agent. Failures are logged and yield `None`; nothing is raised to the page.
pub fn boot(platform: Platform) -> Option<Agent> {
    let Some(script) = platform.page.current_script() else {
        tracing::error!("Barelytics: could not find script tag with data-url");
        return None;
    };

    let settings = AgentSettings::from_script_tag(&script);
    match Agent::init(&settings, platform) {
        Ok(agent) => agent,
        Err(e) => {
            tracing::error!(error = %e, "Barelytics: initialization failed");
            None
        }
    }
}
