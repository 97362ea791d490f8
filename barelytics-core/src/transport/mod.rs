//! Event delivery
//!
//! [`Transport::send`] builds an [`AnalyticsEvent`] from the resolved
//! identities and the page's current location, serializes it, gzips it, and
//! hands the compressed bytes to a [`Channel`]:
//!
//! - `page_view` / `custom` go through [`Channel::beacon`], which survives page
//!   unload but gives no response;
//! - `replay` batches go through [`Channel::post`], which handles large bodies
//!   but may be abandoned on unload.
//!
//! Delivery is fire-and-forget. Nothing is retried, and no failure reaches the
//! caller; it is logged and counted in [`TransportStats`].

mod compress;
mod events;
mod http;

pub use compress::{gunzip, gzip};
pub use events::{AnalyticsEvent, EventDetail};
pub use http::{ChannelStats, HttpChannel};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use reqwest::Url;

use crate::config::AgentConfig;
use crate::platform::Page;
use crate::types::{SessionIdentity, VisitorIdentity};

/// Content type sent with replay POSTs
pub const REPLAY_CONTENT_TYPE: &str = "application/json";

/// Which delivery primitive carried a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Beacon,
    Post,
}

/// Delivery primitives provided by the platform
pub trait Channel: Send + Sync {
    /// Queue an unload-safe, response-blind transmission
    ///
    /// Returns whether the platform accepted the payload, like
    /// `navigator.sendBeacon`.
    fn beacon(&self, url: &Url, body: Vec<u8>) -> bool;

    /// Start an asynchronous POST and return immediately
    ///
    /// Completion and failure are only observed by the channel itself.
    fn post(&self, url: &Url, body: Vec<u8>, content_type: &'static str);
}

/// Delivery counters
#[derive(Debug, Default)]
pub struct TransportStats {
    beacons_queued: AtomicU64,
    beacons_refused: AtomicU64,
    replay_posts: AtomicU64,
    replay_events: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time copy of [`TransportStats`]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Page views and custom events accepted by the beacon channel
    pub beacons_queued: u64,
    /// Beacons the platform refused to queue
    pub beacons_refused: u64,
    /// Replay batches handed to the POST channel
    pub replay_posts: u64,
    /// Replay events contained in those batches
    pub replay_events: u64,
    /// Events dropped before reaching a channel (serialization/compression)
    pub dropped: u64,
}

impl TransportStats {
    pub fn snapshot(&self) -> DeliveryStats {
        DeliveryStats {
            beacons_queued: self.beacons_queued.load(Ordering::Relaxed),
            beacons_refused: self.beacons_refused.load(Ordering::Relaxed),
            replay_posts: self.replay_posts.load(Ordering::Relaxed),
            replay_events: self.replay_events.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Builds, compresses and dispatches analytics events
pub struct Transport {
    config: Arc<AgentConfig>,
    session_id: String,
    distinct_id: String,
    page: Arc<dyn Page>,
    channel: Arc<dyn Channel>,
    stats: TransportStats,
}

impl Transport {
    pub fn new(
        config: Arc<AgentConfig>,
        session: &SessionIdentity,
        visitor: &VisitorIdentity,
        page: Arc<dyn Page>,
        channel: Arc<dyn Channel>,
    ) -> Self {
        Self {
            config,
            session_id: session.session_id.clone(),
            distinct_id: visitor.distinct_id.clone(),
            page,
            channel,
            stats: TransportStats::default(),
        }
    }

    /// Build the event for `detail` against the page's current state
    pub fn build_event(&self, detail: EventDetail) -> AnalyticsEvent {
        AnalyticsEvent {
            session_id: self.session_id.clone(),
            distinct_id: self.distinct_id.clone(),
            client_id: self.config.client_id.clone(),
            detail,
            url: self.page.href(),
            referrer: self.page.referrer(),
            user_agent: self.page.user_agent(),
            timestamp: Utc::now(),
        }
    }

    /// Send one event; returns the channel used, or `None` if it was dropped
    pub fn send(&self, detail: EventDetail) -> Option<ChannelKind> {
        let kind = detail.kind();
        let channel = detail.channel();
        let replay_events = match &detail {
            EventDetail::Replay { events } => events.len() as u64,
            _ => 0,
        };

        let event = self.build_event(detail);
        let body = match serde_json::to_vec(&event)
            .map_err(crate::error::Error::from)
            .and_then(|json| gzip(&json).map(|gz| (json.len(), gz)))
        {
            Ok(body) => body,
            Err(e) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::error!(event_type = kind, error = %e, "Dropping event");
                return None;
            }
        };
        let (raw_bytes, compressed) = body;

        match channel {
            ChannelKind::Post => {
                let url = self.config.replay_endpoint();
                tracing::debug!(
                    url = %url,
                    events = replay_events,
                    raw_kb = raw_bytes as f64 / 1024.0,
                    compressed_kb = compressed.len() as f64 / 1024.0,
                    "Posting replay batch"
                );
                self.stats.replay_posts.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .replay_events
                    .fetch_add(replay_events, Ordering::Relaxed);
                self.channel.post(url, compressed, REPLAY_CONTENT_TYPE);
            }
            ChannelKind::Beacon => {
                if self.channel.beacon(&self.config.backend_url, compressed) {
                    self.stats.beacons_queued.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(event_type = kind, "Queued beacon");
                } else {
                    self.stats.beacons_refused.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(event_type = kind, "Beacon refused by platform");
                }
            }
        }

        Some(channel)
    }

    pub fn stats(&self) -> DeliveryStats {
        self.stats.snapshot()
    }

    #[cfg(test)]
    pub(crate) fn for_tests(page: Arc<dyn Page>, channel: Arc<dyn Channel>) -> Self {
        let config = crate::config::AgentSettings {
            client_id: Some("test-client".to_string()),
            ..Default::default()
        }
        .validate()
        .expect("test settings are valid");

        Self::new(
            Arc::new(config),
            &SessionIdentity {
                session_id: "test-session".to_string(),
                is_new: false,
            },
            &VisitorIdentity {
                distinct_id: "test-visitor".to_string(),
            },
            page,
            channel,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentSettings;
    use crate::platform::memory::{MemoryChannel, MemoryPage};
    use crate::types::ReplayEvent;
    use serde_json::json;

    #[test]
    fn test_page_view_goes_over_beacon() {
        let channel = Arc::new(MemoryChannel::new());
        let page = Arc::new(
            MemoryPage::new("https://www.example.com/docs?x=1")
                .with_referrer("https://news.example.net/")
                .with_user_agent("TestAgent/1.0"),
        );
        let transport = Transport::for_tests(page, channel.clone());

        assert_eq!(transport.send(EventDetail::PageView), Some(ChannelKind::Beacon));

        let sent = channel.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].channel, ChannelKind::Beacon);
        assert_eq!(sent[0].url.as_str(), crate::config::DEFAULT_BACKEND_URL);
        assert_eq!(sent[0].content_type, None);

        let payload = sent[0].json().unwrap();
        assert_eq!(payload["type"], "page_view");
        assert_eq!(payload["sessionId"], "test-session");
        assert_eq!(payload["distinctId"], "test-visitor");
        assert_eq!(payload["clientId"], "test-client");
        assert_eq!(payload["url"], "https://www.example.com/docs?x=1");
        assert_eq!(payload["referrer"], "https://news.example.net/");
        assert_eq!(payload["userAgent"], "TestAgent/1.0");
    }

    #[test]
    fn test_url_read_at_send_time() {
        let channel = Arc::new(MemoryChannel::new());
        let page = Arc::new(MemoryPage::new("https://www.example.com/a"));
        let transport = Transport::for_tests(page.clone(), channel.clone());

        page.push_state("https://www.example.com/b");
        transport.send(EventDetail::PageView);

        assert_eq!(channel.sent()[0].json().unwrap()["url"], "https://www.example.com/b");
    }

    #[test]
    fn test_replay_goes_over_post_with_json_marker() {
        let channel = Arc::new(MemoryChannel::new());
        let transport = Transport::for_tests(
            Arc::new(MemoryPage::new("https://www.example.com/")),
            channel.clone(),
        );

        let events = vec![ReplayEvent::new(json!({"type": 3}))];
        assert_eq!(
            transport.send(EventDetail::Replay { events }),
            Some(ChannelKind::Post)
        );

        let sent = channel.sent();
        assert_eq!(sent[0].channel, ChannelKind::Post);
        assert_eq!(sent[0].content_type, Some(REPLAY_CONTENT_TYPE));
        assert_eq!(&sent[0].body[..2], &[0x1f, 0x8b]);

        let stats = transport.stats();
        assert_eq!(stats.replay_posts, 1);
        assert_eq!(stats.replay_events, 1);
        assert_eq!(stats.beacons_queued, 0);
    }

    #[test]
    fn test_replay_url_override() {
        let channel = Arc::new(MemoryChannel::new());
        let config = AgentSettings {
            client_id: Some("c".to_string()),
            backend_url: Some("https://collector.example.com/event".to_string()),
            replay_url: Some("https://collector.example.com/replays".to_string()),
            ..Default::default()
        }
        .validate()
        .unwrap();
        let session = SessionIdentity {
            session_id: "s".to_string(),
            is_new: true,
        };
        let visitor = VisitorIdentity {
            distinct_id: "d".to_string(),
        };
        let transport = Transport::new(
            Arc::new(config),
            &session,
            &visitor,
            Arc::new(MemoryPage::new("https://www.example.com/")),
            channel.clone(),
        );

        transport.send(EventDetail::Replay {
            events: vec![ReplayEvent::new(json!(1))],
        });
        transport.send(EventDetail::PageView);

        let sent = channel.sent();
        assert_eq!(sent[0].url.as_str(), "https://collector.example.com/replays");
        assert_eq!(sent[1].url.as_str(), "https://collector.example.com/event");
    }

    #[test]
    fn test_refused_beacon_is_counted_not_raised() {
        let channel = Arc::new(MemoryChannel::new());
        channel.refuse_beacons(true);
        let transport = Transport::for_tests(
            Arc::new(MemoryPage::new("https://www.example.com/")),
            channel.clone(),
        );

        assert_eq!(
            transport.send(EventDetail::Custom {
                name: "signup".to_string()
            }),
            Some(ChannelKind::Beacon)
        );
        let stats = transport.stats();
        assert_eq!(stats.beacons_refused, 1);
        assert_eq!(stats.beacons_queued, 0);
    }
}
