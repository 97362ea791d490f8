//! Analytics event payloads
//!
//! Every event carries the same base fields; the `type` tag and its
//! type-specific fields come from [`EventDetail`], so a `name` can only appear
//! on `custom` events and `events` only on `replay` batches.
//!
//! ```text
//! { sessionId, distinctId, clientId, type, [name], [events],
//!   url, referrer, userAgent, timestamp }
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};

use crate::types::ReplayEvent;

use super::ChannelKind;

/// Type-specific part of an analytics event
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventDetail {
    PageView,
    Custom { name: String },
    Replay { events: Vec<ReplayEvent> },
}

impl EventDetail {
    /// Wire value of the `type` field
    pub fn kind(&self) -> &'static str {
        match self {
            EventDetail::PageView => "page_view",
            EventDetail::Custom { .. } => "custom",
            EventDetail::Replay { .. } => "replay",
        }
    }

    /// Delivery channel for this payload class
    ///
    /// Page views and custom events often fire during page teardown and need
    /// the unload-safe beacon; replay batches can be large and go over POST.
    pub fn channel(&self) -> ChannelKind {
        match self {
            EventDetail::Replay { .. } => ChannelKind::Post,
            EventDetail::PageView | EventDetail::Custom { .. } => ChannelKind::Beacon,
        }
    }
}

/// One page view, custom capture or replay batch
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsEvent {
    pub session_id: String,
    pub distinct_id: String,
    pub client_id: String,
    #[serde(flatten)]
    pub detail: EventDetail,
    pub url: String,
    pub referrer: String,
    pub user_agent: String,
    #[serde(serialize_with = "serialize_iso_millis")]
    pub timestamp: DateTime<Utc>,
}

/// ISO-8601 with millisecond precision and a `Z` suffix (`Date#toISOString`)
fn serialize_iso_millis<S: Serializer>(
    ts: &DateTime<Utc>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}
