//! Core domain types for barelytics
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Visitor** | A browser profile, identified by a long-lived distinct id |
//! | **Session** | A 30-minute window of activity by a Visitor, identified by a session id |
//! | **Replay event** | An opaque record emitted by the DOM recorder (mutation, input, ...) |
//! | **Full snapshot** | A complete serialization of the DOM, recorded once per new Session |
//! | **Analytics event** | One `page_view`, `custom` or `replay` payload sent to the collector |
//! | **Beacon** | Unload-safe, response-blind one-way transmission |

use serde::{Deserialize, Serialize};

// ============================================
// Identity
// ============================================

/// Long-lived visitor identifier, stable across sessions and subdomains
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitorIdentity {
    pub distinct_id: String,
}

/// Time-boxed session identifier
///
/// `is_new` is true only for the page load that minted the id; the recording
/// bridge uses it to request the session's baseline full snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub session_id: String,
    pub is_new: bool,
}

// ============================================
// Replay
// ============================================

/// Opaque recorder event
///
/// The content is a black box to the agent; only emission order matters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplayEvent(serde_json::Value);

impl ReplayEvent {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}

impl From<serde_json::Value> for ReplayEvent {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

// ============================================
// Page
// ============================================

/// Document loading state, as reported by `document.readyState`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Loading,
    Interactive,
    Complete,
}

/// A logical page change that happens without a full reload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    /// Browser back/forward
    PopState,
    /// `history.pushState`
    PushState,
    /// `history.replaceState`
    ReplaceState,
}

impl Navigation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Navigation::PopState => "popstate",
            Navigation::PushState => "pushState",
            Navigation::ReplaceState => "replaceState",
        }
    }
}
