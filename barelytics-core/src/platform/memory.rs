//! In-memory platform
//!
//! Implementations of every platform trait that keep their state in process
//! memory. Tests use them to drive the agent deterministically; the CLI uses
//! them to stand in for a browser page.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::Url;
use serde_json::json;

use crate::config::ScriptTag;
use crate::error::{Error, Result};
use crate::platform::{
    Cookie, CookieJar, LocalStorage, NavigationListener, NavigationSource, Page, Subscription,
};
use crate::recording::{RecordOptions, Recorder, RecorderStop};
use crate::replay::ReplaySink;
use crate::transport::{gunzip, Channel, ChannelKind};
use crate::types::{Navigation, ReadyState, ReplayEvent};

// ============================================
// Cookies
// ============================================

#[derive(Debug, Clone)]
enum CookieScope {
    /// `domain=` cookie, visible to the domain and its subdomains
    Domain(String),
    HostOnly(String),
}

impl CookieScope {
    fn matches(&self, host: &str) -> bool {
        match self {
            CookieScope::Domain(domain) => {
                host == domain || host.ends_with(&format!(".{}", domain))
            }
            CookieScope::HostOnly(h) => host == h,
        }
    }

    fn same(&self, other: &CookieScope) -> bool {
        match (self, other) {
            (CookieScope::Domain(a), CookieScope::Domain(b)) => a == b,
            (CookieScope::HostOnly(a), CookieScope::HostOnly(b)) => a == b,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
struct StoredCookie {
    name: String,
    value: String,
    scope: CookieScope,
    expires_at: Duration,
}

#[derive(Debug, Default)]
struct CookieStoreState {
    cookies: Vec<StoredCookie>,
    /// Virtual clock driving `max-age` expiry
    now: Duration,
    disabled: bool,
    writes: Vec<Cookie>,
}

impl CookieStoreState {
    fn prune(&mut self) {
        let now = self.now;
        self.cookies.retain(|c| c.expires_at > now);
    }
}

/// Browser-wide cookie store shared by every page of a profile
#[derive(Clone, Default)]
pub struct MemoryCookieStore {
    state: Arc<Mutex<CookieStoreState>>,
}

impl MemoryCookieStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// `document.cookie` view for a page served from `hostname`
    pub fn jar(&self, hostname: &str) -> MemoryCookieJar {
        MemoryCookieJar {
            store: self.clone(),
            host: hostname.to_ascii_lowercase(),
        }
    }

    /// Move the virtual clock forward
    pub fn advance(&self, by: Duration) {
        let mut state = self.state.lock();
        state.now += by;
        state.prune();
    }

    pub fn remove(&self, name: &str) {
        self.state.lock().cookies.retain(|c| c.name != name);
    }

    /// Refuse all reads and writes, as with cookies blocked
    pub fn set_disabled(&self, disabled: bool) {
        self.state.lock().disabled = disabled;
    }

    /// Number of accepted cookie writes
    pub fn write_count(&self) -> usize {
        self.state.lock().writes.len()
    }

    pub fn last_write(&self) -> Option<Cookie> {
        self.state.lock().writes.last().cloned()
    }

    pub fn is_empty(&self) -> bool {
        let mut state = self.state.lock();
        state.prune();
        state.cookies.is_empty()
    }
}

/// Cookie view of one host
#[derive(Clone)]
pub struct MemoryCookieJar {
    store: MemoryCookieStore,
    host: String,
}

impl CookieJar for MemoryCookieJar {
    fn get(&self, name: &str) -> Option<String> {
        let mut state = self.store.state.lock();
        if state.disabled {
            return None;
        }
        state.prune();
        state
            .cookies
            .iter()
            .find(|c| c.name == name && c.scope.matches(&self.host))
            .map(|c| c.value.clone())
    }

    fn set(&self, cookie: Cookie) {
        let mut state = self.store.state.lock();
        if state.disabled {
            return;
        }

        let scope = match &cookie.domain {
            Some(domain) => {
                let domain = domain.trim_start_matches('.').to_ascii_lowercase();
                let scope = CookieScope::Domain(domain);
                // Browsers reject a domain attribute the host does not belong to
                if !scope.matches(&self.host) {
                    return;
                }
                scope
            }
            None => CookieScope::HostOnly(self.host.clone()),
        };

        let expires_at = state.now + Duration::from_secs(cookie.max_age_secs);
        state
            .cookies
            .retain(|c| !(c.name == cookie.name && c.scope.same(&scope)));
        if cookie.max_age_secs > 0 {
            state.cookies.push(StoredCookie {
                name: cookie.name.clone(),
                value: cookie.value.clone(),
                scope,
                expires_at,
            });
        }
        state.writes.push(cookie);
    }
}

// ============================================
// Local storage
// ============================================

#[derive(Debug, Default)]
struct StorageState {
    items: HashMap<String, String>,
    disabled: bool,
}

/// Origin-scoped `localStorage`; clones share the same items
#[derive(Clone, Default)]
pub struct MemoryLocalStorage {
    state: Arc<Mutex<StorageState>>,
}

impl MemoryLocalStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_disabled(&self, disabled: bool) {
        self.state.lock().disabled = disabled;
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }
}

impl LocalStorage for MemoryLocalStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        let state = self.state.lock();
        if state.disabled {
            return None;
        }
        state.items.get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) {
        let mut state = self.state.lock();
        if !state.disabled {
            state.items.insert(key.to_string(), value.to_string());
        }
    }
}

// ============================================
// Page
// ============================================

struct PageState {
    href: String,
    referrer: String,
    user_agent: String,
    ready_state: ReadyState,
    script: Option<ScriptTag>,
    load_callbacks: Vec<Box<dyn FnOnce() + Send>>,
    listeners: Vec<(u64, Arc<dyn Fn(Navigation) + Send + Sync>)>,
    next_listener: u64,
}

/// Page with a mutable location and a history that notifies subscribers
pub struct MemoryPage {
    state: Arc<Mutex<PageState>>,
}

impl MemoryPage {
    /// A fully loaded page
    pub fn new(href: impl Into<String>) -> Self {
        Self::with_ready_state(href, ReadyState::Complete)
    }

    /// A page still loading; call [`MemoryPage::fire_load`] to finish
    pub fn loading(href: impl Into<String>) -> Self {
        Self::with_ready_state(href, ReadyState::Loading)
    }

    fn with_ready_state(href: impl Into<String>, ready_state: ReadyState) -> Self {
        Self {
            state: Arc::new(Mutex::new(PageState {
                href: href.into(),
                referrer: String::new(),
                user_agent: "Mozilla/5.0 (X11; Linux x86_64)".to_string(),
                ready_state,
                script: None,
                load_callbacks: Vec::new(),
                listeners: Vec::new(),
                next_listener: 0,
            })),
        }
    }

    pub fn with_referrer(self, referrer: impl Into<String>) -> Self {
        self.state.lock().referrer = referrer.into();
        self
    }

    pub fn with_user_agent(self, user_agent: impl Into<String>) -> Self {
        self.state.lock().user_agent = user_agent.into();
        self
    }

    pub fn with_script(self, script: ScriptTag) -> Self {
        self.state.lock().script = Some(script);
        self
    }

    /// Complete loading and run `load` listeners
    pub fn fire_load(&self) {
        let callbacks = {
            let mut state = self.state.lock();
            state.ready_state = ReadyState::Complete;
            std::mem::take(&mut state.load_callbacks)
        };
        for callback in callbacks {
            callback();
        }
    }

    pub fn push_state(&self, href: impl Into<String>) {
        self.navigate(href.into(), Navigation::PushState);
    }

    pub fn replace_state(&self, href: impl Into<String>) {
        self.navigate(href.into(), Navigation::ReplaceState);
    }

    /// Number of live navigation subscriptions
    pub fn listener_count(&self) -> usize {
        self.state.lock().listeners.len()
    }

    /// Back/forward to `href`
    pub fn pop_state(&self, href: impl Into<String>) {
        self.navigate(href.into(), Navigation::PopState);
    }

    fn navigate(&self, href: String, navigation: Navigation) {
        let listeners = {
            let mut state = self.state.lock();
            state.href = href;
            state.listeners.clone()
        };
        for (_, listener) in listeners {
            listener(navigation);
        }
    }
}

impl Page for MemoryPage {
    fn href(&self) -> String {
        self.state.lock().href.clone()
    }

    fn hostname(&self) -> String {
        Url::parse(&self.href())
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_default()
    }

    fn referrer(&self) -> String {
        self.state.lock().referrer.clone()
    }

    fn user_agent(&self) -> String {
        self.state.lock().user_agent.clone()
    }

    fn ready_state(&self) -> ReadyState {
        self.state.lock().ready_state
    }

    fn on_load(&self, callback: Box<dyn FnOnce() + Send>) {
        self.state.lock().load_callbacks.push(callback);
    }

    fn current_script(&self) -> Option<ScriptTag> {
        self.state.lock().script.clone()
    }
}

impl NavigationSource for MemoryPage {
    fn subscribe(&self, listener: NavigationListener) -> Subscription {
        let id = {
            let mut state = self.state.lock();
            let id = state.next_listener;
            state.next_listener += 1;
            state.listeners.push((id, Arc::from(listener)));
            id
        };

        let page: Weak<Mutex<PageState>> = Arc::downgrade(&self.state);
        Subscription::new(move || {
            if let Some(page) = page.upgrade() {
                page.lock().listeners.retain(|(listener, _)| *listener != id);
            }
        })
    }
}

// ============================================
// Recorder
// ============================================

#[derive(Default)]
struct RecorderState {
    sink: Option<ReplaySink>,
    options: Option<RecordOptions>,
    starts: usize,
    snapshots: usize,
    stopped: bool,
}

/// Scriptable recorder; [`MemoryRecorder::emit`] plays the DOM
pub struct MemoryRecorder {
    state: Arc<Mutex<RecorderState>>,
    fail: bool,
}

impl Default for MemoryRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(RecorderState::default())),
            fail: false,
        }
    }

    /// A recorder whose `record` call fails
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    /// Emit one event; returns false when not recording
    pub fn emit(&self, value: serde_json::Value) -> bool {
        let state = self.state.lock();
        match &state.sink {
            Some(sink) if !state.stopped => {
                sink.push(ReplayEvent::new(value));
                true
            }
            _ => false,
        }
    }

    pub fn start_count(&self) -> usize {
        self.state.lock().starts
    }

    pub fn snapshot_count(&self) -> usize {
        self.state.lock().snapshots
    }

    pub fn options(&self) -> Option<RecordOptions> {
        self.state.lock().options
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }
}

impl Recorder for MemoryRecorder {
    fn record(&self, options: RecordOptions, sink: ReplaySink) -> Result<RecorderStop> {
        if self.fail {
            return Err(Error::RecorderUnavailable("recorder failed to start".to_string()));
        }

        {
            let mut state = self.state.lock();
            state.sink = Some(sink);
            state.options = Some(options);
            state.starts += 1;
            state.stopped = false;
        }

        let state = Arc::clone(&self.state);
        Ok(RecorderStop::new(move || {
            let mut state = state.lock();
            state.stopped = true;
            state.sink = None;
        }))
    }

    fn take_full_snapshot(&self) {
        let mut state = self.state.lock();
        state.snapshots += 1;
        if let Some(sink) = &state.sink {
            // Meta + FullSnapshot, as rrweb emits them
            sink.push(ReplayEvent::new(json!({ "type": 4, "data": {} })));
            sink.push(ReplayEvent::new(json!({ "type": 2, "data": { "node": {} } })));
        }
    }
}

// ============================================
// Channel
// ============================================

/// One payload captured by [`MemoryChannel`]
#[derive(Debug, Clone)]
pub struct SentPayload {
    pub channel: ChannelKind,
    pub url: Url,
    pub body: Vec<u8>,
    pub content_type: Option<&'static str>,
}

impl SentPayload {
    /// Decompress and parse the body
    pub fn json(&self) -> Result<serde_json::Value> {
        let raw = gunzip(&self.body)?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

#[derive(Default)]
struct ChannelState {
    sent: Vec<SentPayload>,
    refuse_beacons: bool,
}

/// Channel that records every payload instead of sending it
#[derive(Default)]
pub struct MemoryChannel {
    state: Mutex<ChannelState>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `beacon` return false, as when the beacon queue is full
    pub fn refuse_beacons(&self, refuse: bool) {
        self.state.lock().refuse_beacons = refuse;
    }

    pub fn sent(&self) -> Vec<SentPayload> {
        self.state.lock().sent.clone()
    }

    /// Decoded payloads of one channel kind
    pub fn payloads(&self, kind: ChannelKind) -> Vec<serde_json::Value> {
        self.sent()
            .iter()
            .filter(|s| s.channel == kind)
            .filter_map(|s| s.json().ok())
            .collect()
    }
}

impl Channel for MemoryChannel {
    fn beacon(&self, url: &Url, body: Vec<u8>) -> bool {
        let mut state = self.state.lock();
        if state.refuse_beacons {
            return false;
        }
        state.sent.push(SentPayload {
            channel: ChannelKind::Beacon,
            url: url.clone(),
            body,
            content_type: None,
        });
        true
    }

    fn post(&self, url: &Url, body: Vec<u8>, content_type: &'static str) {
        self.state.lock().sent.push(SentPayload {
            channel: ChannelKind::Post,
            url: url.clone(),
            body,
            content_type: Some(content_type),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie(name: &str, value: &str, domain: Option<&str>, max_age_secs: u64) -> Cookie {
        Cookie {
            name: name.to_string(),
            value: value.to_string(),
            path: "/".to_string(),
            max_age_secs,
            domain: domain.map(str::to_string),
        }
    }

    #[test]
    fn test_domain_cookie_visible_to_subdomains() {
        let store = MemoryCookieStore::new();
        store
            .jar("a.example.com")
            .set(cookie("id", "1", Some("example.com"), 60));

        assert_eq!(store.jar("b.example.com").get("id").as_deref(), Some("1"));
        assert_eq!(store.jar("example.com").get("id").as_deref(), Some("1"));
        assert_eq!(store.jar("example.org").get("id"), None);
        assert_eq!(store.jar("notexample.com").get("id"), None);
    }

    #[test]
    fn test_host_only_cookie() {
        let store = MemoryCookieStore::new();
        store.jar("a.example.com").set(cookie("id", "1", None, 60));
        assert_eq!(store.jar("a.example.com").get("id").as_deref(), Some("1"));
        assert_eq!(store.jar("b.example.com").get("id"), None);
    }

    #[test]
    fn test_foreign_domain_rejected() {
        let store = MemoryCookieStore::new();
        store
            .jar("a.example.com")
            .set(cookie("id", "1", Some("other.com"), 60));
        assert!(store.is_empty());
        assert_eq!(store.write_count(), 0);
    }

    #[test]
    fn test_max_age_expiry() {
        let store = MemoryCookieStore::new();
        let jar = store.jar("example.com");
        jar.set(cookie("s", "1", None, 1800));

        store.advance(Duration::from_secs(1799));
        assert_eq!(jar.get("s").as_deref(), Some("1"));
        store.advance(Duration::from_secs(1));
        assert_eq!(jar.get("s"), None);
    }

    #[test]
    fn test_overwrite_same_scope() {
        let store = MemoryCookieStore::new();
        let jar = store.jar("example.com");
        jar.set(cookie("s", "1", Some("example.com"), 60));
        jar.set(cookie("s", "2", Some("example.com"), 60));
        assert_eq!(jar.get("s").as_deref(), Some("2"));
    }

    #[test]
    fn test_page_load_callbacks() {
        let page = MemoryPage::loading("https://www.example.com/");
        let fired = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&fired);
        page.on_load(Box::new(move || *counter.lock() += 1));

        assert_eq!(page.ready_state(), ReadyState::Loading);
        page.fire_load();
        assert_eq!(page.ready_state(), ReadyState::Complete);
        assert_eq!(*fired.lock(), 1);
    }

    #[test]
    fn test_navigation_updates_href_before_notify() {
        let page = Arc::new(MemoryPage::new("https://www.example.com/"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (observer, view) = (Arc::clone(&seen), Arc::clone(&page));
        let subscription =
            page.subscribe(Box::new(move |nav| observer.lock().push((nav, view.href()))));

        page.push_state("https://www.example.com/next");
        assert_eq!(
            *seen.lock(),
            vec![(Navigation::PushState, "https://www.example.com/next".to_string())]
        );
        assert_eq!(page.hostname(), "www.example.com");

        drop(subscription);
        assert_eq!(page.listener_count(), 0);
        page.push_state("https://www.example.com/later");
        assert_eq!(seen.lock().len(), 1);
    }
}
