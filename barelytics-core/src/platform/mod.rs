//! Browser platform seams
//!
//! The agent never touches the host page directly. Everything it needs from
//! the browser goes through the traits here, so the same core runs against a
//! real page binding, the in-memory platform in [`memory`], or the CLI.

pub mod memory;

use parking_lot::Mutex;

use crate::config::ScriptTag;
use crate::types::{Navigation, ReadyState};

/// The page the agent is embedded in
pub trait Page: Send + Sync {
    /// `window.location.href`, read at call time
    fn href(&self) -> String;

    /// `window.location.hostname`
    fn hostname(&self) -> String;

    /// `document.referrer`
    fn referrer(&self) -> String;

    /// `navigator.userAgent`
    fn user_agent(&self) -> String;

    fn ready_state(&self) -> ReadyState;

    /// Run `callback` when the window `load` event fires
    ///
    /// Like `addEventListener('load', ..)`, a callback registered after the
    /// page has loaded never runs; callers check [`Page::ready_state`] first.
    fn on_load(&self, callback: Box<dyn FnOnce() + Send>);

    /// The `<script>` tag that loaded the agent, if it can be found
    fn current_script(&self) -> Option<ScriptTag>;
}

/// Listener notified after a history navigation has been applied
pub type NavigationListener = Box<dyn Fn(Navigation) + Send + Sync>;

/// Subscribe/notify view of the page's history
pub trait NavigationSource: Send + Sync {
    /// Register `listener` until the returned subscription is cancelled or dropped
    fn subscribe(&self, listener: NavigationListener) -> Subscription;
}

/// Registration handle returned by [`NavigationSource::subscribe`]
pub struct Subscription {
    unsubscribe: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    pub fn new(unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Self {
            unsubscribe: Mutex::new(Some(Box::new(unsubscribe))),
        }
    }

    /// Remove the listener; later calls do nothing
    pub fn cancel(&self) {
        let unsubscribe = self.unsubscribe.lock().take();
        if let Some(unsubscribe) = unsubscribe {
            unsubscribe();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// A cookie write, as assigned to `document.cookie`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub path: String,
    pub max_age_secs: u64,
    /// `domain=` attribute; `None` makes a host-only cookie
    pub domain: Option<String>,
}

impl Cookie {
    /// Render the `document.cookie` assignment string
    pub fn to_assignment(&self) -> String {
        let mut s = format!(
            "{}={}; path={}; max-age={}",
            self.name, self.value, self.path, self.max_age_secs
        );
        if let Some(domain) = &self.domain {
            s.push_str("; domain=");
            s.push_str(domain);
        }
        s
    }
}

/// Read/write access to the page's cookies
///
/// Writes that the browser refuses (storage disabled, foreign domain) are
/// silently ignored, as `document.cookie` does.
pub trait CookieJar: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;
    fn set(&self, cookie: Cookie);
}

/// Origin-scoped `localStorage`
pub trait LocalStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Option<String>;
    fn set_item(&self, key: &str, value: &str);
}
