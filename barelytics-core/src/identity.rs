//! Visitor and session identity
//!
//! Both ids live in cookies scoped to the registrable root domain so that
//! `a.example.com` and `b.example.com` share one visitor and one session.
//!
//! - Session: `barelytics_session`, `max-age=1800`. An existing cookie is
//!   reused verbatim and never rewritten, so the window is fixed from the
//!   session's first page load.
//! - Visitor: `barelytics_id`, `max-age=31536000`, with the pre-cookie
//!   `localStorage` value as a legacy fallback that is backfilled into the cookie.
//!
//! When the browser refuses to persist anything, every resolution mints a fresh
//! id. That is an accepted degradation, not an error.

use std::sync::Arc;

use crate::host::root_domain;
use crate::platform::{Cookie, CookieJar, LocalStorage};
use crate::types::{SessionIdentity, VisitorIdentity};

pub const SESSION_COOKIE: &str = "barelytics_session";
pub const DISTINCT_ID_KEY: &str = "barelytics_id";
pub const SESSION_MAX_AGE_SECS: u64 = 30 * 60;
pub const DISTINCT_ID_MAX_AGE_SECS: u64 = 365 * 24 * 60 * 60;

/// Resolves identities against browser-persisted storage
pub struct IdentityStore {
    cookies: Arc<dyn CookieJar>,
    storage: Arc<dyn LocalStorage>,
    cookie_domain: Option<String>,
}

impl IdentityStore {
    pub fn new(
        cookies: Arc<dyn CookieJar>,
        storage: Arc<dyn LocalStorage>,
        hostname: &str,
    ) -> Self {
        Self {
            cookies,
            storage,
            cookie_domain: root_domain(hostname),
        }
    }

    /// Domain attribute written on identity cookies
    pub fn cookie_domain(&self) -> Option<&str> {
        self.cookie_domain.as_deref()
    }

    /// Read the session cookie, or start a new session
    pub fn resolve_session(&self) -> SessionIdentity {
        if let Some(session_id) = self.read_cookie(SESSION_COOKIE) {
            return SessionIdentity {
                session_id,
                is_new: false,
            };
        }

        let session_id = new_id();
        self.write_cookie(SESSION_COOKIE, &session_id, SESSION_MAX_AGE_SECS);
        tracing::debug!(session_id = %session_id, "Started new session");

        SessionIdentity {
            session_id,
            is_new: true,
        }
    }

    /// Read the visitor id from the cookie, then the legacy storage key
    pub fn resolve_distinct_id(&self) -> VisitorIdentity {
        if let Some(distinct_id) = self.read_cookie(DISTINCT_ID_KEY) {
            return VisitorIdentity { distinct_id };
        }

        if let Some(distinct_id) = self
            .storage
            .get_item(DISTINCT_ID_KEY)
            .filter(|v| !v.is_empty())
        {
            self.write_cookie(DISTINCT_ID_KEY, &distinct_id, DISTINCT_ID_MAX_AGE_SECS);
            tracing::debug!(distinct_id = %distinct_id, "Migrated visitor id from local storage");
            return VisitorIdentity { distinct_id };
        }

        let distinct_id = new_id();
        self.write_cookie(DISTINCT_ID_KEY, &distinct_id, DISTINCT_ID_MAX_AGE_SECS);
        self.storage.set_item(DISTINCT_ID_KEY, &distinct_id);

        VisitorIdentity { distinct_id }
    }

    fn read_cookie(&self, name: &str) -> Option<String> {
        self.cookies.get(name).filter(|v| !v.is_empty())
    }

    fn write_cookie(&self, name: &str, value: &str, max_age_secs: u64) {
        let cookie = Cookie {
            name: name.to_string(),
            value: value.to_string(),
            path: "/".to_string(),
            max_age_secs,
            domain: self.cookie_domain.clone(),
        };
        tracing::trace!(cookie = %cookie.to_assignment(), "Writing identity cookie");
        self.cookies.set(cookie);
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::memory::{MemoryCookieStore, MemoryLocalStorage};
    use std::time::Duration;

    fn store_for(
        cookies: &MemoryCookieStore,
        storage: &MemoryLocalStorage,
        host: &str,
    ) -> IdentityStore {
        IdentityStore::new(Arc::new(cookies.jar(host)), Arc::new(storage.clone()), host)
    }

    #[test]
    fn test_session_reused_within_window() {
        let cookies = MemoryCookieStore::new();
        let storage = MemoryLocalStorage::new();
        let store = store_for(&cookies, &storage, "www.example.com");

        let first = store.resolve_session();
        assert!(first.is_new);

        cookies.advance(Duration::from_secs(SESSION_MAX_AGE_SECS - 1));
        let second = store.resolve_session();
        assert!(!second.is_new);
        assert_eq!(first.session_id, second.session_id);
    }

    #[test]
    fn test_existing_session_cookie_not_rewritten() {
        let cookies = MemoryCookieStore::new();
        let store = store_for(&cookies, &MemoryLocalStorage::new(), "www.example.com");

        store.resolve_session();
        let writes = cookies.write_count();
        store.resolve_session();
        assert_eq!(cookies.write_count(), writes);
    }

    #[test]
    fn test_session_renewed_after_expiry() {
        let cookies = MemoryCookieStore::new();
        let store = store_for(&cookies, &MemoryLocalStorage::new(), "www.example.com");

        let first = store.resolve_session();
        cookies.advance(Duration::from_secs(SESSION_MAX_AGE_SECS));
        let second = store.resolve_session();

        assert!(second.is_new);
        assert_ne!(first.session_id, second.session_id);
    }

    #[test]
    fn test_session_renewed_after_clear() {
        let cookies = MemoryCookieStore::new();
        let store = store_for(&cookies, &MemoryLocalStorage::new(), "www.example.com");

        let first = store.resolve_session();
        cookies.remove(SESSION_COOKIE);
        let second = store.resolve_session();

        assert!(second.is_new);
        assert_ne!(first.session_id, second.session_id);
    }

    #[test]
    fn test_session_cookie_attributes() {
        let cookies = MemoryCookieStore::new();
        let store = store_for(&cookies, &MemoryLocalStorage::new(), "app.example.com");
        store.resolve_session();

        let written = cookies.last_write().unwrap();
        assert_eq!(written.name, SESSION_COOKIE);
        assert_eq!(written.max_age_secs, 1800);
        assert_eq!(written.path, "/");
        assert_eq!(written.domain.as_deref(), Some("example.com"));
    }

    #[test]
    fn test_distinct_id_shared_across_subdomains() {
        let cookies = MemoryCookieStore::new();
        let a = store_for(&cookies, &MemoryLocalStorage::new(), "a.example.com");
        let b = store_for(&cookies, &MemoryLocalStorage::new(), "b.example.com");

        let from_a = a.resolve_distinct_id();
        let from_b = b.resolve_distinct_id();
        assert_eq!(from_a, from_b);

        let other = store_for(&cookies, &MemoryLocalStorage::new(), "www.other.org");
        assert_ne!(other.resolve_distinct_id(), from_a);
    }

    #[test]
    fn test_distinct_id_migrated_from_local_storage() {
        let cookies = MemoryCookieStore::new();
        let storage = MemoryLocalStorage::new();
        storage.set_item(DISTINCT_ID_KEY, "legacy-visitor");
        let store = store_for(&cookies, &storage, "www.example.com");

        let visitor = store.resolve_distinct_id();
        assert_eq!(visitor.distinct_id, "legacy-visitor");

        let written = cookies.last_write().unwrap();
        assert_eq!(written.name, DISTINCT_ID_KEY);
        assert_eq!(written.value, "legacy-visitor");
        assert_eq!(written.max_age_secs, 31_536_000);

        // The cookie now wins, even on a sibling subdomain without the legacy key
        let sibling = store_for(&cookies, &MemoryLocalStorage::new(), "shop.example.com");
        assert_eq!(sibling.resolve_distinct_id().distinct_id, "legacy-visitor");
    }

    #[test]
    fn test_distinct_id_never_regenerated() {
        let cookies = MemoryCookieStore::new();
        let storage = MemoryLocalStorage::new();
        let store = store_for(&cookies, &storage, "www.example.com");

        let first = store.resolve_distinct_id();
        cookies.advance(Duration::from_secs(SESSION_MAX_AGE_SECS * 10));
        assert_eq!(store.resolve_distinct_id(), first);
        assert_eq!(storage.get_item(DISTINCT_ID_KEY), Some(first.distinct_id));
    }

    #[test]
    fn test_disabled_storage_degrades_to_fresh_ids() {
        let cookies = MemoryCookieStore::new();
        cookies.set_disabled(true);
        let storage = MemoryLocalStorage::new();
        storage.set_disabled(true);
        let store = store_for(&cookies, &storage, "www.example.com");

        let a = store.resolve_session();
        let b = store.resolve_session();
        assert!(a.is_new && b.is_new);
        assert_ne!(a.session_id, b.session_id);
        assert_ne!(store.resolve_distinct_id(), store.resolve_distinct_id());
    }

    #[test]
    fn test_ip_host_uses_host_only_cookie() {
        let store = store_for(&MemoryCookieStore::new(), &MemoryLocalStorage::new(), "10.1.2.3");
        assert_eq!(store.cookie_domain(), None);
    }
}
