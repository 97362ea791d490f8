//! Native HTTP delivery channel
//!
//! Both primitives are spawned onto the tokio runtime that was current when
//! the channel was built, so `beacon`/`post` return immediately.
//!
//! Beacons and posts are tracked separately to reproduce their unload
//! semantics: [`HttpChannel::unload`] waits for queued beacons but abandons
//! in-flight replay posts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::Url;
use tokio::runtime::Handle;
use tokio::task::JoinSet;

use crate::config::AgentConfig;
use crate::error::{Error, Result};

use super::Channel;

/// Counters for sends whose completion the channel observed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChannelStats {
    pub beacons_delivered: u64,
    pub posts_delivered: u64,
    pub post_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    beacons_delivered: AtomicU64,
    posts_delivered: AtomicU64,
    post_failures: AtomicU64,
}

/// [`Channel`] implementation on `reqwest`
pub struct HttpChannel {
    http_client: reqwest::Client,
    runtime: Handle,
    beacons: Mutex<JoinSet<()>>,
    posts: Mutex<JoinSet<()>>,
    counters: Arc<Counters>,
}

impl HttpChannel {
    /// Create a channel on the current tokio runtime
    ///
    /// Returns an error when called outside a runtime.
    pub fn new(timeout: Duration) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Runtime(format!("HTTP channel needs a tokio runtime: {}", e)))?;

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("barelytics/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            runtime,
            beacons: Mutex::new(JoinSet::new()),
            posts: Mutex::new(JoinSet::new()),
            counters: Arc::new(Counters::default()),
        })
    }

    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        Self::new(config.timeout)
    }

    /// Page unload: wait for queued beacons, abandon in-flight posts
    pub async fn unload(&self) {
        let mut posts = std::mem::take(&mut *self.posts.lock());
        posts.shutdown().await;
        let mut beacons = std::mem::take(&mut *self.beacons.lock());
        while beacons.join_next().await.is_some() {}
    }

    /// Wait for every in-flight send, posts included
    pub async fn drain(&self) {
        let mut posts = std::mem::take(&mut *self.posts.lock());
        while posts.join_next().await.is_some() {}
        let mut beacons = std::mem::take(&mut *self.beacons.lock());
        while beacons.join_next().await.is_some() {}
    }

    pub fn in_flight(&self) -> usize {
        self.beacons.lock().len() + self.posts.lock().len()
    }

    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            beacons_delivered: self.counters.beacons_delivered.load(Ordering::Relaxed),
            posts_delivered: self.counters.posts_delivered.load(Ordering::Relaxed),
            post_failures: self.counters.post_failures.load(Ordering::Relaxed),
        }
    }
}

/// Drop results of tasks that already finished
fn reap(tasks: &mut JoinSet<()>) {
    while tasks.try_join_next().is_some() {}
}

impl Channel for HttpChannel {
    fn beacon(&self, url: &Url, body: Vec<u8>) -> bool {
        let request = self.http_client.post(url.clone()).body(body);
        let counters = Arc::clone(&self.counters);

        let mut beacons = self.beacons.lock();
        reap(&mut beacons);
        beacons.spawn_on(
            async move {
                // Response-blind: the outcome is only traced
                match request.send().await {
                    Ok(response) => {
                        counters.beacons_delivered.fetch_add(1, Ordering::Relaxed);
                        tracing::trace!(status = %response.status(), "Beacon delivered");
                    }
                    Err(e) => tracing::trace!(error = %e, "Beacon lost"),
                }
            },
            &self.runtime,
        );
        true
    }

    fn post(&self, url: &Url, body: Vec<u8>, content_type: &'static str) {
        let request = self
            .http_client
            .post(url.clone())
            .header(CONTENT_TYPE, HeaderValue::from_static(content_type))
            .body(body);
        let counters = Arc::clone(&self.counters);
        let url = url.clone();

        let mut posts = self.posts.lock();
        reap(&mut posts);
        posts.spawn_on(
            async move {
                let outcome = match request.send().await {
                    Ok(response) if response.status().is_success() => Ok(response.status()),
                    Ok(response) => {
                        Err(Error::Delivery(format!("API error ({})", response.status())))
                    }
                    Err(e) => Err(Error::Delivery(format!("HTTP request failed: {}", e))),
                };

                match outcome {
                    Ok(status) => {
                        counters.posts_delivered.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(url = %url, status = %status, "Sent replay batch");
                    }
                    Err(e) => {
                        counters.post_failures.fetch_add(1, Ordering::Relaxed);
                        // No retry: replay loss is tolerated
                        tracing::warn!(url = %url, error = %e, "Failed to send replay batch");
                    }
                }
            },
            &self.runtime,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_requires_runtime() {
        let result = HttpChannel::new(Duration::from_secs(1));
        assert!(matches!(result, Err(Error::Runtime(_))));
    }

    #[tokio::test]
    async fn test_channel_builds_inside_runtime() {
        let channel = HttpChannel::new(Duration::from_secs(1)).unwrap();
        assert_eq!(channel.in_flight(), 0);
        assert_eq!(channel.stats(), ChannelStats::default());
        channel.unload().await;
    }

    #[tokio::test]
    async fn test_failed_post_is_counted() {
        // Bind then release a port so the connection is refused
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let channel = HttpChannel::new(Duration::from_secs(2)).unwrap();
        let url = Url::parse(&format!("http://127.0.0.1:{}/replays", port)).unwrap();
        channel.post(&url, vec![1, 2, 3], "application/json");
        channel.drain().await;

        let stats = channel.stats();
        assert_eq!(stats.post_failures, 1);
        assert_eq!(stats.posts_delivered, 0);
    }

    #[tokio::test]
    async fn test_unload_awaits_beacons_and_abandons_posts() {
        // Never accepted: the kernel completes the handshake, nobody answers
        let silent = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", silent.local_addr().unwrap());
        let timeout = Duration::from_millis(500);
        let channel = HttpChannel::new(timeout).unwrap();

        let beacon_url = Url::parse(&format!("{}/i", base)).unwrap();
        let post_url = Url::parse(&format!("{}/replays", base)).unwrap();
        assert!(channel.beacon(&beacon_url, vec![1]));
        channel.post(&post_url, vec![2], "application/json");
        assert_eq!(channel.in_flight(), 2);

        let started = tokio::time::Instant::now();
        channel.unload().await;

        // The beacon ran until the client timeout gave up on it
        assert!(started.elapsed() >= timeout / 2);
        assert_eq!(channel.in_flight(), 0);

        tokio::time::sleep(timeout * 2).await;
        let stats = channel.stats();
        assert_eq!(stats.beacons_delivered, 0);
        assert_eq!(stats.post_failures, 0);
        assert_eq!(stats.posts_delivered, 0);
    }
}
