//! Page view tracking
//!
//! One `page_view` is sent when the tracker starts (the initial load). With
//! history tracking enabled, every back/forward and `pushState`/`replaceState`
//! notification from the [`NavigationSource`] sends another one. Notifications
//! are queued and handled on a later scheduler tick, so the event reads the
//! page URL after the navigation has updated it.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::platform::{NavigationSource, Subscription};
use crate::transport::{EventDetail, Transport};

pub struct NavigationTracker {
    task: Option<JoinHandle<()>>,
    subscription: Option<Subscription>,
}

impl NavigationTracker {
    /// Send the initial page view and, if enabled, follow history navigation
    pub fn start(
        transport: Arc<Transport>,
        source: &dyn NavigationSource,
        track_history: bool,
        runtime: &Handle,
    ) -> Self {
        transport.send(EventDetail::PageView);

        if !track_history {
            tracing::debug!("History tracking disabled, initial page view only");
            return Self {
                task: None,
                subscription: None,
            };
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = source.subscribe(Box::new(move |navigation| {
            // Receiver gone means the tracker was stopped
            let _ = tx.send(navigation);
        }));

        let task = runtime.spawn(async move {
            while let Some(navigation) = rx.recv().await {
                tokio::task::yield_now().await;
                tracing::debug!(navigation = navigation.as_str(), "Tracking page view");
                transport.send(EventDetail::PageView);
            }
        });

        Self {
            task: Some(task),
            subscription: Some(subscription),
        }
    }

    pub fn is_tracking_history(&self) -> bool {
        self.task.as_ref().map_or(false, |t| !t.is_finished())
    }

    pub fn stop(&self) {
        if let Some(subscription) = &self.subscription {
            subscription.cancel();
        }
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

impl Drop for NavigationTracker {
    fn drop(&mut self) {
        self.stop();
    }
}
