//! # barelytics-core
//!
//! Core library for barelytics - a page-embedded analytics and session replay agent.
//!
//! This library provides:
//! - Visitor and session identity on cookies and local storage
//! - A bridge from a DOM recorder into a replay buffer flushed on a timer
//! - Gzipped delivery over beacon (page views, custom events) or POST (replay)
//! - Page view tracking for initial loads and history navigation
//! - Configuration and logging infrastructure
//!
//! ## Architecture
//!
//! The agent reaches the browser only through the traits in [`platform`]:
//! page and history, cookies, local storage, the recorder, and the delivery
//! [`transport::Channel`]. [`platform::memory`] implements all of them in
//! process memory; [`transport::HttpChannel`] delivers natively over HTTP.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use barelytics_core::platform::memory::{
//!     MemoryChannel, MemoryCookieStore, MemoryLocalStorage, MemoryPage,
//! };
//! use barelytics_core::{boot, Platform, ScriptTag};
//!
//! # #[tokio::main] async fn main() {
//! let page = Arc::new(
//!     MemoryPage::new("https://www.example.com/")
//!         .with_script(ScriptTag::new().with_attribute("data-id", "client-123")),
//! );
//! let agent = boot(Platform {
//!     page: page.clone(),
//!     navigation: page,
//!     cookies: Arc::new(MemoryCookieStore::new().jar("www.example.com")),
//!     storage: Arc::new(MemoryLocalStorage::new()),
//!     channel: Arc::new(MemoryChannel::new()),
//!     recorder: None,
//! })
//! .expect("agent should start");
//!
//! agent.capture_api().capture("signup");
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use agent::{boot, Agent, CaptureApi, Platform};
pub use config::{AgentConfig, AgentSettings, Config, ScriptTag};
pub use error::{Error, Result};
pub use types::*;

// Public modules
pub mod agent;
pub mod config;
pub mod error;
pub mod host;
pub mod identity;
pub mod logging;
pub mod navigation;
pub mod platform;
pub mod recording;
pub mod replay;
pub mod transport;
pub mod types;
