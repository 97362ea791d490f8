//! barelytics - CLI for driving the barelytics agent natively
//!
//! Each command boots the agent against an in-memory page at `--url`,
//! delivers over HTTP, and unloads the page before exiting:
//! - `pageview` sends the initial page view
//! - `capture` sends one custom event
//! - `replay` streams a recorded JSONL file through the replay pipeline
//! - `status` shows the resolved configuration
//!
//! Configuration comes from $XDG_CONFIG_HOME/barelytics/config.toml
//! (~/.config/barelytics/config.toml), overridable per invocation.

mod recorder;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use barelytics_core::platform::memory::{MemoryCookieStore, MemoryLocalStorage, MemoryPage};
use barelytics_core::platform::Page;
use barelytics_core::recording::Recorder;
use barelytics_core::transport::HttpChannel;
use barelytics_core::{Agent, AgentSettings, Config, Platform};
use clap::{Parser, Subcommand};

use crate::recorder::JsonlRecorder;

#[derive(Parser)]
#[command(name = "barelytics")]
#[command(about = "Send analytics and replay events to a Barelytics collector")]
#[command(version)]
struct Args {
    /// Verbose output (writes the log file)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Collection endpoint (overrides config)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Client identifier (overrides config)
    #[arg(long, global = true)]
    client_id: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show agent configuration and status
    Status,

    /// Send the page view of a page load
    Pageview {
        /// Page URL
        #[arg(long)]
        url: String,

        /// Referring URL
        #[arg(long)]
        referrer: Option<String>,
    },

    /// Send a custom event
    Capture {
        /// Event name
        name: String,

        /// Page URL
        #[arg(long)]
        url: String,
    },

    /// Send a recorded JSONL event stream as a replay batch
    Replay {
        /// File with one recorder event per line
        file: PathBuf,

        /// Page URL
        #[arg(long)]
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard = if args.verbose {
        Some(
            barelytics_core::logging::init(&config.logging)
                .context("failed to initialize logging")?,
        )
    } else {
        None
    };

    let mut settings = config.agent;
    if let Some(endpoint) = args.endpoint {
        settings.backend_url = Some(endpoint);
    }
    if let Some(client_id) = args.client_id {
        settings.client_id = Some(client_id);
    }

    match args.command {
        Command::Status => cmd_status(&settings),
        Command::Pageview { url, referrer } => cmd_pageview(&settings, &url, referrer).await,
        Command::Capture { name, url } => cmd_capture(&settings, &name, &url).await,
        Command::Replay { file, url } => cmd_replay(&settings, &file, &url).await,
    }
}

/// An agent running on an in-memory page, delivering over HTTP
struct Session {
    agent: Agent,
    channel: Arc<HttpChannel>,
}

fn open_page(
    settings: &AgentSettings,
    url: &str,
    referrer: Option<String>,
    recorder: Option<Arc<dyn Recorder>>,
) -> Result<Option<Session>> {
    let config = settings.validate().context("invalid agent configuration")?;
    let channel = Arc::new(HttpChannel::from_config(&config).context("failed to create channel")?);

    let page = Arc::new(
        MemoryPage::new(url)
            .with_referrer(referrer.unwrap_or_default())
            .with_user_agent(concat!("barelytics-cli/", env!("CARGO_PKG_VERSION"))),
    );
    let hostname = page.hostname();
    if hostname.is_empty() {
        bail!("page URL {:?} has no host", url);
    }

    let platform = Platform {
        page: page.clone(),
        navigation: page,
        cookies: Arc::new(MemoryCookieStore::new().jar(&hostname)),
        storage: Arc::new(MemoryLocalStorage::new()),
        channel: channel.clone(),
        recorder,
    };

    let agent = Agent::init(settings, platform).context("failed to start agent")?;
    Ok(agent.map(|agent| Session { agent, channel }))
}

fn cmd_status(settings: &AgentSettings) -> Result<()> {
    println!("Barelytics Agent Configuration");
    println!("==============================");
    println!();
    println!("Config File:       {}", Config::config_path().display());
    println!(
        "Log File:          {}",
        barelytics_core::logging::log_file_path().display()
    );
    println!(
        "Endpoint:          {}",
        settings
            .backend_url
            .as_deref()
            .unwrap_or(barelytics_core::config::DEFAULT_BACKEND_URL)
    );
    println!(
        "Replay Endpoint:   {}",
        settings.replay_url.as_deref().unwrap_or("<same as endpoint>")
    );
    println!(
        "Client ID:         {}",
        settings.client_id.as_deref().unwrap_or("<not set>")
    );
    println!("Disable Localhost: {}", settings.disable_localhost);
    println!("Flush Interval:    {}s", settings.flush_interval_secs);
    println!("Track History:     {}", settings.track_history);
    println!("Timeout:           {}s", settings.timeout_secs);

    println!();
    match settings.validate() {
        Ok(_) => println!("Status: Ready"),
        Err(e) => println!("Status: Not ready ({})", e),
    }

    Ok(())
}

async fn cmd_pageview(settings: &AgentSettings, url: &str, referrer: Option<String>) -> Result<()> {
    let Some(session) = open_page(settings, url, referrer, None)? else {
        println!("Tracking disabled for {}", url);
        return Ok(());
    };

    let session_id = session.agent.session().session_id.clone();
    session.agent.shutdown();
    session.channel.unload().await;

    println!("Sent page view for {} (session {})", url, session_id);
    Ok(())
}

async fn cmd_capture(settings: &AgentSettings, name: &str, url: &str) -> Result<()> {
    let Some(session) = open_page(settings, url, None, None)? else {
        println!("Tracking disabled for {}", url);
        return Ok(());
    };

    session.agent.capture_api().capture(name);
    session.agent.shutdown();
    session.channel.unload().await;

    println!("Captured {:?} on {}", name, url);
    Ok(())
}

async fn cmd_replay(settings: &AgentSettings, file: &Path, url: &str) -> Result<()> {
    let recorder = JsonlRecorder::open(file)?;
    if recorder.is_empty() {
        println!("No events in {}", file.display());
        return Ok(());
    }

    let Some(session) = open_page(settings, url, None, Some(Arc::new(recorder)))? else {
        println!("Tracking disabled for {}", url);
        return Ok(());
    };

    let flushed = session.agent.flush_replays();
    let stats = session.agent.stats();
    session.agent.shutdown();
    session.channel.drain().await;

    let delivery = session.channel.stats();
    println!("Flushed {} event(s) in {} batch(es)", flushed, stats.replay_posts);
    println!();
    println!("Stats:");
    println!("  Page Views:  {}", stats.beacons_queued);
    println!("  Delivered:   {}", delivery.posts_delivered);
    println!("  Failures:    {}", delivery.post_failures);

    if delivery.post_failures > 0 {
        bail!("{} replay batch(es) failed to deliver", delivery.post_failures);
    }

    Ok(())
}
