//! # tw-runner
//!
//! Headless runner for the community feed engine.
//!
//! Loads a JSON configuration file, connects the engine to the configured
//! backend, walks the feed with the autoload loop, and logs the visible
//! rows as market data settles.
//!
//! # Usage
//!
//! ```bash
//! tw-runner config.json --log-level info
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{debug, info};

use tw_api::{CommunityApi, HttpApi, MarketApi};
use tw_core::types::FeedItem;
use tw_feed::pager::PageLoad;
use tw_feed::{FeedSession, SessionOptions};

/// Community Feed Engine Runner.
#[derive(Parser)]
#[command(name = "tw-runner", about = "Community Feed Engine Runner")]
struct Cli {
    /// Configuration file path (JSON).
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Optional log directory for file output.
    #[arg(long)]
    log_dir: Option<String>,

    /// Seconds between feed render logs.
    #[arg(long, default_value_t = 5)]
    render_interval_sec: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Initialize logging
    tw_core::logging::init_logging(&cli.log_level, cli.log_dir.as_deref(), "tw-runner");

    info!(
        "tw-runner starting: config={}, log_level={}",
        cli.config.display(),
        cli.log_level,
    );

    // 2. Load configuration
    let config = tw_core::config::load_config(&cli.config)?;
    info!(
        "config loaded: backend={}, user={}",
        config.backend.base_url,
        config.backend.user_id.as_deref().unwrap_or("<anonymous>"),
    );

    // 3. Connect the engine to the backend
    let api = Arc::new(HttpApi::new(&config.backend.base_url, config.backend.effective_timeout())?);
    let session = FeedSession::new(
        Arc::clone(&api) as Arc<dyn MarketApi>,
        api as Arc<dyn CommunityApi>,
        SessionOptions::from_config(&config),
    );

    session.tickers().subscribe(Arc::new(|symbols: &[String]| {
        debug!("[runner] market data settled for {} symbol(s)", symbols.len());
    }));

    // 4. First page plus background loading
    match session.start().await {
        PageLoad::Loaded { new_symbols, has_more } => {
            info!("feed started: {} row(s), has_more={has_more}", new_symbols.len());
        }
        outcome => info!("feed started without rows: {outcome:?}"),
    }
    session.run_autoload();

    let render = tokio::spawn(render_loop(
        Arc::clone(&session),
        Duration::from_secs(cli.render_interval_sec.max(1)),
    ));

    info!("engine running, press Ctrl+C to stop");

    // 5. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    // 6. Stop background work gracefully
    render.abort();
    session.stop().await;

    info!("goodbye");
    Ok(())
}

/// Log the visible feed periodically.
async fn render_loop(session: Arc<FeedSession>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        let items = session.visible_items();
        info!(
            "feed: {} row(s), {} bookmarked, has_more={}",
            items.len(),
            session.bookmarks().len(),
            session.has_more(),
        );
        for item in items.iter().take(10) {
            info!("  {}", render_row(item, session.bookmarks().contains(&item.symbol)));
        }
    }
}

/// One log line per row: `* TSLA  240.10 (+1.2%)  score 17, 4 threads`.
fn render_row(item: &FeedItem, bookmarked: bool) -> String {
    let mark = if bookmarked { "*" } else { " " };
    let quote = match &item.snapshot {
        Some(snapshot) => {
            let price = snapshot
                .last_price
                .map(|p| format!("{p:.2}"))
                .unwrap_or_else(|| "-".to_string());
            let change = snapshot
                .change_percent
                .map(|c| format!(" ({c:+.1}%)"))
                .unwrap_or_default();
            format!("{price}{change}")
        }
        None => "-".to_string(),
    };
    format!(
        "{mark} {:<8} {quote:<18} score {}, {} thread(s)",
        item.symbol, item.score, item.thread_count,
    )
}
