// src/main.rs

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use tabmind::config::Config;
use tabmind::coordinator::Coordinator;
use tabmind::host::MemoryTabHost;
use tabmind::notify::LogNotifier;
use tabmind::panel::Panel;
use tabmind::reasoning::HttpReasoningClient;
use tabmind::reminders::{PlanConfig, ReminderEngine, TokioScheduler};
use tabmind::store::MemoryStore;

#[derive(Parser, Debug)]
#[command(name = "tabmind", about = "Cross-tab assistant sync engine (demo REPL)")]
struct Args {
    /// Base URL of the reasoning service
    #[arg(long, env = "TABMIND_REASONING_URL", default_value = "http://127.0.0.1:8000")]
    service_url: String,

    /// Override the epoch/alert poll interval in seconds
    #[arg(long)]
    poll_secs: Option<u64>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = Config::from_env();
    config.reasoning_base_url = args.service_url.clone();
    if let Some(secs) = args.poll_secs {
        config.poll_interval_secs = secs;
    }

    info!("Starting tabmind (demo host)");
    info!("Reasoning service: {}", config.reasoning_base_url);

    let store = Arc::new(MemoryStore::new());
    let host = Arc::new(MemoryTabHost::new());
    let service = Arc::new(HttpReasoningClient::new(
        config.reasoning_base_url.clone(),
        config.http_timeout(),
    ));
    let (scheduler, fired) = TokioScheduler::new();
    let reminders = Arc::new(ReminderEngine::new(
        scheduler,
        store.clone(),
        host.clone(),
        Arc::new(LogNotifier),
        PlanConfig::new(config.reminder_min_lead_secs, config.recurrence_horizon_days),
    ));

    let coordinator = Coordinator::new(service, store.clone(), host.clone(), reminders, &config);
    let _poll = coordinator.spawn_poll_loop(config.poll_interval());
    let _fire = coordinator.spawn_fire_loop(fired);

    // One demo tab with a panel, driven from stdin.
    let mut inbox = host.open_tab(1).await;
    tokio::spawn(async move {
        while let Some(msg) = inbox.recv().await {
            info!(?msg, "tab 1 received");
        }
    });

    let panel = Panel::mount(coordinator.clone(), store.clone()).await?;
    info!("Panel ready; type a query (Ctrl-D to exit)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        match panel.submit(&line).await {
            Ok(outcome) => info!(?outcome, "query completed"),
            Err(e) => info!(error = %e, "query failed"),
        }
        for message in panel.transcript().await {
            println!("{:>9?}: {}", message.role, message.text);
        }
        if let Some(banner) = panel.banner().await {
            println!("!! {banner}");
        }
    }

    panel.unmount().await;
    // Give in-flight store writes a moment before tearing down.
    tokio::time::sleep(Duration::from_millis(50)).await;
    Ok(())
}
