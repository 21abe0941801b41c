use colored::Colorize;
use tokio::sync::broadcast;

use super::open_store;
use crate::bridge::{self, Listener};
use crate::cli::Cli;
use crate::config::Config;
use crate::coordinator::CaptureCoordinator;
use crate::error::Result;
use crate::protocol::Notification;
use crate::store::MemoEntry;

pub async fn run(cli: &Cli, port: Option<u16>) -> Result<()> {
    let config = Config::load()?;
    let port = port.unwrap_or(config.bridge.port);
    let coordinator = CaptureCoordinator::new(open_store(cli, &config));

    if !cli.json {
        println!();
        println!("  {}", "livememo capture bridge".bold());
        println!("  {}", "─".repeat(40).dimmed());
        println!();
        println!("  {}  WebSocket server on ws://127.0.0.1:{}", "◆".cyan(), port);
        println!(
            "  {}  Storage: {}",
            "◆".cyan(),
            cli.store
                .clone()
                .unwrap_or_else(|| config.storage_path())
                .display()
        );
        println!();
        println!("  {}  Press Ctrl+C to stop", "ℹ".dimmed());
        println!();
    }

    let json = cli.json;
    let echo = tokio::spawn(echo_captures(coordinator.subscribe(), move |item| {
        if json {
            println!("{}", serde_json::json!({ "type": "memo_added", "item": item }));
        } else {
            println!("  {} {}", "+".green(), item.time.cyan());
        }
    }));

    let result = bridge::serve(port, coordinator).await;
    echo.abort();
    result
}

/// Hand every captured memo to `on_item` until the coordinator goes away.
/// A lagging receiver skips what it missed and keeps going.
async fn echo_captures<F>(mut events: broadcast::Receiver<Notification>, mut on_item: F)
where
    F: FnMut(&MemoEntry),
{
    loop {
        match events.recv().await {
            Ok(Notification::MemoAdded { item }) => on_item(&item),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("Capture echo fell behind, {} memo(s) not shown", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

pub async fn follow(cli: &Cli, port: Option<u16>) -> Result<()> {
    let config = Config::load()?;
    let port = port.unwrap_or(config.bridge.port);
    let mut listener = Listener::connect(port, None).await?;

    if !cli.json {
        println!("{} Listening for captures on port {}", "◆".cyan(), port);
    }

    while let Some(notification) = listener.next().await? {
        let Notification::MemoAdded { item } = &notification;
        if cli.json {
            println!("{}", serde_json::to_string(&notification)?);
        } else {
            println!("  {} {}", "+".green(), item.time.cyan());
        }
    }

    if !cli.json {
        println!("{} Bridge closed", "!".yellow());
    }
    Ok(())
}
