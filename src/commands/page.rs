use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use super::open_store;
use crate::bridge::BridgeClient;
use crate::cdp::{CdpCandidateSource, CdpPage};
use crate::cli::{Cli, PageArgs};
use crate::config::Config;
use crate::coordinator::{CaptureCoordinator, CaptureSink};
use crate::error::Result;
use crate::locator::{wait_for_timer_text, LocatedText, WaitOptions};
use crate::observer::Observer;
use crate::protocol::{CaptureResponse, RejectReason};
use crate::trigger::{HotkeyTrigger, IgnoreReason, TriggerOutcome};

/// Create a spinner with the given message. Returns `None` in json mode.
fn create_spinner(json: bool, message: &str) -> Option<ProgressBar> {
    if json {
        return None;
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
            .template("  {spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    Some(pb)
}

async fn attach(config: &Config, args: &PageArgs) -> Result<CdpPage> {
    let port = args.cdp_port.unwrap_or(config.cdp.port);
    let filter = args
        .url
        .clone()
        .or_else(|| config.cdp.url_filter.clone())
        .filter(|f| !f.trim().is_empty());
    CdpPage::attach(port, filter.as_deref()).await
}

fn wait_options(config: &Config, args: &PageArgs) -> WaitOptions {
    let mut wait = config.locator.wait_options();
    if let Some(ms) = args.timeout {
        wait.timeout = Duration::from_millis(ms);
    }
    wait
}

async fn sink(cli: &Cli, config: &Config, bridge: bool) -> Result<Arc<dyn CaptureSink>> {
    let sink: Arc<dyn CaptureSink> = if bridge {
        Arc::new(BridgeClient::from_token_file(config.bridge.port).await?)
    } else {
        Arc::new(CaptureCoordinator::new(open_store(cli, config)))
    };
    Ok(sink)
}

async fn locate_on_page(cli: &Cli, config: &Config, args: &PageArgs) -> Result<Option<LocatedText>> {
    let source = CdpCandidateSource::new(attach(config, args).await?);
    let spinner = create_spinner(cli.json, "Looking for the stream timer...");
    let found = wait_for_timer_text(&source, &config.locator.profile, wait_options(config, args)).await;
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }
    found
}

fn print_response(cli: &Cli, response: &CaptureResponse) -> Result<()> {
    if cli.json {
        println!("{}", serde_json::to_string(response)?);
        return Ok(());
    }
    match response {
        CaptureResponse::Saved { value, .. } => println!("{} Saved {}", "✓".green(), value.cyan()),
        CaptureResponse::Rejected {
            reason: RejectReason::NoTimeFound,
        } => println!("{} No HH:MM:SS time in the captured text", "✗".red()),
    }
    Ok(())
}

pub async fn locate(cli: &Cli, args: &PageArgs) -> Result<()> {
    let config = Config::load()?;
    let found = locate_on_page(cli, &config, args).await?;

    match (found, cli.json) {
        (Some(found), true) => println!("{}", serde_json::to_string(&found)?),
        (None, true) => println!("null"),
        (Some(found), false) => println!("{}  {}", found.text, format!("({:?})", found.confidence).dimmed()),
        (None, false) => println!("{} Time element not found", "!".yellow()),
    }
    Ok(())
}

pub async fn capture(cli: &Cli, args: &PageArgs, bridge: bool, text: Option<&str>) -> Result<()> {
    let config = Config::load()?;

    let raw_text = match text {
        Some(text) => text.to_string(),
        None => match locate_on_page(cli, &config, args).await? {
            Some(found) => found.text,
            None => {
                tracing::warn!("Time element not found (maybe an iframe or a different layout)");
                if cli.json {
                    println!("{}", serde_json::json!({ "ok": false, "reason": "time_element_not_found" }));
                } else {
                    println!("{} Time element not found", "!".yellow());
                }
                return Ok(());
            }
        },
    };

    let response = sink(cli, &config, bridge).await?.save_timestamp(&raw_text).await?;
    print_response(cli, &response)
}

pub async fn watch(cli: &Cli, args: &PageArgs, bridge: bool) -> Result<()> {
    let config = Config::load()?;
    let page = attach(&config, args).await?;

    let observer = Observer::new(
        page,
        HotkeyTrigger::new(&config.hotkey.key),
        config.locator.profile.clone(),
        wait_options(&config, args),
        sink(cli, &config, bridge).await?,
        Duration::from_millis(config.hotkey.poll_ms.max(10)),
    );

    if !cli.json {
        println!(
            "{} Watching the stream. Press {} to mark a moment, Ctrl+C to stop.",
            "◆".cyan(),
            config.hotkey.key.to_uppercase().bold()
        );
    }

    let json = cli.json;
    observer
        .run_until(
            async {
                tokio::signal::ctrl_c().await.ok();
            },
            move |outcome| report(json, outcome),
        )
        .await
}

fn report(json: bool, outcome: TriggerOutcome) {
    match outcome {
        TriggerOutcome::Captured(response) => {
            if json {
                if let Ok(line) = serde_json::to_string(&response) {
                    println!("{}", line);
                }
            } else if let CaptureResponse::Saved { value, .. } = response {
                println!("  {} {}", "+".green(), value.cyan());
            } else {
                println!("  {} No time in the located text", "✗".red());
            }
        }
        TriggerOutcome::NotFound => {
            if !json {
                println!("  {} Time element not found", "!".yellow());
            }
        }
        TriggerOutcome::Ignored(IgnoreReason::Busy) => {
            if !json {
                println!("  {} Still capturing the previous press", "…".dimmed());
            }
        }
        TriggerOutcome::Ignored(_) => {}
    }
}
