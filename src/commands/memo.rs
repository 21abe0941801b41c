use colored::Colorize;
use dialoguer::Confirm;

use super::open_store;
use crate::board::MemoBoard;
use crate::cli::Cli;
use crate::clipboard::{Clipboard, FallbackClipboard};
use crate::config::Config;
use crate::error::{LivememoError, Result};
use crate::store::{MemoEntry, Offset};

async fn load_board(cli: &Cli) -> Result<MemoBoard> {
    let config = Config::load()?;
    MemoBoard::load(open_store(cli, &config)).await
}

/// 1-based CLI position to list index.
fn index(position: usize, len: usize) -> Result<usize> {
    position
        .checked_sub(1)
        .filter(|i| *i < len)
        .ok_or(LivememoError::PositionOutOfRange { position, len })
}

fn print_entry(position: usize, entry: &MemoEntry) {
    if entry.note.trim().is_empty() {
        println!("  {:>3}  {}", position.to_string().dimmed(), entry.time.cyan());
    } else {
        println!(
            "  {:>3}  {}  {}",
            position.to_string().dimmed(),
            entry.time.cyan(),
            entry.note.trim()
        );
    }
}

pub async fn list(cli: &Cli) -> Result<()> {
    let board = load_board(cli).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(board.memos())?);
        return Ok(());
    }

    if board.is_empty() {
        println!("{}", "No memos yet. Press the hotkey while watching a stream.".dimmed());
        return Ok(());
    }

    for (i, entry) in board.memos().iter().enumerate() {
        print_entry(i + 1, entry);
    }
    Ok(())
}

pub async fn note(cli: &Cli, position: usize, text: &str) -> Result<()> {
    let mut board = load_board(cli).await?;
    let i = index(position, board.memos().len())?;
    let entry = board.save_note(i, text).await?.clone();

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&entry)?);
    } else {
        println!("{} Note saved", "✓".green());
        print_entry(position, &entry);
    }
    Ok(())
}

pub async fn delete(cli: &Cli, position: usize) -> Result<()> {
    let mut board = load_board(cli).await?;
    let i = index(position, board.memos().len())?;
    let removed = board.delete(i).await?;

    if cli.json {
        println!("{}", serde_json::json!({ "deleted": removed }));
    } else {
        println!("{} Deleted {}", "✓".green(), removed.time.cyan());
    }
    Ok(())
}

pub async fn clear(cli: &Cli, yes: bool) -> Result<()> {
    let mut board = load_board(cli).await?;

    if !yes && !cli.json {
        let confirm = Confirm::new()
            .with_prompt(format!("Delete all {} memos?", board.memos().len()))
            .default(false)
            .interact()
            .map_err(|e| LivememoError::Other(format!("Prompt failed: {}", e)))?;

        if !confirm {
            println!("  Cancelled.");
            return Ok(());
        }
    }

    let count = board.memos().len();
    board.clear_all().await?;

    if cli.json {
        println!("{}", serde_json::json!({ "cleared": count }));
    } else {
        println!("{} Cleared {} memos", "✓".green(), count);
    }
    Ok(())
}

pub async fn copy(cli: &Cli) -> Result<()> {
    let mut board = load_board(cli).await?;
    let mut clipboard = FallbackClipboard::system();
    let text = board.copy_all(&mut clipboard).await?;

    if cli.json {
        println!(
            "{}",
            serde_json::json!({ "copied": board.memos().len(), "via": clipboard.name(), "text": text })
        );
    } else {
        println!(
            "{} Copied {} memos to the {}",
            "✓".green(),
            board.memos().len(),
            clipboard.name()
        );
    }
    Ok(())
}

pub async fn export(cli: &Cli) -> Result<()> {
    let board = load_board(cli).await?;

    if cli.json {
        println!("{}", serde_json::json!({ "text": board.export_text() }));
    } else if !board.is_empty() {
        println!("{}", board.export_text());
    }
    Ok(())
}

pub async fn offset(cli: &Cli, seconds: Option<i64>) -> Result<()> {
    let config = Config::load()?;
    let store = open_store(cli, &config);

    if let Some(seconds) = seconds {
        let offset = Offset::new(seconds);
        if i64::from(offset.seconds()) != seconds {
            tracing::warn!("Offset {} is outside 0-{}, using {}", seconds, Offset::MAX, offset.seconds());
        }
        store.set_offset(offset).await?;
    }

    let offset = store.get_offset().await?;
    if cli.json {
        println!("{}", serde_json::json!({ "offsetSeconds": offset.seconds() }));
    } else {
        println!("{}", offset);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_are_one_based() {
        assert_eq!(index(1, 3).unwrap(), 0);
        assert_eq!(index(3, 3).unwrap(), 2);
        assert!(matches!(
            index(0, 3),
            Err(LivememoError::PositionOutOfRange { position: 0, len: 3 })
        ));
        assert!(index(4, 3).is_err());
        assert!(index(1, 0).is_err());
    }
}
