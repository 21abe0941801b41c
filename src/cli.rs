use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::commands;
use crate::error::Result;

/// livememo - mark livestream timestamps with notes and export them
#[derive(Parser)]
#[command(name = "livememo")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Storage file (overrides config)
    #[arg(long, env = "LIVEMEMO_STORE", global = true)]
    pub store: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the capture bridge for the extension and other clients
    Serve {
        /// Port to listen on (defaults to bridge.port)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Watch the stream tab and capture on every hotkey press
    Watch {
        #[command(flatten)]
        page: PageArgs,

        /// Send captures through a running bridge instead of saving directly
        #[arg(long)]
        bridge: bool,
    },

    /// Capture the stream's current running time once
    Capture {
        #[command(flatten)]
        page: PageArgs,

        /// Send the capture through a running bridge instead of saving directly
        #[arg(long)]
        bridge: bool,

        /// Capture from this text instead of reading the page
        #[arg(long)]
        text: Option<String>,
    },

    /// Print the running-time text found on the stream tab
    Locate {
        #[command(flatten)]
        page: PageArgs,
    },

    /// List saved memos
    List,

    /// Set the note of a memo
    Note {
        /// Memo position (1-based, as shown by `list`)
        position: usize,
        /// Note text (empty clears the note)
        text: String,
    },

    /// Delete a memo
    Delete {
        /// Memo position (1-based, as shown by `list`)
        position: usize,
    },

    /// Delete all memos
    Clear {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Copy all memos to the clipboard
    Copy,

    /// Print all memos in export format
    Export,

    /// Show or set the lag offset (0-5 seconds)
    Offset {
        /// New offset in seconds
        seconds: Option<i64>,
    },

    /// Print memos as they are captured through the bridge
    Follow {
        /// Bridge port (defaults to bridge.port)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct PageArgs {
    /// Remote debugging port of the browser (defaults to cdp.port)
    #[arg(long)]
    pub cdp_port: Option<u16>,

    /// Attach to the first tab whose URL contains this (defaults to cdp.url_filter)
    #[arg(long)]
    pub url: Option<String>,

    /// How long to wait for the time display, in milliseconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Set a configuration value
    Set {
        /// Configuration key
        key: String,
        /// Configuration value
        value: String,
    },

    /// Get a configuration value
    Get {
        /// Configuration key
        key: String,
    },

    /// Show configuration file path
    Path,
}

impl Cli {
    pub async fn run(&self) -> Result<()> {
        match &self.command {
            Commands::Serve { port } => commands::serve::run(self, *port).await,
            Commands::Watch { page, bridge } => commands::page::watch(self, page, *bridge).await,
            Commands::Capture { page, bridge, text } => {
                commands::page::capture(self, page, *bridge, text.as_deref()).await
            }
            Commands::Locate { page } => commands::page::locate(self, page).await,
            Commands::List => commands::memo::list(self).await,
            Commands::Note { position, text } => commands::memo::note(self, *position, text).await,
            Commands::Delete { position } => commands::memo::delete(self, *position).await,
            Commands::Clear { yes } => commands::memo::clear(self, *yes).await,
            Commands::Copy => commands::memo::copy(self).await,
            Commands::Export => commands::memo::export(self).await,
            Commands::Offset { seconds } => commands::memo::offset(self, *seconds).await,
            Commands::Follow { port } => commands::serve::follow(self, *port).await,
            Commands::Config { command } => commands::config::run(self, command).await,
        }
    }
}
