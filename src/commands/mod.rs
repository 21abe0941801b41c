pub mod config;
pub mod memo;
pub mod page;
pub mod serve;

use std::sync::Arc;

use crate::cli::Cli;
use crate::config::Config;
use crate::store::{JsonFileStore, MemoStore};

/// The memo store selected by `--store` or the config.
pub(crate) fn open_store(cli: &Cli, config: &Config) -> MemoStore {
    let path = cli
        .store
        .clone()
        .unwrap_or_else(|| config.storage_path());
    tracing::debug!("Using storage file {}", path.display());
    MemoStore::new(Arc::new(JsonFileStore::new(path)))
}
