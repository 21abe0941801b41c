//! Persisted offset and memo list, including the upgrade of the old
//! bare-string list format.

mod kv;

pub use kv::{JsonFileStore, KeyValueStore, MemoryStore};

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Storage key of the display-lag offset.
pub const OFFSET_KEY: &str = "offsetSeconds";

/// Storage key of the memo list.
pub const MEMOS_KEY: &str = "memos";

/// Seconds subtracted from every captured time, always within `0..=5`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Offset(u8);

impl Offset {
    pub const MAX: u8 = 5;

    /// Clamps into range.
    pub fn new(seconds: i64) -> Self {
        Self(seconds.clamp(0, i64::from(Self::MAX)) as u8)
    }

    /// Interpret a stored record leniently: numbers and numeric strings are
    /// rounded and clamped, anything else counts as zero.
    pub fn from_stored(value: &Value) -> Self {
        let raw = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        match raw {
            Some(v) if v.is_finite() => Self::new(v.round() as i64),
            _ => Self::default(),
        }
    }

    pub fn seconds(self) -> u8 {
        self.0
    }
}

impl std::fmt::Display for Offset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "-{}s", self.0)
    }
}

/// One captured timestamp and its note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoEntry {
    pub id: String,
    pub time: String,
    #[serde(default)]
    pub note: String,
}

impl MemoEntry {
    /// A fresh entry with an empty note.
    pub fn new(time: impl Into<String>) -> Self {
        Self {
            id: make_id(),
            time: time.into(),
            note: String::new(),
        }
    }
}

/// `<unix-millis>_<random-hex>`. Unique in practice, not unguessable.
pub fn make_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let suffix: u64 = rand::thread_rng().gen();
    format!("{}_{:x}", millis, suffix)
}

/// Typed access to the two persisted records.
#[derive(Clone)]
pub struct MemoStore {
    kv: Arc<dyn KeyValueStore>,
}

impl MemoStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub async fn get_offset(&self) -> Result<Offset> {
        Ok(self
            .kv
            .get(OFFSET_KEY)
            .await?
            .map(|v| Offset::from_stored(&v))
            .unwrap_or_default())
    }

    pub async fn set_offset(&self, offset: Offset) -> Result<()> {
        self.kv
            .set(OFFSET_KEY, Value::from(offset.seconds()))
            .await
    }

    /// Load the memo list, rewriting an old-format list in place first.
    pub async fn load_memos(&self) -> Result<Vec<MemoEntry>> {
        let items = match self.kv.get(MEMOS_KEY).await? {
            None => return Ok(Vec::new()),
            Some(Value::Array(items)) => items,
            Some(other) => {
                tracing::warn!("Ignoring stored memos that are not a list: {}", other);
                return Ok(Vec::new());
            }
        };

        if items.first().is_some_and(Value::is_string) {
            let memos = migrate_legacy(items);
            tracing::info!("Migrated {} legacy memos", memos.len());
            self.save_memos(&memos).await?;
            return Ok(memos);
        }

        Ok(items
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<MemoEntry>(item.clone()) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!("Skipping unreadable memo {}: {}", item, e);
                    None
                }
            })
            .collect())
    }

    /// Overwrite the whole list.
    pub async fn save_memos(&self, memos: &[MemoEntry]) -> Result<()> {
        self.kv.set(MEMOS_KEY, serde_json::to_value(memos)?).await
    }

    /// Append a new entry for `time` and persist the list.
    pub async fn add_memo(&self, time: &str) -> Result<MemoEntry> {
        let mut memos = self.load_memos().await?;
        let entry = MemoEntry::new(time);
        memos.push(entry.clone());
        self.save_memos(&memos).await?;
        Ok(entry)
    }
}

fn migrate_legacy(items: Vec<Value>) -> Vec<MemoEntry> {
    items
        .into_iter()
        .filter_map(|item| match item {
            Value::String(time) => Some(MemoEntry::new(time)),
            other => {
                tracing::warn!("Dropping non-string legacy memo: {}", other);
                None
            }
        })
        .collect()
}
