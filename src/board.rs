//! The memo list as the UI sees it: rows in capture order, each with a note
//! panel that starts closed.

use crate::clipboard::Clipboard;
use crate::error::{LivememoError, Result};
use crate::store::{MemoEntry, MemoStore};

/// Newline-joined export: `time - note` when the note has text, else `time`.
pub fn export_text(memos: &[MemoEntry]) -> String {
    memos
        .iter()
        .map(|m| {
            let note = m.note.trim();
            if note.is_empty() {
                m.time.clone()
            } else {
                format!("{} - {}", m.time, note)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct MemoBoard {
    store: MemoStore,
    memos: Vec<MemoEntry>,
    open: Vec<bool>,
}

impl MemoBoard {
    pub async fn load(store: MemoStore) -> Result<Self> {
        let mut board = Self {
            store,
            memos: Vec::new(),
            open: Vec::new(),
        };
        board.refresh().await?;
        Ok(board)
    }

    pub fn memos(&self) -> &[MemoEntry] {
        &self.memos
    }

    pub fn is_empty(&self) -> bool {
        self.memos.is_empty()
    }

    pub fn is_note_open(&self, position: usize) -> bool {
        self.open.get(position).copied().unwrap_or(false)
    }

    /// Reload from storage, e.g. after a `memo_added` notification. Open
    /// panels stay open for entries that are still present.
    pub async fn refresh(&mut self) -> Result<()> {
        let memos = self.store.load_memos().await?;
        self.open = memos
            .iter()
            .map(|m| {
                self.memos
                    .iter()
                    .position(|old| old.id == m.id)
                    .is_some_and(|i| self.is_note_open(i))
            })
            .collect();
        self.memos = memos;
        Ok(())
    }

    fn check(&self, position: usize) -> Result<()> {
        if position < self.memos.len() {
            Ok(())
        } else {
            Err(LivememoError::PositionOutOfRange {
                position,
                len: self.memos.len(),
            })
        }
    }

    /// Flip the note panel of one row; returns whether it is now open.
    pub fn toggle_note(&mut self, position: usize) -> Result<bool> {
        self.check(position)?;
        self.open[position] = !self.open[position];
        Ok(self.open[position])
    }

    pub fn close_note(&mut self, position: usize) -> Result<()> {
        self.check(position)?;
        self.open[position] = false;
        Ok(())
    }

    /// Write a note into one row and persist the list.
    pub async fn save_note(&mut self, position: usize, note: &str) -> Result<&MemoEntry> {
        self.check(position)?;
        self.memos[position].note = note.to_string();
        self.store.save_memos(&self.memos).await?;
        Ok(&self.memos[position])
    }

    /// Remove one row by position and persist the list.
    pub async fn delete(&mut self, position: usize) -> Result<MemoEntry> {
        self.check(position)?;
        let removed = self.memos.remove(position);
        self.open.remove(position);
        self.store.save_memos(&self.memos).await?;
        Ok(removed)
    }

    pub async fn clear_all(&mut self) -> Result<()> {
        self.memos.clear();
        self.open.clear();
        self.store.save_memos(&self.memos).await
    }

    pub fn export_text(&self) -> String {
        export_text(&self.memos)
    }

    /// Put the export on `clipboard`. Re-reads storage first so captures
    /// made since the last refresh are included.
    pub async fn copy_all(&mut self, clipboard: &mut dyn Clipboard) -> Result<String> {
        self.refresh().await?;
        let text = self.export_text();
        clipboard.set_text(&text)?;
        Ok(text)
    }
}
