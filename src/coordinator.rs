use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::protocol::{CaptureResponse, Notification, RejectReason, Request};
use crate::store::MemoStore;
use crate::timecode::{apply_offset, extract_time};

/// Where the page context hands located text.
#[async_trait]
pub trait CaptureSink: Send + Sync {
    async fn save_timestamp(&self, raw_text: &str) -> Result<CaptureResponse>;
}

/// Turns located text into stored memos and tells listeners about them.
#[derive(Clone)]
pub struct CaptureCoordinator {
    store: MemoStore,
    events: broadcast::Sender<Notification>,
}

impl CaptureCoordinator {
    pub fn new(store: MemoStore) -> Self {
        let (events, _) = broadcast::channel(64);
        Self { store, events }
    }

    pub fn store(&self) -> &MemoStore {
        &self.store
    }

    /// Listen for `memo_added` notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.events.subscribe()
    }

    pub async fn handle(&self, request: Request) -> Result<CaptureResponse> {
        match request {
            Request::SaveTimestampRequest { raw_text } => self.capture(&raw_text).await,
        }
    }

    /// Extract, correct, append, persist, notify.
    ///
    /// Text without a time leaves storage untouched.
    pub async fn capture(&self, raw_text: &str) -> Result<CaptureResponse> {
        let Some(hms) = extract_time(raw_text) else {
            tracing::debug!("No time in captured text: {:?}", raw_text);
            return Ok(CaptureResponse::Rejected {
                reason: RejectReason::NoTimeFound,
            });
        };

        let offset = self.store.get_offset().await?;
        let adjusted = apply_offset(hms, offset)?;
        let item = self.store.add_memo(&adjusted).await?;

        tracing::info!("Saved {} (captured {}, offset {})", adjusted, hms, offset);

        // Nobody listening is fine.
        let _ = self.events.send(Notification::MemoAdded { item: item.clone() });

        Ok(CaptureResponse::Saved {
            value: adjusted,
            item,
        })
    }
}

#[async_trait]
impl CaptureSink for CaptureCoordinator {
    async fn save_timestamp(&self, raw_text: &str) -> Result<CaptureResponse> {
        self.capture(raw_text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Offset;

    #[tokio::test]
    async fn capture_applies_offset_and_appends() {
        let store = MemoStore::in_memory();
        store.set_offset(Offset::new(2)).await.unwrap();
        let coordinator = CaptureCoordinator::new(store.clone());
        let mut events = coordinator.subscribe();

        let resp = coordinator.capture("스트리밍 00:10:05").await.unwrap();

        let CaptureResponse::Saved { value, item } = resp else {
            panic!("expected a saved capture");
        };
        assert_eq!(value, "00:10:03");
        assert_eq!(item.time, "00:10:03");
        assert_eq!(item.note, "");

        let memos = store.load_memos().await.unwrap();
        assert_eq!(memos, vec![item.clone()]);

        let Notification::MemoAdded { item: notified } = events.recv().await.unwrap();
        assert_eq!(notified, item);
    }

    #[tokio::test]
    async fn capture_without_time_is_rejected_and_stores_nothing() {
        let store = MemoStore::in_memory();
        store.add_memo("00:00:01").await.unwrap();
        let coordinator = CaptureCoordinator::new(store.clone());
        let mut events = coordinator.subscribe();

        let resp = coordinator.capture("스트리밍 준비 중").await.unwrap();

        assert_eq!(
            resp,
            CaptureResponse::Rejected {
                reason: RejectReason::NoTimeFound
            }
        );
        assert_eq!(store.load_memos().await.unwrap().len(), 1);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn capture_reads_time_joined_to_label() {
        let store = MemoStore::in_memory();
        store.set_offset(Offset::new(2)).await.unwrap();
        let coordinator = CaptureCoordinator::new(store.clone());

        let resp = coordinator.capture("스트리밍00:10:05").await.unwrap();

        assert!(matches!(resp, CaptureResponse::Saved { ref value, .. } if value == "00:10:03"));
        assert_eq!(store.load_memos().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn capture_near_zero_clamps() {
        let store = MemoStore::in_memory();
        store.set_offset(Offset::new(5)).await.unwrap();
        let coordinator = CaptureCoordinator::new(store);

        let resp = coordinator.capture("00:00:03").await.unwrap();
        assert!(matches!(resp, CaptureResponse::Saved { value, .. } if value == "00:00:00"));
    }

    #[tokio::test]
    async fn capture_without_listeners_still_saves() {
        let coordinator = CaptureCoordinator::new(MemoStore::in_memory());
        let resp = coordinator
            .handle(Request::save_timestamp("00:01:00"))
            .await
            .unwrap();
        assert!(resp.is_ok());
    }
}
