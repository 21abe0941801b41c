//! The page-context hotkey: one press, one capture attempt.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::coordinator::CaptureSink;
use crate::error::Result;
use crate::locator::{
    pick_best_timer_text, wait_for_timer_text, CandidateSource, LocatorProfile, WaitOptions,
};
use crate::protocol::CaptureResponse;

/// What held focus when the key went down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusTarget {
    Input,
    Textarea,
    ContentEditable,
    #[default]
    Other,
}

impl FocusTarget {
    pub fn is_text_entry(self) -> bool {
        !matches!(self, FocusTarget::Other)
    }
}

/// A keydown as reported by the page listener.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEvent {
    pub key: String,
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub alt: bool,
    #[serde(default)]
    pub meta: bool,
    #[serde(default)]
    pub shift: bool,
    #[serde(default)]
    pub target: FocusTarget,
}

impl KeyEvent {
    pub fn key(key: &str) -> Self {
        Self {
            key: key.to_string(),
            ..Default::default()
        }
    }

    pub fn in_target(mut self, target: FocusTarget) -> Self {
        self.target = target;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    Idle,
    Armed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    OtherKey,
    Modifier,
    TypingTarget,
    /// A capture from an earlier press is still running.
    Busy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Ignored(IgnoreReason),
    /// The display could not be found before the deadline.
    NotFound,
    Captured(CaptureResponse),
}

/// Two-state hotkey machine. Presses while armed are ignored.
#[derive(Debug)]
pub struct HotkeyTrigger {
    key: String,
    armed: AtomicBool,
}

/// Returns the trigger to idle when dropped.
struct ArmedGuard<'a>(&'a AtomicBool);

impl Drop for ArmedGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl HotkeyTrigger {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.trim().to_lowercase(),
            armed: AtomicBool::new(false),
        }
    }

    pub fn hotkey(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> TriggerState {
        if self.armed.load(Ordering::SeqCst) {
            TriggerState::Armed
        } else {
            TriggerState::Idle
        }
    }

    /// Whether the page should swallow this key. Busy presses are still
    /// swallowed so they never reach the player's own shortcuts.
    pub fn suppresses_default(&self, event: &KeyEvent) -> bool {
        !matches!(
            self.classify(event),
            Err(IgnoreReason::OtherKey | IgnoreReason::Modifier | IgnoreReason::TypingTarget)
        )
    }

    fn classify(&self, event: &KeyEvent) -> std::result::Result<(), IgnoreReason> {
        if event.key.to_lowercase() != self.key {
            return Err(IgnoreReason::OtherKey);
        }
        if event.ctrl || event.alt || event.meta {
            return Err(IgnoreReason::Modifier);
        }
        if event.target.is_text_entry() {
            return Err(IgnoreReason::TypingTarget);
        }
        Ok(())
    }

    fn try_arm(&self) -> Option<ArmedGuard<'_>> {
        self.armed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| ArmedGuard(&self.armed))
    }

    /// Handle one keydown: locate the timer (immediately, then polling until
    /// the deadline) and hand the text to `sink`.
    pub async fn handle<S, C>(
        &self,
        event: &KeyEvent,
        source: &S,
        profile: &LocatorProfile,
        wait: WaitOptions,
        sink: &C,
    ) -> Result<TriggerOutcome>
    where
        S: CandidateSource + ?Sized,
        C: CaptureSink + ?Sized,
    {
        if let Err(reason) = self.classify(event) {
            return Ok(TriggerOutcome::Ignored(reason));
        }
        let Some(_armed) = self.try_arm() else {
            tracing::debug!("Capture already in flight, ignoring press");
            return Ok(TriggerOutcome::Ignored(IgnoreReason::Busy));
        };

        let located = match pick_best_timer_text(source, profile).await? {
            Some(found) => Some(found),
            None => wait_for_timer_text(source, profile, wait).await?,
        };

        let Some(located) = located else {
            tracing::warn!("Time element not found (maybe an iframe or a different layout)");
            return Ok(TriggerOutcome::NotFound);
        };

        let response = sink.save_timestamp(&located.text).await?;
        if !response.is_ok() {
            tracing::warn!("Save failed: {:?}", response);
        }
        Ok(TriggerOutcome::Captured(response))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::coordinator::CaptureCoordinator;
    use crate::locator::{Element, StaticDocument};
    use crate::store::MemoStore;

    fn live_page() -> StaticDocument {
        StaticDocument::new(vec![Element::new("div", "스트리밍 00:01:00")])
    }

    fn quick() -> WaitOptions {
        WaitOptions {
            timeout: Duration::from_millis(100),
            frame_interval: Duration::from_millis(16),
        }
    }

    #[tokio::test]
    async fn hotkey_press_captures() {
        let trigger = HotkeyTrigger::new("p");
        let coordinator = CaptureCoordinator::new(MemoStore::in_memory());

        let outcome = trigger
            .handle(&KeyEvent::key("P"), &live_page(), &LocatorProfile::default(), quick(), &coordinator)
            .await
            .unwrap();

        assert!(matches!(outcome, TriggerOutcome::Captured(ref r) if r.is_ok()));
        assert_eq!(coordinator.store().load_memos().await.unwrap().len(), 1);
        assert_eq!(trigger.state(), TriggerState::Idle);
    }

    #[tokio::test]
    async fn non_hotkey_and_typing_are_ignored() {
        let trigger = HotkeyTrigger::new("p");
        let coordinator = CaptureCoordinator::new(MemoStore::in_memory());
        let page = live_page();
        let profile = LocatorProfile::default();

        let cases = [
            (KeyEvent::key("o"), IgnoreReason::OtherKey),
            (KeyEvent { ctrl: true, ..KeyEvent::key("p") }, IgnoreReason::Modifier),
            (KeyEvent::key("p").in_target(FocusTarget::Input), IgnoreReason::TypingTarget),
            (KeyEvent::key("p").in_target(FocusTarget::Textarea), IgnoreReason::TypingTarget),
            (KeyEvent::key("p").in_target(FocusTarget::ContentEditable), IgnoreReason::TypingTarget),
        ];
        for (event, reason) in cases {
            assert!(!trigger.suppresses_default(&event));
            let outcome = trigger.handle(&event, &page, &profile, quick(), &coordinator).await.unwrap();
            assert_eq!(outcome, TriggerOutcome::Ignored(reason));
        }
        assert!(coordinator.store().load_memos().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn shift_is_not_a_blocking_modifier() {
        let trigger = HotkeyTrigger::new("p");
        let event = KeyEvent { shift: true, ..KeyEvent::key("P") };
        assert!(trigger.suppresses_default(&event));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_display_returns_to_idle_without_saving() {
        let trigger = HotkeyTrigger::new("p");
        let coordinator = CaptureCoordinator::new(MemoStore::in_memory());
        let page = StaticDocument::new(vec![Element::new("div", "offline")]);

        let outcome = trigger
            .handle(&KeyEvent::key("p"), &page, &LocatorProfile::default(), quick(), &coordinator)
            .await
            .unwrap();

        assert_eq!(outcome, TriggerOutcome::NotFound);
        assert_eq!(trigger.state(), TriggerState::Idle);
        assert!(coordinator.store().load_memos().await.unwrap().is_empty());
    }

    /// Holds every capture until released.
    struct GatedSink {
        gate: Notify,
        inner: CaptureCoordinator,
    }

    #[async_trait]
    impl CaptureSink for GatedSink {
        async fn save_timestamp(&self, raw_text: &str) -> Result<CaptureResponse> {
            self.gate.notified().await;
            self.inner.capture(raw_text).await
        }
    }

    #[tokio::test]
    async fn second_press_while_armed_is_ignored() {
        let trigger = Arc::new(HotkeyTrigger::new("p"));
        let sink = Arc::new(GatedSink {
            gate: Notify::new(),
            inner: CaptureCoordinator::new(MemoStore::in_memory()),
        });

        let first = {
            let (trigger, sink) = (trigger.clone(), sink.clone());
            tokio::spawn(async move {
                trigger
                    .handle(&KeyEvent::key("p"), &live_page(), &LocatorProfile::default(), quick(), sink.as_ref())
                    .await
            })
        };

        while trigger.state() != TriggerState::Armed {
            tokio::task::yield_now().await;
        }

        let event = KeyEvent::key("p");
        assert!(trigger.suppresses_default(&event));
        let second = trigger
            .handle(&event, &live_page(), &LocatorProfile::default(), quick(), sink.as_ref())
            .await
            .unwrap();
        assert_eq!(second, TriggerOutcome::Ignored(IgnoreReason::Busy));

        sink.gate.notify_one();
        let first = first.await.unwrap().unwrap();
        assert!(matches!(first, TriggerOutcome::Captured(ref r) if r.is_ok()));
        assert_eq!(trigger.state(), TriggerState::Idle);
        assert_eq!(sink.inner.store().load_memos().await.unwrap().len(), 1);
    }
}
