//! Page-context side of a live tab: a keydown listener installed over CDP,
//! drained on an interval, each hotkey press fed to the [`HotkeyTrigger`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::cdp::{CdpCandidateSource, CdpPage};
use crate::coordinator::CaptureSink;
use crate::error::Result;
use crate::locator::{LocatorProfile, WaitOptions};
use crate::trigger::{HotkeyTrigger, KeyEvent, TriggerOutcome};

/// JavaScript that installs the keydown listener once per document.
///
/// The listener swallows the hotkey outside text fields, so the player's own
/// shortcut for the same key never fires, and queues the press for pickup.
pub fn install_script(hotkey: &str) -> Result<String> {
    let hotkey = serde_json::to_string(&hotkey.to_lowercase())?;
    Ok(format!(
        r#"(() => {{
  if (window.__livememo) return false;
  const state = {{ presses: [] }};
  window.__livememo = state;
  const targetKind = (el) => {{
    const tag = (el && el.tagName || "").toLowerCase();
    if (tag === "input") return "input";
    if (tag === "textarea") return "textarea";
    if (el && el.isContentEditable === true) return "content_editable";
    return "other";
  }};
  document.addEventListener("keydown", (e) => {{
    if ((e.key || "").toLowerCase() !== {hotkey}) return;
    const target = targetKind(e.target);
    const modified = e.ctrlKey || e.altKey || e.metaKey;
    if (target === "other" && !modified) {{
      e.preventDefault();
      e.stopPropagation();
    }}
    state.presses.push({{ key: e.key, ctrl: e.ctrlKey, alt: e.altKey, meta: e.metaKey, shift: e.shiftKey, target }});
  }}, true);
  return true;
}})()"#
    ))
}

/// Drain failures in a row after which the tab is considered gone.
const MAX_CONSECUTIVE_FAILURES: u32 = 50;

/// Takes and clears the queued presses; `null` when the listener is gone
/// (navigation or reload).
pub const DRAIN_SCRIPT: &str = r#"(() => {
  const state = window.__livememo;
  if (!state) return null;
  const presses = state.presses;
  state.presses = [];
  return presses;
})()"#;

/// Decode the drain result. `None` means the listener has to be reinstalled.
pub fn parse_presses(value: serde_json::Value) -> Option<Vec<KeyEvent>> {
    match value {
        serde_json::Value::Array(items) => Some(
            items
                .into_iter()
                .filter_map(|item| match serde_json::from_value(item) {
                    Ok(event) => Some(event),
                    Err(e) => {
                        tracing::debug!("Ignoring malformed key event: {}", e);
                        None
                    }
                })
                .collect(),
        ),
        _ => None,
    }
}

pub struct Observer<C: CaptureSink + ?Sized + 'static> {
    page: CdpPage,
    trigger: Arc<HotkeyTrigger>,
    profile: Arc<LocatorProfile>,
    wait: WaitOptions,
    sink: Arc<C>,
    poll_interval: Duration,
}

impl<C: CaptureSink + ?Sized + 'static> Observer<C> {
    pub fn new(
        page: CdpPage,
        trigger: HotkeyTrigger,
        profile: LocatorProfile,
        wait: WaitOptions,
        sink: Arc<C>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            page,
            trigger: Arc::new(trigger),
            profile: Arc::new(profile),
            wait,
            sink,
            poll_interval,
        }
    }

    async fn install(&self) -> Result<()> {
        let fresh = self.page.evaluate(&install_script(self.trigger.hotkey())?).await?;
        if fresh.as_bool() == Some(true) {
            tracing::info!("Hotkey listener installed ({:?})", self.trigger.hotkey());
        }
        Ok(())
    }

    /// Watch the tab until `shutdown` resolves. Each press is handled on its
    /// own task so a slow lookup never delays picking up the next press; the
    /// trigger turns presses away while one is in flight.
    pub async fn run_until<F, R>(&self, shutdown: F, mut report: R) -> Result<()>
    where
        F: Future<Output = ()>,
        R: FnMut(TriggerOutcome) + Send + 'static,
    {
        self.install().await?;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<TriggerOutcome>();
        let mut failures = 0u32;
        let mut ticker = tokio::time::interval(self.poll_interval);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => return Ok(()),
                Some(outcome) = rx.recv() => report(outcome),
                _ = ticker.tick() => {
                    let drained = match self.page.evaluate(DRAIN_SCRIPT).await {
                        Ok(drained) => drained,
                        Err(e) => {
                            failures += 1;
                            if failures >= MAX_CONSECUTIVE_FAILURES {
                                return Err(e);
                            }
                            tracing::warn!("Reading key presses failed, retrying: {}", e);
                            continue;
                        }
                    };
                    failures = 0;

                    let Some(presses) = parse_presses(drained) else {
                        tracing::debug!("Listener missing after navigation, reinstalling");
                        if let Err(e) = self.install().await {
                            tracing::warn!("Reinstalling the key listener failed: {}", e);
                        }
                        continue;
                    };
                    for event in presses {
                        self.spawn_press(event, tx.clone());
                    }
                }
            }
        }
    }

    fn spawn_press(&self, event: KeyEvent, tx: tokio::sync::mpsc::UnboundedSender<TriggerOutcome>) {
        let trigger = Arc::clone(&self.trigger);
        let profile = Arc::clone(&self.profile);
        let sink = Arc::clone(&self.sink);
        let source = CdpCandidateSource::new(self.page.clone());
        let wait = self.wait;

        tokio::spawn(async move {
            match trigger
                .handle(&event, &source, &profile, wait, sink.as_ref())
                .await
            {
                Ok(outcome) => {
                    let _ = tx.send(outcome);
                }
                Err(e) => tracing::warn!("Capture failed: {}", e),
            }
        });
    }
}
