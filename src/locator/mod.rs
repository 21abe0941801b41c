//! Finding the on-page running-time display.
//!
//! Markup differs between player builds and changes without notice, so the
//! search walks a list of increasingly generic strategies and settles for a
//! weaker match rather than none. The page is reached through
//! [`CandidateSource`], so the same search runs against a live tab over CDP or
//! a [`StaticDocument`] in tests.

mod document;

pub use document::{Element, StaticDocument};

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::Result;
use crate::timecode::looks_like_timer_text;

/// Read access to a rendered page.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// `textContent` of the first element matching `selector`.
    async fn query_text(&self, selector: &str) -> Result<Option<String>>;

    /// `textContent` of every element whose tag is in `tags`, in document
    /// order.
    async fn scan_texts(&self, tags: &[String]) -> Result<Vec<String>>;
}

/// Where to look and what marks a confident hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatorProfile {
    /// Tooltip markers tied to "live started", tried first, in order.
    #[serde(default = "default_tooltip_selectors")]
    pub tooltip_selectors: Vec<String>,

    /// Secondary fixed anchor.
    #[serde(default = "default_class_selector")]
    pub class_selector: String,

    /// Element tags covered by the full-page scan.
    #[serde(default = "default_scan_tags")]
    pub scan_tags: Vec<String>,

    /// Text rendered next to the timer on live streams.
    #[serde(default = "default_live_keyword")]
    pub live_keyword: String,
}

fn default_tooltip_selectors() -> Vec<String> {
    [
        r#"span[data-knife-tooltip*="라이브 시작"]"#,
        r#"span[data-kite-tooltip*="라이브 시작"]"#,
        r#"span[data-knife-tooltip^="라이브 시작"]"#,
        r#"span[data-kite-tooltip^="라이브 시작"]"#,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_class_selector() -> String {
    ".video_information_count__Y05sI".to_string()
}

fn default_scan_tags() -> Vec<String> {
    vec!["span".to_string(), "div".to_string(), "p".to_string()]
}

fn default_live_keyword() -> String {
    "스트리밍".to_string()
}

impl Default for LocatorProfile {
    fn default() -> Self {
        Self {
            tooltip_selectors: default_tooltip_selectors(),
            class_selector: default_class_selector(),
            scan_tags: default_scan_tags(),
            live_keyword: default_live_keyword(),
        }
    }
}

/// Which strategy produced a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Tooltip,
    ClassAnchor,
    Keyword,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatedText {
    pub text: String,
    pub confidence: Confidence,
}

/// Run the search once. First success wins; the full scan only settles for a
/// keyword-less text after checking every element.
pub async fn pick_best_timer_text<S>(
    source: &S,
    profile: &LocatorProfile,
) -> Result<Option<LocatedText>>
where
    S: CandidateSource + ?Sized,
{
    for selector in &profile.tooltip_selectors {
        if let Some(text) = source.query_text(selector).await? {
            if looks_like_timer_text(&text) {
                return Ok(Some(LocatedText {
                    text,
                    confidence: Confidence::Tooltip,
                }));
            }
        }
    }

    if let Some(text) = source.query_text(&profile.class_selector).await? {
        if looks_like_timer_text(&text) {
            return Ok(Some(LocatedText {
                text,
                confidence: Confidence::ClassAnchor,
            }));
        }
    }

    let mut fallback = None;
    for raw in source.scan_texts(&profile.scan_tags).await? {
        let text = raw.trim();
        if !looks_like_timer_text(text) {
            continue;
        }
        if !profile.live_keyword.is_empty() && text.contains(profile.live_keyword.as_str()) {
            return Ok(Some(LocatedText {
                text: text.to_string(),
                confidence: Confidence::Keyword,
            }));
        }
        if fallback.is_none() {
            fallback = Some(text.to_string());
        }
    }

    Ok(fallback.map(|text| LocatedText {
        text,
        confidence: Confidence::Fallback,
    }))
}

/// How long to keep polling and how often.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    pub timeout: Duration,
    pub frame_interval: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(8000),
            frame_interval: Duration::from_millis(16),
        }
    }
}

/// Search immediately, then once per frame until a hit or the deadline.
///
/// Resolves to `None` once the deadline passes. Dropping the future cancels
/// the poll. Source errors end the wait early.
pub async fn wait_for_timer_text<S>(
    source: &S,
    profile: &LocatorProfile,
    options: WaitOptions,
) -> Result<Option<LocatedText>>
where
    S: CandidateSource + ?Sized,
{
    let deadline = Instant::now() + options.timeout;
    let mut frames = tokio::time::interval(options.frame_interval.max(Duration::from_millis(1)));
    frames.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut attempts = 0u32;
    loop {
        // The first tick completes immediately.
        frames.tick().await;
        attempts += 1;

        if let Some(found) = pick_best_timer_text(source, profile).await? {
            tracing::debug!(
                "Located timer text after {} attempt(s): {:?}",
                attempts,
                found.confidence
            );
            return Ok(Some(found));
        }

        if Instant::now() >= deadline {
            tracing::debug!("Gave up locating timer text after {} attempt(s)", attempts);
            return Ok(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn tooltip(text: &str) -> Element {
        Element::new("span", text).attr("data-kite-tooltip", "라이브 시작 2025-03-01 20:00")
    }

    #[tokio::test]
    async fn tooltip_beats_keyword_scan() {
        let doc = StaticDocument::new(vec![
            Element::new("div", "스트리밍 00:00:01"),
            tooltip("00:42:00"),
        ]);

        let found = pick_best_timer_text(&doc, &LocatorProfile::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.text, "00:42:00");
        assert_eq!(found.confidence, Confidence::Tooltip);
    }

    #[tokio::test]
    async fn tooltip_without_time_falls_through_to_class_anchor() {
        let doc = StaticDocument::new(vec![
            tooltip("loading"),
            Element::new("span", "01:02:03").class("video_information_count__Y05sI"),
        ]);

        let found = pick_best_timer_text(&doc, &LocatorProfile::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.text, "01:02:03");
        assert_eq!(found.confidence, Confidence::ClassAnchor);
    }

    #[tokio::test]
    async fn keyword_hit_beats_earlier_fallback() {
        let doc = StaticDocument::new(vec![
            Element::new("div", "  12:00:00  "),
            Element::new("section", "스트리밍 00:00:09"),
            Element::new("p", " 00:10:05 스트리밍 "),
        ]);

        let found = pick_best_timer_text(&doc, &LocatorProfile::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.text, "00:10:05 스트리밍");
        assert_eq!(found.confidence, Confidence::Keyword);
    }

    #[tokio::test]
    async fn keyword_hit_glued_to_time_beats_fallback() {
        let doc = StaticDocument::new(vec![
            Element::new("div", "12:00:00"),
            Element::new("div", "00:10:05스트리밍 중"),
        ]);

        let found = pick_best_timer_text(&doc, &LocatorProfile::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.text, "00:10:05스트리밍 중");
        assert_eq!(found.confidence, Confidence::Keyword);
    }

    #[tokio::test]
    async fn first_valid_text_is_the_fallback() {
        let doc = StaticDocument::new(vec![
            Element::new("span", "viewers 1,204"),
            Element::new("div", " 00:05:00 "),
            Element::new("span", "00:06:00"),
        ]);

        let found = pick_best_timer_text(&doc, &LocatorProfile::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.text, "00:05:00");
        assert_eq!(found.confidence, Confidence::Fallback);
    }

    #[tokio::test]
    async fn nothing_plausible_is_none() {
        let doc = StaticDocument::new(vec![Element::new("div", "chat"), Element::new("span", "1:02:03")]);
        assert!(pick_best_timer_text(&doc, &LocatorProfile::default())
            .await
            .unwrap()
            .is_none());
    }

    /// A page whose timer renders only after a number of lookups.
    struct LateDocument {
        polls: AtomicUsize,
        ready_after: usize,
        doc: StaticDocument,
    }

    #[async_trait]
    impl CandidateSource for LateDocument {
        async fn query_text(&self, selector: &str) -> Result<Option<String>> {
            if self.polls.load(Ordering::SeqCst) < self.ready_after {
                return Ok(None);
            }
            self.doc.query_text(selector).await
        }

        async fn scan_texts(&self, tags: &[String]) -> Result<Vec<String>> {
            // One scan per search attempt.
            if self.polls.fetch_add(1, Ordering::SeqCst) < self.ready_after {
                return Ok(Vec::new());
            }
            self.doc.scan_texts(tags).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn wait_polls_until_display_appears() {
        let source = LateDocument {
            polls: AtomicUsize::new(0),
            ready_after: 3,
            doc: StaticDocument::new(vec![Element::new("div", "스트리밍 00:00:30")]),
        };

        let found = wait_for_timer_text(&source, &LocatorProfile::default(), WaitOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.text, "스트리밍 00:00:30");
        assert_eq!(source.polls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_to_none() {
        let start = Instant::now();
        let doc = StaticDocument::new(vec![Element::new("div", "offline")]);
        let options = WaitOptions {
            timeout: Duration::from_millis(500),
            frame_interval: Duration::from_millis(16),
        };

        let found = wait_for_timer_text(&doc, &LocatorProfile::default(), options)
            .await
            .unwrap();
        assert!(found.is_none());
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert!(start.elapsed() < Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_returns_immediately_when_present() {
        let start = Instant::now();
        let doc = StaticDocument::new(vec![tooltip("00:00:01")]);

        let found = wait_for_timer_text(&doc, &LocatorProfile::default(), WaitOptions::default())
            .await
            .unwrap();
        assert!(found.is_some());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
