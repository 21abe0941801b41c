use std::io::Write;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::error::{LivememoError, Result};

/// Somewhere exported text can be put.
pub trait Clipboard {
    /// Short name for user-facing messages.
    fn name(&self) -> &'static str;
    fn set_text(&mut self, text: &str) -> Result<()>;
}

/// The OS clipboard through arboard, opened on first use.
#[derive(Default)]
pub struct SystemClipboard {
    inner: Option<arboard::Clipboard>,
}

impl SystemClipboard {
    pub fn new() -> Self {
        Self { inner: None }
    }

    fn ensure(&mut self) -> Result<&mut arboard::Clipboard> {
        if self.inner.is_none() {
            let clipboard = arboard::Clipboard::new()
                .map_err(|e| LivememoError::ClipboardError(e.to_string()))?;
            self.inner = Some(clipboard);
        }
        self.inner
            .as_mut()
            .ok_or_else(|| LivememoError::ClipboardError("clipboard unavailable".to_string()))
    }
}

impl Clipboard for SystemClipboard {
    fn name(&self) -> &'static str {
        "system clipboard"
    }

    fn set_text(&mut self, text: &str) -> Result<()> {
        self.ensure()?
            .set_text(text.to_string())
            .map_err(|e| LivememoError::ClipboardError(e.to_string()))
    }
}

/// Terminal clipboard through the OSC 52 escape sequence. Works over SSH and
/// in headless sessions as long as the terminal honours it.
pub struct Osc52Clipboard<W: Write> {
    out: W,
}

impl Osc52Clipboard<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self {
            out: std::io::stdout(),
        }
    }
}

impl<W: Write> Osc52Clipboard<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

pub fn osc52_sequence(text: &str) -> String {
    format!("\x1b]52;c;{}\x1b\\", STANDARD.encode(text.as_bytes()))
}

impl<W: Write> Clipboard for Osc52Clipboard<W> {
    fn name(&self) -> &'static str {
        "terminal clipboard (OSC 52)"
    }

    fn set_text(&mut self, text: &str) -> Result<()> {
        self.out.write_all(osc52_sequence(text).as_bytes())?;
        self.out.flush()?;
        Ok(())
    }
}

/// Try `primary`, and on failure `fallback`. Only the fallback's error is
/// reported.
pub struct FallbackClipboard<P: Clipboard, F: Clipboard> {
    primary: P,
    fallback: F,
    last_used: &'static str,
}

impl<P: Clipboard, F: Clipboard> FallbackClipboard<P, F> {
    pub fn new(primary: P, fallback: F) -> Self {
        let last_used = primary.name();
        Self {
            primary,
            fallback,
            last_used,
        }
    }
}

impl FallbackClipboard<SystemClipboard, Osc52Clipboard<std::io::Stdout>> {
    pub fn system() -> Self {
        Self::new(SystemClipboard::new(), Osc52Clipboard::stdout())
    }
}

impl<P: Clipboard, F: Clipboard> Clipboard for FallbackClipboard<P, F> {
    fn name(&self) -> &'static str {
        self.last_used
    }

    fn set_text(&mut self, text: &str) -> Result<()> {
        match self.primary.set_text(text) {
            Ok(()) => {
                self.last_used = self.primary.name();
                Ok(())
            }
            Err(e) => {
                tracing::debug!("{} failed ({}), falling back", self.primary.name(), e);
                self.fallback.set_text(text)?;
                self.last_used = self.fallback.name();
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Denied;

    impl Clipboard for Denied {
        fn name(&self) -> &'static str {
            "denied"
        }

        fn set_text(&mut self, _text: &str) -> Result<()> {
            Err(LivememoError::ClipboardError("permission denied".to_string()))
        }
    }

    #[test]
    fn osc52_wraps_base64_payload() {
        assert_eq!(osc52_sequence("hi"), "\x1b]52;c;aGk=\x1b\\");
    }

    #[test]
    fn fallback_used_when_primary_denied() {
        let mut clipboard = FallbackClipboard::new(Denied, Osc52Clipboard::new(Vec::new()));
        clipboard.set_text("00:00:05").unwrap();
        assert_eq!(clipboard.name(), "terminal clipboard (OSC 52)");

        let written = String::from_utf8(clipboard.fallback.into_inner()).unwrap();
        assert_eq!(written, osc52_sequence("00:00:05"));
    }

    #[test]
    fn both_failing_reports_error() {
        let mut clipboard = FallbackClipboard::new(Denied, Denied);
        assert!(matches!(
            clipboard.set_text("x"),
            Err(LivememoError::ClipboardError(_))
        ));
    }
}
