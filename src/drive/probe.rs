//! Verification Probe - indirect focus checks.
//!
//! Text probes copy the focused field's contents through the clipboard:
//! seed a sentinel, (optionally) type a marker, select all, copy, read back.
//! The user's clipboard text is restored afterwards. Without a readback
//! channel every text probe is `Unconfirmed` and nothing is typed.

use super::{Verify, VerificationResult};
use crate::config::{ProbeConfig, ReadbackKind};
use crate::input::{InputSynthesizer, KeyChord, KeyCode};
use crate::locator::AppLocator;
use crate::target::{MessageRequest, TargetAppDescriptor};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// Written to the clipboard before copying; surviving it means nothing was copied.
pub const SENTINEL: &str = "\u{2063}courier-probe\u{2063}";

/// A channel the probe can read the focused field's text back through.
pub trait Readback: Send + Sync {
    fn read(&self) -> anyhow::Result<Option<String>>;
    fn write(&self, text: &str) -> anyhow::Result<()>;
}

/// System clipboard via arboard. A fresh handle per call, like the enigo backend.
#[derive(Debug, Default)]
pub struct ClipboardReadback;

impl Readback for ClipboardReadback {
    fn read(&self) -> anyhow::Result<Option<String>> {
        let mut clipboard = arboard::Clipboard::new()?;
        match clipboard.get_text() {
            Ok(text) => Ok(Some(text)),
            Err(arboard::Error::ContentNotAvailable) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, text: &str) -> anyhow::Result<()> {
        let mut clipboard = arboard::Clipboard::new()?;
        clipboard.set_text(text.to_string())?;
        Ok(())
    }
}

/// What the probe needs to know about the running session.
pub struct ProbeContext<'a> {
    pub input: &'a InputSynthesizer,
    pub locator: &'a AppLocator,
    pub target: &'a TargetAppDescriptor,
    pub request: &'a MessageRequest,
    pub marker_char_delay: Duration,
}

pub struct VerificationProbe {
    readback: Option<Arc<dyn Readback>>,
    config: ProbeConfig,
}

impl VerificationProbe {
    pub fn new(readback: Option<Arc<dyn Readback>>, config: ProbeConfig) -> Self {
        Self { readback, config }
    }

    /// Probe wired to the channel named in `config`.
    pub fn from_config(config: ProbeConfig) -> Self {
        let readback: Option<Arc<dyn Readback>> = match config.readback {
            ReadbackKind::Clipboard => Some(Arc::new(ClipboardReadback)),
            ReadbackKind::None => None,
        };
        Self::new(readback, config)
    }

    pub fn has_readback(&self) -> bool {
        self.readback.is_some()
    }

    pub fn new_marker(&self) -> String {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(self.config.marker_len)
            .map(char::from)
            .collect();
        format!("{}{}", self.config.marker_prefix, suffix.to_lowercase())
    }

    pub async fn verify(&self, kind: Verify, ctx: &ProbeContext<'_>) -> VerificationResult {
        match kind {
            Verify::None => VerificationResult::unconfirmed("no probe for this step"),
            Verify::WindowForeground => match ctx.locator.frontmost_is_target(ctx.target) {
                Some(true) => VerificationResult::confirmed(format!("{} is frontmost", ctx.target.name)),
                Some(false) => VerificationResult::failed(format!("{} is not frontmost", ctx.target.name)),
                None => VerificationResult::unconfirmed("window order unavailable"),
            },
            Verify::Echo => self.echo(ctx).await,
            Verify::FieldEmpty => self.field_empty(ctx).await,
            Verify::FieldHoldsMessage => self.field_holds_message(ctx).await,
        }
    }

    async fn echo(&self, ctx: &ProbeContext<'_>) -> VerificationResult {
        let Some(readback) = &self.readback else {
            return VerificationResult::unconfirmed("no readback channel");
        };

        let saved = match self.prepare(readback).await {
            Ok(saved) => saved,
            Err(e) => return VerificationResult::unconfirmed(format!("clipboard unavailable: {}", e)),
        };

        let marker = self.new_marker();
        let (result, landed) = match self.type_and_copy(ctx, &marker).await {
            Ok(()) => match Self::read(readback).await {
                Ok(text) => {
                    let landed = text.as_deref().is_some_and(|t| t.contains(&marker));
                    (judge_echo(&marker, text.as_deref(), &ctx.request.contact), landed)
                }
                Err(e) => (VerificationResult::unconfirmed(format!("readback failed: {}", e)), false),
            },
            Err(e) => (VerificationResult::failed(format!("input failed during probe: {}", e)), false),
        };

        // erase only a marker the readback showed
        if landed {
            self.remove_marker(ctx, &marker).await;
        }
        self.restore(readback, saved).await;
        result
    }

    async fn field_holds_message(&self, ctx: &ProbeContext<'_>) -> VerificationResult {
        let Some(readback) = &self.readback else {
            return VerificationResult::unconfirmed("no readback channel");
        };
        let copied = match self.copy_field(readback, ctx).await {
            Ok(copied) => copied,
            Err(result) => return result,
        };

        let expected = normalise(&ctx.request.body);
        match copied {
            None => VerificationResult::failed("field is empty"),
            Some(text) if normalise(&text) == expected => VerificationResult::confirmed("field holds the message"),
            Some(text) => VerificationResult::failed(format!("field holds {:?}", preview(&text))),
        }
    }

    async fn field_empty(&self, ctx: &ProbeContext<'_>) -> VerificationResult {
        let Some(readback) = &self.readback else {
            return VerificationResult::unconfirmed("no readback channel");
        };
        let copied = match self.copy_field(readback, ctx).await {
            Ok(copied) => copied,
            Err(result) => return result,
        };

        match copied {
            None => VerificationResult::confirmed("field is empty"),
            Some(text) if normalise(&text) == normalise(&ctx.request.body) => {
                VerificationResult::failed("message is still in the field")
            }
            Some(text) => VerificationResult::unconfirmed(format!("copied {:?}", preview(&text))),
        }
    }

    /// Select-all + copy without typing. `None` means nothing was copied.
    async fn copy_field(
        &self,
        readback: &Arc<dyn Readback>,
        ctx: &ProbeContext<'_>,
    ) -> Result<Option<String>, VerificationResult> {
        let saved = self
            .prepare(readback)
            .await
            .map_err(|e| VerificationResult::unconfirmed(format!("clipboard unavailable: {}", e)))?;

        let copied = async {
            ctx.input.key(&KeyChord::primary('a')).await?;
            ctx.input.key(&KeyChord::primary('c')).await?;
            ctx.input.key(&KeyChord::key(KeyCode::End)).await?;
            Ok::<_, crate::input::InputError>(())
        }
        .await;

        let result = match copied {
            Ok(()) => match Self::read(readback).await {
                Ok(Some(text)) if text != SENTINEL => Ok(Some(text)),
                Ok(_) => Ok(None),
                Err(e) => Err(VerificationResult::unconfirmed(format!("readback failed: {}", e))),
            },
            Err(e) => Err(VerificationResult::failed(format!("input failed during probe: {}", e))),
        };
        self.restore(readback, saved).await;
        result
    }

    async fn type_and_copy(&self, ctx: &ProbeContext<'_>, marker: &str) -> Result<(), crate::input::InputError> {
        ctx.input.type_text(marker, ctx.marker_char_delay).await?;
        ctx.input.key(&KeyChord::primary('a')).await?;
        ctx.input.key(&KeyChord::primary('c')).await
    }

    /// Collapse the selection and delete the marker we typed.
    async fn remove_marker(&self, ctx: &ProbeContext<'_>, marker: &str) {
        let cleanup = async {
            ctx.input.key(&KeyChord::key(KeyCode::End)).await?;
            let count = marker.chars().count() as u32;
            ctx.input.key_repeated(&KeyChord::key(KeyCode::Backspace), count).await
        }
        .await;
        if let Err(e) = cleanup {
            log::warn!("[probe] Could not remove marker {}: {}", marker, e);
        }
    }

    /// Remember the user's clipboard and seed the sentinel.
    async fn prepare(&self, readback: &Arc<dyn Readback>) -> anyhow::Result<Option<String>> {
        let saved = Self::read(readback).await?;
        let channel = Arc::clone(readback);
        tokio::task::spawn_blocking(move || channel.write(SENTINEL)).await??;
        Ok(saved)
    }

    async fn restore(&self, readback: &Arc<dyn Readback>, saved: Option<String>) {
        let channel = Arc::clone(readback);
        let text = saved.unwrap_or_default();
        match tokio::task::spawn_blocking(move || channel.write(&text)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("[probe] Could not restore clipboard: {}", e),
            Err(e) => log::warn!("[probe] Clipboard task failed: {}", e),
        }
    }

    async fn read(readback: &Arc<dyn Readback>) -> anyhow::Result<Option<String>> {
        let channel = Arc::clone(readback);
        tokio::task::spawn_blocking(move || channel.read()).await?
    }
}

fn normalise(text: &str) -> String {
    text.replace('\r', "").trim().to_string()
}

fn preview(text: &str) -> String {
    text.chars().take(40).collect()
}

/// Decide an echo probe from what came back.
///
/// The marker alone, or appended to the field's own text, means it landed in
/// an editable field. The search query followed directly by the marker means
/// the search box still has focus. Text without the marker, or the sentinel,
/// means the keystrokes went somewhere else.
pub fn judge_echo(marker: &str, readback: Option<&str>, contact: &str) -> VerificationResult {
    let text = match readback {
        None => return VerificationResult::failed("clipboard empty after copy"),
        Some(text) if text == SENTINEL => return VerificationResult::failed("nothing was copied"),
        Some(text) => text.replace('\r', ""),
    };
    let trimmed = text.trim();

    if !trimmed.contains(marker) {
        return VerificationResult::failed(format!("marker missing from {:?}", preview(trimmed)));
    }

    let Some(before) = trimmed.strip_suffix(marker) else {
        return VerificationResult::unconfirmed(format!("marker found mid-text: {}", trimmed));
    };

    let contact = contact.trim();
    if !contact.is_empty() && before.trim().to_lowercase() == contact.to_lowercase() {
        return VerificationResult::failed(format!("marker landed next to search text: {}", trimmed));
    }
    VerificationResult::confirmed(format!("echoed {}", marker))
}
