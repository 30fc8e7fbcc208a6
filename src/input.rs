//! Input Synthesizer - the only code allowed to emit clicks and keystrokes.
//!
//! `InputSynthesizer` owns a boxed [`InputBackend`] and adds the settle
//! delay after every primitive. Each primitive runs to completion on a
//! blocking thread, so dropping the awaiting future never leaves half a
//! chord pressed or half a string typed; only the settle sleep is
//! interruptible.

use crate::geometry::Point;
use enigo::{Button, Coordinate, Direction, Enigo, Key, Keyboard, Mouse, Settings};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InputError {
    #[error("Input backend unavailable: {0}")]
    Backend(String),
    #[error("Invalid key: {0}")]
    InvalidKey(String),
    #[error("Input task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyCode {
    Escape,
    Tab,
    Enter,
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    Delete,
    Backspace,
    Space,
    Char(char),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modifier {
    Control,
    Shift,
    Alt,
    Meta,
    /// Cmd on macOS, Ctrl everywhere else.
    Primary,
}

/// A key plus held modifiers, e.g. `primary+f` or `shift+enter`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyChord {
    pub modifiers: Vec<Modifier>,
    pub key: KeyCode,
}

impl KeyChord {
    pub fn key(key: KeyCode) -> Self {
        Self {
            modifiers: Vec::new(),
            key,
        }
    }

    pub fn with(modifier: Modifier, key: KeyCode) -> Self {
        Self {
            modifiers: vec![modifier],
            key,
        }
    }

    /// Platform shortcut: Cmd+`c` on macOS, Ctrl+`c` elsewhere.
    pub fn primary(c: char) -> Self {
        Self::with(Modifier::Primary, KeyCode::Char(c))
    }
}

fn parse_modifier(token: &str) -> Option<Modifier> {
    match token {
        "ctrl" | "control" => Some(Modifier::Control),
        "shift" => Some(Modifier::Shift),
        "alt" | "option" => Some(Modifier::Alt),
        "meta" | "cmd" | "command" | "super" | "win" => Some(Modifier::Meta),
        "primary" | "mod" => Some(Modifier::Primary),
        _ => None,
    }
}

fn parse_key(token: &str) -> Result<KeyCode, InputError> {
    let key = match token.to_lowercase().as_str() {
        "escape" | "esc" => KeyCode::Escape,
        "tab" => KeyCode::Tab,
        "enter" | "return" => KeyCode::Enter,
        "up" => KeyCode::Up,
        "down" => KeyCode::Down,
        "left" => KeyCode::Left,
        "right" => KeyCode::Right,
        "home" => KeyCode::Home,
        "end" => KeyCode::End,
        "delete" | "del" => KeyCode::Delete,
        "backspace" => KeyCode::Backspace,
        "space" => KeyCode::Space,
        _ => {
            let mut chars = token.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => KeyCode::Char(c),
                _ => return Err(InputError::InvalidKey(token.to_string())),
            }
        }
    };
    Ok(key)
}

impl FromStr for KeyChord {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens: Vec<&str> = s.split('+').map(str::trim).collect();
        let Some((key_token, modifier_tokens)) = tokens.split_last() else {
            return Err(InputError::InvalidKey(s.to_string()));
        };
        if key_token.is_empty() {
            return Err(InputError::InvalidKey(s.to_string()));
        }

        let mut modifiers = Vec::with_capacity(modifier_tokens.len());
        for token in modifier_tokens {
            let modifier = parse_modifier(&token.to_lowercase())
                .ok_or_else(|| InputError::InvalidKey(format!("unknown modifier '{}' in '{}'", token, s)))?;
            modifiers.push(modifier);
        }

        Ok(Self {
            modifiers,
            key: parse_key(key_token)?,
        })
    }
}

impl TryFrom<String> for KeyChord {
    type Error = InputError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<KeyChord> for String {
    fn from(chord: KeyChord) -> Self {
        chord.to_string()
    }
}

impl fmt::Display for KeyChord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for modifier in &self.modifiers {
            let name = match modifier {
                Modifier::Control => "ctrl",
                Modifier::Shift => "shift",
                Modifier::Alt => "alt",
                Modifier::Meta => "meta",
                Modifier::Primary => "primary",
            };
            write!(f, "{}+", name)?;
        }
        match self.key {
            KeyCode::Escape => write!(f, "escape"),
            KeyCode::Tab => write!(f, "tab"),
            KeyCode::Enter => write!(f, "enter"),
            KeyCode::Up => write!(f, "up"),
            KeyCode::Down => write!(f, "down"),
            KeyCode::Left => write!(f, "left"),
            KeyCode::Right => write!(f, "right"),
            KeyCode::Home => write!(f, "home"),
            KeyCode::End => write!(f, "end"),
            KeyCode::Delete => write!(f, "delete"),
            KeyCode::Backspace => write!(f, "backspace"),
            KeyCode::Space => write!(f, "space"),
            KeyCode::Char(c) => write!(f, "{}", c),
        }
    }
}

/// Raw, blocking input emitter. Swapped for a recorder in tests.
pub trait InputBackend: Send {
    fn click(&mut self, at: Point) -> Result<(), InputError>;
    fn key(&mut self, chord: &KeyChord) -> Result<(), InputError>;
    fn text(&mut self, text: &str) -> Result<(), InputError>;
    fn display_size(&mut self) -> Result<(u32, u32), InputError>;
}

/// Pauses after each primitive so the target UI can repaint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settle {
    pub after_click: Duration,
    pub after_key: Duration,
    pub after_text: Duration,
}

impl Settle {
    pub fn none() -> Self {
        Self {
            after_click: Duration::ZERO,
            after_key: Duration::ZERO,
            after_text: Duration::ZERO,
        }
    }
}

type SharedBackend = Arc<Mutex<Box<dyn InputBackend>>>;

pub struct InputSynthesizer {
    backend: SharedBackend,
    settle: Settle,
}

impl InputSynthesizer {
    pub fn new(backend: impl InputBackend + 'static, settle: Settle) -> Self {
        Self {
            backend: Arc::new(Mutex::new(Box::new(backend))),
            settle,
        }
    }

    pub async fn click(&self, at: Point) -> Result<(), InputError> {
        self.run(move |backend| backend.click(at)).await?;
        tokio::time::sleep(self.settle.after_click).await;
        Ok(())
    }

    pub async fn key(&self, chord: &KeyChord) -> Result<(), InputError> {
        let chord = chord.clone();
        self.run(move |backend| backend.key(&chord)).await?;
        tokio::time::sleep(self.settle.after_key).await;
        Ok(())
    }

    /// Press the same chord `times` times, settling after each press.
    pub async fn key_repeated(&self, chord: &KeyChord, times: u32) -> Result<(), InputError> {
        for _ in 0..times {
            self.key(chord).await?;
        }
        Ok(())
    }

    /// Type character by character. `\n` becomes Shift+Enter so it never submits.
    pub async fn type_text(&self, text: &str, per_char: Duration) -> Result<(), InputError> {
        let text = text.to_string();
        self.run(move |backend| {
            let soft_break = KeyChord::with(Modifier::Shift, KeyCode::Enter);
            let mut buf = [0u8; 4];
            for c in text.chars() {
                match c {
                    '\r' => continue,
                    '\n' => backend.key(&soft_break)?,
                    _ => backend.text(c.encode_utf8(&mut buf))?,
                }
                if !per_char.is_zero() {
                    std::thread::sleep(per_char);
                }
            }
            Ok(())
        })
        .await?;
        tokio::time::sleep(self.settle.after_text).await;
        Ok(())
    }

    pub async fn display_size(&self) -> Result<(u32, u32), InputError> {
        self.run(|backend| backend.display_size()).await
    }

    async fn run<T, F>(&self, op: F) -> Result<T, InputError>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn InputBackend) -> Result<T, InputError> + Send + 'static,
    {
        let backend = Arc::clone(&self.backend);
        tokio::task::spawn_blocking(move || {
            let mut guard = backend
                .lock()
                .map_err(|_| InputError::Task("input backend lock poisoned".to_string()))?;
            op(guard.as_mut())
        })
        .await
        .map_err(|e| InputError::Task(e.to_string()))?
    }
}

/// Real OS input through enigo. A fresh connection is opened per primitive.
#[derive(Debug, Default)]
pub struct EnigoBackend;

impl EnigoBackend {
    fn connect() -> Result<Enigo, InputError> {
        Enigo::new(&Settings::default()).map_err(|e| InputError::Backend(e.to_string()))
    }

    fn map_key(key: KeyCode) -> Key {
        match key {
            KeyCode::Escape => Key::Escape,
            KeyCode::Tab => Key::Tab,
            KeyCode::Enter => Key::Return,
            KeyCode::Up => Key::UpArrow,
            KeyCode::Down => Key::DownArrow,
            KeyCode::Left => Key::LeftArrow,
            KeyCode::Right => Key::RightArrow,
            KeyCode::Home => Key::Home,
            KeyCode::End => Key::End,
            KeyCode::Delete => Key::Delete,
            KeyCode::Backspace => Key::Backspace,
            KeyCode::Space => Key::Space,
            KeyCode::Char(c) => Key::Unicode(c),
        }
    }

    fn map_modifier(modifier: Modifier) -> Key {
        match modifier {
            Modifier::Control => Key::Control,
            Modifier::Shift => Key::Shift,
            Modifier::Alt => Key::Alt,
            Modifier::Meta => Key::Meta,
            Modifier::Primary => {
                if cfg!(target_os = "macos") {
                    Key::Meta
                } else {
                    Key::Control
                }
            }
        }
    }
}

fn backend_err(e: impl fmt::Display) -> InputError {
    InputError::Backend(e.to_string())
}

impl InputBackend for EnigoBackend {
    fn click(&mut self, at: Point) -> Result<(), InputError> {
        let mut enigo = Self::connect()?;
        enigo.move_mouse(at.x, at.y, Coordinate::Abs).map_err(backend_err)?;
        enigo.button(Button::Left, Direction::Click).map_err(backend_err)
    }

    fn key(&mut self, chord: &KeyChord) -> Result<(), InputError> {
        let mut enigo = Self::connect()?;
        let mut pressed = Vec::with_capacity(chord.modifiers.len());
        let mut result = Ok(());

        for modifier in &chord.modifiers {
            let key = Self::map_modifier(*modifier);
            if let Err(e) = enigo.key(key, Direction::Press) {
                result = Err(backend_err(e));
                break;
            }
            pressed.push(key);
        }
        if result.is_ok() {
            result = enigo
                .key(Self::map_key(chord.key), Direction::Click)
                .map_err(backend_err);
        }

        // modifiers must never stay held, whatever happened above
        for key in pressed.into_iter().rev() {
            if let Err(e) = enigo.key(key, Direction::Release) {
                log::warn!("[input] Failed to release {:?}: {}", key, e);
            }
        }
        result
    }

    fn text(&mut self, text: &str) -> Result<(), InputError> {
        let mut enigo = Self::connect()?;
        enigo.text(text).map_err(backend_err)
    }

    fn display_size(&mut self) -> Result<(u32, u32), InputError> {
        let enigo = Self::connect()?;
        let (w, h) = enigo.main_display().map_err(backend_err)?;
        Ok((w.max(0) as u32, h.max(0) as u32))
    }
}

/// Logs every primitive instead of performing it. Used by `--dry-run`.
#[derive(Debug)]
pub struct DryRunBackend {
    width: u32,
    height: u32,
}

impl DryRunBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl InputBackend for DryRunBackend {
    fn click(&mut self, at: Point) -> Result<(), InputError> {
        log::info!("[input] (dry-run) click at ({}, {})", at.x, at.y);
        Ok(())
    }

    fn key(&mut self, chord: &KeyChord) -> Result<(), InputError> {
        log::info!("[input] (dry-run) key {}", chord);
        Ok(())
    }

    fn text(&mut self, text: &str) -> Result<(), InputError> {
        log::debug!("[input] (dry-run) text {:?}", text);
        Ok(())
    }

    fn display_size(&mut self) -> Result<(u32, u32), InputError> {
        Ok((self.width, self.height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{InputEvent, RecordingBackend};

    #[test]
    fn test_parse_chords() {
        let chord: KeyChord = "ctrl+shift+F".parse().unwrap();
        assert_eq!(chord.modifiers, vec![Modifier::Control, Modifier::Shift]);
        assert_eq!(chord.key, KeyCode::Char('F'));

        assert_eq!("Esc".parse::<KeyChord>().unwrap(), KeyChord::key(KeyCode::Escape));
        assert_eq!("primary+a".parse::<KeyChord>().unwrap(), KeyChord::primary('a'));
        assert_eq!(
            "shift + enter".parse::<KeyChord>().unwrap(),
            KeyChord::with(Modifier::Shift, KeyCode::Enter)
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<KeyChord>().is_err());
        assert!("ctrl+".parse::<KeyChord>().is_err());
        assert!("hyper+f".parse::<KeyChord>().is_err());
        assert!("pagedown".parse::<KeyChord>().is_err());
    }

    #[test]
    fn test_chord_display_round_trips_through_serde() {
        let chord = KeyChord::primary('f');
        let json = serde_json::to_string(&chord).unwrap();
        assert_eq!(json, "\"primary+f\"");
        let back: KeyChord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, chord);
    }

    #[tokio::test]
    async fn test_type_text_is_per_char_with_soft_breaks() {
        let (backend, log) = RecordingBackend::new(1920, 1080);
        let synth = InputSynthesizer::new(backend, Settle::none());

        synth.type_text("hi\r\nyo", Duration::ZERO).await.unwrap();

        let events = log.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                InputEvent::Text("h".into()),
                InputEvent::Text("i".into()),
                InputEvent::Key(KeyChord::with(Modifier::Shift, KeyCode::Enter)),
                InputEvent::Text("y".into()),
                InputEvent::Text("o".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_key_repeated_and_display_size() {
        let (backend, log) = RecordingBackend::new(2560, 1440);
        let synth = InputSynthesizer::new(backend, Settle::none());

        synth.key_repeated(&KeyChord::key(KeyCode::Escape), 3).await.unwrap();
        assert_eq!(log.lock().unwrap().len(), 3);
        assert_eq!(synth.display_size().await.unwrap(), (2560, 1440));
    }
}
