//! Fakes for driving the crate without a real desktop.

use crate::drive::probe::{Readback, SENTINEL};
use crate::geometry::Point;
use crate::input::{InputBackend, InputError, KeyChord, KeyCode, Modifier};
use crate::intervention::{InterventionChannel, InterventionReply, InterventionRequest};
use crate::locator::{DesktopBackend, ProcessInfo, WindowHandle};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Click(Point),
    Key(KeyChord),
    Text(String),
}

pub type EventLog = Arc<Mutex<Vec<InputEvent>>>;

pub struct RecordingBackend {
    events: EventLog,
    size: (u32, u32),
}

impl RecordingBackend {
    pub fn new(width: u32, height: u32) -> (Self, EventLog) {
        let events = EventLog::default();
        (
            Self {
                events: Arc::clone(&events),
                size: (width, height),
            },
            events,
        )
    }

    fn push(&self, event: InputEvent) -> Result<(), InputError> {
        self.events
            .lock()
            .map_err(|_| InputError::Task("event log poisoned".into()))?
            .push(event);
        Ok(())
    }
}

impl InputBackend for RecordingBackend {
    fn click(&mut self, at: Point) -> Result<(), InputError> {
        self.push(InputEvent::Click(at))
    }

    fn key(&mut self, chord: &KeyChord) -> Result<(), InputError> {
        self.push(InputEvent::Key(chord.clone()))
    }

    fn text(&mut self, text: &str) -> Result<(), InputError> {
        self.push(InputEvent::Text(text.to_string()))
    }

    fn display_size(&mut self) -> Result<(u32, u32), InputError> {
        Ok(self.size)
    }
}

/// Text typed into the field just before the latest select-all/copy.
pub fn typed_before_copy(events: &[InputEvent]) -> Option<String> {
    let selection_keys = [
        KeyChord::primary('a'),
        KeyChord::primary('c'),
        KeyChord::key(KeyCode::End),
    ];
    let soft_break = KeyChord::with(Modifier::Shift, KeyCode::Enter);

    let mut rest = events
        .iter()
        .rev()
        .skip_while(|e| matches!(e, InputEvent::Key(k) if selection_keys.contains(k)))
        .peekable();

    let mut chunks = Vec::new();
    while let Some(event) = rest.peek() {
        match event {
            InputEvent::Text(t) => chunks.push(t.clone()),
            InputEvent::Key(k) if *k == soft_break => chunks.push("\n".to_string()),
            _ => break,
        }
        rest.next();
    }

    if chunks.is_empty() {
        return None;
    }
    chunks.reverse();
    Some(chunks.concat())
}

/// What the field yields on the next probe copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Echo {
    /// Whatever was typed just before the copy (a cooperative field).
    Typed,
    /// Some other text in front of what was typed, e.g. a search query.
    WithPrefix(String),
    /// Copy produced nothing; the sentinel survives.
    Nothing,
    Text(String),
}

#[derive(Default)]
struct ReadbackState {
    clipboard: Option<String>,
    script: VecDeque<Echo>,
    probes: usize,
}

/// Clipboard fake. A read while the sentinel is in place is a probe read
/// and answers from the script; `Echo::Typed` once the script runs out.
#[derive(Clone)]
pub struct ScriptedReadback {
    state: Arc<Mutex<ReadbackState>>,
    events: EventLog,
}

impl ScriptedReadback {
    pub fn new(events: EventLog) -> Self {
        Self {
            state: Arc::default(),
            events,
        }
    }

    pub fn then(self, echo: Echo) -> Self {
        self.state.lock().unwrap().script.push_back(echo);
        self
    }

    pub fn set_clipboard(&self, text: &str) {
        self.state.lock().unwrap().clipboard = Some(text.to_string());
    }

    pub fn clipboard(&self) -> Option<String> {
        self.state.lock().unwrap().clipboard.clone()
    }

    pub fn probe_count(&self) -> usize {
        self.state.lock().unwrap().probes
    }
}

impl Readback for ScriptedReadback {
    fn read(&self) -> anyhow::Result<Option<String>> {
        let mut state = self.state.lock().map_err(|_| anyhow::anyhow!("poisoned"))?;
        if state.clipboard.as_deref() != Some(SENTINEL) {
            return Ok(state.clipboard.clone());
        }

        state.probes += 1;
        let typed = {
            let events = self.events.lock().map_err(|_| anyhow::anyhow!("poisoned"))?;
            typed_before_copy(&events)
        };
        let echo = state.script.pop_front().unwrap_or(Echo::Typed);
        let copied = match echo {
            Echo::Typed => typed,
            Echo::WithPrefix(prefix) => Some(format!("{}{}", prefix, typed.unwrap_or_default())),
            Echo::Nothing => None,
            Echo::Text(text) => Some(text),
        };
        Ok(Some(copied.unwrap_or_else(|| SENTINEL.to_string())))
    }

    fn write(&self, text: &str) -> anyhow::Result<()> {
        self.state.lock().map_err(|_| anyhow::anyhow!("poisoned"))?.clipboard = Some(text.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct DesktopState {
    files: Vec<PathBuf>,
    processes: Vec<ProcessInfo>,
    /// Front to back.
    windows: Vec<WindowHandle>,
    spawned: Vec<PathBuf>,
    /// Process name and window title a successful spawn brings up.
    on_spawn: Option<(String, String)>,
    spawn_fails: bool,
}

/// Scriptable desktop. Clones share state, so tests keep a handle after
/// moving one into the locator.
#[derive(Clone, Default)]
pub struct FakeDesktop {
    state: Arc<Mutex<DesktopState>>,
}

impl FakeDesktop {
    pub fn new() -> Self {
        Self::default()
    }

    /// An installed, launchable app: spawning `path` starts `process` and opens `title`.
    pub fn installed(path: &str, process: &str, title: &str) -> Self {
        let desktop = Self::new();
        desktop.add_file(path);
        desktop.state.lock().unwrap().on_spawn = Some((process.to_string(), title.to_string()));
        desktop
    }

    pub fn add_file(&self, path: &str) {
        self.state.lock().unwrap().files.push(PathBuf::from(path));
    }

    pub fn remove_file(&self, path: &str) {
        self.state.lock().unwrap().files.retain(|p| p != Path::new(path));
    }

    pub fn add_process(&self, pid: u32, name: &str, exe: Option<&str>) {
        self.state.lock().unwrap().processes.push(ProcessInfo {
            pid,
            name: name.to_string(),
            exe: exe.map(PathBuf::from),
        });
    }

    /// Appended behind every existing window.
    pub fn add_window(&self, title: &str, minimized: bool) {
        let mut state = self.state.lock().unwrap();
        let id = state.windows.len() as u32 + 1;
        state.windows.push(WindowHandle {
            id,
            pid: 0,
            title: title.to_string(),
            app_name: String::new(),
            minimized,
            bounds: Some((0, 0, 1920, 1080)),
        });
    }

    pub fn raise_window(&self, title: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(index) = state.windows.iter().position(|w| w.title == title) {
            let window = state.windows.remove(index);
            state.windows.insert(0, window);
        }
    }

    pub fn fail_spawns(&self) {
        self.state.lock().unwrap().spawn_fails = true;
    }

    pub fn spawned(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().spawned.clone()
    }
}

impl DesktopBackend for FakeDesktop {
    fn processes(&self) -> Vec<ProcessInfo> {
        self.state.lock().unwrap().processes.clone()
    }

    fn windows(&self) -> Vec<WindowHandle> {
        self.state.lock().unwrap().windows.clone()
    }

    fn expand_glob(&self, pattern: &str) -> Vec<PathBuf> {
        let Ok(pattern) = glob::Pattern::new(pattern) else {
            return Vec::new();
        };
        self.state
            .lock()
            .unwrap()
            .files
            .iter()
            .filter(|p| pattern.matches_path(p))
            .cloned()
            .collect()
    }

    fn path_exists(&self, path: &Path) -> bool {
        self.state.lock().unwrap().files.iter().any(|p| p == path)
    }

    fn spawn(&self, program: &Path) -> std::io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.spawned.push(program.to_path_buf());
        if state.spawn_fails {
            return Err(std::io::Error::new(std::io::ErrorKind::NotFound, "spawn refused"));
        }

        if let Some((process, title)) = state.on_spawn.clone() {
            if !state.processes.iter().any(|p| p.name == process) {
                let pid = 1000 + state.processes.len() as u32;
                state.processes.push(ProcessInfo {
                    pid,
                    name: process,
                    exe: Some(program.to_path_buf()),
                });
            }
            if let Some(index) = state.windows.iter().position(|w| w.title == title) {
                let mut window = state.windows.remove(index);
                window.minimized = false;
                state.windows.insert(0, window);
            } else {
                let id = state.windows.len() as u32 + 1;
                state.windows.insert(
                    0,
                    WindowHandle {
                        id,
                        pid: 0,
                        title,
                        app_name: String::new(),
                        minimized: false,
                        bounds: Some((0, 0, 1920, 1080)),
                    },
                );
            }
        }
        Ok(())
    }
}

/// Replies from a queue (declining once empty) and records every request.
#[derive(Clone, Default)]
pub struct ScriptedIntervention {
    replies: Arc<Mutex<VecDeque<InterventionReply>>>,
    requests: Arc<Mutex<Vec<InterventionRequest>>>,
    /// Never answer; exercises the caller's timeout.
    hang: bool,
}

impl ScriptedIntervention {
    pub fn replying(replies: &[InterventionReply]) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies.iter().copied().collect())),
            ..Self::default()
        }
    }

    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<InterventionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl InterventionChannel for ScriptedIntervention {
    async fn request(&self, request: &InterventionRequest) -> InterventionReply {
        self.requests.lock().unwrap().push(request.clone());
        if self.hang {
            std::future::pending::<()>().await;
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(InterventionReply::Declined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_before_copy() {
        let events = vec![
            InputEvent::Key(KeyChord::key(KeyCode::Enter)),
            InputEvent::Text("h".into()),
            InputEvent::Key(KeyChord::with(Modifier::Shift, KeyCode::Enter)),
            InputEvent::Text("i".into()),
            InputEvent::Key(KeyChord::primary('a')),
            InputEvent::Key(KeyChord::primary('c')),
        ];
        assert_eq!(typed_before_copy(&events), Some("h\ni".to_string()));

        let after_send = vec![
            InputEvent::Text("hi".into()),
            InputEvent::Key(KeyChord::key(KeyCode::Enter)),
            InputEvent::Key(KeyChord::primary('a')),
            InputEvent::Key(KeyChord::primary('c')),
        ];
        assert_eq!(typed_before_copy(&after_send), None);
    }
}
