//! Process/Window Locator - is the target installed, running, on screen?
//!
//! Absence is the normal case here, so every query answers with an
//! `Option`/`bool` instead of an error. OS access goes through
//! [`DesktopBackend`] so the orchestrator can be driven against a scripted
//! desktop in tests.

use crate::cache::PathCache;
use crate::target::TargetAppDescriptor;
use glob::{MatchOptions, Pattern};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub exe: Option<PathBuf>,
}

/// A top-level window as reported by the OS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowHandle {
    pub id: u32,
    pub pid: u32,
    pub title: String,
    pub app_name: String,
    pub minimized: bool,
    /// Screen-space `(x, y, width, height)` when the OS reports it.
    pub bounds: Option<(i32, i32, u32, u32)>,
}

impl WindowHandle {
    /// Point inside the title bar, used to raise the window with a click.
    pub fn title_bar_point(&self) -> Option<crate::geometry::Point> {
        let (x, y, w, h) = self.bounds?;
        if w == 0 || h == 0 {
            return None;
        }
        Some(crate::geometry::Point::new(
            x.saturating_add((w / 2) as i32),
            y.saturating_add(h.min(24) as i32 / 2),
        ))
    }

    fn belongs_to(&self, desc: &TargetAppDescriptor) -> bool {
        desc.matches_title(&self.title) || desc.matches_title(&self.app_name)
    }
}

/// Operating-system surface the locator needs.
pub trait DesktopBackend: Send + Sync {
    fn processes(&self) -> Vec<ProcessInfo>;
    /// Top-level windows, frontmost first.
    fn windows(&self) -> Vec<WindowHandle>;
    fn expand_glob(&self, pattern: &str) -> Vec<PathBuf>;
    fn path_exists(&self, path: &Path) -> bool;
    fn spawn(&self, program: &Path) -> std::io::Result<()>;
}

/// sysinfo for processes, xcap for windows, glob for install paths.
#[derive(Debug, Default)]
pub struct NativeDesktop;

impl DesktopBackend for NativeDesktop {
    fn processes(&self) -> Vec<ProcessInfo> {
        let mut system = System::new();
        system.refresh_processes_specifics(ProcessesToUpdate::All, ProcessRefreshKind::everything());

        system
            .processes()
            .iter()
            .map(|(pid, process)| ProcessInfo {
                pid: pid.as_u32(),
                name: process.name().to_string_lossy().into_owned(),
                exe: process.exe().map(Path::to_path_buf),
            })
            .collect()
    }

    fn windows(&self) -> Vec<WindowHandle> {
        let windows = match xcap::Window::all() {
            Ok(windows) => windows,
            Err(e) => {
                log::warn!("[locator] Window enumeration failed: {}", e);
                return Vec::new();
            }
        };

        windows
            .iter()
            .map(|w| {
                let bounds = match (w.x(), w.y(), w.width(), w.height()) {
                    (Ok(x), Ok(y), Ok(width), Ok(height)) => Some((x, y, width, height)),
                    _ => None,
                };
                WindowHandle {
                    id: w.id().unwrap_or_default(),
                    pid: w.pid().unwrap_or_default(),
                    title: w.title().unwrap_or_default(),
                    app_name: w.app_name().unwrap_or_default(),
                    minimized: w.is_minimized().unwrap_or(false),
                    bounds,
                }
            })
            .collect()
    }

    fn expand_glob(&self, pattern: &str) -> Vec<PathBuf> {
        let expanded = expand_home(pattern);
        match glob::glob(&expanded) {
            Ok(paths) => paths.filter_map(Result::ok).collect(),
            Err(e) => {
                log::warn!("[locator] Bad install pattern {}: {}", pattern, e);
                Vec::new()
            }
        }
    }

    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn spawn(&self, program: &Path) -> std::io::Result<()> {
        let mut command = if cfg!(target_os = "macos")
            && program.extension().is_some_and(|ext| ext == "app")
        {
            let mut open = std::process::Command::new("open");
            open.arg(program);
            open
        } else {
            std::process::Command::new(program)
        };

        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map(|_| ())
    }
}

fn expand_home(pattern: &str) -> String {
    match (pattern.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest).to_string_lossy().into_owned(),
        _ => pattern.to_string(),
    }
}

fn name_matches(pattern: &str, candidate: &str) -> bool {
    let options = MatchOptions {
        case_sensitive: false,
        require_literal_separator: false,
        require_literal_leading_dot: false,
    };
    match Pattern::new(pattern) {
        Ok(p) => p.matches_with(candidate, options),
        Err(_) => pattern.eq_ignore_ascii_case(candidate),
    }
}

fn process_matches(desc: &TargetAppDescriptor, process: &ProcessInfo) -> bool {
    let exe_name = process
        .exe
        .as_deref()
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().into_owned());

    desc.process_patterns.iter().any(|pattern| {
        name_matches(pattern, &process.name)
            || exe_name.as_deref().is_some_and(|exe| name_matches(pattern, exe))
    })
}

pub struct AppLocator {
    backend: Box<dyn DesktopBackend>,
    cache: Option<PathCache>,
    /// Install path resolved earlier in this process; dropped on launch failure.
    session_install: Option<PathBuf>,
}

impl AppLocator {
    pub fn new(backend: impl DesktopBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            cache: None,
            session_install: None,
        }
    }

    pub fn with_cache(mut self, cache: PathCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Resolve the install path, remembering it for this session and on disk.
    pub fn locate_installation(&mut self, desc: &TargetAppDescriptor) -> Option<PathBuf> {
        if let Some(path) = self.session_install.clone() {
            if self.backend.path_exists(&path) {
                return Some(path);
            }
            log::info!("[locator] Cached path {} vanished, searching again", path.display());
            self.session_install = None;
        }

        if let Some(path) = self.persisted_installation(desc) {
            if self.backend.path_exists(&path) {
                log::info!("[locator] Using persisted path: {}", path.display());
                self.session_install = Some(path.clone());
                return Some(path);
            }
            self.forget_persisted(desc);
        }

        let found = self.find_installation(desc)?;
        log::info!("[locator] Found {} at {}", desc.name, found.display());
        self.session_install = Some(found.clone());
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.put(&desc.cache_key(), &found) {
                log::warn!("[locator] Could not persist install path: {}", e);
            }
        }
        Some(found)
    }

    /// Uncached search: candidate globs in order, then a running process's executable.
    pub fn find_installation(&self, desc: &TargetAppDescriptor) -> Option<PathBuf> {
        for pattern in &desc.install_globs {
            if let Some(path) = self.backend.expand_glob(pattern).into_iter().next() {
                return Some(path);
            }
        }

        self.running_process(desc)
            .and_then(|p| p.exe)
            .filter(|exe| self.backend.path_exists(exe))
    }

    /// Best known install path without touching any cache.
    pub fn peek_installation(&self, desc: &TargetAppDescriptor) -> Option<PathBuf> {
        self.session_install
            .clone()
            .filter(|p| self.backend.path_exists(p))
            .or_else(|| self.persisted_installation(desc).filter(|p| self.backend.path_exists(p)))
            .or_else(|| self.find_installation(desc))
    }

    /// Drop every remembered install path for `desc`.
    pub fn invalidate(&mut self, desc: &TargetAppDescriptor) {
        self.session_install = None;
        self.forget_persisted(desc);
    }

    /// Path stored in the persisted cache, if any.
    pub fn persisted_installation(&self, desc: &TargetAppDescriptor) -> Option<PathBuf> {
        let cache = self.cache.as_ref()?;
        match cache.get(&desc.cache_key()) {
            Ok(path) => path,
            Err(e) => {
                log::warn!("[locator] Path cache read failed: {}", e);
                None
            }
        }
    }

    fn forget_persisted(&self, desc: &TargetAppDescriptor) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.invalidate(&desc.cache_key()) {
                log::warn!("[locator] Path cache invalidation failed: {}", e);
            }
        }
    }

    pub fn running_process(&self, desc: &TargetAppDescriptor) -> Option<ProcessInfo> {
        self.backend
            .processes()
            .into_iter()
            .find(|p| process_matches(desc, p))
    }

    pub fn is_running(&self, desc: &TargetAppDescriptor) -> bool {
        self.running_process(desc).is_some()
    }

    /// First visible (non-minimised) window belonging to the target.
    pub fn find_window(&self, desc: &TargetAppDescriptor) -> Option<WindowHandle> {
        self.backend
            .windows()
            .into_iter()
            .find(|w| !w.minimized && w.belongs_to(desc))
    }

    /// Whether the frontmost visible window is the target's.
    /// `None` when the OS reported no windows at all.
    pub fn frontmost_is_target(&self, desc: &TargetAppDescriptor) -> Option<bool> {
        let windows = self.backend.windows();
        if windows.is_empty() {
            return None;
        }
        Some(
            windows
                .iter()
                .find(|w| !w.minimized && !w.title.trim().is_empty())
                .is_some_and(|w| w.belongs_to(desc)),
        )
    }

    pub fn spawn(&self, program: &Path) -> std::io::Result<()> {
        log::info!("[locator] Launching {}", program.display());
        self.backend.spawn(program)
    }

    /// Re-check `condition` every `interval` until it holds or `timeout` passes.
    /// A zero interval checks exactly once.
    pub async fn poll_until<F>(&self, timeout: Duration, interval: Duration, mut condition: F) -> bool
    where
        F: FnMut(&Self) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if condition(self) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline || interval.is_zero() {
                return false;
            }
            tokio::time::sleep(interval.min(deadline - now)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDesktop;

    fn desc() -> TargetAppDescriptor {
        TargetAppDescriptor {
            name: "Chatty".into(),
            install_globs: vec!["/opt/chatty-*/chatty".into(), "/usr/bin/chatty".into()],
            process_patterns: vec!["chatty*".into()],
            window_titles: vec!["chatty".into()],
        }
    }

    #[test]
    fn test_first_matching_glob_wins() {
        let desktop = FakeDesktop::new();
        desktop.add_file("/usr/bin/chatty");
        desktop.add_file("/opt/chatty-2/chatty");
        let mut locator = AppLocator::new(desktop.clone());

        assert_eq!(locator.locate_installation(&desc()), Some(PathBuf::from("/opt/chatty-2/chatty")));
    }

    #[test]
    fn test_not_found_is_none() {
        let mut locator = AppLocator::new(FakeDesktop::new());
        assert_eq!(locator.locate_installation(&desc()), None);
        assert!(!locator.is_running(&desc()));
        assert!(locator.find_window(&desc()).is_none());
    }

    #[test]
    fn test_running_process_exe_is_last_resort() {
        let desktop = FakeDesktop::new();
        desktop.add_file("/home/u/apps/Chatty");
        desktop.add_process(41, "Chatty-Helper", Some("/home/u/apps/Chatty"));
        let locator = AppLocator::new(desktop);

        assert!(locator.is_running(&desc()));
        assert_eq!(locator.find_installation(&desc()), Some(PathBuf::from("/home/u/apps/Chatty")));
    }

    #[test]
    fn test_process_matches_exe_file_name() {
        let desktop = FakeDesktop::new();
        desktop.add_process(7, "electron", Some("/opt/x/CHATTY.bin"));
        let locator = AppLocator::new(desktop);
        assert_eq!(locator.running_process(&desc()).map(|p| p.pid), Some(7));
    }

    #[test]
    fn test_session_cache_dropped_when_path_vanishes() {
        let desktop = FakeDesktop::new();
        desktop.add_file("/usr/bin/chatty");
        let mut locator = AppLocator::new(desktop.clone());
        assert!(locator.locate_installation(&desc()).is_some());

        desktop.remove_file("/usr/bin/chatty");
        desktop.add_file("/opt/chatty-9/chatty");
        assert_eq!(locator.locate_installation(&desc()), Some(PathBuf::from("/opt/chatty-9/chatty")));
    }

    #[test]
    fn test_persisted_cache_used_and_invalidated() {
        let desktop = FakeDesktop::new();
        desktop.add_file("/custom/chatty");
        let cache = PathCache::open_in_memory().unwrap();
        cache.put("chatty", Path::new("/custom/chatty")).unwrap();
        let mut locator = AppLocator::new(desktop).with_cache(cache);

        assert_eq!(locator.locate_installation(&desc()), Some(PathBuf::from("/custom/chatty")));

        locator.invalidate(&desc());
        assert_eq!(locator.locate_installation(&desc()), None);
    }

    #[test]
    fn test_minimised_windows_are_not_visible() {
        let desktop = FakeDesktop::new();
        desktop.add_window("Chatty", true);
        let locator = AppLocator::new(desktop.clone());
        assert!(locator.find_window(&desc()).is_none());

        desktop.add_window("chatty - main", false);
        assert_eq!(locator.find_window(&desc()).map(|w| w.title), Some("chatty - main".into()));
    }

    #[test]
    fn test_frontmost_detection() {
        let desktop = FakeDesktop::new();
        let locator = AppLocator::new(desktop.clone());
        assert_eq!(locator.frontmost_is_target(&desc()), None);

        desktop.add_window("Terminal", false);
        desktop.add_window("Chatty", false);
        assert_eq!(locator.frontmost_is_target(&desc()), Some(false));

        desktop.raise_window("Chatty");
        assert_eq!(locator.frontmost_is_target(&desc()), Some(true));
    }

    #[test]
    fn test_title_bar_point() {
        let handle = WindowHandle {
            id: 1,
            pid: 1,
            title: "Chatty".into(),
            app_name: String::new(),
            minimized: false,
            bounds: Some((100, 50, 800, 600)),
        };
        assert_eq!(handle.title_bar_point(), Some(crate::geometry::Point::new(500, 62)));
    }

    #[tokio::test]
    async fn test_poll_until_times_out() {
        let locator = AppLocator::new(FakeDesktop::new());
        let mut calls = 0;
        let ok = locator
            .poll_until(Duration::from_millis(30), Duration::from_millis(5), |_| {
                calls += 1;
                false
            })
            .await;
        assert!(!ok);
        assert!(calls >= 2);
    }

    #[tokio::test]
    async fn test_poll_until_zero_interval_checks_once() {
        let locator = AppLocator::new(FakeDesktop::new());
        let mut calls = 0;
        let ok = locator
            .poll_until(Duration::from_secs(5), Duration::ZERO, |_| {
                calls += 1;
                false
            })
            .await;
        assert!(!ok);
        assert_eq!(calls, 1);
    }
}
