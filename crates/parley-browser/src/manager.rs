// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Per-session browser lifecycle.
//!
//! Each session owns a virtual display, a Chromium instance pointed at it,
//! a VNC server for the companion frontend, an element map, and an idle
//! timer.  Everything is keyed by session id and torn down top-down from
//! the owning entry, so children never outlive their session.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::elements::{ElementEntry, ElementMap, ElementRef};
use crate::error::BrowserError;

/// Display numbers start here; anything below is assumed to belong to a
/// real X server on the host.
const FIRST_DISPLAY: u32 = 100;
const VNC_PORT_BASE: u16 = 5900;
const SOCKET_POLL_ATTEMPTS: u32 = 40;
const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct BrowserManagerConfig {
    /// Idle TTL; `None` disables eviction.
    pub idle_ttl: Option<Duration>,
    /// Directory for per-session VNC token files.
    pub token_dir: PathBuf,
    /// Explicit Chromium binary; auto-detected when unset.
    pub chrome_executable: Option<PathBuf>,
}

impl Default for BrowserManagerConfig {
    fn default() -> Self {
        Self {
            idle_ttl: Some(Duration::from_secs(900)),
            token_dir: std::env::temp_dir().join("parley-vnc"),
            chrome_executable: None,
        }
    }
}

struct SessionProcs {
    display_proc: Option<Child>,
    vnc_proc: Option<Child>,
    browser: Option<Browser>,
    page: Option<Page>,
    handler_task: Option<JoinHandle<()>>,
}

/// One live browser session and everything it owns.
pub struct BrowserSession {
    pub session_id: String,
    pub display: u32,
    pub vnc_port: u16,
    /// When set, tools attach to this external DevTools endpoint instead of
    /// the locally launched browser.  Sessions sharing an external endpoint
    /// also share its physical cursor; that is a property of the remote
    /// server, not of the per-session isolation here.
    pub ws_endpoint: Option<String>,
    procs: Mutex<SessionProcs>,
    elements: StdMutex<ElementMap>,
    /// CDP session for element-map operations; dropped whenever the map is
    /// cleared because a cross-document navigation resets CDP domain state.
    cdp: StdMutex<Option<Page>>,
    idle_epoch: AtomicU64,
    destroyed: AtomicBool,
    token_file: PathBuf,
}

impl BrowserSession {
    /// The default page, for tools that drive the browser.
    pub async fn page(&self) -> Option<Page> {
        self.procs.lock().await.page.clone()
    }

    pub fn cdp_page(&self) -> Option<Page> {
        self.cdp.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_cdp_page(&self, page: Page) {
        *self.cdp.lock().unwrap_or_else(|e| e.into_inner()) = Some(page);
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Release every owned resource.  Idempotent; every exit path funnels
    /// through here (explicit destroy, idle eviction, browser disconnect,
    /// process shutdown).
    async fn shutdown(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Invalidate any armed idle timer.
        self.idle_epoch.fetch_add(1, Ordering::SeqCst);

        let mut procs = self.procs.lock().await;
        if let Some(task) = procs.handler_task.take() {
            task.abort();
        }
        procs.page = None;
        if let Some(mut browser) = procs.browser.take() {
            let _ = browser.close().await;
            let _ = browser.kill().await;
        }
        if let Some(mut vnc) = procs.vnc_proc.take() {
            let _ = vnc.kill().await;
        }
        if let Some(mut display) = procs.display_proc.take() {
            let _ = display.kill().await;
        }
        drop(procs);

        *self.cdp.lock().unwrap_or_else(|e| e.into_inner()) = None;
        let _ = std::fs::remove_file(&self.token_file);
        info!(
            session = %self.session_id,
            display = self.display,
            "browser session destroyed"
        );
    }
}

/// Process-wide map of live browser sessions.
pub struct BrowserManager {
    sessions: StdMutex<HashMap<String, Arc<BrowserSession>>>,
    /// Serialises session creation: display allocation and the multi-step
    /// spawn sequence must not interleave.
    create_lock: Mutex<()>,
    cfg: BrowserManagerConfig,
}

impl BrowserManager {
    pub fn new(cfg: BrowserManagerConfig) -> Arc<Self> {
        Arc::new(Self {
            sessions: StdMutex::new(HashMap::new()),
            create_lock: Mutex::new(()),
            cfg,
        })
    }

    /// Pure lookup; does not touch the idle timer.
    pub fn get(&self, session_id: &str) -> Option<Arc<BrowserSession>> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(session_id)
            .cloned()
    }

    pub fn active_sessions(&self) -> Vec<String> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Reset the idle timer for a session the caller just used.
    pub fn touch(self: &Arc<Self>, session_id: &str) {
        if let Some(session) = self.get(session_id) {
            self.arm_idle(&session);
        }
    }

    /// Return the session, creating display + browser + VNC on first use.
    pub async fn get_or_create(
        self: &Arc<Self>,
        session_id: &str,
    ) -> Result<Arc<BrowserSession>, BrowserError> {
        if let Some(existing) = self.get(session_id) {
            if !existing.is_destroyed() {
                self.arm_idle(&existing);
                return Ok(existing);
            }
        }
        let _guard = self.create_lock.lock().await;
        // Another caller may have finished creating while we waited.
        if let Some(existing) = self.get(session_id) {
            if !existing.is_destroyed() {
                self.arm_idle(&existing);
                return Ok(existing);
            }
        }

        let display_num = self.allocate_display();
        let vnc_port = VNC_PORT_BASE + display_num as u16;
        info!(session = %session_id, display = display_num, vnc_port, "creating browser session");

        let mut display_proc = spawn_display(display_num)?;
        if let Err(e) = wait_for_display_socket(display_num).await {
            let _ = display_proc.kill().await;
            return Err(e);
        }

        let (browser, page, handler_task) = match self.launch_browser(display_num).await {
            Ok(parts) => parts,
            Err(e) => {
                let _ = display_proc.kill().await;
                return Err(e);
            }
        };

        let vnc_proc = match spawn_vnc(display_num, vnc_port) {
            Ok(child) => child,
            Err(e) => {
                let _ = display_proc.kill().await;
                return Err(e);
            }
        };

        let token_file = self.cfg.token_dir.join(format!("{session_id}.vnc"));
        if let Err(e) = write_token_file(&token_file, vnc_port) {
            warn!(session = %session_id, "failed to write VNC token file: {e}");
        }

        let session = Arc::new(BrowserSession {
            session_id: session_id.to_string(),
            display: display_num,
            vnc_port,
            ws_endpoint: None,
            procs: Mutex::new(SessionProcs {
                display_proc: Some(display_proc),
                vnc_proc: Some(vnc_proc),
                browser: Some(browser),
                page: Some(page),
                handler_task: None,
            }),
            elements: StdMutex::new(ElementMap::default()),
            cdp: StdMutex::new(None),
            idle_epoch: AtomicU64::new(0),
            destroyed: AtomicBool::new(false),
            token_file,
        });
        session.procs.lock().await.handler_task = Some(handler_task);
        self.watch_disconnect(&session);

        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session_id.to_string(), Arc::clone(&session));
        self.arm_idle(&session);
        Ok(session)
    }

    /// Tear down one session.  Safe to call for unknown ids and safe to
    /// call concurrently with itself or the idle timer.
    pub async fn destroy(&self, session_id: &str) {
        let session = self
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id);
        if let Some(session) = session {
            session.shutdown().await;
        }
    }

    pub async fn destroy_all(&self) {
        let sessions: Vec<Arc<BrowserSession>> = {
            let mut map = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            map.drain().map(|(_, s)| s).collect()
        };
        for session in sessions {
            session.shutdown().await;
        }
    }

    // ─── Element map ──────────────────────────────────────────────────────────

    pub fn update_element_map(
        &self,
        session_id: &str,
        entries: HashMap<u32, ElementEntry>,
    ) -> Result<u64, BrowserError> {
        let session = self
            .get(session_id)
            .ok_or_else(|| BrowserError::SessionNotFound(session_id.to_string()))?;
        let version = session
            .elements
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .update(entries);
        Ok(version)
    }

    /// Clear the map and drop the CDP session: after a cross-document
    /// navigation the CDP domain state is reset, so a fresh session must be
    /// created on next use.
    pub fn clear_element_map(&self, session_id: &str) -> Result<u64, BrowserError> {
        let session = self
            .get(session_id)
            .ok_or_else(|| BrowserError::SessionNotFound(session_id.to_string()))?;
        let version = session
            .elements
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        *session.cdp.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(version)
    }

    pub fn resolve_element(
        &self,
        session_id: &str,
        index: u32,
    ) -> Result<ElementRef, BrowserError> {
        let session = self
            .get(session_id)
            .ok_or_else(|| BrowserError::SessionNotFound(session_id.to_string()))?;
        let resolved = session
            .elements
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .resolve(index);
        resolved
    }

    // ─── Internals ────────────────────────────────────────────────────────────

    fn allocate_display(&self) -> u32 {
        let used: HashSet<u32> = self
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|s| !s.is_destroyed())
            .map(|s| s.display)
            .collect();
        smallest_free_display(&used)
    }

    async fn launch_browser(
        &self,
        display: u32,
    ) -> Result<(Browser, Page, JoinHandle<()>), BrowserError> {
        let home = std::env::temp_dir().join(format!("parley-home-{display}"));
        let _ = std::fs::create_dir_all(&home);

        let mut builder = BrowserConfig::builder()
            // Containerised deployments run as root; Chromium refuses to
            // start there without this flag.
            .no_sandbox()
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .envs([
                ("DISPLAY".to_string(), format!(":{display}")),
                ("HOME".to_string(), home.display().to_string()),
            ]);
        if let Some(path) = &self.cfg.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder
            .build()
            .map_err(|e| BrowserError::Other(anyhow::anyhow!(e)))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Other(e.into()))?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("browser handler event error: {e}");
                }
            }
        });
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::Other(e.into()))?;
        Ok((browser, page, handler_task))
    }

    /// When the browser process dies on its own (crash, OOM kill), clean up
    /// the rest of the session rather than leaving orphaned Xvfb and VNC
    /// processes behind.
    fn watch_disconnect(self: &Arc<Self>, session: &Arc<BrowserSession>) {
        let manager = Arc::clone(self);
        let session = Arc::clone(session);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(5)).await;
                if session.is_destroyed() {
                    return;
                }
                let gone = {
                    let procs = session.procs.lock().await;
                    procs
                        .handler_task
                        .as_ref()
                        .is_some_and(|t| t.is_finished())
                };
                if gone {
                    warn!(
                        session = %session.session_id,
                        "browser disconnected; destroying session"
                    );
                    manager.destroy(&session.session_id).await;
                    return;
                }
            }
        });
    }

    fn arm_idle(self: &Arc<Self>, session: &Arc<BrowserSession>) {
        let Some(ttl) = self.cfg.idle_ttl else {
            return;
        };
        let epoch = session.idle_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let manager = Arc::clone(self);
        let session = Arc::clone(session);
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if session.idle_epoch.load(Ordering::SeqCst) == epoch && !session.is_destroyed() {
                info!(session = %session.session_id, "idle TTL expired");
                manager.destroy(&session.session_id).await;
            }
        });
    }

    #[cfg(test)]
    fn insert_stub(self: &Arc<Self>, session_id: &str) -> Arc<BrowserSession> {
        let display = self.allocate_display();
        let session = Arc::new(BrowserSession {
            session_id: session_id.to_string(),
            display,
            vnc_port: VNC_PORT_BASE + display as u16,
            ws_endpoint: None,
            procs: Mutex::new(SessionProcs {
                display_proc: None,
                vnc_proc: None,
                browser: None,
                page: None,
                handler_task: None,
            }),
            elements: StdMutex::new(ElementMap::default()),
            cdp: StdMutex::new(None),
            idle_epoch: AtomicU64::new(0),
            destroyed: AtomicBool::new(false),
            token_file: self.cfg.token_dir.join(format!("{session_id}.vnc")),
        });
        self.sessions
            .lock()
            .unwrap()
            .insert(session_id.to_string(), Arc::clone(&session));
        self.arm_idle(&session);
        session
    }
}

fn smallest_free_display(used: &HashSet<u32>) -> u32 {
    let mut candidate = FIRST_DISPLAY;
    while used.contains(&candidate) {
        candidate += 1;
    }
    candidate
}

fn spawn_display(display: u32) -> Result<Child, BrowserError> {
    Command::new("Xvfb")
        .arg(format!(":{display}"))
        .args(["-screen", "0", "1280x800x24", "-nolisten", "tcp"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| BrowserError::SpawnFailed {
            process: "Xvfb",
            source: e,
        })
}

async fn wait_for_display_socket(display: u32) -> Result<(), BrowserError> {
    let socket = PathBuf::from(format!("/tmp/.X11-unix/X{display}"));
    for _ in 0..SOCKET_POLL_ATTEMPTS {
        if socket.exists() {
            return Ok(());
        }
        tokio::time::sleep(SOCKET_POLL_INTERVAL).await;
    }
    Err(BrowserError::DisplayUnavailable(format!(
        "socket {} did not appear",
        socket.display()
    )))
}

fn spawn_vnc(display: u32, port: u16) -> Result<Child, BrowserError> {
    Command::new("x11vnc")
        .args([
            "-display",
            &format!(":{display}"),
            "-rfbport",
            &port.to_string(),
            "-forever",
            "-shared",
            "-nopw",
            "-quiet",
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| BrowserError::SpawnFailed {
            process: "x11vnc",
            source: e,
        })
}

/// The companion frontend reads this file to find the VNC endpoint.
fn write_token_file(path: &PathBuf, port: u16) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, format!("localhost:{port}"))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(idle_ttl: Option<Duration>) -> Arc<BrowserManager> {
        BrowserManager::new(BrowserManagerConfig {
            idle_ttl,
            token_dir: std::env::temp_dir().join("parley-vnc-test"),
            chrome_executable: None,
        })
    }

    fn entry() -> ElementEntry {
        ElementEntry {
            role: "button".into(),
            name: "Send".into(),
            backend_dom_node_id: 1,
            map_version: 0,
        }
    }

    // ── Display allocation ────────────────────────────────────────────────────

    #[test]
    fn smallest_free_starts_at_base() {
        assert_eq!(smallest_free_display(&HashSet::new()), 100);
    }

    #[test]
    fn smallest_free_skips_used() {
        let used: HashSet<u32> = [100, 101, 103].into_iter().collect();
        assert_eq!(smallest_free_display(&used), 102);
    }

    #[tokio::test]
    async fn stub_sessions_get_distinct_displays_and_ports() {
        let m = manager(None);
        let a = m.insert_stub("a");
        let b = m.insert_stub("b");
        assert_ne!(a.display, b.display);
        assert_ne!(a.vnc_port, b.vnc_port);
        assert_eq!(a.vnc_port, 5900 + a.display as u16);
    }

    #[tokio::test]
    async fn destroyed_display_is_reused() {
        let m = manager(None);
        let a = m.insert_stub("a");
        let first = a.display;
        m.destroy("a").await;
        let b = m.insert_stub("b");
        assert_eq!(b.display, first);
    }

    // ── Isolation ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn element_maps_are_independent() {
        let m = manager(None);
        m.insert_stub("a");
        m.insert_stub("b");
        m.update_element_map("a", HashMap::from([(1, entry())])).unwrap();
        assert!(m.resolve_element("a", 1).is_ok());
        assert!(matches!(
            m.resolve_element("b", 1),
            Err(BrowserError::ElementNotFound(_))
        ));
    }

    #[tokio::test]
    async fn destroying_one_session_leaves_the_other() {
        let m = manager(None);
        m.insert_stub("a");
        m.insert_stub("b");
        m.update_element_map("b", HashMap::from([(1, entry())])).unwrap();
        m.destroy("a").await;
        assert!(m.get("a").is_none());
        assert!(m.get("b").is_some());
        assert!(m.resolve_element("b", 1).is_ok());
    }

    #[tokio::test]
    async fn destroy_is_idempotent_and_safe_on_absent() {
        let m = manager(None);
        m.destroy("ghost").await;
        m.insert_stub("a");
        m.destroy("a").await;
        m.destroy("a").await;
        assert!(m.active_sessions().is_empty());
    }

    #[tokio::test]
    async fn destroy_all_empties_the_map() {
        let m = manager(None);
        m.insert_stub("a");
        m.insert_stub("b");
        m.destroy_all().await;
        assert!(m.active_sessions().is_empty());
    }

    // ── Element map lifecycle ─────────────────────────────────────────────────

    #[tokio::test]
    async fn clear_bumps_version_and_drops_cdp() {
        let m = manager(None);
        let s = m.insert_stub("a");
        let v1 = m
            .update_element_map("a", HashMap::from([(1, entry())]))
            .unwrap();
        let v2 = m.clear_element_map("a").unwrap();
        assert!(v2 > v1);
        assert!(s.cdp_page().is_none());
        assert!(matches!(
            m.resolve_element("a", 1),
            Err(BrowserError::ElementNotFound(_))
        ));
    }

    #[tokio::test]
    async fn element_ops_on_unknown_session_fail() {
        let m = manager(None);
        assert!(matches!(
            m.update_element_map("nope", HashMap::new()),
            Err(BrowserError::SessionNotFound(_))
        ));
    }

    // ── Idle eviction ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn idle_session_is_destroyed_after_ttl() {
        let m = manager(Some(Duration::from_millis(30)));
        m.insert_stub("a");
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(m.get("a").is_none());
    }

    #[tokio::test]
    async fn touched_session_survives() {
        let m = manager(Some(Duration::from_millis(60)));
        m.insert_stub("a");
        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            m.touch("a");
        }
        assert!(m.get("a").is_some());
        // Once touching stops, the TTL wins.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(m.get("a").is_none());
    }

    #[tokio::test]
    async fn disabled_ttl_never_evicts() {
        let m = manager(None);
        m.insert_stub("a");
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(m.get("a").is_some());
    }
}
