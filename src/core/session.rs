//! Isolated KWin Wayland session lifecycle
//!
//! A session is a private bus (`dbus-run-session`) running a small bash
//! wrapper that starts the accessibility bus and `kwin_wayland --virtual`.
//! Everything runs in one process group led by the launcher, so teardown is
//! a signal to the group.
//!
//! Startup is complete once the Wayland socket exists under the runtime dir
//! and the wrapper has printed `READY`. Both waits are bounded.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::{SessionConfig, SessionOptions};
use crate::core::environment::{HOST_DISPLAY_VARS, SessionEnv};
use crate::error::{Error, Result};

const BUS_ADDRESS_PREFIX: &str = "DBUS_SESSION_BUS_ADDRESS=";
const READY_MARKER: &str = "READY";
const SOCKET_POLL: Duration = Duration::from_millis(100);
const EXIT_POLL: Duration = Duration::from_millis(50);
/// Captured wrapper output kept for diagnostics
const MAX_CAPTURE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Connection details of a running session
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub dbus_address: String,
    pub wayland_socket: String,
    /// Launcher pid, which is also the process group id
    pub compositor_pid: u32,
    pub screen_width: u32,
    pub screen_height: u32,
    pub log_dir: PathBuf,
}

/// An application started inside the session
#[derive(Debug, Clone, Serialize)]
pub struct LaunchedApp {
    pub pid: u32,
    pub command: Vec<String>,
    pub log_path: PathBuf,
}

pub struct Session {
    options: SessionOptions,
    state: SessionState,
    child: Option<Child>,
    socket_name: String,
    info: Option<SessionInfo>,
    enable_clipboard: bool,
    output: Arc<Mutex<String>>,
    apps: BTreeMap<u32, LaunchedApp>,
    app_children: Vec<Child>,
}

impl Session {
    pub fn new(options: SessionOptions) -> Self {
        Self {
            options,
            state: SessionState::Stopped,
            child: None,
            socket_name: String::new(),
            info: None,
            enable_clipboard: false,
            output: Arc::new(Mutex::new(String::new())),
            apps: BTreeMap::new(),
            app_children: Vec::new(),
        }
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn info(&self) -> Option<&SessionInfo> {
        self.info.as_ref()
    }

    pub fn clipboard_enabled(&self) -> bool {
        self.enable_clipboard
    }

    /// Environment overlay for processes that must run inside the session
    pub fn env(&self) -> Result<SessionEnv> {
        let info = self
            .info
            .as_ref()
            .ok_or_else(|| Error::NotRunning("no session is running".into()))?;
        Ok(SessionEnv {
            wayland_display: info.wayland_socket.clone(),
            dbus_address: info.dbus_address.clone(),
        })
    }

    /// Whether the launcher process is still alive
    ///
    /// A session whose launcher died on its own reads as stopped; its leftovers
    /// are reaped by the next [`stop`](Self::stop) or [`start`](Self::start).
    pub fn is_running(&mut self) -> bool {
        let alive = match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        };
        if !alive && self.state == SessionState::Running {
            tracing::warn!(socket = %self.socket_name, "Session exited on its own");
            self.state = SessionState::Stopped;
        }
        alive
    }

    pub fn start(&mut self, config: &SessionConfig) -> Result<SessionInfo> {
        if self.is_running() {
            return Err(Error::Startup {
                message: "session is already running".into(),
                diagnostics: String::new(),
            });
        }
        // A previous session may have died on its own; reap what is left of it
        self.stop();

        let socket_name = if config.socket_name.is_empty() {
            generate_socket_name()
        } else {
            validate_socket_name(&config.socket_name)?;
            config.socket_name.clone()
        };
        remove_socket_artifacts(&self.options.runtime_dir, &socket_name);

        let script = wrapper_script(&socket_name, config, &self.options);
        let (program, launcher_args) = self
            .options
            .launcher
            .split_first()
            .ok_or_else(|| Error::Config("session launcher is empty".into()))?;

        let mut cmd = Command::new(program);
        cmd.args(launcher_args)
            .arg(&script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        for var in HOST_DISPLAY_VARS.iter().chain(&["WAYLAND_DISPLAY"]) {
            cmd.env_remove(var);
        }
        cmd.envs(session_vars())
            .env("XDG_RUNTIME_DIR", &self.options.runtime_dir)
            .envs(&config.extra_env);

        let mut child = cmd.spawn().map_err(|e| Error::Startup {
            message: format!("failed to spawn '{program}': {e}"),
            diagnostics: String::new(),
        })?;
        let pid = child.id();
        tracing::info!(pid, socket = %socket_name, "Starting isolated session");

        self.output = Arc::new(Mutex::new(String::new()));
        let lines = spawn_readers(&mut child, &self.output);
        self.child = Some(child);
        self.socket_name = socket_name.clone();
        self.enable_clipboard = config.enable_clipboard;
        self.state = SessionState::Starting;

        match self.await_ready(&lines, &socket_name) {
            Ok(dbus_address) => {
                let info = SessionInfo {
                    dbus_address,
                    wayland_socket: socket_name,
                    compositor_pid: pid,
                    screen_width: config.screen_width,
                    screen_height: config.screen_height,
                    log_dir: self.options.log_dir.clone(),
                };
                tracing::info!(
                    pid,
                    socket = %info.wayland_socket,
                    bus = %info.dbus_address,
                    "Session ready"
                );
                self.info = Some(info.clone());
                self.state = SessionState::Running;
                Ok(info)
            }
            Err(message) => {
                tracing::warn!(%message, "Session failed to start");
                let output = self.output.clone();
                self.stop();
                let diagnostics = output.lock().clone();
                Err(Error::Startup {
                    message,
                    diagnostics,
                })
            }
        }
    }

    /// Bus address, socket then marker; `Err` carries the reason
    fn await_ready(
        &mut self,
        lines: &Receiver<String>,
        socket_name: &str,
    ) -> std::result::Result<String, String> {
        let socket_timeout = self.options.socket_timeout;
        let deadline = Instant::now() + socket_timeout;

        let dbus_address = match lines.recv_timeout(socket_timeout) {
            Ok(line) => match line.strip_prefix(BUS_ADDRESS_PREFIX) {
                Some(address) => address.trim().to_string(),
                None => {
                    tracing::warn!(%line, "Wrapper did not report a bus address first");
                    String::new()
                }
            },
            Err(RecvTimeoutError::Timeout) => {
                return Err(format!("no output from session wrapper after {socket_timeout:?}"));
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(self.exited_message("before reporting its bus address"));
            }
        };

        let socket = self.options.runtime_dir.join(socket_name);
        loop {
            if socket.exists() {
                break;
            }
            if !self.is_running() {
                return Err(self.exited_message("before the Wayland socket appeared"));
            }
            if Instant::now() >= deadline {
                return Err(format!(
                    "Wayland socket {} did not appear within {socket_timeout:?}",
                    socket.display()
                ));
            }
            std::thread::sleep(SOCKET_POLL);
        }

        let ready_timeout = self.options.ready_timeout;
        let deadline = Instant::now() + ready_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match lines.recv_timeout(remaining) {
                Ok(line) if line.trim() == READY_MARKER => return Ok(dbus_address),
                Ok(line) => tracing::debug!(%line, "Wrapper output"),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(format!("no {READY_MARKER} marker within {ready_timeout:?}"));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(self.exited_message("before signalling readiness"));
                }
            }
        }
    }

    fn exited_message(&mut self, when: &str) -> String {
        let status = self.child.as_mut().and_then(|c| c.try_wait().ok().flatten());
        match status {
            Some(status) => format!("session wrapper exited ({status}) {when}"),
            None => format!("session wrapper closed its output {when}"),
        }
    }

    /// Start `command` inside the session's display, bus and process group
    pub fn launch(
        &mut self,
        command: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<LaunchedApp> {
        if !self.is_running() {
            return Err(Error::NotRunning("no session is running".into()));
        }
        let (program, args) = command
            .split_first()
            .ok_or_else(|| Error::Config("command must not be empty".into()))?;
        let session_env = self.env()?;
        let pgid = self.info.as_ref().map(|i| i.compositor_pid).unwrap_or_default();

        std::fs::create_dir_all(&self.options.log_dir)?;
        let pending = self
            .options
            .log_dir
            .join(format!("app-pending-{}.log", uuid::Uuid::new_v4().simple()));
        let log = File::create(&pending)?;
        let log_err = log.try_clone()?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(log)
            .stderr(log_err)
            .process_group(pgid as i32);
        session_env.apply(&mut cmd);
        cmd.envs(env);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let _ = std::fs::remove_file(&pending);
                return Err(Error::Io(e));
            }
        };
        let pid = child.id();
        let log_path = self.options.log_dir.join(format!("app-{pid}.log"));
        std::fs::rename(&pending, &log_path)?;

        tracing::info!(pid, command = %command.join(" "), log = %log_path.display(), "Launched app");
        let app = LaunchedApp {
            pid,
            command: command.to_vec(),
            log_path,
        };
        self.apps.insert(pid, app.clone());
        self.app_children.push(child);
        Ok(app)
    }

    /// Captured stdout and stderr of a launched app
    pub fn app_log(&self, pid: u32) -> Result<String> {
        let app = self
            .apps
            .get(&pid)
            .ok_or_else(|| Error::NotRunning(format!("no app with pid {pid} was launched in this session")))?;
        let bytes = std::fs::read(&app.log_path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Terminate the whole process group; a no-op when nothing is running
    pub fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            self.state = SessionState::Stopped;
            return;
        };
        self.state = SessionState::Stopping;
        let pgid = Pid::from_raw(child.id() as i32);
        tracing::info!(pgid = pgid.as_raw(), "Stopping session");

        let _ = killpg(pgid, Signal::SIGTERM);
        if !wait_exit(&mut child, self.options.stop_grace) {
            tracing::warn!(pgid = pgid.as_raw(), "Session ignored SIGTERM, killing");
            let _ = killpg(pgid, Signal::SIGKILL);
            let _ = child.kill();
            wait_exit(&mut child, self.options.kill_wait);
        }
        // Launched apps are our children and stay zombies until reaped
        for mut app in self.app_children.drain(..) {
            if !wait_exit(&mut app, EXIT_POLL * 4) {
                let _ = app.kill();
                let _ = app.wait();
            }
        }
        if !wait_group_gone(pgid, self.options.kill_wait) {
            let _ = killpg(pgid, Signal::SIGKILL);
            wait_group_gone(pgid, self.options.kill_wait);
        }

        remove_socket_artifacts(&self.options.runtime_dir, &self.socket_name);
        self.apps.clear();
        self.info = None;
        self.state = SessionState::Stopped;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Variables marking the session as a KDE Wayland session
fn session_vars() -> [(&'static str, &'static str); 6] {
    [
        ("KDE_FULL_SESSION", "true"),
        ("KDE_SESSION_VERSION", "6"),
        ("XDG_SESSION_TYPE", "wayland"),
        ("XDG_CURRENT_DESKTOP", "KDE"),
        ("QT_LINUX_ACCESSIBILITY_ALWAYS_ON", "1"),
        ("QT_ACCESSIBILITY", "1"),
    ]
}

fn generate_socket_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("wayland-mcp-{}-{}", std::process::id(), &id[..8])
}

/// Socket names are spliced into the wrapper script
fn validate_socket_name(name: &str) -> Result<()> {
    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid && !name.starts_with('.') {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "invalid socket name '{name}': use letters, digits, '-', '_' and '.'"
        )))
    }
}

fn remove_socket_artifacts(runtime_dir: &Path, socket_name: &str) {
    if socket_name.is_empty() {
        return;
    }
    for suffix in ["", ".lock"] {
        let path = runtime_dir.join(format!("{socket_name}{suffix}"));
        if std::fs::remove_file(&path).is_ok() {
            tracing::debug!(path = %path.display(), "Removed socket artifact");
        }
    }
}

/// Bash run inside the private bus
///
/// The activation environment is updated before the compositor starts so
/// that bus-activated services (portals) inherit the virtual display.
pub(crate) fn wrapper_script(socket: &str, config: &SessionConfig, options: &SessionOptions) -> String {
    format!(
        r#"echo "DBUS_SESSION_BUS_ADDRESS=$DBUS_SESSION_BUS_ADDRESS"

cleanup() {{
    kill $KWIN_PID $AT_SPI_PID 2>/dev/null
    wait $KWIN_PID $AT_SPI_PID 2>/dev/null
}}
trap cleanup EXIT TERM INT HUP

{a11y} --launch-immediately &
AT_SPI_PID=$!

dbus-update-activation-environment WAYLAND_DISPLAY={socket} QT_QPA_PLATFORM=wayland

env -u WAYLAND_DISPLAY -u QT_QPA_PLATFORM \
    {compositor} --virtual --no-lockscreen --socket {socket} --width {width} --height {height} &
KWIN_PID=$!

while [ ! -e "$XDG_RUNTIME_DIR/{socket}" ]; do
    kill -0 $KWIN_PID 2>/dev/null || exit 1
    sleep 0.1
done
sleep 0.3

echo "{READY_MARKER}"

wait $KWIN_PID
"#,
        a11y = options.accessibility_bus,
        compositor = options.compositor,
        width = config.screen_width,
        height = config.screen_height,
    )
}

/// Line-split stdout onto a channel, and mirror both streams into `output`
fn spawn_readers(child: &mut Child, output: &Arc<Mutex<String>>) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    if let Some(stdout) = child.stdout.take() {
        let output = output.clone();
        std::thread::spawn(move || {
            for line in BufReader::new(stdout).lines().map_while(|l| l.ok()) {
                append_capped(&mut output.lock(), &line);
                // The receiver goes away once startup is done
                let _ = tx.send(line);
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        let output = output.clone();
        std::thread::spawn(move || {
            for line in BufReader::new(stderr).lines().map_while(|l| l.ok()) {
                append_capped(&mut output.lock(), &line);
            }
        });
    }
    rx
}

fn append_capped(buf: &mut String, line: &str) {
    buf.push_str(line);
    buf.push('\n');
    if buf.len() > MAX_CAPTURE {
        let mut cut = buf.len() - MAX_CAPTURE;
        while !buf.is_char_boundary(cut) {
            cut += 1;
        }
        buf.drain(..cut);
    }
}

fn wait_exit(child: &mut Child, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(_)) | Err(_) => return true,
            Ok(None) if Instant::now() >= deadline => return false,
            Ok(None) => std::thread::sleep(EXIT_POLL),
        }
    }
}

/// Poll until no process is left in `pgid`
fn wait_group_gone(pgid: Pid, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if killpg(pgid, None).is_err() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(EXIT_POLL);
    }
}
