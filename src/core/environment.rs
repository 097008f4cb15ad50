//! Environment handed to processes that must land inside the isolated session

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Host display variables that must never leak into session processes
pub const HOST_DISPLAY_VARS: &[&str] = &["DISPLAY", "WAYLAND_SOCKET"];

/// Overlay pointing a process at the virtual display and the private bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEnv {
    pub wayland_display: String,
    pub dbus_address: String,
}

impl SessionEnv {
    pub fn overlay(&self) -> Vec<(&'static str, String)> {
        let mut vars = vec![
            ("WAYLAND_DISPLAY", self.wayland_display.clone()),
            ("QT_QPA_PLATFORM", "wayland".to_string()),
            ("QT_LINUX_ACCESSIBILITY_ALWAYS_ON", "1".to_string()),
            ("QT_ACCESSIBILITY", "1".to_string()),
        ];
        if !self.dbus_address.is_empty() {
            vars.push(("DBUS_SESSION_BUS_ADDRESS", self.dbus_address.clone()));
        }
        vars
    }

    pub fn apply<'c>(&self, cmd: &'c mut Command) -> &'c mut Command {
        for var in HOST_DISPLAY_VARS {
            cmd.env_remove(var);
        }
        cmd.envs(self.overlay())
    }
}

/// Fail with an actionable message when `tool` is not on `PATH`
pub fn require_tool(tool: &str) -> Result<std::path::PathBuf> {
    which::which(tool).map_err(|_| Error::tool(tool, "not installed or not on PATH"))
}

/// Run a short-lived helper, capturing its output, killing it after `timeout`
pub fn run_tool(tool: &str, cmd: &mut Command, timeout: Duration) -> Result<Output> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::tool(tool, format!("failed to start: {e}")))?;

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let status = wait_with_timeout(tool, &mut child, timeout)?;

    let join = |h: Option<std::thread::JoinHandle<Vec<u8>>>| {
        h.and_then(|h| h.join().ok()).unwrap_or_default()
    };
    Ok(Output {
        status,
        stdout: join(stdout),
        stderr: join(stderr),
    })
}

/// Reap `child`, killing it once `timeout` has passed
pub fn wait_with_timeout(tool: &str, child: &mut Child, timeout: Duration) -> Result<ExitStatus> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::tool(tool, format!("timed out after {timeout:?}")));
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

/// Like [`run_tool`], but a non-zero exit is an error carrying stderr
pub fn run_tool_checked(tool: &str, cmd: &mut Command, timeout: Duration) -> Result<Output> {
    let output = run_tool(tool, cmd, timeout)?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::tool(
            tool,
            format!("exited with {}: {}", output.status, stderr.trim()),
        ));
    }
    Ok(output)
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> std::thread::JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        buf
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> SessionEnv {
        SessionEnv {
            wayland_display: "wayland-test".into(),
            dbus_address: "unix:path=/tmp/bus".into(),
        }
    }

    #[test]
    fn overlay_targets_virtual_display() {
        let vars = env().overlay();
        assert!(vars.contains(&("WAYLAND_DISPLAY", "wayland-test".to_string())));
        assert!(vars.contains(&("QT_QPA_PLATFORM", "wayland".to_string())));
        assert!(vars.contains(&("DBUS_SESSION_BUS_ADDRESS", "unix:path=/tmp/bus".to_string())));
    }

    #[test]
    fn empty_bus_address_is_not_exported() {
        let env = SessionEnv {
            dbus_address: String::new(),
            ..env()
        };
        assert!(env.overlay().iter().all(|(k, _)| *k != "DBUS_SESSION_BUS_ADDRESS"));
    }

    #[test]
    fn applied_env_hides_host_display() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo \"${DISPLAY:-unset} $WAYLAND_DISPLAY\""])
            .env("DISPLAY", ":0");
        env().apply(&mut cmd);
        let out = run_tool_checked("sh", &mut cmd, Duration::from_secs(5)).unwrap();
        assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "unset wayland-test");
    }

    #[test]
    fn failing_tool_reports_stderr() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo broken >&2; exit 3"]);
        let err = run_tool_checked("sh", &mut cmd, Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, Error::ExternalTool { ref message, .. } if message.contains("broken")));
    }

    #[test]
    fn hung_tool_is_killed() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let started = Instant::now();
        let err = run_tool("sleep", &mut cmd, Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, Error::ExternalTool { ref message, .. } if message.contains("timed out")));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn missing_tool_is_actionable() {
        let err = require_tool("definitely-not-a-real-tool-xyz").unwrap_err();
        assert!(err.to_string().contains("not installed"));
    }
}
