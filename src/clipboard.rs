//! Session clipboard through wl-clipboard

use std::process::{Command, Stdio};
use std::time::Duration;

use crate::core::environment::{SessionEnv, require_tool, run_tool, wait_with_timeout};
use crate::error::{Error, Result};

const CLIPBOARD_TIMEOUT: Duration = Duration::from_secs(5);

/// Replace the clipboard contents
///
/// `wl-copy` forks a server that owns the selection, so its stdio is not
/// captured.
pub fn set(env: &SessionEnv, text: &str) -> Result<()> {
    require_tool("wl-copy")?;
    let mut cmd = Command::new("wl-copy");
    cmd.arg("--")
        .arg(text)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    env.apply(&mut cmd);
    let mut child = cmd
        .spawn()
        .map_err(|e| Error::tool("wl-copy", format!("failed to start: {e}")))?;
    let status = wait_with_timeout("wl-copy", &mut child, CLIPBOARD_TIMEOUT)?;
    if !status.success() {
        return Err(Error::tool("wl-copy", format!("exited with {status}")));
    }
    Ok(())
}

/// Current clipboard text; an empty selection reads as ""
pub fn get(env: &SessionEnv) -> Result<String> {
    require_tool("wl-paste")?;
    let mut cmd = Command::new("wl-paste");
    cmd.arg("--no-newline");
    env.apply(&mut cmd);
    let output = run_tool("wl-paste", &mut cmd, CLIPBOARD_TIMEOUT)?;
    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.contains("No selection") || stderr.contains("Nothing is copied") {
        return Ok(String::new());
    }
    Err(Error::tool(
        "wl-paste",
        format!("exited with {}: {}", output.status, stderr.trim()),
    ))
}
