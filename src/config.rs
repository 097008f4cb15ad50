//! Session and handshake configuration

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Caller-supplied description of the virtual display
///
/// Immutable once handed to [`crate::core::session::Session::start`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub screen_width: u32,
    pub screen_height: u32,
    /// Wayland socket name; generated when empty
    pub socket_name: String,
    /// Applied last on top of the session environment
    pub extra_env: BTreeMap<String, String>,
    pub enable_clipboard: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            screen_width: 1920,
            screen_height: 1080,
            socket_name: String::new(),
            extra_env: BTreeMap::new(),
            enable_clipboard: false,
        }
    }
}

/// How the isolated session is spawned and torn down
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Prefix that receives the wrapper script as its final argument
    pub launcher: Vec<String>,
    pub compositor: String,
    pub accessibility_bus: String,
    pub runtime_dir: PathBuf,
    /// Where launched applications write their captured output
    pub log_dir: PathBuf,
    pub socket_timeout: Duration,
    pub ready_timeout: Duration,
    pub stop_grace: Duration,
    pub kill_wait: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            launcher: vec!["dbus-run-session".into(), "bash".into(), "-c".into()],
            compositor: "kwin_wayland".into(),
            accessibility_bus: "/usr/lib/at-spi-bus-launcher".into(),
            runtime_dir: default_runtime_dir(),
            log_dir: std::env::temp_dir().join("kwin-marionette"),
            socket_timeout: Duration::from_secs(10),
            ready_timeout: Duration::from_secs(5),
            stop_grace: Duration::from_secs(5),
            kill_wait: Duration::from_secs(3),
        }
    }
}

/// `$XDG_RUNTIME_DIR`, or `/run/user/<uid>` when unset
pub fn default_runtime_dir() -> PathBuf {
    match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => PathBuf::from(format!("/run/user/{}", nix::unistd::getuid())),
    }
}

/// Budget for the EIS device handshake
#[derive(Debug, Clone, Copy)]
pub struct HandshakeOptions {
    pub timeout: Duration,
    /// Upper bound of a single readability poll
    pub poll_interval: Duration,
}

impl Default for HandshakeOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(300),
        }
    }
}

/// Command-line and environment configuration of the server binary
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "kwin-marionette", version, about)]
pub struct ServerConfig {
    /// Seconds to wait for the compositor's Wayland socket
    #[arg(long, env = "KWIN_MARIONETTE_SOCKET_TIMEOUT", default_value_t = 10)]
    pub socket_timeout_secs: u64,

    /// Milliseconds budget for the EIS device handshake
    #[arg(long, env = "KWIN_MARIONETTE_HANDSHAKE_TIMEOUT", default_value_t = 5000)]
    pub handshake_timeout_ms: u64,

    /// Compositor command started inside the session
    #[arg(long, env = "KWIN_MARIONETTE_COMPOSITOR", default_value = "kwin_wayland")]
    pub compositor: String,
}

impl ServerConfig {
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            compositor: self.compositor.clone(),
            socket_timeout: Duration::from_secs(self.socket_timeout_secs),
            ..SessionOptions::default()
        }
    }

    pub fn handshake_options(&self) -> HandshakeOptions {
        HandshakeOptions {
            timeout: Duration::from_millis(self.handshake_timeout_ms),
            ..HandshakeOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn session_config_defaults_from_partial_json() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"screen_width": 1280, "extra_env": {"LANG": "C"}}"#).unwrap();
        assert_eq!(config.screen_width, 1280);
        assert_eq!(config.screen_height, 1080);
        assert!(config.socket_name.is_empty());
        assert_eq!(config.extra_env.get("LANG").map(String::as_str), Some("C"));
        assert!(!config.enable_clipboard);
    }

    #[test]
    fn default_options_wrap_in_private_bus() {
        let options = SessionOptions::default();
        assert_eq!(options.launcher[0], "dbus-run-session");
        assert_eq!(options.socket_timeout, Duration::from_secs(10));
        assert_eq!(options.stop_grace, Duration::from_secs(5));
        assert_eq!(HandshakeOptions::default().poll_interval, Duration::from_millis(300));
    }

    #[test]
    fn server_flags_override_defaults() {
        let config = ServerConfig::parse_from([
            "kwin-marionette",
            "--socket-timeout-secs",
            "3",
            "--compositor",
            "/opt/kde/bin/kwin_wayland",
        ]);
        let options = config.session_options();
        assert_eq!(options.socket_timeout, Duration::from_secs(3));
        assert_eq!(options.compositor, "/opt/kde/bin/kwin_wayland");
        assert_eq!(config.handshake_options().timeout, Duration::from_secs(5));
    }
}
