//! The automation context: one session plus its input backend
//!
//! Owned by a single long-lived server instance. Input is negotiated after
//! the session is up and torn down before it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::accessibility::{self, ElementInfo, atspi::AtspiNode};
use crate::clipboard;
use crate::clock::Clock;
use crate::config::{HandshakeOptions, SessionConfig, SessionOptions};
use crate::core::environment::SessionEnv;
use crate::core::session::{LaunchedApp, Session, SessionInfo};
use crate::error::{Error, Result};
use crate::input::{self, Composer, text::TextStrategy};
use crate::screenshot::{self, Screenshot};

/// Grace period between a ready compositor and input negotiation
const INPUT_SETTLE: Duration = Duration::from_millis(500);

/// Produces an input backend for a session bus address
pub type InputConnector = Box<dyn Fn(&str) -> Result<Composer> + Send>;

pub struct Desktop {
    session: Session,
    input: Option<Composer>,
    clock: Arc<dyn Clock>,
    connector: InputConnector,
    text: Vec<Box<dyn TextStrategy>>,
}

impl Desktop {
    /// Production context: libei over KWin's EIS endpoint
    pub fn new(options: SessionOptions, handshake: HandshakeOptions, clock: Arc<dyn Clock>) -> Self {
        let connect_clock = clock.clone();
        let connector: InputConnector =
            Box::new(move |address| input::connect(address, connect_clock.clone(), handshake));
        Self::with_connector(Session::new(options), clock, connector)
    }

    pub fn with_connector(session: Session, clock: Arc<dyn Clock>, connector: InputConnector) -> Self {
        Self {
            session,
            input: None,
            clock,
            connector,
            text: Vec::new(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Start the session and negotiate input; on input failure the session is stopped again
    pub fn start(&mut self, config: &SessionConfig) -> Result<SessionInfo> {
        if !self.session.is_running() {
            self.close_input();
        }
        let info = self.session.start(config)?;

        self.clock.sleep(INPUT_SETTLE);
        match (self.connector)(&info.dbus_address) {
            Ok(composer) => self.input = Some(composer),
            Err(e) => {
                tracing::warn!("Input negotiation failed, stopping session: {}", e);
                self.session.stop();
                return Err(e);
            }
        }
        self.text = input::text::default_strategies(config.enable_clipboard);
        Ok(info)
    }

    pub fn stop(&mut self) {
        self.close_input();
        self.session.stop();
    }

    fn close_input(&mut self) {
        if let Some(mut composer) = self.input.take() {
            composer.close();
        }
    }

    pub fn is_running(&mut self) -> bool {
        self.session.is_running()
    }

    fn require_running(&mut self) -> Result<()> {
        if self.session.is_running() {
            Ok(())
        } else {
            Err(Error::NotRunning("no session is running".into()))
        }
    }

    pub fn env(&mut self) -> Result<SessionEnv> {
        self.require_running()?;
        self.session.env()
    }

    /// Gesture composer of the running session
    pub fn input(&mut self) -> Result<&mut Composer> {
        self.require_running()?;
        connected(&mut self.input)
    }

    pub fn launch(&mut self, command: &[String], env: &BTreeMap<String, String>) -> Result<LaunchedApp> {
        self.session.launch(command, env)
    }

    pub fn app_log(&self, pid: u32) -> Result<String> {
        self.session.app_log(pid)
    }

    /// Type arbitrary Unicode text; returns the method that was used
    pub fn type_unicode(&mut self, text: &str) -> Result<&'static str> {
        let env = self.env()?;
        let composer = connected(&mut self.input)?;
        input::text::enter_text(&self.text, text, &env, composer)
    }

    fn clipboard_env(&mut self) -> Result<SessionEnv> {
        let env = self.env()?;
        if !self.session.clipboard_enabled() {
            return Err(Error::tool(
                "clipboard",
                "clipboard access is disabled for this session",
            ));
        }
        Ok(env)
    }

    pub fn clipboard_get(&mut self) -> Result<String> {
        let env = self.clipboard_env()?;
        clipboard::get(&env)
    }

    pub fn clipboard_set(&mut self, text: &str) -> Result<()> {
        let env = self.clipboard_env()?;
        clipboard::set(&env, text)
    }

    pub fn screenshot(&mut self, include_cursor: bool) -> Result<Screenshot> {
        let env = self.env()?;
        screenshot::capture(&env, include_cursor)
    }

    fn accessibility_root(&mut self) -> Result<AtspiNode> {
        let env = self.env()?;
        AtspiNode::desktop(&env.dbus_address)
    }

    pub fn accessibility_tree(&mut self, app_filter: &str, max_depth: usize) -> Result<String> {
        let root = self.accessibility_root()?;
        Ok(accessibility::tree(&root, app_filter, max_depth))
    }

    pub fn find_elements(&mut self, query: &str, app_filter: &str) -> Result<Vec<ElementInfo>> {
        let root = self.accessibility_root()?;
        Ok(accessibility::find(&root, query, app_filter))
    }
}

fn connected(input: &mut Option<Composer>) -> Result<&mut Composer> {
    match input.as_mut() {
        Some(composer) if composer.is_connected() => Ok(composer),
        Some(_) => Err(Error::NotRunning(
            "input channel was closed by the compositor".into(),
        )),
        None => Err(Error::NotRunning("input backend is not connected".into())),
    }
}

impl Drop for Desktop {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn fake_options(dir: &TempDir) -> SessionOptions {
        let script = dir.path().join("fake-kwin.sh");
        std::fs::write(
            &script,
            "while [ $# -gt 0 ]; do [ \"$1\" = --socket ] && SOCK=\"$2\"; shift; done\n\
             touch \"$XDG_RUNTIME_DIR/$SOCK\"\nexec sleep 30\n",
        )
        .unwrap();
        SessionOptions {
            launcher: vec!["bash".into(), "-c".into()],
            compositor: format!("bash {}", script.display()),
            accessibility_bus: "true".into(),
            runtime_dir: dir.path().to_path_buf(),
            log_dir: dir.path().join("logs"),
            stop_grace: Duration::from_secs(2),
            kill_wait: Duration::from_secs(1),
            ..SessionOptions::default()
        }
    }

    #[test]
    fn failed_negotiation_stops_the_new_session() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new());
        let attempts = Arc::new(AtomicUsize::new(0));
        let seen = attempts.clone();
        let connector: InputConnector = Box::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Err(Error::Negotiation("no pointer device available from EIS".into()))
        });
        let mut desktop =
            Desktop::with_connector(Session::new(fake_options(&dir)), clock.clone(), connector);

        let err = desktop.start(&SessionConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Negotiation(_)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(clock.sleeps(), vec![INPUT_SETTLE]);
        assert!(!desktop.is_running());
        assert!(matches!(desktop.input(), Err(Error::NotRunning(_))));
    }

    #[test]
    fn operations_without_session_are_refused() {
        let dir = TempDir::new().unwrap();
        let connector: InputConnector = Box::new(|_| Err(Error::Negotiation("unused".into())));
        let mut desktop = Desktop::with_connector(
            Session::new(fake_options(&dir)),
            Arc::new(ManualClock::new()),
            connector,
        );
        assert!(matches!(desktop.input(), Err(Error::NotRunning(_))));
        assert!(matches!(desktop.screenshot(false), Err(Error::NotRunning(_))));
        assert!(matches!(desktop.clipboard_get(), Err(Error::NotRunning(_))));
        desktop.stop();
    }

    #[test]
    fn clipboard_is_gated_by_session_flag() {
        let dir = TempDir::new().unwrap();
        let connector: InputConnector = Box::new(|_| {
            let (inj, _fake, _clock, _broker) = crate::input::injector::tests::injector(false);
            Ok(Composer::new(inj))
        });
        let mut desktop = Desktop::with_connector(
            Session::new(fake_options(&dir)),
            Arc::new(ManualClock::new()),
            connector,
        );
        desktop.start(&SessionConfig::default()).unwrap();
        assert!(desktop.input().is_ok());
        let err = desktop.clipboard_set("secret").unwrap_err();
        assert!(matches!(err, Error::ExternalTool { ref message, .. } if message.contains("disabled")));
        desktop.stop();
        assert!(matches!(desktop.input(), Err(Error::NotRunning(_))));
    }
}
