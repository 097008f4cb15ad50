//! Arbitrary Unicode text entry
//!
//! The QWERTY table only covers ASCII, so Unicode goes through helper tools.
//! Strategies are tried in order. A strategy whose tool is absent is skipped;
//! one that ran and failed ends the chain with its error.

use std::process::Command;
use std::time::Duration;

use crate::clipboard;
use crate::core::environment::{SessionEnv, run_tool_checked};
use crate::error::{Error, Result};
use crate::input::gestures::Composer;

const WTYPE_TIMEOUT: Duration = Duration::from_secs(5);
const PASTE_SETTLE: Duration = Duration::from_millis(100);

pub trait TextStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn available(&self) -> bool;

    fn enter(&self, text: &str, env: &SessionEnv, composer: &mut Composer) -> Result<()>;
}

/// `wtype`, the Wayland virtual-keyboard protocol client
pub struct VirtualKeyboard;

impl TextStrategy for VirtualKeyboard {
    fn name(&self) -> &'static str {
        "wtype"
    }

    fn available(&self) -> bool {
        which::which("wtype").is_ok()
    }

    fn enter(&self, text: &str, env: &SessionEnv, _composer: &mut Composer) -> Result<()> {
        let mut cmd = Command::new("wtype");
        cmd.arg("--").arg(text);
        env.apply(&mut cmd);
        run_tool_checked("wtype", &mut cmd, WTYPE_TIMEOUT)?;
        Ok(())
    }
}

/// Put the text on the clipboard, then press ctrl+v
pub struct ClipboardPaste;

impl TextStrategy for ClipboardPaste {
    fn name(&self) -> &'static str {
        "clipboard paste"
    }

    fn available(&self) -> bool {
        which::which("wl-copy").is_ok()
    }

    fn enter(&self, text: &str, env: &SessionEnv, composer: &mut Composer) -> Result<()> {
        clipboard::set(env, text)?;
        paste(composer)
    }
}

/// Give the clipboard owner a moment, then press ctrl+v
fn paste(composer: &mut Composer) -> Result<()> {
    composer.sleep(PASTE_SETTLE);
    composer.keyboard_key("ctrl+v")
}

/// Strategy chain for a session; the paste fallback needs clipboard access
pub fn default_strategies(enable_clipboard: bool) -> Vec<Box<dyn TextStrategy>> {
    let mut strategies: Vec<Box<dyn TextStrategy>> = vec![Box::new(VirtualKeyboard)];
    if enable_clipboard {
        strategies.push(Box::new(ClipboardPaste));
    }
    strategies
}

/// Enter `text` with the first available strategy; returns the one used
pub fn enter_text(
    strategies: &[Box<dyn TextStrategy>],
    text: &str,
    env: &SessionEnv,
    composer: &mut Composer,
) -> Result<&'static str> {
    for strategy in strategies {
        if !strategy.available() {
            tracing::debug!(strategy = strategy.name(), "Text strategy unavailable");
            continue;
        }
        strategy.enter(text, env, composer)?;
        return Ok(strategy.name());
    }
    let tried: Vec<&str> = strategies.iter().map(|s| s.name()).collect();
    Err(Error::tool(
        "unicode text",
        format!("no text entry method available (tried: {})", tried.join(", ")),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::injector::tests::injector;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct Scripted {
        name: &'static str,
        available: bool,
        fails: bool,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl TextStrategy for Scripted {
        fn name(&self) -> &'static str {
            self.name
        }

        fn available(&self) -> bool {
            self.available
        }

        fn enter(&self, _text: &str, _env: &SessionEnv, _composer: &mut Composer) -> Result<()> {
            self.log.lock().push(self.name);
            if self.fails {
                Err(Error::tool(self.name, "exited with 1"))
            } else {
                Ok(())
            }
        }
    }

    fn strategy(
        name: &'static str,
        available: bool,
        fails: bool,
        log: &Arc<Mutex<Vec<&'static str>>>,
    ) -> Box<dyn TextStrategy> {
        Box::new(Scripted {
            name,
            available,
            fails,
            log: log.clone(),
        })
    }

    fn env() -> SessionEnv {
        SessionEnv {
            wayland_display: "wayland-test".into(),
            dbus_address: String::new(),
        }
    }

    #[test]
    fn absent_strategy_is_skipped() {
        let (inj, _fake, _clock, _broker) = injector(false);
        let mut composer = Composer::new(inj);
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = vec![strategy("a", false, false, &log), strategy("b", true, false, &log)];

        let used = enter_text(&chain, "héllo", &env(), &mut composer).unwrap();
        assert_eq!(used, "b");
        assert_eq!(*log.lock(), vec!["b"]);
    }

    #[test]
    fn failed_strategy_stops_the_chain() {
        let (inj, _fake, _clock, _broker) = injector(false);
        let mut composer = Composer::new(inj);
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = vec![strategy("a", true, true, &log), strategy("b", true, false, &log)];

        let err = enter_text(&chain, "x", &env(), &mut composer).unwrap_err();
        assert!(matches!(err, Error::ExternalTool { ref tool, .. } if tool == "a"));
        assert_eq!(*log.lock(), vec!["a"]);
    }

    #[test]
    fn nothing_available_names_what_was_tried() {
        let (inj, _fake, _clock, _broker) = injector(false);
        let mut composer = Composer::new(inj);
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = vec![strategy("a", false, false, &log), strategy("b", false, false, &log)];

        let err = enter_text(&chain, "x", &env(), &mut composer).unwrap_err();
        assert!(err.to_string().contains("tried: a, b"));
    }

    #[test]
    fn paste_waits_on_the_clock_then_sends_ctrl_v() {
        let (inj, fake, clock, _broker) = injector(false);
        let mut composer = Composer::new(inj);
        paste(&mut composer).unwrap();

        assert_eq!(clock.sleeps().first(), Some(&PASTE_SETTLE));
        let keys: Vec<(u32, bool)> = fake
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                crate::backend::fake::Call::Key(_, code, pressed) => Some((code, pressed)),
                _ => None,
            })
            .collect();
        assert_eq!(
            keys,
            vec![
                (crate::input::keymap::KEY_LEFTCTRL, true),
                (crate::input::keymap::KEY_V, true),
                (crate::input::keymap::KEY_V, false),
                (crate::input::keymap::KEY_LEFTCTRL, false),
            ]
        );
    }

    #[test]
    fn paste_fallback_requires_clipboard_access() {
        let names = |s: Vec<Box<dyn TextStrategy>>| s.iter().map(|s| s.name()).collect::<Vec<_>>();
        assert_eq!(names(default_strategies(false)), vec!["wtype"]);
        assert_eq!(names(default_strategies(true)), vec!["wtype", "clipboard paste"]);
    }
}
