//! Timed sequences built from injector primitives
//!
//! Delays are what make the compositor and clients see a click as a click
//! and a drag as a drag; all of them go through the [`Clock`].

use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, millis};
use crate::error::{Error, Result};
use crate::input::injector::Injector;
use crate::input::keymap::{self, KeyCombo, MouseButton};

const SETTLE_AFTER_MOVE: Duration = Duration::from_millis(20);
const MODIFIER_GAP: Duration = Duration::from_millis(10);
const MIN_HOLD: Duration = Duration::from_millis(10);
const INTER_CLICK: Duration = Duration::from_millis(50);
const DRAG_SETTLE: Duration = Duration::from_millis(50);
const DRAG_AFTER_PRESS: Duration = Duration::from_millis(20);
const DRAG_BEFORE_RELEASE: Duration = Duration::from_millis(20);
const STEP_DELAY: Duration = Duration::from_millis(10);
const KEY_HOLD: Duration = Duration::from_millis(10);
const CHAR_GAP: Duration = Duration::from_millis(20);

const MIN_STEPS: u32 = 10;
/// Logical pixels per detent for smooth scrolling
const SMOOTH_PIXELS_PER_DETENT: f64 = 15.0;
/// Protocol units per wheel detent
const DISCRETE_UNITS_PER_DETENT: i32 = 120;
/// Vertical distance between fingers of a multi-finger swipe
const FINGER_SPACING: f64 = 20.0;

#[derive(Debug, Clone, PartialEq)]
pub struct ClickOptions {
    pub button: MouseButton,
    pub count: u32,
    pub modifiers: Vec<String>,
    /// Hold time for the final press, in milliseconds
    pub hold_ms: u64,
}

impl Default for ClickOptions {
    fn default() -> Self {
        Self {
            button: MouseButton::Left,
            count: 1,
            modifiers: Vec::new(),
            hold_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Waypoint {
    pub x: f64,
    pub y: f64,
    /// Pause after reaching this point
    pub dwell_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DragOptions {
    pub button: MouseButton,
    pub modifiers: Vec<String>,
    /// Visited in order between the start and the end point
    pub waypoints: Vec<Waypoint>,
}

impl Default for DragOptions {
    fn default() -> Self {
        Self {
            button: MouseButton::Left,
            modifiers: Vec::new(),
            waypoints: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollOptions {
    pub horizontal: bool,
    /// Wheel detents instead of pixel deltas
    pub discrete: bool,
    pub steps: u32,
}

impl Default for ScrollOptions {
    fn default() -> Self {
        Self {
            horizontal: false,
            discrete: false,
            steps: 1,
        }
    }
}

/// One straight leg of a drag
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Segment {
    pub from: (f64, f64),
    pub to: (f64, f64),
    pub steps: u32,
    pub dwell: Duration,
}

/// Interpolation steps for a straight move: one per 10 px, never fewer than 10
pub(crate) fn segment_steps(from: (f64, f64), to: (f64, f64)) -> u32 {
    let length = (to.0 - from.0).hypot(to.1 - from.1);
    MIN_STEPS.max((length / 10.0) as u32)
}

pub(crate) fn drag_path(start: (f64, f64), waypoints: &[Waypoint], end: (f64, f64)) -> Vec<Segment> {
    let mut stops: Vec<((f64, f64), Duration)> = waypoints
        .iter()
        .map(|w| ((w.x, w.y), millis(w.dwell_ms)))
        .collect();
    stops.push((end, Duration::ZERO));

    let mut from = start;
    stops
        .into_iter()
        .map(|(to, dwell)| {
            let segment = Segment {
                from,
                to,
                steps: segment_steps(from, to),
                dwell,
            };
            from = to;
            segment
        })
        .collect()
}

/// Split `total` into `parts` integers whose magnitudes differ by at most one
pub(crate) fn distribute(total: i32, parts: u32) -> Vec<i32> {
    let parts = parts.max(1);
    let magnitude = total.unsigned_abs();
    let base = magnitude / parts;
    let extra = magnitude % parts;
    let sign = total.signum();
    (0..parts)
        .map(|i| sign * (base + u32::from(i < extra)) as i32)
        .collect()
}

fn lerp(from: (f64, f64), to: (f64, f64), t: f64) -> (f64, f64) {
    (from.0 + (to.0 - from.0) * t, from.1 + (to.1 - from.1) * t)
}

/// Step count and per-step delay for a touch gesture of `duration_ms`
fn touch_pacing(duration_ms: u64) -> (u32, Duration) {
    let steps = MIN_STEPS.max((duration_ms / 10) as u32);
    let delay = millis(duration_ms / u64::from(steps)).max(millis(1));
    (steps, delay)
}

fn hold_time(hold_ms: u64) -> Duration {
    millis(hold_ms).max(MIN_HOLD)
}

/// Pointer, keyboard and touch gestures over an [`Injector`]
pub struct Composer {
    injector: Injector,
    clock: Arc<dyn Clock>,
}

impl Composer {
    pub fn new(injector: Injector) -> Self {
        let clock = injector.clock().clone();
        Self { injector, clock }
    }

    pub fn injector(&mut self) -> &mut Injector {
        &mut self.injector
    }

    pub fn is_connected(&self) -> bool {
        self.injector.connection().is_connected()
    }

    /// Pause on the composer's clock
    pub fn sleep(&self, duration: Duration) {
        self.clock.sleep(duration);
    }

    /// Press `codes` in order; on failure the ones already down are released again
    fn press_modifiers(&mut self, codes: &[u32]) -> Result<()> {
        for (held, code) in codes.iter().enumerate() {
            if let Err(e) = self.injector.key(*code, true) {
                let _ = self.release_modifiers(&codes[..held]);
                return Err(e);
            }
            self.sleep(MODIFIER_GAP);
        }
        Ok(())
    }

    /// Release `codes` in reverse; every key is attempted, the first error is returned
    fn release_modifiers(&mut self, codes: &[u32]) -> Result<()> {
        let mut result = Ok(());
        for code in codes.iter().rev() {
            self.sleep(MODIFIER_GAP);
            if let Err(e) = self.injector.key(*code, false) {
                tracing::warn!(code, "Failed to release modifier: {}", e);
                result = result.and(Err(e));
            }
        }
        result
    }

    /// Run `body` with `codes` held; they are released even when `body` fails
    fn with_modifiers(
        &mut self,
        codes: &[u32],
        body: impl FnOnce(&mut Self) -> Result<()>,
    ) -> Result<()> {
        self.press_modifiers(codes)?;
        let result = body(self);
        let released = self.release_modifiers(codes);
        result.and(released)
    }

    // ========================================================================
    // Pointer
    // ========================================================================

    pub fn mouse_move(&mut self, x: f64, y: f64) -> Result<()> {
        self.injector.pointer_move_absolute(x, y)
    }

    pub fn mouse_click(&mut self, x: f64, y: f64, options: &ClickOptions) -> Result<()> {
        let modifiers = keymap::resolve_modifiers(&options.modifiers);
        let button = options.button.code();
        let count = options.count.max(1);

        self.injector.pointer_move_absolute(x, y)?;
        self.sleep(SETTLE_AFTER_MOVE);

        self.with_modifiers(&modifiers, |c| {
            for i in 0..count {
                if i > 0 {
                    c.sleep(INTER_CLICK);
                }
                c.injector.pointer_button(button, true)?;
                if i + 1 == count {
                    c.sleep(hold_time(options.hold_ms));
                } else {
                    c.sleep(MIN_HOLD);
                }
                c.injector.pointer_button(button, false)?;
            }
            Ok(())
        })
    }

    pub fn mouse_drag(
        &mut self,
        start: (f64, f64),
        end: (f64, f64),
        options: &DragOptions,
    ) -> Result<()> {
        let modifiers = keymap::resolve_modifiers(&options.modifiers);
        let button = options.button.code();
        let path = drag_path(start, &options.waypoints, end);
        tracing::debug!(segments = path.len(), "Dragging");

        self.injector.pointer_move_absolute(start.0, start.1)?;
        self.sleep(DRAG_SETTLE);

        // Modifiers go down before the button and come up after it
        self.with_modifiers(&modifiers, |c| {
            c.injector.pointer_button(button, true)?;
            c.sleep(DRAG_AFTER_PRESS);
            let moved = c.follow(&path);
            c.sleep(DRAG_BEFORE_RELEASE);
            let released = c.injector.pointer_button(button, false);
            moved.and(released)
        })
    }

    fn follow(&mut self, path: &[Segment]) -> Result<()> {
        for segment in path {
            for step in 1..=segment.steps {
                let t = f64::from(step) / f64::from(segment.steps);
                let (x, y) = lerp(segment.from, segment.to, t);
                self.injector.pointer_move_absolute(x, y)?;
                self.sleep(STEP_DELAY);
            }
            if !segment.dwell.is_zero() {
                self.sleep(segment.dwell);
            }
        }
        Ok(())
    }

    /// Move to (x, y) and press `button` without releasing it
    pub fn mouse_button_down(&mut self, x: f64, y: f64, button: MouseButton) -> Result<()> {
        self.injector.pointer_move_absolute(x, y)?;
        self.sleep(SETTLE_AFTER_MOVE);
        self.injector.pointer_button(button.code(), true)
    }

    /// Move to (x, y) and release `button`
    pub fn mouse_button_up(&mut self, x: f64, y: f64, button: MouseButton) -> Result<()> {
        self.injector.pointer_move_absolute(x, y)?;
        self.sleep(SETTLE_AFTER_MOVE);
        self.injector.pointer_button(button.code(), false)
    }

    /// Scroll by `delta` detents at (x, y); positive is down or right
    pub fn mouse_scroll(&mut self, x: f64, y: f64, delta: i32, options: &ScrollOptions) -> Result<()> {
        let steps = options.steps.max(1);
        self.injector.pointer_move_absolute(x, y)?;
        self.sleep(SETTLE_AFTER_MOVE);

        if options.discrete {
            for (i, detents) in distribute(delta, steps).into_iter().enumerate() {
                if i > 0 {
                    self.sleep(STEP_DELAY);
                }
                if detents == 0 {
                    continue;
                }
                let units = detents * DISCRETE_UNITS_PER_DETENT;
                if options.horizontal {
                    self.injector.scroll_discrete(units, 0)?;
                } else {
                    self.injector.scroll_discrete(0, units)?;
                }
            }
        } else {
            let per_step = f64::from(delta) * SMOOTH_PIXELS_PER_DETENT / f64::from(steps);
            for i in 0..steps {
                if i > 0 {
                    self.sleep(STEP_DELAY);
                }
                if options.horizontal {
                    self.injector.scroll_delta(per_step, 0.0)?;
                } else {
                    self.injector.scroll_delta(0.0, per_step)?;
                }
            }
        }

        self.injector.scroll_stop()
    }

    // ========================================================================
    // Keyboard
    // ========================================================================

    /// Type US-QWERTY text; returns the characters that had no key and were skipped
    pub fn keyboard_type(&mut self, text: &str) -> Result<Vec<char>> {
        let mut skipped = Vec::new();
        for ch in text.chars() {
            let Some((code, shift)) = keymap::char_key(ch) else {
                skipped.push(ch);
                continue;
            };
            if shift {
                self.injector.key(keymap::KEY_LEFTSHIFT, true)?;
            }
            self.injector.key(code, true)?;
            self.sleep(KEY_HOLD);
            self.injector.key(code, false)?;
            if shift {
                self.injector.key(keymap::KEY_LEFTSHIFT, false)?;
            }
            self.sleep(CHAR_GAP);
        }
        if !skipped.is_empty() {
            tracing::debug!(?skipped, "Characters without a key mapping were skipped");
        }
        Ok(skipped)
    }

    /// Press and release a combination such as `ctrl+shift+t`
    pub fn keyboard_key(&mut self, combo: &str) -> Result<()> {
        let combo = KeyCombo::parse(combo)?;
        self.with_modifiers(&combo.modifiers, |c| {
            if let Some(code) = combo.key {
                c.injector.key(code, true)?;
                c.sleep(KEY_HOLD);
                c.injector.key(code, false)?;
            }
            Ok(())
        })
    }

    /// Press and hold a combination: modifiers first, then the key
    pub fn keyboard_key_down(&mut self, combo: &str) -> Result<()> {
        let combo = KeyCombo::parse(combo)?;
        self.press_modifiers(&combo.modifiers)?;
        if let Some(code) = combo.key {
            if let Err(e) = self.injector.key(code, true) {
                let _ = self.release_modifiers(&combo.modifiers);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Release a combination held with [`keyboard_key_down`](Self::keyboard_key_down)
    pub fn keyboard_key_up(&mut self, combo: &str) -> Result<()> {
        let combo = KeyCombo::parse(combo)?;
        let mut result = Ok(());
        if let Some(code) = combo.key {
            result = self.injector.key(code, false);
        }
        let released = self.release_modifiers(&combo.modifiers);
        result.and(released)
    }

    // ========================================================================
    // Touch
    // ========================================================================

    pub fn touch_tap(&mut self, x: f64, y: f64, hold_ms: u64) -> Result<()> {
        let id = self.injector.touch_down(x, y)?;
        self.sleep(hold_time(hold_ms));
        self.injector.touch_up(id)
    }

    pub fn touch_swipe(&mut self, from: (f64, f64), to: (f64, f64), duration_ms: u64) -> Result<()> {
        let (steps, delay) = touch_pacing(duration_ms);
        let id = self.injector.touch_down(from.0, from.1)?;
        for step in 1..=steps {
            self.sleep(delay);
            let (x, y) = lerp(from, to, f64::from(step) / f64::from(steps));
            self.injector.touch_move(id, x, y)?;
        }
        self.injector.touch_up(id)
    }

    /// Two fingers moving apart (or together) along the x-axis
    pub fn touch_pinch(
        &mut self,
        center: (f64, f64),
        start_distance: f64,
        end_distance: f64,
        duration_ms: u64,
    ) -> Result<()> {
        let (steps, delay) = touch_pacing(duration_ms);
        let (cx, cy) = center;
        let start_half = start_distance / 2.0;
        let end_half = end_distance / 2.0;

        let left = self.injector.touch_down(cx - start_half, cy)?;
        let right = self.injector.touch_down(cx + start_half, cy)?;
        for step in 1..=steps {
            self.sleep(delay);
            let t = f64::from(step) / f64::from(steps);
            let half = start_half + (end_half - start_half) * t;
            self.injector.touch_move(left, cx - half, cy)?;
            self.injector.touch_move(right, cx + half, cy)?;
        }
        self.injector.touch_up(left)?;
        self.injector.touch_up(right)
    }

    /// Parallel swipe with 2 to 5 fingers stacked vertically around the path
    pub fn touch_multi_swipe(
        &mut self,
        from: (f64, f64),
        to: (f64, f64),
        fingers: u32,
        duration_ms: u64,
    ) -> Result<()> {
        if !(2..=5).contains(&fingers) {
            return Err(Error::Config(format!(
                "fingers must be between 2 and 5, got {fingers}"
            )));
        }
        let (steps, delay) = touch_pacing(duration_ms);
        let offsets: Vec<f64> = (0..fingers)
            .map(|i| (f64::from(i) - f64::from(fingers - 1) / 2.0) * FINGER_SPACING)
            .collect();

        let mut ids = Vec::with_capacity(offsets.len());
        for offset in &offsets {
            ids.push(self.injector.touch_down(from.0, from.1 + offset)?);
        }
        for step in 1..=steps {
            self.sleep(delay);
            let (x, y) = lerp(from, to, f64::from(step) / f64::from(steps));
            for (id, offset) in ids.iter().zip(&offsets) {
                self.injector.touch_move(*id, x, y + offset)?;
            }
        }
        for id in ids {
            self.injector.touch_up(id)?;
        }
        Ok(())
    }

    pub fn close(&mut self) {
        self.injector.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::Call;
    use crate::input::injector::tests::{KBD, PTR, TOUCH, events, injector};

    fn composer(with_touch: bool) -> (Composer, crate::backend::fake::FakeHandle, Arc<crate::clock::ManualClock>) {
        let (inj, fake, clock, _broker) = injector(with_touch);
        (Composer::new(inj), fake, clock)
    }

    fn buttons(calls: &[Call]) -> Vec<(u32, bool)> {
        calls
            .iter()
            .filter_map(|c| match c {
                Call::Button(_, code, pressed) => Some((*code, *pressed)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn double_click_emits_two_pairs_after_settling() {
        let (mut c, fake, clock) = composer(false);
        let options = ClickOptions {
            count: 2,
            hold_ms: 200,
            ..Default::default()
        };
        c.mouse_click(100.0, 50.0, &options).unwrap();

        let calls = events(&fake);
        assert_eq!(calls[0], Call::Motion(PTR, 100.0, 50.0));
        assert_eq!(
            buttons(&calls),
            vec![(0x110, true), (0x110, false), (0x110, true), (0x110, false)]
        );
        let sleeps = clock.sleeps();
        assert_eq!(sleeps[0], SETTLE_AFTER_MOVE);
        assert_eq!(sleeps.last(), Some(&millis(200)));
        assert!(sleeps.contains(&INTER_CLICK));
    }

    #[test]
    fn click_modifiers_wrap_the_buttons() {
        let (mut c, fake, _clock) = composer(false);
        let options = ClickOptions {
            button: MouseButton::Right,
            modifiers: vec!["ctrl".into(), "shift".into()],
            ..Default::default()
        };
        c.mouse_click(1.0, 1.0, &options).unwrap();

        let calls: Vec<Call> = events(&fake)
            .into_iter()
            .filter(|c| matches!(c, Call::Key(..) | Call::Button(..)))
            .collect();
        assert_eq!(
            calls,
            vec![
                Call::Key(KBD, keymap::KEY_LEFTCTRL, true),
                Call::Key(KBD, keymap::KEY_LEFTSHIFT, true),
                Call::Button(PTR, 0x111, true),
                Call::Button(PTR, 0x111, false),
                Call::Key(KBD, keymap::KEY_LEFTSHIFT, false),
                Call::Key(KBD, keymap::KEY_LEFTCTRL, false),
            ]
        );
    }

    #[test]
    fn short_hold_is_clamped() {
        let (mut c, _fake, clock) = composer(false);
        c.mouse_click(0.0, 0.0, &ClickOptions::default()).unwrap();
        assert_eq!(clock.sleeps(), vec![SETTLE_AFTER_MOVE, MIN_HOLD]);
    }

    #[test]
    fn drag_path_has_a_leg_per_waypoint_plus_one() {
        let waypoints = [
            Waypoint { x: 100.0, y: 0.0, dwell_ms: 0 },
            Waypoint { x: 100.0, y: 500.0, dwell_ms: 30 },
        ];
        let path = drag_path((0.0, 0.0), &waypoints, (110.0, 500.0));
        assert_eq!(path.len(), 3);
        assert_eq!(path[0].steps, 10);
        assert_eq!(path[1].steps, 50);
        assert_eq!(path[1].dwell, millis(30));
        assert_eq!(path[2].steps, 10);
        assert_eq!(path[2].from, (100.0, 500.0));
    }

    #[test]
    fn drag_presses_before_moving_and_releases_at_the_end() {
        let (mut c, fake, clock) = composer(false);
        let options = DragOptions {
            waypoints: vec![Waypoint { x: 50.0, y: 50.0, dwell_ms: 40 }],
            ..Default::default()
        };
        c.mouse_drag((0.0, 0.0), (50.0, 250.0), &options).unwrap();

        let calls = events(&fake);
        let press = calls.iter().position(|c| matches!(c, Call::Button(_, _, true))).unwrap();
        let release = calls.iter().position(|c| matches!(c, Call::Button(_, _, false))).unwrap();
        let motions: Vec<usize> = calls
            .iter()
            .enumerate()
            .filter(|(_, c)| matches!(c, Call::Motion(..)))
            .map(|(i, _)| i)
            .collect();

        // Initial move, then 10 + 20 interpolated steps.
        assert_eq!(motions.len(), 1 + 10 + 20);
        assert!(motions[0] < press);
        assert!(press < motions[1]);
        assert!(*motions.last().unwrap() < release);
        assert_eq!(calls[*motions.last().unwrap()], Call::Motion(PTR, 50.0, 250.0));
        assert!(clock.sleeps().contains(&millis(40)));
    }

    #[test]
    fn discrete_scroll_spreads_detents_and_stops() {
        let (mut c, fake, _clock) = composer(false);
        let options = ScrollOptions {
            discrete: true,
            steps: 2,
            ..Default::default()
        };
        c.mouse_scroll(10.0, 10.0, -3, &options).unwrap();

        let calls: Vec<Call> = events(&fake)
            .into_iter()
            .filter(|c| !matches!(c, Call::Frame(_) | Call::Motion(..)))
            .collect();
        assert_eq!(
            calls,
            vec![
                Call::ScrollDiscrete(PTR, 0, -240),
                Call::ScrollDiscrete(PTR, 0, -120),
                Call::ScrollStop(PTR),
            ]
        );
    }

    #[test]
    fn smooth_horizontal_scroll_uses_pixels() {
        let (mut c, fake, _clock) = composer(false);
        let options = ScrollOptions {
            horizontal: true,
            discrete: false,
            steps: 3,
        };
        c.mouse_scroll(0.0, 0.0, 2, &options).unwrap();
        let deltas: Vec<Call> = events(&fake)
            .into_iter()
            .filter(|c| matches!(c, Call::ScrollDelta(..)))
            .collect();
        assert_eq!(deltas, vec![Call::ScrollDelta(PTR, 10.0, 0.0); 3]);
    }

    #[test]
    fn distribute_keeps_sign_and_total() {
        assert_eq!(distribute(5, 3), vec![2, 2, 1]);
        assert_eq!(distribute(-5, 3), vec![-2, -2, -1]);
        assert_eq!(distribute(1, 3), vec![1, 0, 0]);
        assert_eq!(distribute(4, 0), vec![4]);
    }

    #[test]
    fn typing_uses_shift_and_skips_unmapped() {
        let (mut c, fake, _clock) = composer(false);
        let skipped = c.keyboard_type("Hé").unwrap();
        assert_eq!(skipped, vec!['é']);
        let keys: Vec<Call> = events(&fake)
            .into_iter()
            .filter(|c| matches!(c, Call::Key(..)))
            .collect();
        assert_eq!(
            keys,
            vec![
                Call::Key(KBD, keymap::KEY_LEFTSHIFT, true),
                Call::Key(KBD, 35, true),
                Call::Key(KBD, 35, false),
                Call::Key(KBD, keymap::KEY_LEFTSHIFT, false),
            ]
        );
    }

    #[test]
    fn key_combo_releases_in_reverse() {
        let (mut c, fake, _clock) = composer(false);
        c.keyboard_key("ctrl+alt+t").unwrap();
        let order: Vec<(u32, bool)> = events(&fake)
            .into_iter()
            .filter_map(|c| match c {
                Call::Key(_, code, pressed) => Some((code, pressed)),
                _ => None,
            })
            .collect();
        assert_eq!(
            order,
            vec![
                (keymap::KEY_LEFTCTRL, true),
                (keymap::KEY_LEFTALT, true),
                (20, true),
                (20, false),
                (keymap::KEY_LEFTALT, false),
                (keymap::KEY_LEFTCTRL, false),
            ]
        );
    }

    fn keys(fake: &crate::backend::fake::FakeHandle) -> Vec<(u32, bool)> {
        events(fake)
            .into_iter()
            .filter_map(|c| match c {
                Call::Key(_, code, pressed) => Some((code, pressed)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn held_keys_accept_modifiers_and_reject_unknown() {
        let (mut c, fake, _clock) = composer(false);
        c.keyboard_key_down("shift").unwrap();
        c.keyboard_key_up("shift").unwrap();
        assert!(matches!(c.keyboard_key_down("bogus"), Err(Error::Config(_))));
        assert_eq!(fake.count(|c| matches!(c, Call::Key(..))), 2);
    }

    #[test]
    fn held_combo_opens_and_closes_in_order() {
        let (mut c, fake, clock) = composer(false);
        c.keyboard_key_down("ctrl+shift+t").unwrap();
        assert_eq!(
            keys(&fake),
            vec![
                (keymap::KEY_LEFTCTRL, true),
                (keymap::KEY_LEFTSHIFT, true),
                (20, true),
            ]
        );
        assert_eq!(clock.sleeps(), vec![MODIFIER_GAP, MODIFIER_GAP]);

        c.mouse_click(5.0, 5.0, &ClickOptions::default()).unwrap();
        c.keyboard_key_up("ctrl+shift+t").unwrap();
        let all = keys(&fake);
        assert_eq!(
            all[3..],
            [
                (20, false),
                (keymap::KEY_LEFTSHIFT, false),
                (keymap::KEY_LEFTCTRL, false),
            ]
        );
    }

    #[test]
    fn failed_click_still_releases_modifiers() {
        let (mut c, fake, _clock) = composer(false);
        fake.queue_now(vec![crate::backend::EiEvent::DevicePaused(PTR)]);
        let options = ClickOptions {
            modifiers: vec!["ctrl".into()],
            ..Default::default()
        };
        assert!(matches!(
            c.mouse_click(1.0, 1.0, &options),
            Err(Error::NotRunning(_))
        ));
        assert_eq!(
            keys(&fake),
            vec![(keymap::KEY_LEFTCTRL, true), (keymap::KEY_LEFTCTRL, false)]
        );
    }

    #[test]
    fn button_down_and_up_move_first() {
        let (mut c, fake, clock) = composer(false);
        c.mouse_button_down(30.0, 40.0, MouseButton::Middle).unwrap();
        c.mouse_button_up(60.0, 80.0, MouseButton::Middle).unwrap();
        let calls: Vec<Call> = events(&fake)
            .into_iter()
            .filter(|c| matches!(c, Call::Motion(..) | Call::Button(..)))
            .collect();
        assert_eq!(
            calls,
            vec![
                Call::Motion(PTR, 30.0, 40.0),
                Call::Button(PTR, 0x112, true),
                Call::Motion(PTR, 60.0, 80.0),
                Call::Button(PTR, 0x112, false),
            ]
        );
        assert_eq!(clock.sleeps(), vec![SETTLE_AFTER_MOVE, SETTLE_AFTER_MOVE]);
    }

    #[test]
    fn tap_and_swipe_lift_every_finger() {
        let (mut c, fake, clock) = composer(true);
        c.touch_tap(5.0, 5.0, 0).unwrap();
        assert_eq!(clock.sleeps(), vec![MIN_HOLD]);

        c.touch_swipe((0.0, 0.0), (0.0, 300.0), 300).unwrap();
        let motions = fake.count(|c| matches!(c, Call::TouchMotion(..)));
        assert_eq!(motions, 30);
        assert_eq!(c.injector().active_touches(), 0);
        assert_eq!(fake.count(|c| matches!(c, Call::TouchNew(d, _) if *d == TOUCH)), 2);
    }

    #[test]
    fn pinch_moves_two_fingers_symmetrically() {
        let (mut c, fake, _clock) = composer(true);
        c.touch_pinch((100.0, 100.0), 20.0, 100.0, 50).unwrap();
        let downs: Vec<Call> = events(&fake)
            .into_iter()
            .filter(|c| matches!(c, Call::TouchDown(..)))
            .collect();
        assert_eq!(downs.len(), 2);
        assert!(matches!(downs[0], Call::TouchDown(_, x, y) if x == 90.0 && y == 100.0));
        assert!(matches!(downs[1], Call::TouchDown(_, x, _) if x == 110.0));
        assert_eq!(fake.count(|c| matches!(c, Call::TouchMotion(..))), 20);
        assert_eq!(c.injector().active_touches(), 0);
    }

    #[test]
    fn multi_swipe_validates_finger_count() {
        let (mut c, fake, _clock) = composer(true);
        assert!(matches!(
            c.touch_multi_swipe((0.0, 0.0), (100.0, 0.0), 6, 100),
            Err(Error::Config(_))
        ));
        assert_eq!(fake.count(|c| matches!(c, Call::TouchNew(..))), 0);

        c.touch_multi_swipe((0.0, 100.0), (100.0, 100.0), 3, 100).unwrap();
        assert_eq!(fake.count(|c| matches!(c, Call::TouchDown(..))), 3);
        assert_eq!(fake.count(|c| matches!(c, Call::TouchUp(..))), 3);
        let down_ys: Vec<f64> = events(&fake)
            .into_iter()
            .filter_map(|c| match c {
                Call::TouchDown(_, _, y) => Some(y),
                _ => None,
            })
            .collect();
        assert_eq!(down_ys, vec![80.0, 100.0, 120.0]);
    }
}
