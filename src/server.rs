//! MCP Server implementation for kwin-marionette
//!
//! Exposes the session, input, screenshot, accessibility and clipboard
//! operations as MCP tools. The core is blocking, so every tool runs on the
//! blocking pool against the one shared [`Desktop`].

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::*,
    schemars, serde, tool, tool_handler, tool_router,
};
use serde_json::json;

use crate::clock::SystemClock;
use crate::config::{SessionConfig, ServerConfig};
use crate::core::context::Desktop;
use crate::error::{Error, Result as CoreResult};
use crate::input::{ClickOptions, DragOptions, MouseButton, ScrollOptions, Waypoint};

/// Parameters for session_start tool
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct SessionStartParams {
    /// Command to launch once the session is up (e.g. "kcalc" or "/path/to/app --arg")
    #[serde(default)]
    pub app_command: Option<String>,
    /// Virtual screen width in pixels
    #[serde(default = "default_width")]
    pub screen_width: u32,
    /// Virtual screen height in pixels
    #[serde(default = "default_height")]
    pub screen_height: u32,
    /// Wayland socket name; generated when omitted
    #[serde(default)]
    pub socket_name: Option<String>,
    /// Extra environment for the session
    #[serde(default)]
    pub extra_env: BTreeMap<String, String>,
    /// Allow clipboard tools and clipboard-based text entry
    #[serde(default = "default_true")]
    pub enable_clipboard: bool,
}

fn default_width() -> u32 {
    1920
}

fn default_height() -> u32 {
    1080
}

fn default_true() -> bool {
    true
}

/// Parameters for launch_app tool
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct LaunchAppParams {
    /// Command line, split on whitespace
    pub command: String,
    /// Extra environment for this app
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Parameters for app_log tool
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct AppLogParams {
    /// PID returned by launch_app
    pub pid: u32,
}

/// Parameters for screenshot tool
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct ScreenshotParams {
    /// Include the mouse cursor
    #[serde(default)]
    pub include_cursor: bool,
    /// Output format: "file" (default) or "base64"
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_format() -> String {
    "file".to_string()
}

/// Parameters for accessibility_tree tool
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct AccessibilityTreeParams {
    /// Only apps whose name contains this (empty = all apps)
    #[serde(default)]
    pub app_name: String,
    /// Maximum tree depth to traverse
    #[serde(default = "default_depth")]
    pub max_depth: usize,
}

fn default_depth() -> usize {
    15
}

/// Parameters for find_ui_elements tool
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct FindUiElementsParams {
    /// Case-insensitive text matched against name, role and description
    pub query: String,
    /// Only apps whose name contains this
    #[serde(default)]
    pub app_name: String,
}

/// Parameters for mouse_move tool
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct MouseMoveParams {
    pub x: i32,
    pub y: i32,
}

/// Parameters for mouse_click tool
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct MouseClickParams {
    pub x: i32,
    pub y: i32,
    /// Mouse button: "left" (default), "right", "middle", "back", "forward"
    #[serde(default = "default_button")]
    pub button: String,
    /// 1 = single, 2 = double, 3 = triple click
    #[serde(default = "default_click_count")]
    pub click_count: u32,
    /// Modifier keys held during the click: "ctrl", "alt", "shift", "super"
    #[serde(default)]
    pub modifiers: Vec<String>,
    /// Hold the final press this long (long-press)
    #[serde(default)]
    pub hold_ms: u64,
}

fn default_button() -> String {
    "left".to_string()
}

fn default_click_count() -> u32 {
    1
}

/// A point the drag passes through
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct WaypointParams {
    pub x: i32,
    pub y: i32,
    /// Pause at this point
    #[serde(default)]
    pub dwell_ms: u64,
}

/// Parameters for mouse_drag tool
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct MouseDragParams {
    pub from_x: i32,
    pub from_y: i32,
    pub to_x: i32,
    pub to_y: i32,
    #[serde(default = "default_button")]
    pub button: String,
    #[serde(default)]
    pub modifiers: Vec<String>,
    /// Intermediate points, visited in order
    #[serde(default)]
    pub waypoints: Vec<WaypointParams>,
}

/// Parameters for mouse_button_down / mouse_button_up tools
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct MouseButtonParams {
    pub x: i32,
    pub y: i32,
    #[serde(default = "default_button")]
    pub button: String,
}

/// Parameters for mouse_scroll tool
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct MouseScrollParams {
    pub x: i32,
    pub y: i32,
    /// Detents; positive = down/right, negative = up/left
    pub delta: i32,
    #[serde(default)]
    pub horizontal: bool,
    /// Wheel clicks instead of smooth pixel scrolling (the default)
    #[serde(default)]
    pub discrete: bool,
    /// Split the scroll into this many increments
    #[serde(default = "default_steps")]
    pub steps: u32,
}

fn default_steps() -> u32 {
    1
}

/// Parameters for keyboard_type / keyboard_type_unicode tools
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct KeyboardTypeParams {
    pub text: String,
}

/// Parameters for keyboard_key tools
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct KeyboardKeyParams {
    /// Key or combination (e.g. "Return", "ctrl+c", "alt+F4", "shift")
    pub key: String,
}

/// Parameters for touch_tap tool
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct TouchTapParams {
    pub x: i32,
    pub y: i32,
    /// Keep the finger down this long (long-press)
    #[serde(default)]
    pub hold_ms: u64,
}

/// Parameters for touch_swipe tool
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct TouchSwipeParams {
    pub from_x: i32,
    pub from_y: i32,
    pub to_x: i32,
    pub to_y: i32,
    #[serde(default = "default_duration")]
    pub duration_ms: u64,
}

fn default_duration() -> u64 {
    300
}

/// Parameters for touch_pinch tool
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct TouchPinchParams {
    pub center_x: i32,
    pub center_y: i32,
    /// Finger distance at the start, in pixels
    pub start_distance: f64,
    /// Finger distance at the end; larger than start zooms in
    pub end_distance: f64,
    #[serde(default = "default_pinch_duration")]
    pub duration_ms: u64,
}

fn default_pinch_duration() -> u64 {
    500
}

/// Parameters for touch_multi_swipe tool
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct TouchMultiSwipeParams {
    pub from_x: i32,
    pub from_y: i32,
    pub to_x: i32,
    pub to_y: i32,
    /// Number of fingers, 2 to 5
    #[serde(default = "default_fingers")]
    pub fingers: u32,
    #[serde(default = "default_duration")]
    pub duration_ms: u64,
}

fn default_fingers() -> u32 {
    3
}

/// Parameters for clipboard_set tool
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct ClipboardSetParams {
    pub text: String,
}

fn point(x: i32, y: i32) -> (f64, f64) {
    (f64::from(x), f64::from(y))
}

fn failure(action: &str, err: &Error) -> CallToolResult {
    tracing::warn!(action, "{}", err);
    let mut body = json!({
        "error": action,
        "details": err.to_string(),
    });
    if let Some(suggestion) = err.suggestion() {
        body["suggestion"] = json!(suggestion);
    }
    CallToolResult::error(vec![Content::text(body.to_string())])
}

fn respond(action: &str, result: CoreResult<String>) -> Result<CallToolResult, McpError> {
    match result {
        Ok(message) => Ok(CallToolResult::success(vec![Content::text(message)])),
        Err(e) => Ok(failure(action, &e)),
    }
}

/// kwin-marionette MCP server
///
/// Drives GUI applications inside an isolated KWin Wayland session.
#[derive(Clone)]
pub struct MarionetteServer {
    desktop: Arc<Mutex<Desktop>>,
    tool_router: ToolRouter<MarionetteServer>,
}

#[tool_router]
impl MarionetteServer {
    pub fn new(config: &ServerConfig) -> Self {
        let desktop = Desktop::new(
            config.session_options(),
            config.handshake_options(),
            Arc::new(SystemClock),
        );
        Self::with_desktop(desktop)
    }

    pub fn with_desktop(desktop: Desktop) -> Self {
        Self {
            desktop: Arc::new(Mutex::new(desktop)),
            tool_router: Self::tool_router(),
        }
    }

    /// Run `f` on the blocking pool with the desktop locked
    async fn run<T, F>(&self, f: F) -> CoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Desktop) -> CoreResult<T> + Send + 'static,
    {
        let desktop = self.desktop.clone();
        match tokio::task::spawn_blocking(move || f(&mut desktop.lock())).await {
            Ok(result) => result,
            Err(e) => Err(Error::Io(std::io::Error::other(format!(
                "worker task failed: {e}"
            )))),
        }
    }

    /// Stop the session, if any
    pub async fn shutdown(&self) {
        let _ = self
            .run(|desktop| {
                desktop.stop();
                Ok(())
            })
            .await;
    }

    // ========================================================================
    // Session
    // ========================================================================

    #[tool(description = "Start an isolated KWin Wayland session (virtual display, private D-Bus, emulated input), optionally launching an app.")]
    async fn session_start(
        &self,
        params: Parameters<SessionStartParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let result = self
            .run(move |desktop| {
                if desktop.is_running() {
                    return Ok("Session already running. Call session_stop first.".to_string());
                }
                let config = SessionConfig {
                    screen_width: params.screen_width,
                    screen_height: params.screen_height,
                    socket_name: params.socket_name.unwrap_or_default(),
                    extra_env: params.extra_env,
                    enable_clipboard: params.enable_clipboard,
                };
                let info = desktop.start(&config)?;
                let mut message = format!(
                    "Session started. Wayland socket: {} ({}x{})\nInput backend: KWin EIS",
                    info.wayland_socket, info.screen_width, info.screen_height
                );

                if let Some(command) = params.app_command.filter(|c| !c.trim().is_empty()) {
                    let argv: Vec<String> = command.split_whitespace().map(String::from).collect();
                    match desktop.launch(&argv, &BTreeMap::new()) {
                        Ok(app) => message.push_str(&format!(
                            "\nApp launched: {command} (PID={}, log: {})",
                            app.pid,
                            app.log_path.display()
                        )),
                        Err(e) => message.push_str(&format!("\nApp launch failed: {e}")),
                    }
                }
                Ok(message)
            })
            .await;
        respond("Failed to start session", result)
    }

    #[tool(description = "Stop the isolated session and clean up all of its processes")]
    async fn session_stop(&self) -> Result<CallToolResult, McpError> {
        let result = self
            .run(|desktop| {
                if !desktop.is_running() {
                    desktop.stop();
                    return Ok("No session running.".to_string());
                }
                desktop.stop();
                Ok("Session stopped.".to_string())
            })
            .await;
        respond("Failed to stop session", result)
    }

    #[tool(description = "Launch an application inside the running session. Returns its PID and log file.")]
    async fn launch_app(
        &self,
        params: Parameters<LaunchAppParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let result = self
            .run(move |desktop| {
                let argv: Vec<String> = params.command.split_whitespace().map(String::from).collect();
                let app = desktop.launch(&argv, &params.env)?;
                Ok(json!({
                    "pid": app.pid,
                    "command": app.command,
                    "log_path": app.log_path,
                })
                .to_string())
            })
            .await;
        respond("Failed to launch app", result)
    }

    #[tool(description = "Read the captured stdout/stderr of an app started with launch_app")]
    async fn app_log(&self, params: Parameters<AppLogParams>) -> Result<CallToolResult, McpError> {
        let pid = params.0.pid;
        let result = self
            .run(move |desktop| {
                let log = desktop.app_log(pid)?;
                if log.is_empty() {
                    Ok(format!("(no output from PID {pid})"))
                } else {
                    Ok(log)
                }
            })
            .await;
        respond("Failed to read app log", result)
    }

    // ========================================================================
    // Observation
    // ========================================================================

    #[tool(description = "Capture a screenshot of the virtual display, saved to a file (default) or returned as base64 PNG")]
    async fn screenshot(
        &self,
        params: Parameters<ScreenshotParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let as_file = params.format != "base64";
        let result = self
            .run(move |desktop| {
                let shot = desktop.screenshot(params.include_cursor)?;
                let dir = desktop
                    .session()
                    .info()
                    .map(|i| i.log_dir.join("screenshots"))
                    .unwrap_or_else(std::env::temp_dir);
                let path = if as_file {
                    let path = dir.join(format!("screenshot-{}.png", uuid::Uuid::new_v4().simple()));
                    shot.save(&path)?;
                    Some(path)
                } else {
                    None
                };
                Ok((shot, path))
            })
            .await;

        match result {
            Ok((shot, Some(path))) => Ok(CallToolResult::success(vec![Content::text(format!(
                "Screenshot saved: {} ({}x{}, {:.1} KB)",
                path.display(),
                shot.width,
                shot.height,
                shot.png.len() as f64 / 1024.0
            ))])),
            Ok((shot, None)) => Ok(CallToolResult::success(vec![Content::image(
                shot.to_base64(),
                "image/png",
            )])),
            Err(e) => Ok(failure("Failed to capture screenshot", &e)),
        }
    }

    #[tool(description = "Get the accessibility tree of apps in the session: roles, names, states, positions and actions")]
    async fn accessibility_tree(
        &self,
        params: Parameters<AccessibilityTreeParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let result = self
            .run(move |desktop| desktop.accessibility_tree(&params.app_name, params.max_depth))
            .await;
        respond("Failed to read accessibility tree", result)
    }

    #[tool(description = "Find UI elements whose name, role or description contains the query. Returns positions usable with mouse_click.")]
    async fn find_ui_elements(
        &self,
        params: Parameters<FindUiElementsParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let result = self
            .run(move |desktop| {
                let elements = desktop.find_elements(&params.query, &params.app_name)?;
                if elements.is_empty() {
                    return Ok(format!("No elements found matching '{}'", params.query));
                }
                let mut lines = vec![format!("Found {} element(s):", elements.len())];
                for element in &elements {
                    let (cx, cy) = element.center();
                    lines.push(format!("{} center=({cx}, {cy})", element.line().trim_start()));
                }
                Ok(lines.join("\n"))
            })
            .await;
        respond("Failed to search UI elements", result)
    }

    // ========================================================================
    // Mouse
    // ========================================================================

    #[tool(description = "Move the pointer to absolute screen coordinates")]
    async fn mouse_move(
        &self,
        params: Parameters<MouseMoveParams>,
    ) -> Result<CallToolResult, McpError> {
        let MouseMoveParams { x, y } = params.0;
        let result = self
            .run(move |desktop| {
                let (px, py) = point(x, y);
                desktop.input()?.mouse_move(px, py)?;
                Ok(format!("Moved pointer to ({x}, {y})"))
            })
            .await;
        respond("Failed to move pointer", result)
    }

    #[tool(description = "Click at screen coordinates. Supports double/triple click, modifier keys and long-press via hold_ms.")]
    async fn mouse_click(
        &self,
        params: Parameters<MouseClickParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let result = self
            .run(move |desktop| {
                if !(1..=3).contains(&params.click_count) {
                    return Err(Error::Config(format!(
                        "click_count must be 1, 2 or 3, got {}",
                        params.click_count
                    )));
                }
                let button: MouseButton = params.button.parse()?;
                let options = ClickOptions {
                    button,
                    count: params.click_count,
                    modifiers: params.modifiers,
                    hold_ms: params.hold_ms,
                };
                let (x, y) = point(params.x, params.y);
                desktop.input()?.mouse_click(x, y, &options)?;
                let kind = match options.count {
                    1 => "Clicked",
                    2 => "Double-clicked",
                    _ => "Triple-clicked",
                };
                Ok(format!("{kind} {} at ({}, {})", button.name(), params.x, params.y))
            })
            .await;
        respond("Failed to click", result)
    }

    #[tool(description = "Drag from one point to another, optionally through waypoints with dwell times")]
    async fn mouse_drag(
        &self,
        params: Parameters<MouseDragParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let result = self
            .run(move |desktop| {
                let options = DragOptions {
                    button: params.button.parse()?,
                    modifiers: params.modifiers,
                    waypoints: params
                        .waypoints
                        .iter()
                        .map(|w| Waypoint {
                            x: f64::from(w.x),
                            y: f64::from(w.y),
                            dwell_ms: w.dwell_ms,
                        })
                        .collect(),
                };
                desktop.input()?.mouse_drag(
                    point(params.from_x, params.from_y),
                    point(params.to_x, params.to_y),
                    &options,
                )?;
                Ok(format!(
                    "Dragged from ({}, {}) to ({}, {}) via {} waypoint(s)",
                    params.from_x,
                    params.from_y,
                    params.to_x,
                    params.to_y,
                    options.waypoints.len()
                ))
            })
            .await;
        respond("Failed to drag", result)
    }

    #[tool(description = "Move to screen coordinates and press and hold a mouse button")]
    async fn mouse_button_down(
        &self,
        params: Parameters<MouseButtonParams>,
    ) -> Result<CallToolResult, McpError> {
        let MouseButtonParams { x, y, button } = params.0;
        let result = self
            .run(move |desktop| {
                let button: MouseButton = button.parse()?;
                let (px, py) = point(x, y);
                desktop.input()?.mouse_button_down(px, py, button)?;
                Ok(format!("Pressed {} at ({x}, {y})", button.name()))
            })
            .await;
        respond("Failed to press button", result)
    }

    #[tool(description = "Move to screen coordinates and release a mouse button held with mouse_button_down")]
    async fn mouse_button_up(
        &self,
        params: Parameters<MouseButtonParams>,
    ) -> Result<CallToolResult, McpError> {
        let MouseButtonParams { x, y, button } = params.0;
        let result = self
            .run(move |desktop| {
                let button: MouseButton = button.parse()?;
                let (px, py) = point(x, y);
                desktop.input()?.mouse_button_up(px, py, button)?;
                Ok(format!("Released {} at ({x}, {y})", button.name()))
            })
            .await;
        respond("Failed to release button", result)
    }

    #[tool(description = "Scroll at screen coordinates. delta is in wheel detents (positive = down/right).")]
    async fn mouse_scroll(
        &self,
        params: Parameters<MouseScrollParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let result = self
            .run(move |desktop| {
                let options = ScrollOptions {
                    horizontal: params.horizontal,
                    discrete: params.discrete,
                    steps: params.steps,
                };
                let (x, y) = point(params.x, params.y);
                desktop.input()?.mouse_scroll(x, y, params.delta, &options)?;
                let direction = match (params.horizontal, params.delta >= 0) {
                    (false, true) => "down",
                    (false, false) => "up",
                    (true, true) => "right",
                    (true, false) => "left",
                };
                Ok(format!(
                    "Scrolled {direction} by {} at ({}, {})",
                    params.delta.unsigned_abs(),
                    params.x,
                    params.y
                ))
            })
            .await;
        respond("Failed to scroll", result)
    }

    // ========================================================================
    // Keyboard
    // ========================================================================

    #[tool(description = "Type ASCII text (US QWERTY) into the focused window. Use keyboard_type_unicode for other characters.")]
    async fn keyboard_type(
        &self,
        params: Parameters<KeyboardTypeParams>,
    ) -> Result<CallToolResult, McpError> {
        let text = params.0.text;
        let result = self
            .run(move |desktop| {
                let skipped = desktop.input()?.keyboard_type(&text)?;
                let typed = text.chars().count() - skipped.len();
                if skipped.is_empty() {
                    Ok(format!("Typed {typed} character(s)"))
                } else {
                    let skipped: String = skipped.into_iter().collect();
                    Ok(format!(
                        "Typed {typed} character(s); skipped unmapped \"{skipped}\" (try keyboard_type_unicode)"
                    ))
                }
            })
            .await;
        respond("Failed to type text", result)
    }

    #[tool(description = "Type arbitrary Unicode text using wtype, falling back to clipboard paste")]
    async fn keyboard_type_unicode(
        &self,
        params: Parameters<KeyboardTypeParams>,
    ) -> Result<CallToolResult, McpError> {
        let text = params.0.text;
        let result = self
            .run(move |desktop| {
                let method = desktop.type_unicode(&text)?;
                Ok(format!("Typed {} character(s) via {method}", text.chars().count()))
            })
            .await;
        respond("Failed to type text", result)
    }

    #[tool(description = "Press and release a key or combination (e.g. \"Return\", \"ctrl+c\", \"alt+F4\")")]
    async fn keyboard_key(
        &self,
        params: Parameters<KeyboardKeyParams>,
    ) -> Result<CallToolResult, McpError> {
        let key = params.0.key;
        let result = self
            .run(move |desktop| {
                desktop.input()?.keyboard_key(&key)?;
                Ok(format!("Pressed {key}"))
            })
            .await;
        respond("Failed to press key", result)
    }

    #[tool(description = "Press and hold a key or combination (e.g. \"shift\", \"ctrl+shift\") until keyboard_key_up with the same value")]
    async fn keyboard_key_down(
        &self,
        params: Parameters<KeyboardKeyParams>,
    ) -> Result<CallToolResult, McpError> {
        let key = params.0.key;
        let result = self
            .run(move |desktop| {
                desktop.input()?.keyboard_key_down(&key)?;
                Ok(format!("Holding {key}"))
            })
            .await;
        respond("Failed to press key", result)
    }

    #[tool(description = "Release a key or combination held with keyboard_key_down; the key goes up first, then the modifiers in reverse")]
    async fn keyboard_key_up(
        &self,
        params: Parameters<KeyboardKeyParams>,
    ) -> Result<CallToolResult, McpError> {
        let key = params.0.key;
        let result = self
            .run(move |desktop| {
                desktop.input()?.keyboard_key_up(&key)?;
                Ok(format!("Released {key}"))
            })
            .await;
        respond("Failed to release key", result)
    }

    // ========================================================================
    // Touch
    // ========================================================================

    #[tool(description = "Tap at screen coordinates; hold_ms makes it a long-press")]
    async fn touch_tap(
        &self,
        params: Parameters<TouchTapParams>,
    ) -> Result<CallToolResult, McpError> {
        let TouchTapParams { x, y, hold_ms } = params.0;
        let result = self
            .run(move |desktop| {
                let (px, py) = point(x, y);
                desktop.input()?.touch_tap(px, py, hold_ms)?;
                Ok(format!("Tapped at ({x}, {y})"))
            })
            .await;
        respond("Failed to tap", result)
    }

    #[tool(description = "Swipe one finger from one point to another")]
    async fn touch_swipe(
        &self,
        params: Parameters<TouchSwipeParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let result = self
            .run(move |desktop| {
                desktop.input()?.touch_swipe(
                    point(p.from_x, p.from_y),
                    point(p.to_x, p.to_y),
                    p.duration_ms,
                )?;
                Ok(format!(
                    "Swiped from ({}, {}) to ({}, {}) in {} ms",
                    p.from_x, p.from_y, p.to_x, p.to_y, p.duration_ms
                ))
            })
            .await;
        respond("Failed to swipe", result)
    }

    #[tool(description = "Two-finger pinch around a center point; end_distance > start_distance zooms in")]
    async fn touch_pinch(
        &self,
        params: Parameters<TouchPinchParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let result = self
            .run(move |desktop| {
                desktop.input()?.touch_pinch(
                    point(p.center_x, p.center_y),
                    p.start_distance,
                    p.end_distance,
                    p.duration_ms,
                )?;
                let kind = if p.end_distance > p.start_distance { "out" } else { "in" };
                Ok(format!(
                    "Pinched {kind} at ({}, {}): {} -> {} px",
                    p.center_x, p.center_y, p.start_distance, p.end_distance
                ))
            })
            .await;
        respond("Failed to pinch", result)
    }

    #[tool(description = "Swipe with 2 to 5 fingers (e.g. workspace or overview gestures)")]
    async fn touch_multi_swipe(
        &self,
        params: Parameters<TouchMultiSwipeParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let result = self
            .run(move |desktop| {
                desktop.input()?.touch_multi_swipe(
                    point(p.from_x, p.from_y),
                    point(p.to_x, p.to_y),
                    p.fingers,
                    p.duration_ms,
                )?;
                Ok(format!(
                    "{}-finger swipe from ({}, {}) to ({}, {})",
                    p.fingers, p.from_x, p.from_y, p.to_x, p.to_y
                ))
            })
            .await;
        respond("Failed to swipe", result)
    }

    // ========================================================================
    // Clipboard
    // ========================================================================

    #[tool(description = "Read the session clipboard")]
    async fn clipboard_get(&self) -> Result<CallToolResult, McpError> {
        let result = self.run(|desktop| desktop.clipboard_get()).await;
        respond("Failed to read clipboard", result)
    }

    #[tool(description = "Replace the session clipboard contents")]
    async fn clipboard_set(
        &self,
        params: Parameters<ClipboardSetParams>,
    ) -> Result<CallToolResult, McpError> {
        let text = params.0.text;
        let result = self
            .run(move |desktop| {
                desktop.clipboard_set(&text)?;
                Ok(format!("Clipboard set ({} character(s))", text.chars().count()))
            })
            .await;
        respond("Failed to set clipboard", result)
    }
}

#[tool_handler]
impl ServerHandler for MarionetteServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "kwin-marionette drives GUI apps inside an isolated KWin Wayland session. \
                 Call session_start (optionally with app_command), inspect with screenshot, \
                 accessibility_tree or find_ui_elements, then use the mouse_*, keyboard_* and \
                 touch_* tools with screen coordinates. Call session_stop when done."
                    .to_string(),
            ),
        }
    }
}
