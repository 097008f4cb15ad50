//! kwin-marionette - GUI automation MCP server for isolated KWin Wayland sessions
//!
//! Starts a private KWin compositor on a virtual display with its own D-Bus
//! session, negotiates emulated input through KWin's EIS endpoint, and exposes
//! pointer, keyboard, touch, screenshot, accessibility and clipboard tools.
//!
//! ## Layout
//!
//! - [`core::session`]: compositor lifecycle and launched apps
//! - [`input`]: EIS negotiation, event injection and gestures
//! - [`accessibility`]: AT-SPI tree reading
//! - [`server`]: the MCP tool surface

pub mod accessibility;
pub mod backend;
pub mod clipboard;
pub mod clock;
pub mod config;
pub mod core;
pub mod error;
pub mod input;
pub mod screenshot;
pub mod server;
