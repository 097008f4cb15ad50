//! Emulated input over libei
//!
//! The stack, bottom up: [`negotiation`] gets a channel from KWin and waits
//! for devices, [`injector`] issues framed primitives, [`gestures`] composes
//! them into timed gestures, [`text`] covers text the keymap cannot type.

pub mod gestures;
pub mod injector;
pub mod keymap;
pub mod negotiation;
pub mod text;

use std::sync::Arc;

use crate::backend::Capabilities;
use crate::backend::kwin::KwinEisBroker;
use crate::backend::libei::LibeiSink;
use crate::clock::Clock;
use crate::config::HandshakeOptions;
use crate::error::Result;

pub use gestures::{ClickOptions, Composer, DragOptions, ScrollOptions, Waypoint};
pub use keymap::MouseButton;

/// Client name shown to the compositor
pub const CLIENT_NAME: &str = "kwin-marionette";

/// Negotiate emulated input on the session bus at `dbus_address`
pub fn connect(
    dbus_address: &str,
    clock: Arc<dyn Clock>,
    options: HandshakeOptions,
) -> Result<Composer> {
    let broker = KwinEisBroker::connect(dbus_address)?;
    let (channel, fd) = negotiation::Channel::open(Box::new(broker), Capabilities::REQUESTED)?;
    tracing::debug!(cookie = ?channel.cookie(), "Opened EIS channel");

    let sink = LibeiSink::new(fd, CLIENT_NAME)?;
    let conn = negotiation::EisConnection::negotiate(Box::new(sink), channel, options, clock.as_ref())?;

    let registry = conn.registry();
    tracing::info!(
        devices = registry.distinct().count(),
        touch = registry.slot(crate::core::registry::DeviceClass::Touch).is_some(),
        "Emulated input ready"
    );
    Ok(Composer::new(injector::Injector::new(conn, clock)))
}
