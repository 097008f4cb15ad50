//! KWin's private EIS endpoint
//!
//! `org.kde.KWin.EIS.RemoteDesktop` hands out an EIS socket directly,
//! skipping the RemoteDesktop portal and its interactive authorization.
//! Only reachable on the isolated session's own bus.

use std::os::fd::OwnedFd;

use zbus::blocking::Connection;

use super::{Capabilities, ChannelBroker};
use crate::error::{Error, Result};

const KWIN_SERVICE: &str = "org.kde.KWin";
const EIS_PATH: &str = "/org/kde/KWin/EIS/RemoteDesktop";
const EIS_INTERFACE: &str = "org.kde.KWin.EIS.RemoteDesktop";

/// Negotiation broker bound to one session bus
pub struct KwinEisBroker {
    dbus: Connection,
}

impl KwinEisBroker {
    /// Connect to the session bus at `address`
    pub fn connect(address: &str) -> Result<Self> {
        if address.is_empty() {
            return Err(Error::NotRunning(
                "session has no D-Bus address to negotiate input on".into(),
            ));
        }
        let dbus = zbus::blocking::connection::Builder::address(address)?.build()?;
        tracing::debug!(address, "Connected to isolated session bus");
        Ok(Self { dbus })
    }
}

impl ChannelBroker for KwinEisBroker {
    fn connect(&self, caps: Capabilities) -> Result<(OwnedFd, i32)> {
        let reply = self
            .dbus
            .call_method(
                Some(KWIN_SERVICE),
                EIS_PATH,
                Some(EIS_INTERFACE),
                "connectToEIS",
                &(caps.bits() as i32,),
            )
            .map_err(|e| Error::ChannelSetup(format!("connectToEIS failed: {e}")))?;

        let (fd, cookie): (zbus::zvariant::OwnedFd, i32) = reply.body().deserialize()?;
        tracing::debug!(cookie, ?caps, "KWin granted EIS channel");
        Ok((OwnedFd::from(fd), cookie))
    }

    fn disconnect(&self, cookie: i32) -> Result<()> {
        self.dbus.call_method(
            Some(KWIN_SERVICE),
            EIS_PATH,
            Some(EIS_INTERFACE),
            "disconnect",
            &(cookie,),
        )?;
        Ok(())
    }
}
