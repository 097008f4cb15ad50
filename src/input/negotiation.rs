//! EIS channel negotiation and device handshake
//!
//! [`Channel`] owns the cookie KWin handed out with the descriptor and
//! releases it exactly once. [`EisConnection::negotiate`] drives the
//! handshake until a pointer and a keyboard are ready, or fails with
//! everything already released.

use std::time::Duration;

use crate::backend::{
    Capabilities, ChannelBroker, DeviceHandle, EiEvent, NativeEventSink, SeatHandle,
};
use crate::clock::Clock;
use crate::config::HandshakeOptions;
use crate::core::registry::{Device, DeviceClass, DeviceRegistry};
use crate::error::{Error, Result};

/// Negotiated EIS channel, released through the broker on drop
pub struct Channel {
    broker: Box<dyn ChannelBroker>,
    cookie: Option<i32>,
}

impl Channel {
    /// Ask the broker for a descriptor carrying `caps`
    ///
    /// The descriptor goes to the native sink; the channel keeps the cookie.
    pub fn open(
        broker: Box<dyn ChannelBroker>,
        caps: Capabilities,
    ) -> Result<(Self, std::os::fd::OwnedFd)> {
        let (fd, cookie) = broker.connect(caps)?;
        Ok((
            Self {
                broker,
                cookie: Some(cookie),
            },
            fd,
        ))
    }

    pub fn cookie(&self) -> Option<i32> {
        self.cookie
    }

    /// Release the cookie; later calls do nothing
    pub fn release(&mut self) {
        if let Some(cookie) = self.cookie.take() {
            if let Err(e) = self.broker.disconnect(cookie) {
                tracing::warn!(cookie, "Failed to release EIS cookie: {}", e);
            } else {
                tracing::debug!(cookie, "Released EIS cookie");
            }
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.release();
    }
}

/// Live protocol context with its negotiated devices
pub struct EisConnection {
    sink: Box<dyn NativeEventSink>,
    channel: Channel,
    registry: DeviceRegistry,
    sequence: u32,
    disconnected: bool,
    closed: bool,
}

impl EisConnection {
    /// Run the device handshake over an already attached sink
    ///
    /// On failure every referenced device and the channel cookie are released
    /// before the error is returned.
    pub fn negotiate(
        sink: Box<dyn NativeEventSink>,
        channel: Channel,
        options: HandshakeOptions,
        clock: &dyn Clock,
    ) -> Result<Self> {
        let mut conn = Self {
            sink,
            channel,
            registry: DeviceRegistry::new(),
            sequence: 0,
            disconnected: false,
            closed: false,
        };
        match conn.handshake(options, clock) {
            Ok(()) => Ok(conn),
            Err(e) => {
                conn.close();
                Err(e)
            }
        }
    }

    fn handshake(&mut self, options: HandshakeOptions, clock: &dyn Clock) -> Result<()> {
        let deadline = clock.now() + options.timeout;

        loop {
            let now = clock.now();
            if now >= deadline {
                break;
            }
            let wait = options.poll_interval.min(deadline - now);
            if self.sink.poll_readable(wait)? {
                self.sink.dispatch()?;
            }

            // Finish the whole drain pass before checking for completion so a
            // touch device queued behind the keyboard is not lost.
            while let Some(event) = self.sink.next_event() {
                if self.handle_event(event) {
                    return Err(Error::Negotiation(
                        "EIS server disconnected during handshake".into(),
                    ));
                }
            }

            if self.ready(DeviceClass::Pointer) && self.ready(DeviceClass::Keyboard) {
                break;
            }
        }

        self.require(DeviceClass::Pointer, options.timeout)?;
        self.require(DeviceClass::Keyboard, options.timeout)?;

        let handles: Vec<DeviceHandle> = self.registry.distinct().map(|d| d.handle).collect();
        for handle in handles {
            self.start_emulating(handle);
        }

        tracing::info!(
            pointer = self.device_name(DeviceClass::Pointer),
            keyboard = self.device_name(DeviceClass::Keyboard),
            touch = self.device_name(DeviceClass::Touch),
            "EIS devices negotiated"
        );
        Ok(())
    }

    fn require(&self, class: DeviceClass, timeout: Duration) -> Result<()> {
        match self.registry.get(class) {
            None => Err(Error::Negotiation(format!(
                "no {} device available from EIS after {:?}",
                class.name(),
                timeout
            ))),
            Some(device) if !device.resumed => Err(Error::Negotiation(format!(
                "{} device '{}' was never resumed within {:?}",
                class.name(),
                device.name,
                timeout
            ))),
            Some(_) => Ok(()),
        }
    }

    fn device_name(&self, class: DeviceClass) -> &str {
        self.registry.get(class).map(|d| d.name.as_str()).unwrap_or("-")
    }

    fn ready(&self, class: DeviceClass) -> bool {
        self.registry.get(class).is_some_and(|d| d.resumed)
    }

    /// Apply one protocol event; returns true on disconnect
    fn handle_event(&mut self, event: EiEvent) -> bool {
        match event {
            EiEvent::Disconnect => {
                self.disconnected = true;
                return true;
            }
            EiEvent::SeatAdded(seat) => self.bind_seat(seat),
            EiEvent::DeviceAdded(device) => self.add_device(device),
            EiEvent::DeviceResumed(device) => {
                if self.registry.set_resumed(device, true) {
                    tracing::debug!(device = device.0, "Device resumed");
                }
            }
            EiEvent::DevicePaused(device) => {
                if self.registry.set_resumed(device, false) {
                    tracing::debug!(device = device.0, "Device paused");
                }
            }
            EiEvent::DeviceRemoved(device) => {
                if let Some(removed) = self.registry.remove(device) {
                    tracing::warn!(device = %removed.name, "EIS device removed");
                    self.sink.device_unref(removed.handle);
                }
            }
            EiEvent::Connect | EiEvent::SeatRemoved(_) | EiEvent::Other(_) => {}
        }
        false
    }

    fn bind_seat(&mut self, seat: SeatHandle) {
        let caps = self
            .sink
            .seat_capabilities(seat)
            .intersection(Capabilities::REQUESTED);
        tracing::debug!(seat = seat.0, ?caps, "Binding seat capabilities");
        if !caps.is_empty() {
            self.sink.bind_capabilities(seat, caps);
        }
    }

    fn add_device(&mut self, device: DeviceHandle) {
        if self.registry.contains(device) {
            return;
        }
        let caps = self.sink.device_capabilities(device);
        let classes = self.registry.wanted(caps);
        if classes.is_empty() {
            return;
        }
        let handle = self.sink.device_ref(device);
        let name = self.sink.device_name(handle);
        tracing::debug!(device = %name, ?caps, ?classes, "Registering EIS device");
        self.registry.register(
            Device {
                handle,
                name,
                caps,
                resumed: false,
                emulating: false,
            },
            &classes,
        );
    }

    fn start_emulating(&mut self, handle: DeviceHandle) {
        let Some(device) = self.registry.device_mut(handle) else {
            return;
        };
        if device.emulating {
            return;
        }
        device.emulating = true;
        self.sequence += 1;
        self.sink.start_emulating(handle, self.sequence);
    }

    /// Push pending writes and apply whatever the compositor sent since
    ///
    /// Late devices fill empty slots and start emulating immediately.
    pub fn flush(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.sink.dispatch() {
            tracing::warn!("EIS dispatch failed: {}", e);
            self.disconnected = true;
            return;
        }
        while let Some(event) = self.sink.next_event() {
            if self.handle_event(event) {
                tracing::warn!("EIS server disconnected");
            }
        }
        let late: Vec<DeviceHandle> = self
            .registry
            .distinct()
            .filter(|d| d.resumed && !d.emulating)
            .map(|d| d.handle)
            .collect();
        for handle in late {
            self.start_emulating(handle);
        }
    }

    /// Device for `class`, refusing if it is missing, paused, or the channel is gone
    pub fn usable(&self, class: DeviceClass) -> Result<DeviceHandle> {
        if self.closed || self.disconnected {
            return Err(Error::NotRunning("EIS channel is disconnected".into()));
        }
        match self.registry.get(class) {
            None => Err(Error::NotRunning(format!("no {} device available", class.name()))),
            Some(device) if !device.resumed => Err(Error::NotRunning(format!(
                "{} device '{}' is paused",
                class.name(),
                device.name
            ))),
            Some(device) => Ok(device.handle),
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn sink(&mut self) -> &mut dyn NativeEventSink {
        self.sink.as_mut()
    }

    pub fn is_connected(&self) -> bool {
        !self.closed && !self.disconnected
    }

    /// Stop emulating and release every device, then the cookie
    ///
    /// The native context itself goes when the connection is dropped.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        for device in self.registry.drain() {
            if device.emulating {
                self.sink.stop_emulating(device.handle);
            }
            self.sink.device_unref(device.handle);
        }
        if let Err(e) = self.sink.dispatch() {
            tracing::debug!("Final EIS dispatch failed: {}", e);
        }
        self.channel.release();
        tracing::debug!("EIS connection closed");
    }
}

impl Drop for EisConnection {
    fn drop(&mut self) {
        self.close();
    }
}
