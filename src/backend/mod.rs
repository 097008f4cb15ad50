//! Native event-injection abstraction
//!
//! The input stack talks to the compositor through two narrow seams:
//! [`ChannelBroker`] hands out an EIS file descriptor over D-Bus, and
//! [`NativeEventSink`] speaks the emulated-input protocol over it. The
//! concrete implementations are [`kwin::KwinEisBroker`] and
//! [`libei::LibeiSink`].

pub mod kwin;
pub mod libei;

use std::os::fd::OwnedFd;
use std::time::Duration;

use bitflags::bitflags;

use crate::error::Result;

bitflags! {
    /// Capability bitset shared by seats and devices
    ///
    /// Bit layout matches both the KWin D-Bus call and libei's `ei_device_capability`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Capabilities: u32 {
        const POINTER = 1 << 0;
        const POINTER_ABSOLUTE = 1 << 1;
        const KEYBOARD = 1 << 2;
        const TOUCH = 1 << 3;
        const SCROLL = 1 << 4;
        const BUTTON = 1 << 5;
    }
}

impl Capabilities {
    /// Everything the automation stack asks the compositor for
    pub const REQUESTED: Self = Self::all();
}

/// Opaque native seat handle, borrowed from the event that announced it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SeatHandle(pub usize);

/// Opaque native device handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub usize);

/// Opaque native touch handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TouchHandle(pub usize);

/// Protocol events the input stack reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EiEvent {
    Connect,
    Disconnect,
    SeatAdded(SeatHandle),
    SeatRemoved(SeatHandle),
    DeviceAdded(DeviceHandle),
    DeviceRemoved(DeviceHandle),
    DevicePaused(DeviceHandle),
    DeviceResumed(DeviceHandle),
    /// Anything else; carries the raw event type
    Other(i32),
}

/// Emulated-input protocol context bound to one EIS descriptor
///
/// Handles returned inside events are only borrowed; a device must be
/// [`device_ref`](Self::device_ref)'d to outlive its event and
/// [`device_unref`](Self::device_unref)'d exactly once afterwards.
pub trait NativeEventSink: Send {
    /// Wait up to `timeout` for protocol data; `Ok(false)` on timeout
    fn poll_readable(&mut self, timeout: Duration) -> Result<bool>;

    /// Read and write pending protocol data; an error means the socket is gone
    fn dispatch(&mut self) -> Result<()>;

    /// Pop the next queued event, if any
    fn next_event(&mut self) -> Option<EiEvent>;

    fn seat_capabilities(&self, seat: SeatHandle) -> Capabilities;
    fn bind_capabilities(&mut self, seat: SeatHandle, caps: Capabilities);

    fn device_name(&self, device: DeviceHandle) -> String;
    fn device_capabilities(&self, device: DeviceHandle) -> Capabilities;
    fn device_ref(&mut self, device: DeviceHandle) -> DeviceHandle;
    fn device_unref(&mut self, device: DeviceHandle);
    fn start_emulating(&mut self, device: DeviceHandle, sequence: u32);
    fn stop_emulating(&mut self, device: DeviceHandle);

    fn pointer_motion_absolute(&mut self, device: DeviceHandle, x: f64, y: f64);
    fn button(&mut self, device: DeviceHandle, code: u32, pressed: bool);
    fn scroll_delta(&mut self, device: DeviceHandle, dx: f64, dy: f64);
    fn scroll_discrete(&mut self, device: DeviceHandle, dx: i32, dy: i32);
    fn scroll_stop(&mut self, device: DeviceHandle, x: bool, y: bool);
    fn key(&mut self, device: DeviceHandle, code: u32, pressed: bool);

    fn touch_new(&mut self, device: DeviceHandle) -> Option<TouchHandle>;
    fn touch_down(&mut self, touch: TouchHandle, x: f64, y: f64);
    fn touch_motion(&mut self, touch: TouchHandle, x: f64, y: f64);
    fn touch_up(&mut self, touch: TouchHandle);
    fn touch_unref(&mut self, touch: TouchHandle);

    /// Commit pending state on `device`, stamped in monotonic microseconds
    fn frame(&mut self, device: DeviceHandle, time_us: u64);
}

/// Compositor-side call that trades a capability mask for an EIS descriptor
pub trait ChannelBroker: Send {
    /// Returns the descriptor and the cookie that releases it
    fn connect(&self, caps: Capabilities) -> Result<(OwnedFd, i32)>;
    fn disconnect(&self, cookie: i32) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod fake;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requested_covers_every_named_capability() {
        let all: Vec<_> = Capabilities::REQUESTED.iter().collect();
        assert_eq!(all.len(), 6);
        assert_eq!(all[0], Capabilities::POINTER);
        assert_eq!(all[5], Capabilities::BUTTON);
        assert_eq!(Capabilities::REQUESTED.bits(), 63);
    }

    #[test]
    fn device_caps_are_clipped_to_the_request() {
        let caps = Capabilities::POINTER_ABSOLUTE | Capabilities::BUTTON;
        assert!(caps.contains(Capabilities::BUTTON));
        assert!(!caps.contains(Capabilities::KEYBOARD));
        assert_eq!(
            caps.intersection(Capabilities::REQUESTED),
            Capabilities::POINTER_ABSOLUTE | Capabilities::BUTTON
        );
        assert!(caps.intersection(Capabilities::TOUCH).is_empty());
    }
}
