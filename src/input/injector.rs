//! Primitive device operations
//!
//! Every primitive is followed by a frame on the device it touched and an
//! immediate dispatch, so the compositor sees events in issue order per
//! device. Nothing is ordered across devices.

use std::sync::Arc;

use crate::backend::DeviceHandle;
use crate::clock::Clock;
use crate::core::registry::{ActiveTouch, DeviceClass, TouchTable};
use crate::error::{Error, Result};
use crate::input::negotiation::EisConnection;

pub struct Injector {
    conn: EisConnection,
    touches: TouchTable,
    clock: Arc<dyn Clock>,
    closed: bool,
}

impl Injector {
    pub fn new(conn: EisConnection, clock: Arc<dyn Clock>) -> Self {
        Self {
            conn,
            touches: TouchTable::new(),
            clock,
            closed: false,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn connection(&self) -> &EisConnection {
        &self.conn
    }

    fn commit(&mut self, device: DeviceHandle) {
        let now = self.clock.now_micros();
        self.conn.sink().frame(device, now);
        self.conn.flush();
    }

    fn pointer(&self) -> Result<DeviceHandle> {
        self.conn.usable(DeviceClass::Pointer)
    }

    fn keyboard(&self) -> Result<DeviceHandle> {
        self.conn.usable(DeviceClass::Keyboard)
    }

    /// Touch-capable device, else the pointer device
    fn touch_device(&self) -> Result<DeviceHandle> {
        match self.conn.usable(DeviceClass::Touch) {
            Ok(device) => Ok(device),
            Err(_) if self.conn.registry().slot(DeviceClass::Touch).is_none() => self.pointer(),
            Err(e) => Err(e),
        }
    }

    pub fn pointer_move_absolute(&mut self, x: f64, y: f64) -> Result<()> {
        let device = self.pointer()?;
        self.conn.sink().pointer_motion_absolute(device, x, y);
        self.commit(device);
        Ok(())
    }

    /// Press or release an evdev button code
    pub fn pointer_button(&mut self, code: u32, pressed: bool) -> Result<()> {
        let device = self.pointer()?;
        self.conn.sink().button(device, code, pressed);
        self.commit(device);
        Ok(())
    }

    /// Smooth scroll in logical pixels
    pub fn scroll_delta(&mut self, dx: f64, dy: f64) -> Result<()> {
        let device = self.pointer()?;
        self.conn.sink().scroll_delta(device, dx, dy);
        self.commit(device);
        Ok(())
    }

    /// Wheel scroll in protocol units (120 per detent)
    pub fn scroll_discrete(&mut self, dx: i32, dy: i32) -> Result<()> {
        let device = self.pointer()?;
        self.conn.sink().scroll_discrete(device, dx, dy);
        self.commit(device);
        Ok(())
    }

    pub fn scroll_stop(&mut self) -> Result<()> {
        let device = self.pointer()?;
        self.conn.sink().scroll_stop(device, true, true);
        self.commit(device);
        Ok(())
    }

    /// Press or release an evdev key code
    pub fn key(&mut self, code: u32, pressed: bool) -> Result<()> {
        let device = self.keyboard()?;
        self.conn.sink().key(device, code, pressed);
        self.commit(device);
        Ok(())
    }

    /// Put a new finger down; returns its id
    pub fn touch_down(&mut self, x: f64, y: f64) -> Result<u32> {
        let device = self.touch_device()?;
        let handle = self.conn.sink().touch_new(device).ok_or_else(|| {
            Error::NotRunning("failed to create touch object: no touch-capable device".into())
        })?;
        self.conn.sink().touch_down(handle, x, y);
        self.commit(device);
        Ok(self.touches.insert(ActiveTouch { handle, device }))
    }

    pub fn touch_move(&mut self, id: u32, x: f64, y: f64) -> Result<()> {
        let touch = self.touches.get(id).ok_or(Error::UnknownTouch(id))?;
        self.conn.sink().touch_motion(touch.handle, x, y);
        self.commit(touch.device);
        Ok(())
    }

    pub fn touch_up(&mut self, id: u32) -> Result<()> {
        let touch = self.touches.remove(id).ok_or(Error::UnknownTouch(id))?;
        let sink = self.conn.sink();
        sink.touch_up(touch.handle);
        let now = self.clock.now_micros();
        sink.frame(touch.device, now);
        sink.touch_unref(touch.handle);
        self.conn.flush();
        Ok(())
    }

    pub fn active_touches(&self) -> usize {
        self.touches.len()
    }

    /// Lift outstanding touches, then release devices and the channel
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let stale = self.touches.drain();
        if !stale.is_empty() {
            tracing::debug!(count = stale.len(), "Force-releasing touches");
        }
        let mut framed: Vec<DeviceHandle> = Vec::new();
        for (_, touch) in &stale {
            self.conn.sink().touch_up(touch.handle);
            if !framed.contains(&touch.device) {
                framed.push(touch.device);
            }
        }
        let now = self.clock.now_micros();
        for device in framed {
            self.conn.sink().frame(device, now);
        }
        for (_, touch) in stale {
            self.conn.sink().touch_unref(touch.handle);
        }

        self.conn.close();
    }
}

impl Drop for Injector {
    fn drop(&mut self) {
        self.close();
    }
}
