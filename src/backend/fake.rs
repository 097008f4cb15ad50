//! Recording sink and broker for exercising the input stack without a compositor

use std::collections::{HashMap, VecDeque};
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{
    Capabilities, ChannelBroker, DeviceHandle, EiEvent, NativeEventSink, SeatHandle, TouchHandle,
};
use crate::clock::{Clock, ManualClock};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Dispatch,
    Bind(SeatHandle, Capabilities),
    Ref(DeviceHandle),
    Unref(DeviceHandle),
    StartEmulating(DeviceHandle, u32),
    StopEmulating(DeviceHandle),
    Motion(DeviceHandle, f64, f64),
    Button(DeviceHandle, u32, bool),
    ScrollDelta(DeviceHandle, f64, f64),
    ScrollDiscrete(DeviceHandle, i32, i32),
    ScrollStop(DeviceHandle),
    Key(DeviceHandle, u32, bool),
    TouchNew(DeviceHandle, TouchHandle),
    TouchDown(TouchHandle, f64, f64),
    TouchMotion(TouchHandle, f64, f64),
    TouchUp(TouchHandle),
    TouchUnref(TouchHandle),
    Frame(DeviceHandle),
}

#[derive(Default)]
pub struct FakeState {
    pub calls: Vec<Call>,
    /// Each batch becomes readable on one poll and is queued by the next dispatch
    pub batches: VecDeque<Vec<EiEvent>>,
    pub queued: VecDeque<EiEvent>,
    pub seats: HashMap<SeatHandle, Capabilities>,
    pub devices: HashMap<DeviceHandle, Capabilities>,
    pub next_touch: usize,
    pub fail_dispatch: bool,
}

/// Shared view onto a [`FakeSink`] that stays usable after the sink is boxed
#[derive(Clone, Default)]
pub struct FakeHandle {
    state: Arc<Mutex<FakeState>>,
}

impl FakeHandle {
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        f(&mut self.state.lock())
    }

    pub fn add_seat(&self, seat: usize, caps: Capabilities) -> SeatHandle {
        let handle = SeatHandle(seat);
        self.with(|s| s.seats.insert(handle, caps));
        handle
    }

    pub fn add_device(&self, device: usize, caps: Capabilities) -> DeviceHandle {
        let handle = DeviceHandle(device);
        self.with(|s| s.devices.insert(handle, caps));
        handle
    }

    pub fn push_batch(&self, events: Vec<EiEvent>) {
        self.with(|s| s.batches.push_back(events));
    }

    /// Events delivered on the next dispatch, with no poll in between
    pub fn queue_now(&self, events: Vec<EiEvent>) {
        self.with(|s| s.queued.extend(events));
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| pred(c)).count()
    }
}

pub struct FakeSink {
    handle: FakeHandle,
    clock: Arc<ManualClock>,
}

impl FakeSink {
    pub fn new(clock: Arc<ManualClock>) -> (Self, FakeHandle) {
        let handle = FakeHandle::default();
        (
            Self {
                handle: handle.clone(),
                clock,
            },
            handle,
        )
    }

    fn record(&self, call: Call) {
        self.handle.state.lock().calls.push(call);
    }
}

impl NativeEventSink for FakeSink {
    fn poll_readable(&mut self, timeout: Duration) -> Result<bool> {
        let ready = !self.handle.state.lock().batches.is_empty();
        if !ready {
            self.clock.advance(timeout);
        }
        Ok(ready)
    }

    fn dispatch(&mut self) -> Result<()> {
        let mut state = self.handle.state.lock();
        state.calls.push(Call::Dispatch);
        if state.fail_dispatch {
            return Err(crate::error::Error::Negotiation("fake dispatch failure".into()));
        }
        if let Some(batch) = state.batches.pop_front() {
            state.queued.extend(batch);
        }
        Ok(())
    }

    fn next_event(&mut self) -> Option<EiEvent> {
        self.handle.state.lock().queued.pop_front()
    }

    fn seat_capabilities(&self, seat: SeatHandle) -> Capabilities {
        self.handle.state.lock().seats.get(&seat).copied().unwrap_or_default()
    }

    fn bind_capabilities(&mut self, seat: SeatHandle, caps: Capabilities) {
        self.record(Call::Bind(seat, caps));
    }

    fn device_name(&self, device: DeviceHandle) -> String {
        format!("fake-device-{}", device.0)
    }

    fn device_capabilities(&self, device: DeviceHandle) -> Capabilities {
        self.handle.state.lock().devices.get(&device).copied().unwrap_or_default()
    }

    fn device_ref(&mut self, device: DeviceHandle) -> DeviceHandle {
        self.record(Call::Ref(device));
        device
    }

    fn device_unref(&mut self, device: DeviceHandle) {
        self.record(Call::Unref(device));
    }

    fn start_emulating(&mut self, device: DeviceHandle, sequence: u32) {
        self.record(Call::StartEmulating(device, sequence));
    }

    fn stop_emulating(&mut self, device: DeviceHandle) {
        self.record(Call::StopEmulating(device));
    }

    fn pointer_motion_absolute(&mut self, device: DeviceHandle, x: f64, y: f64) {
        self.record(Call::Motion(device, x, y));
    }

    fn button(&mut self, device: DeviceHandle, code: u32, pressed: bool) {
        self.record(Call::Button(device, code, pressed));
    }

    fn scroll_delta(&mut self, device: DeviceHandle, dx: f64, dy: f64) {
        self.record(Call::ScrollDelta(device, dx, dy));
    }

    fn scroll_discrete(&mut self, device: DeviceHandle, dx: i32, dy: i32) {
        self.record(Call::ScrollDiscrete(device, dx, dy));
    }

    fn scroll_stop(&mut self, device: DeviceHandle, _x: bool, _y: bool) {
        self.record(Call::ScrollStop(device));
    }

    fn key(&mut self, device: DeviceHandle, code: u32, pressed: bool) {
        self.record(Call::Key(device, code, pressed));
    }

    fn touch_new(&mut self, device: DeviceHandle) -> Option<TouchHandle> {
        let mut state = self.handle.state.lock();
        let caps = state.devices.get(&device).copied().unwrap_or_default();
        if !caps.contains(Capabilities::TOUCH) {
            return None;
        }
        state.next_touch += 1;
        let touch = TouchHandle(1000 + state.next_touch);
        state.calls.push(Call::TouchNew(device, touch));
        Some(touch)
    }

    fn touch_down(&mut self, touch: TouchHandle, x: f64, y: f64) {
        self.record(Call::TouchDown(touch, x, y));
    }

    fn touch_motion(&mut self, touch: TouchHandle, x: f64, y: f64) {
        self.record(Call::TouchMotion(touch, x, y));
    }

    fn touch_up(&mut self, touch: TouchHandle) {
        self.record(Call::TouchUp(touch));
    }

    fn touch_unref(&mut self, touch: TouchHandle) {
        self.record(Call::TouchUnref(touch));
    }

    fn frame(&mut self, device: DeviceHandle, _time_us: u64) {
        self.record(Call::Frame(device));
    }
}

/// Broker that hands out one end of a socketpair and records releases
#[derive(Clone, Default)]
pub struct FakeBroker {
    pub log: Arc<Mutex<Vec<String>>>,
    pub refuse: bool,
}

impl FakeBroker {
    pub fn entries(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

impl ChannelBroker for FakeBroker {
    fn connect(&self, caps: Capabilities) -> Result<(OwnedFd, i32)> {
        if self.refuse {
            return Err(crate::error::Error::ChannelSetup("refused".into()));
        }
        let (ours, _theirs) = UnixStream::pair()?;
        self.log.lock().push(format!("connect {}", caps.bits()));
        Ok((OwnedFd::from(ours), 42))
    }

    fn disconnect(&self, cookie: i32) -> Result<()> {
        self.log.lock().push(format!("disconnect {cookie}"));
        Ok(())
    }
}

/// Clock and sink pair where polling without data burns handshake budget
pub fn sink_with_clock() -> (FakeSink, FakeHandle, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let (sink, handle) = FakeSink::new(Arc::clone(&clock));
    (sink, handle, clock)
}

#[allow(dead_code)]
pub fn as_clock(clock: &Arc<ManualClock>) -> Arc<dyn Clock> {
    Arc::clone(clock) as Arc<dyn Clock>
}
