//! libei sender context, loaded from `libei.so.1` at runtime
//!
//! Loading at runtime keeps the build free of libei headers; a missing
//! library surfaces as a channel setup failure when input is negotiated.

use std::ffi::{CStr, CString, c_char, c_int, c_uint, c_void};
use std::os::fd::{BorrowedFd, IntoRawFd, OwnedFd};
use std::ptr;
use std::time::Duration;

use libloading::Library;
use nix::poll::{PollFd, PollFlags, PollTimeout};

use super::{
    Capabilities, DeviceHandle, EiEvent, NativeEventSink, SeatHandle, TouchHandle,
};
use crate::error::{Error, Result};

const LIBEI_SONAME: &str = "libei.so.1";

// enum ei_event_type
const EI_EVENT_CONNECT: c_int = 1;
const EI_EVENT_DISCONNECT: c_int = 2;
const EI_EVENT_SEAT_ADDED: c_int = 3;
const EI_EVENT_SEAT_REMOVED: c_int = 4;
const EI_EVENT_DEVICE_ADDED: c_int = 5;
const EI_EVENT_DEVICE_REMOVED: c_int = 6;
const EI_EVENT_DEVICE_PAUSED: c_int = 7;
const EI_EVENT_DEVICE_RESUMED: c_int = 8;

type Ptr = *mut c_void;

/// Resolved libei entry points
///
/// The `Library` field keeps every other pointer valid.
struct Api {
    new_sender: unsafe extern "C" fn(Ptr) -> Ptr,
    configure_name: unsafe extern "C" fn(Ptr, *const c_char),
    setup_backend_fd: unsafe extern "C" fn(Ptr, c_int) -> c_int,
    get_fd: unsafe extern "C" fn(Ptr) -> c_int,
    dispatch: unsafe extern "C" fn(Ptr),
    unref: unsafe extern "C" fn(Ptr) -> Ptr,
    get_event: unsafe extern "C" fn(Ptr) -> Ptr,
    event_get_type: unsafe extern "C" fn(Ptr) -> c_int,
    event_unref: unsafe extern "C" fn(Ptr) -> Ptr,
    event_get_seat: unsafe extern "C" fn(Ptr) -> Ptr,
    event_get_device: unsafe extern "C" fn(Ptr) -> Ptr,
    seat_has_capability: unsafe extern "C" fn(Ptr, c_uint) -> bool,
    seat_bind_capabilities: unsafe extern "C" fn(Ptr, ...),
    device_get_name: unsafe extern "C" fn(Ptr) -> *const c_char,
    device_has_capability: unsafe extern "C" fn(Ptr, c_uint) -> bool,
    device_ref: unsafe extern "C" fn(Ptr) -> Ptr,
    device_unref: unsafe extern "C" fn(Ptr) -> Ptr,
    start_emulating: unsafe extern "C" fn(Ptr, u32),
    stop_emulating: unsafe extern "C" fn(Ptr),
    frame: unsafe extern "C" fn(Ptr, u64),
    motion_absolute: unsafe extern "C" fn(Ptr, f64, f64),
    button: unsafe extern "C" fn(Ptr, u32, bool),
    scroll_delta: unsafe extern "C" fn(Ptr, f64, f64),
    scroll_discrete: unsafe extern "C" fn(Ptr, i32, i32),
    scroll_stop: unsafe extern "C" fn(Ptr, bool, bool),
    keyboard_key: unsafe extern "C" fn(Ptr, u32, bool),
    touch_new: unsafe extern "C" fn(Ptr) -> Ptr,
    touch_down: unsafe extern "C" fn(Ptr, f64, f64),
    touch_motion: unsafe extern "C" fn(Ptr, f64, f64),
    touch_up: unsafe extern "C" fn(Ptr),
    touch_unref: unsafe extern "C" fn(Ptr) -> Ptr,
    _lib: Library,
}

/// Copy one entry point out of `lib`
///
/// # Safety
/// `T` must match the C signature of `name`.
unsafe fn symbol<T: Copy>(lib: &Library, name: &str) -> Result<T> {
    let cname = format!("{name}\0");
    // SAFETY: forwarded to the caller.
    let sym: libloading::Symbol<'_, T> = unsafe { lib.get(cname.as_bytes()) }
        .map_err(|e| Error::ChannelSetup(format!("{LIBEI_SONAME}: missing {name}: {e}")))?;
    Ok(*sym)
}

impl Api {
    fn load() -> Result<Self> {
        // SAFETY: libei has no load-time initialisers with preconditions.
        let lib = unsafe { Library::new(LIBEI_SONAME) }
            .map_err(|e| Error::ChannelSetup(format!("cannot load {LIBEI_SONAME}: {e}")))?;

        // SAFETY: every field type below mirrors libei's public header.
        Ok(Self {
            new_sender: unsafe { symbol(&lib, "ei_new_sender") }?,
            configure_name: unsafe { symbol(&lib, "ei_configure_name") }?,
            setup_backend_fd: unsafe { symbol(&lib, "ei_setup_backend_fd") }?,
            get_fd: unsafe { symbol(&lib, "ei_get_fd") }?,
            dispatch: unsafe { symbol(&lib, "ei_dispatch") }?,
            unref: unsafe { symbol(&lib, "ei_unref") }?,
            get_event: unsafe { symbol(&lib, "ei_get_event") }?,
            event_get_type: unsafe { symbol(&lib, "ei_event_get_type") }?,
            event_unref: unsafe { symbol(&lib, "ei_event_unref") }?,
            event_get_seat: unsafe { symbol(&lib, "ei_event_get_seat") }?,
            event_get_device: unsafe { symbol(&lib, "ei_event_get_device") }?,
            seat_has_capability: unsafe { symbol(&lib, "ei_seat_has_capability") }?,
            seat_bind_capabilities: unsafe { symbol(&lib, "ei_seat_bind_capabilities") }?,
            device_get_name: unsafe { symbol(&lib, "ei_device_get_name") }?,
            device_has_capability: unsafe { symbol(&lib, "ei_device_has_capability") }?,
            device_ref: unsafe { symbol(&lib, "ei_device_ref") }?,
            device_unref: unsafe { symbol(&lib, "ei_device_unref") }?,
            start_emulating: unsafe { symbol(&lib, "ei_device_start_emulating") }?,
            stop_emulating: unsafe { symbol(&lib, "ei_device_stop_emulating") }?,
            frame: unsafe { symbol(&lib, "ei_device_frame") }?,
            motion_absolute: unsafe { symbol(&lib, "ei_device_pointer_motion_absolute") }?,
            button: unsafe { symbol(&lib, "ei_device_button_button") }?,
            scroll_delta: unsafe { symbol(&lib, "ei_device_scroll_delta") }?,
            scroll_discrete: unsafe { symbol(&lib, "ei_device_scroll_discrete") }?,
            scroll_stop: unsafe { symbol(&lib, "ei_device_scroll_stop") }?,
            keyboard_key: unsafe { symbol(&lib, "ei_device_keyboard_key") }?,
            touch_new: unsafe { symbol(&lib, "ei_device_touch_new") }?,
            touch_down: unsafe { symbol(&lib, "ei_touch_down") }?,
            touch_motion: unsafe { symbol(&lib, "ei_touch_motion") }?,
            touch_up: unsafe { symbol(&lib, "ei_touch_up") }?,
            touch_unref: unsafe { symbol(&lib, "ei_touch_unref") }?,
            _lib: lib,
        })
    }
}

/// A libei sender context attached to an EIS descriptor
pub struct LibeiSink {
    api: Api,
    ctx: Ptr,
    /// Last event handed out; its seat/device pointers stay valid until it is unref'd
    current: Ptr,
}

// SAFETY: the context is only ever driven by one thread at a time; the
// owner keeps it behind the desktop mutex.
unsafe impl Send for LibeiSink {}

impl LibeiSink {
    /// Create a sender context named `name` and hand `fd` over to it
    pub fn new(fd: OwnedFd, name: &str) -> Result<Self> {
        let api = Api::load()?;

        // SAFETY: a null user-data pointer is permitted.
        let ctx = unsafe { (api.new_sender)(ptr::null_mut()) };
        if ctx.is_null() {
            return Err(Error::ChannelSetup("failed to create EI context".into()));
        }

        let name = CString::new(name).map_err(|e| Error::ChannelSetup(e.to_string()))?;
        // SAFETY: ctx is live, name outlives the call.
        unsafe { (api.configure_name)(ctx, name.as_ptr()) };

        // libei takes ownership of the descriptor.
        let raw = fd.into_raw_fd();
        // SAFETY: ctx is live and raw is an open socket.
        let ret = unsafe { (api.setup_backend_fd)(ctx, raw) };
        if ret != 0 {
            // SAFETY: ctx was created above and is released exactly once here.
            unsafe { (api.unref)(ctx) };
            return Err(Error::ChannelSetup(format!("ei_setup_backend_fd failed: {ret}")));
        }

        tracing::debug!("libei sender context attached");
        Ok(Self {
            api,
            ctx,
            current: ptr::null_mut(),
        })
    }

    fn release_current(&mut self) {
        if !self.current.is_null() {
            // SAFETY: current came from ei_get_event and has not been released.
            unsafe { (self.api.event_unref)(self.current) };
            self.current = ptr::null_mut();
        }
    }

    fn ptr(handle: usize) -> Ptr {
        handle as Ptr
    }
}

impl NativeEventSink for LibeiSink {
    fn poll_readable(&mut self, timeout: Duration) -> Result<bool> {
        // SAFETY: ctx is live.
        let raw = unsafe { (self.api.get_fd)(self.ctx) };
        if raw < 0 {
            return Err(Error::Negotiation("EI context has no descriptor".into()));
        }
        // SAFETY: libei keeps the descriptor open for the context's lifetime.
        let fd = unsafe { BorrowedFd::borrow_raw(raw) };
        let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
        let ms = timeout.as_millis().min(u16::MAX as u128) as u16;
        match nix::poll::poll(&mut fds, PollTimeout::from(ms)) {
            Ok(n) => Ok(n > 0),
            Err(nix::errno::Errno::EINTR) => Ok(false),
            Err(e) => Err(Error::Io(e.into())),
        }
    }

    fn dispatch(&mut self) -> Result<()> {
        // SAFETY: ctx is live.
        unsafe { (self.api.dispatch)(self.ctx) };
        Ok(())
    }

    fn next_event(&mut self) -> Option<EiEvent> {
        self.release_current();
        // SAFETY: ctx is live; the returned event is owned until unref.
        let event = unsafe { (self.api.get_event)(self.ctx) };
        if event.is_null() {
            return None;
        }
        self.current = event;

        // SAFETY: event is live for the duration of these accessors.
        let kind = unsafe { (self.api.event_get_type)(event) };
        let seat = || SeatHandle(unsafe { (self.api.event_get_seat)(event) } as usize);
        let device = || DeviceHandle(unsafe { (self.api.event_get_device)(event) } as usize);

        Some(match kind {
            EI_EVENT_CONNECT => EiEvent::Connect,
            EI_EVENT_DISCONNECT => EiEvent::Disconnect,
            EI_EVENT_SEAT_ADDED => EiEvent::SeatAdded(seat()),
            EI_EVENT_SEAT_REMOVED => EiEvent::SeatRemoved(seat()),
            EI_EVENT_DEVICE_ADDED => EiEvent::DeviceAdded(device()),
            EI_EVENT_DEVICE_REMOVED => EiEvent::DeviceRemoved(device()),
            EI_EVENT_DEVICE_PAUSED => EiEvent::DevicePaused(device()),
            EI_EVENT_DEVICE_RESUMED => EiEvent::DeviceResumed(device()),
            other => EiEvent::Other(other),
        })
    }

    fn seat_capabilities(&self, seat: SeatHandle) -> Capabilities {
        let mut caps = Capabilities::empty();
        for cap in Capabilities::REQUESTED.iter() {
            // SAFETY: seat handles come from live events.
            if unsafe { (self.api.seat_has_capability)(Self::ptr(seat.0), cap.bits()) } {
                caps |= cap;
            }
        }
        caps
    }

    fn bind_capabilities(&mut self, seat: SeatHandle, caps: Capabilities) {
        // The variadic list is zero-terminated; unused slots repeat the terminator.
        let mut slots = [0 as c_uint; 6];
        for (slot, cap) in slots.iter_mut().zip(caps.iter()) {
            *slot = cap.bits();
        }
        let [a, b, c, d, e, f] = slots;
        // SAFETY: seat is live; the argument list ends with 0.
        unsafe {
            (self.api.seat_bind_capabilities)(Self::ptr(seat.0), a, b, c, d, e, f, 0 as c_uint)
        };
    }

    fn device_name(&self, device: DeviceHandle) -> String {
        // SAFETY: device is live; the name is owned by libei.
        let name = unsafe { (self.api.device_get_name)(Self::ptr(device.0)) };
        if name.is_null() {
            return String::from("(unnamed)");
        }
        // SAFETY: libei returns a NUL-terminated string.
        unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned()
    }

    fn device_capabilities(&self, device: DeviceHandle) -> Capabilities {
        let mut caps = Capabilities::empty();
        for cap in Capabilities::REQUESTED.iter() {
            // SAFETY: device is live.
            if unsafe { (self.api.device_has_capability)(Self::ptr(device.0), cap.bits()) } {
                caps |= cap;
            }
        }
        caps
    }

    fn device_ref(&mut self, device: DeviceHandle) -> DeviceHandle {
        // SAFETY: device is live.
        DeviceHandle(unsafe { (self.api.device_ref)(Self::ptr(device.0)) } as usize)
    }

    fn device_unref(&mut self, device: DeviceHandle) {
        // SAFETY: called once per successful device_ref.
        unsafe { (self.api.device_unref)(Self::ptr(device.0)) };
    }

    fn start_emulating(&mut self, device: DeviceHandle, sequence: u32) {
        // SAFETY: device is referenced.
        unsafe { (self.api.start_emulating)(Self::ptr(device.0), sequence) };
    }

    fn stop_emulating(&mut self, device: DeviceHandle) {
        // SAFETY: device is referenced.
        unsafe { (self.api.stop_emulating)(Self::ptr(device.0)) };
    }

    fn pointer_motion_absolute(&mut self, device: DeviceHandle, x: f64, y: f64) {
        // SAFETY: device is referenced.
        unsafe { (self.api.motion_absolute)(Self::ptr(device.0), x, y) };
    }

    fn button(&mut self, device: DeviceHandle, code: u32, pressed: bool) {
        // SAFETY: device is referenced.
        unsafe { (self.api.button)(Self::ptr(device.0), code, pressed) };
    }

    fn scroll_delta(&mut self, device: DeviceHandle, dx: f64, dy: f64) {
        // SAFETY: device is referenced.
        unsafe { (self.api.scroll_delta)(Self::ptr(device.0), dx, dy) };
    }

    fn scroll_discrete(&mut self, device: DeviceHandle, dx: i32, dy: i32) {
        // SAFETY: device is referenced.
        unsafe { (self.api.scroll_discrete)(Self::ptr(device.0), dx, dy) };
    }

    fn scroll_stop(&mut self, device: DeviceHandle, x: bool, y: bool) {
        // SAFETY: device is referenced.
        unsafe { (self.api.scroll_stop)(Self::ptr(device.0), x, y) };
    }

    fn key(&mut self, device: DeviceHandle, code: u32, pressed: bool) {
        // SAFETY: device is referenced.
        unsafe { (self.api.keyboard_key)(Self::ptr(device.0), code, pressed) };
    }

    fn touch_new(&mut self, device: DeviceHandle) -> Option<TouchHandle> {
        // SAFETY: device is referenced; a null return means no touch capability.
        let touch = unsafe { (self.api.touch_new)(Self::ptr(device.0)) };
        (!touch.is_null()).then_some(TouchHandle(touch as usize))
    }

    fn touch_down(&mut self, touch: TouchHandle, x: f64, y: f64) {
        // SAFETY: touch came from touch_new and is not yet unref'd.
        unsafe { (self.api.touch_down)(Self::ptr(touch.0), x, y) };
    }

    fn touch_motion(&mut self, touch: TouchHandle, x: f64, y: f64) {
        // SAFETY: as above.
        unsafe { (self.api.touch_motion)(Self::ptr(touch.0), x, y) };
    }

    fn touch_up(&mut self, touch: TouchHandle) {
        // SAFETY: as above.
        unsafe { (self.api.touch_up)(Self::ptr(touch.0)) };
    }

    fn touch_unref(&mut self, touch: TouchHandle) {
        // SAFETY: called once per touch_new.
        unsafe { (self.api.touch_unref)(Self::ptr(touch.0)) };
    }

    fn frame(&mut self, device: DeviceHandle, time_us: u64) {
        // SAFETY: device is referenced.
        unsafe { (self.api.frame)(Self::ptr(device.0), time_us) };
    }
}

impl Drop for LibeiSink {
    fn drop(&mut self) {
        self.release_current();
        // SAFETY: the context is released exactly once, after every device.
        unsafe { (self.api.unref)(self.ctx) };
    }
}
