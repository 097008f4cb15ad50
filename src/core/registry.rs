//! Device Registry - the emulated devices a session may drive
//!
//! Holds at most one device per capability class. The first device seen
//! with a class wins; later devices with the same class are ignored. A
//! native device that serves several classes fills several slots but is
//! referenced once, so release walks [`DeviceRegistry::distinct`].
//!
//! Touches get stable caller-visible ids from a counter that only ever
//! grows.

use std::collections::BTreeMap;

use crate::backend::{Capabilities, DeviceHandle, TouchHandle};

/// Capability class a registry slot stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    Pointer,
    Keyboard,
    Touch,
}

impl DeviceClass {
    pub fn name(self) -> &'static str {
        match self {
            DeviceClass::Pointer => "pointer",
            DeviceClass::Keyboard => "keyboard",
            DeviceClass::Touch => "touch",
        }
    }

    fn qualifies(self, caps: Capabilities) -> bool {
        match self {
            DeviceClass::Pointer => caps.contains(Capabilities::POINTER_ABSOLUTE),
            DeviceClass::Keyboard => caps.contains(Capabilities::KEYBOARD),
            DeviceClass::Touch => caps.contains(Capabilities::TOUCH),
        }
    }
}

/// A referenced native device
#[derive(Debug, Clone)]
pub struct Device {
    pub handle: DeviceHandle,
    pub name: String,
    pub caps: Capabilities,
    /// Set by `device-resumed`, cleared by `device-paused`
    pub resumed: bool,
    pub emulating: bool,
}

/// Slots for pointer, keyboard and touch, plus every distinct device behind them
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    /// Distinct devices in registration order
    devices: Vec<Device>,
    pointer: Option<DeviceHandle>,
    keyboard: Option<DeviceHandle>,
    touch: Option<DeviceHandle>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classes a newly announced device would fill
    pub fn wanted(&self, caps: Capabilities) -> Vec<DeviceClass> {
        [DeviceClass::Pointer, DeviceClass::Keyboard, DeviceClass::Touch]
            .into_iter()
            .filter(|class| self.slot(*class).is_none() && class.qualifies(caps))
            .collect()
    }

    /// Record a device that has already been referenced
    ///
    /// `classes` should come from [`wanted`](Self::wanted); occupied slots are left alone.
    pub fn register(&mut self, device: Device, classes: &[DeviceClass]) {
        let handle = device.handle;
        for class in classes {
            let slot = self.slot_mut(*class);
            if slot.is_none() {
                *slot = Some(handle);
            }
        }
        if !self.devices.iter().any(|d| d.handle == handle) {
            self.devices.push(device);
        }
    }

    pub fn contains(&self, handle: DeviceHandle) -> bool {
        self.devices.iter().any(|d| d.handle == handle)
    }

    pub fn slot(&self, class: DeviceClass) -> Option<DeviceHandle> {
        match class {
            DeviceClass::Pointer => self.pointer,
            DeviceClass::Keyboard => self.keyboard,
            DeviceClass::Touch => self.touch,
        }
    }

    fn slot_mut(&mut self, class: DeviceClass) -> &mut Option<DeviceHandle> {
        match class {
            DeviceClass::Pointer => &mut self.pointer,
            DeviceClass::Keyboard => &mut self.keyboard,
            DeviceClass::Touch => &mut self.touch,
        }
    }

    pub fn device(&self, handle: DeviceHandle) -> Option<&Device> {
        self.devices.iter().find(|d| d.handle == handle)
    }

    pub fn device_mut(&mut self, handle: DeviceHandle) -> Option<&mut Device> {
        self.devices.iter_mut().find(|d| d.handle == handle)
    }

    /// Device filling `class`, if any
    pub fn get(&self, class: DeviceClass) -> Option<&Device> {
        self.slot(class).and_then(|h| self.device(h))
    }

    pub fn set_resumed(&mut self, handle: DeviceHandle, resumed: bool) -> bool {
        match self.device_mut(handle) {
            Some(device) => {
                device.resumed = resumed;
                true
            }
            None => false,
        }
    }

    /// Forget a device the compositor removed; returns it if it was registered
    pub fn remove(&mut self, handle: DeviceHandle) -> Option<Device> {
        let index = self.devices.iter().position(|d| d.handle == handle)?;
        for class in [DeviceClass::Pointer, DeviceClass::Keyboard, DeviceClass::Touch] {
            let slot = self.slot_mut(class);
            if *slot == Some(handle) {
                *slot = None;
            }
        }
        Some(self.devices.remove(index))
    }

    /// Distinct devices in release order: touch, then pointer, then keyboard, then the rest
    pub fn release_order(&self) -> Vec<DeviceHandle> {
        let mut order = Vec::new();
        for handle in [self.touch, self.pointer, self.keyboard].into_iter().flatten() {
            if !order.contains(&handle) {
                order.push(handle);
            }
        }
        for device in &self.devices {
            if !order.contains(&device.handle) {
                order.push(device.handle);
            }
        }
        order
    }

    pub fn distinct(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    /// Empty every slot, returning the handles in release order
    pub fn drain(&mut self) -> Vec<Device> {
        let order = self.release_order();
        let mut devices = std::mem::take(&mut self.devices);
        self.pointer = None;
        self.keyboard = None;
        self.touch = None;
        order
            .into_iter()
            .filter_map(|h| {
                let index = devices.iter().position(|d| d.handle == h)?;
                Some(devices.remove(index))
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// Touch points currently down, keyed by caller-visible id
#[derive(Debug, Default)]
pub struct TouchTable {
    active: BTreeMap<u32, ActiveTouch>,
    next_id: u32,
}

/// A native touch and the device it was created on
#[derive(Debug, Clone, Copy)]
pub struct ActiveTouch {
    pub handle: TouchHandle,
    pub device: DeviceHandle,
}

impl TouchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new touch and assign it the next id
    pub fn insert(&mut self, touch: ActiveTouch) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        self.active.insert(id, touch);
        id
    }

    pub fn get(&self, id: u32) -> Option<ActiveTouch> {
        self.active.get(&id).copied()
    }

    pub fn remove(&mut self, id: u32) -> Option<ActiveTouch> {
        self.active.remove(&id)
    }

    /// Take every outstanding touch, oldest first
    pub fn drain(&mut self) -> Vec<(u32, ActiveTouch)> {
        std::mem::take(&mut self.active).into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(handle: usize, caps: Capabilities) -> Device {
        Device {
            handle: DeviceHandle(handle),
            name: format!("dev{handle}"),
            caps,
            resumed: false,
            emulating: false,
        }
    }

    #[test]
    fn first_device_wins_each_class() {
        let mut registry = DeviceRegistry::new();
        let kbd = Capabilities::KEYBOARD;
        let ptr = Capabilities::POINTER_ABSOLUTE | Capabilities::BUTTON;

        let classes = registry.wanted(kbd);
        assert_eq!(classes, vec![DeviceClass::Keyboard]);
        registry.register(device(1, kbd), &classes);

        assert!(registry.wanted(kbd).is_empty());
        let classes = registry.wanted(ptr);
        registry.register(device(2, ptr), &classes);

        assert_eq!(registry.slot(DeviceClass::Keyboard), Some(DeviceHandle(1)));
        assert_eq!(registry.slot(DeviceClass::Pointer), Some(DeviceHandle(2)));
        assert_eq!(registry.slot(DeviceClass::Touch), None);
    }

    #[test]
    fn relative_only_pointer_is_not_taken() {
        let registry = DeviceRegistry::new();
        assert!(registry.wanted(Capabilities::POINTER | Capabilities::BUTTON).is_empty());
    }

    #[test]
    fn alias_is_released_once() {
        let mut registry = DeviceRegistry::new();
        let caps = Capabilities::POINTER_ABSOLUTE | Capabilities::KEYBOARD | Capabilities::TOUCH;
        let classes = registry.wanted(caps);
        assert_eq!(classes.len(), 3);
        registry.register(device(7, caps), &classes);

        assert_eq!(registry.release_order(), vec![DeviceHandle(7)]);
        let drained = registry.drain();
        assert_eq!(drained.len(), 1);
        assert!(registry.is_empty());
        assert_eq!(registry.slot(DeviceClass::Pointer), None);
    }

    #[test]
    fn release_order_is_touch_pointer_keyboard() {
        let mut registry = DeviceRegistry::new();
        for (handle, caps) in [
            (1, Capabilities::KEYBOARD),
            (2, Capabilities::POINTER_ABSOLUTE),
            (3, Capabilities::TOUCH),
        ] {
            let classes = registry.wanted(caps);
            registry.register(device(handle, caps), &classes);
        }
        assert_eq!(
            registry.release_order(),
            vec![DeviceHandle(3), DeviceHandle(2), DeviceHandle(1)]
        );
    }

    #[test]
    fn removed_device_frees_its_slots() {
        let mut registry = DeviceRegistry::new();
        let classes = registry.wanted(Capabilities::KEYBOARD);
        registry.register(device(1, Capabilities::KEYBOARD), &classes);
        assert!(registry.remove(DeviceHandle(1)).is_some());
        assert_eq!(registry.wanted(Capabilities::KEYBOARD), vec![DeviceClass::Keyboard]);
        assert!(registry.remove(DeviceHandle(1)).is_none());
    }

    #[test]
    fn touch_ids_strictly_increase_and_are_not_reused() {
        let mut table = TouchTable::new();
        let t = ActiveTouch {
            handle: TouchHandle(10),
            device: DeviceHandle(1),
        };
        let a = table.insert(t);
        let b = table.insert(t);
        assert!(b > a);
        assert!(table.remove(a).is_some());
        assert!(table.remove(a).is_none());
        let c = table.insert(t);
        assert!(c > b);
        assert_eq!(table.len(), 2);
        let drained: Vec<u32> = table.drain().into_iter().map(|(id, _)| id).collect();
        assert_eq!(drained, vec![b, c]);
        assert!(table.is_empty());
    }
}
