//! AT-SPI2 over D-Bus
//!
//! The accessibility bus is separate from the session bus; its address is
//! published by `org.a11y.Bus` on the session bus.

use zbus::blocking::Connection;
use zbus::zvariant::{DynamicDeserialize, DynamicType, OwnedObjectPath, OwnedValue};

use super::{AccessibleNode, Extents};
use crate::error::Result;

const A11Y_BUS: &str = "org.a11y.Bus";
const A11Y_BUS_PATH: &str = "/org/a11y/bus";
const REGISTRY: &str = "org.a11y.atspi.Registry";
const ROOT_PATH: &str = "/org/a11y/atspi/accessible/root";

const ACCESSIBLE: &str = "org.a11y.atspi.Accessible";
const COMPONENT: &str = "org.a11y.atspi.Component";
const ACTION: &str = "org.a11y.atspi.Action";
const PROPERTIES: &str = "org.freedesktop.DBus.Properties";

/// `ATSPI_COORD_TYPE_SCREEN`
const COORD_SCREEN: u32 = 0;

/// `AtspiStateType` nicks, indexed by bit
const STATE_NAMES: [&str; 44] = [
    "invalid",
    "active",
    "armed",
    "busy",
    "checked",
    "collapsed",
    "defunct",
    "editable",
    "enabled",
    "expandable",
    "expanded",
    "focusable",
    "focused",
    "has-tooltip",
    "horizontal",
    "iconified",
    "modal",
    "multi-line",
    "multiselectable",
    "opaque",
    "pressed",
    "resizable",
    "selectable",
    "selected",
    "sensitive",
    "showing",
    "single-line",
    "stale",
    "transient",
    "vertical",
    "visible",
    "manages-descendants",
    "indeterminate",
    "required",
    "truncated",
    "animated",
    "invalid-entry",
    "supports-autocompletion",
    "selectable-text",
    "is-default",
    "visited",
    "checkable",
    "has-popup",
    "read-only",
];

/// Decode the two-word state bitfield returned by `GetState`
pub fn state_names(words: &[u32]) -> Vec<String> {
    STATE_NAMES
        .iter()
        .enumerate()
        .filter(|(bit, _)| {
            words
                .get(bit / 32)
                .is_some_and(|word| word & (1 << (bit % 32)) != 0)
        })
        .map(|(_, name)| name.to_string())
        .collect()
}

/// A remote accessible object
#[derive(Clone)]
pub struct AtspiNode {
    conn: Connection,
    bus_name: String,
    path: OwnedObjectPath,
}

impl AtspiNode {
    /// The desktop root of the accessibility bus belonging to `session_bus`
    pub fn desktop(session_bus: &str) -> Result<Self> {
        let session = zbus::blocking::connection::Builder::address(session_bus)?.build()?;
        let reply = session.call_method(
            Some(A11Y_BUS),
            A11Y_BUS_PATH,
            Some(A11Y_BUS),
            "GetAddress",
            &(),
        )?;
        let address: String = reply.body().deserialize()?;
        tracing::debug!(%address, "Connecting to accessibility bus");

        let conn = zbus::blocking::connection::Builder::address(address.as_str())?.build()?;
        Ok(Self {
            conn,
            bus_name: REGISTRY.to_string(),
            path: OwnedObjectPath::try_from(ROOT_PATH).map_err(zbus::Error::from)?,
        })
    }

    fn call<B, R>(&self, interface: &str, method: &str, body: &B) -> Option<R>
    where
        B: serde::Serialize + DynamicType,
        R: for<'d> DynamicDeserialize<'d>,
    {
        let reply = self
            .conn
            .call_method(
                Some(self.bus_name.as_str()),
                self.path.as_str(),
                Some(interface),
                method,
                body,
            )
            .ok()?;
        reply.body().deserialize().ok()
    }

    fn property(&self, interface: &str, name: &str) -> Option<OwnedValue> {
        self.call(PROPERTIES, "Get", &(interface, name))
    }

    fn string_property(&self, name: &str) -> String {
        self.property(ACCESSIBLE, name)
            .and_then(|v| String::try_from(v).ok())
            .unwrap_or_default()
    }
}

impl AccessibleNode for AtspiNode {
    fn name(&self) -> String {
        self.string_property("Name")
    }

    fn role(&self) -> String {
        self.call(ACCESSIBLE, "GetRoleName", &()).unwrap_or_default()
    }

    fn description(&self) -> String {
        self.string_property("Description")
    }

    fn states(&self) -> Vec<String> {
        let words: Vec<u32> = self.call(ACCESSIBLE, "GetState", &()).unwrap_or_default();
        state_names(&words)
    }

    fn extents(&self) -> Option<Extents> {
        let (x, y, width, height): (i32, i32, i32, i32) =
            self.call(COMPONENT, "GetExtents", &(COORD_SCREEN,))?;
        Some(Extents { x, y, width, height })
    }

    fn actions(&self) -> Vec<String> {
        let count = self
            .property(ACTION, "NActions")
            .and_then(|v| i32::try_from(v).ok())
            .unwrap_or(0);
        (0..count)
            .filter_map(|i| self.call::<_, String>(ACTION, "GetName", &(i,)))
            .filter(|name| !name.is_empty())
            .collect()
    }

    fn children(&self) -> Vec<Self> {
        let children: Vec<(String, OwnedObjectPath)> =
            self.call(ACCESSIBLE, "GetChildren", &()).unwrap_or_default();
        children
            .into_iter()
            .map(|(bus_name, path)| Self {
                conn: self.conn.clone(),
                bus_name,
                path,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_bits_map_to_nicks() {
        // enabled (8), focusable (11), showing (25), visible (30), read-only (43)
        let low = (1 << 8) | (1 << 11) | (1 << 25) | (1 << 30);
        let high = 1 << (43 - 32);
        assert_eq!(
            state_names(&[low, high]),
            vec!["enabled", "focusable", "showing", "visible", "read-only"]
        );
        assert!(state_names(&[]).is_empty());
    }
}
