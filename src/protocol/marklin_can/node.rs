//! Devices discovered on the bus.

use core::fmt;
use std::collections::BTreeMap;

use serde::Serialize;

use super::message::PingReply;
use super::status_data::{ConfigurationDescription, DeviceDescription, ReadingDescription};

/// Device type reported in a ping answer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DeviceId(pub u16);

impl DeviceId {
    /// Track format processor or booster.
    pub const GLEIS_FORMAT_PROZESSOR_OR_BOOSTER: Self = Self(0x0000);
    /// Gleisbox 60112/60113.
    pub const GLEISBOX: Self = Self(0x0010);
    /// Connect 6021.
    pub const CONNECT_6021: Self = Self(0x0020);
    /// Mobile Station 2.
    pub const MS2: Self = Self(0x0030);
    /// Wireless devices.
    pub const WIRELESS_DEVICES: Self = Self(0xFFE0);
    /// Central Station 2 GUI.
    pub const CS2_GUI: Self = Self(0xFFFF);

    /// Human readable name, if known.
    pub const fn name(self) -> Option<&'static str> {
        match self {
            Self::GLEIS_FORMAT_PROZESSOR_OR_BOOSTER => Some("Gleis Format Prozessor or Booster"),
            Self::GLEISBOX => Some("Gleisbox"),
            Self::CONNECT_6021 => Some("Connect 6021"),
            Self::MS2 => Some("MS2"),
            Self::WIRELESS_DEVICES => Some("Wireless devices"),
            Self::CS2_GUI => Some("CS2-GUI (Master)"),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "0x{:04X}", self.0),
        }
    }
}

/// One node and what it told us about itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Node {
    /// Node UID.
    pub uid: u32,
    /// Software version, major and minor.
    pub version: (u8, u8),
    /// Device type.
    pub device_id: DeviceId,
    /// Descriptor 0, once read.
    pub description: Option<DeviceDescription>,
    /// Reading descriptors by index.
    pub readings: BTreeMap<u8, ReadingDescription>,
    /// Configuration descriptors by index.
    pub configurations: BTreeMap<u8, ConfigurationDescription>,
}

impl Node {
    /// Node from a ping answer.
    pub fn from_ping(reply: &PingReply) -> Self {
        Self {
            uid: reply.uid,
            version: (reply.version_major, reply.version_minor),
            device_id: DeviceId(reply.device_id),
            description: None,
            readings: BTreeMap::new(),
            configurations: BTreeMap::new(),
        }
    }

    /// Device name, falling back to the device type.
    pub fn name(&self) -> String {
        match &self.description {
            Some(d) if !d.device_name.is_empty() => d.device_name.clone(),
            _ => self.device_id.to_string(),
        }
    }
}

/// Known nodes by UID.
#[derive(Clone, Debug, Default, Serialize)]
pub struct NodeRegistry {
    nodes: BTreeMap<u32, Node>,
}

impl NodeRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a node from a ping answer. Returns true if the
    /// node is new or its version or type changed; descriptors are kept.
    pub fn upsert(&mut self, reply: &PingReply) -> bool {
        match self.nodes.get_mut(&reply.uid) {
            Some(node) => {
                let version = (reply.version_major, reply.version_minor);
                let device_id = DeviceId(reply.device_id);
                let changed = node.version != version || node.device_id != device_id;
                node.version = version;
                node.device_id = device_id;
                changed
            }
            None => {
                self.nodes.insert(reply.uid, Node::from_ping(reply));
                true
            }
        }
    }

    /// Node by UID.
    pub fn get(&self, uid: u32) -> Option<&Node> {
        self.nodes.get(&uid)
    }

    /// Mutable node by UID.
    pub fn get_mut(&mut self, uid: u32) -> Option<&mut Node> {
        self.nodes.get_mut(&uid)
    }

    /// UIDs in ascending order.
    pub fn uids(&self) -> Vec<u32> {
        self.nodes.keys().copied().collect()
    }

    /// Nodes in UID order.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True without nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.nodes.clear();
    }
}
