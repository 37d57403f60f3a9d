//! Device Simulator Shared Types
//!
//! This crate provides the wire types, frame codec and device-management step
//! graphs shared by the simulated devices and the in-process cloud endpoint.

pub mod codec;
pub mod state_machine;

use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Ordered, schema-less property bag
pub type PropertyMap = BTreeMap<String, Value>;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Default timing parameters for the simulator
pub mod timing {
    /// How often the fleet reconciler polls the device registry
    pub const DEVICE_POLL_INTERVAL_SECS: u64 = 120;

    /// Delay between two command receive attempts of one device
    pub const RECEIVE_POLL_INTERVAL_SECS: u64 = 10;

    /// Pause between two passes over a device's telemetry list
    pub const REPORT_INTERVAL_SECS: u64 = 5;

    /// Interval between two remote-monitor telemetry samples
    pub const TELEMETRY_INTERVAL_SECS: u64 = 15;

    /// Duration of each non-pending firmware update phase
    pub const FIRMWARE_STEP_SECS: u64 = 20;

    /// Duration of each non-pending configuration update phase
    pub const CONFIGURATION_STEP_SECS: u64 = 10;

    /// How long a stop request waits for a device task to wind down
    pub const DEVICE_STOP_TIMEOUT_SECS: u64 = 5;
}

/// A single schema-less value. A value without a kind is null.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Value {
    #[prost(oneof = "value::Kind", tags = "1, 2, 3, 4")]
    pub kind: Option<value::Kind>,
}

pub mod value {
    /// The concrete kind carried by a [`super::Value`]
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Kind {
        #[prost(string, tag = "1")]
        Text(String),
        #[prost(double, tag = "2")]
        Number(f64),
        #[prost(int64, tag = "3")]
        Integer(i64),
        #[prost(bool, tag = "4")]
        Flag(bool),
    }
}

use value::Kind;

impl Value {
    pub fn null() -> Self {
        Self { kind: None }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: Some(Kind::Text(text.into())),
        }
    }

    pub fn number(number: f64) -> Self {
        Self {
            kind: Some(Kind::Number(number)),
        }
    }

    pub fn integer(integer: i64) -> Self {
        Self {
            kind: Some(Kind::Integer(integer)),
        }
    }

    pub fn flag(flag: bool) -> Self {
        Self {
            kind: Some(Kind::Flag(flag)),
        }
    }

    pub fn is_null(&self) -> bool {
        self.kind.is_none()
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            Some(Kind::Text(text)) => Some(text),
            _ => None,
        }
    }

    /// Numeric view; integers widen to doubles
    pub fn as_f64(&self) -> Option<f64> {
        match self.kind {
            Some(Kind::Number(number)) => Some(number),
            Some(Kind::Integer(integer)) => Some(integer as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self.kind {
            Some(Kind::Integer(integer)) => Some(integer),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.kind {
            Some(Kind::Flag(flag)) => Some(flag),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            None => write!(f, "null"),
            Some(Kind::Text(text)) => write!(f, "{}", text),
            Some(Kind::Number(number)) => write!(f, "{}", number),
            Some(Kind::Integer(integer)) => write!(f, "{}", integer),
            Some(Kind::Flag(flag)) => write!(f, "{}", flag),
        }
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::text(text)
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::text(text)
    }
}

impl From<f64> for Value {
    fn from(number: f64) -> Self {
        Value::number(number)
    }
}

impl From<i64> for Value {
    fn from(integer: i64) -> Self {
        Value::integer(integer)
    }
}

impl From<bool> for Value {
    fn from(flag: bool) -> Self {
        Value::flag(flag)
    }
}

/// An inbound command addressed to one device
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CommandEnvelope {
    #[prost(string, tag = "1")]
    pub message_id: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(btree_map = "string, message", tag = "3")]
    pub parameters: BTreeMap<String, Value>,
    /// Opaque token used to acknowledge the command
    #[prost(string, tag = "4")]
    pub lock_token: String,
    #[prost(uint64, tag = "5")]
    pub created_at_ms: u64,
}

impl CommandEnvelope {
    /// Create a command with no parameters
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            message_id: String::new(),
            name: name.into(),
            parameters: BTreeMap::new(),
            lock_token: String::new(),
            created_at_ms: now_ms(),
        }
    }

    /// Builder helper for attaching a parameter
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Look up a parameter, treating an explicit null as absent
    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name).filter(|v| !v.is_null())
    }
}

/// Kind of payload a device sends upstream
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum EventKind {
    Unknown = 0,
    Telemetry = 1,
    DeviceInfo = 2,
}

/// An outbound device-to-cloud payload
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeviceEvent {
    #[prost(string, tag = "1")]
    pub device_id: String,
    #[prost(uint64, tag = "2")]
    pub timestamp_ms: u64,
    #[prost(enumeration = "EventKind", tag = "3")]
    pub kind: i32,
    #[prost(btree_map = "string, message", tag = "4")]
    pub fields: BTreeMap<String, Value>,
    /// Supported command names (device info only)
    #[prost(string, repeated, tag = "5")]
    pub commands: Vec<String>,
}

impl DeviceEvent {
    /// Create a telemetry sample
    pub fn telemetry(device_id: impl Into<String>, fields: PropertyMap) -> Self {
        Self {
            device_id: device_id.into(),
            timestamp_ms: now_ms(),
            kind: EventKind::Telemetry.into(),
            fields,
            commands: Vec::new(),
        }
    }

    /// Create a device info packet
    pub fn device_info(
        device_id: impl Into<String>,
        properties: PropertyMap,
        commands: Vec<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            timestamp_ms: now_ms(),
            kind: EventKind::DeviceInfo.into(),
            fields: properties,
            commands,
        }
    }

    pub fn event_kind(&self) -> EventKind {
        EventKind::try_from(self.kind).unwrap_or(EventKind::Unknown)
    }
}
