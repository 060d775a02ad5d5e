//! The fully-resolved broker settings record.
//!
//! Every field has a well-defined value after configuration validation
//! completes, even when the source document is empty. Downstream consumers
//! never see an "unset" state.

use std::fmt;

use serde_json::{json, Value};
use uuid::Uuid;

/// Maximum length of the DNS-SD service instance name, in characters.
/// Longer values are truncated.
pub const MAX_SERVICE_INSTANCE_NAME_LEN: usize = 63;

/// Maximum length of the DNS-SD manufacturer string, in characters.
/// Longer values are truncated.
pub const MAX_MANUFACTURER_LEN: usize = 249;

/// Maximum length of the DNS-SD model string, in characters.
/// Longer values are truncated.
pub const MAX_MODEL_LEN: usize = 249;

/// Maximum length of the RDMnet scope string, in characters. Truncating a
/// scope would silently change the broker's network-visible identity, so
/// over-length scopes are rejected instead.
pub const MAX_SCOPE_LEN: usize = 63;

/// The scope used when the configuration does not specify one.
pub const DEFAULT_SCOPE: &str = "default";

/// ESTA manufacturer ID used for the default dynamic UID request.
pub const DEFAULT_MANUFACTURER_ID: u16 = 0x6574;

/// The RDM UID the broker requests or asserts for itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UidConfig {
    /// Request a dynamic UID at connect time, branded with a manufacturer ID.
    Dynamic { manufacturer_id: u16 },
    /// Assert a fixed UID.
    Static { manufacturer_id: u16, device_id: u32 },
}

impl UidConfig {
    pub fn manufacturer_id(&self) -> u16 {
        match *self {
            UidConfig::Dynamic { manufacturer_id } => manufacturer_id,
            UidConfig::Static {
                manufacturer_id, ..
            } => manufacturer_id,
        }
    }
}

impl Default for UidConfig {
    fn default() -> Self {
        UidConfig::Dynamic {
            manufacturer_id: DEFAULT_MANUFACTURER_ID,
        }
    }
}

/// Log verbosity, in syslog-style ascending severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Notice,
    Warning,
    Err,
    Crit,
    Alert,
    Emerg,
}

impl LogLevel {
    /// Every legal configuration token, in declaration order.
    pub const TOKENS: [&'static str; 8] = [
        "debug", "info", "notice", "warning", "err", "crit", "alert", "emerg",
    ];

    /// Parse a configuration token into a level.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "notice" => Some(LogLevel::Notice),
            "warning" => Some(LogLevel::Warning),
            "err" => Some(LogLevel::Err),
            "crit" => Some(LogLevel::Crit),
            "alert" => Some(LogLevel::Alert),
            "emerg" => Some(LogLevel::Emerg),
            _ => None,
        }
    }

    /// The configuration token for this level.
    pub fn token(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Notice => "notice",
            LogLevel::Warning => "warning",
            LogLevel::Err => "err",
            LogLevel::Crit => "crit",
            LogLevel::Alert => "alert",
            LogLevel::Emerg => "emerg",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// The complete, resolved configuration consumed by the hosted engine.
///
/// Constructed through [`crate::config::BrokerConfig`]; the `Default` impl
/// only provides placeholder values for construction, the documented
/// defaults come from the validation schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BrokerSettings {
    /// Component identifier (CID) advertised by the broker.
    pub cid: Uuid,
    /// The broker's RDM UID, dynamic-request or static.
    pub uid: UidConfig,
    /// DNS-SD service instance name.
    pub dns_service_instance_name: String,
    /// DNS-SD manufacturer string.
    pub dns_manufacturer: String,
    /// DNS-SD model string.
    pub dns_model: String,
    /// RDMnet scope this broker serves.
    pub scope: String,
    /// TCP listen port; 0 means any available port.
    pub listen_port: u16,
    /// Network interfaces to listen on; empty means all.
    pub listen_interfaces: Vec<String>,
    /// Log verbosity for the daemon and the hosted engine.
    pub log_level: LogLevel,
    /// Maximum simultaneous client connections; 0 means unlimited.
    pub max_connections: u32,
    /// Maximum simultaneous controller connections; 0 means unlimited.
    pub max_controllers: u32,
    /// Maximum queued messages per controller.
    pub max_controller_messages: u32,
    /// Maximum simultaneous device connections; 0 means unlimited.
    pub max_devices: u32,
    /// Maximum queued messages per device.
    pub max_device_messages: u32,
    /// Maximum simultaneous connections in the reject state.
    pub max_reject_connections: u32,
    /// Whether the hosted broker engine should run at all.
    pub enable_broker: bool,
}

impl BrokerSettings {
    /// Serialize back into the configuration-file document shape.
    ///
    /// Re-validating the returned document reproduces this record.
    /// `listen_port` 0 ("any port") is only reachable as a default, so it is
    /// emitted as an absent field rather than an out-of-range value.
    pub fn to_document(&self) -> Value {
        let uid = match self.uid {
            UidConfig::Dynamic { manufacturer_id } => json!({
                "type": "dynamic",
                "manufacturer_id": manufacturer_id,
            }),
            UidConfig::Static {
                manufacturer_id,
                device_id,
            } => json!({
                "type": "static",
                "manufacturer_id": manufacturer_id,
                "device_id": device_id,
            }),
        };

        let mut document = json!({
            "cid": self.cid.to_string(),
            "uid": uid,
            "dns_sd": {
                "service_instance_name": self.dns_service_instance_name,
                "manufacturer": self.dns_manufacturer,
                "model": self.dns_model,
            },
            "scope": self.scope,
            "listen_interfaces": self.listen_interfaces,
            "log_level": self.log_level.token(),
            "max_connections": self.max_connections,
            "max_controllers": self.max_controllers,
            "max_controller_messages": self.max_controller_messages,
            "max_devices": self.max_devices,
            "max_device_messages": self.max_device_messages,
            "max_reject_connections": self.max_reject_connections,
            "enable_broker": self.enable_broker,
        });

        if self.listen_port != 0 {
            if let Some(map) = document.as_object_mut() {
                map.insert("listen_port".to_string(), json!(self.listen_port));
            }
        }

        document
    }
}
