//! Schema-driven validation of the broker configuration document.
//!
//! The configuration is a JSON object in which every field is optional. An
//! ordered table of [`FieldSpec`] rows drives validation: each row carries a
//! JSON pointer, the expected value kind, a validate-and-store function and a
//! default supplier. Rows are processed in declaration order, never document
//! order, because later defaults may read earlier, already-resolved fields
//! (the service instance name's default embeds the resolved CID).
//!
//! Invalid fields are non-fatal: each one produces a single diagnostic and
//! falls back to its default, and processing continues. Only a document that
//! is not well-formed JSON fails the whole read.

use serde_json::Value;
use uuid::Uuid;

use crate::log::LogSink;
use crate::settings::{
    BrokerSettings, LogLevel, UidConfig, DEFAULT_MANUFACTURER_ID, DEFAULT_SCOPE,
    MAX_MANUFACTURER_LEN, MAX_MODEL_LEN, MAX_SCOPE_LEN, MAX_SERVICE_INSTANCE_NAME_LEN,
};
use crate::source::ConfigSource;

/// Result of reading a configuration document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseResult {
    /// Document parsed and every field resolved, possibly via defaults.
    Ok,
    /// At least one field was invalid and fell back to its default.
    InvalidSetting,
    /// The input was not well-formed JSON; the settings were not touched.
    JsonParseErr,
    /// The configuration source could not be opened; defaults are in effect.
    FileOpenErr,
}

/// JSON value kinds the schema distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    String,
    Integer,
    Boolean,
    Object,
    Array,
}

impl ValueKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            ValueKind::String => value.is_string(),
            ValueKind::Integer => value.is_i64() || value.is_u64(),
            ValueKind::Boolean => value.is_boolean(),
            ValueKind::Object => value.is_object(),
            ValueKind::Array => value.is_array(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            ValueKind::String => "a string",
            ValueKind::Integer => "an integer",
            ValueKind::Boolean => "a boolean",
            ValueKind::Object => "an object",
            ValueKind::Array => "an array",
        }
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "an integer",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

type ValidateFn = fn(&Value, &mut BrokerConfig, &dyn LogSink) -> Result<(), String>;
type DefaultFn = fn(&mut BrokerConfig);

/// One row of the validation schema.
///
/// Both functions are always present: every field must have a computable
/// default so the settings record is fully populated after every pass.
struct FieldSpec {
    /// JSON pointer to the field within the document.
    pointer: &'static str,
    /// Expected JSON value kind at that pointer.
    kind: ValueKind,
    /// Validate the value and store it in the settings record. The `Err`
    /// carries the human-readable reason for the diagnostic.
    validate_and_store: ValidateFn,
    /// Store the field's default in the settings record.
    store_default: DefaultFn,
}

fn validate_and_store_cid(
    value: &Value,
    config: &mut BrokerConfig,
    _log: &dyn LogSink,
) -> Result<(), String> {
    let text = value.as_str().unwrap_or_default();
    let cid = Uuid::parse_str(text).map_err(|_| "must be a valid UUID string".to_string())?;
    config.settings.cid = cid;
    Ok(())
}

// The UID takes the form:
// "uid": {
//   "type": < "static" | "dynamic" >,
//   "manufacturer_id": <number, always present>,
//   "device_id": <number, present only if type is "static">
// }
fn validate_and_store_uid(
    value: &Value,
    config: &mut BrokerConfig,
    _log: &dyn LogSink,
) -> Result<(), String> {
    let uid_type = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| "\"type\" must be \"static\" or \"dynamic\"".to_string())?;
    let manufacturer_id = value
        .get("manufacturer_id")
        .and_then(Value::as_i64)
        .ok_or_else(|| "\"manufacturer_id\" must be an integer".to_string())?;
    if manufacturer_id <= 0 || manufacturer_id >= 0x8000 {
        return Err(format!(
            "\"manufacturer_id\" must be between 1 and {} inclusive",
            0x7fff
        ));
    }

    match uid_type {
        "static" => {
            let device_id = value
                .get("device_id")
                .and_then(Value::as_i64)
                .ok_or_else(|| {
                    "\"device_id\" must be an integer when \"type\" is \"static\"".to_string()
                })?;
            if !(0..=i64::from(u32::MAX)).contains(&device_id) {
                return Err(format!("\"device_id\" must be between 0 and {}", u32::MAX));
            }
            config.settings.uid = UidConfig::Static {
                manufacturer_id: manufacturer_id as u16,
                device_id: device_id as u32,
            };
            Ok(())
        }
        "dynamic" => {
            if value.get("device_id").is_some() {
                return Err(
                    "\"device_id\" must be omitted when \"type\" is \"dynamic\"".to_string()
                );
            }
            config.settings.uid = UidConfig::Dynamic {
                manufacturer_id: manufacturer_id as u16,
            };
            Ok(())
        }
        other => Err(format!(
            "\"type\" must be \"static\" or \"dynamic\", got \"{other}\""
        )),
    }
}

/// Store a bounded string, truncating over-length values with a notice.
/// Empty strings are always rejected.
fn store_truncated_string(
    value: &Value,
    pointer: &str,
    max_len: usize,
    out: &mut String,
    log: &dyn LogSink,
) -> Result<(), String> {
    let text = value.as_str().unwrap_or_default();
    if text.is_empty() {
        return Err("must be a non-empty string".to_string());
    }
    if text.chars().count() > max_len {
        log.notice(&format!(
            "Value at \"{pointer}\" is longer than {max_len} characters and has been truncated."
        ));
        *out = text.chars().take(max_len).collect();
    } else {
        *out = text.to_string();
    }
    Ok(())
}

/// Validate an integral JSON number and return it if it lies in `[min, max]`.
fn int_in_range(value: &Value, min: i64, max: i64) -> Result<i64, String> {
    match value.as_i64() {
        Some(number) if number >= min && number <= max => Ok(number),
        _ => Err(format!("must be an integer between {min} and {max}")),
    }
}

fn store_u32(value: &Value, out: &mut u32) -> Result<(), String> {
    let number = int_in_range(value, 0, i64::from(u32::MAX))?;
    *out = number as u32;
    Ok(())
}

// A typical configuration file looks something like:
// {
//   "cid": "4958ac8f-cd5e-42cd-ab7e-9797b0efd3ac",
//   "uid": { "type": "dynamic", "manufacturer_id": 25972 },
//   "dns_sd": {
//     "service_instance_name": "My RDMnet Broker",
//     "manufacturer": "ETC",
//     "model": "RDMnet Broker"
//   },
//   "scope": "default",
//   "listen_port": 8888,
//   "listen_interfaces": ["eth0"],
//   "log_level": "info",
//   "max_connections": 20000,
//   "enable_broker": true
// }
//
// Unrecognized top-level keys are ignored.
static SETTINGS_SCHEMA: &[FieldSpec] = &[
    FieldSpec {
        pointer: "/cid",
        kind: ValueKind::String,
        validate_and_store: validate_and_store_cid,
        store_default: |config| config.settings.cid = config.default_cid,
    },
    FieldSpec {
        pointer: "/uid",
        kind: ValueKind::Object,
        validate_and_store: validate_and_store_uid,
        store_default: |config| {
            config.settings.uid = UidConfig::Dynamic {
                manufacturer_id: DEFAULT_MANUFACTURER_ID,
            }
        },
    },
    FieldSpec {
        pointer: "/dns_sd/service_instance_name",
        kind: ValueKind::String,
        validate_and_store: |value, config, log| {
            store_truncated_string(
                value,
                "/dns_sd/service_instance_name",
                MAX_SERVICE_INSTANCE_NAME_LEN,
                &mut config.settings.dns_service_instance_name,
                log,
            )
        },
        // The CID is embedded in the default name to disambiguate multiple
        // brokers on the same network. Relies on the /cid row having already
        // been resolved.
        store_default: |config| {
            config.settings.dns_service_instance_name =
                format!("ETC RDMnet Broker {}", config.settings.cid)
        },
    },
    FieldSpec {
        pointer: "/dns_sd/manufacturer",
        kind: ValueKind::String,
        validate_and_store: |value, config, log| {
            store_truncated_string(
                value,
                "/dns_sd/manufacturer",
                MAX_MANUFACTURER_LEN,
                &mut config.settings.dns_manufacturer,
                log,
            )
        },
        store_default: |config| config.settings.dns_manufacturer = "ETC".to_string(),
    },
    FieldSpec {
        pointer: "/dns_sd/model",
        kind: ValueKind::String,
        validate_and_store: |value, config, log| {
            store_truncated_string(
                value,
                "/dns_sd/model",
                MAX_MODEL_LEN,
                &mut config.settings.dns_model,
                log,
            )
        },
        store_default: |config| config.settings.dns_model = "RDMnet Broker Service".to_string(),
    },
    FieldSpec {
        pointer: "/scope",
        kind: ValueKind::String,
        // Truncating a scope would silently change which brokers and
        // controllers can see each other, so over-length scopes are
        // rejected rather than truncated.
        validate_and_store: |value, config, _log| {
            let text = value.as_str().unwrap_or_default();
            if text.is_empty() || text.chars().count() > MAX_SCOPE_LEN {
                return Err(format!("must be between 1 and {MAX_SCOPE_LEN} characters"));
            }
            config.settings.scope = text.to_string();
            Ok(())
        },
        store_default: |config| config.settings.scope = DEFAULT_SCOPE.to_string(),
    },
    FieldSpec {
        pointer: "/listen_port",
        kind: ValueKind::Integer,
        validate_and_store: |value, config, _log| {
            let port = int_in_range(value, 1024, 65535)?;
            config.settings.listen_port = port as u16;
            Ok(())
        },
        store_default: |config| config.settings.listen_port = 0,
    },
    FieldSpec {
        pointer: "/listen_interfaces",
        kind: ValueKind::Array,
        validate_and_store: |value, config, _log| {
            let items = value
                .as_array()
                .ok_or_else(|| "must be an array of interface names".to_string())?;
            let mut interfaces = Vec::with_capacity(items.len());
            for item in items {
                match item.as_str() {
                    Some(name) => interfaces.push(name.to_string()),
                    // The whole list is discarded, not just the bad element.
                    None => return Err("every element must be an interface name string".to_string()),
                }
            }
            config.settings.listen_interfaces = interfaces;
            Ok(())
        },
        store_default: |config| config.settings.listen_interfaces = Vec::new(),
    },
    FieldSpec {
        pointer: "/log_level",
        kind: ValueKind::String,
        validate_and_store: |value, config, _log| {
            let token = value.as_str().unwrap_or_default();
            let level = LogLevel::from_token(token)
                .ok_or_else(|| format!("must be one of: {}", LogLevel::TOKENS.join(", ")))?;
            config.settings.log_level = level;
            Ok(())
        },
        store_default: |config| config.settings.log_level = LogLevel::Info,
    },
    FieldSpec {
        pointer: "/max_connections",
        kind: ValueKind::Integer,
        validate_and_store: |value, config, _log| {
            store_u32(value, &mut config.settings.max_connections)
        },
        store_default: |config| config.settings.max_connections = 0,
    },
    FieldSpec {
        pointer: "/max_controllers",
        kind: ValueKind::Integer,
        validate_and_store: |value, config, _log| {
            store_u32(value, &mut config.settings.max_controllers)
        },
        store_default: |config| config.settings.max_controllers = 0,
    },
    FieldSpec {
        pointer: "/max_controller_messages",
        kind: ValueKind::Integer,
        validate_and_store: |value, config, _log| {
            store_u32(value, &mut config.settings.max_controller_messages)
        },
        store_default: |config| config.settings.max_controller_messages = 500,
    },
    FieldSpec {
        pointer: "/max_devices",
        kind: ValueKind::Integer,
        validate_and_store: |value, config, _log| {
            store_u32(value, &mut config.settings.max_devices)
        },
        store_default: |config| config.settings.max_devices = 0,
    },
    FieldSpec {
        pointer: "/max_device_messages",
        kind: ValueKind::Integer,
        validate_and_store: |value, config, _log| {
            store_u32(value, &mut config.settings.max_device_messages)
        },
        store_default: |config| config.settings.max_device_messages = 500,
    },
    FieldSpec {
        pointer: "/max_reject_connections",
        kind: ValueKind::Integer,
        validate_and_store: |value, config, _log| {
            store_u32(value, &mut config.settings.max_reject_connections)
        },
        store_default: |config| config.settings.max_reject_connections = 1000,
    },
    FieldSpec {
        pointer: "/enable_broker",
        kind: ValueKind::Boolean,
        validate_and_store: |value, config, _log| {
            let enabled = value
                .as_bool()
                .ok_or_else(|| "must be a boolean".to_string())?;
            config.settings.enable_broker = enabled;
            Ok(())
        },
        store_default: |config| config.settings.enable_broker = true,
    },
];

/// Reads the broker's configuration document and translates it into the
/// settings record consumed by the hosted engine.
pub struct BrokerConfig {
    pub settings: BrokerSettings,
    default_cid: Uuid,
}

impl BrokerConfig {
    /// A config with a freshly generated default CID and every field at its
    /// documented default.
    pub fn new() -> Self {
        let mut config = Self {
            settings: BrokerSettings::default(),
            default_cid: Uuid::new_v4(),
        };
        config.set_defaults();
        config
    }

    /// The CID used when the document does not supply one. Stable for the
    /// lifetime of this config, so repeated reloads keep the same identity.
    pub fn default_cid(&self) -> Uuid {
        self.default_cid
    }

    /// Store every field's default, in schema order.
    pub fn set_defaults(&mut self) {
        for field in SETTINGS_SCHEMA {
            (field.store_default)(self);
        }
    }

    /// Read and validate a configuration document from a string.
    pub fn read_str(&mut self, input: &str, log: &dyn LogSink) -> ParseResult {
        match serde_json::from_str::<Value>(input) {
            Ok(document) => self.validate(&document, log),
            Err(err) => {
                log.error(&format!("Configuration is not well-formed JSON: {err}"));
                ParseResult::JsonParseErr
            }
        }
    }

    /// Read and validate the document supplied by a [`ConfigSource`].
    ///
    /// An unreadable source is non-fatal: defaults are stored and
    /// [`ParseResult::FileOpenErr`] is returned.
    pub fn load(&mut self, source: &dyn ConfigSource, log: &dyn LogSink) -> ParseResult {
        match source.read_document() {
            Ok(text) => self.read_str(&text, log),
            Err(err) => {
                log.notice(&format!(
                    "Error opening configuration at \"{}\": {err}. Proceeding with default settings...",
                    source.location()
                ));
                self.set_defaults();
                ParseResult::FileOpenErr
            }
        }
    }

    /// Walk the schema table against a parsed document.
    ///
    /// Defaulting is atomic per field: a validator only assigns on success,
    /// so a failed field never leaves the record partially mutated.
    fn validate(&mut self, document: &Value, log: &dyn LogSink) -> ParseResult {
        let mut result = ParseResult::Ok;

        for field in SETTINGS_SCHEMA {
            match document.pointer(field.pointer) {
                // Absent and explicit null both mean "use the default".
                None | Some(Value::Null) => (field.store_default)(self),
                Some(value) => {
                    if !field.kind.matches(value) {
                        log.warning(&format!(
                            "Ignoring \"{}\": expected {}, got {} (value: {}). Using the default.",
                            field.pointer,
                            field.kind.name(),
                            kind_name(value),
                            value
                        ));
                        (field.store_default)(self);
                        result = ParseResult::InvalidSetting;
                    } else if let Err(reason) = (field.validate_and_store)(value, self, log) {
                        log.warning(&format!(
                            "Ignoring \"{}\": {} (value: {}). Using the default.",
                            field.pointer, reason, value
                        ));
                        (field.store_default)(self);
                        result = ParseResult::InvalidSetting;
                    }
                }
            }
        }

        result
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self::new()
    }
}
