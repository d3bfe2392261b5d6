//! Command channel vocabulary: opcodes, the JSON request envelope and
//! responses.
//!
//! A request names its command either by opcode number or by name:
//!
//! ```json
//! {"cmd": "execute", "id": "wifi_scanner", "params": {"duration_ms": 2000}}
//! {"cmd": 4, "id": "blink", "manifest": "<base64>", "data": "<base64>"}
//! ```

use std::fmt;
use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Value, json};

use dezero_payload::{PayloadError, PayloadParams, ResponseCode};

use crate::error::{KernelError, KernelResult};

/// Device command opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Liveness probe.
    Ping = 0x01,
    /// Firmware, memory and storage summary.
    GetInfo = 0x02,
    /// Installed payloads.
    List = 0x03,
    /// Install a payload package.
    Upload = 0x04,
    /// Uninstall a payload.
    Delete = 0x05,
    /// Start a payload.
    Execute = 0x06,
    /// Stop a payload.
    Stop = 0x07,
    /// Status of one payload, or of all live runs.
    GetStatus = 0x08,
    /// Recent lifecycle events.
    GetLogs = 0x09,
    /// Begin a firmware update.
    OtaBegin = 0x10,
    /// Firmware update chunk.
    OtaWrite = 0x11,
    /// Finish a firmware update.
    OtaEnd = 0x12,
    /// Restart the device.
    Reboot = 0xFF,
}

impl Opcode {
    /// Every opcode, in wire order.
    pub const ALL: [Self; 13] = [
        Self::Ping,
        Self::GetInfo,
        Self::List,
        Self::Upload,
        Self::Delete,
        Self::Execute,
        Self::Stop,
        Self::GetStatus,
        Self::GetLogs,
        Self::OtaBegin,
        Self::OtaWrite,
        Self::OtaEnd,
        Self::Reboot,
    ];

    /// Wire value.
    #[must_use]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Command name used in JSON requests.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::GetInfo => "get_info",
            Self::List => "list",
            Self::Upload => "upload",
            Self::Delete => "delete",
            Self::Execute => "execute",
            Self::Stop => "stop",
            Self::GetStatus => "get_status",
            Self::GetLogs => "get_logs",
            Self::OtaBegin => "ota_begin",
            Self::OtaWrite => "ota_write",
            Self::OtaEnd => "ota_end",
            Self::Reboot => "reboot",
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_u8() == value)
            .ok_or(value)
    }
}

impl FromStr for Opcode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.name() == s)
            .ok_or_else(|| s.to_string())
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), self.as_u8())
    }
}

/// How a request names its command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandRef {
    /// By opcode number.
    Code(u8),
    /// By command name.
    Name(String),
}

impl CommandRef {
    /// Resolve to an opcode.
    ///
    /// # Errors
    ///
    /// Returns the unrecognised reference as text.
    pub fn resolve(&self) -> Result<Opcode, String> {
        match self {
            Self::Code(code) => Opcode::try_from(*code).map_err(|c| format!("0x{c:02X}")),
            Self::Name(name) => name.parse(),
        }
    }
}

/// A request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Command.
    pub cmd: CommandRef,
    /// Target payload id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Command parameters. Non-string values are passed as their JSON text.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub params: serde_json::Map<String, Value>,
    /// Base64 manifest bytes, for upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<String>,
    /// Base64 artifact bytes, for upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl Request {
    /// Parse one JSON request.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidRequest`] if the text is not a request
    /// envelope.
    pub fn from_json(text: &str) -> KernelResult<Self> {
        serde_json::from_str(text).map_err(|e| KernelError::InvalidRequest(e.to_string()))
    }

    /// A bare request for `op`.
    #[must_use]
    pub fn new(op: Opcode) -> Self {
        Self {
            cmd: CommandRef::Code(op.as_u8()),
            id: None,
            params: serde_json::Map::new(),
            manifest: None,
            data: None,
        }
    }

    /// Set the target payload id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Add a parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Attach an install package, base64 encoded.
    #[must_use]
    pub fn with_package(mut self, manifest: &[u8], artifact: &[u8]) -> Self {
        self.manifest = Some(STANDARD.encode(manifest));
        self.data = Some(STANDARD.encode(artifact));
        self
    }

    /// The target id.
    ///
    /// # Errors
    ///
    /// Returns an `invalid_params` response if absent or empty.
    pub fn require_id(&self) -> Result<&str, Response> {
        self.id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Response::error(ResponseCode::InvalidParams, "missing payload id"))
    }

    /// Parameters flattened to strings.
    #[must_use]
    pub fn payload_params(&self) -> PayloadParams {
        self.params
            .iter()
            .map(|(k, v)| {
                let text = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), text)
            })
            .collect()
    }

    /// Decode a base64 field. Absent decodes to empty.
    ///
    /// # Errors
    ///
    /// Returns an `invalid_params` response naming the field.
    pub fn decode_field(field: &str, value: Option<&str>) -> Result<Vec<u8>, Response> {
        match value {
            None => Ok(Vec::new()),
            Some(text) => STANDARD.decode(text.trim()).map_err(|e| {
                Response::error(
                    ResponseCode::InvalidParams,
                    format!("`{field}` is not valid base64: {e}"),
                )
            }),
        }
    }
}

/// A command response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    /// Response code, as its wire number.
    #[serde(serialize_with = "code_as_u8")]
    pub code: ResponseCode,
    /// Response code name.
    pub status: ResponseCode,
    /// Command-specific body.
    pub body: Value,
}

fn code_as_u8<S: Serializer>(code: &ResponseCode, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u8(code.as_u8())
}

impl Response {
    /// A successful response.
    #[must_use]
    pub fn ok(body: Value) -> Self {
        Self {
            code: ResponseCode::Ok,
            status: ResponseCode::Ok,
            body,
        }
    }

    /// A failure with a message body.
    #[must_use]
    pub fn error(code: ResponseCode, message: impl Into<String>) -> Self {
        Self {
            code,
            status: code,
            body: json!({ "error": message.into() }),
        }
    }

    /// Whether this is a success.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.code == ResponseCode::Ok
    }
}

impl From<&PayloadError> for Response {
    fn from(err: &PayloadError) -> Self {
        Self::error(err.response_code(), err.to_string())
    }
}

impl From<PayloadError> for Response {
    fn from(err: PayloadError) -> Self {
        Self::from(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_wire_values() {
        assert_eq!(Opcode::Ping.as_u8(), 0x01);
        assert_eq!(Opcode::GetLogs.as_u8(), 0x09);
        assert_eq!(Opcode::OtaBegin.as_u8(), 0x10);
        assert_eq!(Opcode::Reboot.as_u8(), 0xFF);
        assert_eq!(Opcode::try_from(0x06), Ok(Opcode::Execute));
        assert_eq!(Opcode::try_from(0x0A), Err(0x0A));
    }

    #[test]
    fn test_opcode_names_round_trip() {
        for op in Opcode::ALL {
            assert_eq!(op.name().parse::<Opcode>(), Ok(op));
        }
        assert!("EXECUTE".parse::<Opcode>().is_err());
    }

    #[test]
    fn test_request_by_name_and_number() {
        let by_name = Request::from_json(r#"{"cmd":"execute","id":"x"}"#).unwrap();
        assert_eq!(by_name.cmd.resolve(), Ok(Opcode::Execute));

        let by_code = Request::from_json(r#"{"cmd":6,"id":"x"}"#).unwrap();
        assert_eq!(by_code.cmd.resolve(), Ok(Opcode::Execute));

        let unknown = Request::from_json(r#"{"cmd":66}"#).unwrap();
        assert_eq!(unknown.cmd.resolve(), Err("0x42".to_string()));
    }

    #[test]
    fn test_params_flattened_to_strings() {
        let req = Request::from_json(
            r#"{"cmd":"execute","id":"x","params":{"duration_ms":2000,"mode":"fast","loud":true}}"#,
        )
        .unwrap();
        let params = req.payload_params();
        assert_eq!(params["duration_ms"], "2000");
        assert_eq!(params["mode"], "fast");
        assert_eq!(params["loud"], "true");
    }

    #[test]
    fn test_missing_id() {
        let req = Request::new(Opcode::Stop);
        let resp = req.require_id().unwrap_err();
        assert_eq!(resp.code, ResponseCode::InvalidParams);
        assert!(req.clone().with_id("").require_id().is_err());
    }

    #[test]
    fn test_package_round_trip() {
        let req = Request::new(Opcode::Upload).with_package(b"{}", b"\x00\x01");
        assert_eq!(
            Request::decode_field("data", req.data.as_deref()).unwrap(),
            vec![0, 1]
        );
        assert!(Request::decode_field("data", Some("!!")).is_err());
        assert!(Request::decode_field("data", None).unwrap().is_empty());
    }

    #[test]
    fn test_response_serialization() {
        let resp = Response::from(PayloadError::NotFound("ghost".into()));
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["code"], 5);
        assert_eq!(value["status"], "not_found");
        assert!(value["body"]["error"].as_str().unwrap().contains("ghost"));

        let ok = serde_json::to_value(Response::ok(json!({"pong": true}))).unwrap();
        assert_eq!(ok["code"], 0);
    }
}
