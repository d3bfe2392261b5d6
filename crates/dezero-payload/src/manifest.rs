//! Payload manifest types and the JSON manifest codec.
//!
//! A manifest (`manifest.json`) describes a payload's identity, how its
//! artifact is executed, what it needs from the device, which capabilities it
//! requests, and the user-tunable parameters it accepts.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{PayloadError, PayloadResult};
use crate::permission::{Permission, PermissionSet};

/// Execution strategy for a payload artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadType {
    /// Precompiled native code.
    Native,
    /// MicroPython script or bytecode.
    MicroPython,
    /// Lua script.
    Lua,
    /// A module compiled into the firmware.
    Builtin,
}

impl PayloadType {
    /// Manifest spelling of this type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::MicroPython => "micropython",
            Self::Lua => "lua",
            Self::Builtin => "builtin",
        }
    }

    /// Case-sensitive lookup by manifest spelling.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "native" => Some(Self::Native),
            "micropython" => Some(Self::MicroPython),
            "lua" => Some(Self::Lua),
            "builtin" => Some(Self::Builtin),
            _ => None,
        }
    }
}

impl fmt::Display for PayloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed payload manifest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PayloadManifest {
    /// Unique payload identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Payload version string.
    pub version: String,
    /// Author.
    pub author: String,
    /// Free-form description.
    pub description: String,
    /// Category label used by menus.
    pub category: String,
    /// Artifact execution details.
    pub payload: ArtifactDef,
    /// Resource and platform requirements.
    pub requirements: Requirements,
    /// Requested capabilities.
    pub permissions: PermissionSet,
    /// Permission strings that did not match the enumeration.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unknown_permissions: Vec<String>,
    /// User-tunable parameters, in declaration order.
    pub parameters: Vec<ParameterDef>,
}

impl PayloadManifest {
    /// Recognized payload type, if the `payload.type` string is known.
    #[must_use]
    pub fn payload_type(&self) -> Option<PayloadType> {
        self.payload.payload_type
    }

    /// Memory requirement in bytes.
    #[must_use]
    pub fn memory_limit_bytes(&self) -> u64 {
        u64::from(self.requirements.memory_kb).saturating_mul(1024)
    }

    /// Storage requirement in bytes.
    #[must_use]
    pub fn storage_bytes(&self) -> u64 {
        u64::from(self.requirements.storage_kb).saturating_mul(1024)
    }
}

/// The `payload` section of a manifest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactDef {
    /// Recognized type, `None` if `type_name` is not a known spelling.
    #[serde(skip)]
    pub payload_type: Option<PayloadType>,
    /// The raw `type` string as written in the manifest.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Entry identifier inside the artifact, or built-in module name.
    pub entry: String,
    /// Declared artifact digest, empty if none.
    pub checksum: String,
    /// Declared artifact size in bytes.
    pub size: u64,
}

/// The `requirements` section of a manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Requirements {
    /// Minimum firmware version, informational.
    pub min_firmware_version: String,
    /// Named platform APIs the payload relies on.
    pub apis: BTreeSet<String>,
    /// Memory needed to run, in KiB.
    pub memory_kb: u32,
    /// Storage needed to run, in KiB.
    pub storage_kb: u32,
}

/// A user-tunable parameter declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParameterDef {
    /// Parameter key.
    pub name: String,
    /// Value type label, such as `int` or `string`.
    #[serde(rename = "type")]
    pub param_type: String,
    /// Display label.
    pub label: String,
    /// Whether the parameter must be supplied.
    pub required: bool,
    /// Default value, textual.
    pub default: String,
}

#[derive(Deserialize)]
struct ManifestDocument {
    id: Option<String>,
    name: Option<String>,
    version: Option<String>,
    #[serde(default)]
    author: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    payload: ArtifactDocument,
    #[serde(default)]
    requirements: RequirementsDocument,
    #[serde(default)]
    permissions: Vec<String>,
    #[serde(default)]
    parameters: Vec<ParameterDocument>,
}

#[derive(Default, Deserialize)]
struct ArtifactDocument {
    #[serde(default, rename = "type")]
    type_name: String,
    #[serde(default)]
    entry: String,
    #[serde(default)]
    checksum: String,
    #[serde(default)]
    size: u64,
}

#[derive(Default, Deserialize)]
struct RequirementsDocument {
    #[serde(default)]
    min_firmware_version: String,
    #[serde(default)]
    apis: Vec<String>,
    #[serde(default)]
    memory_kb: u32,
    #[serde(default)]
    storage_kb: u32,
}

#[derive(Deserialize)]
struct ParameterDocument {
    #[serde(default)]
    name: String,
    #[serde(default, rename = "type")]
    param_type: String,
    #[serde(default)]
    label: String,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    default: serde_json::Value,
}

fn default_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Decodes manifest bytes into a [`PayloadManifest`].
///
/// In lenient mode unknown permission strings are kept in
/// [`PayloadManifest::unknown_permissions`] and otherwise ignored. Strict mode
/// rejects them.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestCodec {
    strict: bool,
}

impl ManifestCodec {
    /// A codec that ignores unrecognized permission strings.
    #[must_use]
    pub const fn lenient() -> Self {
        Self { strict: false }
    }

    /// A codec that rejects unrecognized permission strings.
    #[must_use]
    pub const fn strict() -> Self {
        Self { strict: true }
    }

    /// Whether this codec rejects unknown permissions.
    #[must_use]
    pub const fn is_strict(&self) -> bool {
        self.strict
    }

    /// Parse manifest bytes.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::Parse`] for malformed documents and
    /// [`PayloadError::MissingField`] when `id`, `name` or `version` is absent.
    pub fn parse(&self, raw: &[u8]) -> PayloadResult<PayloadManifest> {
        let doc: ManifestDocument =
            serde_json::from_slice(raw).map_err(|e| PayloadError::Parse(e.to_string()))?;

        let id = doc.id.ok_or(PayloadError::MissingField("id"))?;
        let name = doc.name.ok_or(PayloadError::MissingField("name"))?;
        let version = doc.version.ok_or(PayloadError::MissingField("version"))?;

        let mut permissions = PermissionSet::EMPTY;
        let mut unknown_permissions = Vec::new();
        for entry in doc.permissions {
            match Permission::from_name(&entry) {
                Some(p) => permissions.insert(p),
                None if self.strict => {
                    return Err(PayloadError::Parse(format!(
                        "unknown permission `{entry}`"
                    )));
                },
                None => {
                    warn!(payload_id = %id, permission = %entry, "Ignoring unknown permission");
                    unknown_permissions.push(entry);
                },
            }
        }

        let payload = ArtifactDef {
            payload_type: PayloadType::from_name(&doc.payload.type_name),
            type_name: doc.payload.type_name,
            entry: doc.payload.entry,
            checksum: doc.payload.checksum,
            size: doc.payload.size,
        };

        let requirements = Requirements {
            min_firmware_version: doc.requirements.min_firmware_version,
            apis: doc.requirements.apis.into_iter().collect(),
            memory_kb: doc.requirements.memory_kb,
            storage_kb: doc.requirements.storage_kb,
        };

        let parameters = doc
            .parameters
            .into_iter()
            .map(|p| ParameterDef {
                name: p.name,
                param_type: p.param_type,
                label: p.label,
                required: p.required,
                default: default_text(p.default),
            })
            .collect();

        Ok(PayloadManifest {
            id,
            name,
            version,
            author: doc.author,
            description: doc.description,
            category: doc.category,
            payload,
            requirements,
            permissions,
            unknown_permissions,
            parameters,
        })
    }
}

/// Check a parsed manifest for the domain rules a runnable payload must meet.
///
/// # Errors
///
/// Returns [`PayloadError::Validation`] naming the first rule that fails.
pub fn check(manifest: &PayloadManifest) -> PayloadResult<()> {
    if manifest.id.is_empty() {
        return Err(PayloadError::Validation("`id` must not be empty".into()));
    }
    if manifest.name.is_empty() {
        return Err(PayloadError::Validation("`name` must not be empty".into()));
    }
    if manifest.version.is_empty() {
        return Err(PayloadError::Validation("`version` must not be empty".into()));
    }
    if manifest.payload.payload_type.is_none() {
        return Err(PayloadError::Validation(format!(
            "unrecognized payload type `{}`",
            manifest.payload.type_name
        )));
    }
    Ok(())
}

/// Whether a parsed manifest is runnable. See [`check`] for the reason.
#[must_use]
pub fn validate(manifest: &PayloadManifest) -> bool {
    check(manifest).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"{
        "id": "wifi_scanner",
        "name": "WiFi Scanner",
        "version": "1.0.0",
        "author": "dezero",
        "description": "Lists nearby access points",
        "category": "recon",
        "payload": {
            "type": "builtin",
            "entry": "wifi_scan",
            "checksum": "",
            "size": 0
        },
        "requirements": {
            "min_firmware_version": "0.1.0",
            "apis": ["wifi", "display"],
            "memory_kb": 16,
            "storage_kb": 4
        },
        "permissions": ["wifi_scan", "display_write"],
        "parameters": [
            {"name": "channel", "type": "int", "label": "Channel", "required": false, "default": 6},
            {"name": "ssid", "type": "string", "label": "SSID", "required": true, "default": "lab"}
        ]
    }"#;

    #[test]
    fn test_parse_full_manifest() {
        let m = ManifestCodec::lenient().parse(FULL.as_bytes()).unwrap();
        assert_eq!(m.id, "wifi_scanner");
        assert_eq!(m.payload_type(), Some(PayloadType::Builtin));
        assert_eq!(m.payload.entry, "wifi_scan");
        assert!(m.requirements.apis.contains("display"));
        assert_eq!(m.memory_limit_bytes(), 16 * 1024);
        assert!(m.permissions.contains(Permission::WifiScan));
        assert!(m.permissions.contains(Permission::DisplayWrite));
        assert!(!m.permissions.contains(Permission::WifiInject));
        assert_eq!(m.parameters.len(), 2);
        assert_eq!(m.parameters[0].name, "channel");
        assert_eq!(m.parameters[0].default, "6");
        assert_eq!(m.parameters[1].default, "lab");
        assert!(validate(&m));
    }

    #[test]
    fn test_missing_required_fields() {
        let codec = ManifestCodec::lenient();
        let err = codec.parse(br#"{"name":"n","version":"1"}"#).unwrap_err();
        assert!(matches!(err, PayloadError::MissingField("id")));
        let err = codec.parse(br#"{"id":"a","version":"1"}"#).unwrap_err();
        assert!(matches!(err, PayloadError::MissingField("name")));
        let err = codec.parse(br#"{"id":"a","name":"n"}"#).unwrap_err();
        assert!(matches!(err, PayloadError::MissingField("version")));
    }

    #[test]
    fn test_optional_sections_default() {
        let m = ManifestCodec::lenient()
            .parse(br#"{"id":"a","name":"n","version":"1"}"#)
            .unwrap();
        assert!(m.permissions.is_empty());
        assert!(m.parameters.is_empty());
        assert_eq!(m.requirements, Requirements::default());
        assert_eq!(m.payload.payload_type, None);
        // Parses, but is not runnable without a type.
        assert!(!validate(&m));
    }

    #[test]
    fn test_malformed_document() {
        let err = ManifestCodec::lenient().parse(b"{not json").unwrap_err();
        assert!(matches!(err, PayloadError::Parse(_)));
        let err = ManifestCodec::lenient()
            .parse(br#"{"id":"a","name":"n","version":"1","requirements":{"memory_kb":"lots"}}"#)
            .unwrap_err();
        assert!(matches!(err, PayloadError::Parse(_)));
    }

    #[test]
    fn test_unknown_permission_modes() {
        let raw = br#"{"id":"a","name":"n","version":"1","payload":{"type":"lua"},
            "permissions":["ble_scan","teleport"]}"#;

        let m = ManifestCodec::lenient().parse(raw).unwrap();
        assert_eq!(m.permissions, PermissionSet::from(Permission::BleScan));
        assert_eq!(m.unknown_permissions, vec!["teleport".to_string()]);

        let err = ManifestCodec::strict().parse(raw).unwrap_err();
        assert!(matches!(err, PayloadError::Parse(msg) if msg.contains("teleport")));
    }

    #[test]
    fn test_type_names_are_case_sensitive() {
        let m = ManifestCodec::lenient()
            .parse(br#"{"id":"a","name":"n","version":"1","payload":{"type":"Lua"}}"#)
            .unwrap();
        assert_eq!(m.payload_type(), None);
        assert_eq!(m.payload.type_name, "Lua");
        assert!(matches!(check(&m), Err(PayloadError::Validation(_))));
    }

    #[test]
    fn test_validate_rejects_empty_identity() {
        let mut m = ManifestCodec::lenient().parse(FULL.as_bytes()).unwrap();
        m.id.clear();
        assert!(!validate(&m));

        let mut m = ManifestCodec::lenient().parse(FULL.as_bytes()).unwrap();
        m.name.clear();
        assert!(!validate(&m));

        let mut m = ManifestCodec::lenient().parse(FULL.as_bytes()).unwrap();
        m.version.clear();
        assert!(matches!(check(&m), Err(PayloadError::Validation(msg)) if msg.contains("version")));
    }

    #[test]
    fn test_empty_version_is_not_runnable() {
        let m = ManifestCodec::lenient()
            .parse(br#"{"id":"a","name":"n","version":"","payload":{"type":"lua"}}"#)
            .unwrap();
        assert!(!validate(&m));
    }

    #[test]
    fn test_parse_is_deterministic() {
        let codec = ManifestCodec::lenient();
        let a = codec.parse(FULL.as_bytes()).unwrap();
        let b = codec.parse(FULL.as_bytes()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_serialize_uses_type_key() {
        let m = ManifestCodec::lenient().parse(FULL.as_bytes()).unwrap();
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["payload"]["type"], "builtin");
        assert_eq!(json["permissions"][0], "wifi_scan");
    }
}
