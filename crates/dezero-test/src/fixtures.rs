//! Test fixtures for manifests and install packages.

use serde_json::{Value, json};

use dezero_payload::registry::artifact_digest;
use dezero_payload::{ManifestCodec, PayloadManifest, PayloadPackage};

/// Builds manifest JSON documents.
///
/// Defaults produce a valid `lua` payload with no requirements and no
/// permissions.
#[derive(Debug, Clone)]
pub struct ManifestBuilder {
    doc: Value,
}

impl ManifestBuilder {
    /// Start a manifest for `id`.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            doc: json!({
                "id": id,
                "name": format!("Test {id}"),
                "version": "1.0.0",
                "author": "test",
                "description": "fixture payload",
                "category": "test",
                "payload": { "type": "lua", "entry": "", "checksum": "", "size": 0 },
                "requirements": {
                    "min_firmware_version": "0.1.0",
                    "apis": [],
                    "memory_kb": 0,
                    "storage_kb": 0
                },
                "permissions": [],
                "parameters": []
            }),
        }
    }

    /// Set `payload.type`.
    #[must_use]
    pub fn payload_type(mut self, type_name: &str) -> Self {
        self.doc["payload"]["type"] = json!(type_name);
        self
    }

    /// Set `payload.entry`.
    #[must_use]
    pub fn entry(mut self, entry: &str) -> Self {
        self.doc["payload"]["entry"] = json!(entry);
        self
    }

    /// Set `version`.
    #[must_use]
    pub fn version(mut self, version: &str) -> Self {
        self.doc["version"] = json!(version);
        self
    }

    /// Set `requirements.memory_kb`.
    #[must_use]
    pub fn memory_kb(mut self, kb: u32) -> Self {
        self.doc["requirements"]["memory_kb"] = json!(kb);
        self
    }

    /// Set `requirements.storage_kb`.
    #[must_use]
    pub fn storage_kb(mut self, kb: u32) -> Self {
        self.doc["requirements"]["storage_kb"] = json!(kb);
        self
    }

    /// Set the permission list.
    #[must_use]
    pub fn permissions(mut self, names: &[&str]) -> Self {
        self.doc["permissions"] = json!(names);
        self
    }

    /// Append a parameter declaration.
    #[must_use]
    pub fn parameter(mut self, name: &str, param_type: &str, default: &str) -> Self {
        if let Some(list) = self.doc["parameters"].as_array_mut() {
            list.push(json!({
                "name": name,
                "type": param_type,
                "label": name,
                "required": false,
                "default": default
            }));
        }
        self
    }

    /// Declare checksum and size matching `artifact`.
    #[must_use]
    pub fn artifact(mut self, artifact: &[u8]) -> Self {
        self.doc["payload"]["checksum"] = json!(format!("blake3:{}", artifact_digest(artifact)));
        self.doc["payload"]["size"] = json!(artifact.len());
        self
    }

    /// Remove a top-level field.
    #[must_use]
    pub fn without(mut self, field: &str) -> Self {
        if let Some(obj) = self.doc.as_object_mut() {
            obj.remove(field);
        }
        self
    }

    /// The manifest as a JSON value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        self.doc.clone()
    }

    /// The manifest as JSON bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.doc.to_string().into_bytes()
    }

    /// The manifest parsed with the lenient codec.
    ///
    /// # Panics
    ///
    /// Panics if the built document does not parse.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn parse(&self) -> PayloadManifest {
        ManifestCodec::lenient()
            .parse(&self.to_bytes())
            .expect("fixture manifest should parse")
    }

    /// An install package carrying this manifest and `artifact`, with
    /// checksum and size filled in.
    #[must_use]
    pub fn package(self, artifact: &[u8]) -> PayloadPackage {
        let manifest = self.artifact(artifact).to_bytes();
        PayloadPackage {
            manifest,
            artifact: artifact.to_vec(),
        }
    }
}

/// A Lua payload package with a one-line script.
#[must_use]
pub fn test_lua_package(id: &str) -> PayloadPackage {
    ManifestBuilder::new(id).package(b"print('hello from dezero')")
}

/// A built-in payload package for `module`, requesting `permission`.
#[must_use]
pub fn test_builtin_package(id: &str, module: &str, permission: &str) -> PayloadPackage {
    ManifestBuilder::new(id)
        .payload_type("builtin")
        .entry(module)
        .permissions(&[permission])
        .package(b"")
}
