//! Plugin manifest: wasm sources and guest config.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Name given to the main module when none is set
pub const MAIN_MODULE: &str = "main";

/// Where a module's bytes come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WasmSource {
    /// Module on disk
    File {
        /// Path to the module
        path: PathBuf,
    },
    /// Module already in memory, base64 encoded in JSON
    Data {
        /// Module bytes
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// A single module in a manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wasm {
    /// Byte source
    #[serde(flatten)]
    pub source: WasmSource,
    /// Module name used for linking
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Expected SHA-256 of the bytes, hex encoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl Wasm {
    /// Module from bytes
    #[must_use]
    pub fn data(data: impl Into<Vec<u8>>) -> Self {
        Self {
            source: WasmSource::Data { data: data.into() },
            name: None,
            hash: None,
        }
    }

    /// Module from a file
    #[must_use]
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: WasmSource::File { path: path.into() },
            name: None,
            hash: None,
        }
    }

    /// Set the module name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the expected hash
    #[must_use]
    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }

    /// Read the module bytes and verify the expected hash
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or the hash differs
    pub fn load(&self) -> Result<Vec<u8>, ManifestError> {
        let bytes = match &self.source {
            WasmSource::Data { data } => data.clone(),
            WasmSource::File { path } => {
                std::fs::read(path).map_err(|e| ManifestError::Io {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?
            }
        };

        if let Some(expected) = &self.hash {
            let actual = sha256_hex(&bytes);
            if !expected.eq_ignore_ascii_case(&actual) {
                return Err(ManifestError::HashMismatch {
                    name: self.name.clone().unwrap_or_else(|| MAIN_MODULE.to_string()),
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        Ok(bytes)
    }
}

/// Everything needed to build a plugin
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Modules; the last one is the main module
    pub wasm: Vec<Wasm>,
    /// Config values readable by the guest
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

impl Manifest {
    /// Create a manifest from modules
    #[must_use]
    pub fn new(wasm: impl IntoIterator<Item = Wasm>) -> Self {
        Self {
            wasm: wasm.into_iter().collect(),
            config: BTreeMap::new(),
        }
    }

    /// Add a config value
    #[must_use]
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Add several config values
    #[must_use]
    pub fn with_config_values<K, V>(mut self, values: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.config
            .extend(values.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Parse a manifest from JSON
    ///
    /// # Errors
    ///
    /// Returns error if the JSON does not describe a manifest
    pub fn from_json(json: &str) -> Result<Self, ManifestError> {
        serde_json::from_str(json).map_err(|e| ManifestError::Json(e.to_string()))
    }

    /// Serialize to JSON
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<String, ManifestError> {
        serde_json::to_string(self).map_err(|e| ManifestError::Json(e.to_string()))
    }

    /// The main module
    ///
    /// # Errors
    ///
    /// Returns error if the manifest has no modules
    pub fn main(&self) -> Result<&Wasm, ManifestError> {
        self.wasm.last().ok_or(ManifestError::Empty)
    }

    /// Modules linked ahead of the main module, with their names
    ///
    /// # Errors
    ///
    /// Returns error if one of them has no name
    pub fn dependencies(&self) -> Result<Vec<(&str, &Wasm)>, ManifestError> {
        let count = self.wasm.len().saturating_sub(1);
        self.wasm[..count]
            .iter()
            .enumerate()
            .map(|(index, wasm)| {
                wasm.name
                    .as_deref()
                    .map(|name| (name, wasm))
                    .ok_or(ManifestError::UnnamedModule { index })
            })
            .collect()
    }
}

/// Hex-encoded SHA-256 of `bytes`
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Manifest errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManifestError {
    /// No modules
    #[error("Manifest contains no wasm modules")]
    Empty,

    /// Module file unreadable
    #[error("Failed to read {path}: {reason}")]
    Io { path: String, reason: String },

    /// Module bytes do not match the expected hash
    #[error("Hash mismatch for module {name}: expected {expected}, got {actual}")]
    HashMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    /// Dependency module without a name
    #[error("Module {index} needs a name to be linked")]
    UnnamedModule { index: usize },

    /// Malformed JSON
    #[error("Invalid manifest JSON: {0}")]
    Json(String),
}
