// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use crate::error::Error;
use std::path::Path;
use std::sync::Arc;

/// Compiled shader bytecode.  The engine never looks inside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderBytecode {
    label: String,
    bytes: Arc<[u8]>,
}

impl ShaderBytecode {
    pub fn from_bytes(label: &str, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            label: label.to_string(),
            bytes: bytes.into(),
        }
    }

    /// Reads a compiled shader from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            log::error!("Can't load shader {}: {e}", path.display());
            Error::ResourceNotFound(format!("{}: {e}", path.display()))
        })?;
        let label = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::from_bytes(&label, bytes))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}
