//! Session configuration.
//!
//! ```
//! use neo4j_ogm::OgmConfig;
//!
//! let cfg = OgmConfig::from_json(r#"{ "backend": { "kind": "memory" }, "timestamps": false }"#).unwrap();
//! assert!(!cfg.timestamps);
//! assert!(cfg.auto_index);
//! ```

use serde::{Deserialize, Serialize};

use crate::storage::BackendConfig;
use crate::Result;

/// Settings for a [`Session`](crate::Session).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OgmConfig {
    pub backend: BackendConfig,
    /// Stamp `created_at` / `updated_at` on save when a class declares them.
    pub timestamps: bool,
    /// Create a class's declared indexes when it is registered.
    pub auto_index: bool,
}

impl Default for OgmConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::Memory,
            timestamps: true,
            auto_index: true,
        }
    }
}

impl OgmConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_uses_defaults() {
        assert_eq!(OgmConfig::from_json("{}").unwrap(), OgmConfig::default());
    }

    #[test]
    fn test_unknown_backend_is_config_error() {
        let err = OgmConfig::from_json(r#"{ "backend": { "kind": "bolt" } }"#).unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }
}
