//! The `/api/version` envelope.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Version information. Served by every generation of the dialect, which
/// makes it both the connection handshake and the probe fingerprint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApiVersion {
    /// API version string, e.g. `2.0.0`.
    pub api: String,

    /// Server version string.
    #[serde(default)]
    pub server: Option<String>,

    /// Human-readable server name, e.g. `PrusaLink`.
    pub text: String,

    /// Controller hostname.
    #[serde(default)]
    pub hostname: Option<String>,

    /// Active nozzle diameter in millimeters.
    #[serde(default)]
    pub nozzle_diameter: Option<f64>,

    /// Optional capability switches, e.g. `upload-by-put`.
    #[serde(default)]
    pub capabilities: Option<HashMap<String, bool>>,
}

impl ApiVersion {
    /// True when the version text identifies a PrusaLink-style server.
    pub fn is_prusalink(&self) -> bool {
        self.text.to_lowercase().contains("prusalink")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_version() {
        let version: ApiVersion = serde_json::from_str(
            r#"{
                "api": "2.0.0",
                "server": "2.1.2",
                "nozzle_diameter": 0.4,
                "text": "PrusaLink",
                "hostname": "bench-mk4",
                "capabilities": {"upload-by-put": true}
            }"#,
        )
        .unwrap();
        assert!(version.is_prusalink());
        assert_eq!(version.hostname.as_deref(), Some("bench-mk4"));
        assert_eq!(version.capabilities.unwrap()["upload-by-put"], true);
    }
}
