//! The `/api/version` envelope.

use serde::{Deserialize, Serialize};

/// Version information reported by the server. Doubles as the fingerprint
/// used to recognize this dialect when probing unknown hosts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApiVersion {
    /// API version string, e.g. `0.1`.
    pub api: String,

    /// Server version string, e.g. `1.9.3`.
    pub server: String,

    /// Human-readable server name and version, e.g. `OctoPrint 1.9.3`.
    pub text: String,
}

impl ApiVersion {
    /// True when the version text identifies an OctoPrint-style server.
    pub fn is_octoprint(&self) -> bool {
        self.text.to_lowercase().contains("octoprint")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_version() {
        let version: ApiVersion = serde_json::from_str(
            r#"{"api": "0.1", "server": "1.9.3", "text": "OctoPrint 1.9.3"}"#,
        )
        .unwrap();
        assert_eq!(version.server, "1.9.3");
        assert!(version.is_octoprint());
    }
}
