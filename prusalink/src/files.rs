//! The `/api/v1/files` and `/api/v1/storage` envelopes.

use serde::{Deserialize, Serialize};

/// One node of a storage tree. Listing a folder returns the folder node
/// with its immediate children.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FileNode {
    /// Short (8.3) name.
    pub name: String,

    /// Full display name when the short name is mangled.
    #[serde(default)]
    pub display_name: Option<String>,

    /// Node type: `FOLDER`, `PRINT_FILE`, `FIRMWARE` or `FILE`.
    #[serde(rename = "type", default)]
    pub node_type: Option<String>,

    /// Whether the node is read-only.
    #[serde(default)]
    pub ro: bool,

    /// Size in bytes; folders have none.
    #[serde(default)]
    pub size: Option<u64>,

    /// Modification timestamp, seconds since the epoch.
    #[serde(default)]
    pub m_timestamp: Option<i64>,

    /// Immediate children when this node is a folder.
    #[serde(default)]
    pub children: Vec<FileNode>,
}

impl FileNode {
    /// True for folder nodes.
    pub fn is_folder(&self) -> bool {
        self.node_type.as_deref() == Some("FOLDER")
    }
}

/// The `/api/v1/storage` response.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageList {
    /// All storages the controller knows about.
    #[serde(default)]
    pub storage_list: Vec<StorageEntry>,
}

/// One attached storage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StorageEntry {
    /// Storage type: `LOCAL`, `USB` or `SDCARD`.
    #[serde(rename = "type", default)]
    pub storage_type: Option<String>,

    /// Mount path, e.g. `/usb`.
    pub path: String,

    /// Display name.
    #[serde(default)]
    pub name: Option<String>,

    /// Whether the storage is currently attached and usable.
    #[serde(default)]
    pub available: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_folder_listing() {
        let node: FileNode = serde_json::from_str(
            r#"{
                "type": "FOLDER",
                "name": "usb",
                "ro": false,
                "children": [
                    {"name": "part~1.gco", "display_name": "part_one.gcode",
                     "type": "PRINT_FILE", "m_timestamp": 1689253891, "size": 1999072},
                    {"name": "samples", "type": "FOLDER"}
                ]
            }"#,
        )
        .unwrap();
        assert!(node.is_folder());
        assert_eq!(node.children.len(), 2);
        assert_eq!(node.children[0].display_name.as_deref(), Some("part_one.gcode"));
        assert!(node.children[1].is_folder());
    }

    #[test]
    fn parse_storage_list() {
        let list: StorageList = serde_json::from_str(
            r#"{"storage_list": [
                {"type": "USB", "path": "/usb", "name": "usb", "available": true},
                {"type": "SDCARD", "path": "/sd", "available": false}
            ]}"#,
        )
        .unwrap();
        assert_eq!(list.storage_list.len(), 2);
        assert!(list.storage_list[0].available);
        assert!(!list.storage_list[1].available);
    }
}
