//! The `/api/files` envelopes for listing and uploading.

use serde::{Deserialize, Serialize};

/// Listing of one storage location.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FileList {
    /// Entries at this level of the storage tree.
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

/// One file or folder in storage. Upload responses reuse this shape with a
/// sparser field set, so most fields are optional.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    /// File name within its folder.
    pub name: String,

    /// Path relative to the storage root.
    #[serde(default)]
    pub path: Option<String>,

    /// Entry type, `machinecode`, `model` or `folder`.
    #[serde(rename = "type", default)]
    pub file_type: Option<String>,

    /// Size in bytes; folders have none.
    #[serde(default)]
    pub size: Option<u64>,

    /// Upload timestamp, seconds since the epoch.
    #[serde(default)]
    pub date: Option<i64>,

    /// Storage origin, `local` or `sdcard`.
    #[serde(default)]
    pub origin: Option<String>,
}

/// Response to a multipart upload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UploadResponse {
    /// False while the server is still post-processing the upload.
    #[serde(default)]
    pub done: bool,

    /// Where the upload landed.
    pub files: UploadDestinations,
}

/// Upload destinations by storage origin.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadDestinations {
    /// Entry created on local storage.
    #[serde(default)]
    pub local: Option<FileEntry>,

    /// Entry created on the printer's SD card.
    #[serde(default)]
    pub sdcard: Option<FileEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_listing() {
        let list: FileList = serde_json::from_str(
            r#"{
                "files": [
                    {"name": "whistle_v2.gcode", "path": "whistle_v2.gcode", "type": "machinecode",
                     "size": 1468987, "date": 1378847754, "origin": "local"},
                    {"name": "folderA", "path": "folderA", "type": "folder"}
                ],
                "free": "3.2GB"
            }"#,
        )
        .unwrap();
        assert_eq!(list.files.len(), 2);
        assert_eq!(list.files[0].size, Some(1468987));
        assert_eq!(list.files[1].file_type.as_deref(), Some("folder"));
    }

    #[test]
    fn parse_upload_response() {
        let response: UploadResponse = serde_json::from_str(
            r#"{
                "done": true,
                "files": {"local": {"name": "bracket.gcode", "origin": "local"}}
            }"#,
        )
        .unwrap();
        assert!(response.done);
        assert_eq!(response.files.local.unwrap().name, "bracket.gcode");
    }
}
