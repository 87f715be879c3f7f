#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(trivial_casts)]
#![deny(trivial_numeric_casts)]
#![deny(unused_import_braces)]
#![deny(unused_qualifications)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]

//! Typed request and response shapes for the PrusaLink-style REST dialect
//! spoken by single-board print controllers. Jobs are numbered, status comes
//! from one combined envelope, and uploads are raw PUTs. This crate carries
//! no transport of its own.

pub mod files;
pub mod job;
pub mod status;
pub mod version;

pub use files::{FileNode, StorageEntry, StorageList};
pub use job::{JobDetail, PrintFile};
pub use status::{Status, StatusJob, StatusPrinter, StatusStorage};
pub use version::ApiVersion;

/// Header carrying the application key on every authenticated request.
pub const API_KEY_HEADER: &str = "X-Api-Key";

/// Header requesting a print to start as soon as an upload lands.
pub const PRINT_AFTER_UPLOAD_HEADER: &str = "Print-After-Upload";

/// Header allowing an upload to replace an existing file.
pub const OVERWRITE_HEADER: &str = "Overwrite";

/// REST endpoint paths spoken by this dialect.
pub mod paths {
    /// Version information, served by both API generations; the probe target.
    pub const VERSION: &str = "/api/version";

    /// Combined printer, job and storage status.
    pub const STATUS: &str = "/api/v1/status";

    /// Currently running job; 204 when idle.
    pub const JOB: &str = "/api/v1/job";

    /// Available storages.
    pub const STORAGE: &str = "/api/v1/storage";

    /// Pause the running job.
    pub fn job_pause(id: u64) -> String {
        format!("/api/v1/job/{id}/pause")
    }

    /// Resume the paused job.
    pub fn job_resume(id: u64) -> String {
        format!("/api/v1/job/{id}/resume")
    }

    /// DELETE here stops the job outright.
    pub fn job_stop(id: u64) -> String {
        format!("/api/v1/job/{id}")
    }

    /// One file or folder on a storage. GET lists, PUT uploads, POST starts
    /// a print, DELETE removes.
    pub fn file(storage: &str, path: &str) -> String {
        let storage = storage.trim_matches('/');
        let path = path.trim_start_matches('/');
        format!("/api/v1/files/{storage}/{path}")
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    #[test]
    fn file_paths_normalize_slashes() {
        assert_eq!(super::paths::file("usb", "part.gcode"), "/api/v1/files/usb/part.gcode");
        assert_eq!(super::paths::file("/usb/", "/deep/part.gcode"), "/api/v1/files/usb/deep/part.gcode");
    }
}
