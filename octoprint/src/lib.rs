#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(trivial_casts)]
#![deny(trivial_numeric_casts)]
#![deny(unused_import_braces)]
#![deny(unused_qualifications)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]

//! Typed request and response shapes for the OctoPrint-style REST dialect
//! spoken by hobbyist print servers. This crate carries no transport of its
//! own; callers pair it with an HTTP client.

pub mod command;
pub mod files;
pub mod job;
pub mod state;
pub mod version;

pub use command::{BedCommand, GcodeCommand, JobCommand, PauseAction, PrintHeadCommand, ToolCommand};
pub use files::{FileEntry, FileList, UploadDestinations, UploadResponse};
pub use job::{FilamentUse, FileInfo, JobInformation, JobProgress, JobSummary};
pub use state::{CurrentState, SdState, StateBlock, StateFlags, TemperatureData};
pub use version::ApiVersion;

/// Header carrying the application key on every authenticated request.
pub const API_KEY_HEADER: &str = "X-Api-Key";

/// REST endpoint paths spoken by this dialect.
pub mod paths {
    /// Server and API version information, also the liveness probe.
    pub const VERSION: &str = "/api/version";

    /// Current printer state, temperatures and SD status.
    pub const PRINTER: &str = "/api/printer";

    /// Current job information and progress; POST for job commands.
    pub const JOB: &str = "/api/job";

    /// Printhead motion commands (jog, home).
    pub const PRINTHEAD: &str = "/api/printer/printhead";

    /// Tool (hotend) commands, including temperature targets.
    pub const TOOL: &str = "/api/printer/tool";

    /// Heated bed commands.
    pub const BED: &str = "/api/printer/bed";

    /// Local file storage root; POST multipart here to upload.
    pub const FILES_LOCAL: &str = "/api/files/local";

    /// Arbitrary G-code pass-through.
    pub const COMMAND: &str = "/api/printer/command";
}
