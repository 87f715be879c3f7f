//! The `/api/v1/job` envelope.

use serde::{Deserialize, Serialize};

/// Detail of the running or paused job. The endpoint answers 204 when no
/// job exists, so a body always describes a live job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobDetail {
    /// Job id, used to address job control endpoints.
    pub id: u64,

    /// Job state word, mirrors the printer state vocabulary.
    #[serde(default)]
    pub state: Option<String>,

    /// Percentage of completion, 0 to 100.
    #[serde(default)]
    pub progress: Option<f64>,

    /// Estimated seconds remaining.
    #[serde(default)]
    pub time_remaining: Option<f64>,

    /// Seconds spent printing so far.
    #[serde(default)]
    pub time_printing: Option<f64>,

    /// The file being printed.
    #[serde(default)]
    pub file: Option<PrintFile>,
}

/// The file a job prints from.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PrintFile {
    /// Short (8.3) file name.
    #[serde(default)]
    pub name: Option<String>,

    /// Full display name.
    #[serde(default)]
    pub display_name: Option<String>,

    /// Folder holding the file, e.g. `/usb`.
    #[serde(default)]
    pub path: Option<String>,

    /// Size in bytes.
    #[serde(default)]
    pub size: Option<u64>,

    /// Modification timestamp, seconds since the epoch.
    #[serde(default)]
    pub m_timestamp: Option<i64>,
}

impl JobDetail {
    /// The friendliest name available for this job's file.
    pub fn display_name(&self) -> Option<&str> {
        let file = self.file.as_ref()?;
        file.display_name.as_deref().or(file.name.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_job_detail() {
        let job: JobDetail = serde_json::from_str(
            r#"{
                "id": 129,
                "state": "PRINTING",
                "progress": 50.0,
                "time_remaining": 520,
                "time_printing": 526,
                "file": {
                    "name": "mm3dp~1.bgc",
                    "display_name": "mm3dpodstavec.bgcode",
                    "path": "/usb",
                    "size": 1999072,
                    "m_timestamp": 1689253891
                }
            }"#,
        )
        .unwrap();
        assert_eq!(job.id, 129);
        assert_eq!(job.display_name(), Some("mm3dpodstavec.bgcode"));
        assert_eq!(job.time_remaining, Some(520.0));
    }

    #[test]
    fn display_name_falls_back_to_short_name() {
        let job: JobDetail =
            serde_json::from_str(r#"{"id": 1, "file": {"name": "part~1.gco"}}"#).unwrap();
        assert_eq!(job.display_name(), Some("part~1.gco"));
    }
}
