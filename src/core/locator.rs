//! Picking the newest timelapse out of a listing.

use chrono::{TimeZone, Utc};

use crate::error::ExportError;

/// One row of the printer's timelapse listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDescriptor {
    /// Visible name, tag-stripped, may keep a trailing slash.
    pub name: String,
    /// Link target as it appears on the page.
    pub href: String,
    /// Modification time as epoch seconds.
    pub modified: i64,
    /// Size in bytes when the listing exposes one.
    pub size: Option<u64>,
}

impl ArtifactDescriptor {
    /// Modification time as a printable UTC timestamp.
    pub fn modified_utc(&self) -> String {
        match Utc.timestamp_opt(self.modified, 0) {
            chrono::LocalResult::Single(ts) => ts.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            _ => format!("@{}", self.modified),
        }
    }
}

/// Pick the newest entry: greatest modification time, with the name as a
/// deterministic tie-break so reruns against an unchanged listing agree.
pub fn locate_latest<'a>(
    entries: &'a [ArtifactDescriptor],
    list_path: &str,
) -> Result<&'a ArtifactDescriptor, ExportError> {
    entries
        .iter()
        .max_by_key(|entry| (entry.modified, entry.name.as_str()))
        .ok_or_else(|| ExportError::EmptyListing {
            path: list_path.to_string(),
        })
}
