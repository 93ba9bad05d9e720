use crate::archiver::clean::CLEANED_MARKER;
use crate::archiver::run::{finished_marker, run_name_of};
use anyhow::Result;
use serde::Serialize;
use std::fmt;
use std::path::Path;

/// Where a run is in its life, derived purely from marker files.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Unarchived,
    /// Destination exists but no completion marker: in progress or partial.
    Archiving,
    Archived,
    Cleaned,
    ArchivedAndCleaned,
    Deleted,
}

impl RunState {
    pub fn detect(run_dir: &Path, arc_dir: &Path) -> Result<Self> {
        let run_name = run_name_of(run_dir)?;
        if !run_dir.exists() {
            return Ok(Self::Deleted);
        }
        let cleaned = run_dir.join(CLEANED_MARKER).exists();
        if is_archive_complete(arc_dir, &run_name) {
            return Ok(if cleaned {
                Self::ArchivedAndCleaned
            } else {
                Self::Archived
            });
        }
        if arc_dir.exists() {
            return Ok(Self::Archiving);
        }
        Ok(if cleaned {
            Self::Cleaned
        } else {
            Self::Unarchived
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unarchived => "unarchived",
            Self::Archiving => "archiving",
            Self::Archived => "archived",
            Self::Cleaned => "cleaned",
            Self::ArchivedAndCleaned => "archived+cleaned",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The only question deletion tooling needs answered.
pub fn is_archive_complete(arc_dir: &Path, run_name: &str) -> bool {
    finished_marker(arc_dir, run_name).is_file()
}
