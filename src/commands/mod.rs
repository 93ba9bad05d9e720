pub mod archive;
pub mod clean;
pub mod restore;
pub mod status;

use crate::archiver::config::{self, ArchiverConfig};
use anyhow::Result;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }
}

/// Overrides shared by every command that walks runs or spawns workers.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub max_threads: Option<usize>,
    pub max_cost: Option<u64>,
    pub tmp_dir: Option<PathBuf>,
    pub archive_top: Option<PathBuf>,
}

/// Load file and environment configuration, then apply command-line flags.
pub fn load_with_overrides(overrides: &ConfigOverrides) -> Result<ArchiverConfig> {
    let mut cfg = config::load_config()?;
    if let Some(n) = overrides.max_threads {
        cfg.archive.max_concurrency = n;
    }
    if let Some(cost) = overrides.max_cost {
        cfg.archive.max_aggregate_cost = cost;
    }
    if let Some(dir) = &overrides.tmp_dir {
        cfg.archive.tmp_dir = dir.clone();
    }
    if let Some(top) = &overrides.archive_top {
        cfg.archive.archive_top = top.clone();
    }
    config::validate(&cfg)?;
    Ok(cfg)
}
