//! Per-run lifecycle: destination mapping, run selection, the completion
//! marker contract and the run-level stats.

use crate::archiver::builder;
use crate::archiver::codec::Codec;
use crate::archiver::config::ArchiverConfig;
use crate::error::ArchiveError;
use crate::logging;
use anyhow::{Context, Result};
use chrono::{Duration, Local, NaiveDate};
use fs2::FileExt;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::path::{Component, Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

pub const FINISHED_SUFFIX: &str = "_finished.txt";
pub const ARCHIVE_LOG_SUFFIX: &str = "_archive.log";
const LOCK_SUFFIX: &str = "_archive.lock";

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct RunStats {
    pub containers: u64,
    pub files: u64,
    pub surrogates: u64,
    pub bytes: u64,
}

impl RunStats {
    pub fn combine(&mut self, other: &RunStats) {
        self.containers += other.containers;
        self.files += other.files;
        self.surrogates += other.surrogates;
        self.bytes += other.bytes;
    }

    pub fn gib(&self) -> f64 {
        self.bytes as f64 / 1024f64.powi(3)
    }

    pub fn summary(&self) -> String {
        format!(
            "{} containers, {} files, {} surrogates, {:.3} GB",
            self.containers,
            self.files,
            self.surrogates,
            self.gib()
        )
    }
}

pub fn finished_marker(arc_dir: &Path, run_name: &str) -> PathBuf {
    arc_dir.join(format!("{run_name}{FINISHED_SUFFIX}"))
}

pub fn run_log_path(arc_dir: &Path, run_name: &str) -> PathBuf {
    arc_dir.join(format!("{run_name}{ARCHIVE_LOG_SUFFIX}"))
}

fn lock_path(arc_dir: &Path, run_name: &str) -> PathBuf {
    arc_dir.join(format!("{run_name}{LOCK_SUFFIX}"))
}

/// Map a run directory to its destination under `archive_top`. Everything
/// before the first matching anchor is dropped; the anchor itself is kept.
pub fn archive_dir_for(run_dir: &Path, archive_top: &Path, anchors: &[String]) -> PathBuf {
    let full = run_dir.to_string_lossy();
    let tail = anchors
        .iter()
        .find_map(|anchor| full.find(anchor.as_str()).map(|idx| &full[idx..]))
        .unwrap_or(&full);
    archive_top.join(tail.trim_start_matches('/'))
}

/// Absolute form of `run_dir` with `.` and `..` folded lexically. Symlinks are
/// left alone so an anchor reached through a linked mount still matches.
pub fn absolute_run_dir(run_dir: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(run_dir)
        .with_context(|| format!("failed to resolve {}", run_dir.display()))?;
    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

pub fn run_name_of(run_dir: &Path) -> Result<String> {
    let name = run_dir
        .file_name()
        .with_context(|| format!("bad run directory {}", run_dir.display()))?;
    Ok(name.to_string_lossy().to_string())
}

/// Turn a cut date into `YYMMDD`. Negative numbers count days back from `today`.
pub fn resolve_cut(raw: &str, today: NaiveDate) -> Result<String> {
    let trimmed = raw.trim();
    if let Ok(days) = trimmed.parse::<i64>() {
        if days < 0 {
            let date = Duration::try_days(days)
                .and_then(|delta| today.checked_add_signed(delta))
                .ok_or_else(|| ArchiveError::config(format!("cut date {raw} out of range")))?;
            return Ok(date.format("%y%m%d").to_string());
        }
        if trimmed.len() == 6 {
            return Ok(trimmed.to_string());
        }
    }
    Err(ArchiveError::config(format!(
        "invalid cut date {raw}: expected YYMMDD or a negative day offset"
    ))
    .into())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CutWindow {
    pub cuton: Option<String>,
    pub cutoff: Option<String>,
}

impl CutWindow {
    pub fn resolve(cuton: Option<&str>, cutoff: Option<&str>) -> Result<Self> {
        let today = Local::now().date_naive();
        let window = Self {
            cuton: cuton.map(|c| resolve_cut(c, today)).transpose()?,
            cutoff: cutoff.map(|c| resolve_cut(c, today)).transpose()?,
        };
        if let (Some(on), Some(off)) = (&window.cuton, &window.cutoff) {
            if off < on {
                return Err(ArchiveError::config("--cuton must be less than --cutoff").into());
            }
        }
        Ok(window)
    }

    pub fn admits(&self, run_dir: &Path) -> bool {
        let name = run_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let date: String = name.chars().take(6).collect();
        if self.cuton.as_ref().is_some_and(|on| date < *on) {
            debug!(run = %run_dir.display(), "skipping, earlier than cuton");
            return false;
        }
        if self.cutoff.as_ref().is_some_and(|off| date > *off) {
            debug!(run = %run_dir.display(), "skipping, later than cutoff");
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunSelection {
    Dir(PathBuf),
    List(PathBuf),
    Automatic,
}

/// One run per line; `#` starts a comment.
pub fn read_run_list(path: &Path) -> Result<Vec<PathBuf>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read run list {}", path.display()))?;
    Ok(raw
        .lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .collect())
}

/// Every directory under `roots` whose name starts with a digit, sorted.
pub fn discover_runs(roots: &[PathBuf]) -> Result<Vec<PathBuf>> {
    if roots.is_empty() {
        return Err(ArchiveError::config(
            "--automatic needs run roots; set SEQ_ARCHIVE_RUN_ROOTS or [discovery] run_roots",
        )
        .into());
    }
    let mut runs = Vec::new();
    for root in roots {
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(root = %root.display(), %err, "cannot list run root");
                continue;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if is_dir && name.starts_with(|c: char| c.is_ascii_digit()) {
                runs.push(entry.path());
            }
        }
    }
    runs.sort();
    Ok(runs)
}

pub fn select_runs(
    selection: &RunSelection,
    roots: &[PathBuf],
    window: &CutWindow,
) -> Result<Vec<PathBuf>> {
    let candidates = match selection {
        RunSelection::Dir(dir) => vec![dir.clone()],
        RunSelection::List(path) => read_run_list(path)?,
        RunSelection::Automatic => discover_runs(roots)?,
    };
    Ok(candidates.into_iter().filter(|run| window.admits(run)).collect())
}

/// Everything the builder needs while it works on one run.
#[derive(Debug)]
pub struct RunContext<'a> {
    pub config: &'a ArchiverConfig,
    pub codec: &'a Codec,
    pub run_name: String,
    pub run_dir: PathBuf,
    /// Archived names are relative to this directory and start with the run name.
    pub run_parent: PathBuf,
    pub arc_dir: PathBuf,
    pub stats: RunStats,
    next_sequence: u32,
}

impl<'a> RunContext<'a> {
    pub fn new(
        config: &'a ArchiverConfig,
        codec: &'a Codec,
        run_dir: &Path,
        arc_dir: &Path,
    ) -> Result<Self> {
        let run_name = run_name_of(run_dir)?;
        let run_parent = run_dir
            .parent()
            .with_context(|| format!("run directory {} has no parent", run_dir.display()))?
            .to_path_buf();
        Ok(Self {
            config,
            codec,
            run_name,
            run_dir: run_dir.to_path_buf(),
            run_parent,
            arc_dir: arc_dir.to_path_buf(),
            stats: RunStats::default(),
            next_sequence: 0,
        })
    }

    /// Sequence numbers are handed out when a unit is opened and never reused.
    pub fn allocate_sequence(&mut self) -> u32 {
        let seq = self.next_sequence;
        self.next_sequence += 1;
        seq
    }

    pub fn relative_name(&self, path: &Path) -> Result<String> {
        let rel = path
            .strip_prefix(&self.run_parent)
            .with_context(|| {
                format!("{} is outside {}", path.display(), self.run_parent.display())
            })?;
        Ok(rel.to_string_lossy().to_string())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunSummary {
    pub run: String,
    pub arc_dir: PathBuf,
    pub stats: RunStats,
    pub secs: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Skipped { run: String, reason: String },
    Archived(RunSummary),
    DryRun(RunSummary),
}

impl RunOutcome {
    pub fn stats(&self) -> RunStats {
        match self {
            Self::Skipped { .. } => RunStats::default(),
            Self::Archived(s) | Self::DryRun(s) => s.stats,
        }
    }
}

fn log_summary(summary: &RunSummary) {
    let mb_per_sec = if summary.secs > 0.0 {
        summary.stats.bytes as f64 / 1024f64.powi(2) / summary.secs
    } else {
        0.0
    };
    info!(
        run = %summary.run,
        containers = summary.stats.containers,
        files = summary.stats.files,
        surrogates = summary.stats.surrogates,
        gb = format!("{:.3}", summary.stats.gib()),
        secs = format!("{:.1}", summary.secs),
        mb_per_sec = format!("{mb_per_sec:.1}"),
        "all done"
    );
}

/// Archive one run into its destination directory. A run whose completion
/// marker already exists is skipped unless forced; a destination without a
/// marker is a partial archive and needs `force`.
pub fn archive_run(config: &ArchiverConfig, codec: &Codec, run_dir: &Path) -> Result<RunOutcome> {
    let started = Instant::now();
    let settings = &config.archive;
    if !run_dir.is_dir() {
        return Err(ArchiveError::config(format!("bad rundir {}", run_dir.display())).into());
    }
    let run_dir = absolute_run_dir(run_dir)?;
    let run_name = run_name_of(&run_dir)?;
    let arc_dir = archive_dir_for(&run_dir, &settings.archive_top, &config.discovery.path_anchors);
    let marker = finished_marker(&arc_dir, &run_name);

    if arc_dir.exists() {
        if marker.exists() {
            if !settings.force {
                debug!(arc_dir = %arc_dir.display(), "appears finished, skipping");
                return Ok(RunOutcome::Skipped {
                    run: run_name,
                    reason: "already archived".to_string(),
                });
            }
            warn!(marker = %marker.display(), "marker exists, forcing overwrite");
        } else if !settings.force {
            return Err(ArchiveError::config(format!(
                "partial archive of {} exists",
                arc_dir.display()
            ))
            .into());
        }
    }

    if !settings.tmp_dir.is_dir() {
        let msg = format!("bad tmpdir {}", settings.tmp_dir.display());
        return Err(ArchiveError::config(msg).into());
    }

    let mut ctx = RunContext::new(config, codec, &run_dir, &arc_dir)?;

    if settings.dry_run {
        info!(
            run = %run_dir.display(),
            arc_dir = %arc_dir.display(),
            "dry run, nothing will be written"
        );
        builder::build_run(&mut ctx)?;
        let summary = RunSummary {
            run: run_name,
            arc_dir,
            stats: ctx.stats,
            secs: started.elapsed().as_secs_f64(),
        };
        log_summary(&summary);
        return Ok(RunOutcome::DryRun(summary));
    }

    fs::create_dir_all(&arc_dir)
        .with_context(|| format!("failed to create {}", arc_dir.display()))?;
    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_path(&arc_dir, &run_name))
        .with_context(|| format!("failed to open lock in {}", arc_dir.display()))?;
    lock_file.try_lock_exclusive().map_err(|err| {
        ArchiveError::config(format!("{run_name} is being archived by another process: {err}"))
    })?;
    let _run_log = logging::attach_run_log(&run_log_path(&arc_dir, &run_name))?;

    if marker.exists() {
        fs::remove_file(&marker)
            .with_context(|| format!("failed to remove stale {}", marker.display()))?;
    }

    info!(run = %run_dir.display(), arc_dir = %arc_dir.display(), "archiving");
    builder::build_run(&mut ctx)?;

    File::create(&marker).with_context(|| format!("failed to write {}", marker.display()))?;
    let summary = RunSummary {
        run: run_name.clone(),
        arc_dir: arc_dir.clone(),
        stats: ctx.stats,
        secs: started.elapsed().as_secs_f64(),
    };
    log_summary(&summary);

    let _ = FileExt::unlock(&lock_file);
    drop(lock_file);
    let _ = fs::remove_file(lock_path(&arc_dir, &run_name));
    Ok(RunOutcome::Archived(summary))
}
