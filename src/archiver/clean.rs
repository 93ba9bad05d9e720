//! Housekeeping: removes image and per-lane intensity directories from runs
//! that have been demultiplexed, leaving a `cleaned.txt` marker behind.

use crate::archiver::config::ArchiverConfig;
use crate::archiver::scheduler::{self, Job, SchedulerLimits};
use crate::error::ArchiveError;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

pub const CLEANED_MARKER: &str = "cleaned.txt";
const UNALIGNED_DIR: &str = "Data/Intensities/BaseCalls/Unaligned";
const COUNT_CAP: u64 = 200;

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct CleanStats {
    pub runs: u64,
    pub files: u64,
    pub bytes: u64,
}

impl CleanStats {
    pub fn combine(&mut self, other: &CleanStats) {
        self.runs += other.runs;
        self.files += other.files;
        self.bytes += other.bytes;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanOutcome {
    Cleaned(CleanStats),
    Skipped(String),
    Failed(String),
}

/// Refuse cutoffs that are too recent; `cutoff` is `YYMMDD`.
pub fn check_cutoff(cutoff: &str, today: NaiveDate, min_age_days: i64) -> Result<()> {
    let date = NaiveDate::parse_from_str(cutoff, "%y%m%d")
        .map_err(|err| ArchiveError::config(format!("invalid cutoff {cutoff}: {err}")))?;
    if (today - date).num_days() < min_age_days {
        return Err(ArchiveError::config(format!(
            "--cutoff must be at least {min_age_days} days in the past"
        ))
        .into());
    }
    Ok(())
}

/// Count files and bytes under `dir`, giving up once more than `cap` files
/// have been seen.
fn count_tree(dir: &Path, cap: u64) -> (u64, u64) {
    let mut files = 0u64;
    let mut bytes = 0u64;
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        if files > cap {
            break;
        }
        let Ok(entries) = fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.flatten() {
            match entry.file_type() {
                Ok(t) if t.is_dir() => stack.push(entry.path()),
                Ok(_) => {
                    files += 1;
                    bytes += fs::metadata(entry.path()).map(|m| m.len()).unwrap_or(0);
                }
                Err(_) => {}
            }
        }
    }
    (files, bytes)
}

fn lane_dirs(parent: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(parent) else {
        return Vec::new();
    };
    let mut out = entries
        .flatten()
        .filter(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            name.len() == 4 && name.starts_with("L00")
        })
        .map(|e| e.path())
        .collect::<Vec<_>>();
    out.sort();
    out
}

fn remove_tree(path: &Path) {
    if let Err(err) = fs::remove_dir_all(path) {
        debug!(path = %path.display(), %err, "could not delete");
    }
}

/// Clean one run. Directories that cannot be removed are logged and skipped.
pub fn clean_run(run_dir: &Path, count_files: bool, dry_run: bool) -> Result<CleanOutcome> {
    if run_dir.join(CLEANED_MARKER).exists() {
        return Ok(CleanOutcome::Skipped("already cleaned".to_string()));
    }
    if !run_dir.join(UNALIGNED_DIR).exists() {
        warn!(run = %run_dir.display(), "not cleaning, no Unaligned found");
        return Ok(CleanOutcome::Skipped("no Unaligned directory".to_string()));
    }

    let mut stats = CleanStats {
        runs: 1,
        ..CleanStats::default()
    };
    let mut tally = |path: &Path| {
        if count_files {
            let (files, bytes) = count_tree(path, COUNT_CAP);
            stats.files += files;
            stats.bytes += bytes;
        }
    };

    debug!(run = %run_dir.display(), "sizing");
    tally(run_dir);
    let mut targets = vec![run_dir.join("Thumbnail_Images")];
    targets.extend(lane_dirs(&run_dir.join("Data/Intensities")));
    targets.extend(lane_dirs(&run_dir.join("Data/Intensities/BaseCalls")));
    for target in &targets[1..] {
        tally(target);
    }

    if !dry_run {
        for target in &targets {
            remove_tree(target);
        }
        let marker = run_dir.join(CLEANED_MARKER);
        fs::File::create(&marker).with_context(|| format!("failed to write {}", marker.display()))?;
    }
    info!(
        run = %run_dir.display(),
        files = stats.files,
        mb = stats.bytes / (1024 * 1024),
        dry_run,
        "cleaned"
    );
    Ok(CleanOutcome::Cleaned(stats))
}

struct CleanJob {
    run_dir: PathBuf,
    count_files: bool,
    dry_run: bool,
}

impl Job for CleanJob {
    type Output = CleanOutcome;

    fn label(&self) -> String {
        self.run_dir.display().to_string()
    }

    fn estimated_cost(&self) -> u64 {
        0
    }

    fn run(&self) -> Result<CleanOutcome> {
        match clean_run(&self.run_dir, self.count_files, self.dry_run) {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                error!(run = %self.run_dir.display(), error = %format!("{err:#}"), "clean failed");
                Ok(CleanOutcome::Failed(format!("{err:#}")))
            }
        }
    }
}

/// Clean every run on a worker pool, collecting outcomes as runs finish.
pub fn clean_runs(
    config: &ArchiverConfig,
    runs: &[PathBuf],
    dry_run: bool,
) -> Result<Vec<(PathBuf, CleanOutcome)>> {
    let jobs = runs
        .iter()
        .map(|run| CleanJob {
            run_dir: run.clone(),
            count_files: config.clean.count_files,
            dry_run,
        })
        .collect::<Vec<_>>();
    info!(runs = jobs.len(), "found runs to clean");
    let limits = SchedulerLimits {
        max_concurrency: config.archive.max_concurrency,
        max_aggregate_cost: config.archive.max_aggregate_cost,
    };
    let mut outcomes = Vec::with_capacity(jobs.len());
    scheduler::run_completion_order(jobs, limits, |job, outcome| {
        outcomes.push((job.run_dir, outcome));
        Ok(())
    })?;
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_run(root: &Path) -> PathBuf {
        let run = root.join("160101_M0_0001_A");
        fs::create_dir_all(run.join(UNALIGNED_DIR)).expect("mkdir");
        fs::create_dir_all(run.join("Thumbnail_Images/L001")).expect("mkdir");
        fs::create_dir_all(run.join("Data/Intensities/L001")).expect("mkdir");
        fs::create_dir_all(run.join("Data/Intensities/BaseCalls/L002")).expect("mkdir");
        fs::create_dir_all(run.join("Data/Intensities/Offsets")).expect("mkdir");
        fs::write(run.join("Thumbnail_Images/L001/a.jpg"), "jpg").expect("write");
        fs::write(run.join("Data/Intensities/L001/s.cif"), "cif").expect("write");
        fs::write(run.join("Data/Intensities/BaseCalls/L002/s.bcl"), "bcl").expect("write");
        fs::write(run.join("RunInfo.xml"), "<RunInfo/>").expect("write");
        run
    }

    #[test]
    fn cleaning_removes_lane_dirs_and_marks_run() {
        let tmp = tempdir().expect("tempdir");
        let run = make_run(tmp.path());

        let outcome = clean_run(&run, true, false).expect("clean");
        let CleanOutcome::Cleaned(stats) = outcome else {
            panic!("expected cleaned, got {outcome:?}");
        };
        assert!(stats.files >= 4);
        assert!(!run.join("Thumbnail_Images").exists());
        assert!(!run.join("Data/Intensities/L001").exists());
        assert!(!run.join("Data/Intensities/BaseCalls/L002").exists());
        assert!(run.join("Data/Intensities/Offsets").exists());
        assert!(run.join("RunInfo.xml").exists());
        assert!(run.join(CLEANED_MARKER).exists());

        let again = clean_run(&run, true, false).expect("clean again");
        assert_eq!(again, CleanOutcome::Skipped("already cleaned".to_string()));
    }

    #[test]
    fn dry_run_leaves_everything() {
        let tmp = tempdir().expect("tempdir");
        let run = make_run(tmp.path());
        clean_run(&run, false, true).expect("clean");
        assert!(run.join("Thumbnail_Images").exists());
        assert!(!run.join(CLEANED_MARKER).exists());
    }

    #[test]
    fn runs_without_unaligned_are_skipped() {
        let tmp = tempdir().expect("tempdir");
        let run = tmp.path().join("160101_M0_0002_B");
        fs::create_dir_all(run.join("Thumbnail_Images")).expect("mkdir");
        let outcome = clean_run(&run, true, false).expect("clean");
        assert!(matches!(outcome, CleanOutcome::Skipped(_)));
        assert!(run.join("Thumbnail_Images").exists());
    }

    #[test]
    fn recent_cutoff_is_refused() {
        let today = NaiveDate::from_ymd_opt(2016, 10, 31).expect("date");
        assert!(check_cutoff("161030", today, 45).is_err());
        assert!(check_cutoff("160901", today, 45).is_ok());
        assert!(check_cutoff("garbage", today, 45).is_err());
    }

    #[test]
    fn pool_reports_every_run() {
        let tmp = tempdir().expect("tempdir");
        let a = make_run(&tmp.path().join("a"));
        let b = tmp.path().join("b/160101_M0_0003_C");
        fs::create_dir_all(&b).expect("mkdir");
        let cfg = ArchiverConfig::default();
        let outcomes = clean_runs(&cfg, &[a.clone(), b.clone()], false).expect("clean");
        assert_eq!(outcomes.len(), 2);
        assert!(a.join(CLEANED_MARKER).exists());
        assert!(!b.join(CLEANED_MARKER).exists());
    }
}
