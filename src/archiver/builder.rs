//! Walks a run tree and turns it into archive units.
//!
//! Every directory is listed in name order. Ignored directories are pruned,
//! child projects become their own unit in the same destination, verbatim
//! files are appended as they are found and raw reads are queued as
//! compression jobs that are drained once the unit's subtree is consumed.

use crate::archiver::classify::{self, DirClass};
use crate::archiver::codec::Codec;
use crate::archiver::container::ArchiveContainer;
use crate::archiver::run::{RunContext, RunStats};
use crate::archiver::scheduler::{self, Job, SchedulerLimits};
use crate::archiver::validate;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Turns one raw-read file into a surrogate in the temp dir.
pub struct CompressJob {
    pub source: PathBuf,
    pub archived_name: String,
    pub size: u64,
    tmp_dir: PathBuf,
    codec: Codec,
}

pub struct CompressedFile {
    pub file: NamedTempFile,
    pub resident_size: u64,
}

impl Job for CompressJob {
    type Output = CompressedFile;

    fn label(&self) -> String {
        self.archived_name.clone()
    }

    fn estimated_cost(&self) -> u64 {
        self.size.saturating_mul(3) / 4
    }

    fn run(&self) -> Result<CompressedFile> {
        let file = tempfile::Builder::new()
            .prefix(".seq-archive-")
            .suffix(classify::SURROGATE_SUFFIX)
            .tempfile_in(&self.tmp_dir)
            .with_context(|| format!("failed to create temp file in {}", self.tmp_dir.display()))?;
        self.codec.compress(&self.source, file.path())?;
        let resident_size = file.as_file().metadata()?.len();
        debug!(
            source = %self.source.display(),
            size = self.size,
            resident_size,
            "compressed"
        );
        Ok(CompressedFile { file, resident_size })
    }
}

/// State for the unit currently being filled.
struct Unit {
    name: String,
    container: Option<ArchiveContainer>,
    jobs: Vec<CompressJob>,
    stats: RunStats,
}

/// Archive the whole run as the top-level unit plus any child projects.
pub fn build_run(ctx: &mut RunContext<'_>) -> Result<()> {
    let top = ctx.run_dir.clone();
    build_unit(ctx, &top, None)
}

fn container_name(run_name: &str, seq: u32, project: Option<&str>) -> String {
    match project {
        Some(project) => format!("{run_name}_{seq}_{project}.tar"),
        None => format!("{run_name}_{seq}.tar"),
    }
}

fn build_unit(ctx: &mut RunContext<'_>, top: &Path, project: Option<&str>) -> Result<()> {
    let config = ctx.config;
    let settings = &config.archive;
    let seq = ctx.allocate_sequence();
    let name = container_name(&ctx.run_name, seq, project);
    let path = ctx.arc_dir.join(&name);
    debug!(container = %path.display(), "opening unit");

    let container = if settings.dry_run {
        None
    } else {
        Some(ArchiveContainer::create(&path, settings.force, settings.sample_len)?)
    };
    let mut unit = Unit {
        name,
        container,
        jobs: Vec::new(),
        stats: RunStats::default(),
    };

    walk(ctx, top, &mut unit)?;
    drain_jobs(ctx, &mut unit)?;

    unit.stats.containers += 1;
    if let Some(container) = unit.container.take() {
        let sealed = container.seal()?;
        if settings.validate {
            let report = validate::validate_container(&sealed.path, &sealed.tasks, ctx.codec)?;
            debug!(
                container = %report.container.display(),
                checked = report.checked,
                skipped = report.skipped,
                failures = report.failures.len(),
                "validation report"
            );
        }
    }
    info!(
        container = %unit.name,
        files = unit.stats.files,
        surrogates = unit.stats.surrogates,
        bytes = unit.stats.bytes,
        "unit complete"
    );
    ctx.stats.combine(&unit.stats);
    Ok(())
}

fn sorted_entries(dir: &Path) -> Result<Vec<fs::DirEntry>> {
    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("failed to list {}", dir.display()))?
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("failed to list {}", dir.display()))?;
    entries.sort_by_key(|e| e.file_name());
    Ok(entries)
}

fn walk(ctx: &mut RunContext<'_>, dir: &Path, unit: &mut Unit) -> Result<()> {
    let project_containers = ctx.config.archive.project_containers;
    let mut files = Vec::new();
    let mut descend = Vec::new();

    for entry in sorted_entries(dir)? {
        let name = entry.file_name().to_string_lossy().to_string();
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if !is_dir {
            files.push(name);
            continue;
        }
        let path = entry.path();
        match classify::classify_dir(&ctx.relative_name(&path)?, project_containers) {
            DirClass::Ignore => debug!(dir = %path.display(), "pruning"),
            DirClass::ChildProject => build_unit(ctx, &path, Some(&name))?,
            DirClass::Descend => descend.push(path),
        }
    }

    let plan = classify::classify_files(dir, &files, ctx.config.archive.small_file_floor);
    if !plan.dropped.is_empty() {
        debug!(dir = %dir.display(), dropped = plan.dropped.len(), "skipped files");
    }

    for name in &plan.add {
        let path = dir.join(name);
        let archived = ctx.relative_name(&path)?;
        match fs::metadata(&path) {
            Ok(meta) => {
                debug!(file = %path.display(), bytes = meta.len(), "adding");
                unit.stats.bytes += meta.len();
            }
            Err(err) => debug!(file = %path.display(), %err, "cannot stat, adding without size"),
        }
        unit.stats.files += 1;
        if let Some(container) = unit.container.as_mut() {
            container.add_verbatim(&path, &archived)?;
        }
    }

    for name in &plan.compress {
        let path = dir.join(name);
        let size = match fs::symlink_metadata(&path) {
            Ok(meta) => meta.len(),
            Err(err) => {
                warn!(file = %path.display(), %err, "cannot stat raw read, estimating zero cost");
                0
            }
        };
        let rel_dir = ctx.relative_name(dir)?;
        unit.jobs.push(CompressJob {
            archived_name: format!("{rel_dir}/{}", classify::surrogate_name(name)),
            source: path,
            size,
            tmp_dir: ctx.config.archive.tmp_dir.clone(),
            codec: ctx.codec.clone(),
        });
    }

    for sub in descend {
        walk(ctx, &sub, unit)?;
    }
    Ok(())
}

fn drain_jobs(ctx: &RunContext<'_>, unit: &mut Unit) -> Result<()> {
    let jobs = std::mem::take(&mut unit.jobs);
    if jobs.is_empty() {
        return Ok(());
    }
    let Some(container) = unit.container.as_mut() else {
        for job in &jobs {
            info!(source = %job.source.display(), member = %job.archived_name, "would compress");
            unit.stats.files += 1;
            unit.stats.surrogates += 1;
            unit.stats.bytes += job.size;
        }
        return Ok(());
    };

    let limits = SchedulerLimits {
        max_concurrency: ctx.config.archive.max_concurrency,
        max_aggregate_cost: ctx.config.archive.max_aggregate_cost,
    };
    let stats = &mut unit.stats;
    let sched = scheduler::run_fifo(jobs, limits, |job, out| {
        container.add_surrogate(out.file.path(), &job.source, &job.archived_name)?;
        stats.files += 1;
        stats.surrogates += 1;
        stats.bytes += out.resident_size;
        Ok(())
    })?;
    debug!(
        container = %unit.name,
        started = sched.started,
        finished = sched.finished,
        peak_running = sched.peak_running,
        peak_cost = sched.peak_cost,
        "compression drained"
    );
    Ok(())
}


#[cfg(all(test, unix))]
mod build_tests {
    use super::*;
    use crate::archiver::codec::testing::install_fake_codec;
    use crate::archiver::config::ArchiverConfig;
    use crate::archiver::container::MemberIndex;
    use tempfile::tempdir;

    fn record_file(path: &Path, records: usize) {
        let body: String = (0..records)
            .map(|i| format!("@r{i}\nACGTACGTACGT\n+r{i}\nIIIIIIIIIIII\n"))
            .collect();
        fs::write(path, body).expect("write fastq");
    }

    #[test]
    fn duplicate_project_names_get_distinct_containers() {
        let tmp = tempdir().expect("tempdir");
        let run = tmp.path().join("runs").join("160101_M0_0001_A");
        let p1 = run.join("Data/Intensities/BaseCalls/Unaligned/Project_Dup");
        let p2 = run.join("Data/Intensities/BaseCalls/Unaligned2/Project_Dup");
        fs::create_dir_all(&p1).expect("mkdir");
        fs::create_dir_all(&p2).expect("mkdir");
        fs::create_dir_all(run.join("Thumbnail_Images/L001")).expect("mkdir");
        fs::write(run.join("Thumbnail_Images/L001/a.jpg"), "jpg").expect("write");
        fs::write(run.join("RunInfo.xml"), "<RunInfo/>").expect("write");
        record_file(&p1.join("s1.fastq"), 100);
        record_file(&p2.join("s2.fastq"), 100);

        let arc = tmp.path().join("arc");
        fs::create_dir_all(&arc).expect("mkdir");
        let mut cfg = ArchiverConfig::default();
        cfg.codec = install_fake_codec(tmp.path());
        cfg.archive.tmp_dir = tmp.path().to_path_buf();
        let codec = Codec::from_config(&cfg.codec).expect("codec");

        let mut ctx = RunContext::new(&cfg, &codec, &run, &arc).expect("ctx");
        build_run(&mut ctx).expect("build");

        assert!(arc.join("160101_M0_0001_A_0.tar").is_file());
        assert!(arc.join("160101_M0_0001_A_1_Project_Dup.tar").is_file());
        assert!(arc.join("160101_M0_0001_A_2_Project_Dup.tar").is_file());
        assert_eq!(ctx.stats.containers, 3);
        assert_eq!(ctx.stats.surrogates, 2);

        let top = MemberIndex::load(&arc.join("160101_M0_0001_A_0.tar")).expect("index");
        assert!(top.get("160101_M0_0001_A/RunInfo.xml").is_some());
        assert!(top.names().iter().all(|n| !n.contains("Thumbnail_Images")));
        assert!(top.names().iter().all(|n| !n.contains("Project_Dup")));

        let child =
            MemberIndex::load(&arc.join("160101_M0_0001_A_1_Project_Dup.tar")).expect("index");
        let unaligned = "160101_M0_0001_A/Data/Intensities/BaseCalls/Unaligned";
        assert!(child.get(&format!("{unaligned}/Project_Dup/s1.fastq.qp")).is_some());
    }

    #[test]
    fn dry_run_writes_nothing() {
        let tmp = tempdir().expect("tempdir");
        let run = tmp.path().join("160101_M0_0002_B");
        fs::create_dir_all(&run).expect("mkdir");
        record_file(&run.join("s_1_sequence.txt"), 10);
        fs::write(run.join("SampleSheet.csv"), "lane,sample").expect("write");

        let arc = tmp.path().join("arc");
        let mut cfg = ArchiverConfig::default();
        cfg.codec = install_fake_codec(tmp.path());
        cfg.archive.dry_run = true;
        let codec = Codec::from_config(&cfg.codec).expect("codec");

        let mut ctx = RunContext::new(&cfg, &codec, &run, &arc).expect("ctx");
        build_run(&mut ctx).expect("build");
        assert!(!arc.exists());
        assert_eq!(ctx.stats.containers, 1);
        assert_eq!(ctx.stats.files, 2);
    }
}
