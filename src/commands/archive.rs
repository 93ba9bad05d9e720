use anyhow::{Context, Result};
use tracing::info;

use crate::archiver::codec::Codec;
use crate::archiver::run::{self, CutWindow, RunOutcome, RunSelection, RunStats};
use crate::commands::{CommandReport, ConfigOverrides, load_with_overrides};

const AUTOMATIC_CUTON: &str = "-180";
const AUTOMATIC_CUTOFF: &str = "-60";

#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    pub selection: RunSelection,
    pub cuton: Option<String>,
    pub cutoff: Option<String>,
    pub dry_run: bool,
    pub force: bool,
    pub no_validate: bool,
    pub no_project_tars: bool,
    pub sample_len: Option<usize>,
    pub overrides: ConfigOverrides,
}

pub fn run(opts: &ArchiveOptions) -> Result<CommandReport> {
    let mut cfg = load_with_overrides(&opts.overrides)?;
    cfg.archive.dry_run = opts.dry_run;
    cfg.archive.force = opts.force;
    if opts.no_validate {
        cfg.archive.validate = false;
    }
    if opts.no_project_tars {
        cfg.archive.project_containers = false;
    }
    if let Some(n) = opts.sample_len {
        cfg.archive.sample_len = n;
    }
    crate::archiver::config::validate(&cfg)?;

    let mut report = CommandReport::new("archive");
    let (cuton, cutoff) = match opts.selection {
        RunSelection::Automatic => (
            Some(opts.cuton.as_deref().unwrap_or(AUTOMATIC_CUTON)),
            Some(opts.cutoff.as_deref().unwrap_or(AUTOMATIC_CUTOFF)),
        ),
        _ => (opts.cuton.as_deref(), opts.cutoff.as_deref()),
    };
    let window = CutWindow::resolve(cuton, cutoff)?;
    let runs = run::select_runs(&opts.selection, &cfg.discovery.run_roots, &window)?;
    let codec = Codec::from_config(&cfg.codec)?;

    report.detail(format!("archive_top={}", cfg.archive.archive_top.display()));
    report.detail(format!("codec={}", codec.program().display()));
    if opts.dry_run {
        report.detail("dry-run: no containers or markers written");
    }
    info!(runs = runs.len(), "going to archive runs");

    let mut totals = RunStats::default();
    for run_dir in &runs {
        let outcome = run::archive_run(&cfg, &codec, run_dir)
            .with_context(|| format!("failed to archive {}", run_dir.display()))?;
        totals.combine(&outcome.stats());
        match &outcome {
            RunOutcome::Skipped { run, reason } => {
                report.detail(format!("run={run} skipped: {reason}"));
            }
            RunOutcome::Archived(summary) | RunOutcome::DryRun(summary) => {
                report.detail(format!(
                    "run={} arc_dir={} {} secs={:.1}",
                    summary.run,
                    summary.arc_dir.display(),
                    summary.stats.summary(),
                    summary.secs
                ));
            }
        }
    }
    report.detail(format!("runs={} total: {}", runs.len(), totals.summary()));
    Ok(report)
}
