use anyhow::Result;
use chrono::Local;

use crate::archiver::clean::{self, CleanOutcome, CleanStats};
use crate::archiver::run::{self, CutWindow, RunSelection};
use crate::commands::{CommandReport, ConfigOverrides, load_with_overrides};

#[derive(Debug, Clone)]
pub struct CleanOptions {
    pub selection: RunSelection,
    pub cutoff: String,
    pub dry_run: bool,
    pub no_count: bool,
    pub overrides: ConfigOverrides,
}

pub fn run(opts: &CleanOptions) -> Result<CommandReport> {
    let mut cfg = load_with_overrides(&opts.overrides)?;
    if opts.no_count {
        cfg.clean.count_files = false;
    }
    let mut report = CommandReport::new("clean");

    let window = CutWindow::resolve(None, Some(opts.cutoff.as_str()))?;
    if let Some(cutoff) = &window.cutoff {
        clean::check_cutoff(cutoff, Local::now().date_naive(), cfg.clean.min_age_days)?;
        report.detail(format!("cutoff={cutoff}"));
    }
    let runs = run::select_runs(&opts.selection, &cfg.discovery.run_roots, &window)?;
    if opts.dry_run {
        report.detail("dry-run: nothing removed");
    }

    let mut totals = CleanStats::default();
    for (run_dir, outcome) in clean::clean_runs(&cfg, &runs, opts.dry_run)? {
        match outcome {
            CleanOutcome::Cleaned(stats) => {
                totals.combine(&stats);
                report.detail(format!(
                    "run={} cleaned files={} bytes={}",
                    run_dir.display(),
                    stats.files,
                    stats.bytes
                ));
            }
            CleanOutcome::Skipped(reason) => {
                report.detail(format!("run={} skipped: {reason}", run_dir.display()));
            }
            CleanOutcome::Failed(err) => {
                report.issue(format!("run={} clean failed: {err}", run_dir.display()));
            }
        }
    }
    report.detail(format!(
        "total runs={} files={} bytes={}",
        totals.runs, totals.files, totals.bytes
    ));
    Ok(report)
}
