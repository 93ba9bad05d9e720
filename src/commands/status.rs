use anyhow::Result;

use crate::archiver::lifecycle::RunState;
use crate::archiver::run::{self, CutWindow, RunSelection};
use crate::commands::{CommandReport, ConfigOverrides, load_with_overrides};

#[derive(Debug, Clone)]
pub struct StatusOptions {
    pub selection: RunSelection,
    pub cuton: Option<String>,
    pub cutoff: Option<String>,
    pub overrides: ConfigOverrides,
}

pub fn run(opts: &StatusOptions) -> Result<CommandReport> {
    let cfg = load_with_overrides(&opts.overrides)?;
    let mut report = CommandReport::new("status");

    let window = CutWindow::resolve(opts.cuton.as_deref(), opts.cutoff.as_deref())?;
    let runs = run::select_runs(&opts.selection, &cfg.discovery.run_roots, &window)?;
    for run_dir in &runs {
        let resolved = run::absolute_run_dir(run_dir).unwrap_or_else(|_| run_dir.clone());
        let arc_dir = run::archive_dir_for(
            &resolved,
            &cfg.archive.archive_top,
            &cfg.discovery.path_anchors,
        );
        let state = RunState::detect(&resolved, &arc_dir)?;
        report.detail(format!(
            "run={} state={state} arc_dir={}",
            run_dir.display(),
            arc_dir.display()
        ));
        if state == RunState::Archiving {
            report.issue(format!(
                "run={} has a destination without a completion marker",
                run_dir.display()
            ));
        }
    }
    Ok(report)
}
