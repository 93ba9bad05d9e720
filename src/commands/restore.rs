use anyhow::Result;
use std::path::PathBuf;
use tracing::info;

use crate::archiver::codec::Codec;
use crate::archiver::restore::{self, RestoreStats};
use crate::commands::{CommandReport, ConfigOverrides, load_with_overrides};

#[derive(Debug, Clone)]
pub enum RestoreSource {
    Container(PathBuf),
    List(PathBuf),
}

#[derive(Debug, Clone)]
pub struct RestoreOptions {
    pub source: RestoreSource,
    pub dest: PathBuf,
    pub overrides: ConfigOverrides,
}

pub fn run(opts: &RestoreOptions) -> Result<CommandReport> {
    let cfg = load_with_overrides(&opts.overrides)?;
    let codec = Codec::from_config(&cfg.codec)?;
    let mut report = CommandReport::new("restore");

    let containers = match &opts.source {
        RestoreSource::Container(path) => vec![path.clone()],
        RestoreSource::List(list) => restore::read_container_list(list)?,
    };
    report.detail(format!("dest={}", opts.dest.display()));

    let mut totals = RestoreStats::default();
    for container in &containers {
        let stats = restore::restore_container(
            container,
            &opts.dest,
            &codec,
            cfg.archive.max_concurrency,
        )?;
        report.detail(format!(
            "container={} extracted={} decompressed={}",
            container.display(),
            stats.extracted,
            stats.decompressed
        ));
        totals.combine(&stats);
    }
    info!(
        containers = totals.containers,
        bytes = totals.bytes,
        "restore finished"
    );
    report.detail(format!(
        "containers={} extracted={} decompressed={} bytes={}",
        totals.containers, totals.extracted, totals.decompressed, totals.bytes
    ));
    Ok(report)
}
