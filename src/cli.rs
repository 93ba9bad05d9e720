use anyhow::{Result, anyhow};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::archiver::run::RunSelection;
use crate::commands::archive::{self, ArchiveOptions};
use crate::commands::clean::{self, CleanOptions};
use crate::commands::restore::{self, RestoreOptions, RestoreSource};
use crate::commands::status::{self, StatusOptions};
use crate::commands::{CommandReport, ConfigOverrides};
use crate::env_loader;
use crate::logging;

#[derive(Debug, Parser)]
#[command(
    name = "seq-archive",
    version,
    about = "Archive, validate, restore and clean sequencer run directories"
)]
struct Cli {
    /// Debug-level output on stderr.
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Print the command report as JSON.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Archive runs into validated tar containers.
    Archive(ArchiveArgs),
    /// Unpack containers, expanding surrogates back to FASTQ.
    Restore(RestoreArgs),
    /// Remove image and per-lane intensity directories from old runs.
    Clean(CleanArgs),
    /// Report the lifecycle state of runs.
    Status(StatusArgs),
}

#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
struct RunSelectArgs {
    /// A single run directory.
    #[arg(short = 'r', long)]
    rundir: Option<PathBuf>,
    /// File listing run directories, one per line.
    #[arg(short = 'i', long)]
    infile: Option<PathBuf>,
    /// Every dated run under the configured run roots.
    #[arg(long)]
    automatic: bool,
}

impl RunSelectArgs {
    fn selection(&self) -> RunSelection {
        match (&self.rundir, &self.infile) {
            (Some(dir), _) => RunSelection::Dir(dir.clone()),
            (None, Some(list)) => RunSelection::List(list.clone()),
            (None, None) => RunSelection::Automatic,
        }
    }
}

#[derive(Debug, Args)]
struct ArchiveArgs {
    #[command(flatten)]
    select: RunSelectArgs,
    /// Skip runs dated before this YYMMDD (negative: days ago).
    #[arg(long, allow_hyphen_values = true)]
    cuton: Option<String>,
    /// Skip runs dated after this YYMMDD (negative: days ago).
    #[arg(long, allow_hyphen_values = true)]
    cutoff: Option<String>,
    #[arg(short = 'n', long)]
    dry_run: bool,
    /// Overwrite existing containers and completion markers.
    #[arg(short, long)]
    force: bool,
    #[arg(long)]
    no_validate: bool,
    /// Keep project directories inside the run container.
    #[arg(long)]
    no_project_tars: bool,
    #[arg(long)]
    tmpdir: Option<PathBuf>,
    /// Archive top directory.
    #[arg(short, long)]
    arcdir: Option<PathBuf>,
    /// Bytes compared per member during validation.
    #[arg(long)]
    sample_len: Option<usize>,
    #[arg(long)]
    max_threads: Option<usize>,
    /// Budget for the summed estimated cost of running compressions, in bytes.
    #[arg(long)]
    max_cost: Option<u64>,
}

#[derive(Debug, Args)]
#[group(id = "restore_source", required = true, multiple = false)]
struct RestoreSourceArgs {
    #[arg(short, long)]
    tarfile: Option<PathBuf>,
    /// File listing containers, one per line.
    #[arg(short, long)]
    list: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct RestoreArgs {
    #[command(flatten)]
    source: RestoreSourceArgs,
    #[arg(short, long, default_value = ".")]
    dest: PathBuf,
    #[arg(long)]
    max_threads: Option<usize>,
}

#[derive(Debug, Args)]
struct CleanArgs {
    #[command(flatten)]
    select: RunSelectArgs,
    /// Runs dated after this YYMMDD are left alone (negative: days ago).
    #[arg(long, default_value = "-45", allow_hyphen_values = true)]
    cutoff: String,
    #[arg(short = 'n', long)]
    dry_run: bool,
    /// Skip counting files before deleting.
    #[arg(long)]
    no_count: bool,
    #[arg(long)]
    max_threads: Option<usize>,
}

#[derive(Debug, Args)]
struct StatusArgs {
    #[command(flatten)]
    select: RunSelectArgs,
    #[arg(long, allow_hyphen_values = true)]
    cuton: Option<String>,
    #[arg(long, allow_hyphen_values = true)]
    cutoff: Option<String>,
    #[arg(short, long)]
    arcdir: Option<PathBuf>,
}

fn print_report(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!("{}: {}", report.command, if report.ok { "ok" } else { "issues" });
    for detail in &report.details {
        println!("  {detail}");
    }
    for issue in &report.issues {
        println!("  issue: {issue}");
    }
    Ok(())
}

fn dispatch(command: Command) -> Result<CommandReport> {
    match command {
        Command::Archive(args) => archive::run(&ArchiveOptions {
            selection: args.select.selection(),
            cuton: args.cuton,
            cutoff: args.cutoff,
            dry_run: args.dry_run,
            force: args.force,
            no_validate: args.no_validate,
            no_project_tars: args.no_project_tars,
            sample_len: args.sample_len,
            overrides: ConfigOverrides {
                max_threads: args.max_threads,
                max_cost: args.max_cost,
                tmp_dir: args.tmpdir,
                archive_top: args.arcdir,
            },
        }),
        Command::Restore(args) => restore::run(&RestoreOptions {
            source: match (args.source.tarfile, args.source.list) {
                (Some(tar), _) => RestoreSource::Container(tar),
                (None, Some(list)) => RestoreSource::List(list),
                (None, None) => return Err(anyhow!("specify --tarfile or --list")),
            },
            dest: args.dest,
            overrides: ConfigOverrides {
                max_threads: args.max_threads,
                ..ConfigOverrides::default()
            },
        }),
        Command::Clean(args) => clean::run(&CleanOptions {
            selection: args.select.selection(),
            cutoff: args.cutoff,
            dry_run: args.dry_run,
            no_count: args.no_count,
            overrides: ConfigOverrides {
                max_threads: args.max_threads,
                ..ConfigOverrides::default()
            },
        }),
        Command::Status(args) => status::run(&StatusOptions {
            selection: args.select.selection(),
            cuton: args.cuton,
            cutoff: args.cutoff,
            overrides: ConfigOverrides {
                archive_top: args.arcdir,
                ..ConfigOverrides::default()
            },
        }),
    }
}

pub fn run(dotenv: Option<&Path>) -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;
    env_loader::report_dotenv(dotenv);
    env_loader::warn_unknown_env_keys();

    let json = cli.json;
    let report = dispatch(cli.command)?;
    print_report(&report, json)?;
    if !report.ok {
        return Err(anyhow!(
            "{} finished with {} issue(s)",
            report.command,
            report.issues.len()
        ));
    }
    Ok(())
}
