//! Tracing setup: a filtered stderr layer plus a file layer that follows
//! whichever run log is currently attached.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

static RUN_LOG: Mutex<Option<File>> = Mutex::new(None);

fn run_log() -> MutexGuard<'static, Option<File>> {
    match RUN_LOG.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Writer handed to the file layer; drops records while no run is attached.
struct RunLogSink;

impl Write for RunLogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match run_log().as_mut() {
            Some(file) => file.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match run_log().as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

fn build_env_filter(verbose: bool) -> EnvFilter {
    let default = if verbose { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

pub fn init(verbose: bool) -> Result<()> {
    let stderr_layer = fmt::layer()
        .with_target(false)
        .with_writer(io::stderr)
        .with_filter(build_env_filter(verbose));
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(|| RunLogSink)
        .with_filter(LevelFilter::DEBUG);

    let subscriber = Registry::default().with(stderr_layer).with(file_layer);
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to install global tracing subscriber")?;
    Ok(())
}

/// Keeps a run log attached; detaches on drop.
#[derive(Debug)]
pub struct RunLogGuard {
    path: PathBuf,
}

impl Drop for RunLogGuard {
    fn drop(&mut self) {
        if let Some(mut file) = run_log().take() {
            let _ = file.flush();
        }
        tracing::debug!(log = %self.path.display(), "run log detached");
    }
}

/// Route debug-level output into `path` (appended) until the guard drops.
pub fn attach_run_log(path: &Path) -> Result<RunLogGuard> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open run log {}", path.display()))?;
    writeln!(
        file,
        "--- attempt started {} ---",
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    )?;
    *run_log() = Some(file);
    Ok(RunLogGuard {
        path: path.to_path_buf(),
    })
}
