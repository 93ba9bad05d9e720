//! `.env` discovery and the startup check for misspelled `SEQ_ARCHIVE_*` keys.

use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

include!(concat!(env!("OUT_DIR"), "/seq_archive_env_allowlist.rs"));

const DOTENV: &str = ".env";

/// Places a `.env` may live, most specific first: the working directory,
/// `SEQ_ARCHIVE_HOME`, then the per-user config directory.
fn dotenv_candidates(
    cwd: Option<PathBuf>,
    archive_home: Option<PathBuf>,
    config_dir: Option<PathBuf>,
) -> Vec<PathBuf> {
    [
        cwd.map(|dir| dir.join(DOTENV)),
        archive_home.map(|dir| dir.join(DOTENV)),
        config_dir.map(|dir| dir.join("seq-archive").join(DOTENV)),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// Load the first `.env` that exists. Variables already set win over the file.
pub fn load_dotenv() -> Option<PathBuf> {
    let candidates = dotenv_candidates(
        env::current_dir().ok(),
        env::var_os("SEQ_ARCHIVE_HOME").map(PathBuf::from),
        dirs::config_dir(),
    );
    let path = candidates.into_iter().find(|path| path.is_file())?;
    dotenvy::from_path(&path).ok()?;
    Some(path)
}

pub fn report_dotenv(loaded: Option<&Path>) {
    match loaded {
        Some(path) => debug!(path = %path.display(), "loaded environment file"),
        None => debug!("no environment file found"),
    }
}

fn unknown_keys<I>(keys: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut out: Vec<String> = keys
        .into_iter()
        .filter(|key| key.starts_with("SEQ_ARCHIVE_"))
        .filter(|key| !GENERATED_SEQ_ARCHIVE_ENV_ALLOWLIST.contains(&key.as_str()))
        .collect();
    out.sort();
    out
}

/// Typos in `SEQ_ARCHIVE_*` variables are otherwise silently ignored.
pub fn warn_unknown_env_keys() {
    for key in unknown_keys(env::vars().map(|(k, _)| k)) {
        warn!(key = %key, "unknown SEQ_ARCHIVE_* environment variable ignored");
    }
}
