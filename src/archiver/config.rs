use crate::error::ArchiveError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveSettings {
    pub archive_top: PathBuf,
    pub tmp_dir: PathBuf,
    /// Bytes compared per member during validation.
    pub sample_len: usize,
    pub max_concurrency: usize,
    /// Upper bound on the summed estimated cost of running compression jobs.
    pub max_aggregate_cost: u64,
    /// Raw-read files smaller than this are stored as-is.
    pub small_file_floor: u64,
    pub project_containers: bool,
    pub validate: bool,
    #[serde(skip)]
    pub force: bool,
    #[serde(skip)]
    pub dry_run: bool,
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            archive_top: PathBuf::from("/SAY/archive/YCGA-729009-YCGA/archive"),
            tmp_dir: env::temp_dir(),
            sample_len: 10_000,
            max_concurrency: 20,
            max_aggregate_cost: 32_000_000_000,
            small_file_floor: 1000,
            project_containers: true,
            validate: true,
            force: false,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    pub program: PathBuf,
    pub compress_args: Vec<String>,
    pub decompress_args: Vec<String>,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("quip"),
            compress_args: vec!["-c".to_string()],
            decompress_args: vec![
                "-d".to_string(),
                "-c".to_string(),
                "-o".to_string(),
                "fastq".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Directories whose `YYMMDD*` children are runs (used by `--automatic`).
    pub run_roots: Vec<PathBuf>,
    /// Path fragments marking where the archive-relative part of a run path begins.
    pub path_anchors: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            run_roots: Vec::new(),
            path_anchors: vec![
                "/panfs/sequencers".to_string(),
                "/ycga-ba/ba_sequencers".to_string(),
                "/ycga-gpfs/sequencers/illumina".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanConfig {
    pub min_age_days: i64,
    pub count_files: bool,
}

impl Default for CleanConfig {
    fn default() -> Self {
        Self {
            min_age_days: 45,
            count_files: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ArchiverConfig {
    pub archive: ArchiveSettings,
    pub codec: CodecConfig,
    pub discovery: DiscoveryConfig,
    pub clean: CleanConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialArchiverConfig {
    archive: Option<ArchiveSettings>,
    codec: Option<CodecConfig>,
    discovery: Option<DiscoveryConfig>,
    clean: Option<CleanConfig>,
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_usize(var: &str, fallback: usize) -> usize {
    match env::var(var) {
        Ok(v) => v.trim().parse::<usize>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_bool(var: &str, fallback: bool) -> bool {
    match env::var(var) {
        Ok(v) => {
            let trimmed = v.trim();
            match trimmed {
                "1" | "true" | "TRUE" | "yes" | "on" => true,
                "0" | "false" | "FALSE" | "no" | "off" => false,
                _ => fallback,
            }
        }
        Err(_) => fallback,
    }
}

fn env_or_path(var: &str, fallback: &PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback.clone(),
    }
}

fn env_or_csv_paths(var: &str, fallback: &[PathBuf]) -> Vec<PathBuf> {
    match env::var(var) {
        Ok(v) => {
            let out = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect::<Vec<_>>();
            if out.is_empty() {
                fallback.to_vec()
            } else {
                out
            }
        }
        Err(_) => fallback.to_vec(),
    }
}

pub fn validate(cfg: &ArchiverConfig) -> Result<()> {
    let a = &cfg.archive;
    if a.max_concurrency == 0 {
        return Err(ArchiveError::config("invalid max threads: must be >= 1").into());
    }
    if a.max_aggregate_cost == 0 {
        return Err(ArchiveError::config("invalid max cost: must be >= 1 byte").into());
    }
    if a.sample_len == 0 {
        return Err(ArchiveError::config("invalid sample length: must be >= 1 byte").into());
    }
    if a.archive_top.as_os_str().is_empty() {
        return Err(ArchiveError::config("invalid archive top: cannot be empty").into());
    }
    if cfg.codec.program.as_os_str().is_empty() {
        return Err(ArchiveError::config("invalid codec program: cannot be empty").into());
    }
    if cfg.clean.min_age_days < 0 {
        return Err(ArchiveError::config("invalid clean min age: must be >= 0 days").into());
    }
    Ok(())
}

fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(custom) = env::var("SEQ_ARCHIVE_CONFIG") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }

    let base = dirs::config_dir()?;
    Some(base.join("seq-archive").join("config.toml"))
}

fn merge_file_config(base: &mut ArchiverConfig) -> Result<()> {
    let Some(path) = resolve_config_path() else {
        return Ok(());
    };
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(&path)?;
    let parsed: PartialArchiverConfig = toml::from_str(&raw).map_err(|err| {
        ArchiveError::config(format!("failed to parse config {}: {err}", path.display()))
    })?;
    if let Some(archive) = parsed.archive {
        base.archive = archive;
    }
    if let Some(codec) = parsed.codec {
        base.codec = codec;
    }
    if let Some(discovery) = parsed.discovery {
        base.discovery = discovery;
    }
    if let Some(clean) = parsed.clean {
        base.clean = clean;
    }
    Ok(())
}

pub fn load_config() -> Result<ArchiverConfig> {
    let mut cfg = ArchiverConfig::default();
    merge_file_config(&mut cfg)?;

    cfg.archive.archive_top = env_or_path("SEQ_ARCHIVE_TOP", &cfg.archive.archive_top);
    cfg.archive.tmp_dir = env_or_path("SEQ_ARCHIVE_TMPDIR", &cfg.archive.tmp_dir);
    cfg.archive.sample_len = env_or_usize("SEQ_ARCHIVE_SAMPLE_LEN", cfg.archive.sample_len);
    cfg.archive.max_concurrency =
        env_or_usize("SEQ_ARCHIVE_MAX_THREADS", cfg.archive.max_concurrency);
    cfg.archive.max_aggregate_cost =
        env_or_u64("SEQ_ARCHIVE_MAX_COST", cfg.archive.max_aggregate_cost);
    cfg.archive.small_file_floor =
        env_or_u64("SEQ_ARCHIVE_SMALL_FILE_FLOOR", cfg.archive.small_file_floor);
    cfg.archive.project_containers = env_or_bool(
        "SEQ_ARCHIVE_PROJECT_TARS",
        cfg.archive.project_containers,
    );
    cfg.archive.validate = env_or_bool("SEQ_ARCHIVE_VALIDATE", cfg.archive.validate);
    cfg.codec.program = env_or_path("SEQ_ARCHIVE_CODEC", &cfg.codec.program);
    cfg.discovery.run_roots = env_or_csv_paths("SEQ_ARCHIVE_RUN_ROOTS", &cfg.discovery.run_roots);

    validate(&cfg)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = ArchiverConfig::default();
        validate(&cfg).expect("defaults validate");
        assert_eq!(cfg.archive.sample_len, 10_000);
        assert_eq!(cfg.archive.small_file_floor, 1000);
        assert!(cfg.archive.project_containers);
    }

    #[test]
    fn zero_threads_rejected() {
        let mut cfg = ArchiverConfig::default();
        cfg.archive.max_concurrency = 0;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn partial_file_config_overrides_only_named_sections() {
        let raw = r#"
[codec]
program = "/opt/quip/bin/quip"
compress_args = ["-c"]
decompress_args = ["-d", "-c", "-o", "fastq"]
"#;
        let parsed: PartialArchiverConfig = toml::from_str(raw).expect("parse");
        assert!(parsed.archive.is_none());
        let codec = parsed.codec.expect("codec section");
        assert_eq!(codec.program, PathBuf::from("/opt/quip/bin/quip"));
    }
}
