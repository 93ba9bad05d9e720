//! Path classification rules for sequencer run trees.
//!
//! Directories are pruned, peeled off as child projects, or descended into.
//! Files are dropped, kept verbatim, or queued for compression. Legacy export
//! files and raw reads are deduplicated purely by name, through the literal
//! suffix rewrites in [`EXPORT_EQUIVALENTS`] and [`RAW_READ_SURROGATES`].

use regex::Regex;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Suffix carried by every compressed-surrogate member.
pub const SURROGATE_SUFFIX: &str = ".qp";

const IGNORED_DIRS: &[&str] = &[
    r"Aligned\S*$",
    r"oDiag$",
    r"Calibration\S*$",
    r"EventScripts$",
    r"Images$",
    r"InterOp$",
    r"Logs$",
    r"PeriodicSaveRates$",
    r"Processed$",
    r"Queued$",
    r"ReadPrep1$",
    r"ReadPrep2$",
    r"Recipe$",
    r"Temp$",
    r"Thumbnail_Images$",
    r"DataRTALogs$",
    r"Data/TileStatus$",
    r"Data/Intensities/L\d*$",
    r"Data/Intensities/Offsets$",
    r"Data/Intensities/BaseCalls/L\d*$",
    r"GERALD\S*/CASAVA\S*$",
    r"GERALD\S*/Temp$",
    r"Matrix$",
    r"Phasing$",
    r"Plots$",
    r"Stats$",
    r"SignalMeans$",
    r"L00\d$",
];

const GARBAGE_FILES: &[&str] = &[r"s_+.+_anomaly\.txt$", r"s_+.+_reanomraw\.txt$"];

const RAW_READ_FILES: &[&str] = &[
    r"\.fastq\.txt\.gz$",
    r"\.fastq$",
    r"\.fastq\.gz$",
    r"\.fq$",
    r"_sequence\.txt\.gz$",
];

const LEGACY_EXPORT_FILES: &[&str] = &[r"s_\d_.*export\.txt\.gz$", r"s_\d_.*export\.txt$"];

const PROJECT_DIR: &str = r"Unaligned\S*/Project_[\w\-]+$";

/// A literal suffix substitution: a name ending in `from` corresponds to the
/// same name with that suffix replaced by `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuffixRewrite {
    pub from: &'static str,
    pub to: &'static str,
}

const fn rewrite(from: &'static str, to: &'static str) -> SuffixRewrite {
    SuffixRewrite { from, to }
}

impl SuffixRewrite {
    pub fn apply(&self, name: &str) -> Option<String> {
        name.strip_suffix(self.from)
            .map(|stem| format!("{stem}{}", self.to))
    }
}

/// Names a legacy export may also exist under, as raw reads or surrogates.
pub const EXPORT_EQUIVALENTS: &[SuffixRewrite] = &[
    rewrite("export.txt.gz", "sequence.txt.gz"),
    rewrite("export.txt", "sequence.txt"),
    rewrite("export.txt.gz", "fastq.qp"),
    rewrite("export.txt.gz", "sequence.txt.qp"),
    rewrite("export.txt", "sequence.txt.qp"),
];

/// Surrogate names that make compressing a raw-read file redundant.
pub const RAW_READ_SURROGATES: &[SuffixRewrite] = &[
    rewrite("_sequence.txt.gz", ".fastq.qp"),
    rewrite("sequence.txt.gz", "fastq.qp"),
    rewrite("fastq.gz", "fastq.qp"),
];

struct Patterns {
    ignored_dirs: Regex,
    project_dir: Regex,
    garbage: Regex,
    raw_reads: Regex,
    legacy_exports: Regex,
    surrogate: Regex,
}

fn alternation(parts: &[&str]) -> Regex {
    Regex::new(&parts.join("|")).expect("static classifier pattern")
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        ignored_dirs: alternation(IGNORED_DIRS),
        project_dir: alternation(&[PROJECT_DIR]),
        garbage: alternation(GARBAGE_FILES),
        raw_reads: alternation(RAW_READ_FILES),
        legacy_exports: alternation(LEGACY_EXPORT_FILES),
        surrogate: alternation(&[r"\.qp$"]),
    })
}

/// Name a surrogate member takes: trailing `.gz` stripped, `.qp` appended.
pub fn surrogate_name(name: &str) -> String {
    let stem = name.strip_suffix(".gz").unwrap_or(name);
    format!("{stem}{SURROGATE_SUFFIX}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirClass {
    /// Pruned together with everything beneath it.
    Ignore,
    /// Archived as its own unit.
    ChildProject,
    Descend,
}

/// Classify a directory by its path relative to the run's parent directory,
/// e.g. `161007_K00162_0117_AHFT32BBXX/Data/Intensities/L001`.
pub fn classify_dir(rel_path: &str, project_containers: bool) -> DirClass {
    let p = patterns();
    if p.ignored_dirs.is_match(rel_path) {
        return DirClass::Ignore;
    }
    if project_containers && p.project_dir.is_match(rel_path) {
        return DirClass::ChildProject;
    }
    DirClass::Descend
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub is_symlink: bool,
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    /// Stored as-is, in listing order.
    pub add: Vec<String>,
    /// Raw reads to be turned into surrogates.
    pub compress: Vec<String>,
    /// Garbage and superseded names.
    pub dropped: Vec<String>,
}

fn any_equivalent(name: &str, rules: &[SuffixRewrite], present: &BTreeSet<&str>) -> bool {
    rules
        .iter()
        .filter_map(|rule| rule.apply(name))
        .any(|candidate| present.contains(candidate.as_str()))
}

/// Partition one directory's file listing. `small_file_floor` is the size
/// below which raw reads are kept verbatim instead of compressed.
pub fn classify_entries(entries: &[FileEntry], small_file_floor: u64) -> Classification {
    let p = patterns();
    let mut out = Classification::default();
    let mut surrogates = BTreeSet::new();
    let mut raw_reads = BTreeSet::new();
    let mut candidates = Vec::new();
    let mut exports = Vec::new();

    for entry in entries {
        let name = entry.name.as_str();
        if entry.is_symlink {
            out.add.push(entry.name.clone());
            continue;
        }
        if p.garbage.is_match(name) {
            debug!(file = name, "skipping garbage file");
            out.dropped.push(entry.name.clone());
        } else if p.surrogate.is_match(name) {
            surrogates.insert(name);
            out.add.push(entry.name.clone());
        } else if p.raw_reads.is_match(name) {
            raw_reads.insert(name);
            if entry.size < small_file_floor {
                debug!(file = name, size = entry.size, "small raw read, storing as-is");
                out.add.push(entry.name.clone());
            } else {
                candidates.push(name);
            }
        } else if p.legacy_exports.is_match(name) {
            exports.push(name);
        } else {
            out.add.push(entry.name.clone());
        }
    }

    for export in exports {
        let superseded = any_equivalent(export, EXPORT_EQUIVALENTS, &raw_reads)
            || any_equivalent(export, EXPORT_EQUIVALENTS, &surrogates);
        if superseded {
            debug!(file = export, "skipping legacy export, equivalent reads found");
            out.dropped.push(export.to_string());
        } else {
            debug!(file = export, "keeping legacy export, no reads or surrogate found");
            out.add.push(export.to_string());
        }
    }

    for raw in candidates {
        let superseded = any_equivalent(raw, RAW_READ_SURROGATES, &surrogates)
            || surrogates.contains(surrogate_name(raw).as_str());
        if superseded {
            debug!(file = raw, "skipping raw read, surrogate found");
            out.dropped.push(raw.to_string());
        } else {
            out.compress.push(raw.to_string());
        }
    }

    out
}

/// Stat every name in `dir` (without following links) and classify them.
/// Names that cannot be statted are classified as empty regular files.
pub fn classify_files(dir: &Path, names: &[String], small_file_floor: u64) -> Classification {
    let entries = names
        .iter()
        .map(|name| {
            let path = dir.join(name);
            match fs::symlink_metadata(&path) {
                Ok(meta) => FileEntry {
                    name: name.clone(),
                    is_symlink: meta.file_type().is_symlink(),
                    size: meta.len(),
                },
                Err(err) => {
                    warn!(path = %path.display(), %err, "failed to stat file, keeping it");
                    FileEntry {
                        name: name.clone(),
                        is_symlink: false,
                        size: 0,
                    }
                }
            }
        })
        .collect::<Vec<_>>();
    classify_entries(&entries, small_file_floor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, size: u64) -> FileEntry {
        FileEntry {
            name: name.to_string(),
            is_symlink: false,
            size,
        }
    }

    fn link(name: &str) -> FileEntry {
        FileEntry {
            name: name.to_string(),
            is_symlink: true,
            size: 0,
        }
    }

    #[test]
    fn transient_directories_are_pruned() {
        let run = "161007_K00162_0117_AHFT32BBXX";
        for rel in [
            "Thumbnail_Images",
            "Data/Intensities/L001",
            "Data/Intensities/BaseCalls/L008",
            "Data/TileStatus",
            "InterOp",
            "Logs",
            "GERALD_01-02-2011/CASAVA_v1.7",
            "Aligned_1",
        ] {
            let path = format!("{run}/{rel}");
            assert_eq!(classify_dir(&path, true), DirClass::Ignore, "{path}");
        }
        assert_eq!(
            classify_dir(&format!("{run}/Data/Intensities/BaseCalls"), true),
            DirClass::Descend
        );
    }

    #[test]
    fn project_dirs_become_child_units_only_when_enabled() {
        let path = "161007_K00162_0117_AHFT32BBXX/Unaligned_L1/Project_Ccc7";
        assert_eq!(classify_dir(path, true), DirClass::ChildProject);
        assert_eq!(classify_dir(path, false), DirClass::Descend);
        assert_eq!(
            classify_dir("161007_K00162_0117_AHFT32BBXX/Unaligned/Project_Rdb9-x", true),
            DirClass::ChildProject
        );
        assert_eq!(
            classify_dir("161007_K00162_0117_AHFT32BBXX/Project_Loose", true),
            DirClass::Descend
        );
    }

    #[test]
    fn symlinks_are_kept_before_any_other_rule() {
        let out = classify_entries(&[link("s_1_anomaly.txt"), link("big.fastq.gz")], 1000);
        assert_eq!(out.add, vec!["s_1_anomaly.txt", "big.fastq.gz"]);
        assert!(out.compress.is_empty());
    }

    #[test]
    fn garbage_is_dropped() {
        let out = classify_entries(
            &[file("s_1_1_anomaly.txt", 10), file("s_2_reanomraw.txt", 10)],
            1000,
        );
        assert!(out.add.is_empty());
        assert_eq!(out.dropped.len(), 2);
    }

    #[test]
    fn small_raw_reads_are_stored_verbatim() {
        let out = classify_entries(&[file("A_L001_R1_001.fastq.gz", 999)], 1000);
        assert_eq!(out.add, vec!["A_L001_R1_001.fastq.gz"]);
        assert!(out.compress.is_empty());
    }

    #[test]
    fn large_raw_reads_are_compressed() {
        let out = classify_entries(
            &[
                file("A_L001_R1_001.fastq.gz", 5000),
                file("s_1_1_sequence.txt.gz", 5000),
                file("reads.fq", 5000),
                file("RunInfo.xml", 5000),
            ],
            1000,
        );
        assert_eq!(
            out.compress,
            vec!["A_L001_R1_001.fastq.gz", "s_1_1_sequence.txt.gz", "reads.fq"]
        );
        assert_eq!(out.add, vec!["RunInfo.xml"]);
    }

    #[test]
    fn raw_read_superseded_by_surrogate() {
        let out = classify_entries(
            &[file("X_sequence.txt.gz", 5000), file("X.fastq.qp", 10)],
            1000,
        );
        assert_eq!(out.add, vec!["X.fastq.qp"]);
        assert!(out.compress.is_empty());
        assert_eq!(out.dropped, vec!["X_sequence.txt.gz"]);
    }

    #[test]
    fn raw_read_superseded_by_own_surrogate_name() {
        let out = classify_entries(&[file("A.fastq.gz", 5000), file("A.fastq.qp", 10)], 1000);
        assert!(out.compress.is_empty());
        assert_eq!(out.dropped, vec!["A.fastq.gz"]);
    }

    #[test]
    fn lone_export_is_kept_verbatim() {
        let out = classify_entries(&[file("s_1_1_export.txt.gz", 50_000)], 1000);
        assert_eq!(out.add, vec!["s_1_1_export.txt.gz"]);
        assert!(out.compress.is_empty());
    }

    #[test]
    fn export_dropped_when_raw_reads_exist() {
        let out = classify_entries(
            &[file("s_1_1_export.txt.gz", 50_000), file("s_1_1_sequence.txt.gz", 50_000)],
            1000,
        );
        assert!(!out.add.contains(&"s_1_1_export.txt.gz".to_string()));
        assert_eq!(out.compress, vec!["s_1_1_sequence.txt.gz"]);
    }

    #[test]
    fn export_dropped_when_surrogate_exists() {
        let out = classify_entries(
            &[file("s_2_export.txt.gz", 50_000), file("s_2_fastq.qp", 10)],
            1000,
        );
        assert_eq!(out.add, vec!["s_2_fastq.qp"]);
        assert_eq!(out.dropped, vec!["s_2_export.txt.gz"]);
    }

    #[test]
    fn suffix_rewrites_only_touch_the_suffix() {
        let rule = SuffixRewrite {
            from: "export.txt.gz",
            to: "sequence.txt.gz",
        };
        assert_eq!(
            rule.apply("s_1_export_export.txt.gz").as_deref(),
            Some("s_1_export_sequence.txt.gz")
        );
        assert_eq!(rule.apply("s_1_export.txt"), None);
    }

    #[test]
    fn surrogate_naming_strips_gzip_suffix() {
        assert_eq!(surrogate_name("A.fastq.gz"), "A.fastq.qp");
        assert_eq!(surrogate_name("reads.fq"), "reads.fq.qp");
        assert_eq!(surrogate_name("s_1_sequence.txt.gz"), "s_1_sequence.txt.qp");
    }
}
