#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Stand-in for the raw-read codec: compression drops the repeated header
/// on each record's third line, decompression is `cat`.
pub const FAKE_CODEC: &str = r#"#!/usr/bin/env bash
set -euo pipefail
if [[ "${1:-}" == "-d" ]]; then
  cat
  exit 0
fi
src="${@: -1}"
if [[ "$(basename "$src")" == fail* ]]; then
  echo "refusing $src" >&2
  exit 3
fi
# slow
if [[ "$src" == *.gz ]]; then
  gzip -dc "$src" | awk 'NR % 4 == 3 { print "+"; next } { print }'
else
  awk 'NR % 4 == 3 { print "+"; next } { print }' "$src"
fi
"#;

pub struct Site {
    pub root: PathBuf,
    pub codec: PathBuf,
    pub top: PathBuf,
    pub tmp: PathBuf,
    pub runs: PathBuf,
}

/// The fake codec, but every successful compression takes `secs` seconds.
pub fn slow_codec(secs: u32) -> String {
    FAKE_CODEC.replace("# slow\n", &format!("sleep {secs}\n"))
}

/// The fake codec, but decompression swaps every `A` base for `T`.
pub fn corrupting_codec() -> String {
    FAKE_CODEC.replace("  cat\n", "  tr A T\n")
}

impl Site {
    pub fn new(root: &Path) -> Self {
        fs::create_dir_all(root.join("bin")).expect("mkdir bin");
        let site = Self {
            root: root.to_path_buf(),
            codec: root.join("bin/fake-quip"),
            top: root.join("archive"),
            tmp: root.join("scratch"),
            runs: root.join("sequencers/runs"),
        };
        fs::create_dir_all(&site.top).expect("mkdir top");
        fs::create_dir_all(&site.tmp).expect("mkdir tmp");
        fs::create_dir_all(&site.runs).expect("mkdir runs");
        site.install_codec(FAKE_CODEC);
        site
    }

    pub fn install_codec(&self, script: &str) {
        fs::write(&self.codec, script).expect("write codec");
        let mut perms = fs::metadata(&self.codec).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&self.codec, perms).expect("chmod");
    }

    pub fn cmd(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("seq-archive");
        cmd.current_dir(&self.root)
            .env("HOME", &self.root)
            .env("SEQ_ARCHIVE_CONFIG", self.root.join("no-config.toml"))
            .env("SEQ_ARCHIVE_TOP", &self.top)
            .env("SEQ_ARCHIVE_TMPDIR", &self.tmp)
            .env("SEQ_ARCHIVE_CODEC", &self.codec)
            .env("SEQ_ARCHIVE_RUN_ROOTS", &self.runs)
            .env_remove("RUST_LOG");
        cmd
    }

    /// Destination directory the archiver derives for `run` when no path
    /// anchor matches: the whole absolute path, links unresolved.
    pub fn arc_dir(&self, run: &Path) -> PathBuf {
        self.top.join(run.strip_prefix("/").expect("absolute run path"))
    }

    pub fn scratch_entries(&self) -> Vec<String> {
        fs::read_dir(&self.tmp)
            .expect("scratch")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().to_string())
            .collect()
    }
}

pub fn fastq(records: usize) -> String {
    (0..records)
        .map(|i| format!("@M01156:172:{i}\nACGTACGTACGTACGT\n+M01156:172:{i}\nIIIIIIIIIIIIIIII\n"))
        .collect()
}

/// A small run in the 1.8 layout with one project and one image directory.
pub fn make_run(site: &Site, name: &str) -> PathBuf {
    make_run_in(&site.runs, name)
}

pub fn make_run_in(parent: &Path, name: &str) -> PathBuf {
    let run = parent.join(name);
    let project = run.join("Data/Intensities/BaseCalls/Unaligned/Project_Smith/Sample_1");
    fs::create_dir_all(&project).expect("mkdir project");
    fs::create_dir_all(run.join("Thumbnail_Images/L001")).expect("mkdir thumbs");
    fs::create_dir_all(run.join("Data/Intensities/L001")).expect("mkdir lane");

    fs::write(run.join("RunInfo.xml"), "<RunInfo Version=\"2\"/>").expect("write runinfo");
    fs::write(run.join("Thumbnail_Images/L001/s_1_1101_a.jpg"), "jpg").expect("write thumb");
    fs::write(run.join("Data/Intensities/L001/s_1_1101.cif"), "cif").expect("write cif");
    fs::write(
        run.join("Data/Intensities/BaseCalls/Unaligned/Undetermined_R1.fastq"),
        fastq(60),
    )
    .expect("write undetermined");
    fs::write(project.join("Sample_1_R1.fastq"), fastq(80)).expect("write reads");
    fs::write(project.join("SampleSheet.csv"), "FCID,Lane,SampleID\n").expect("write sheet");
    run
}
