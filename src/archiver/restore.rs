use crate::archiver::classify::SURROGATE_SUFFIX;
use crate::archiver::codec::Codec;
use crate::archiver::container::MemberIndex;
use crate::archiver::scheduler::{self, Job, SchedulerLimits};
use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct RestoreStats {
    pub containers: u64,
    pub extracted: u64,
    pub decompressed: u64,
    pub bytes: u64,
}

impl RestoreStats {
    pub fn combine(&mut self, other: &RestoreStats) {
        self.containers += other.containers;
        self.extracted += other.extracted;
        self.decompressed += other.decompressed;
        self.bytes += other.bytes;
    }
}

/// Join a member name onto `dest`, refusing names that would escape it.
fn member_dest(dest: &Path, name: &str) -> Result<PathBuf> {
    let rel = Path::new(name);
    if rel
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        bail!("refusing to restore unsafe member name {name}");
    }
    Ok(dest.join(rel))
}

/// Expands one surrogate member back to FASTQ.
struct DecompressJob {
    index: MemberIndex,
    member: String,
    target: PathBuf,
    codec: Codec,
}

impl Job for DecompressJob {
    type Output = u64;

    fn label(&self) -> String {
        self.member.clone()
    }

    fn estimated_cost(&self) -> u64 {
        0
    }

    fn run(&self) -> Result<u64> {
        if let Some(parent) = self.target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = File::create(&self.target)
            .with_context(|| format!("failed to create {}", self.target.display()))?;
        let mut sink = BufWriter::new(file);
        let written = self
            .codec
            .decompress_into(self.index.open_member(&self.member)?, &mut sink)
            .with_context(|| format!("failed to decompress {}", self.member))?;
        sink.flush()?;
        Ok(written)
    }
}

/// Unpack `container` under `dest`: plain members are extracted directly,
/// surrogates are decompressed to their name without the `.qp` suffix.
pub fn restore_container(
    container: &Path,
    dest: &Path,
    codec: &Codec,
    max_concurrency: usize,
) -> Result<RestoreStats> {
    info!(container = %container.display(), dest = %dest.display(), "restoring");
    fs::create_dir_all(dest).with_context(|| format!("failed to create {}", dest.display()))?;
    let index = MemberIndex::load(container)?;
    debug!(members = index.names().len(), "indexed container");
    let mut stats = RestoreStats {
        containers: 1,
        ..RestoreStats::default()
    };

    let mut jobs = Vec::new();
    let file = File::open(container)
        .with_context(|| format!("failed to open {}", container.display()))?;
    let mut archive = tar::Archive::new(file);
    archive.set_preserve_permissions(true);
    for entry in archive
        .entries()
        .with_context(|| format!("failed to read {}", container.display()))?
    {
        let mut entry = entry?;
        let name = entry.path()?.to_string_lossy().to_string();
        if let Some(plain) = name.strip_suffix(SURROGATE_SUFFIX) {
            jobs.push(DecompressJob {
                index: index.clone(),
                target: member_dest(dest, plain)?,
                member: name,
                codec: codec.clone(),
            });
            continue;
        }
        debug!(member = %name, "extracting");
        stats.bytes += entry.header().size().unwrap_or(0);
        entry
            .unpack_in(dest)
            .with_context(|| format!("failed to extract {name}"))?;
        stats.extracted += 1;
    }

    info!(surrogates = jobs.len(), "decompressing surrogates");
    let limits = SchedulerLimits {
        max_concurrency,
        max_aggregate_cost: u64::MAX,
    };
    scheduler::run_fifo(jobs, limits, |job, written| {
        debug!(member = %job.member, bytes = written, "restored");
        stats.decompressed += 1;
        stats.bytes += written;
        Ok(())
    })?;
    Ok(stats)
}

/// One container path per line.
pub fn read_container_list(path: &Path) -> Result<Vec<PathBuf>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read container list {}", path.display()))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(PathBuf::from)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_dest_rejects_escapes() {
        let dest = Path::new("/restore");
        assert_eq!(
            member_dest(dest, "run/a.fastq").expect("safe"),
            PathBuf::from("/restore/run/a.fastq")
        );
        assert!(member_dest(dest, "../etc/passwd").is_err());
        assert!(member_dest(dest, "/etc/passwd").is_err());
    }
}

#[cfg(all(test, unix))]
mod restore_tests {
    use super::*;
    use crate::archiver::codec::testing::install_fake_codec;
    use crate::archiver::container::ArchiveContainer;
    use tempfile::tempdir;

    #[test]
    fn restores_plain_and_surrogate_members() {
        let tmp = tempdir().expect("tempdir");
        let codec = Codec::from_config(&install_fake_codec(tmp.path())).expect("codec");

        let info = tmp.path().join("RunInfo.xml");
        fs::write(&info, "<RunInfo/>").expect("write");
        let reads = tmp.path().join("a.fastq");
        fs::write(&reads, "@r1\nACGT\n+r1\nIIII\n").expect("write");
        let surrogate = tmp.path().join("a.fastq.qp.tmp");
        codec.compress(&reads, &surrogate).expect("compress");

        let tar_path = tmp.path().join("run_0.tar");
        let mut container = ArchiveContainer::create(&tar_path, false, 100).expect("create");
        container.add_verbatim(&info, "run/RunInfo.xml").expect("add");
        container
            .add_surrogate(&surrogate, &reads, "run/lane1/a.fastq.qp")
            .expect("add");
        container.seal().expect("seal");

        let dest = tmp.path().join("restored");
        let stats = restore_container(&tar_path, &dest, &codec, 2).expect("restore");
        assert_eq!(stats.extracted, 1);
        assert_eq!(stats.decompressed, 1);
        assert_eq!(
            fs::read_to_string(dest.join("run/RunInfo.xml")).expect("read"),
            "<RunInfo/>"
        );
        assert_eq!(
            fs::read_to_string(dest.join("run/lane1/a.fastq")).expect("read"),
            "@r1\nACGT\n+\nIIII\n"
        );
    }
}
