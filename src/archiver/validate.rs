//! Post-seal verification of a container against the files it was built from.
//!
//! Only a prefix of every member is compared. Verbatim members must match
//! their source byte for byte (and in size); surrogates are decompressed and
//! compared after both sides have had the codec's header normalization
//! applied.

use crate::archiver::codec::Codec;
use crate::archiver::container::{MemberIndex, MemberKind, ResidentForm, ValidationTask};
use crate::error::ArchiveError;
use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ValidationReport {
    pub container: PathBuf,
    pub checked: usize,
    pub skipped: usize,
    pub failures: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Match,
    Skipped,
    Mismatch(String),
}

/// The codec does not reproduce the optional repeated header on a record's
/// third line. Reduce every non-empty third line to a bare `+` so that both
/// sides compare equal. A third line that is not a separator means the data
/// is not FASTQ and cannot be compared.
pub fn normalize_fastq(data: &[u8]) -> std::result::Result<Vec<u8>, String> {
    let mut out = Vec::with_capacity(data.len());
    for (idx, line) in data.split(|b| *b == b'\n').enumerate() {
        if idx > 0 {
            out.push(b'\n');
        }
        if idx % 4 == 2 && !line.is_empty() {
            if line[0] != b'+' {
                return Err(format!("line {} is not a record separator", idx + 1));
            }
            out.push(b'+');
        } else {
            out.extend_from_slice(line);
        }
    }
    Ok(out)
}

fn digest(bytes: &[u8]) -> Vec<u8> {
    Sha256::digest(bytes).to_vec()
}

fn read_prefix<R: Read>(reader: R, limit: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(limit);
    reader.take(limit as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

fn source_reader(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    if path.extension().is_some_and(|ext| ext == "gz") {
        Ok(Box::new(MultiGzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

fn check_verbatim(index: &MemberIndex, task: &ValidationTask) -> Result<Outcome> {
    let meta = fs::symlink_metadata(&task.source)
        .with_context(|| format!("failed to stat {}", task.source.display()))?;
    if meta.file_type().is_symlink() {
        return Ok(Outcome::Skipped);
    }
    let Some(member) = index.get(&task.archived_name) else {
        return Ok(Outcome::Mismatch("member missing".to_string()));
    };
    if member.kind != MemberKind::File {
        return Ok(Outcome::Skipped);
    }
    if member.size != meta.len() {
        return Ok(Outcome::Mismatch(format!(
            "size {} in container, {} on disk",
            member.size,
            meta.len()
        )));
    }

    let src = File::open(&task.source)
        .with_context(|| format!("failed to open {}", task.source.display()))?;
    let src_prefix = read_prefix(src, task.sample_len)?;
    let member_prefix = read_prefix(index.open_member(&task.archived_name)?, task.sample_len)?;
    if digest(&src_prefix) != digest(&member_prefix) {
        return Ok(Outcome::Mismatch("checksum of leading bytes differs".to_string()));
    }
    Ok(Outcome::Match)
}

fn check_surrogate(index: &MemberIndex, codec: &Codec, task: &ValidationTask) -> Result<Outcome> {
    if index.get(&task.archived_name).is_none() {
        return Ok(Outcome::Mismatch("member missing".to_string()));
    }
    // Normalization shortens lines, so read twice as much as we compare.
    let window = task.sample_len.saturating_mul(2);

    let src_raw = read_prefix(source_reader(&task.source)?, window)
        .with_context(|| format!("failed to read {}", task.source.display()))?;
    let member_raw = codec.decompress_prefix(index.open_member(&task.archived_name)?, window)?;

    let mut src_norm = match normalize_fastq(&src_raw) {
        Ok(v) => v,
        Err(reason) => return Ok(Outcome::Mismatch(format!("source: {reason}"))),
    };
    let mut member_norm = match normalize_fastq(&member_raw) {
        Ok(v) => v,
        Err(reason) => return Ok(Outcome::Mismatch(format!("member: {reason}"))),
    };
    src_norm.truncate(task.sample_len);
    member_norm.truncate(task.sample_len);

    if digest(&src_norm) != digest(&member_norm) {
        return Ok(Outcome::Mismatch(
            "checksum of leading decompressed bytes differs".to_string(),
        ));
    }
    Ok(Outcome::Match)
}

/// Check every task against the sealed container at `container`. Any
/// mismatch fails the container as a whole.
pub fn validate_container(
    container: &Path,
    tasks: &[ValidationTask],
    codec: &Codec,
) -> Result<ValidationReport> {
    let index = MemberIndex::load(container)?;
    let mut report = ValidationReport {
        container: container.to_path_buf(),
        checked: 0,
        skipped: 0,
        failures: Vec::new(),
    };

    for task in tasks {
        let outcome = match task.form {
            ResidentForm::Verbatim => check_verbatim(&index, task),
            ResidentForm::Surrogate => check_surrogate(&index, codec, task),
        }
        .with_context(|| format!("failed to validate {}", task.archived_name))?;

        match outcome {
            Outcome::Match => {
                report.checked += 1;
                debug!(member = %task.archived_name, "validated");
            }
            Outcome::Skipped => {
                report.skipped += 1;
                debug!(member = %task.archived_name, "not validating link");
            }
            Outcome::Mismatch(reason) => {
                report.checked += 1;
                error!(
                    member = %task.archived_name,
                    source = %task.source.display(),
                    %reason,
                    "validation mismatch"
                );
                report.failures.push(task.archived_name.clone());
            }
        }
    }

    if !report.failures.is_empty() {
        return Err(ArchiveError::ValidationFailed {
            container: container.to_path_buf(),
            checked: report.checked,
            failures: report.failures.len(),
        }
        .into());
    }
    info!(
        container = %container.display(),
        checked = report.checked,
        skipped = report.skipped,
        "container validated"
    );
    Ok(report)
}
