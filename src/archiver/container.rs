use crate::error::ArchiveError;
use anyhow::{Context, Result};
use std::collections::{BTreeSet, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResidentForm {
    Verbatim,
    Surrogate,
}

/// One member to re-check once the container is sealed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationTask {
    /// The original file, before any transform.
    pub source: PathBuf,
    pub archived_name: String,
    pub sample_len: usize,
    pub form: ResidentForm,
}

/// Append-only tar writer that refuses to store the same archived name twice
/// and records a validation task for every member it adds.
pub struct ArchiveContainer {
    path: PathBuf,
    builder: tar::Builder<File>,
    added: BTreeSet<String>,
    tasks: Vec<ValidationTask>,
    sample_len: usize,
}

impl ArchiveContainer {
    /// Create the container file. An existing file is an error unless `force`.
    pub fn create(path: &Path, force: bool, sample_len: usize) -> Result<Self> {
        if path.exists() && !force {
            return Err(ArchiveError::config(format!(
                "{} exists, use --force to overwrite",
                path.display()
            ))
            .into());
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        let mut builder = tar::Builder::new(file);
        builder.follow_symlinks(false);
        debug!(container = %path.display(), "creating container");
        Ok(Self {
            path: path.to_path_buf(),
            builder,
            added: BTreeSet::new(),
            tasks: Vec::new(),
            sample_len,
        })
    }

    /// Store `source` under its own name.
    pub fn add_verbatim(&mut self, source: &Path, archived_name: &str) -> Result<()> {
        self.add(source, source, archived_name, ResidentForm::Verbatim)
    }

    /// Store the transformed `data` file under `archived_name`, validated
    /// later against `original`.
    pub fn add_surrogate(
        &mut self,
        data: &Path,
        original: &Path,
        archived_name: &str,
    ) -> Result<()> {
        self.add(data, original, archived_name, ResidentForm::Surrogate)
    }

    fn add(
        &mut self,
        data: &Path,
        original: &Path,
        archived_name: &str,
        form: ResidentForm,
    ) -> Result<()> {
        if self.added.contains(archived_name) {
            return Err(ArchiveError::DuplicateMember {
                container: self.path.clone(),
                name: archived_name.to_string(),
            }
            .into());
        }
        self.builder
            .append_path_with_name(data, archived_name)
            .with_context(|| {
                format!("failed to append {} to {}", data.display(), self.path.display())
            })?;
        self.added.insert(archived_name.to_string());
        self.tasks.push(ValidationTask {
            source: original.to_path_buf(),
            archived_name: archived_name.to_string(),
            sample_len: self.sample_len,
            form,
        });
        Ok(())
    }

    /// Write the end-of-archive marker and close the file for writing.
    pub fn seal(self) -> Result<SealedContainer> {
        let Self {
            path,
            builder,
            tasks,
            ..
        } = self;
        let file = builder
            .into_inner()
            .with_context(|| format!("failed to finish {}", path.display()))?;
        file.sync_all()
            .with_context(|| format!("failed to sync {}", path.display()))?;
        Ok(SealedContainer { path, tasks })
    }
}

#[derive(Debug)]
pub struct SealedContainer {
    pub path: PathBuf,
    pub tasks: Vec<ValidationTask>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    File,
    Symlink,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberInfo {
    /// Offset of the member's data within the container file.
    pub offset: u64,
    pub size: u64,
    pub kind: MemberKind,
}

/// Name-to-location map of a sealed container, built with one pass over the
/// headers.
#[derive(Debug, Clone)]
pub struct MemberIndex {
    path: PathBuf,
    members: HashMap<String, MemberInfo>,
    order: Vec<String>,
}

impl MemberIndex {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let mut archive = tar::Archive::new(file);
        let mut members = HashMap::new();
        let mut order = Vec::new();
        for entry in archive
            .entries_with_seek()
            .with_context(|| format!("failed to read {}", path.display()))?
        {
            let entry = entry.with_context(|| format!("corrupt entry in {}", path.display()))?;
            let name = entry
                .path()
                .with_context(|| format!("bad member name in {}", path.display()))?
                .to_string_lossy()
                .to_string();
            let header = entry.header();
            let kind = match header.entry_type() {
                tar::EntryType::Regular | tar::EntryType::Continuous => MemberKind::File,
                tar::EntryType::Symlink => MemberKind::Symlink,
                _ => MemberKind::Other,
            };
            let info = MemberInfo {
                offset: entry.raw_file_position(),
                size: header.size().unwrap_or(0),
                kind,
            };
            order.push(name.clone());
            members.insert(name, info);
        }
        Ok(Self {
            path: path.to_path_buf(),
            members,
            order,
        })
    }

    pub fn get(&self, name: &str) -> Option<&MemberInfo> {
        self.members.get(name)
    }

    /// Member names in container order.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    /// An independent reader over one member's bytes, usable from any thread.
    pub fn open_member(&self, name: &str) -> Result<std::io::Take<File>> {
        let info = self
            .get(name)
            .with_context(|| format!("{name} not found in {}", self.path.display()))?;
        let mut file = File::open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        file.seek(SeekFrom::Start(info.offset))?;
        Ok(file.take(info.size))
    }
}
