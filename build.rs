//! Generates the list of `SEQ_ARCHIVE_*` variables the binary reads, so
//! unknown ones in the environment can be reported at startup.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const KEY_PREFIX: &str = "SEQ_ARCHIVE_";

/// Every `.rs` file under `root`, in path order.
fn source_files(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut dirs = vec![root.to_path_buf()];
    while let Some(dir) = dirs.pop() {
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                dirs.push(path);
            } else if path.extension().is_some_and(|ext| ext == "rs") {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Code before the first test module; keys only named by tests are not real.
fn production_part(source: &str) -> &str {
    ["#[cfg(test)]", "#[cfg(all(test"]
        .iter()
        .filter_map(|marker| source.find(*marker))
        .min()
        .map_or(source, |end| &source[..end])
}

/// Keys that open a string literal, e.g. `env::var("SEQ_ARCHIVE_TOP")`.
/// Mentions inside prose (`SEQ_ARCHIVE_*`, error messages) are skipped.
fn literal_keys(source: &str) -> impl Iterator<Item = &str> {
    source.match_indices('"').filter_map(move |(at, _)| {
        let start = at + 1;
        let rest = source[start..].strip_prefix(KEY_PREFIX)?;
        let len = rest
            .find(|c: char| !(c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_'))
            .unwrap_or(rest.len());
        let key = &source[start..start + KEY_PREFIX.len() + len];
        (len > 0 && rest[len..].starts_with('"')).then_some(key)
    })
}

fn write_allowlist(keys: &BTreeMap<String, PathBuf>, out: &Path) -> io::Result<()> {
    let mut f = io::BufWriter::new(fs::File::create(out)?);
    writeln!(f, "pub const GENERATED_SEQ_ARCHIVE_ENV_ALLOWLIST: &[&str] = &[")?;
    for (key, origin) in keys {
        writeln!(f, "    \"{key}\", // {}", origin.display())?;
    }
    writeln!(f, "];")?;
    f.flush()
}

fn main() -> io::Result<()> {
    let mut keys = BTreeMap::new();
    for file in source_files(Path::new("src"))? {
        let source = fs::read_to_string(&file)?;
        for key in literal_keys(production_part(&source)) {
            keys.entry(key.to_string()).or_insert_with(|| file.clone());
        }
    }

    let out_dir = env::var_os("OUT_DIR")
        .map(PathBuf::from)
        .ok_or_else(|| io::Error::other("OUT_DIR not set"))?;
    write_allowlist(&keys, &out_dir.join("seq_archive_env_allowlist.rs"))?;

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src");
    Ok(())
}
