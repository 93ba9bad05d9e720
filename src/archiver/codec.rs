use crate::archiver::config::CodecConfig;
use crate::error::ArchiveError;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use tracing::debug;

/// Wrapper around the external raw-read compressor.
#[derive(Debug, Clone)]
pub struct Codec {
    program: PathBuf,
    compress_args: Vec<String>,
    decompress_args: Vec<String>,
}

fn resolve_program(program: &Path) -> Result<PathBuf> {
    if program.components().count() > 1 || program.exists() {
        return Ok(program.to_path_buf());
    }
    which::which(program).map_err(|err| {
        ArchiveError::config(format!("codec {} not found: {err}", program.display())).into()
    })
}

impl Codec {
    pub fn from_config(cfg: &CodecConfig) -> Result<Self> {
        Ok(Self {
            program: resolve_program(&cfg.program)?,
            compress_args: cfg.compress_args.clone(),
            decompress_args: cfg.decompress_args.clone(),
        })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Compress `src` into `dst`; the codec writes the surrogate on stdout.
    pub fn compress(&self, src: &Path, dst: &Path) -> Result<()> {
        let out =
            File::create(dst).with_context(|| format!("failed to create {}", dst.display()))?;
        debug!(
            program = %self.program.display(),
            src = %src.display(),
            dst = %dst.display(),
            "running compressor"
        );
        let status = Command::new(&self.program)
            .args(&self.compress_args)
            .arg(src)
            .stdin(Stdio::null())
            .stdout(out)
            .status()
            .with_context(|| format!("failed to run `{}`", self.program.display()))?;
        if !status.success() {
            return Err(ArchiveError::TransformFailed {
                path: src.to_path_buf(),
                reason: format!("{} exited with {status}", self.program.display()),
            }
            .into());
        }
        Ok(())
    }

    /// Stream a surrogate through the decompressor into `sink`.
    pub fn decompress_into<R, W>(&self, input: R, sink: &mut W) -> Result<u64>
    where
        R: Read + Send + 'static,
        W: Write,
    {
        let mut child = Command::new(&self.program)
            .args(&self.decompress_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to run `{}`", self.program.display()))?;
        let feeder = feed_stdin(&mut child, input)?;
        let mut stdout = child.stdout.take().context("decompressor stdout unavailable")?;
        let copied = io::copy(&mut stdout, sink).context("failed to read decompressor output")?;
        let status = child.wait()?;
        join_feeder(feeder)?;
        if !status.success() {
            return Err(ArchiveError::TransformFailed {
                path: self.program.clone(),
                reason: format!("decompression exited with {status}"),
            }
            .into());
        }
        Ok(copied)
    }

    /// Read at most `limit` bytes of decompressed output, then stop the codec.
    pub fn decompress_prefix<R>(&self, input: R, limit: usize) -> Result<Vec<u8>>
    where
        R: Read + Send + 'static,
    {
        let mut child = Command::new(&self.program)
            .args(&self.decompress_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to run `{}`", self.program.display()))?;
        let feeder = feed_stdin(&mut child, input)?;
        let stdout = child.stdout.take().context("decompressor stdout unavailable")?;
        let mut buf = Vec::with_capacity(limit);
        stdout
            .take(limit as u64)
            .read_to_end(&mut buf)
            .context("failed to read decompressor output")?;
        // The prefix is all we need; a codec still writing gets killed.
        let _ = child.kill();
        let _ = child.wait();
        let _ = feeder.join();
        Ok(buf)
    }
}

type Feeder = thread::JoinHandle<io::Result<u64>>;

fn feed_stdin<R>(child: &mut std::process::Child, mut input: R) -> Result<Feeder>
where
    R: Read + Send + 'static,
{
    let mut stdin = child.stdin.take().context("decompressor stdin unavailable")?;
    let handle = thread::Builder::new()
        .name("codec-feed".to_string())
        .spawn(move || match io::copy(&mut input, &mut stdin) {
            Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Ok(0),
            other => other,
        })
        .context("failed to spawn codec feeder")?;
    Ok(handle)
}

fn join_feeder(feeder: Feeder) -> Result<()> {
    feeder
        .join()
        .map_err(|_| anyhow::anyhow!("codec feeder panicked"))?
        .context("failed to feed decompressor")?;
    Ok(())
}


#[cfg(all(test, unix))]
mod tests {
    use super::testing::install_fake_codec;
    use super::*;
    use crate::error::{ArchiveErrorCode, find_archive_error};
    use std::fs;
    use std::io::Cursor;
    use tempfile::tempdir;

    #[test]
    fn compress_blanks_repeated_header() {
        let tmp = tempdir().expect("tempdir");
        let codec = Codec::from_config(&install_fake_codec(tmp.path())).expect("codec");
        let src = tmp.path().join("a.fastq");
        fs::write(&src, "@r1\nACGT\n+r1\nIIII\n").expect("write");
        let dst = tmp.path().join("a.fastq.qp");
        codec.compress(&src, &dst).expect("compress");
        assert_eq!(fs::read_to_string(&dst).expect("read"), "@r1\nACGT\n+\nIIII\n");
    }

    #[test]
    fn failed_compression_is_a_transform_failure() {
        let tmp = tempdir().expect("tempdir");
        let codec = Codec::from_config(&install_fake_codec(tmp.path())).expect("codec");
        let src = tmp.path().join("fail.fastq");
        fs::write(&src, "@r1\nA\n+\nI\n").expect("write");
        let err = codec.compress(&src, &tmp.path().join("out.qp")).unwrap_err();
        let typed = find_archive_error(&err).expect("typed");
        assert_eq!(typed.code(), ArchiveErrorCode::E002TransformFailed);
    }

    #[test]
    fn decompress_prefix_stops_at_limit() {
        let tmp = tempdir().expect("tempdir");
        let codec = Codec::from_config(&install_fake_codec(tmp.path())).expect("codec");
        let input = Cursor::new(b"0123456789".repeat(1000));
        let prefix = codec.decompress_prefix(input, 15).expect("prefix");
        assert_eq!(prefix, b"012345678901234");
    }

    #[test]
    fn missing_program_is_a_config_error() {
        let cfg = CodecConfig {
            program: "definitely-not-a-real-codec-binary".into(),
            ..CodecConfig::default()
        };
        let err = Codec::from_config(&cfg).unwrap_err();
        assert!(find_archive_error(&err).is_some());
    }
}
