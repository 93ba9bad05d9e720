use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("transform failed for {}: {reason}", path.display())]
    TransformFailed { path: PathBuf, reason: String },
    #[error(
        "validation failed for {}: {failures} of {checked} member(s) mismatched",
        container.display()
    )]
    ValidationFailed {
        container: PathBuf,
        checked: usize,
        failures: usize,
    },
    #[error("attempting to overwrite {name} in {}", container.display())]
    DuplicateMember { container: PathBuf, name: String },
}

impl ArchiveError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn code(&self) -> ArchiveErrorCode {
        match self {
            Self::Config(_) => ArchiveErrorCode::E001Config,
            Self::TransformFailed { .. } => ArchiveErrorCode::E002TransformFailed,
            Self::ValidationFailed { .. } => ArchiveErrorCode::E003ValidationFailed,
            Self::DuplicateMember { .. } => ArchiveErrorCode::E004DuplicateMember,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveErrorCode {
    E001Config,
    E002TransformFailed,
    E003ValidationFailed,
    E004DuplicateMember,
}

impl ArchiveErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::E001Config => "E001_CONFIG",
            Self::E002TransformFailed => "E002_TRANSFORM_FAILED",
            Self::E003ValidationFailed => "E003_VALIDATION_FAILED",
            Self::E004DuplicateMember => "E004_DUPLICATE_MEMBER",
        }
    }

    pub fn exit_code(self) -> i32 {
        match self {
            Self::E001Config => 2,
            Self::E002TransformFailed => 3,
            Self::E003ValidationFailed => 4,
            Self::E004DuplicateMember => 5,
        }
    }
}

/// Find the typed failure anywhere in an `anyhow` chain.
pub fn find_archive_error(err: &anyhow::Error) -> Option<&ArchiveError> {
    err.chain().find_map(|cause| cause.downcast_ref::<ArchiveError>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn typed_error_survives_context_wrapping() {
        let err = Err::<(), _>(ArchiveError::config("bad tmpdir"))
            .context("archiving run 161007_K00162_0117_AHFT32BBXX")
            .unwrap_err();
        let found = find_archive_error(&err).expect("typed error");
        assert_eq!(found.code(), ArchiveErrorCode::E001Config);
        assert_eq!(found.code().exit_code(), 2);
    }

    #[test]
    fn plain_errors_have_no_code() {
        let err = anyhow::anyhow!("disk on fire");
        assert!(find_archive_error(&err).is_none());
    }
}
