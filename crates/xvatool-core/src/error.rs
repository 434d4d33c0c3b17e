//! Error types for the XVATool core library.

use std::fmt;
use std::path::PathBuf;

/// Stage of a conversion run, used to label wrapped errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Unpacking the XVA archive.
    Extraction,
    /// Finding disk directories in the extracted tree.
    Location,
    /// Joining block files into a raw image.
    Reassembly,
    /// Running the external image converter.
    Conversion,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Extraction => write!(f, "extraction"),
            Stage::Location => write!(f, "disk detection"),
            Stage::Reassembly => write!(f, "block reassembly"),
            Stage::Conversion => write!(f, "image conversion"),
        }
    }
}

/// The main error type for XVATool operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error with optional path context.
    #[error("I/O error{}: {source}", path.as_ref().map(|p| format!(" at '{}'", p.display())).unwrap_or_default())]
    Io {
        source: std::io::Error,
        path: Option<PathBuf>,
    },

    /// Malformed or unsafe archive entry.
    #[error("archive error: {message}")]
    Archive { message: String },

    /// A disk directory holds no block files.
    #[error("no numbered block files found in '{}'", path.display())]
    EmptyDisk { path: PathBuf },

    /// A block file that cannot be placed in the image.
    #[error("invalid block '{}': {message}", path.display())]
    InvalidBlock { path: PathBuf, message: String },

    /// The external converter failed to start or exited non-zero.
    #[error("external tool error: {message}")]
    ExternalTool { message: String },

    /// An error tagged with the stage (and disk) it happened in.
    #[error("{stage} failed{}: {source}", disk.map(|d| format!(" for disk {d}")).unwrap_or_default())]
    Stage {
        stage: Stage,
        disk: Option<usize>,
        source: Box<Error>,
    },
}

/// A specialized Result type for XVATool operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an I/O error with path context.
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            source,
            path: Some(path.into()),
        }
    }

    /// Create an I/O error without path context.
    pub fn io_simple(source: std::io::Error) -> Self {
        Self::Io { source, path: None }
    }

    /// Create an archive error.
    pub fn archive(message: impl Into<String>) -> Self {
        Self::Archive {
            message: message.into(),
        }
    }

    /// Create an empty-disk error for the given directory.
    pub fn empty_disk(path: impl Into<PathBuf>) -> Self {
        Self::EmptyDisk { path: path.into() }
    }

    /// Create an invalid-block error.
    pub fn invalid_block(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::InvalidBlock {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an external tool error.
    pub fn external_tool(message: impl Into<String>) -> Self {
        Self::ExternalTool {
            message: message.into(),
        }
    }

    /// Tag an error with the stage it happened in.
    pub fn at_stage(self, stage: Stage) -> Self {
        Self::Stage {
            stage,
            disk: None,
            source: Box::new(self),
        }
    }

    /// Tag an error with the stage and the index of the disk being processed.
    pub fn at_disk(self, stage: Stage, disk: usize) -> Self {
        Self::Stage {
            stage,
            disk: Some(disk),
            source: Box::new(self),
        }
    }

    /// Index of the disk this error is attributed to, if any.
    pub fn disk_index(&self) -> Option<usize> {
        match self {
            Self::Stage { disk, .. } => *disk,
            _ => None,
        }
    }

    /// The error with any stage tagging removed.
    pub fn root_cause(&self) -> &Error {
        match self {
            Self::Stage { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Self::io_simple(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_with_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::io(io_err, "/path/to/vm.xva");
        let msg = err.to_string();
        assert!(msg.contains("I/O error"));
        assert!(msg.contains("/path/to/vm.xva"));
    }

    #[test]
    fn test_io_error_without_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::io_simple(io_err);
        let msg = err.to_string();
        assert!(msg.contains("I/O error"));
        assert!(!msg.contains("at '"));
    }

    #[test]
    fn test_empty_disk_error() {
        let err = Error::empty_disk("/tmp/x/Ref:7");
        assert!(err.to_string().contains("no numbered block files"));
        assert!(err.to_string().contains("Ref:7"));
    }

    #[test]
    fn test_external_tool_error() {
        let err = Error::external_tool("qemu-img exited with status 1");
        assert!(err.to_string().contains("external tool error"));
    }

    #[test]
    fn test_archive_error() {
        let err = Error::archive("entry escapes destination");
        assert!(err.to_string().contains("archive error"));
    }

    #[test]
    fn test_stage_error_names_disk() {
        let err = Error::external_tool("boom").at_disk(Stage::Conversion, 1);
        let msg = err.to_string();
        assert!(msg.contains("image conversion failed for disk 1"), "{msg}");
        assert!(msg.contains("boom"));
        assert_eq!(err.disk_index(), Some(1));
        assert!(matches!(err.root_cause(), Error::ExternalTool { .. }));
    }

    #[test]
    fn test_stage_error_without_disk() {
        let err = Error::archive("bad").at_stage(Stage::Extraction);
        assert_eq!(err.to_string(), "extraction failed: archive error: bad");
        assert_eq!(err.disk_index(), None);
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io { path: None, .. }));
    }
}
