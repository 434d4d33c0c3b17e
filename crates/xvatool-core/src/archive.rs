//! XVA archive extraction.
//!
//! An XVA is a plain tar stream. Extraction keeps only directories and
//! regular files, which is all an XVA contains in practice (`ova.xml` plus
//! one `Ref:<n>/` directory of block files per disk).

use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

use tar::{Archive, EntryType};

use crate::error::{Error, Result};

/// Counts of what an extraction produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractStats {
    /// Directory entries created.
    pub directories: u64,
    /// Regular files written.
    pub files: u64,
    /// Payload bytes written.
    pub bytes: u64,
}

/// Extract the tar archive at `archive` into `dest`.
///
/// Directory entries are created with their recorded permission bits (plus
/// owner read/write/execute).
/// Regular files get their parent directories created with mode 0755 and
/// their payload copied verbatim. Any other entry type is skipped. The first
/// failure aborts the whole extraction.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<ExtractStats> {
    let file = File::open(archive).map_err(|e| Error::io(e, archive))?;
    let mut reader = Archive::new(file);
    let mut stats = ExtractStats::default();

    let entries = reader.entries().map_err(|e| Error::io(e, archive))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| Error::io(e, archive))?;
        let rel = entry.path().map_err(|e| Error::io(e, archive))?.into_owned();
        let target = safe_join(dest, &rel)?;

        match entry.header().entry_type() {
            EntryType::Directory => {
                fs::create_dir_all(&target).map_err(|e| Error::io(e, &target))?;
                let mode = entry.header().mode().map_err(|e| Error::io(e, archive))?;
                // Owner access is kept so the tree can be filled and removed.
                set_mode(&target, (mode & 0o7777) | 0o700)?;
                stats.directories += 1;
            }
            EntryType::Regular | EntryType::Continuous => {
                if let Some(parent) = target.parent() {
                    create_parent_dirs(parent)?;
                }
                let mut out = File::create(&target).map_err(|e| Error::io(e, &target))?;
                let written = io::copy(&mut entry, &mut out).map_err(|e| Error::io(e, &target))?;
                stats.files += 1;
                stats.bytes += written;
            }
            other => {
                tracing::debug!("Skipping {:?} entry {}", other, rel.display());
            }
        }
    }

    tracing::info!(
        "Extracted {} files ({} bytes) and {} directories to {}",
        stats.files,
        stats.bytes,
        stats.directories,
        dest.display()
    );
    Ok(stats)
}

/// Join an entry path onto `dest`, refusing anything that would escape it.
fn safe_join(dest: &Path, rel: &Path) -> Result<PathBuf> {
    let mut target = dest.to_path_buf();
    for component in rel.components() {
        match component {
            Component::Normal(part) => target.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::archive(format!(
                    "entry '{}' escapes the extraction directory",
                    rel.display()
                )));
            }
        }
    }
    Ok(target)
}

#[cfg(unix)]
fn create_parent_dirs(dir: &Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(dir)
        .map_err(|e| Error::io(e, dir))
}

#[cfg(not(unix))]
fn create_parent_dirs(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| Error::io(e, dir))
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| Error::io(e, path))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

/// The working directory an archive is extracted into.
///
/// Created fresh by [`ExtractionRoot::create`] and removed when dropped, so
/// it never outlives the run that made it. Use [`ExtractionRoot::close`] to
/// remove it and observe the outcome.
#[derive(Debug)]
pub struct ExtractionRoot {
    path: PathBuf,
    removed: bool,
}

impl ExtractionRoot {
    /// Create an empty directory at `path`, removing anything already there.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if path.exists() {
            tracing::debug!("Removing stale extraction directory {}", path.display());
            fs::remove_dir_all(&path).map_err(|e| Error::io(e, &path))?;
        }
        fs::create_dir_all(&path).map_err(|e| Error::io(e, &path))?;

        Ok(Self {
            path,
            removed: false,
        })
    }

    /// Default location for extracting `archive`: `<name>_extracted` beside
    /// it, or inside `work_dir` when one is given.
    pub fn default_path(archive: &Path, work_dir: Option<&Path>) -> PathBuf {
        let name = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "xva".to_string());
        let dir = match work_dir {
            Some(dir) => dir.to_path_buf(),
            None => archive
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
        };
        dir.join(format!("{name}_extracted"))
    }

    /// Path of the extraction directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the directory now, returning any error.
    pub fn close(mut self) -> io::Result<()> {
        self.removed = true;
        fs::remove_dir_all(&self.path)
    }
}

impl Drop for ExtractionRoot {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(e) = fs::remove_dir_all(&self.path) {
            tracing::warn!(
                "Could not remove extraction directory {}: {}",
                self.path.display(),
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_safe_join_normal() {
        let joined = safe_join(Path::new("/work"), Path::new("./Ref:1/00000000")).unwrap();
        assert_eq!(joined, PathBuf::from("/work/Ref:1/00000000"));
    }

    #[test]
    fn test_safe_join_rejects_parent() {
        let err = safe_join(Path::new("/work"), Path::new("../etc/passwd")).unwrap_err();
        assert!(matches!(err, Error::Archive { .. }));
    }

    #[test]
    fn test_safe_join_rejects_absolute() {
        assert!(safe_join(Path::new("/work"), Path::new("/etc/passwd")).is_err());
    }

    #[test]
    fn test_default_path() {
        let path = ExtractionRoot::default_path(Path::new("/vms/web.xva"), None);
        assert_eq!(path, PathBuf::from("/vms/web.xva_extracted"));

        let path = ExtractionRoot::default_path(Path::new("/vms/web.xva"), Some(Path::new("/scratch")));
        assert_eq!(path, PathBuf::from("/scratch/web.xva_extracted"));
    }

    #[test]
    fn test_extraction_root_replaces_existing() {
        let base = tempdir().unwrap();
        let path = base.path().join("vm.xva_extracted");
        fs::create_dir_all(path.join("old")).unwrap();
        fs::write(path.join("old/stale"), b"stale").unwrap();

        let root = ExtractionRoot::create(&path).unwrap();
        assert!(root.path().exists());
        assert!(!path.join("old").exists());

        root.close().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_extraction_root_removed_on_drop() {
        let base = tempdir().unwrap();
        let path = base.path().join("vm.xva_extracted");
        {
            let root = ExtractionRoot::create(&path).unwrap();
            fs::write(root.path().join("ova.xml"), b"<value/>").unwrap();
        }
        assert!(!path.exists());
    }
}
