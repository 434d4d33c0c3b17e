//! Disk directory detection.
//!
//! XenServer writes each exported VDI into a directory named after its
//! reference, e.g. `Ref:1234/`. Matching is by name prefix over the
//! immediate subdirectories of the extraction root.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Prefix of the per-disk directories in an XVA.
pub const DEFAULT_REF_PREFIX: &str = "Ref:";

/// Which matches the locator returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiskSelection {
    /// Only the first matching directory.
    First,
    /// Every matching directory.
    #[default]
    All,
}

/// Turn a user-supplied directory selector into a name prefix.
///
/// A selector without a `:` qualifier falls back to [`DEFAULT_REF_PREFIX`].
///
/// ```
/// use xvatool_core::locate::normalize_prefix;
///
/// assert_eq!(normalize_prefix(None), "Ref:");
/// assert_eq!(normalize_prefix(Some("Ref:12")), "Ref:12");
/// assert_eq!(normalize_prefix(Some("disk")), "Ref:");
/// ```
pub fn normalize_prefix(selector: Option<&str>) -> String {
    match selector {
        Some(s) if s.contains(':') => s.to_string(),
        _ => DEFAULT_REF_PREFIX.to_string(),
    }
}

/// Return the first subdirectory of `base` whose name starts with `prefix`.
pub fn find_disk_dir(base: &Path, prefix: &str) -> Result<Option<PathBuf>> {
    matching_dirs(base, prefix)?.next().transpose()
}

/// Return every subdirectory of `base` whose name starts with `prefix`, in
/// directory enumeration order.
pub fn find_disk_dirs(base: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    matching_dirs(base, prefix)?.collect()
}

/// Resolve the disk directories to convert.
///
/// Falls back to `base` itself when no subdirectory matches, which covers
/// archives whose block files sit at the top level.
pub fn resolve_disk_dirs(base: &Path, prefix: &str, selection: DiskSelection) -> Result<Vec<PathBuf>> {
    let found: Vec<PathBuf> = match selection {
        DiskSelection::First => find_disk_dir(base, prefix)?.into_iter().collect(),
        DiskSelection::All => find_disk_dirs(base, prefix)?,
    };

    if found.is_empty() {
        tracing::info!(
            "No directory matching '{}' in {}, using it as the disk directory",
            prefix,
            base.display()
        );
        return Ok(vec![base.to_path_buf()]);
    }

    tracing::info!("Found {} disk directories matching '{}'", found.len(), prefix);
    Ok(found)
}

fn matching_dirs<'a>(
    base: &'a Path,
    prefix: &'a str,
) -> Result<impl Iterator<Item = Result<PathBuf>> + 'a> {
    let entries = fs::read_dir(base).map_err(|e| Error::io(e, base))?;

    Ok(entries.filter_map(move |entry| {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => return Some(Err(Error::io(e, base))),
        };
        let is_dir = match entry.file_type() {
            Ok(t) => t.is_dir(),
            Err(e) => return Some(Err(Error::io(e, entry.path()))),
        };
        let matches = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(prefix));
        (is_dir && matches).then(|| Ok(entry.path()))
    }))
}
