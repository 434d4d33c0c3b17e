//! Block file naming and disk directory scanning.
//!
//! An XVA stores each virtual disk as a directory of 1 MiB slices named by
//! their zero-padded decimal index (`00000000`, `00000001`, ...). Blocks that
//! were never written in the source disk are simply absent. Sidecar files
//! such as `00000000.checksum` or `00000000.xxhash` share the directory and
//! are ignored here.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Size of one block file (1 MiB).
pub const BLOCK_SIZE: u64 = 1024 * 1024;

/// Width of the zero-padded decimal block file name.
pub const BLOCK_NAME_WIDTH: usize = 8;

/// Number of blocks in one GiB of logical disk.
pub const BLOCKS_PER_GIB: u64 = 1024;

/// Highest block index accepted by [`BlockLayout::scan`].
///
/// Keeps `(index + 1) * BLOCK_SIZE` within `u64`.
pub const MAX_BLOCK_INDEX: u64 = u64::MAX / BLOCK_SIZE - 1;

/// Parses a block file name into its index.
///
/// Only canonical names are accepted: ASCII digits, zero-padded to
/// [`BLOCK_NAME_WIDTH`], with no leading zeros beyond the padding. This keeps
/// scanning and the per-index lookup in [`block_file_name`] in agreement.
///
/// # Example
///
/// ```
/// use xvatool_core::block::parse_block_index;
///
/// assert_eq!(parse_block_index("00000042"), Some(42));
/// assert_eq!(parse_block_index("00000042.checksum"), None);
/// assert_eq!(parse_block_index("42"), None);
/// ```
pub fn parse_block_index(name: &str) -> Option<u64> {
    if name.len() < BLOCK_NAME_WIDTH || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let index: u64 = name.parse().ok()?;
    (block_file_name(index) == name).then_some(index)
}

/// Returns the file name used for block `index`.
pub fn block_file_name(index: u64) -> String {
    format!("{:0width$}", index, width = BLOCK_NAME_WIDTH)
}

/// The set of block files found in one disk directory.
#[derive(Debug, Clone)]
pub struct BlockLayout {
    dir: PathBuf,
    present: BTreeSet<u64>,
    max_index: u64,
}

impl BlockLayout {
    /// Scans `dir` for block files.
    ///
    /// Subdirectories and entries whose name is not a block index are
    /// skipped. Fails with [`Error::EmptyDisk`] if no block file is found,
    /// and with [`Error::InvalidBlock`] for an index above
    /// [`MAX_BLOCK_INDEX`].
    pub fn scan(dir: &Path) -> Result<Self> {
        let entries = fs::read_dir(dir).map_err(|e| Error::io(e, dir))?;

        let mut present = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(e, dir))?;
            let file_type = entry.file_type().map_err(|e| Error::io(e, entry.path()))?;
            if file_type.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(index) = name.to_str().and_then(parse_block_index) else {
                continue;
            };
            if index > MAX_BLOCK_INDEX {
                return Err(Error::invalid_block(
                    entry.path(),
                    format!("block index {} exceeds the maximum {}", index, MAX_BLOCK_INDEX),
                ));
            }
            present.insert(index);
        }

        let max_index = match present.last() {
            Some(&max) => max,
            None => return Err(Error::empty_disk(dir)),
        };

        tracing::debug!(
            "Scanned {}: {} block files, highest index {}",
            dir.display(),
            present.len(),
            max_index
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            present,
            max_index,
        })
    }

    /// Directory the layout was scanned from.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Highest block index present.
    pub fn max_index(&self) -> u64 {
        self.max_index
    }

    /// Number of blocks in the logical disk (`max_index + 1`).
    pub fn total_blocks(&self) -> u64 {
        self.max_index + 1
    }

    /// Number of block files present.
    pub fn present_blocks(&self) -> u64 {
        self.present.len() as u64
    }

    /// Number of blocks with no file (holes).
    pub fn missing_blocks(&self) -> u64 {
        self.total_blocks() - self.present_blocks()
    }

    /// Whether block `index` has a file.
    pub fn is_present(&self, index: u64) -> bool {
        self.present.contains(&index)
    }

    /// Path of the file for block `index`.
    pub fn block_path(&self, index: u64) -> PathBuf {
        self.dir.join(block_file_name(index))
    }

    /// Size in bytes of the reassembled image for a given block size, or
    /// `None` if it does not fit in a `u64`.
    pub fn image_size(&self, block_size: u64) -> Option<u64> {
        self.total_blocks().checked_mul(block_size)
    }
}
