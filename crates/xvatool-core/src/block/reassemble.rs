//! Sparse raw image reassembly from numbered block files.
//!
//! The reassembler walks block indices in ascending order and places each
//! block at `index * block_size` in the output. Missing blocks become holes,
//! either by seeking past them (the filesystem fills them with zeros on read)
//! or by writing zeros explicitly for sinks without sparse-seek support.
//!
//! # Example
//!
//! ```no_run
//! use xvatool_core::block::{Reassembler, ReassemblyEvent};
//! use std::path::Path;
//!
//! let summary = Reassembler::default()
//!     .reassemble(Path::new("vm.xva_extracted/Ref:12"), Path::new("disk.raw"), |event| {
//!         if let ReassemblyEvent::Milestone { gib } = event {
//!             println!("Processed {gib} GiB");
//!         }
//!     })
//!     .unwrap();
//! println!("{} blocks written", summary.total_blocks);
//! ```

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;

use super::index::{BlockLayout, BLOCKS_PER_GIB, BLOCK_SIZE};
use crate::error::{Error, Result};

/// How gaps between present blocks are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HoleStrategy {
    /// Seek past the block, leaving a sparse hole.
    #[default]
    Seek,
    /// Write a block of zero bytes.
    ZeroFill,
}

/// A seekable output that can also be resized.
///
/// The final image length must be exact even when the trailing region was
/// never written, so plain `Write + Seek` is not enough.
pub trait RawSink: Write + Seek {
    /// Set the total length of the sink, extending with zeros or truncating.
    fn set_len(&mut self, len: u64) -> io::Result<()>;
}

impl RawSink for File {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        File::set_len(self, len)
    }
}

impl RawSink for Cursor<Vec<u8>> {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        let len = usize::try_from(len).map_err(|_| io::Error::other("length exceeds memory"))?;
        self.get_mut().resize(len, 0);
        Ok(())
    }
}

/// Progress notifications emitted while reassembling one disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReassemblyEvent {
    /// Emitted once, before the first block is written.
    Started { total_blocks: u64, image_size: u64 },
    /// Emitted after every block.
    Block { done: u64, total: u64 },
    /// Emitted after every full GiB of logical disk.
    Milestone { gib: u64 },
    /// Emitted once the image is complete.
    Finished(ReassemblySummary),
}

/// Outcome of a successful reassembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReassemblySummary {
    /// Number of blocks in the image.
    pub total_blocks: u64,
    /// Blocks copied from files.
    pub present_blocks: u64,
    /// Blocks left as holes.
    pub missing_blocks: u64,
    /// Bytes copied from block files.
    pub bytes_copied: u64,
    /// Final length of the image in bytes.
    pub image_size: u64,
}

/// Joins the block files of one disk directory into a raw image.
#[derive(Debug, Clone)]
pub struct Reassembler {
    block_size: u64,
    holes: HoleStrategy,
    milestone_blocks: u64,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self {
            block_size: BLOCK_SIZE,
            holes: HoleStrategy::default(),
            milestone_blocks: BLOCKS_PER_GIB,
        }
    }
}

impl Reassembler {
    /// Create a reassembler with the standard 1 MiB block size.
    pub fn new(holes: HoleStrategy) -> Self {
        Self {
            holes,
            ..Self::default()
        }
    }

    /// Override the block size. Intended for tests and non-XVA layouts.
    pub fn with_block_size(mut self, block_size: u64) -> Self {
        assert!(block_size > 0, "block size must be non-zero");
        self.block_size = block_size;
        self
    }

    /// Override how many blocks make up one progress milestone.
    pub fn with_milestone_blocks(mut self, blocks: u64) -> Self {
        assert!(blocks > 0, "milestone interval must be non-zero");
        self.milestone_blocks = blocks;
        self
    }

    /// Block size in bytes.
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Hole strategy in use.
    pub fn holes(&self) -> HoleStrategy {
        self.holes
    }

    /// Reassemble the blocks in `dir` into a raw image at `output`.
    ///
    /// The directory is scanned before `output` is touched, so an empty disk
    /// directory fails with [`Error::EmptyDisk`] without creating a file. An
    /// existing file at `output` is truncated.
    pub fn reassemble<F>(&self, dir: &Path, output: &Path, on_event: F) -> Result<ReassemblySummary>
    where
        F: FnMut(ReassemblyEvent),
    {
        let layout = BlockLayout::scan(dir)?;

        let mut file = File::create(output).map_err(|e| Error::io(e, output))?;
        let summary = self.write_layout(&layout, &mut file, on_event).map_err(|e| match e {
            Error::Io { source, path: None } => Error::io(source, output),
            other => other,
        })?;
        file.flush().map_err(|e| Error::io(e, output))?;

        Ok(summary)
    }

    /// Write all blocks of `layout` to `sink`, in ascending index order.
    pub fn write_layout<S, F>(
        &self,
        layout: &BlockLayout,
        sink: &mut S,
        mut on_event: F,
    ) -> Result<ReassemblySummary>
    where
        S: RawSink + ?Sized,
        F: FnMut(ReassemblyEvent),
    {
        let total_blocks = layout.total_blocks();
        let image_size = layout.image_size(self.block_size).ok_or_else(|| {
            Error::invalid_block(
                layout.block_path(layout.max_index()),
                format!(
                    "{} blocks of {} bytes exceed the maximum image size",
                    total_blocks, self.block_size
                ),
            )
        })?;

        tracing::info!(
            "Joining {} blocks ({:.2} GiB) from {}",
            total_blocks,
            image_size as f64 / (1024.0 * 1024.0 * 1024.0),
            layout.dir().display()
        );
        on_event(ReassemblyEvent::Started {
            total_blocks,
            image_size,
        });

        let zeros = match self.holes {
            HoleStrategy::ZeroFill => vec![0u8; self.block_size as usize],
            HoleStrategy::Seek => Vec::new(),
        };
        let mut buf = vec![0u8; self.block_size as usize];
        let mut bytes_copied = 0u64;

        for index in 0..total_blocks {
            let offset = index * self.block_size;
            sink.seek(SeekFrom::Start(offset))?;

            if layout.is_present(index) {
                let copied = self.copy_block(&layout.block_path(index), &mut *sink, &mut buf)?;
                bytes_copied += copied;
                if self.holes == HoleStrategy::ZeroFill && copied < self.block_size {
                    sink.write_all(&zeros[..(self.block_size - copied) as usize])?;
                }
            } else if self.holes == HoleStrategy::ZeroFill {
                sink.write_all(&zeros)?;
            }

            let done = index + 1;
            on_event(ReassemblyEvent::Block {
                done,
                total: total_blocks,
            });
            if done % self.milestone_blocks == 0 {
                let gib = done / self.milestone_blocks;
                tracing::debug!("Processed {} GiB", gib);
                on_event(ReassemblyEvent::Milestone { gib });
            }
        }

        sink.set_len(image_size)?;

        let summary = ReassemblySummary {
            total_blocks,
            present_blocks: layout.present_blocks(),
            missing_blocks: layout.missing_blocks(),
            bytes_copied,
            image_size,
        };
        tracing::info!(
            "Raw image complete: {} blocks copied, {} holes",
            summary.present_blocks,
            summary.missing_blocks
        );
        on_event(ReassemblyEvent::Finished(summary));

        Ok(summary)
    }

    /// Copy one block file into `sink` at its current position.
    fn copy_block<S>(&self, path: &Path, sink: &mut S, buf: &mut [u8]) -> Result<u64>
    where
        S: Write + ?Sized,
    {
        let mut block = File::open(path).map_err(|e| Error::io(e, path))?;
        let len = block.metadata().map_err(|e| Error::io(e, path))?.len();
        if len > self.block_size {
            return Err(Error::invalid_block(
                path,
                format!("{} bytes exceeds block size {}", len, self.block_size),
            ));
        }

        let mut copied = 0u64;
        loop {
            let n = match block.read(buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::io(e, path)),
            };
            if copied + n as u64 > self.block_size {
                return Err(Error::invalid_block(path, "block file grew while reading"));
            }
            sink.write_all(&buf[..n])?;
            copied += n as u64;
        }

        Ok(copied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{block_file_name, MAX_BLOCK_INDEX};
    use std::fs;
    use tempfile::tempdir;

    const BS: u64 = 16;

    fn write_block(dir: &Path, index: u64, fill: u8, len: usize) {
        fs::write(dir.join(block_file_name(index)), vec![fill; len]).unwrap();
    }

    fn reassemble_in_memory(dir: &Path, holes: HoleStrategy) -> Vec<u8> {
        let layout = BlockLayout::scan(dir).unwrap();
        let mut sink = Cursor::new(Vec::new());
        Reassembler::new(holes)
            .with_block_size(BS)
            .write_layout(&layout, &mut sink, |_| {})
            .unwrap();
        sink.into_inner()
    }

    #[test]
    fn test_gap_reads_as_zero() {
        let dir = tempdir().unwrap();
        write_block(dir.path(), 0, 0xAA, BS as usize);
        write_block(dir.path(), 2, 0xBB, BS as usize);

        let image = reassemble_in_memory(dir.path(), HoleStrategy::Seek);
        assert_eq!(image.len(), 3 * BS as usize);
        assert!(image[..16].iter().all(|&b| b == 0xAA));
        assert!(image[16..32].iter().all(|&b| b == 0));
        assert!(image[32..].iter().all(|&b| b == 0xBB));
    }

    #[test]
    fn test_short_block_is_padded() {
        let dir = tempdir().unwrap();
        write_block(dir.path(), 0, 0x11, 5);
        write_block(dir.path(), 1, 0x22, 3);

        for holes in [HoleStrategy::Seek, HoleStrategy::ZeroFill] {
            let image = reassemble_in_memory(dir.path(), holes);
            assert_eq!(image.len(), 2 * BS as usize);
            assert_eq!(&image[..5], &[0x11; 5]);
            assert!(image[5..16].iter().all(|&b| b == 0));
            assert_eq!(&image[16..19], &[0x22; 3]);
            assert!(image[19..].iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn test_oversized_block_rejected() {
        let dir = tempdir().unwrap();
        write_block(dir.path(), 0, 0x01, BS as usize + 1);

        let layout = BlockLayout::scan(dir.path()).unwrap();
        let mut sink = Cursor::new(Vec::new());
        let err = Reassembler::default()
            .with_block_size(BS)
            .write_layout(&layout, &mut sink, |_| {})
            .unwrap_err();
        assert!(matches!(err, Error::InvalidBlock { .. }));
    }

    #[test]
    fn test_image_size_overflow_rejected() {
        let dir = tempdir().unwrap();
        write_block(dir.path(), MAX_BLOCK_INDEX, 0x01, 1);

        let layout = BlockLayout::scan(dir.path()).unwrap();
        let mut sink = Cursor::new(Vec::new());
        let mut events = Vec::new();
        let err = Reassembler::default()
            .with_block_size(2 * BLOCK_SIZE)
            .write_layout(&layout, &mut sink, |e| events.push(e))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidBlock { .. }));
        assert!(events.is_empty());
        assert!(sink.get_ref().is_empty());
    }

    #[test]
    fn test_events_and_milestones() {
        let dir = tempdir().unwrap();
        write_block(dir.path(), 4, 0x01, BS as usize);

        let layout = BlockLayout::scan(dir.path()).unwrap();
        let mut sink = Cursor::new(Vec::new());
        let mut events = Vec::new();
        let summary = Reassembler::default()
            .with_block_size(BS)
            .with_milestone_blocks(2)
            .write_layout(&layout, &mut sink, |e| events.push(e))
            .unwrap();

        assert_eq!(
            events.first(),
            Some(&ReassemblyEvent::Started {
                total_blocks: 5,
                image_size: 5 * BS
            })
        );
        let milestones: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                ReassemblyEvent::Milestone { gib } => Some(*gib),
                _ => None,
            })
            .collect();
        assert_eq!(milestones, vec![1, 2]);
        let blocks = events
            .iter()
            .filter(|e| matches!(e, ReassemblyEvent::Block { .. }))
            .count();
        assert_eq!(blocks, 5);
        assert_eq!(events.last(), Some(&ReassemblyEvent::Finished(summary)));
        assert_eq!(summary.present_blocks, 1);
        assert_eq!(summary.missing_blocks, 4);
        assert_eq!(summary.bytes_copied, BS);
    }

    #[test]
    fn test_cursor_sink_set_len() {
        let mut sink = Cursor::new(vec![1u8, 2, 3]);
        sink.set_len(5).unwrap();
        assert_eq!(sink.get_ref(), &vec![1, 2, 3, 0, 0]);
        sink.set_len(1).unwrap();
        assert_eq!(sink.get_ref(), &vec![1]);
    }
}
