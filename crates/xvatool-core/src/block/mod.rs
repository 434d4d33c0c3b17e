//! XVA block handling.
//!
//! This module provides block file naming, disk directory scanning, and
//! reassembly of numbered blocks into a sparse raw disk image.

pub mod index;
pub mod reassemble;

pub use index::{
    block_file_name, parse_block_index, BlockLayout, BLOCKS_PER_GIB, BLOCK_NAME_WIDTH, BLOCK_SIZE,
    MAX_BLOCK_INDEX,
};
pub use reassemble::{HoleStrategy, RawSink, ReassemblyEvent, ReassemblySummary, Reassembler};
