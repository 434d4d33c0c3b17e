//! XVATool Core Library
//!
//! This crate provides the core functionality for converting XenServer /
//! XCP-ng VM exports (XVA) into standard disk images.
//!
//! # Overview
//!
//! An XVA is a tar archive holding each virtual disk as a directory of
//! numbered 1 MiB block files, with unallocated blocks left out. XVATool
//! extracts the archive, rebuilds each disk as a sparse raw image, and hands
//! that image to `qemu-img` for conversion. The main entry point is
//! [`convert_xva`].
//!
//! # Modules
//!
//! - [`error`] - Error types and Result alias
//! - [`archive`] - XVA (tar) extraction and the working directory guard
//! - [`locate`] - Disk directory detection
//! - [`block`] - Block naming and sparse raw image reassembly
//! - [`converter`] - External image converter (`qemu-img`)
//! - [`convert`] - Conversion orchestrator coordinating the full run
//!
//! # Quick Start
//!
//! ```no_run
//! use xvatool_core::{convert_xva, ConvertOptions, QemuImg};
//! use std::path::Path;
//!
//! let xva_path = Path::new("/path/to/vm.xva");
//! let output_path = Path::new("/path/to/vm.qcow2");
//!
//! convert_xva(xva_path, output_path, &ConvertOptions::default(), &QemuImg::default(), None).unwrap();
//! ```

pub mod archive;
pub mod block;
pub mod convert;
pub mod converter;
pub mod error;
pub mod locate;

pub use error::{Error, Result, Stage};

// Re-export main conversion functionality for convenience
pub use convert::{
    convert_xva, ConvertEvent, ConvertOptions, ConvertReport, OutputTarget, ProgressCallback,
};

pub use block::{HoleStrategy, ReassemblyEvent, ReassemblySummary, Reassembler, BLOCK_SIZE};
pub use converter::{ImageConverter, QemuImg, TargetFormat};
pub use locate::{DiskSelection, DEFAULT_REF_PREFIX};
