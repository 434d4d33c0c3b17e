//! Conversion orchestrator for XVA to disk image.
//!
//! This module coordinates the full conversion:
//! 1. Extract the XVA (a tar stream) into a fresh working directory
//! 2. Locate the per-disk block directories
//! 3. For each disk, join its blocks into a temporary sparse raw image
//! 4. Hand the raw image to an [`ImageConverter`] and delete it afterwards
//!
//! Disks are processed one at a time and the run stops at the first failure.
//! The working directory and the current raw image are removed on every exit
//! path. Images already written for earlier disks are left in place.
//!
//! # Example
//!
//! ```no_run
//! use xvatool_core::convert::{convert_xva, ConvertOptions};
//! use xvatool_core::converter::QemuImg;
//! use std::path::Path;
//!
//! let report = convert_xva(
//!     Path::new("/vms/web.xva"),
//!     Path::new("/images/web.qcow2"),
//!     &ConvertOptions::default(),
//!     &QemuImg::default(),
//!     None,
//! )
//! .unwrap();
//! for output in &report.outputs {
//!     println!("wrote {}", output.display());
//! }
//! ```

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use crate::archive::{extract_archive, ExtractStats, ExtractionRoot};
use crate::block::{HoleStrategy, ReassemblyEvent, Reassembler};
use crate::converter::{ImageConverter, TargetFormat};
use crate::error::{Error, Result, Stage};
use crate::locate::{resolve_disk_dirs, DiskSelection, DEFAULT_REF_PREFIX};

/// Options for a conversion run.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Name prefix of the disk directories inside the archive.
    pub ref_prefix: String,
    /// Convert only the first matching disk, or all of them.
    pub selection: DiskSelection,
    /// Output image format.
    pub format: TargetFormat,
    /// Where the extraction directory and raw images go. Defaults to the
    /// archive's own directory.
    pub work_dir: Option<PathBuf>,
    /// How missing blocks are written.
    pub holes: HoleStrategy,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            ref_prefix: DEFAULT_REF_PREFIX.to_string(),
            selection: DiskSelection::All,
            format: TargetFormat::Qcow2,
            work_dir: None,
            holes: HoleStrategy::Seek,
        }
    }
}

impl ConvertOptions {
    /// Create options for the given prefix and output format.
    pub fn new(ref_prefix: impl Into<String>, format: TargetFormat) -> Self {
        Self {
            ref_prefix: ref_prefix.into(),
            format,
            ..Self::default()
        }
    }
}

/// Progress notifications for a conversion run.
#[derive(Debug, Clone, PartialEq)]
pub enum ConvertEvent {
    /// Extraction is starting.
    Extracting { archive: PathBuf, root: PathBuf },
    /// Extraction finished.
    Extracted(ExtractStats),
    /// Disk directories were located.
    DisksFound { count: usize },
    /// Block reassembly progress for one disk.
    Reassembly {
        disk: usize,
        total_disks: usize,
        event: ReassemblyEvent,
    },
    /// The external converter is about to run.
    Converting {
        disk: usize,
        raw: PathBuf,
        output: PathBuf,
    },
    /// A disk was fully converted.
    DiskDone { disk: usize, output: PathBuf },
    /// A non-fatal cleanup problem.
    Warning(String),
}

/// Type alias for the progress callback function.
pub type ProgressCallback = Box<dyn Fn(ConvertEvent) + Send>;

/// Result of a successful run.
#[derive(Debug, Clone, Default)]
pub struct ConvertReport {
    /// Output images, in disk order.
    pub outputs: Vec<PathBuf>,
    /// Cleanup warnings that did not fail the run.
    pub warnings: Vec<String>,
}

/// Naming of output images.
///
/// The user-supplied path loses its extension and gets the format's
/// canonical one. With several disks, each name carries a `-disk<N>` suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTarget {
    base: PathBuf,
    format: TargetFormat,
}

impl OutputTarget {
    /// Build a target from the path given on the command line.
    pub fn new(path: &Path, format: TargetFormat) -> Self {
        Self {
            base: path.with_extension(""),
            format,
        }
    }

    /// Output path without extension.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Output path for disk `index` out of `total` disks.
    pub fn path_for(&self, index: usize, total: usize) -> PathBuf {
        let mut name: OsString = self.base.as_os_str().to_owned();
        if total > 1 {
            name.push(format!("-disk{index}"));
        }
        name.push(".");
        name.push(self.format.extension());
        PathBuf::from(name)
    }
}

/// Convert an XVA archive into one disk image per disk directory.
///
/// # Arguments
///
/// * `archive` - Path to the XVA file.
/// * `output` - Output path or prefix; its extension is normalized.
/// * `options` - Conversion options.
/// * `converter` - Converter that turns raw images into `options.format`.
/// * `progress_callback` - Optional callback for progress updates.
///
/// # Errors
///
/// Any failure aborts the run and is returned as [`Error::Stage`], naming the
/// stage and, for per-disk stages, the disk index.
pub fn convert_xva(
    archive: &Path,
    output: &Path,
    options: &ConvertOptions,
    converter: &dyn ImageConverter,
    progress_callback: Option<ProgressCallback>,
) -> Result<ConvertReport> {
    let report_progress = |event: ConvertEvent| {
        if let Some(ref callback) = progress_callback {
            callback(event);
        }
    };

    let archive = fs::canonicalize(archive)
        .map_err(|e| Error::io(e, archive).at_stage(Stage::Extraction))?;
    let root_path = ExtractionRoot::default_path(&archive, options.work_dir.as_deref());
    let work_dir = root_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    // Phase 1: Extraction
    report_progress(ConvertEvent::Extracting {
        archive: archive.clone(),
        root: root_path.clone(),
    });
    let root = ExtractionRoot::create(&root_path).map_err(|e| e.at_stage(Stage::Extraction))?;
    let stats = extract_archive(&archive, root.path()).map_err(|e| e.at_stage(Stage::Extraction))?;
    report_progress(ConvertEvent::Extracted(stats));

    // Phase 2: Locate disks
    let disks = resolve_disk_dirs(root.path(), &options.ref_prefix, options.selection)
        .map_err(|e| e.at_stage(Stage::Location))?;
    report_progress(ConvertEvent::DisksFound { count: disks.len() });

    // Phase 3: Reassemble and convert each disk
    let target = OutputTarget::new(output, options.format);
    let reassembler = Reassembler::new(options.holes);
    let raw_prefix = format!(
        "{}.",
        archive
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "xva".to_string())
    );

    let mut report = ConvertReport::default();
    let total_disks = disks.len();

    for (disk, disk_dir) in disks.iter().enumerate() {
        tracing::info!("Disk {}: joining blocks from {}", disk, disk_dir.display());

        let raw = tempfile::Builder::new()
            .prefix(&format!("{raw_prefix}disk{disk}."))
            .suffix(".raw")
            .tempfile_in(&work_dir)
            .map_err(|e| Error::io(e, &work_dir).at_disk(Stage::Reassembly, disk))?
            .into_temp_path();

        reassembler
            .reassemble(disk_dir, &raw, |event| {
                report_progress(ConvertEvent::Reassembly {
                    disk,
                    total_disks,
                    event,
                })
            })
            .map_err(|e| e.at_disk(Stage::Reassembly, disk))?;

        let output_path = target.path_for(disk, total_disks);
        report_progress(ConvertEvent::Converting {
            disk,
            raw: raw.to_path_buf(),
            output: output_path.clone(),
        });
        converter
            .convert(&raw, &output_path, options.format)
            .map_err(|e| e.at_disk(Stage::Conversion, disk))?;

        let raw_path = raw.to_path_buf();
        if let Err(e) = raw.close() {
            let warning = format!(
                "could not remove temporary raw image {}: {}",
                raw_path.display(),
                e
            );
            tracing::warn!("{}", warning);
            report_progress(ConvertEvent::Warning(warning.clone()));
            report.warnings.push(warning);
        }

        tracing::info!("Disk {}: wrote {}", disk, output_path.display());
        report_progress(ConvertEvent::DiskDone {
            disk,
            output: output_path.clone(),
        });
        report.outputs.push(output_path);
    }

    // Phase 4: Cleanup
    let root_path = root.path().to_path_buf();
    if let Err(e) = root.close() {
        let warning = format!(
            "could not remove extraction directory {}: {}",
            root_path.display(),
            e
        );
        tracing::warn!("{}", warning);
        report_progress(ConvertEvent::Warning(warning.clone()));
        report.warnings.push(warning);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_options_default() {
        let options = ConvertOptions::default();
        assert_eq!(options.ref_prefix, "Ref:");
        assert_eq!(options.selection, DiskSelection::All);
        assert_eq!(options.format, TargetFormat::Qcow2);
        assert_eq!(options.work_dir, None);
        assert_eq!(options.holes, HoleStrategy::Seek);
    }

    #[test]
    fn test_convert_options_new() {
        let options = ConvertOptions::new("Ref:9", TargetFormat::Vmdk);
        assert_eq!(options.ref_prefix, "Ref:9");
        assert_eq!(options.format, TargetFormat::Vmdk);
        assert_eq!(options.selection, DiskSelection::All);
    }

    #[test]
    fn test_output_single_disk() {
        let target = OutputTarget::new(Path::new("/out/web.qcow2"), TargetFormat::Qcow2);
        assert_eq!(target.path_for(0, 1), PathBuf::from("/out/web.qcow2"));
    }

    #[test]
    fn test_output_extension_replaced() {
        let target = OutputTarget::new(Path::new("/out/web.img"), TargetFormat::Qcow2);
        assert_eq!(target.path_for(0, 1), PathBuf::from("/out/web.qcow2"));

        let target = OutputTarget::new(Path::new("web"), TargetFormat::Vpc);
        assert_eq!(target.path_for(0, 1), PathBuf::from("web.vhd"));
    }

    #[test]
    fn test_output_multi_disk_suffix() {
        let target = OutputTarget::new(Path::new("/out/web.qcow2"), TargetFormat::Qcow2);
        assert_eq!(target.path_for(0, 2), PathBuf::from("/out/web-disk0.qcow2"));
        assert_eq!(target.path_for(1, 2), PathBuf::from("/out/web-disk1.qcow2"));
        assert_eq!(target.base(), Path::new("/out/web"));
    }
}
