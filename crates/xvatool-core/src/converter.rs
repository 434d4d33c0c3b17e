//! Raw-to-target image conversion.
//!
//! Writing qcow2, VMDK and friends is left to `qemu-img`. The
//! [`ImageConverter`] trait is the seam between the conversion driver and
//! that external process, so tests can substitute an in-process converter.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Error, Result};

/// Default converter program, resolved through `PATH`.
pub const DEFAULT_QEMU_IMG: &str = "qemu-img";

/// Output disk image format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetFormat {
    /// QEMU copy-on-write v2.
    #[default]
    Qcow2,
    /// VMware virtual disk.
    Vmdk,
    /// VirtualBox disk image.
    Vdi,
    /// Hyper-V v2 virtual hard disk.
    Vhdx,
    /// Legacy Virtual PC / Hyper-V disk (`.vhd`).
    Vpc,
    /// Plain raw image.
    Raw,
}

impl TargetFormat {
    /// Format identifier passed to `qemu-img -O`.
    pub fn format_name(self) -> &'static str {
        match self {
            TargetFormat::Qcow2 => "qcow2",
            TargetFormat::Vmdk => "vmdk",
            TargetFormat::Vdi => "vdi",
            TargetFormat::Vhdx => "vhdx",
            TargetFormat::Vpc => "vpc",
            TargetFormat::Raw => "raw",
        }
    }

    /// Canonical file extension, without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            TargetFormat::Qcow2 => "qcow2",
            TargetFormat::Vmdk => "vmdk",
            TargetFormat::Vdi => "vdi",
            TargetFormat::Vhdx => "vhdx",
            TargetFormat::Vpc => "vhd",
            TargetFormat::Raw => "img",
        }
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.format_name())
    }
}

/// Converts a raw disk image into a target format.
pub trait ImageConverter {
    /// Convert the raw image at `raw` into `output` using `format`.
    fn convert(&self, raw: &Path, output: &Path, format: TargetFormat) -> Result<()>;
}

/// Converter backed by the `qemu-img` command line tool.
#[derive(Debug, Clone)]
pub struct QemuImg {
    program: PathBuf,
    show_progress: bool,
}

impl Default for QemuImg {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_QEMU_IMG),
            show_progress: true,
        }
    }
}

impl QemuImg {
    /// Use a specific `qemu-img` binary.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Whether to pass `-p` so qemu-img prints its own progress.
    pub fn show_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Program that will be executed.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Build the command line for one conversion.
    pub fn command(&self, raw: &Path, output: &Path, format: TargetFormat) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("convert");
        if self.show_progress {
            cmd.arg("-p");
        }
        cmd.args(["-f", "raw", "-O", format.format_name()])
            .arg(raw)
            .arg(output);
        cmd
    }
}

impl ImageConverter for QemuImg {
    fn convert(&self, raw: &Path, output: &Path, format: TargetFormat) -> Result<()> {
        tracing::info!(
            "Converting {} to {} ({})",
            raw.display(),
            output.display(),
            format
        );

        // stdout/stderr are inherited so qemu-img's progress reaches the user.
        let status = self.command(raw, output, format).status().map_err(|e| {
            Error::external_tool(format!(
                "failed to launch '{}': {}",
                self.program.display(),
                e
            ))
        })?;

        if !status.success() {
            return Err(Error::external_tool(format!(
                "'{}' exited with {}",
                self.program.display(),
                status
            )));
        }
        Ok(())
    }
}
