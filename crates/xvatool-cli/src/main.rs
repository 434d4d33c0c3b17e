//! XVATool CLI - Convert XenServer XVA exports to disk images.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::Level;
use xvatool_core::converter::DEFAULT_QEMU_IMG;
use xvatool_core::locate::normalize_prefix;
use xvatool_core::{
    convert_xva, ConvertEvent, ConvertOptions, DiskSelection, HoleStrategy, QemuImg,
    ReassemblyEvent, TargetFormat,
};

/// Convert XenServer / XCP-ng XVA exports into qcow2 and other disk images.
#[derive(Parser)]
#[command(name = "xvatool")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the XVA file.
    #[arg(short = 'x', long = "xva")]
    xva_file: PathBuf,

    /// Output image path. With several disks, used as a prefix.
    #[arg(short, long)]
    output: PathBuf,

    /// Name or prefix of the block directory (default: auto-detect "Ref:").
    #[arg(short = 'r', long = "ref")]
    ref_dir: Option<String>,

    /// Output image format.
    #[arg(short, long, value_enum, default_value = "qcow2")]
    format: FormatArg,

    /// Convert only the first matching disk.
    #[arg(long)]
    first_only: bool,

    /// Directory for the extracted archive and temporary raw images.
    /// Defaults to the directory holding the XVA.
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// qemu-img binary to use for the final conversion.
    #[arg(long, default_value = DEFAULT_QEMU_IMG)]
    qemu_img: PathBuf,

    /// Write zeros for missing blocks instead of leaving sparse holes.
    #[arg(long)]
    zero_fill: bool,

    /// Suppress progress output.
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Print debug logging.
    #[arg(short, long)]
    verbose: bool,
}

/// Output format argument mapping.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    /// QEMU copy-on-write v2 (.qcow2).
    Qcow2,
    /// VMware (.vmdk).
    Vmdk,
    /// VirtualBox (.vdi).
    Vdi,
    /// Hyper-V (.vhdx).
    Vhdx,
    /// Virtual PC (.vhd).
    Vpc,
    /// Raw image (.img).
    Raw,
}

impl From<FormatArg> for TargetFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Qcow2 => TargetFormat::Qcow2,
            FormatArg::Vmdk => TargetFormat::Vmdk,
            FormatArg::Vdi => TargetFormat::Vdi,
            FormatArg::Vhdx => TargetFormat::Vhdx,
            FormatArg::Vpc => TargetFormat::Vpc,
            FormatArg::Raw => TargetFormat::Raw,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match run_convert(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run_convert(cli: &Cli) -> Result<()> {
    let options = ConvertOptions {
        ref_prefix: normalize_prefix(cli.ref_dir.as_deref()),
        selection: if cli.first_only {
            DiskSelection::First
        } else {
            DiskSelection::All
        },
        format: cli.format.into(),
        work_dir: cli.work_dir.clone(),
        holes: if cli.zero_fill {
            HoleStrategy::ZeroFill
        } else {
            HoleStrategy::Seek
        },
    };
    let converter = QemuImg::new(&cli.qemu_img).show_progress(!cli.quiet);

    if !cli.quiet {
        println!("XVA Conversion");
        println!("--------------");
        println!("Input:     {}", cli.xva_file.display());
        println!("Output:    {}", cli.output.display());
        println!("Format:    {}", options.format);
        println!("Disks:     {}*", options.ref_prefix);
        println!();
    }

    let callback: Option<xvatool_core::ProgressCallback> = if cli.quiet {
        None
    } else {
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} MiB ({per_sec}, {eta})")?
            .progress_chars("#>-");
        let current: Arc<Mutex<Option<ProgressBar>>> = Arc::new(Mutex::new(None));
        Some(Box::new(move |event: ConvertEvent| {
            report_event(event, &style, &current)
        }))
    };

    let report = convert_xva(&cli.xva_file, &cli.output, &options, &converter, callback)?;

    if !cli.quiet {
        println!();
        for output in &report.outputs {
            println!("Image written: {}", output.display());
            if let Ok(metadata) = std::fs::metadata(output) {
                println!("  size on disk: {}", format_bytes(metadata.len()));
            }
        }
        if !report.warnings.is_empty() {
            println!("Completed with {} warning(s).", report.warnings.len());
        }
    }

    Ok(())
}

/// Render one progress event to the terminal.
fn report_event(event: ConvertEvent, style: &ProgressStyle, current: &Mutex<Option<ProgressBar>>) {
    let Ok(mut bar) = current.lock() else {
        return;
    };

    match event {
        ConvertEvent::Extracting { archive, root } => {
            println!("Extracting {} to {}", archive.display(), root.display());
        }
        ConvertEvent::Extracted(stats) => {
            println!(
                "Extracted {} files ({})",
                stats.files,
                format_bytes(stats.bytes)
            );
        }
        ConvertEvent::DisksFound { count } => {
            println!("Found {} disk(s)", count);
        }
        ConvertEvent::Reassembly {
            disk,
            total_disks,
            event,
        } => match event {
            ReassemblyEvent::Started {
                total_blocks,
                image_size,
            } => {
                println!(
                    "Disk {}/{}: joining {} blocks ({})",
                    disk + 1,
                    total_disks,
                    total_blocks,
                    format_bytes(image_size)
                );
                let pb = ProgressBar::new(total_blocks);
                pb.set_style(style.clone());
                *bar = Some(pb);
            }
            ReassemblyEvent::Block { done, .. } => {
                if let Some(pb) = bar.as_ref() {
                    pb.set_position(done);
                }
            }
            ReassemblyEvent::Milestone { gib } => {
                if let Some(pb) = bar.as_ref() {
                    pb.println(format!("Processed {} GiB...", gib));
                }
            }
            ReassemblyEvent::Finished(summary) => {
                if let Some(pb) = bar.take() {
                    pb.finish_and_clear();
                }
                println!(
                    "Raw image created: {} blocks copied, {} sparse",
                    summary.present_blocks, summary.missing_blocks
                );
            }
        },
        ConvertEvent::Converting { disk, output, .. } => {
            println!("Disk {}: converting to {} ...", disk, output.display());
        }
        ConvertEvent::Warning(message) => print_warning(bar.as_ref(), &message),
        ConvertEvent::DiskDone { .. } => {}
    }
}

/// Format a byte count with binary units, matching the MiB block counts and
/// GiB milestones shown elsewhere.
fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}

/// Print a warning without tearing the active progress bar.
fn print_warning(bar: Option<&ProgressBar>, message: &str) {
    match bar {
        Some(pb) => pb.println(format!("warning: {}", message)),
        None => eprintln!("warning: {}", message),
    }
}
