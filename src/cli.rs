use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;

use crate::config::{ExtractConfig, OutputImageFormat};
use crate::dataset::{DatasetAssembler, RunReport};
use crate::nerfstudio::AxisConvention;

#[derive(Parser, Debug)]
#[command(name = "bag2nerf")]
#[command(version)]
#[command(about = "Convert multi-camera capture bags into a NeRFStudio dataset", long_about = None)]
pub struct Args {
    /// Input folder containing one capture session's bag files
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output folder for images and transforms.json
    #[arg(short, long)]
    pub output: PathBuf,

    /// YAML file with extraction settings; flags below override it
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Bag stem of the pose snapshot
    #[arg(long)]
    pub pose_topic: Option<String>,

    /// Bag stem of the intrinsics snapshot
    #[arg(long)]
    pub intrinsics_topic: Option<String>,

    /// Bag file extension
    #[arg(long)]
    pub extension: Option<String>,

    /// Encoding of extracted frames
    #[arg(long, value_enum)]
    pub image_format: Option<OutputImageFormat>,

    /// Keep every Nth image record of each camera
    #[arg(short = 's', long)]
    pub stride: Option<usize>,

    /// Maximum number of frames per camera
    #[arg(short = 'n', long)]
    pub max_frames: Option<usize>,

    /// Camera axis convention of the captured poses
    #[arg(long, value_enum)]
    pub convention: Option<AxisConvention>,

    /// Only process this camera (repeatable)
    #[arg(long = "camera")]
    pub cameras: Vec<String>,

    /// Number of worker threads (0 = one per core)
    #[arg(short = 't', long)]
    pub threads: Option<usize>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Hide progress bars
    #[arg(long)]
    pub no_progress: bool,
}

impl Args {
    /// Config file values with command-line overrides applied.
    pub fn to_config(&self) -> Result<ExtractConfig> {
        let mut config = match &self.config {
            Some(path) => ExtractConfig::from_yaml_file(path)?,
            None => ExtractConfig::default(),
        };

        if let Some(topic) = &self.pose_topic {
            config.pose_topic = topic.clone();
        }
        if let Some(topic) = &self.intrinsics_topic {
            config.intrinsics_topic = topic.clone();
        }
        if let Some(extension) = &self.extension {
            config.bag_extension = extension.trim_start_matches('.').to_string();
        }
        if let Some(format) = self.image_format {
            config.image_format = format;
        }
        if let Some(stride) = self.stride {
            config.frame_stride = stride;
        }
        if let Some(max) = self.max_frames {
            config.max_frames_per_camera = Some(max);
        }
        if let Some(convention) = self.convention {
            config.convention = convention;
        }
        if !self.cameras.is_empty() {
            config.cameras = self.cameras.clone();
        }
        if let Some(threads) = self.threads {
            config.threads = threads;
        }
        config.progress = !self.no_progress;

        config.validate().context("Invalid extraction settings")?;
        Ok(config)
    }
}

/// `info` by default, `debug` with `--verbose`; `RUST_LOG` wins over both.
pub fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Runs one extraction and prints the end-of-run summary.
pub fn run(args: &Args) -> Result<RunReport> {
    let config = args.to_config()?;

    println!("🚀 bag2nerf");
    println!("==========\n");
    println!("📁 Input:  {}", args.input.display());
    println!("📁 Output: {}", args.output.display());
    println!("🧭 Convention: {}", config.convention);

    let start_time = Instant::now();
    let assembler = DatasetAssembler::new(args.input.clone(), args.output.clone(), config);
    let report = assembler
        .run()
        .with_context(|| format!("Failed to build dataset from {}", args.input.display()))?;

    print_summary(&report);
    println!("\n⏱️  Finished in {:.2}s", start_time.elapsed().as_secs_f32());

    Ok(report)
}

pub fn print_summary(report: &RunReport) {
    println!("\n📊 Summary:");
    println!("   Cameras: {}", report.cameras.len());
    println!("   Frames written: {}", report.frames_written);
    println!("   Skipped lines: {}", report.skipped_lines.len());
    println!("   Dropped frames: {}", report.dropped_frames.len());

    if !report.excluded.is_empty() {
        println!("\n⚠️  Excluded cameras:");
        for excluded in &report.excluded {
            println!("   • {}: {}", excluded.name, excluded.reason);
        }
    }

    match &report.manifest_path {
        Some(path) => println!("\n✅ Manifest written to {}", path.display()),
        None => println!("\n❌ No frames decoded, manifest not written"),
    }
}
