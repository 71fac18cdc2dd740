use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use image::DynamicImage;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, info, warn};
use rayon::prelude::*;

use crate::bag_reader::{BagReader, LineWarning};
use crate::camera::{resolve_intrinsics, resolve_pose, CameraIntrinsics};
use crate::config::{ExtractConfig, OutputImageFormat};
use crate::error::{CameraError, FrameError, PipelineError, TransformError};
use crate::frame_decoder::{decode_frame, DecodedFrame};
use crate::nerfstudio::{CoordinateConverter, Frame, NerfStudioBuilder, NerfStudioTransforms, TransformMatrix};
use crate::record::{IntrinsicsSnapshot, Payload, PoseSnapshot, Record, Stamp, TopicKind};

/// Bags found in one capture directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSession {
    pub pose_bag: PathBuf,
    pub intrinsics_bag: PathBuf,
    /// `(camera name, image bag)`, sorted by name.
    pub camera_bags: Vec<(String, PathBuf)>,
}

impl CaptureSession {
    /// Classifies the bags of `input_dir` by file stem.
    pub fn discover(input_dir: &Path, config: &ExtractConfig) -> Result<Self, PipelineError> {
        let input_error = |source: io::Error| PipelineError::InputDirectory {
            path: input_dir.to_path_buf(),
            source,
        };

        let mut bags = Vec::new();
        for entry in fs::read_dir(input_dir).map_err(input_error)? {
            let path = entry.map_err(input_error)?.path();
            let is_bag = path
                .extension()
                .is_some_and(|ext| ext.to_string_lossy() == config.bag_extension);
            if path.is_file() && is_bag {
                bags.push(path);
            }
        }
        bags.sort();

        let mut pose_bag = None;
        let mut intrinsics_bag = None;
        let mut camera_bags = Vec::new();

        for path in bags {
            let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };
            if stem == config.pose_topic {
                pose_bag = Some(path);
            } else if stem == config.intrinsics_topic {
                intrinsics_bag = Some(path);
            } else if config.selects(&stem) {
                camera_bags.push((stem, path));
            } else {
                debug!("camera `{stem}` not selected, skipping");
            }
        }

        let expected = |topic: &str| input_dir.join(format!("{topic}.{}", config.bag_extension));
        Ok(Self {
            pose_bag: pose_bag.ok_or_else(|| PipelineError::SnapshotMissing {
                kind: "pose",
                path: expected(&config.pose_topic),
            })?,
            intrinsics_bag: intrinsics_bag.ok_or_else(|| PipelineError::SnapshotMissing {
                kind: "intrinsics",
                path: expected(&config.intrinsics_topic),
            })?,
            camera_bags,
        })
    }
}

/// Image frame that did not make it into the dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedFrame {
    pub camera: String,
    pub stamp: Stamp,
    pub seq: u64,
    pub reason: FrameError,
}

/// Camera left out of the manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct ExcludedCamera {
    pub name: String,
    pub reason: CameraError,
}

/// Everything that happened during one run, for the final summary.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Cameras that were processed, sorted by name.
    pub cameras: Vec<String>,
    pub excluded: Vec<ExcludedCamera>,
    pub skipped_lines: Vec<LineWarning>,
    pub dropped_frames: Vec<DroppedFrame>,
    pub frames_written: usize,
    /// Set only when the manifest was written.
    pub manifest_path: Option<PathBuf>,
}

impl RunReport {
    /// True when every camera contributed at least one frame and the manifest exists.
    pub fn is_success(&self) -> bool {
        self.excluded.is_empty() && self.manifest_path.is_some()
    }
}

/// A camera whose geometry is resolved and whose frames are ready to extract.
#[derive(Debug, Clone)]
struct CameraJob {
    name: String,
    bag: PathBuf,
    intrinsics: CameraIntrinsics,
    transform: TransformMatrix,
}

#[derive(Debug)]
struct CameraOutcome {
    name: String,
    frames: Vec<(Stamp, Frame)>,
    skipped_lines: Vec<LineWarning>,
    dropped: Vec<DroppedFrame>,
}

/// Turns one capture directory into a NeRFStudio dataset.
pub struct DatasetAssembler {
    input_dir: PathBuf,
    output_dir: PathBuf,
    config: ExtractConfig,
}

impl DatasetAssembler {
    pub fn new(input_dir: PathBuf, output_dir: PathBuf, config: ExtractConfig) -> Self {
        Self {
            input_dir,
            output_dir,
            config,
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.output_dir.join(&self.config.manifest_name)
    }

    /// Runs the whole extraction.
    ///
    /// Per-line and per-camera problems end up in the returned report; only
    /// fatal conditions are returned as errors, and in that case no manifest
    /// is written.
    pub fn run(&self) -> Result<RunReport, PipelineError> {
        self.config.validate()?;
        let session = CaptureSession::discover(&self.input_dir, &self.config)?;
        info!(
            "found {} camera bag(s) in {}",
            session.camera_bags.len(),
            self.input_dir.display()
        );

        let mut report = RunReport {
            cameras: session.camera_bags.iter().map(|(name, _)| name.clone()).collect(),
            ..Default::default()
        };

        let poses = load_pose_snapshot(&session.pose_bag, &mut report)?;
        let intrinsics = load_intrinsics_snapshot(&session.intrinsics_bag, &mut report)?;

        // Geometry is resolved for every camera before any frame is written,
        // so a fatal pose aborts with an untouched output directory.
        let mut jobs = Vec::new();
        for (name, bag) in &session.camera_bags {
            match self.resolve_camera(name, bag, &poses, &intrinsics) {
                Ok(job) => jobs.push(job),
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    error!("excluding camera `{name}`: {e}");
                    report.excluded.push(ExcludedCamera {
                        name: name.clone(),
                        reason: e,
                    });
                }
            }
        }

        let images_dir = self.prepare_output()?;

        let outcomes = self.extract_all(&jobs, &images_dir)?;

        let mut builder = NerfStudioBuilder::new();
        for outcome in outcomes {
            report.skipped_lines.extend(outcome.skipped_lines);
            report.dropped_frames.extend(outcome.dropped);

            if outcome.frames.is_empty() {
                error!("excluding camera `{}`: no frames decoded", outcome.name);
                report.excluded.push(ExcludedCamera {
                    reason: CameraError::NoFrames(outcome.name.clone()),
                    name: outcome.name,
                });
                continue;
            }

            info!("camera `{}`: {} frame(s)", outcome.name, outcome.frames.len());
            report.frames_written += outcome.frames.len();
            for (_, frame) in outcome.frames {
                builder = builder.add_frame(frame);
            }
        }
        report.excluded.sort_by(|a, b| a.name.cmp(&b.name));

        if report.frames_written == 0 {
            warn!("no frames decoded from any camera, not writing a manifest");
            return Ok(report);
        }

        let manifest_path = self.write_manifest(&builder.build())?;
        report.manifest_path = Some(manifest_path);
        Ok(report)
    }

    fn resolve_camera(
        &self,
        name: &str,
        bag: &Path,
        poses: &PoseSnapshot,
        intrinsics: &IntrinsicsSnapshot,
    ) -> Result<CameraJob, CameraError> {
        let pose = resolve_pose(poses, name)?;
        let transform = CoordinateConverter::camera_to_world(pose.position(), pose.orientation(), self.config.convention)
            .map_err(|e| match e {
                TransformError::DegenerateOrientation { norm } => CameraError::DegenerateOrientation {
                    camera: name.to_string(),
                    norm,
                },
            })?;
        let intrinsics = resolve_intrinsics(intrinsics, name)?;
        debug!("camera `{name}`: transform {:?}", transform.to_rows());

        Ok(CameraJob {
            name: name.to_string(),
            bag: bag.to_path_buf(),
            intrinsics,
            transform,
        })
    }

    /// Creates the output tree once and removes a manifest left by an earlier run.
    fn prepare_output(&self) -> Result<PathBuf, PipelineError> {
        let images_dir = self.output_dir.join(&self.config.images_dir);
        fs::create_dir_all(&images_dir).map_err(|source| PipelineError::OutputDirectory {
            path: images_dir.clone(),
            source,
        })?;

        let manifest = self.manifest_path();
        match fs::remove_file(&manifest) {
            Ok(()) => info!("removed stale manifest {}", manifest.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(PipelineError::OutputDirectory {
                    path: manifest,
                    source,
                })
            }
        }

        Ok(images_dir)
    }

    fn extract_all(&self, jobs: &[CameraJob], images_dir: &Path) -> Result<Vec<CameraOutcome>, PipelineError> {
        let progress = if self.config.progress {
            ProgressBar::new(jobs.len() as u64)
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) =
            ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            progress.set_style(style.progress_chars("#>-"));
        }

        let extract = || -> Result<Vec<CameraOutcome>, PipelineError> {
            jobs.par_iter()
                .map(|job| {
                    let outcome = self.extract_camera(job, images_dir);
                    progress.set_message(format!("{} done", job.name));
                    progress.inc(1);
                    outcome
                })
                .collect()
        };

        let outcomes = if self.config.threads > 0 {
            rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.threads)
                .build()?
                .install(extract)
        } else {
            extract()
        };

        progress.finish_and_clear();
        outcomes
    }

    fn extract_camera(&self, job: &CameraJob, images_dir: &Path) -> Result<CameraOutcome, PipelineError> {
        let mut reader = BagReader::open(&job.bag, TopicKind::Image).map_err(|source| PipelineError::BagOpen {
            path: job.bag.clone(),
            source,
        })?;

        let format = self.config.image_format;
        let mut names = HashSet::new();
        let mut frames = Vec::new();
        let mut dropped = Vec::new();

        for (index, record) in reader.by_ref().enumerate() {
            if index % self.config.frame_stride != 0 {
                continue;
            }
            if self
                .config
                .max_frames_per_camera
                .is_some_and(|max| frames.len() >= max)
            {
                break;
            }

            let Record { header, payload, .. } = record;
            let Payload::Image(image) = payload else {
                continue;
            };

            let mut drop_frame = |reason: FrameError| {
                warn!("camera `{}`: dropping frame seq {}: {reason}", job.name, header.seq);
                dropped.push(DroppedFrame {
                    camera: job.name.clone(),
                    stamp: header.stamp,
                    seq: header.seq,
                    reason,
                });
            };

            let file_name = frame_file_name(&job.name, header.stamp, format);
            if names.contains(&file_name) {
                drop_frame(FrameError::DuplicateTimestamp(file_name));
                continue;
            }

            let decoded = match decode_frame(&image) {
                Ok(decoded) => decoded,
                Err(e) => {
                    drop_frame(e);
                    continue;
                }
            };

            write_frame(&decoded, &images_dir.join(&file_name), format)?;
            let relative = format!("{}/{}", self.config.images_dir, file_name);
            frames.push((header.stamp, Frame::new(relative, job.transform, &job.intrinsics)));
            names.insert(file_name);
        }

        frames.sort_by_key(|(stamp, _)| *stamp);
        Ok(CameraOutcome {
            name: job.name.clone(),
            frames,
            skipped_lines: reader.into_warnings(),
            dropped,
        })
    }

    /// Writes through a temporary file so a reader never sees a partial manifest.
    fn write_manifest(&self, transforms: &NerfStudioTransforms) -> Result<PathBuf, PipelineError> {
        let path = self.manifest_path();
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(transforms)?;

        let output_error = |target: &Path| {
            let target = target.to_path_buf();
            move |source: io::Error| PipelineError::OutputDirectory { path: target, source }
        };
        fs::write(&tmp, json).map_err(output_error(&tmp))?;
        fs::rename(&tmp, &path).map_err(output_error(&path))?;

        info!("wrote {} with {} frame(s)", path.display(), transforms.frames.len());
        Ok(path)
    }
}

fn load_pose_snapshot(path: &Path, report: &mut RunReport) -> Result<PoseSnapshot, PipelineError> {
    match first_record(path, TopicKind::PoseSnapshot, report)?.map(|(_, r)| r.payload) {
        Some(Payload::Poses(snapshot)) => Ok(snapshot),
        _ => Err(PipelineError::EmptySnapshot {
            kind: "pose",
            path: path.to_path_buf(),
        }),
    }
}

fn load_intrinsics_snapshot(path: &Path, report: &mut RunReport) -> Result<IntrinsicsSnapshot, PipelineError> {
    match first_record(path, TopicKind::IntrinsicsSnapshot, report)? {
        Some((line, Record {
            payload: Payload::Intrinsics(mut snapshot),
            ..
        })) => {
            report
                .skipped_lines
                .extend(snapshot.rejected.drain(..).map(|reason| LineWarning {
                    path: path.to_path_buf(),
                    line,
                    reason,
                }));
            Ok(snapshot)
        }
        _ => Err(PipelineError::EmptySnapshot {
            kind: "intrinsics",
            path: path.to_path_buf(),
        }),
    }
}

/// Snapshots are captured once; only the first valid record matters.
/// Returns it with its line number.
fn first_record(
    path: &Path,
    kind: TopicKind,
    report: &mut RunReport,
) -> Result<Option<(usize, Record)>, PipelineError> {
    let mut reader = BagReader::open(path, kind).map_err(|source| PipelineError::BagOpen {
        path: path.to_path_buf(),
        source,
    })?;
    let record = reader.next().map(|record| (reader.line(), record));
    report.skipped_lines.extend(reader.into_warnings());
    Ok(record)
}

/// `frame_<camera>_<sec>.<nsec>.<ext>`
pub fn frame_file_name(camera: &str, stamp: Stamp, format: OutputImageFormat) -> String {
    format!("frame_{camera}_{stamp}.{}", format.extension())
}

/// Encodes one frame. JPEG has no alpha or 16-bit support, so those frames
/// are reduced to 8-bit RGB or luma first.
pub fn write_frame(frame: &DecodedFrame, path: &Path, format: OutputImageFormat) -> Result<(), PipelineError> {
    let image = frame
        .to_dynamic_image()
        .map_err(|source| PipelineError::FrameConversion {
            path: path.to_path_buf(),
            source,
        })?;
    let image = match format {
        OutputImageFormat::Jpg if frame.layout.has_alpha() || frame.layout.is_16bit() => {
            if frame.layout.channels() == 1 {
                DynamicImage::ImageLuma8(image.to_luma8())
            } else {
                DynamicImage::ImageRgb8(image.to_rgb8())
            }
        }
        _ => image,
    };

    image
        .save_with_format(path, format.image_format())
        .map_err(|source| PipelineError::ImageWrite {
            path: path.to_path_buf(),
            source,
        })
}

/// Runs the assembler with `config` and returns its report.
pub fn build_dataset(input_dir: &Path, output_dir: &Path, config: ExtractConfig) -> Result<RunReport, PipelineError> {
    let assembler = DatasetAssembler::new(input_dir.to_path_buf(), output_dir.to_path_buf(), config);
    assembler.run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_decoder::ChannelLayout;

    #[test]
    fn frame_names_are_deterministic() {
        let name = frame_file_name("camera1", Stamp::new(12, 5_000_000), OutputImageFormat::Jpg);
        assert_eq!(name, "frame_camera1_12.005000000.jpg");
        assert_eq!(
            frame_file_name("camera1", Stamp::new(12, 5_000_000), OutputImageFormat::Png),
            "frame_camera1_12.005000000.png"
        );
    }

    #[test]
    fn discovery_classifies_bags() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["info.bag", "camera_info.bag", "camera2.bag", "camera1.bag", "notes.txt"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        fs::create_dir(dir.path().join("nested.bag")).unwrap();

        let session = CaptureSession::discover(dir.path(), &ExtractConfig::default()).unwrap();
        assert_eq!(session.pose_bag, dir.path().join("info.bag"));
        assert_eq!(session.intrinsics_bag, dir.path().join("camera_info.bag"));
        let names: Vec<&str> = session.camera_bags.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["camera1", "camera2"]);

        let config = ExtractConfig {
            cameras: vec!["camera2".into()],
            ..Default::default()
        };
        let session = CaptureSession::discover(dir.path(), &config).unwrap();
        assert_eq!(session.camera_bags.len(), 1);
    }

    #[test]
    fn discovery_requires_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("camera_info.bag"), "").unwrap();
        let err = CaptureSession::discover(dir.path(), &ExtractConfig::default()).unwrap_err();
        assert!(matches!(err, PipelineError::SnapshotMissing { kind: "pose", .. }));

        let err = CaptureSession::discover(&dir.path().join("missing"), &ExtractConfig::default()).unwrap_err();
        assert!(matches!(err, PipelineError::InputDirectory { .. }));
    }

    #[test]
    fn jpeg_drops_alpha_and_depth() {
        let dir = tempfile::tempdir().unwrap();
        let rgba = DecodedFrame {
            width: 2,
            height: 2,
            layout: ChannelLayout::Rgba8,
            pixels: vec![10; 16],
        };
        let path = dir.path().join("rgba.jpg");
        write_frame(&rgba, &path, OutputImageFormat::Jpg).unwrap();
        assert_eq!(image::open(&path).unwrap().color(), image::ColorType::Rgb8);

        let luma16 = DecodedFrame {
            width: 2,
            height: 1,
            layout: ChannelLayout::Luma16,
            pixels: vec![0, 1, 0, 2],
        };
        let path = dir.path().join("depth.png");
        write_frame(&luma16, &path, OutputImageFormat::Png).unwrap();
        assert_eq!(image::open(&path).unwrap().color(), image::ColorType::L16);
    }

    #[test]
    fn inconsistent_frame_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let short = DecodedFrame {
            width: 4,
            height: 4,
            layout: ChannelLayout::Rgb8,
            pixels: vec![200; 5],
        };
        let path = dir.path().join("short.png");
        let err = write_frame(&short, &path, OutputImageFormat::Png).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::FrameConversion {
                source: FrameError::MalformedFrame { expected: 48, actual: 5 },
                ..
            }
        ));
        assert!(!path.exists());
    }

    #[test]
    fn invalid_config_is_rejected_before_output() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        fs::write(output.path().join("transforms.json"), "{}").unwrap();

        let config = ExtractConfig {
            frame_stride: 0,
            ..Default::default()
        };
        let err = build_dataset(input.path(), output.path(), config).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
        assert!(output.path().join("transforms.json").exists());
        assert!(!output.path().join("images").exists());
    }
}
