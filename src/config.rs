use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::nerfstudio::AxisConvention;

/// Encoding of extracted frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputImageFormat {
    #[default]
    Jpg,
    Png,
}

impl OutputImageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpg => "jpg",
            Self::Png => "png",
        }
    }

    pub fn image_format(&self) -> image::ImageFormat {
        match self {
            Self::Jpg => image::ImageFormat::Jpeg,
            Self::Png => image::ImageFormat::Png,
        }
    }
}

/// Settings for one extraction run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExtractConfig {
    /// Bag stem holding the pose snapshot
    pub pose_topic: String,

    /// Bag stem holding the intrinsics snapshot
    pub intrinsics_topic: String,

    /// Extension of bag files in the input directory
    pub bag_extension: String,

    /// Subdirectory of the output directory receiving frames
    pub images_dir: String,

    /// Manifest file name
    pub manifest_name: String,

    pub image_format: OutputImageFormat,

    /// Keep every Nth valid image record
    pub frame_stride: usize,

    /// Upper bound on frames per camera
    pub max_frames_per_camera: Option<usize>,

    pub convention: AxisConvention,

    /// Only process these cameras; empty means all
    pub cameras: Vec<String>,

    /// Rayon worker threads, 0 for rayon's default
    pub threads: usize,

    /// Draw progress bars
    pub progress: bool,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            pose_topic: "info".to_string(),
            intrinsics_topic: "camera_info".to_string(),
            bag_extension: "bag".to_string(),
            images_dir: "images".to_string(),
            manifest_name: "transforms.json".to_string(),
            image_format: OutputImageFormat::Jpg,
            frame_stride: 1,
            max_frames_per_camera: None,
            convention: AxisConvention::Passthrough,
            cameras: Vec::new(),
            threads: 0,
            progress: false,
        }
    }
}

impl ExtractConfig {
    /// Loads a YAML config file. Missing keys keep their defaults.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the extractor cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| -> Result<(), ConfigError> { Err(ConfigError(reason)) };
        if self.frame_stride == 0 {
            return invalid("frame_stride must be at least 1".into());
        }
        if self.max_frames_per_camera == Some(0) {
            return invalid("max_frames_per_camera must be at least 1".into());
        }
        if self.pose_topic == self.intrinsics_topic {
            return invalid(format!(
                "pose_topic and intrinsics_topic must differ (both are {:?})",
                self.pose_topic
            ));
        }
        if self.images_dir.is_empty() || Path::new(&self.images_dir).is_absolute() {
            return invalid("images_dir must be a non-empty relative path".into());
        }
        if self.manifest_name.is_empty() || self.manifest_name.contains(['/', '\\']) {
            return invalid("manifest_name must be a plain file name".into());
        }
        Ok(())
    }

    /// Whether `camera` passes the allow-list.
    pub fn selects(&self, camera: &str) -> bool {
        self.cameras.is_empty() || self.cameras.iter().any(|c| c == camera)
    }
}
