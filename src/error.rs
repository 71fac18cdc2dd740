//! Error types for the bag-to-dataset pipeline.
//!
//! Errors are grouped by how far they propagate: a [`RecordError`] or
//! [`FrameError`] costs one line, a [`CameraError`] costs one camera unless
//! [`CameraError::is_fatal`] says otherwise, and a [`PipelineError`] aborts
//! the run before any manifest is written.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A single bag line that could not be turned into a typed record.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("invalid base64 image data: {0}")]
    Base64(#[from] base64::DecodeError),
}

impl RecordError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

/// A single image frame that was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("unsupported pixel format `{0}`")]
    UnsupportedPixelFormat(String),

    /// Buffer length does not match width, height and pixel format.
    #[error("malformed frame: expected {expected} bytes, got {actual}")]
    MalformedFrame { expected: usize, actual: usize },

    #[error("duplicate capture timestamp for `{0}`")]
    DuplicateTimestamp(String),
}

/// A camera that could not contribute to the dataset.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CameraError {
    #[error("no pose found for camera `{0}`")]
    CameraPoseMissing(String),

    /// Neither a named nor a shared intrinsics entry.
    #[error("no intrinsics found for camera `{0}`")]
    CameraIntrinsicsMissing(String),

    /// `field` is `position` or `orientation`.
    #[error("pose of camera `{camera}` has no `{field}`")]
    IncompletePose { camera: String, field: &'static str },

    #[error("degenerate orientation for camera `{camera}` (quaternion norm {norm})")]
    DegenerateOrientation { camera: String, norm: f64 },

    #[error("no frames decoded for camera `{0}`")]
    NoFrames(String),
}

impl CameraError {
    /// Whether this error aborts the whole run instead of excluding one camera.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::IncompletePose { .. } | Self::DegenerateOrientation { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum TransformError {
    #[error("quaternion norm {norm} cannot be normalized")]
    DegenerateOrientation { norm: f64 },
}

/// Rejected extraction settings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(pub String);

/// Errors that abort a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),

    #[error("cannot read input directory {path}: {source}")]
    InputDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot write output directory {path}: {source}")]
    OutputDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// `kind` is `pose` or `intrinsics`.
    #[error("{kind} snapshot not found: expected {path}")]
    SnapshotMissing { kind: &'static str, path: PathBuf },

    #[error("{kind} snapshot {path} contains no valid record")]
    EmptySnapshot { kind: &'static str, path: PathBuf },

    #[error("cannot open bag {path}: {source}")]
    BagOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The frame buffer does not describe a complete image.
    #[error("cannot convert frame for {path}: {source}")]
    FrameConversion {
        path: PathBuf,
        #[source]
        source: FrameError,
    },

    #[error("cannot write image {path}: {source}")]
    ImageWrite {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("cannot start worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("cannot serialize manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    /// A camera error that is fatal by [`CameraError::is_fatal`].
    #[error(transparent)]
    Camera(#[from] CameraError),
}
