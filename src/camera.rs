//! Static camera pose and intrinsics resolution.
//!
//! Cameras do not move during a capture, so each one is resolved once from
//! the session's pose and intrinsics snapshots.

use nalgebra::{Quaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{CameraError, RecordError};
use crate::record::{IntrinsicsSnapshot, PoseSnapshot};

/// Pinhole intrinsics in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub width: u32,
    pub height: u32,
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl CameraIntrinsics {
    /// Validated constructor: non-empty resolution, positive focal lengths,
    /// finite principal point.
    pub fn new(width: u32, height: u32, fx: f64, fy: f64, cx: f64, cy: f64) -> Result<Self, RecordError> {
        if width == 0 || height == 0 {
            return Err(RecordError::invalid("width/height", format!("{width}x{height} is empty")));
        }
        if !(fx.is_finite() && fx > 0.0 && fy.is_finite() && fy > 0.0) {
            return Err(RecordError::invalid("fx/fy", format!("focal lengths {fx}, {fy} must be positive")));
        }
        if !(cx.is_finite() && cy.is_finite()) {
            return Err(RecordError::invalid("cx/cy", "principal point must be finite"));
        }

        Ok(Self {
            width,
            height,
            fx,
            fy,
            cx,
            cy,
        })
    }
}

/// Resolved pose of one camera.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraPose {
    name: String,
    position: Vector3<f64>,
    orientation: Quaternion<f64>,
}

impl CameraPose {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn position(&self) -> &Vector3<f64> {
        &self.position
    }

    /// Orientation exactly as captured; may be non-unit.
    pub fn orientation(&self) -> &Quaternion<f64> {
        &self.orientation
    }
}

/// Looks up `camera` in a pose snapshot. The first matching entry wins.
///
/// A name that only appears as an incomplete entry is reported as
/// [`CameraError::IncompletePose`], which is fatal.
pub fn resolve_pose(snapshot: &PoseSnapshot, camera: &str) -> Result<CameraPose, CameraError> {
    if let Some(entry) = snapshot.entries.iter().find(|e| e.name == camera) {
        return Ok(CameraPose {
            name: entry.name.clone(),
            position: entry.position,
            orientation: entry.orientation,
        });
    }

    match snapshot.incomplete.iter().find(|e| e.name == camera) {
        Some(entry) => Err(CameraError::IncompletePose {
            camera: camera.to_string(),
            field: entry.field,
        }),
        None => Err(CameraError::CameraPoseMissing(camera.to_string())),
    }
}

/// Looks up `camera` in an intrinsics snapshot. A named entry wins over the
/// first shared (unnamed) one.
pub fn resolve_intrinsics(snapshot: &IntrinsicsSnapshot, camera: &str) -> Result<CameraIntrinsics, CameraError> {
    snapshot
        .entries
        .iter()
        .find(|e| e.name.as_deref() == Some(camera))
        .or_else(|| snapshot.entries.iter().find(|e| e.name.is_none()))
        .map(|e| e.intrinsics)
        .ok_or_else(|| CameraError::CameraIntrinsicsMissing(camera.to_string()))
}
