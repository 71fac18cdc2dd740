use std::fmt;

use nalgebra::{Matrix3, Matrix4, Quaternion, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::camera::CameraIntrinsics;
use crate::error::TransformError;

/// Camera model written to transforms.json. Simulated cameras are pinholes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CameraModel {
    Opencv,
}

/// 4x4 camera-to-world matrix, serialized row-major.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(into = "[[f64; 4]; 4]", from = "[[f64; 4]; 4]")]
pub struct TransformMatrix(Matrix4<f64>);

impl TransformMatrix {
    /// Top-left rotation block.
    pub fn rotation(&self) -> Matrix3<f64> {
        self.0.fixed_view::<3, 3>(0, 0).into_owned()
    }

    /// Top-right translation column.
    pub fn translation(&self) -> Vector3<f64> {
        self.0.fixed_view::<3, 1>(0, 3).into_owned()
    }

    pub fn to_rows(&self) -> [[f64; 4]; 4] {
        let mut rows = [[0.0; 4]; 4];
        for (i, row) in rows.iter_mut().enumerate() {
            for (j, value) in row.iter_mut().enumerate() {
                *value = self.0[(i, j)];
            }
        }
        rows
    }
}

impl From<TransformMatrix> for [[f64; 4]; 4] {
    fn from(m: TransformMatrix) -> Self {
        m.to_rows()
    }
}

impl From<[[f64; 4]; 4]> for TransformMatrix {
    fn from(rows: [[f64; 4]; 4]) -> Self {
        Self(Matrix4::from_fn(|i, j| rows[i][j]))
    }
}

/// Camera-local axis convention of the captured poses.
///
/// NeRFStudio expects OpenGL camera axes (+X right, +Y up, looking down -Z).
/// The trainer is run without auto-orientation, so whatever this produces is
/// what it trains on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum AxisConvention {
    /// Emit the captured rotation unchanged.
    #[default]
    Passthrough,
    /// Source camera is +X right, +Y down, +Z forward.
    Opencv,
    /// Source camera is +X forward, +Y left, +Z up.
    Gazebo,
}

impl AxisConvention {
    /// Change of basis taking OpenGL camera axes into the source camera frame.
    pub fn to_source_camera(&self) -> Matrix3<f64> {
        match self {
            Self::Passthrough => Matrix3::identity(),
            Self::Opencv => Matrix3::new(
                1.0, 0.0, 0.0,
                0.0, -1.0, 0.0,
                0.0, 0.0, -1.0,
            ),
            Self::Gazebo => Matrix3::new(
                0.0, 0.0, -1.0,
                -1.0, 0.0, 0.0,
                0.0, 1.0, 0.0,
            ),
        }
    }
}

impl fmt::Display for AxisConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Passthrough => "passthrough",
            Self::Opencv => "opencv",
            Self::Gazebo => "gazebo",
        };
        f.write_str(name)
    }
}

/// Builds camera-to-world matrices from captured poses.
pub struct CoordinateConverter;

impl CoordinateConverter {
    /// Camera-to-world matrix from a translation and a quaternion `(x, y, z, w)`.
    ///
    /// The quaternion is normalized first; a zero or non-finite norm is
    /// rejected rather than replaced by identity.
    pub fn camera_to_world(
        translation: &Vector3<f64>,
        orientation: &Quaternion<f64>,
        convention: AxisConvention,
    ) -> Result<TransformMatrix, TransformError> {
        let rotation = Self::quaternion_to_matrix(orientation)? * convention.to_source_camera();

        let mut transform = Matrix4::identity();
        transform.fixed_view_mut::<3, 3>(0, 0).copy_from(&rotation);
        transform.fixed_view_mut::<3, 1>(0, 3).copy_from(translation);

        Ok(TransformMatrix(transform))
    }

    /// Convert quaternion rotation to rotation matrix
    pub fn quaternion_to_matrix(orientation: &Quaternion<f64>) -> Result<Matrix3<f64>, TransformError> {
        let norm = orientation.norm();
        if !norm.is_finite() || norm == 0.0 {
            return Err(TransformError::DegenerateOrientation { norm });
        }
        let q = UnitQuaternion::from_quaternion(*orientation);
        Ok(q.to_rotation_matrix().into_inner())
    }
}

/// NeRFStudio transforms.json format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NerfStudioTransforms {
    /// Camera model type
    pub camera_model: CameraModel,

    /// Radial distortion parameters
    pub k1: f64,
    pub k2: f64,
    pub k3: f64,
    pub k4: f64,

    /// Tangential distortion parameters
    pub p1: f64,
    pub p2: f64,

    /// Per-frame data
    pub frames: Vec<Frame>,
}

/// Per-frame data in transforms.json
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Image path relative to the manifest
    pub file_path: String,

    /// Camera-to-world matrix
    pub transform_matrix: TransformMatrix,

    /// Image width
    pub w: u32,

    /// Image height
    pub h: u32,

    pub fl_x: f64,
    pub fl_y: f64,
    pub cx: f64,
    pub cy: f64,
}

impl Frame {
    pub fn new(file_path: impl Into<String>, transform_matrix: TransformMatrix, intrinsics: &CameraIntrinsics) -> Self {
        Self {
            file_path: file_path.into(),
            transform_matrix,
            w: intrinsics.width,
            h: intrinsics.height,
            fl_x: intrinsics.fx,
            fl_y: intrinsics.fy,
            cx: intrinsics.cx,
            cy: intrinsics.cy,
        }
    }
}

/// Builder for creating NeRFStudio transforms
pub struct NerfStudioBuilder {
    transforms: NerfStudioTransforms,
}

impl Default for NerfStudioBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl NerfStudioBuilder {
    /// Undistorted pinhole model: simulated cameras have no lens distortion.
    pub fn new() -> Self {
        Self {
            transforms: NerfStudioTransforms {
                camera_model: CameraModel::Opencv,
                k1: 0.0,
                k2: 0.0,
                k3: 0.0,
                k4: 0.0,
                p1: 0.0,
                p2: 0.0,
                frames: Vec::new(),
            },
        }
    }

    pub fn add_frame(mut self, frame: Frame) -> Self {
        self.transforms.frames.push(frame);
        self
    }

    pub fn build(self) -> NerfStudioTransforms {
        self.transforms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    #[test]
    fn test_half_turn_about_z() {
        // (x, y, z, w) = (0, 0, 1, 0)
        let orientation = Quaternion::new(0.0, 0.0, 0.0, 1.0);
        let translation = Vector3::new(3.0, 0.0, 0.55);

        let transform =
            CoordinateConverter::camera_to_world(&translation, &orientation, AxisConvention::Passthrough).unwrap();

        assert_abs_diff_eq!(
            transform.rotation(),
            Matrix3::from_diagonal(&Vector3::new(-1.0, -1.0, 1.0)),
            epsilon = 1e-12
        );
        assert_eq!(transform.translation(), translation);
        assert_eq!(transform.to_rows()[3], [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_unnormalized_quaternion() {
        let orientation = Quaternion::new(2.0, 0.0, 0.0, 0.0);
        let rotation = CoordinateConverter::quaternion_to_matrix(&orientation).unwrap();
        assert_abs_diff_eq!(rotation, Matrix3::identity(), epsilon = 1e-12);
    }

    #[test]
    fn test_degenerate_quaternion() {
        let err = CoordinateConverter::quaternion_to_matrix(&Quaternion::new(0.0, 0.0, 0.0, 0.0)).unwrap_err();
        assert_eq!(err, TransformError::DegenerateOrientation { norm: 0.0 });

        let nan = Quaternion::new(f64::NAN, 0.0, 0.0, 1.0);
        assert!(CoordinateConverter::quaternion_to_matrix(&nan).is_err());
    }

    #[test]
    fn test_convention_changes_are_rotations() {
        for convention in [AxisConvention::Passthrough, AxisConvention::Opencv, AxisConvention::Gazebo] {
            let m = convention.to_source_camera();
            assert_abs_diff_eq!(m.determinant(), 1.0, epsilon = 1e-12);
            assert_abs_diff_eq!(m * m.transpose(), Matrix3::identity(), epsilon = 1e-12);
        }
    }

    #[test]
    fn test_gazebo_camera_looks_down_minus_z() {
        // A Gazebo camera at identity looks along world +X. The OpenGL viewing
        // direction is -Z of the camera, so column 2 must be world -X.
        let transform = CoordinateConverter::camera_to_world(
            &Vector3::zeros(),
            &Quaternion::identity(),
            AxisConvention::Gazebo,
        )
        .unwrap();
        let rotation = transform.rotation();
        assert_abs_diff_eq!(rotation.column(2).into_owned(), Vector3::new(-1.0, 0.0, 0.0), epsilon = 1e-12);
        assert_abs_diff_eq!(rotation.column(1).into_owned(), Vector3::new(0.0, 0.0, 1.0), epsilon = 1e-12);
    }

    #[test]
    fn test_serialization() {
        let intrinsics = CameraIntrinsics::new(1000, 1000, 1000.0, 1000.0, 500.0, 500.0).unwrap();
        let transforms = NerfStudioBuilder::new()
            .add_frame(Frame::new(
                "images/frame_00001.jpg",
                TransformMatrix::from([
                    [1.0, 0.0, 0.0, 0.0],
                    [0.0, 1.0, 0.0, 0.0],
                    [0.0, 0.0, 1.0, 2.5],
                    [0.0, 0.0, 0.0, 1.0],
                ]),
                &intrinsics,
            ))
            .build();

        let json = serde_json::to_string_pretty(&transforms).unwrap();
        assert!(json.contains("\"camera_model\": \"OPENCV\""));
        assert!(json.contains("\"fl_x\": 1000.0"));
        for key in ["k1", "k2", "k3", "k4", "p1", "p2"] {
            assert!(json.contains(&format!("\"{key}\": 0.0")), "missing {key}");
        }

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["frames"][0]["transform_matrix"][2][3], 2.5);
        assert_eq!(value["frames"][0]["w"], 1000);

        let parsed: NerfStudioTransforms = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, transforms);
    }

    fn arb_unit_quaternion() -> impl Strategy<Value = Quaternion<f64>> {
        prop::array::uniform4(-1.0..1.0f64)
            .prop_filter("norm too small", |[x, y, z, w]| (x * x + y * y + z * z + w * w).sqrt() > 1e-3)
            .prop_map(|[x, y, z, w]| Quaternion::new(w, x, y, z).normalize())
    }

    proptest! {
        #[test]
        fn prop_rotation_block_is_proper(
            q in arb_unit_quaternion(),
            t in prop::array::uniform3(-100.0..100.0f64),
        ) {
            let translation = Vector3::from(t);
            let transform = CoordinateConverter::camera_to_world(&translation, &q, AxisConvention::Passthrough).unwrap();

            prop_assert!((transform.rotation().determinant() - 1.0).abs() < 1e-9);
            prop_assert_eq!(transform.to_rows()[3], [0.0, 0.0, 0.0, 1.0]);
            prop_assert_eq!(transform.translation(), translation);
        }
    }
}
