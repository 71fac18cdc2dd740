pub mod bag_reader;
pub mod camera;
pub mod cli;
pub mod config;
pub mod dataset;
pub mod error;
pub mod frame_decoder;
pub mod nerfstudio;
pub mod record;

// Re-export commonly used types
pub use bag_reader::{BagReader, LineWarning};
pub use camera::{resolve_intrinsics, resolve_pose, CameraIntrinsics, CameraPose};
pub use config::{ExtractConfig, OutputImageFormat};
pub use dataset::{build_dataset, DatasetAssembler, RunReport};
pub use error::{CameraError, ConfigError, FrameError, PipelineError, RecordError, TransformError};
pub use frame_decoder::{decode_frame, DecodedFrame, PixelFormat};
pub use nerfstudio::{AxisConvention, CoordinateConverter, NerfStudioTransforms, TransformMatrix};
pub use record::{Record, Stamp, TopicKind};
