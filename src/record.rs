//! Typed bag records.
//!
//! Every bag line is protobuf JSON as printed by `gz topic --json-output`.
//! The `Wire*` structs mirror that shape loosely; [`Record::parse_line`]
//! validates them into the typed payloads the rest of the crate works with,
//! so missing keys never travel past this module.

use std::collections::HashSet;

use base64::prelude::*;
use log::{debug, warn};
use nalgebra::{Quaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::camera::CameraIntrinsics;
use crate::error::RecordError;

/// Capture time of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Stamp {
    pub sec: i64,
    pub nsec: i64,
}

impl Stamp {
    pub fn new(sec: i64, nsec: i64) -> Self {
        Self { sec, nsec }
    }
}

impl std::fmt::Display for Stamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:09}", self.sec, self.nsec)
    }
}

/// Record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    pub stamp: Stamp,
    pub seq: u64,
}

/// Which payload a bag carries. Decided by the bag's file name, not its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    Image,
    PoseSnapshot,
    IntrinsicsSnapshot,
}

/// One raw camera frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub width: u32,
    pub height: u32,
    /// Pixel format tag as sent, e.g. `RGB_INT8`.
    pub pixel_format: String,
    /// Pixel bytes after base64 decoding.
    pub data: Vec<u8>,
}

/// Position and orientation of one entity in a pose snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseEntry {
    pub name: String,
    pub position: Vector3<f64>,
    /// Raw orientation, not normalized.
    pub orientation: Quaternion<f64>,
}

/// Pose entry that named an entity but left out a required object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncompletePoseEntry {
    pub name: String,
    pub field: &'static str,
}

/// One-shot capture of every entity's pose.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoseSnapshot {
    pub entries: Vec<PoseEntry>,
    pub incomplete: Vec<IncompletePoseEntry>,
}

/// Intrinsics of one camera, or of every camera when `name` is `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct IntrinsicsEntry {
    pub name: Option<String>,
    pub intrinsics: CameraIntrinsics,
}

/// One-shot capture of camera optics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntrinsicsSnapshot {
    pub entries: Vec<IntrinsicsEntry>,
    /// Why entries of an `entries` list were left out.
    pub rejected: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Image(ImagePayload),
    Poses(PoseSnapshot),
    Intrinsics(IntrinsicsSnapshot),
}

/// A validated bag line.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub topic: String,
    pub header: Header,
    pub payload: Payload,
}

impl Record {
    /// Parses one bag line as a record of the given kind.
    pub fn parse_line(line: &str, topic: &str, kind: TopicKind) -> Result<Self, RecordError> {
        let (header, payload) = match kind {
            TopicKind::Image => {
                let wire: WireImage = serde_json::from_str(line)?;
                let header = wire
                    .header
                    .as_ref()
                    .ok_or(RecordError::MissingField("header"))?
                    .to_header()?;
                (header, Payload::Image(wire.into_payload()?))
            }
            TopicKind::PoseSnapshot => {
                let wire: WirePoseV = serde_json::from_str(line)?;
                let header = header_or_default(wire.header.as_ref())?;
                (header, Payload::Poses(wire.into_snapshot()))
            }
            TopicKind::IntrinsicsSnapshot => {
                let wire: WireIntrinsicsSnapshot = serde_json::from_str(line)?;
                let header = header_or_default(wire.header.as_ref())?;
                (header, Payload::Intrinsics(wire.into_snapshot()?))
            }
        };

        Ok(Self {
            topic: topic.to_string(),
            header,
            payload,
        })
    }
}

fn header_or_default(header: Option<&WireHeader>) -> Result<Header, RecordError> {
    header.map_or_else(|| Ok(Header::default()), WireHeader::to_header)
}

/// 64-bit protobuf integers arrive as JSON strings, narrower ones as numbers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireInt {
    Number(i64),
    Text(String),
}

impl WireInt {
    fn value(&self, field: &'static str) -> Result<i64, RecordError> {
        match self {
            Self::Number(n) => Ok(*n),
            Self::Text(s) => s
                .trim()
                .parse()
                .map_err(|e| RecordError::invalid(field, format!("{s:?}: {e}"))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireStamp {
    sec: Option<WireInt>,
    nsec: Option<WireInt>,
}

#[derive(Debug, Deserialize)]
struct WireHeaderData {
    key: String,
    #[serde(default)]
    value: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WireHeader {
    stamp: Option<WireStamp>,
    #[serde(default)]
    data: Vec<WireHeaderData>,
    seq: Option<WireInt>,
}

impl WireHeader {
    fn to_header(&self) -> Result<Header, RecordError> {
        let stamp = match &self.stamp {
            Some(stamp) => {
                let sec = stamp.sec.as_ref().map_or(Ok(0), |v| v.value("header.stamp.sec"))?;
                let nsec = stamp.nsec.as_ref().map_or(Ok(0), |v| v.value("header.stamp.nsec"))?;
                if !(0..1_000_000_000).contains(&nsec) {
                    return Err(RecordError::invalid("header.stamp.nsec", format!("{nsec} out of range")));
                }
                Stamp::new(sec, nsec)
            }
            None => Stamp::default(),
        };

        let seq = match &self.seq {
            Some(seq) => Some(seq.value("header.seq")?),
            None => self
                .data
                .iter()
                .find(|d| d.key == "seq")
                .and_then(|d| d.value.first())
                .map(|v| {
                    v.trim()
                        .parse::<i64>()
                        .map_err(|e| RecordError::invalid("header.data.seq", format!("{v:?}: {e}")))
                })
                .transpose()?,
        };
        let seq = u64::try_from(seq.unwrap_or(0))
            .map_err(|_| RecordError::invalid("header.seq", "negative sequence number"))?;

        Ok(Header { stamp, seq })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireImage {
    header: Option<WireHeader>,
    width: Option<u32>,
    height: Option<u32>,
    #[serde(alias = "pixel_format", alias = "pixel_format_type")]
    pixel_format_type: Option<String>,
    data: Option<String>,
}

impl WireImage {
    fn into_payload(self) -> Result<ImagePayload, RecordError> {
        let width = self.width.ok_or(RecordError::MissingField("width"))?;
        let height = self.height.ok_or(RecordError::MissingField("height"))?;
        if width == 0 || height == 0 {
            return Err(RecordError::invalid("width/height", format!("{width}x{height} is empty")));
        }
        let data = self.data.ok_or(RecordError::MissingField("data"))?;
        let data = BASE64_STANDARD.decode(data.as_bytes())?;

        Ok(ImagePayload {
            width,
            height,
            // Proto3 drops the zero enum value, which is the unknown format.
            pixel_format: self
                .pixel_format_type
                .unwrap_or_else(|| "UNKNOWN_PIXEL_FORMAT".to_string()),
            data,
        })
    }
}

/// Proto3 omits zero components, so absent components are zero.
#[derive(Debug, Deserialize)]
struct WireVector3d {
    #[serde(default)]
    x: f64,
    #[serde(default)]
    y: f64,
    #[serde(default)]
    z: f64,
}

#[derive(Debug, Deserialize)]
struct WireQuaternion {
    #[serde(default)]
    x: f64,
    #[serde(default)]
    y: f64,
    #[serde(default)]
    z: f64,
    #[serde(default)]
    w: f64,
}

#[derive(Debug, Deserialize)]
struct WirePose {
    name: Option<String>,
    position: Option<WireVector3d>,
    orientation: Option<WireQuaternion>,
}

#[derive(Debug, Deserialize)]
struct WirePoseV {
    header: Option<WireHeader>,
    #[serde(default, alias = "entries")]
    pose: Vec<WirePose>,
}

impl WirePoseV {
    fn into_snapshot(self) -> PoseSnapshot {
        let mut snapshot = PoseSnapshot::default();
        let mut seen = HashSet::new();

        for pose in self.pose {
            let Some(name) = pose.name.filter(|n| !n.is_empty()) else {
                debug!("ignoring unnamed pose entry");
                continue;
            };
            if !seen.insert(name.clone()) {
                warn!("duplicate pose entry for `{name}`, keeping the first");
                continue;
            }

            match (pose.position, pose.orientation) {
                (Some(p), Some(o)) => snapshot.entries.push(PoseEntry {
                    name,
                    position: Vector3::new(p.x, p.y, p.z),
                    orientation: Quaternion::new(o.w, o.x, o.y, o.z),
                }),
                (None, _) => snapshot.incomplete.push(IncompletePoseEntry {
                    name,
                    field: "position",
                }),
                (_, None) => snapshot.incomplete.push(IncompletePoseEntry {
                    name,
                    field: "orientation",
                }),
            }
        }

        snapshot
    }
}

#[derive(Debug, Deserialize)]
struct WireMatrix {
    #[serde(default)]
    k: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct WireCameraInfo {
    name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    intrinsics: Option<WireMatrix>,
    fx: Option<f64>,
    fy: Option<f64>,
    cx: Option<f64>,
    cy: Option<f64>,
}

impl WireCameraInfo {
    fn into_entry(self) -> Result<IntrinsicsEntry, RecordError> {
        let width = self.width.ok_or(RecordError::MissingField("width"))?;
        let height = self.height.ok_or(RecordError::MissingField("height"))?;

        // K = [fx 0 cx; 0 fy cy; 0 0 1], row-major.
        let (fx, fy, cx, cy) = match &self.intrinsics {
            Some(matrix) if !matrix.k.is_empty() => {
                if matrix.k.len() != 9 {
                    return Err(RecordError::invalid(
                        "intrinsics.k",
                        format!("expected 9 values, got {}", matrix.k.len()),
                    ));
                }
                (matrix.k[0], matrix.k[4], matrix.k[2], matrix.k[5])
            }
            _ => (
                self.fx.ok_or(RecordError::MissingField("fx"))?,
                self.fy.ok_or(RecordError::MissingField("fy"))?,
                self.cx.ok_or(RecordError::MissingField("cx"))?,
                self.cy.ok_or(RecordError::MissingField("cy"))?,
            ),
        };

        let intrinsics = CameraIntrinsics::new(width, height, fx, fy, cx, cy)?;
        Ok(IntrinsicsEntry {
            name: self.name.filter(|n| !n.is_empty()),
            intrinsics,
        })
    }
}

#[derive(Debug, Deserialize)]
struct WireIntrinsicsSnapshot {
    header: Option<WireHeader>,
    entries: Option<Vec<WireCameraInfo>>,
    #[serde(flatten)]
    single: WireCameraInfo,
}

impl WireIntrinsicsSnapshot {
    fn into_snapshot(self) -> Result<IntrinsicsSnapshot, RecordError> {
        let Some(wire_entries) = self.entries else {
            return Ok(IntrinsicsSnapshot {
                entries: vec![self.single.into_entry()?],
                rejected: Vec::new(),
            });
        };

        let mut entries: Vec<IntrinsicsEntry> = Vec::with_capacity(wire_entries.len());
        let mut rejected = Vec::new();
        for (idx, wire) in wire_entries.into_iter().enumerate() {
            match wire.into_entry() {
                Ok(entry) => {
                    if entry.name.is_some() && entries.iter().any(|e| e.name == entry.name) {
                        warn!(
                            "duplicate intrinsics entry for `{}`, keeping the first",
                            entry.name.as_deref().unwrap_or_default()
                        );
                        continue;
                    }
                    entries.push(entry);
                }
                Err(e) => {
                    warn!("skipping intrinsics entry {idx}: {e}");
                    rejected.push(format!("intrinsics entry {idx}: {e}"));
                }
            }
        }

        Ok(IntrinsicsSnapshot { entries, rejected })
    }
}
