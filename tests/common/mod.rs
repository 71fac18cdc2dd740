//! Synthetic capture sessions in the Gazebo `--json-output` bag layout.

#![allow(dead_code)]

use std::fs;
use std::path::Path;

use base64::prelude::*;

/// One `gz.msgs.Image` line.
pub fn image_record(sec: i64, nsec: i64, seq: u64, format: &str, width: u32, height: u32, pixels: &[u8]) -> String {
    format!(
        r#"{{"header":{{"stamp":{{"sec":"{sec}","nsec":{nsec}}},"data":[{{"key":"seq","value":["{seq}"]}}]}},"width":{width},"height":{height},"pixelFormatType":"{format}","step":{step},"data":"{data}"}}"#,
        step = width * 3,
        data = BASE64_STANDARD.encode(pixels),
    )
}

/// A 2x2 RGB frame whose color depends on `shade`.
pub fn rgb_frame(sec: i64, seq: u64, shade: u8) -> String {
    image_record(sec, 0, seq, "RGB_INT8", 2, 2, &[shade; 12])
}

/// One `gz.msgs.Pose_V` line. Orientation is `(x, y, z, w)`.
pub fn pose_snapshot(entries: &[(&str, [f64; 3], [f64; 4])]) -> String {
    let poses: Vec<String> = entries
        .iter()
        .map(|(name, [px, py, pz], [qx, qy, qz, qw])| {
            format!(
                r#"{{"name":"{name}","id":1,"position":{{"x":{px},"y":{py},"z":{pz}}},"orientation":{{"x":{qx},"y":{qy},"z":{qz},"w":{qw}}}}}"#
            )
        })
        .collect();
    format!(r#"{{"header":{{"stamp":{{"sec":"1"}}}},"pose":[{}]}}"#, poses.join(","))
}

/// One shared `gz.msgs.CameraInfo` line.
pub fn camera_info(width: u32, height: u32, fx: f64, fy: f64, cx: f64, cy: f64) -> String {
    format!(
        r#"{{"header":{{"stamp":{{"sec":"1"}}}},"width":{width},"height":{height},"distortion":{{"k":[0,0,0,0,0]}},"intrinsics":{{"k":[{fx},0,{cx},0,{fy},{cy},0,0,1]}}}}"#
    )
}

pub fn write_bag(dir: &Path, stem: &str, lines: &[String]) {
    let mut content = lines.join("\n");
    content.push('\n');
    fs::write(dir.join(format!("{stem}.bag")), content).unwrap();
}

/// Two cameras with two frames each, the first turned half a turn about Z.
pub fn write_two_camera_session(dir: &Path) {
    write_bag(
        dir,
        "info",
        &[pose_snapshot(&[
            ("camera1", [3.0, 0.0, 0.55], [0.0, 0.0, 1.0, 0.0]),
            ("camera2", [-3.0, 0.0, 0.55], [0.0, 0.0, 0.0, 1.0]),
            ("ground_plane", [0.0, 0.0, 0.0], [0.0, 0.0, 0.0, 0.0]),
        ])],
    );
    write_bag(dir, "camera_info", &[camera_info(2, 2, 277.0, 277.0, 160.0, 120.0)]);
    write_bag(dir, "camera1", &[rgb_frame(10, 0, 10), rgb_frame(11, 1, 20)]);
    write_bag(dir, "camera2", &[rgb_frame(10, 0, 30), rgb_frame(11, 1, 40)]);
}
