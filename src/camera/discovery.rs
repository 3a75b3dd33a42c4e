use std::collections::BTreeSet;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tokio::process::Command;

use super::types::{SensorDesc, Size};

#[derive(Debug, Clone, Serialize)]
pub struct CameraDeviceInfo {
    pub path: String,
    pub formats: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CameraProbeInfo {
    pub name: String,
    pub devices: Vec<CameraDeviceInfo>,
}

/// MJPEG frame sizes and discrete frame rates a V4L2 node offers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MjpegModes {
    pub sizes: Vec<Size>,
    pub frame_rates: Vec<u32>,
}

pub async fn probe_cameras() -> Result<Vec<CameraProbeInfo>> {
    match v4l2_probe().await {
        Ok(list) if !list.is_empty() => Ok(list),
        _ => fallback_probe_from_dev().await,
    }
}

/// One sensor per physical camera: the first node of each device group.
pub fn sensors_from_probe(probe: &[CameraProbeInfo]) -> Vec<SensorDesc> {
    probe
        .iter()
        .flat_map(|camera| {
            let grouped = camera.name != FALLBACK_GROUP;
            let devices: Vec<&CameraDeviceInfo> = if grouped {
                camera.devices.iter().take(1).collect()
            } else {
                camera.devices.iter().collect()
            };
            devices.into_iter().map(move |device| SensorDesc {
                camera_id: device.path.clone(),
                title: if grouped {
                    camera.name.clone()
                } else {
                    device.path.clone()
                },
                has_flash: false,
            })
        })
        .collect()
}

pub async fn probe_mjpeg_modes(device_path: &str) -> Result<MjpegModes> {
    let output = Command::new("v4l2-ctl")
        .args(["--list-formats-ext", "-d", device_path])
        .output()
        .await
        .context("failed to execute v4l2-ctl")?;
    if !output.status.success() {
        bail!("v4l2-ctl could not query {device_path}: {}", output.status);
    }
    Ok(parse_mjpeg_modes(&String::from_utf8_lossy(&output.stdout)))
}

const FALLBACK_GROUP: &str = "Detected video devices";

async fn v4l2_probe() -> Result<Vec<CameraProbeInfo>> {
    let output = Command::new("v4l2-ctl")
        .arg("--list-devices")
        .output()
        .await?;
    if !output.status.success() {
        return Ok(Vec::new());
    }

    let mut probe = Vec::new();
    for (name, devices) in parse_device_groups(&String::from_utf8_lossy(&output.stdout)) {
        let mut info_devices = Vec::new();
        for path in devices {
            let formats = probe_formats(&path).await.unwrap_or_default();
            info_devices.push(CameraDeviceInfo { path, formats });
        }
        probe.push(CameraProbeInfo {
            name,
            devices: info_devices,
        });
    }
    Ok(probe)
}

/// Groups `v4l2-ctl --list-devices` output into (card name, video nodes).
fn parse_device_groups(stdout: &str) -> Vec<(String, Vec<String>)> {
    let mut current_name = String::new();
    let mut current_devices: Vec<String> = Vec::new();
    let mut groups = Vec::new();

    for raw in stdout.lines() {
        let line = raw.trim_end();
        if line.is_empty() {
            if !current_name.is_empty() && !current_devices.is_empty() {
                groups.push((current_name.clone(), std::mem::take(&mut current_devices)));
            }
            current_name.clear();
            current_devices.clear();
            continue;
        }

        if raw.starts_with(' ') || raw.starts_with('\t') {
            let value = line.trim();
            if value.starts_with("/dev/video") {
                current_devices.push(value.to_string());
            }
        } else {
            if !current_name.is_empty() && !current_devices.is_empty() {
                groups.push((current_name.clone(), std::mem::take(&mut current_devices)));
            }
            current_name = line.trim_end_matches(':').to_string();
        }
    }
    if !current_name.is_empty() && !current_devices.is_empty() {
        groups.push((current_name, current_devices));
    }
    groups
}

async fn probe_formats(device_path: &str) -> Result<Vec<String>> {
    let output = Command::new("v4l2-ctl")
        .args(["--list-formats-ext", "-d", device_path])
        .output()
        .await?;
    if !output.status.success() {
        return Ok(Vec::new());
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let formats: BTreeSet<String> = stdout.lines().filter_map(fourcc).collect();
    Ok(formats.into_iter().collect())
}

fn fourcc(line: &str) -> Option<String> {
    let first = line.find('\'')?;
    let tail = &line[first + 1..];
    let second = tail.find('\'')?;
    let value = tail[..second].trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Collects sizes and frame rates listed under the `MJPG` format of
/// `v4l2-ctl --list-formats-ext`. Stepwise sizes are ignored.
fn parse_mjpeg_modes(stdout: &str) -> MjpegModes {
    let mut in_mjpeg = false;
    let mut sizes = BTreeSet::new();
    let mut rates = BTreeSet::new();

    for line in stdout.lines().map(str::trim) {
        if let Some(format) = fourcc(line) {
            in_mjpeg = format == "MJPG";
            continue;
        }
        if !in_mjpeg {
            continue;
        }
        if let Some(size) = line.strip_prefix("Size: Discrete ") {
            let parsed = size
                .trim()
                .split_once('x')
                .and_then(|(w, h)| Some(Size::new(w.parse().ok()?, h.parse().ok()?)));
            if let Some(size) = parsed {
                sizes.insert((size.area(), size.width, size.height));
            }
        } else if line.starts_with("Interval: Discrete") {
            let fps = line
                .rsplit_once('(')
                .and_then(|(_, tail)| tail.strip_suffix(" fps)"))
                .and_then(|value| value.trim().parse::<f32>().ok());
            if let Some(fps) = fps.filter(|fps| *fps >= 1.0) {
                rates.insert(fps.round() as u32);
            }
        }
    }

    MjpegModes {
        sizes: sizes
            .into_iter()
            .map(|(_, width, height)| Size::new(width, height))
            .collect(),
        frame_rates: rates.into_iter().collect(),
    }
}

async fn fallback_probe_from_dev() -> Result<Vec<CameraProbeInfo>> {
    let mut paths = Vec::new();
    let mut dir = tokio::fs::read_dir("/dev").await?;
    while let Some(entry) = dir.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("video") {
            paths.push(format!("/dev/{name}"));
        }
    }
    paths.sort();

    if paths.is_empty() {
        return Ok(Vec::new());
    }

    let devices = paths
        .into_iter()
        .map(|path| CameraDeviceInfo {
            path,
            formats: Vec::new(),
        })
        .collect();
    Ok(vec![CameraProbeInfo {
        name: FALLBACK_GROUP.to_string(),
        devices,
    }])
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIST_DEVICES: &str = "\
HD Pro Webcam C920 (usb-0000:00:14.0-1):
\t/dev/video0
\t/dev/video1
\t/dev/media0

Integrated Camera (usb-0000:00:14.0-8):
\t/dev/video2
\t/dev/video3
";

    const FORMATS: &str = "\
ioctl: VIDIOC_ENUM_FMT
\tType: Video Capture

\t[0]: 'YUYV' (YUYV 4:2:2)
\t\tSize: Discrete 1920x1080
\t\t\tInterval: Discrete 0.200s (5.000 fps)
\t[1]: 'MJPG' (Motion-JPEG, compressed)
\t\tSize: Discrete 1280x720
\t\t\tInterval: Discrete 0.033s (30.000 fps)
\t\t\tInterval: Discrete 0.067s (15.000 fps)
\t\tSize: Discrete 640x480
\t\t\tInterval: Discrete 0.033s (30.000 fps)
\t\tSize: Discrete 1920x1080
\t\t\tInterval: Discrete 0.042s (24.000 fps)
";

    #[test]
    fn groups_video_nodes_by_card() {
        let groups = parse_device_groups(LIST_DEVICES);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "HD Pro Webcam C920 (usb-0000:00:14.0-1)");
        assert_eq!(groups[0].1, ["/dev/video0", "/dev/video1"]);
        assert_eq!(groups[1].1, ["/dev/video2", "/dev/video3"]);
    }

    #[test]
    fn collects_only_mjpeg_modes() {
        let modes = parse_mjpeg_modes(FORMATS);
        assert_eq!(
            modes.sizes,
            [Size::new(640, 480), Size::new(1280, 720), Size::new(1920, 1080)]
        );
        assert_eq!(modes.frame_rates, [15, 24, 30]);
    }

    #[test]
    fn no_mjpeg_means_no_modes() {
        let modes = parse_mjpeg_modes("\t[0]: 'YUYV' (YUYV 4:2:2)\n\t\tSize: Discrete 640x480\n");
        assert_eq!(modes, MjpegModes::default());
    }

    #[test]
    fn one_sensor_per_card() {
        let probe = vec![CameraProbeInfo {
            name: "HD Pro Webcam C920".to_string(),
            devices: vec![
                CameraDeviceInfo {
                    path: "/dev/video0".to_string(),
                    formats: vec!["MJPG".to_string()],
                },
                CameraDeviceInfo {
                    path: "/dev/video1".to_string(),
                    formats: Vec::new(),
                },
            ],
        }];
        let sensors = sensors_from_probe(&probe);
        assert_eq!(sensors.len(), 1);
        assert_eq!(sensors[0].camera_id, "/dev/video0");
        assert_eq!(sensors[0].title, "HD Pro Webcam C920");
        assert!(!sensors[0].has_flash);
    }
}
