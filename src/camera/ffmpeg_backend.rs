//! V4L2 cameras driven through an `ffmpeg` child per repeating request.

use std::{
    collections::HashMap,
    process::Stdio,
    sync::{Arc, Mutex, PoisonError},
};

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use tokio::{
    io::AsyncReadExt,
    process::{Child, Command},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    discovery::{self, MjpegModes},
    image_reader::ImageReader,
    jpeg::MjpegSplitter,
    request::{CaptureRequest, ZoomControl},
    traits::{CameraBackend, CameraDevice, CaptureCallback, CaptureSession, OutputTarget, Reply},
    types::{FpsRange, Rect, SensorCapabilities, SensorDesc, Size, ZoomCapability},
};
use crate::core::errors::CameraError;

const MAX_DIGITAL_ZOOM: f32 = 4.0;
const READ_CHUNK: usize = 64 * 1024;

pub struct FfmpegBackend {
    ffmpeg_bin: String,
    input_format: String,
    sensors: Vec<SensorDesc>,
    active_arrays: Mutex<HashMap<String, Rect>>,
}

impl FfmpegBackend {
    pub fn new(ffmpeg_bin: String, input_format: String, sensors: Vec<SensorDesc>) -> Self {
        Self {
            ffmpeg_bin,
            input_format,
            sensors,
            active_arrays: Mutex::new(HashMap::new()),
        }
    }

    /// Enumerates V4L2 cameras once; the sensor list stays fixed afterwards.
    pub async fn discover(ffmpeg_bin: String, input_format: String) -> Result<Self> {
        let probe = discovery::probe_cameras()
            .await
            .context("failed to enumerate video devices")?;
        let sensors = discovery::sensors_from_probe(&probe);
        info!("found {} camera(s)", sensors.len());
        Ok(Self::new(ffmpeg_bin, input_format, sensors))
    }
}

#[async_trait]
impl CameraBackend for FfmpegBackend {
    fn sensors(&self) -> Vec<SensorDesc> {
        self.sensors.clone()
    }

    async fn capabilities(&self, camera_id: &str) -> Result<SensorCapabilities> {
        if !self.sensors.iter().any(|sensor| sensor.camera_id == camera_id) {
            bail!("unknown camera {camera_id}");
        }
        let modes = discovery::probe_mjpeg_modes(camera_id).await?;
        let caps = capabilities_from_modes(&modes);
        self.active_arrays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(camera_id.to_string(), caps.active_array);
        Ok(caps)
    }

    fn open_device(&self, camera_id: &str, reply: Reply<Box<dyn CameraDevice>>) {
        let active_array = self
            .active_arrays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(camera_id)
            .copied();
        let device = V4l2Device {
            camera_id: camera_id.to_string(),
            ffmpeg_bin: self.ffmpeg_bin.clone(),
            input_format: self.input_format.clone(),
            active_array,
        };

        tokio::spawn(async move {
            let opened = tokio::fs::OpenOptions::new()
                .read(true)
                .open(&device.camera_id)
                .await
                .with_context(|| format!("failed to open {}", device.camera_id));
            let result = opened.map(|_| Box::new(device) as Box<dyn CameraDevice>);
            if reply.send(result).is_err() {
                debug!("device open abandoned by the controller");
            }
        });
    }
}

struct V4l2Device {
    camera_id: String,
    ffmpeg_bin: String,
    input_format: String,
    active_array: Option<Rect>,
}

impl CameraDevice for V4l2Device {
    fn camera_id(&self) -> &str {
        &self.camera_id
    }

    fn create_session(&mut self, targets: Vec<OutputTarget>, reply: Reply<Box<dyn CaptureSession>>) {
        let mut encoder = None;
        for target in targets {
            match target {
                OutputTarget::Encoder(reader) => encoder = Some(reader),
                OutputTarget::Preview(surface) => {
                    debug!("preview surface {} has no v4l2 sink, skipping", surface.id());
                }
            }
        }
        let result = match encoder {
            Some(encoder) => Ok(Box::new(FfmpegSession {
                camera_id: self.camera_id.clone(),
                ffmpeg_bin: self.ffmpeg_bin.clone(),
                input_format: self.input_format.clone(),
                active_array: self
                    .active_array
                    .unwrap_or_else(|| Rect::from_size(encoder.size())),
                encoder,
                pump: None,
            }) as Box<dyn CaptureSession>),
            None => Err(anyhow!("session needs an encoder target")),
        };
        let _ = reply.send(result);
    }

    fn close(&mut self) -> Result<()> {
        debug!("released {}", self.camera_id);
        Ok(())
    }
}

struct RunningPump {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

struct FfmpegSession {
    camera_id: String,
    ffmpeg_bin: String,
    input_format: String,
    active_array: Rect,
    encoder: ImageReader,
    pump: Option<RunningPump>,
}

impl FfmpegSession {
    fn stop_pump(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.stop.cancel();
            if pump.task.is_finished() {
                debug!("ffmpeg pump for {} had already exited", self.camera_id);
            }
        }
    }
}

impl CaptureSession for FfmpegSession {
    fn set_repeating_request(
        &mut self,
        request: CaptureRequest,
        callback: Arc<dyn CaptureCallback>,
    ) -> Result<()> {
        self.stop_pump();

        let args = capture_args(
            &self.input_format,
            &self.camera_id,
            self.encoder.size(),
            request.fps_range.map(|range| range.upper),
            digital_zoom(request.zoom, self.active_array),
            jpeg_qscale(request.jpeg_quality),
        );
        let child = Command::new(&self.ffmpeg_bin)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .context("failed to spawn ffmpeg capture process")?;

        let stop = CancellationToken::new();
        let task = tokio::spawn(pump_frames(
            self.camera_id.clone(),
            child,
            self.encoder.clone(),
            callback,
            stop.clone(),
        ));
        self.pump = Some(RunningPump { stop, task });
        Ok(())
    }

    fn stop_repeating(&mut self) -> Result<()> {
        self.stop_pump();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.stop_pump();
        Ok(())
    }
}

impl Drop for FfmpegSession {
    fn drop(&mut self) {
        self.stop_pump();
    }
}

async fn pump_frames(
    camera_id: String,
    mut child: Child,
    encoder: ImageReader,
    callback: Arc<dyn CaptureCallback>,
    stop: CancellationToken,
) {
    let Some(mut stdout) = child.stdout.take() else {
        warn!("ffmpeg for {camera_id} has no stdout");
        return;
    };
    let mut splitter = MjpegSplitter::new();
    let mut buf = vec![0u8; READ_CHUNK];

    'read: loop {
        let read = tokio::select! {
            _ = stop.cancelled() => break,
            read = stdout.read(&mut buf) => read,
        };
        match read {
            Ok(0) => {
                warn!("{}, capture stream ended", CameraError::Disconnected(camera_id.clone()));
                break;
            }
            Ok(n) => {
                for frame in splitter.push(&buf[..n]) {
                    if encoder.queue_image(frame) {
                        callback.on_capture_completed();
                    } else if encoder.is_closed() {
                        break 'read;
                    }
                }
            }
            Err(err) => {
                warn!("failed reading frames from {camera_id}: {err}");
                break;
            }
        }
    }

    if let Err(err) = child.kill().await {
        debug!("ffmpeg for {camera_id} already gone: {err}");
    }
}

/// Capabilities of a UVC-style camera: MJPEG sizes, one fixed range per
/// discrete rate, crop-based digital zoom and none of the optional controls.
pub fn capabilities_from_modes(modes: &MjpegModes) -> SensorCapabilities {
    let largest = modes
        .sizes
        .iter()
        .max_by_key(|size| size.area())
        .copied()
        .unwrap_or(Size::new(0, 0));
    SensorCapabilities {
        zoom: ZoomCapability::Crop {
            max_digital_zoom: MAX_DIGITAL_ZOOM,
        },
        fps_ranges: modes
            .frame_rates
            .iter()
            .map(|fps| FpsRange::new(*fps, *fps))
            .collect(),
        anti_flicker_modes: Vec::new(),
        noise_reduction_modes: Vec::new(),
        video_stabilization_modes: Vec::new(),
        optical_stabilization_modes: Vec::new(),
        sensor_orientation: 0,
        active_array: Rect::from_size(largest),
        output_sizes: modes.sizes.clone(),
        flash_available: false,
    }
}

/// Maps a 1..=100 JPEG quality onto ffmpeg's 2..=31 qscale (lower is better).
pub fn jpeg_qscale(quality: u8) -> u8 {
    let quality = u32::from(quality.clamp(1, 100));
    (2 + (100 - quality) * 29 / 99) as u8
}

fn digital_zoom(zoom: Option<ZoomControl>, active: Rect) -> Option<f32> {
    let ratio = match zoom? {
        ZoomControl::Ratio(ratio) => ratio,
        ZoomControl::CropRegion(region) if region.width() > 0 => {
            active.width() as f32 / region.width() as f32
        }
        ZoomControl::CropRegion(_) => return None,
    };
    (ratio > 1.0).then_some(ratio)
}

pub fn capture_args(
    input_format: &str,
    device: &str,
    size: Size,
    fps: Option<u32>,
    zoom: Option<f32>,
    qscale: u8,
) -> Vec<String> {
    let mut args: Vec<String> = [
        "-hide_banner",
        "-loglevel",
        "error",
        "-f",
        "v4l2",
        "-input_format",
        input_format,
        "-video_size",
    ]
    .iter()
    .map(|arg| arg.to_string())
    .collect();
    args.push(format!("{}x{}", size.width, size.height));
    if let Some(fps) = fps {
        args.extend(["-framerate".to_string(), fps.to_string()]);
    }
    args.extend(["-i".to_string(), device.to_string()]);
    if let Some(zoom) = zoom {
        args.extend([
            "-vf".to_string(),
            format!(
                "crop=iw/{zoom:.3}:ih/{zoom:.3},scale={}:{}",
                size.width, size.height
            ),
        ]);
    }
    args.extend(["-q:v".to_string(), qscale.to_string()]);
    args.extend(["-f", "mjpeg", "pipe:1"].iter().map(|arg| arg.to_string()));
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qscale_spans_ffmpeg_range() {
        assert_eq!(jpeg_qscale(100), 2);
        assert_eq!(jpeg_qscale(1), 31);
        assert_eq!(jpeg_qscale(0), 31);
        assert!(jpeg_qscale(80) < jpeg_qscale(40));
    }

    #[test]
    fn args_without_zoom_skip_the_filter() {
        let args = capture_args("mjpeg", "/dev/video0", Size::new(1280, 720), Some(30), None, 5);
        assert!(!args.iter().any(|arg| arg == "-vf"));
        let joined = args.join(" ");
        assert!(joined.contains("-video_size 1280x720 -framerate 30 -i /dev/video0"));
        assert!(joined.ends_with("-q:v 5 -f mjpeg pipe:1"));
    }

    #[test]
    fn crop_zoom_becomes_centered_crop_filter() {
        let active = Rect::new(0, 0, 1920, 1080);
        let region = Rect::new(480, 270, 1440, 810);
        let zoom = digital_zoom(Some(ZoomControl::CropRegion(region)), active);
        assert_eq!(zoom, Some(2.0));

        let args = capture_args("mjpeg", "/dev/video0", Size::new(640, 480), None, zoom, 2);
        let filter = args
            .iter()
            .position(|arg| arg == "-vf")
            .map(|i| args[i + 1].as_str());
        assert_eq!(filter, Some("crop=iw/2.000:ih/2.000,scale=640:480"));
        assert!(!args.iter().any(|arg| arg == "-framerate"));
    }

    #[test]
    fn unzoomed_region_needs_no_filter() {
        let active = Rect::new(0, 0, 1920, 1080);
        assert_eq!(digital_zoom(Some(ZoomControl::CropRegion(active)), active), None);
        assert_eq!(digital_zoom(None, active), None);
    }

    #[test]
    fn modes_become_fixed_rate_capabilities() {
        let modes = MjpegModes {
            sizes: vec![Size::new(640, 480), Size::new(1920, 1080)],
            frame_rates: vec![15, 30],
        };
        let caps = capabilities_from_modes(&modes);
        assert_eq!(caps.fps_ranges, [FpsRange::new(15, 15), FpsRange::new(30, 30)]);
        assert_eq!(caps.active_array, Rect::new(0, 0, 1920, 1080));
        assert_eq!(caps.zoom.bounds(), (1.0, MAX_DIGITAL_ZOOM));
        assert!(!caps.flash_available);
        assert!(caps.video_stabilization_modes.is_empty());
    }
}
