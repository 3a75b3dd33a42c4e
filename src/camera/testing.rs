//! Scripted in-process camera stack for controller tests.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use bytes::Bytes;

use super::{
    image_reader::ImageReader,
    request::CaptureRequest,
    traits::{CameraBackend, CameraDevice, CaptureCallback, CaptureSession, OutputTarget, Reply},
    types::{
        AntiFlickerMode, FpsRange, NoiseReductionHwMode, Rect, SensorCapabilities, SensorDesc,
        Size, StabilizationMode, ZoomCapability,
    },
};

/// Polls `condition` every few milliseconds, failing the test after 2 s.
pub async fn wait_for(what: &str, condition: impl Fn() -> bool) {
    let reached = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "timed out waiting for {what}");
}

pub fn default_caps() -> SensorCapabilities {
    SensorCapabilities {
        zoom: ZoomCapability::Ratio { min: 1.0, max: 8.0 },
        fps_ranges: vec![FpsRange::new(15, 30), FpsRange::new(30, 30)],
        anti_flicker_modes: vec![
            AntiFlickerMode::Auto,
            AntiFlickerMode::Off,
            AntiFlickerMode::Hz50,
            AntiFlickerMode::Hz60,
        ],
        noise_reduction_modes: vec![
            NoiseReductionHwMode::Off,
            NoiseReductionHwMode::Fast,
            NoiseReductionHwMode::HighQuality,
        ],
        video_stabilization_modes: vec![StabilizationMode::Off, StabilizationMode::On],
        optical_stabilization_modes: vec![StabilizationMode::Off],
        sensor_orientation: 90,
        active_array: Rect::new(0, 0, 4000, 3000),
        // largest first, the way drivers usually report them
        output_sizes: vec![
            Size::new(4000, 3000),
            Size::new(1920, 1080),
            Size::new(1280, 720),
            Size::new(640, 480),
        ],
        flash_available: true,
    }
}

#[derive(Default)]
pub struct FakeStats {
    pub open_attempts: AtomicUsize,
    pub opens: AtomicUsize,
    pub device_closes: AtomicUsize,
    pub session_closes: AtomicUsize,
    pub open_devices: AtomicUsize,
    pub max_open_devices: AtomicUsize,
    pub opened_ids: Mutex<Vec<String>>,
    pub requests: Mutex<Vec<CaptureRequest>>,
    installed: Mutex<Option<(ImageReader, Arc<dyn CaptureCallback>)>>,
}

impl FakeStats {
    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<CaptureRequest> {
        self.requests.lock().expect("requests lock").last().cloned()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }

    pub fn opened_ids(&self) -> Vec<String> {
        self.opened_ids.lock().expect("ids lock").clone()
    }

    /// Plays the driver: queues a JPEG into the most recently installed
    /// encoder target and fires the capture callback.
    pub fn emit_frame(&self, jpeg: &'static [u8]) -> bool {
        let installed = self.installed.lock().expect("installed lock").clone();
        let Some((reader, callback)) = installed else {
            return false;
        };
        if !reader.queue_image(Bytes::from_static(jpeg)) {
            return false;
        }
        callback.on_capture_completed();
        true
    }
}

pub struct FakeBackend {
    sensors: Vec<SensorDesc>,
    caps: HashMap<String, SensorCapabilities>,
    failing_caps: HashSet<String>,
    failing_open: HashSet<String>,
    open_delay: Duration,
    pub stats: Arc<FakeStats>,
}

impl FakeBackend {
    pub fn new(ids: &[&str]) -> Self {
        let sensors = ids
            .iter()
            .map(|id| SensorDesc {
                camera_id: id.to_string(),
                title: format!("fake {id}"),
                has_flash: true,
            })
            .collect();
        Self {
            sensors,
            caps: ids.iter().map(|id| (id.to_string(), default_caps())).collect(),
            failing_caps: HashSet::new(),
            failing_open: HashSet::new(),
            open_delay: Duration::ZERO,
            stats: Arc::new(FakeStats::default()),
        }
    }

    pub fn with_caps(mut self, id: &str, caps: SensorCapabilities) -> Self {
        self.caps.insert(id.to_string(), caps);
        self
    }

    pub fn failing_capabilities(mut self, id: &str) -> Self {
        self.failing_caps.insert(id.to_string());
        self
    }

    pub fn failing_open(mut self, id: &str) -> Self {
        self.failing_open.insert(id.to_string());
        self
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }
}

#[async_trait]
impl CameraBackend for FakeBackend {
    fn sensors(&self) -> Vec<SensorDesc> {
        self.sensors.clone()
    }

    async fn capabilities(&self, camera_id: &str) -> Result<SensorCapabilities> {
        if self.failing_caps.contains(camera_id) {
            return Err(anyhow!("characteristics unavailable for {camera_id}"));
        }
        self.caps
            .get(camera_id)
            .cloned()
            .ok_or_else(|| anyhow!("no such camera {camera_id}"))
    }

    fn open_device(&self, camera_id: &str, reply: Reply<Box<dyn CameraDevice>>) {
        self.stats.open_attempts.fetch_add(1, Ordering::SeqCst);
        let camera_id = camera_id.to_string();
        let fails = self.failing_open.contains(&camera_id);
        let delay = self.open_delay;
        let stats = self.stats.clone();

        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if fails {
                let _ = reply.send(Err(anyhow!("camera {camera_id} error: 3")));
                return;
            }

            stats.opens.fetch_add(1, Ordering::SeqCst);
            let open = stats.open_devices.fetch_add(1, Ordering::SeqCst) + 1;
            stats.max_open_devices.fetch_max(open, Ordering::SeqCst);
            stats
                .opened_ids
                .lock()
                .expect("ids lock")
                .push(camera_id.clone());

            let device = FakeDevice {
                camera_id,
                stats,
                closed: false,
            };
            if let Err(Ok(mut orphan)) = reply.send(Ok(Box::new(device))) {
                let _ = orphan.close();
            }
        });
    }
}

struct FakeDevice {
    camera_id: String,
    stats: Arc<FakeStats>,
    closed: bool,
}

impl CameraDevice for FakeDevice {
    fn camera_id(&self) -> &str {
        &self.camera_id
    }

    fn create_session(&mut self, targets: Vec<OutputTarget>, reply: Reply<Box<dyn CaptureSession>>) {
        let encoder = targets.iter().find_map(|target| match target {
            OutputTarget::Encoder(reader) => Some(reader.clone()),
            OutputTarget::Preview(_) => None,
        });
        let Some(encoder) = encoder else {
            let _ = reply.send(Err(anyhow!("no encoder target")));
            return;
        };
        let session = FakeSession {
            encoder,
            stats: self.stats.clone(),
            closed: false,
        };
        if let Err(Ok(mut orphan)) = reply.send(Ok(Box::new(session))) {
            let _ = orphan.close();
        }
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.stats.device_closes.fetch_add(1, Ordering::SeqCst);
            self.stats.open_devices.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

struct FakeSession {
    encoder: ImageReader,
    stats: Arc<FakeStats>,
    closed: bool,
}

impl CaptureSession for FakeSession {
    fn set_repeating_request(
        &mut self,
        request: CaptureRequest,
        callback: Arc<dyn CaptureCallback>,
    ) -> Result<()> {
        if self.closed {
            return Err(anyhow!("session already closed"));
        }
        self.stats
            .requests
            .lock()
            .expect("requests lock")
            .push(request);
        *self.stats.installed.lock().expect("installed lock") =
            Some((self.encoder.clone(), callback));
        Ok(())
    }

    fn stop_repeating(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.stats.session_closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
