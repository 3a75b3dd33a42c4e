use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::oneshot;

use super::{
    image_reader::ImageReader,
    request::CaptureRequest,
    types::{SensorCapabilities, SensorDesc},
};

/// Completion handle for a callback-style driver operation.
///
/// One sender per request. A driver that finds the receiver gone must
/// release whatever it was about to hand over.
pub type Reply<T> = oneshot::Sender<Result<T>>;

/// Entry point into the platform camera stack.
#[async_trait]
pub trait CameraBackend: Send + Sync + 'static {
    /// Static list of usable sensors, in presentation order.
    fn sensors(&self) -> Vec<SensorDesc>;

    async fn capabilities(&self, camera_id: &str) -> Result<SensorCapabilities>;

    fn open_device(&self, camera_id: &str, reply: Reply<Box<dyn CameraDevice>>);
}

pub trait CameraDevice: Send {
    fn camera_id(&self) -> &str;

    fn create_session(&mut self, targets: Vec<OutputTarget>, reply: Reply<Box<dyn CaptureSession>>);

    fn close(&mut self) -> Result<()>;
}

pub trait CaptureSession: Send {
    /// Replaces the outstanding repeating request.
    fn set_repeating_request(
        &mut self,
        request: CaptureRequest,
        callback: Arc<dyn CaptureCallback>,
    ) -> Result<()>;

    fn stop_repeating(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

/// Invoked on a driver-owned context once a frame landed in the encoder target.
pub trait CaptureCallback: Send + Sync {
    fn on_capture_completed(&self);
}

/// Externally owned preview surface handle.
#[derive(Debug, Clone)]
pub struct PreviewSurface {
    id: String,
    valid: Arc<AtomicBool>,
}

impl PreviewSurface {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            valid: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone)]
pub enum OutputTarget {
    Encoder(ImageReader),
    Preview(PreviewSurface),
}

impl OutputTarget {
    pub fn is_preview(&self) -> bool {
        matches!(self, Self::Preview(_))
    }
}
