use std::{
    sync::{
        Arc, Mutex, PoisonError, RwLock,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::{image_reader::ImageReader, traits::CaptureCallback};
use crate::{
    core::state::{CameraEvent, ThroughputSample},
    stream::hub::FrameHub,
};

const SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

/// Flags shared between the controller, its handles and the capture callback.
///
/// Reads from the callback are racy snapshots; a stale read delays a stream
/// on/off decision by one frame at most.
pub struct RuntimeFlags {
    pub shutdown: CancellationToken,
    inside_pause: AtomicBool,
    stream_enabled: AtomicBool,
    showing_preview: AtomicBool,
    delivery: RwLock<()>,
}

impl RuntimeFlags {
    pub fn new(stream_enabled: bool) -> Self {
        Self {
            shutdown: CancellationToken::new(),
            inside_pause: AtomicBool::new(false),
            stream_enabled: AtomicBool::new(stream_enabled),
            showing_preview: AtomicBool::new(false),
            delivery: RwLock::new(()),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn inside_pause(&self) -> bool {
        self.inside_pause.load(Ordering::Acquire)
    }

    pub fn set_inside_pause(&self, paused: bool) {
        self.inside_pause.store(paused, Ordering::Release);
    }

    pub fn stream_enabled(&self) -> bool {
        self.stream_enabled.load(Ordering::Acquire)
    }

    pub fn set_stream_enabled(&self, enabled: bool) {
        self.stream_enabled.store(enabled, Ordering::Release);
    }

    pub fn showing_preview(&self) -> bool {
        self.showing_preview.load(Ordering::Acquire)
    }

    pub fn set_showing_preview(&self, showing: bool) {
        self.showing_preview.store(showing, Ordering::Release);
    }

    /// Waits for callbacks that are mid-delivery. Call after `shutdown` was
    /// cancelled; no frame reaches the hub once this returns.
    pub fn close_delivery(&self) {
        drop(self.delivery.write().unwrap_or_else(PoisonError::into_inner));
    }

    fn forwarding_allowed(&self) -> bool {
        !self.is_shutting_down() && self.stream_enabled() && !self.inside_pause()
    }
}

/// Frame interval and byte-rate estimate, rate-limited for observers.
#[derive(Debug, Default)]
pub struct ThroughputMeter {
    last_frame: Option<Instant>,
    last_published: Option<Instant>,
}

impl ThroughputMeter {
    pub fn record(&mut self, now: Instant, bytes: usize) -> Option<ThroughputSample> {
        let previous = self.last_frame.replace(now)?;
        let delta_ms = now.saturating_duration_since(previous).as_millis() as u64;
        if delta_ms == 0 {
            return None;
        }
        if let Some(published) = self.last_published {
            if now.saturating_duration_since(published) <= SAMPLE_INTERVAL {
                return None;
            }
        }
        self.last_published = Some(now);
        Some(ThroughputSample {
            frame_interval_ms: delta_ms,
            rate_kbs: (bytes as u64 * 1000) / (delta_ms * 1024),
        })
    }
}

/// Capture-completed callback installed on every repeating request.
pub struct FrameForwarder {
    reader: ImageReader,
    flags: Arc<RuntimeFlags>,
    hub: Arc<FrameHub>,
    events: broadcast::Sender<CameraEvent>,
    outstanding: AtomicUsize,
    meter: Mutex<ThroughputMeter>,
}

impl FrameForwarder {
    pub fn new(
        reader: ImageReader,
        flags: Arc<RuntimeFlags>,
        hub: Arc<FrameHub>,
        events: broadcast::Sender<CameraEvent>,
    ) -> Self {
        Self {
            reader,
            flags,
            hub,
            events,
            outstanding: AtomicUsize::new(0),
            meter: Mutex::new(ThroughputMeter::default()),
        }
    }
}

impl CaptureCallback for FrameForwarder {
    fn on_capture_completed(&self) {
        let Some(image) = self.reader.acquire_next_image() else {
            return;
        };
        if self.outstanding.load(Ordering::Acquire) > 1 {
            // consumer backlog, release right away
            return;
        }
        self.outstanding.fetch_add(1, Ordering::AcqRel);

        let acquired_at = Instant::now();
        let jpeg = image.copy_bytes();
        drop(image);

        {
            let _delivering = self
                .flags
                .delivery
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            if self.flags.forwarding_allowed() {
                self.hub.send_frame(jpeg.clone());
            }
        }
        self.outstanding.fetch_sub(1, Ordering::AcqRel);

        let sample = self
            .meter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(acquired_at, jpeg.len());
        if let Some(sample) = sample {
            if !self.flags.is_shutting_down() {
                let _ = self.events.send(CameraEvent::Throughput(sample));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::Arc,
        time::{Duration, Instant},
    };

    use bytes::Bytes;
    use tokio::sync::broadcast;

    use super::{FrameForwarder, RuntimeFlags, ThroughputMeter};
    use crate::{
        camera::{image_reader::ImageReader, traits::CaptureCallback, types::Size},
        stream::hub::FrameHub,
    };

    fn forwarder(stream_enabled: bool) -> (FrameForwarder, ImageReader, Arc<RuntimeFlags>, Arc<FrameHub>) {
        let reader = ImageReader::new(Size::new(640, 480), 4);
        let flags = Arc::new(RuntimeFlags::new(stream_enabled));
        let hub = Arc::new(FrameHub::new());
        let (events, _) = broadcast::channel(8);
        let forwarder = FrameForwarder::new(reader.clone(), flags.clone(), hub.clone(), events);
        (forwarder, reader, flags, hub)
    }

    #[test]
    fn frames_reach_the_hub_only_while_streaming() {
        let (forwarder, reader, flags, hub) = forwarder(false);

        reader.queue_image(Bytes::from_static(b"a"));
        forwarder.on_capture_completed();
        assert_eq!(hub.frames_sent(), 0);
        assert_eq!(reader.acquired(), 0, "image must be released even when dropped");

        flags.set_stream_enabled(true);
        reader.queue_image(Bytes::from_static(b"b"));
        forwarder.on_capture_completed();
        assert_eq!(hub.frames_sent(), 1);

        flags.set_inside_pause(true);
        reader.queue_image(Bytes::from_static(b"c"));
        forwarder.on_capture_completed();
        assert_eq!(hub.frames_sent(), 1);
    }

    #[test]
    fn nothing_is_delivered_after_shutdown() {
        let (forwarder, reader, flags, hub) = forwarder(true);
        flags.shutdown.cancel();
        flags.close_delivery();

        reader.queue_image(Bytes::from_static(b"late"));
        forwarder.on_capture_completed();
        assert_eq!(hub.frames_sent(), 0);
    }

    #[test]
    fn meter_reports_at_most_twice_a_second() {
        let mut meter = ThroughputMeter::default();
        let start = Instant::now();

        assert!(meter.record(start, 10_240).is_none(), "first frame has no interval");
        let sample = meter
            .record(start + Duration::from_millis(100), 10_240)
            .expect("first sample");
        assert_eq!(sample.frame_interval_ms, 100);
        assert_eq!(sample.rate_kbs, 100);

        assert!(meter.record(start + Duration::from_millis(200), 10_240).is_none());
        assert!(meter.record(start + Duration::from_millis(600), 10_240).is_none());
        assert!(meter.record(start + Duration::from_millis(700), 10_240).is_some());
    }
}
