//! Capture session controller.
//!
//! All session state lives in a single worker task that drains a command
//! mailbox; the public handle only enqueues. Restarts requested while one is
//! already running are folded into a single rerun.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use super::{
    capture::{FrameForwarder, RuntimeFlags},
    image_reader::ImageReader,
    request::{self, CaptureRequest, Tunables},
    traits::{CameraBackend, CameraDevice, CaptureCallback, CaptureSession, OutputTarget, PreviewSurface},
    types::{AntiFlickerMode, NoiseReductionMode, SensorCapabilities, SensorDesc, Size, ZoomDirection},
    zoom::{ZoomAnimator, ZoomRange, zoom_control},
};
use crate::{
    core::{
        errors::CameraError,
        state::{CameraEvent, CameraSnapshot, ChangeKind, SessionPhase, ViewState},
    },
    settings::SettingsStore,
    stream::hub::FrameHub,
};

const MAX_IMAGES: usize = 4;
const COMPLETION_TIMEOUT: Duration = Duration::from_secs(10);
const FIRST_RUN_QUALITY: u8 = 1;
const PREFERRED_SIZE: Size = Size::new(1280, 720);

enum Command {
    Restart,
    SetPreview(Option<PreviewSurface>),
    PreviewDestroyed,
    ApplyViewState(ViewState),
    SetZoomRatio(f32),
    ScaleZoom(f32),
    StepZoom(ZoomDirection),
    ToggleZoom,
    ZoomStep { generation: u64, ratio: f32 },
    SwitchToNextSensor,
    ToggleFlash,
    SetTargetFps(u32),
    SetAntiFlicker(AntiFlickerMode),
    SetNoiseReduction(NoiseReductionMode),
    SetStabilizationOff(bool),
    SetZoomSmoothingDelay(u32),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Restart,
    Exit,
}

/// Cloneable handle to the controller worker. Every method is fire-and-forget.
#[derive(Clone)]
pub struct CaptureController {
    tx: mpsc::UnboundedSender<Command>,
    flags: Arc<RuntimeFlags>,
    view: watch::Receiver<ViewState>,
    phase: watch::Receiver<SessionPhase>,
}

impl CaptureController {
    /// Starts the worker with the persisted view state and tunables. Nothing
    /// is opened until the first `restart`.
    pub fn spawn(
        backend: Arc<dyn CameraBackend>,
        settings: Arc<SettingsStore>,
        hub: Arc<FrameHub>,
        events: broadcast::Sender<CameraEvent>,
    ) -> Self {
        let sensors = backend.sensors();
        let default_sensor = sensors
            .first()
            .map(|sensor| sensor.camera_id.clone())
            .unwrap_or_else(|| "0".to_string());
        let view_state = settings.load_view_state(&default_sensor);
        let prefs = settings.snapshot();
        let tunables = Tunables {
            target_fps: prefs.target_fps,
            anti_flicker: prefs.anti_flicker,
            noise_reduction: prefs.noise_reduction,
            stabilization_off: prefs.stabilization_off,
            zoom_smoothing_delay_ms: prefs.zoom_smoothing_delay_ms,
        };

        let flags = Arc::new(RuntimeFlags::new(view_state.stream_enabled));
        let (tx, rx) = mpsc::unbounded_channel();
        let (view_tx, view) = watch::channel(view_state.clone());
        let (phase_tx, phase) = watch::channel(SessionPhase::Idle);

        let worker = Worker {
            backend,
            settings,
            hub,
            events,
            flags: flags.clone(),
            mailbox: tx.downgrade(),
            view_tx,
            phase_tx,
            view_state,
            tunables,
            sensors,
            preview: None,
            caps: None,
            zoom_range: ZoomRange::new(1.0, 1.0),
            current_zoom: 1.0,
            animator: ZoomAnimator::new(),
            device: None,
            session: None,
            reader: None,
            request: None,
            callback: None,
        };
        tokio::spawn(worker.run(rx));

        Self {
            tx,
            flags,
            view,
            phase,
        }
    }

    pub fn restart(&self) {
        self.send(Command::Restart);
    }

    pub fn set_preview_surface(&self, surface: Option<PreviewSurface>) {
        self.send(Command::SetPreview(surface));
    }

    pub fn preview_destroyed(&self) {
        self.send(Command::PreviewDestroyed);
    }

    pub fn apply_view_state(&self, state: ViewState) {
        self.send(Command::ApplyViewState(state));
    }

    /// `normalized` is 0..1 across the sensor's zoom range.
    pub fn set_zoom_ratio(&self, normalized: f32) {
        self.send(Command::SetZoomRatio(normalized));
    }

    pub fn scale_zoom(&self, factor: f32) {
        self.send(Command::ScaleZoom(factor));
    }

    pub fn step_zoom(&self, direction: ZoomDirection) {
        self.send(Command::StepZoom(direction));
    }

    pub fn toggle_zoom(&self) {
        self.send(Command::ToggleZoom);
    }

    pub fn switch_to_next_sensor(&self) {
        self.send(Command::SwitchToNextSensor);
    }

    pub fn toggle_flash(&self) {
        self.send(Command::ToggleFlash);
    }

    pub fn set_target_fps(&self, fps: u32) {
        self.send(Command::SetTargetFps(fps));
    }

    pub fn set_anti_flicker(&self, mode: AntiFlickerMode) {
        self.send(Command::SetAntiFlicker(mode));
    }

    pub fn set_noise_reduction(&self, mode: NoiseReductionMode) {
        self.send(Command::SetNoiseReduction(mode));
    }

    pub fn set_stabilization_off(&self, off: bool) {
        self.send(Command::SetStabilizationOff(off));
    }

    pub fn set_zoom_smoothing_delay(&self, delay_ms: u32) {
        self.send(Command::SetZoomSmoothingDelay(delay_ms));
    }

    pub fn set_inside_pause(&self, paused: bool) {
        self.flags.set_inside_pause(paused);
    }

    pub fn inside_pause(&self) -> bool {
        self.flags.inside_pause()
    }

    pub fn is_showing_preview(&self) -> bool {
        self.flags.showing_preview()
    }

    pub fn view_state(&self) -> ViewState {
        self.view.borrow().clone()
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<SessionPhase> {
        self.phase.clone()
    }

    /// Cancels whatever is in flight, releases the device and waits until no
    /// frame can be delivered anymore.
    pub async fn teardown(&self) {
        self.flags.shutdown.cancel();
        let (done, finished) = oneshot::channel();
        if self.tx.send(Command::Shutdown(done)).is_ok() {
            let _ = finished.await;
        }
    }

    fn send(&self, command: Command) {
        if self.flags.is_shutting_down() {
            debug!("controller is shutting down, command dropped");
            return;
        }
        if self.tx.send(command).is_err() {
            debug!("controller worker is gone, command dropped");
        }
    }
}

struct Worker {
    backend: Arc<dyn CameraBackend>,
    settings: Arc<SettingsStore>,
    hub: Arc<FrameHub>,
    events: broadcast::Sender<CameraEvent>,
    flags: Arc<RuntimeFlags>,
    mailbox: mpsc::WeakUnboundedSender<Command>,
    view_tx: watch::Sender<ViewState>,
    phase_tx: watch::Sender<SessionPhase>,

    view_state: ViewState,
    tunables: Tunables,
    sensors: Vec<SensorDesc>,
    preview: Option<PreviewSurface>,
    caps: Option<SensorCapabilities>,
    zoom_range: ZoomRange,
    current_zoom: f32,
    animator: ZoomAnimator,

    device: Option<Box<dyn CameraDevice>>,
    session: Option<Box<dyn CaptureSession>>,
    reader: Option<ImageReader>,
    request: Option<CaptureRequest>,
    callback: Option<Arc<dyn CaptureCallback>>,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            let flow = match self.handle(command) {
                Flow::Restart => self.restart_coalesced(&mut rx).await,
                flow => flow,
            };
            if flow == Flow::Exit {
                return;
            }
        }
        debug!("controller mailbox closed");
        self.shutdown();
    }

    /// Runs a restart while still draining the mailbox. Restart requests that
    /// arrive meanwhile only mark a rerun; everything else is handled once
    /// the current attempt finished, in arrival order.
    async fn restart_coalesced(&mut self, rx: &mut mpsc::UnboundedReceiver<Command>) -> Flow {
        loop {
            if self.flags.is_shutting_down() {
                return Flow::Continue;
            }

            let mut rerun = false;
            let mut deferred = Vec::new();
            let mut mailbox_open = true;
            {
                let restart = self.restart_once();
                tokio::pin!(restart);
                loop {
                    tokio::select! {
                        biased;
                        () = &mut restart => break,
                        command = rx.recv(), if mailbox_open => match command {
                            Some(Command::Restart) => rerun = true,
                            Some(other) => deferred.push(other),
                            None => mailbox_open = false,
                        },
                    }
                }
            }

            for command in deferred {
                match self.handle(command) {
                    Flow::Continue => {}
                    Flow::Restart => rerun = true,
                    Flow::Exit => return Flow::Exit,
                }
            }
            if !rerun {
                return Flow::Continue;
            }
            debug!("restart requested while one was running, going again");
        }
    }

    async fn restart_once(&mut self) {
        self.stop_running();
        if let Err(err) = self.initialize().await {
            if matches!(err.downcast_ref(), Some(CameraError::ShuttingDown)) {
                debug!("camera initialization abandoned for shutdown");
            } else {
                warn!("failed to initialize camera: {err:#}");
            }
            self.stop_running();
        }
    }

    async fn initialize(&mut self) -> Result<()> {
        self.ensure_running()?;

        let Some(default_sensor) = self.sensors.first().map(|s| s.camera_id.clone()) else {
            return Err(CameraError::UnknownSensor(self.view_state.sensor_id.clone()).into());
        };
        if !self
            .sensors
            .iter()
            .any(|sensor| sensor.camera_id == self.view_state.sensor_id)
        {
            warn!(
                "camera {} is not available, using {default_sensor}",
                self.view_state.sensor_id
            );
            self.view_state.sensor_id = default_sensor.clone();
            self.commit_view_state();
        }

        match self.configure_sensor().await {
            Ok(()) => Ok(()),
            Err(err) if self.flags.is_shutting_down() => Err(err),
            Err(err) if self.view_state.sensor_id == default_sensor => Err(err),
            Err(err) => {
                warn!(
                    "camera {} failed ({err:#}), falling back to {default_sensor}",
                    self.view_state.sensor_id
                );
                self.stop_running();
                self.view_state.sensor_id = default_sensor;
                self.view_state.resolution_index = None;
                self.view_state.flash_enabled = false;
                self.commit_view_state();
                self.configure_sensor().await
            }
        }
    }

    async fn configure_sensor(&mut self) -> Result<()> {
        let camera_id = self.view_state.sensor_id.clone();
        self.set_phase(SessionPhase::Opening);

        let mut caps = self
            .backend
            .capabilities(&camera_id)
            .await
            .with_context(|| format!("failed to read capabilities of camera {camera_id}"))?;
        self.ensure_running()?;

        caps.output_sizes.sort_by_key(|size| (size.area(), size.width));
        caps.output_sizes.dedup();
        if caps.output_sizes.is_empty() {
            return Err(CameraError::NoOutputSizes(camera_id).into());
        }
        self.zoom_range = ZoomRange::from_capability(&caps.zoom);
        if repair_view_state(&mut self.view_state, &caps) {
            self.commit_view_state();
        }
        let size = self
            .view_state
            .resolution_index
            .and_then(|index| caps.output_sizes.get(index).copied())
            .ok_or_else(|| anyhow!("camera {camera_id} has no usable resolution"))?;
        self.caps = Some(caps);

        let preview = self.preview.clone().filter(|surface| {
            self.view_state.preview_enabled && !self.flags.inside_pause() && surface.is_valid()
        });

        let (reply, opened) = oneshot::channel();
        self.backend.open_device(&camera_id, reply);
        let mut device = await_completion(&self.flags, opened, "device open").await?;
        if self.flags.is_shutting_down() {
            release(device.close(), "device");
            return Err(CameraError::ShuttingDown.into());
        }

        let reader = ImageReader::new(size, MAX_IMAGES);
        let mut targets = vec![OutputTarget::Encoder(reader.clone())];
        if let Some(surface) = preview {
            targets.push(OutputTarget::Preview(surface));
        }
        let with_preview = targets.len() > 1;

        self.set_phase(SessionPhase::Configuring);
        let (reply, configured) = oneshot::channel();
        device.create_session(targets.clone(), reply);
        self.device = Some(device);
        self.reader = Some(reader.clone());

        let session = await_completion(&self.flags, configured, "session configure")
            .await
            .map_err(|err| -> anyhow::Error {
                match err.downcast::<CameraError>() {
                    Ok(known) => known.into(),
                    Err(err) => CameraError::ConfigureFailed(format!("{err:#}")).into(),
                }
            })?;
        self.session = Some(session);
        if self.flags.is_shutting_down() {
            return Err(CameraError::ShuttingDown.into());
        }

        self.current_zoom = self.zoom_range.clamp(self.settings.load_zoom_ratio());
        let mut request = CaptureRequest::new(targets);
        self.apply_all(&mut request);
        let callback: Arc<dyn CaptureCallback> = Arc::new(FrameForwarder::new(
            reader,
            self.flags.clone(),
            self.hub.clone(),
            self.events.clone(),
        ));
        if let Some(session) = self.session.as_mut() {
            session
                .set_repeating_request(request.clone(), callback.clone())
                .context("failed to start repeating request")?;
        }
        self.request = Some(request);
        self.callback = Some(callback);
        self.flags.set_showing_preview(with_preview);

        self.set_phase(SessionPhase::Streaming);
        info!(
            "camera {camera_id} streaming {size} at quality {} (preview: {with_preview})",
            self.view_state.quality
        );
        self.publish_snapshot();
        Ok(())
    }

    fn handle(&mut self, command: Command) -> Flow {
        match command {
            Command::Restart => return Flow::Restart,
            Command::Shutdown(done) => {
                self.shutdown();
                let _ = done.send(());
                return Flow::Exit;
            }
            Command::SetPreview(surface) => self.preview = surface,
            Command::PreviewDestroyed => {
                self.preview = None;
                if self.flags.showing_preview() {
                    return Flow::Restart;
                }
            }
            Command::ApplyViewState(state) => return self.apply_view_state(state),
            Command::SetZoomRatio(normalized) => {
                self.animator.cancel();
                let ratio = self.zoom_range.from_normalized(normalized);
                self.set_zoom(ratio);
            }
            Command::ScaleZoom(factor) => {
                self.animator.cancel();
                let ratio = self.zoom_range.scaled(self.current_zoom, factor);
                self.set_zoom(ratio);
            }
            Command::StepZoom(direction) => {
                let target = self.zoom_range.stepped(self.current_zoom, direction);
                self.animate_zoom(target);
            }
            Command::ToggleZoom => {
                let target = self.zoom_range.toggle_target(self.current_zoom);
                self.animate_zoom(target);
            }
            Command::ZoomStep { generation, ratio } => {
                if generation == self.animator.generation() {
                    self.set_zoom(ratio);
                }
            }
            Command::SwitchToNextSensor => return self.switch_to_next_sensor(),
            Command::ToggleFlash => self.toggle_flash(),
            Command::SetTargetFps(fps) => {
                if fps != self.tunables.target_fps {
                    self.tunables.target_fps = fps;
                    self.settings.update(|s| s.target_fps = fps);
                    return Flow::Restart;
                }
            }
            Command::SetAntiFlicker(mode) => {
                if mode != self.tunables.anti_flicker {
                    self.tunables.anti_flicker = mode;
                    self.settings.update(|s| s.anti_flicker = mode);
                    self.update_repeating_request();
                }
            }
            Command::SetNoiseReduction(mode) => {
                if mode != self.tunables.noise_reduction {
                    self.tunables.noise_reduction = mode;
                    self.settings.update(|s| s.noise_reduction = mode);
                    self.update_repeating_request();
                }
            }
            Command::SetStabilizationOff(off) => {
                if off != self.tunables.stabilization_off {
                    self.tunables.stabilization_off = off;
                    self.settings.update(|s| s.stabilization_off = off);
                    return Flow::Restart;
                }
            }
            Command::SetZoomSmoothingDelay(delay_ms) => {
                self.tunables.zoom_smoothing_delay_ms = delay_ms;
                self.settings.update(|s| s.zoom_smoothing_delay_ms = delay_ms);
            }
        }
        Flow::Continue
    }

    /// Classifies against the state this worker last adopted, so commands
    /// queued behind each other compare against their predecessor.
    fn apply_view_state(&mut self, state: ViewState) -> Flow {
        let change = ChangeKind::between(&self.view_state, &state);
        self.view_state = state;
        self.flags.set_stream_enabled(self.view_state.stream_enabled);
        self.view_tx.send_replace(self.view_state.clone());
        match change {
            ChangeKind::Major => Flow::Restart,
            ChangeKind::Minor => {
                self.update_repeating_request();
                self.publish_snapshot();
                Flow::Continue
            }
            ChangeKind::None => Flow::Continue,
        }
    }

    fn switch_to_next_sensor(&mut self) -> Flow {
        if self.sensors.is_empty() {
            warn!("no cameras to switch between");
            return Flow::Continue;
        }
        let next = match self
            .sensors
            .iter()
            .position(|sensor| sensor.camera_id == self.view_state.sensor_id)
        {
            Some(index) => (index + 1) % self.sensors.len(),
            None => 0,
        };
        self.view_state.sensor_id = self.sensors[next].camera_id.clone();
        self.view_state.resolution_index = None;
        self.view_state.flash_enabled = false;
        self.current_zoom = 1.0;
        self.settings.save_zoom_ratio(1.0);
        self.commit_view_state();
        info!("switching to camera {}", self.view_state.sensor_id);
        Flow::Restart
    }

    fn toggle_flash(&mut self) {
        let flash_available = self.caps.as_ref().is_some_and(|caps| caps.flash_available);
        if self.session.is_none() || !flash_available {
            debug!("flash toggle dropped, no flash-capable session");
            return;
        }
        self.view_state.flash_enabled = !self.view_state.flash_enabled;
        self.commit_view_state();
        self.update_repeating_request();
        self.publish_snapshot();
    }

    fn set_zoom(&mut self, ratio: f32) {
        if self.session.is_none() {
            debug!("zoom dropped, no active session");
            return;
        }
        let ratio = self.zoom_range.clamp(ratio);
        if ratio == self.current_zoom {
            return;
        }
        self.current_zoom = ratio;
        if let (Some(request), Some(caps)) = (self.request.as_mut(), self.caps.as_ref()) {
            request.zoom = Some(zoom_control(&caps.zoom, caps.active_array, ratio));
        }
        if self.resubmit() {
            self.settings.save_zoom_ratio(ratio);
            self.publish_snapshot();
        }
    }

    fn animate_zoom(&mut self, target: f32) {
        if self.session.is_none() {
            debug!("zoom dropped, no active session");
            return;
        }
        let delay_ms = self.tunables.zoom_smoothing_delay_ms;
        if delay_ms == 0 {
            self.animator.cancel();
            self.set_zoom(target);
            return;
        }
        let mailbox = self.mailbox.clone();
        self.animator.start(
            self.current_zoom,
            self.zoom_range.clamp(target),
            Duration::from_millis(delay_ms.into()),
            move |generation, ratio| {
                mailbox
                    .upgrade()
                    .is_some_and(|tx| tx.send(Command::ZoomStep { generation, ratio }).is_ok())
            },
        );
    }

    fn apply_all(&self, request: &mut CaptureRequest) {
        let Some(caps) = self.caps.as_ref() else {
            return;
        };
        request.zoom = Some(zoom_control(&caps.zoom, caps.active_array, self.current_zoom));
        request::apply_fps(request, caps, self.tunables.target_fps);
        request::apply_stabilization(request, caps, self.tunables.stabilization_off);
        apply_in_place(request, caps, &self.view_state, &self.tunables);
    }

    /// Applies the keys that do not require a new session and resubmits.
    fn update_repeating_request(&mut self) {
        let (Some(request), Some(caps)) = (self.request.as_mut(), self.caps.as_ref()) else {
            debug!("no active session, request update dropped");
            return;
        };
        apply_in_place(request, caps, &self.view_state, &self.tunables);
        self.resubmit();
    }

    fn resubmit(&mut self) -> bool {
        let (Some(session), Some(request), Some(callback)) = (
            self.session.as_mut(),
            self.request.as_ref(),
            self.callback.as_ref(),
        ) else {
            return false;
        };
        match session.set_repeating_request(request.clone(), callback.clone()) {
            Ok(()) => true,
            Err(err) => {
                debug!("failed to update repeating request: {err:#}");
                false
            }
        }
    }

    fn publish_snapshot(&self) {
        if self.flags.is_shutting_down() {
            return;
        }
        let (Some(caps), Some(resolution_index)) =
            (self.caps.as_ref(), self.view_state.resolution_index)
        else {
            return;
        };
        let Some(selected_sensor) = self
            .sensors
            .iter()
            .find(|sensor| sensor.camera_id == self.view_state.sensor_id)
        else {
            return;
        };
        let snapshot = CameraSnapshot {
            sensors: self.sensors.clone(),
            selected_sensor: selected_sensor.clone(),
            resolutions: caps.output_sizes.clone(),
            resolution_index,
            current_zoom: self.current_zoom,
            min_zoom: self.zoom_range.min,
            max_zoom: self.zoom_range.max,
            has_flash: caps.flash_available,
            quality: self.view_state.quality,
            flash_enabled: self.view_state.flash_enabled,
            sensor_orientation: caps.sensor_orientation,
        };
        let _ = self.events.send(CameraEvent::State(snapshot));
    }

    fn commit_view_state(&mut self) {
        self.settings.save_view_state(&self.view_state);
        self.flags.set_stream_enabled(self.view_state.stream_enabled);
        self.view_tx.send_replace(self.view_state.clone());
    }

    fn set_phase(&self, phase: SessionPhase) {
        self.phase_tx.send_if_modified(|current| {
            if *current == phase {
                false
            } else {
                *current = phase;
                true
            }
        });
    }

    fn ensure_running(&self) -> Result<()> {
        if self.flags.is_shutting_down() {
            Err(CameraError::ShuttingDown.into())
        } else {
            Ok(())
        }
    }

    /// Best-effort release of everything the session holds. Errors are
    /// logged and swallowed; the handles are gone afterwards regardless.
    fn stop_running(&mut self) {
        self.animator.cancel();
        if self.device.is_some() || self.session.is_some() {
            self.set_phase(SessionPhase::Closing);
        }
        if let Some(mut session) = self.session.take() {
            release(session.stop_repeating(), "repeating request");
            release(session.close(), "session");
        }
        if let Some(mut device) = self.device.take() {
            debug!("closing camera {}", device.camera_id());
            release(device.close(), "device");
        }
        if let Some(reader) = self.reader.take() {
            reader.close();
        }
        self.request = None;
        self.callback = None;
        self.flags.set_showing_preview(false);
        self.set_phase(SessionPhase::Idle);
    }

    fn shutdown(&mut self) {
        info!("shutting down capture controller");
        self.flags.shutdown.cancel();
        self.stop_running();
        self.flags.close_delivery();
        info!("capture controller stopped");
    }
}

/// Keys that can change on a live session: flash, noise reduction,
/// anti-banding and JPEG quality.
fn apply_in_place(
    request: &mut CaptureRequest,
    caps: &SensorCapabilities,
    view_state: &ViewState,
    tunables: &Tunables,
) {
    request::apply_flash(request, caps, view_state.flash_enabled);
    request::apply_noise_reduction(request, caps, tunables.noise_reduction);
    request::apply_anti_flicker(request, caps, tunables.anti_flicker);
    request::apply_quality(request, view_state.quality);
}

/// Waits for a driver completion, giving up on shutdown or after a timeout.
/// Dropping the receiver tells the driver to release what it produced.
async fn await_completion<T>(
    flags: &RuntimeFlags,
    completion: oneshot::Receiver<Result<T>>,
    what: &'static str,
) -> Result<T> {
    tokio::select! {
        _ = flags.shutdown.cancelled() => Err(CameraError::ShuttingDown.into()),
        outcome = tokio::time::timeout(COMPLETION_TIMEOUT, completion) => match outcome {
            Err(_) => Err(CameraError::Timeout(what).into()),
            Ok(Err(_)) => Err(CameraError::CallbackDropped(what).into()),
            Ok(Ok(result)) => result.with_context(|| format!("{what} failed")),
        },
    }
}

fn release(result: Result<()>, what: &str) {
    if let Err(err) = result {
        debug!("failed to release {what}: {err:#}");
    }
}

/// Index into ascending `sizes` used when none was chosen yet: 1280x720 if
/// offered, else the largest size at most 720 lines high, else the largest.
pub fn default_resolution_index(sizes: &[Size]) -> usize {
    sizes
        .iter()
        .position(|size| *size == PREFERRED_SIZE)
        .or_else(|| sizes.iter().rposition(|size| size.height <= PREFERRED_SIZE.height))
        .unwrap_or(sizes.len().saturating_sub(1))
}

/// Fixes a view state against freshly read capabilities. Returns whether
/// anything changed. A first-time resolution pick also drops quality to the
/// minimum.
pub fn repair_view_state(state: &mut ViewState, caps: &SensorCapabilities) -> bool {
    let mut changed = false;
    let first_setup = state.resolution_index.is_none();
    let out_of_range = state
        .resolution_index
        .is_some_and(|index| index >= caps.output_sizes.len());
    if first_setup || out_of_range {
        state.resolution_index = Some(default_resolution_index(&caps.output_sizes));
        if first_setup {
            state.quality = FIRST_RUN_QUALITY;
        }
        changed = true;
    }
    if state.flash_enabled && !caps.flash_available {
        state.flash_enabled = false;
        changed = true;
    }
    changed
}
