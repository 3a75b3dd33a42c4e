//! Command dispatcher sitting between the host (UI, service, signals) and the
//! capture controller plus the HTTP listener.

use std::{net::IpAddr, sync::Arc};

use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    camera::{
        controller::CaptureController,
        traits::{CameraBackend, PreviewSurface},
        types::{AntiFlickerMode, NoiseReductionMode, ZoomDirection},
    },
    core::state::{CameraEvent, ViewState},
    settings::SettingsStore,
    stream::hub::FrameHub,
    web::server::HttpService,
};

const MIN_PORT: u16 = 1025;

#[derive(Debug, Clone)]
pub enum Command {
    Start,
    OpenWithPreview(Option<PreviewSurface>),
    PreviewDestroyed,
    Pause,
    Resume,
    ApplyViewState(ViewState),
    SetZoomRatio(f32),
    ScaleZoom(f32),
    StepZoom(ZoomDirection),
    ToggleZoom,
    SwitchToNextSensor,
    ToggleFlash,
    SetTargetFps(u32),
    SetAntiFlicker(AntiFlickerMode),
    SetNoiseReduction(NoiseReductionMode),
    SetStabilizationOff(bool),
    SetZoomSmoothingDelay(u32),
    SetHttpPort(u16),
    Stop,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::OpenWithPreview(_) => "open-with-preview",
            Self::PreviewDestroyed => "preview-destroyed",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::ApplyViewState(_) => "apply-view-state",
            Self::SetZoomRatio(_) => "set-zoom-ratio",
            Self::ScaleZoom(_) => "scale-zoom",
            Self::StepZoom(_) => "step-zoom",
            Self::ToggleZoom => "toggle-zoom",
            Self::SwitchToNextSensor => "switch-to-next-sensor",
            Self::ToggleFlash => "toggle-flash",
            Self::SetTargetFps(_) => "set-target-fps",
            Self::SetAntiFlicker(_) => "set-anti-flicker",
            Self::SetNoiseReduction(_) => "set-noise-reduction",
            Self::SetStabilizationOff(_) => "set-stabilization-off",
            Self::SetZoomSmoothingDelay(_) => "set-zoom-smoothing-delay",
            Self::SetHttpPort(_) => "set-http-port",
            Self::Stop => "stop",
        }
    }
}

#[derive(Clone)]
pub struct OrchestratorHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl OrchestratorHandle {
    /// Returns false once the orchestrator has stopped.
    pub fn send(&self, command: Command) -> bool {
        self.tx.send(command).is_ok()
    }
}

pub struct Orchestrator {
    backend: Arc<dyn CameraBackend>,
    settings: Arc<SettingsStore>,
    hub: Arc<FrameHub>,
    events: broadcast::Sender<CameraEvent>,
    http: HttpService,
    controller: Option<CaptureController>,
    started: bool,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn CameraBackend>,
        settings: Arc<SettingsStore>,
        hub: Arc<FrameHub>,
        events: broadcast::Sender<CameraEvent>,
        bind_host: IpAddr,
    ) -> Self {
        Self {
            backend,
            settings,
            http: HttpService::new(bind_host, hub.clone()),
            hub,
            events,
            controller: None,
            started: false,
        }
    }

    pub fn spawn(self) -> (OrchestratorHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(rx));
        (OrchestratorHandle { tx }, task)
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            if !self.handle(command).await {
                return;
            }
        }
        debug!("orchestrator mailbox closed");
        self.stop().await;
    }

    /// Returns false when the loop should end.
    async fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Start => self.start().await,
            Command::Stop => {
                self.stop().await;
                return false;
            }
            command if !self.started => {
                warn!("{} received before start, dropped", command.name());
            }
            Command::OpenWithPreview(surface) => {
                let controller = self.controller.get_or_insert_with(|| {
                    CaptureController::spawn(
                        self.backend.clone(),
                        self.settings.clone(),
                        self.hub.clone(),
                        self.events.clone(),
                    )
                });
                controller.set_inside_pause(false);
                controller.set_preview_surface(surface);
                controller.restart();
            }
            Command::SetHttpPort(port) => self.set_http_port(port).await,
            command => {
                let Some(controller) = self.controller.as_ref() else {
                    warn!("{} received before the camera was opened, dropped", command.name());
                    return true;
                };
                dispatch(controller, &self.settings, command);
            }
        }
        true
    }

    async fn start(&mut self) {
        if self.started {
            debug!("orchestrator already started");
            return;
        }
        self.started = true;
        let port = self.settings.snapshot().http_port;
        if let Err(err) = self.http.start(port).await {
            warn!("http listener unavailable: {err:#}");
        }
    }

    async fn set_http_port(&mut self, port: u16) {
        if port < MIN_PORT {
            warn!("port {port} is outside {MIN_PORT}..=65535, ignored");
            return;
        }
        self.settings.update(|settings| settings.http_port = port);
        match self.http.restart_server(port).await {
            Ok(false) => debug!("http listener already on port {port}"),
            Ok(true) => {
                let _ = self.events.send(CameraEvent::PortChanged(port));
                if let Some(controller) = self.controller.as_ref() {
                    controller.restart();
                }
            }
            Err(err) => warn!("failed to move http listener to port {port}: {err:#}"),
        }
    }

    async fn stop(&mut self) {
        info!("stopping");
        if let Some(controller) = self.controller.take() {
            controller.teardown().await;
        }
        self.http.stop().await;
    }
}

fn dispatch(controller: &CaptureController, settings: &SettingsStore, command: Command) {
    match command {
        Command::PreviewDestroyed => controller.preview_destroyed(),
        Command::Pause => {
            if settings.snapshot().background_streaming {
                debug!("background streaming allowed, pause ignored");
            } else {
                controller.set_inside_pause(true);
            }
        }
        Command::Resume => controller.set_inside_pause(false),
        Command::ApplyViewState(state) => {
            settings.save_view_state(&state);
            controller.apply_view_state(state);
        }
        Command::SetZoomRatio(normalized) => controller.set_zoom_ratio(normalized),
        Command::ScaleZoom(factor) => controller.scale_zoom(factor),
        Command::StepZoom(direction) => controller.step_zoom(direction),
        Command::ToggleZoom => controller.toggle_zoom(),
        Command::SwitchToNextSensor => controller.switch_to_next_sensor(),
        Command::ToggleFlash => controller.toggle_flash(),
        Command::SetTargetFps(fps) => controller.set_target_fps(fps),
        Command::SetAntiFlicker(mode) => controller.set_anti_flicker(mode),
        Command::SetNoiseReduction(mode) => controller.set_noise_reduction(mode),
        Command::SetStabilizationOff(off) => controller.set_stabilization_off(off),
        Command::SetZoomSmoothingDelay(delay_ms) => controller.set_zoom_smoothing_delay(delay_ms),
        Command::Start | Command::Stop | Command::OpenWithPreview(_) | Command::SetHttpPort(_) => {
            debug!("{} is not a controller command", command.name());
        }
    }
}
