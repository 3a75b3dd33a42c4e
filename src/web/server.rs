use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{handlers::StreamState, routes::build_router};
use crate::stream::hub::FrameHub;

const STOP_GRACE: Duration = Duration::from_millis(500);

struct RunningServer {
    port: u16,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns the single HTTP listener serving the frame hub.
pub struct HttpService {
    host: IpAddr,
    hub: Arc<FrameHub>,
    running: Option<RunningServer>,
}

impl HttpService {
    pub fn new(host: IpAddr, hub: Arc<FrameHub>) -> Self {
        Self {
            host,
            hub,
            running: None,
        }
    }

    pub fn port(&self) -> Option<u16> {
        self.running.as_ref().map(|running| running.port)
    }

    pub async fn start(&mut self, port: u16) -> Result<()> {
        if self.port() == Some(port) {
            return Ok(());
        }
        self.stop().await;

        let addr = SocketAddr::new(self.host, port);
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind http listener on {addr}"))?;

        let shutdown = CancellationToken::new();
        let app = build_router(Arc::new(StreamState {
            hub: self.hub.clone(),
            shutdown: shutdown.clone(),
        }));
        let signal = shutdown.clone();
        let task = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await;
            if let Err(err) = served {
                error!("http listener failed: {err}");
            }
        });

        info!("http listener serving on {addr}");
        self.running = Some(RunningServer {
            port,
            shutdown,
            task,
        });
        Ok(())
    }

    pub async fn stop(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };
        info!("stopping http listener on port {}", running.port);
        running.shutdown.cancel();
        if tokio::time::timeout(STOP_GRACE, &mut running.task)
            .await
            .is_err()
        {
            warn!("http listener did not drain in time, aborting");
            running.task.abort();
        }
    }

    /// Rebinds on `port`. Returns false, touching nothing, when already there.
    pub async fn restart_server(&mut self, port: u16) -> Result<bool> {
        if self.port() == Some(port) {
            return Ok(false);
        }
        info!("restarting http listener on port {port}");
        self.stop().await;
        self.start(port).await?;
        Ok(true)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        net::{IpAddr, Ipv4Addr},
        sync::Arc,
        time::Duration,
    };

    use bytes::Bytes;

    use super::HttpService;
    use crate::stream::hub::FrameHub;

    pub(crate) fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .expect("bind ephemeral port")
            .local_addr()
            .expect("local addr")
            .port()
    }

    pub(crate) async fn read_until(response: &mut reqwest::Response, needle: &[u8]) -> Vec<u8> {
        let mut seen = Vec::new();
        tokio::time::timeout(Duration::from_secs(2), async {
            while !seen.windows(needle.len()).any(|w| w == needle) {
                let chunk = response
                    .chunk()
                    .await
                    .expect("stream read")
                    .expect("stream still open");
                seen.extend_from_slice(&chunk);
            }
        })
        .await
        .expect("expected bytes should arrive");
        seen
    }

    fn service() -> (HttpService, Arc<FrameHub>) {
        let hub = Arc::new(FrameHub::new());
        (
            HttpService::new(IpAddr::V4(Ipv4Addr::LOCALHOST), hub.clone()),
            hub,
        )
    }

    #[tokio::test]
    async fn liveness_probe_answers_ok() {
        let (mut http, _hub) = service();
        let port = free_port();
        http.start(port).await.expect("listener should start");

        let body = reqwest::get(format!("http://127.0.0.1:{port}/cam"))
            .await
            .expect("request")
            .text()
            .await
            .expect("body");
        assert_eq!(body, "Ok");
        http.stop().await;
    }

    #[tokio::test]
    async fn stream_carries_multipart_jpeg_parts() {
        let (mut http, hub) = service();
        let port = free_port();
        http.start(port).await.expect("listener should start");

        let mut response = reqwest::get(format!("http://127.0.0.1:{port}/cam.mjpeg"))
            .await
            .expect("request");
        assert_eq!(response.status(), 200);
        assert_eq!(
            response.headers()["content-type"],
            "multipart/x-mixed-replace; boundary=FRAME"
        );

        hub.send_frame(Bytes::from_static(b"\xFF\xD8first\xFF\xD9"));
        let seen = read_until(&mut response, b"first\xFF\xD9").await;
        assert!(seen.starts_with(b"--FRAME\r\nContent-Type: image/jpeg\r\n\r\n"));

        http.stop().await;
    }

    #[tokio::test]
    async fn same_port_restart_keeps_clients_connected() {
        let (mut http, hub) = service();
        let port = free_port();
        http.start(port).await.expect("listener should start");

        let mut response = reqwest::get(format!("http://127.0.0.1:{port}/cam.mjpeg"))
            .await
            .expect("request");
        hub.send_frame(Bytes::from_static(b"one"));
        read_until(&mut response, b"one").await;

        let restarted = http.restart_server(port).await.expect("restart");
        assert!(!restarted);

        hub.send_frame(Bytes::from_static(b"two"));
        read_until(&mut response, b"two").await;
        http.stop().await;
    }

    #[tokio::test]
    async fn port_change_moves_the_listener() {
        let (mut http, _hub) = service();
        let old_port = free_port();
        http.start(old_port).await.expect("listener should start");

        let new_port = free_port();
        assert!(http.restart_server(new_port).await.expect("restart"));
        assert_eq!(http.port(), Some(new_port));

        let ok = reqwest::get(format!("http://127.0.0.1:{new_port}/cam"))
            .await
            .expect("new port should answer");
        assert_eq!(ok.status(), 200);
        assert!(
            reqwest::get(format!("http://127.0.0.1:{old_port}/cam"))
                .await
                .is_err()
        );
        http.stop().await;
    }
}
