use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::stream::{hub::FrameHub, mjpeg};

pub struct StreamState {
    pub hub: Arc<FrameHub>,
    pub shutdown: CancellationToken,
}

pub async fn liveness() -> &'static str {
    "Ok"
}

pub async fn mjpeg_stream(State(state): State<Arc<StreamState>>) -> Response {
    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(1);
    let frames = state.hub.subscribe();
    let shutdown = state.shutdown.clone();
    info!("mjpeg client connected ({} active)", state.hub.client_count());

    tokio::spawn(async move {
        mjpeg::pump_frames(frames, tx, shutdown).await;
        info!("mjpeg client disconnected");
    });

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(mjpeg::CONTENT_TYPE));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));

    (
        StatusCode::OK,
        headers,
        Body::from_stream(ReceiverStream::new(rx)),
    )
        .into_response()
}
