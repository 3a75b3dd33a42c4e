use bytes::{BufMut, Bytes, BytesMut};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::hub::Frame;

pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=FRAME";

const PART_HEADER: &[u8] = b"--FRAME\r\nContent-Type: image/jpeg\r\n\r\n";

/// One multipart part: boundary line, part header, raw JPEG.
pub fn encode_part(jpeg: &[u8]) -> Bytes {
    let mut part = BytesMut::with_capacity(PART_HEADER.len() + jpeg.len());
    part.put_slice(PART_HEADER);
    part.put_slice(jpeg);
    part.freeze()
}

/// Per-client consumption loop.
///
/// Waits for each new frame in the hub slot and forwards it as a part.
/// Ends when the client goes away, the hub is dropped, or `shutdown` fires;
/// none of those affect other clients.
pub async fn pump_frames(
    mut frames: watch::Receiver<Frame>,
    out: mpsc::Sender<Result<Bytes, std::io::Error>>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = out.closed() => break,
            changed = frames.changed() => {
                if changed.is_err() {
                    break;
                }
                let part = {
                    let frame = frames.borrow_and_update();
                    encode_part(&frame.jpeg)
                };
                if out.send(Ok(part)).await.is_err() {
                    break;
                }
            }
        }
    }
    debug!("mjpeg client loop finished");
}
