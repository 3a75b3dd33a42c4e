use bytes::{Bytes, BytesMut};

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];
const MAX_PENDING_BYTES: usize = 4 * 1024 * 1024;

/// Splits a raw MJPEG byte stream (concatenated JPEGs, possibly with
/// multipart noise between them) into individual frames.
pub struct MjpegSplitter {
    pending: BytesMut,
}

impl MjpegSplitter {
    pub fn new() -> Self {
        Self {
            pending: BytesMut::with_capacity(256 * 1024),
        }
    }

    /// Feeds a chunk and returns every frame it completed, oldest first.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.pending.extend_from_slice(chunk);
        if self.pending.len() > MAX_PENDING_BYTES {
            let overflow = self.pending.len() - MAX_PENDING_BYTES;
            let _ = self.pending.split_to(overflow);
        }

        let mut frames = Vec::new();
        loop {
            let Some(start) = find_marker(&self.pending, &JPEG_SOI) else {
                // keep a trailing 0xFF, it may be the first half of an SOI
                let keep = usize::from(self.pending.last() == Some(&0xFF));
                let drop_len = self.pending.len() - keep;
                let _ = self.pending.split_to(drop_len);
                break;
            };
            let _ = self.pending.split_to(start);

            let Some(end) = find_marker(&self.pending[2..], &JPEG_EOI) else {
                break;
            };
            let frame_len = 2 + end + 2;
            frames.push(self.pending.split_to(frame_len).freeze());
        }
        frames
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl Default for MjpegSplitter {
    fn default() -> Self {
        Self::new()
    }
}

fn find_marker(buffer: &[u8], marker: &[u8; 2]) -> Option<usize> {
    buffer.windows(2).position(|w| w == marker)
}
