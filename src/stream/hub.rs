use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::sync::watch;

#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub seq: u64,
    pub jpeg: Bytes,
}

/// Conflated single-slot hand-off between the capture callback and the
/// HTTP clients.
///
/// Publishing overwrites the slot and never waits on a consumer; each
/// consumer wakes on the next version and reads whatever is latest.
pub struct FrameHub {
    slot: watch::Sender<Frame>,
    seq: AtomicU64,
}

impl FrameHub {
    pub fn new() -> Self {
        let (slot, _) = watch::channel(Frame::default());
        Self {
            slot,
            seq: AtomicU64::new(0),
        }
    }

    pub fn send_frame(&self, jpeg: Bytes) -> u64 {
        let seq = self.seq.fetch_add(1, Ordering::AcqRel) + 1;
        self.slot.send_replace(Frame { seq, jpeg });
        seq
    }

    /// The current frame counts as already seen: a new client starts at the
    /// next captured frame.
    pub fn subscribe(&self) -> watch::Receiver<Frame> {
        self.slot.subscribe()
    }

    pub fn client_count(&self) -> usize {
        self.slot.receiver_count()
    }

    pub fn frames_sent(&self) -> u64 {
        self.seq.load(Ordering::Acquire)
    }
}

impl Default for FrameHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use super::FrameHub;

    #[test]
    fn publishing_without_clients_does_not_block() {
        let hub = FrameHub::new();
        for i in 0..1000u32 {
            hub.send_frame(Bytes::from(i.to_be_bytes().to_vec()));
        }
        assert_eq!(hub.frames_sent(), 1000);
        assert_eq!(hub.client_count(), 0);
    }

    #[tokio::test]
    async fn slow_client_sees_only_the_latest_frame() {
        let hub = FrameHub::new();
        let mut rx = hub.subscribe();

        hub.send_frame(Bytes::from_static(b"n"));
        hub.send_frame(Bytes::from_static(b"n+1"));

        rx.changed().await.expect("hub alive");
        let frame = rx.borrow_and_update().clone();
        assert_eq!(frame.seq, 2);
        assert_eq!(&frame.jpeg[..], b"n+1");
        assert!(!rx.has_changed().expect("hub alive"));
    }

    #[tokio::test]
    async fn new_client_waits_for_the_next_frame() {
        let hub = FrameHub::new();
        hub.send_frame(Bytes::from_static(b"old"));

        let mut rx = hub.subscribe();
        let waited = tokio::time::timeout(Duration::from_millis(50), rx.changed()).await;
        assert!(waited.is_err(), "no backlog should be replayed");

        hub.send_frame(Bytes::from_static(b"new"));
        rx.changed().await.expect("hub alive");
        assert_eq!(&rx.borrow_and_update().jpeg[..], b"new");
    }
}
