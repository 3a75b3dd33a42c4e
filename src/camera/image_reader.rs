use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use bytes::Bytes;

use super::types::Size;

/// Encoder output target of a capture session.
///
/// The driver queues finished JPEG buffers, the capture callback acquires
/// them. At most `max_images` buffers exist at once (queued plus acquired);
/// the driver drops frames beyond that instead of growing the queue.
#[derive(Clone)]
pub struct ImageReader {
    inner: Arc<ReaderInner>,
}

struct ReaderInner {
    size: Size,
    max_images: usize,
    queue: Mutex<VecDeque<Bytes>>,
    acquired: AtomicUsize,
    closed: AtomicBool,
}

impl ImageReader {
    pub fn new(size: Size, max_images: usize) -> Self {
        Self {
            inner: Arc::new(ReaderInner {
                size,
                max_images: max_images.max(1),
                queue: Mutex::new(VecDeque::new()),
                acquired: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn size(&self) -> Size {
        self.inner.size
    }

    /// Driver side. Returns false when the buffer was dropped.
    pub fn queue_image(&self, jpeg: Bytes) -> bool {
        if self.is_closed() {
            return false;
        }
        let mut queue = self.inner.queue.lock().unwrap_or_else(PoisonError::into_inner);
        if queue.len() + self.inner.acquired.load(Ordering::Acquire) >= self.inner.max_images {
            return false;
        }
        queue.push_back(jpeg);
        true
    }

    pub fn acquire_next_image(&self) -> Option<Image> {
        if self.is_closed() {
            return None;
        }
        let data = self
            .inner
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()?;
        self.inner.acquired.fetch_add(1, Ordering::AcqRel);
        Some(Image {
            data,
            reader: self.inner.clone(),
        })
    }

    pub fn acquired(&self) -> usize {
        self.inner.acquired.load(Ordering::Acquire)
    }

    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for ImageReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageReader")
            .field("size", &self.inner.size)
            .field("max_images", &self.inner.max_images)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// An acquired buffer. Dropping it releases the slot back to the reader.
pub struct Image {
    data: Bytes,
    reader: Arc<ReaderInner>,
}

impl Image {
    pub fn copy_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.data)
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        self.reader.acquired.fetch_sub(1, Ordering::AcqRel);
    }
}
