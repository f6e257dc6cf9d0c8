//! Working/published frame double buffer.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use bytes::Bytes;

use super::frame::{Frame, FrameRequest, MAX_FRAME_SIZE};

struct Published {
    data: Box<[u8]>,
    request: FrameRequest,
    size: usize,
    timestamp: SystemTime,
    sequence: u64,
}

impl Published {
    fn to_frame(&self) -> Frame {
        Frame {
            data: Bytes::copy_from_slice(&self.data[..self.size]),
            request: self.request,
            timestamp: self.timestamp,
            sequence: self.sequence,
        }
    }
}

/// The most recently committed frame.
///
/// The lock is held only while copying in or out, never across a wait.
pub struct PublishedSlot {
    inner: Mutex<Published>,
}

impl Default for PublishedSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl PublishedSlot {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Published {
                data: vec![0; MAX_FRAME_SIZE].into_boxed_slice(),
                request: FrameRequest::default(),
                size: 0,
                timestamp: SystemTime::UNIX_EPOCH,
                sequence: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Published> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Back to zeroed defaults.
    pub(crate) fn reset(&self) {
        let mut published = self.lock();
        published.data.fill(0);
        published.request = FrameRequest::default();
        published.size = 0;
        published.timestamp = SystemTime::UNIX_EPOCH;
        published.sequence = 0;
    }

    /// Owned copy of the published frame, whichever request it belongs to.
    pub fn snapshot(&self) -> Frame {
        self.lock().to_frame()
    }

    /// Owned copy of the published frame if it was captured for `request`.
    pub fn snapshot_matching(&self, request: &FrameRequest) -> Option<Frame> {
        let published = self.lock();
        (published.request == *request).then(|| published.to_frame())
    }

    fn commit(&self, working: &[u8], request: FrameRequest, timestamp: SystemTime) -> u64 {
        let mut published = self.lock();
        // The whole buffer, so bytes past `size` stay those of the sensor's
        // previous longer frames.
        published.data.copy_from_slice(working);
        published.request = request;
        published.size = request.size;
        published.timestamp = timestamp;
        published.sequence += 1;
        published.sequence
    }
}

/// Owns the working buffer filled by the capture worker and promotes it into
/// the shared [`PublishedSlot`].
pub struct FrameBuffers {
    working: Box<[u8]>,
    request: FrameRequest,
    published: Arc<PublishedSlot>,
}

impl FrameBuffers {
    pub fn new(published: Arc<PublishedSlot>) -> Self {
        Self {
            working: vec![0; MAX_FRAME_SIZE].into_boxed_slice(),
            request: FrameRequest::default(),
            published,
        }
    }

    /// Zeroes the working buffer and forgets its request.
    pub fn reset(&mut self) {
        self.working.fill(0);
        self.request = FrameRequest::default();
    }

    /// Starts a capture for `request` and returns the region to fill.
    pub fn begin_capture(&mut self, request: FrameRequest) -> &mut [u8] {
        self.request = request;
        let size = request.size.min(MAX_FRAME_SIZE);
        &mut self.working[..size]
    }

    /// The bytes captured so far for the current request.
    pub fn working(&self) -> &[u8] {
        &self.working[..self.request.size.min(MAX_FRAME_SIZE)]
    }

    /// Publishes the working buffer; returns the new sequence number.
    pub fn commit(&self, timestamp: SystemTime) -> u64 {
        self.published.commit(&self.working, self.request, timestamp)
    }

    pub fn published(&self) -> &Arc<PublishedSlot> {
        &self.published
    }
}
