use std::time::SystemTime;

use bytes::Bytes;

use crate::error::{Error, Result};

/// Size of the header region at the start of every frame.
pub const FRAME_HEADER_SIZE: usize = 16;
/// Largest frame the sensor produces: header plus 8 KiB of payload.
pub const MAX_FRAME_SIZE: usize = 8 * 1024 + FRAME_HEADER_SIZE;

/// Opaque consumer-side handle naming where a frame (or its timestamp) ends
/// up. Zero is the null handle.
pub type Handle = u64;

/// What the consumer currently wants.
///
/// Requests are compared structurally: a published frame belongs to a caller
/// only if the request it was captured for equals the caller's request in
/// every field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FrameRequest {
    /// Bytes to read, header included.
    pub size: usize,
    /// Destination buffer handle.
    pub buffer: Handle,
    /// Timestamp destination handle.
    pub timestamp: Handle,
}

impl FrameRequest {
    pub fn new(size: usize, buffer: Handle, timestamp: Handle) -> Self {
        Self {
            size,
            buffer,
            timestamp,
        }
    }

    /// The request installed when the interface is opened: header only, no
    /// destination.
    pub fn header_only() -> Self {
        Self {
            size: FRAME_HEADER_SIZE,
            ..Self::default()
        }
    }

    /// Checks a consumer request before it is installed.
    pub fn validate(&self) -> Result<()> {
        if self.buffer == 0 || self.timestamp == 0 {
            return Err(Error::InvalidArgument("null destination handle"));
        }
        if self.size == 0 {
            return Err(Error::InvalidArgument("zero frame size"));
        }
        if self.size > MAX_FRAME_SIZE {
            return Err(Error::InvalidArgument("frame size exceeds maximum"));
        }
        if self.size % 2 != 0 {
            return Err(Error::InvalidArgument("frame size is not word aligned"));
        }
        Ok(())
    }
}

/// A completed frame handed to the consumer.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Exactly `request.size` bytes, in host word order.
    pub data: Bytes,
    /// The request this frame was captured for.
    pub request: FrameRequest,
    /// Wall-clock time of publication.
    pub timestamp: SystemTime,
    /// Publication counter, starting at 1 after every open.
    pub sequence: u64,
}

impl Frame {
    /// The fixed header region (shorter if the request was smaller).
    pub fn header(&self) -> &[u8] {
        &self.data[..self.data.len().min(FRAME_HEADER_SIZE)]
    }

    /// Bytes following the header.
    pub fn payload(&self) -> &[u8] {
        &self.data[self.data.len().min(FRAME_HEADER_SIZE)..]
    }
}

/// Where the acquisition state machine currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AcqState {
    /// Interface closed.
    Idle = 0,
    WaitIrq = 1,
    Capturing = 2,
    Published = 3,
    /// The last capture was discarded because a reset raced it.
    Suppressed = 4,
}

impl AcqState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::WaitIrq,
            2 => Self::Capturing,
            3 => Self::Published,
            4 => Self::Suppressed,
            _ => Self::Idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_rejects_malformed_requests() {
        assert!(FrameRequest::new(64, 1, 2).validate().is_ok());
        assert!(FrameRequest::new(MAX_FRAME_SIZE, 1, 2).validate().is_ok());

        for bad in [
            FrameRequest::new(64, 0, 2),
            FrameRequest::new(64, 1, 0),
            FrameRequest::new(0, 1, 2),
            FrameRequest::new(MAX_FRAME_SIZE + 2, 1, 2),
            FrameRequest::new(17, 1, 2),
        ] {
            assert!(
                matches!(bad.validate(), Err(Error::InvalidArgument(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn header_only_request_never_matches_a_consumer_request() {
        let default = FrameRequest::header_only();
        assert_eq!(default.size, FRAME_HEADER_SIZE);
        assert!(default.validate().is_err());
        assert_ne!(default, FrameRequest::new(FRAME_HEADER_SIZE, 1, 1));
    }

    #[test]
    fn header_and_payload_split_at_sixteen_bytes() {
        let frame = Frame {
            data: Bytes::from((0u8..20).collect::<Vec<_>>()),
            request: FrameRequest::new(20, 1, 1),
            timestamp: SystemTime::now(),
            sequence: 1,
        };
        assert_eq!(frame.header().len(), FRAME_HEADER_SIZE);
        assert_eq!(frame.payload(), &[16, 17, 18, 19]);
    }
}
