//! Blocking request/response gate used by the single consumer.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::{debug, instrument, trace};

use super::deadline::Deadline;
use super::signal::{Signal, Wake};
use crate::capture::{AcquisitionStats, Frame, FrameRequest, PublishedSlot};
use crate::error::Result;
use crate::Settings;

/// Result of one [`FrameGate::get_frame`] call. Exactly one per call.
#[derive(Debug, Clone)]
pub enum FrameOutcome {
    Frame(Frame),
    /// No frame was published before the deadline.
    TimedOut,
    /// The unblock flag is set.
    Unblocked,
    /// The blocked call was interrupted from outside; safe to retry.
    Interrupted,
}

impl FrameOutcome {
    pub fn frame(self) -> Option<Frame> {
        match self {
            Self::Frame(frame) => Some(frame),
            _ => None,
        }
    }
}

pub struct FrameGate {
    signal: Arc<Signal>,
    published: Arc<PublishedSlot>,
    deadline: Deadline,
    settings: Arc<ArcSwap<Settings>>,
    stats: Arc<AcquisitionStats>,
}

impl FrameGate {
    pub fn new(
        signal: Arc<Signal>,
        published: Arc<PublishedSlot>,
        deadline: Deadline,
        settings: Arc<ArcSwap<Settings>>,
        stats: Arc<AcquisitionStats>,
    ) -> Self {
        Self {
            signal,
            published,
            deadline,
            settings,
            stats,
        }
    }

    /// Installs `request` as the pending request and blocks until a frame
    /// captured for exactly that request is published, the deadline expires,
    /// the gate is unblocked, or the wait is interrupted.
    ///
    /// A frame published for a different request (one that was replaced
    /// while its capture was in flight) is never returned; the call goes
    /// back to waiting instead.
    #[instrument(skip(self), level = "debug")]
    pub fn get_frame(&self, request: FrameRequest) -> Result<FrameOutcome> {
        request.validate()?;
        self.arm_timeout();

        loop {
            match self.signal.wait(request) {
                Wake::Signaled => {
                    if let Some(frame) = self.published.snapshot_matching(&request) {
                        self.deadline.cancel();
                        trace!(sequence = frame.sequence, "frame delivered");
                        return Ok(FrameOutcome::Frame(frame));
                    }
                    self.stats.record_stale();
                    trace!("published frame belongs to another request, waiting again");
                }
                Wake::TimedOut => {
                    self.stats.record_timeout();
                    debug!("no frame before the deadline");
                    return Ok(FrameOutcome::TimedOut);
                }
                Wake::Unblocked => {
                    self.deadline.cancel();
                    debug!("wait unblocked");
                    return Ok(FrameOutcome::Unblocked);
                }
                Wake::Interrupted => {
                    self.deadline.cancel();
                    debug!("wait interrupted");
                    return Ok(FrameOutcome::Interrupted);
                }
            }
        }
    }

    fn arm_timeout(&self) {
        if !self.signal.timeout_enabled() {
            return;
        }
        let Some(after) = self.settings.load().timeout else {
            return;
        };
        // Cancel first so a late expiry of the old instance cannot survive
        // the flag reset.
        self.deadline.cancel();
        self.signal.clear_timeout();
        self.deadline.arm(after);
    }

    /// Cancels an armed deadline. Returns true if one was armed.
    pub fn disarm(&self) -> bool {
        self.deadline.cancel()
    }

    pub fn signal(&self) -> &Arc<Signal> {
        &self.signal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::FrameBuffers;
    use std::sync::mpsc;
    use std::thread;
    use std::time::{Duration, SystemTime};

    struct Rig {
        gate: Arc<FrameGate>,
        buffers: FrameBuffers,
    }

    fn rig(timeout: Option<Duration>) -> Rig {
        let signal = Arc::new(Signal::new());
        let published = Arc::new(PublishedSlot::new());
        let deadline = {
            let signal = signal.clone();
            Deadline::spawn("gate-test-deadline", move || signal.fire_timeout()).unwrap()
        };
        let settings = Arc::new(ArcSwap::from_pointee(Settings {
            timeout,
            scan_mode: 0,
        }));
        signal.set_timeout_enabled(timeout.is_some());
        let gate = FrameGate::new(
            signal,
            published.clone(),
            deadline,
            settings,
            Arc::new(AcquisitionStats::default()),
        );
        Rig {
            gate: Arc::new(gate),
            buffers: FrameBuffers::new(published),
        }
    }

    fn publish(rig: &mut Rig, request: FrameRequest, fill: u8) {
        rig.buffers.begin_capture(request).fill(fill);
        rig.buffers.commit(SystemTime::now());
        rig.gate.signal().wake();
    }

    fn wait_until_blocked(gate: &FrameGate) {
        while gate.signal().waiters() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn invalid_requests_fail_before_blocking() {
        let rig = rig(None);
        assert!(rig.gate.get_frame(FrameRequest::new(0, 1, 1)).is_err());
        assert!(rig.gate.get_frame(FrameRequest::new(16, 0, 1)).is_err());
    }

    #[test]
    fn a_stale_frame_is_never_returned_to_a_newer_request() {
        let mut rig = rig(None);
        let r1 = FrameRequest::new(4, 1, 1);
        let r2 = FrameRequest::new(4, 2, 2);

        // R1's capture completes and signals before anyone consumes it.
        publish(&mut rig, r1, 0x11);

        let (tx, rx) = mpsc::channel();
        let consumer = {
            let gate = rig.gate.clone();
            thread::spawn(move || tx.send(gate.get_frame(r2).unwrap()).unwrap())
        };

        // The stale wake is consumed and rejected; the consumer blocks again.
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        wait_until_blocked(&rig.gate);

        publish(&mut rig, r2, 0x22);
        let frame = rx
            .recv_timeout(Duration::from_secs(2))
            .unwrap()
            .frame()
            .unwrap();
        consumer.join().unwrap();

        assert_eq!(frame.request, r2);
        assert_eq!(&frame.data[..], &[0x22; 4]);
    }

    #[test]
    fn times_out_without_a_publish() {
        let rig = rig(Some(Duration::from_millis(20)));
        let outcome = rig.gate.get_frame(FrameRequest::new(4, 1, 1)).unwrap();
        assert!(matches!(outcome, FrameOutcome::TimedOut));
    }

    #[test]
    fn a_publish_before_the_deadline_disarms_it() {
        let mut rig = rig(Some(Duration::from_millis(300)));
        let request = FrameRequest::new(4, 1, 1);
        let consumer = {
            let gate = rig.gate.clone();
            thread::spawn(move || gate.get_frame(request).unwrap())
        };
        wait_until_blocked(&rig.gate);
        publish(&mut rig, request, 0x33);

        assert!(matches!(consumer.join().unwrap(), FrameOutcome::Frame(_)));
        assert!(!rig.gate.disarm());
    }

    #[test]
    fn unblock_releases_a_blocked_consumer() {
        let rig = rig(None);
        let consumer = {
            let gate = rig.gate.clone();
            thread::spawn(move || gate.get_frame(FrameRequest::new(4, 1, 1)).unwrap())
        };
        wait_until_blocked(&rig.gate);
        rig.gate.signal().set_unblock();

        assert!(matches!(consumer.join().unwrap(), FrameOutcome::Unblocked));
    }
}
