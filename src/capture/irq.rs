//! Interrupt top half and nested line masking.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam::channel::{Sender, TrySendError};
use tracing::{error, trace, warn};

use super::stats::AcquisitionStats;
use crate::platform::InterruptLine;

#[derive(Debug, Default)]
struct MaskState {
    /// Outstanding disables; the line is unmasked only at zero.
    depth: u32,
    /// An interrupt arrived while masked.
    latched: bool,
}

pub(crate) struct TopHalf {
    mask: Mutex<MaskState>,
    line: Arc<dyn InterruptLine>,
    capture: Sender<()>,
    stats: Arc<AcquisitionStats>,
}

impl TopHalf {
    pub(crate) fn new(
        line: Arc<dyn InterruptLine>,
        capture: Sender<()>,
        stats: Arc<AcquisitionStats>,
    ) -> Self {
        Self {
            mask: Mutex::new(MaskState::default()),
            line,
            capture,
            stats,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MaskState> {
        self.mask.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Never blocks beyond the mask lock: masks the line and queues one
    /// capture. While masked the interrupt is only latched.
    pub(crate) fn interrupt(&self) {
        self.stats.record_interrupt();
        let schedule = {
            let mut state = self.lock();
            if state.depth > 0 {
                state.latched = true;
                false
            } else {
                state.depth = 1;
                self.line.mask();
                true
            }
        };
        if schedule {
            self.schedule();
        }
    }

    pub(crate) fn disable(&self) {
        let mut state = self.lock();
        state.depth += 1;
        if state.depth == 1 {
            self.line.mask();
        }
    }

    /// Removes one level of masking. On the last level a latched interrupt is
    /// delivered instead of unmasking the line.
    pub(crate) fn enable(&self) {
        let deliver = {
            let mut state = self.lock();
            if state.depth == 0 {
                warn!("unbalanced interrupt enable ignored");
                return;
            }
            state.depth -= 1;
            if state.depth > 0 {
                false
            } else if state.latched {
                state.latched = false;
                state.depth = 1;
                true
            } else {
                self.line.unmask();
                false
            }
        };
        if deliver {
            trace!("delivering latched interrupt");
            self.schedule();
        }
    }

    pub(crate) fn is_masked(&self) -> bool {
        self.lock().depth > 0
    }

    fn schedule(&self) {
        match self.capture.try_send(()) {
            Ok(()) => trace!("capture scheduled"),
            // The queued capture re-enables the line once it completes, which
            // balances the level taken here.
            Err(TrySendError::Full(())) => warn!("capture already queued, interrupt merged"),
            Err(TrySendError::Disconnected(())) => {
                error!("capture worker is gone, interrupt dropped")
            }
        }
    }
}

/// Handle the platform calls from interrupt context when the frame-ready
/// line fires.
#[derive(Clone)]
pub struct IrqHandler {
    top: Arc<TopHalf>,
}

impl IrqHandler {
    pub(crate) fn new(top: Arc<TopHalf>) -> Self {
        Self { top }
    }

    pub fn on_interrupt(&self) {
        self.top.interrupt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::{bounded, Receiver};
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct Line {
        masked: AtomicBool,
    }

    impl InterruptLine for Line {
        fn register(&self, _: IrqHandler) -> std::io::Result<()> {
            Ok(())
        }
        fn unregister(&self) {}
        fn mask(&self) {
            self.masked.store(true, Ordering::SeqCst);
        }
        fn unmask(&self) {
            self.masked.store(false, Ordering::SeqCst);
        }
    }

    fn top_half() -> (Arc<TopHalf>, Arc<Line>, Receiver<()>) {
        let line = Arc::new(Line::default());
        let (tx, rx) = bounded(1);
        let top = Arc::new(TopHalf::new(
            line.clone(),
            tx,
            Arc::new(AcquisitionStats::default()),
        ));
        (top, line, rx)
    }

    #[test]
    fn interrupt_masks_and_schedules_exactly_one_capture() {
        let (top, line, rx) = top_half();

        top.interrupt();
        top.interrupt();
        top.interrupt();

        assert!(line.masked.load(Ordering::SeqCst));
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn interrupt_latched_while_masked_is_delivered_on_enable() {
        let (top, line, rx) = top_half();
        top.interrupt();
        rx.try_recv().unwrap();
        top.interrupt();

        // Capture finished: the latched interrupt schedules the next one and
        // the line stays masked.
        top.enable();
        assert!(rx.try_recv().is_ok());
        assert!(line.masked.load(Ordering::SeqCst));

        top.enable();
        assert!(!line.masked.load(Ordering::SeqCst));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn masking_nests() {
        let (top, line, rx) = top_half();
        top.disable();
        top.interrupt();
        top.disable();

        top.enable();
        assert!(top.is_masked());
        assert!(rx.try_recv().is_err());

        top.enable();
        assert!(rx.try_recv().is_ok());
        top.enable();
        assert!(!line.masked.load(Ordering::SeqCst));
    }

    #[test]
    fn unbalanced_enable_is_ignored() {
        let (top, _line, _rx) = top_half();
        top.enable();
        assert!(!top.is_masked());
        top.disable();
        assert!(top.is_masked());
    }
}
