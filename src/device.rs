//! A bound touch-sensor device instance.
//!
//! [`TouchDevice`] is the explicit handle every operation goes through; any
//! number of independent instances can coexist.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use crossbeam::channel::bounded;
use tracing::{debug, info, instrument, warn};

use crate::bus::{Readout, RegisterBus};
use crate::capture::irq::TopHalf;
use crate::capture::worker::{CaptureWorker, WorkerContext};
use crate::capture::{
    AcqState, AcquisitionStats, FrameBuffers, FrameRequest, IrqHandler, PublishedSlot,
    StatsSnapshot, MAX_FRAME_SIZE,
};
use crate::error::{Error, Result};
use crate::platform::{InterruptLine, Platform, ResetLevel, ResetLine};
use crate::sync::{Deadline, FrameGate, FrameOutcome, Signal};
use crate::{Config, Settings};

pub struct TouchDevice {
    // Teardown runs in field order after `Drop::drop` unregisters the
    // interrupt: deadline thread first, then the capture worker.
    gate: FrameGate,
    worker: CaptureWorker,
    top: Arc<TopHalf>,
    signal: Arc<Signal>,
    published: Arc<PublishedSlot>,
    irq: Arc<dyn InterruptLine>,
    reset_line: Arc<dyn ResetLine>,
    reset_pending: Arc<AtomicBool>,
    settings: Arc<ArcSwap<Settings>>,
    state: Arc<AtomicU8>,
    stats: Arc<AcquisitionStats>,
    opened: AtomicBool,
    timeout_scale: u32,
}

impl TouchDevice {
    /// Acquires the worker thread, the deadline thread and the interrupt
    /// registration, in that order, and leaves the interrupt masked until
    /// [`TouchDevice::open`]. On failure everything already acquired is
    /// released in reverse order.
    #[instrument(skip_all)]
    pub fn bind(platform: Platform, config: &Config) -> Result<Self> {
        let Platform {
            transport,
            irq,
            reset,
        } = platform;

        let stats = Arc::new(AcquisitionStats::default());
        let signal = Arc::new(Signal::new());
        let published = Arc::new(PublishedSlot::new());
        let settings = Arc::new(ArcSwap::from_pointee(Settings::default()));
        let state = Arc::new(AtomicU8::new(AcqState::Idle as u8));
        let reset_pending = Arc::new(AtomicBool::new(false));

        reset
            .configure_output(ResetLevel::Low)
            .map_err(|source| Error::Setup {
                stage: "reset line",
                source,
            })?;

        let (capture_tx, capture_rx) = bounded(1);
        let top = Arc::new(TopHalf::new(irq.clone(), capture_tx, stats.clone()));

        let worker = CaptureWorker::spawn(
            &config.worker,
            WorkerContext {
                bus: RegisterBus::new(transport),
                buffers: FrameBuffers::new(published.clone()),
                signal: signal.clone(),
                top: top.clone(),
                reset_pending: reset_pending.clone(),
                state: state.clone(),
                stats: stats.clone(),
                read_register: config.acquisition.read_register,
                detect_repeated: config.acquisition.detect_repeated_frames,
            },
            capture_rx,
        )
        .map_err(|source| Error::Setup {
            stage: "capture worker",
            source,
        })?;

        let deadline = {
            let signal = signal.clone();
            Deadline::spawn(&format!("{}-deadline", config.worker.thread_name), move || {
                signal.fire_timeout()
            })
        }
        .map_err(|source| Error::Setup {
            stage: "deadline timer",
            source,
        })?;

        irq.register(IrqHandler::new(top.clone()))
            .map_err(|source| Error::Setup {
                stage: "interrupt registration",
                source,
            })?;
        top.disable();

        let gate = FrameGate::new(
            signal.clone(),
            published.clone(),
            deadline,
            settings.clone(),
            stats.clone(),
        );

        info!(
            read_register = config.acquisition.read_register,
            timeout_scale = config.acquisition.timeout_scale,
            "device bound"
        );

        Ok(Self {
            gate,
            worker,
            top,
            signal,
            published,
            irq,
            reset_line: reset,
            reset_pending,
            settings,
            state,
            stats,
            opened: AtomicBool::new(false),
            timeout_scale: config.acquisition.timeout_scale,
        })
    }

    /// Opens the interface: every flag and buffer goes back to its default,
    /// the pending request becomes the header-only request, and the
    /// interrupt is unmasked. Only one opener at a time.
    #[instrument(skip(self))]
    pub fn open(&self) -> Result<()> {
        if self.opened.swap(true, Ordering::AcqRel) {
            warn!("device is already open");
            return Err(Error::Busy);
        }

        self.gate.disarm();
        self.signal.reset();
        self.reset_pending.store(false, Ordering::Release);
        self.published.reset();
        self.worker.reset_buffers()?;

        self.state.store(AcqState::WaitIrq as u8, Ordering::Release);
        self.top.enable();
        info!("device opened");
        Ok(())
    }

    /// Masks the interrupt and drops any armed deadline.
    #[instrument(skip(self))]
    pub fn close(&self) -> Result<()> {
        if !self.opened.swap(false, Ordering::AcqRel) {
            warn!("device is not open");
            return Err(Error::NotOpen);
        }

        self.top.disable();
        self.gate.disarm();
        self.state.store(AcqState::Idle as u8, Ordering::Release);
        info!("device closed");
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::Acquire)
    }

    /// Blocks until the next frame captured for `request`; see
    /// [`FrameGate::get_frame`].
    pub fn get_frame(&self, request: FrameRequest) -> Result<FrameOutcome> {
        if !self.is_open() {
            return Err(Error::NotOpen);
        }
        self.gate.get_frame(request)
    }

    /// Drives the reset line. Any signal not yet consumed is dropped, and
    /// pulling the line low discards the next captured frame.
    #[instrument(skip(self))]
    pub fn reset(&self, level: ResetLevel) -> Result<()> {
        self.reset_line.set_level(level).map_err(Error::ResetLine)?;

        self.signal.clear_wake();
        if level == ResetLevel::Low {
            self.reset_pending.store(true, Ordering::Release);
        }
        debug!(?level, "reset line driven");
        Ok(())
    }

    /// Reads `count` bytes at `address` on the capture worker.
    ///
    /// A transport failure does not fail the call: the bytes received are
    /// returned together with the fault.
    pub fn bus_read(&self, address: u16, count: usize) -> Result<Readout> {
        check_count(count)?;
        self.worker.read(address, count)
    }

    /// Writes `data` at `address` on the capture worker.
    pub fn bus_write(&self, address: u16, data: &[u8]) -> Result<()> {
        check_count(data.len())?;
        self.worker.write(address, data.to_vec())
    }

    /// Makes every blocked and future [`TouchDevice::get_frame`] return
    /// [`FrameOutcome::Unblocked`] until [`TouchDevice::unblock_release`].
    #[instrument(skip(self))]
    pub fn unblock(&self) {
        self.signal.set_unblock();
        debug!("consumers unblocked");
    }

    #[instrument(skip(self))]
    pub fn unblock_release(&self) {
        self.signal.release_unblock();
    }

    /// Unblocks consumers and masks the interrupt.
    #[instrument(skip(self))]
    pub fn suspend(&self) {
        self.unblock();
        self.top.disable();
        info!("acquisition suspended");
    }

    /// Clears the unblock flag and unmasks the interrupt.
    #[instrument(skip(self))]
    pub fn resume(&self) {
        self.signal.release_unblock();
        self.top.enable();
        info!("acquisition resumed");
    }

    /// Enables the frame deadline at `report_interval_us` times the
    /// configured scale, or disables it and cancels any armed instance.
    /// The new deadline applies from the next request on.
    #[instrument(skip(self))]
    pub fn set_timeout(&self, enabled: bool, report_interval_us: u32) {
        if enabled {
            let after = Duration::from_micros(
                u64::from(report_interval_us) * u64::from(self.timeout_scale),
            );
            let timeout = (!after.is_zero()).then_some(after);
            self.settings.rcu(|current| Settings {
                timeout,
                ..Settings::clone(current)
            });
            self.signal.set_timeout_enabled(true);
            debug!(?timeout, "frame deadline enabled");
        } else {
            self.gate.disarm();
            self.signal.set_timeout_enabled(false);
            debug!("frame deadline disabled");
        }
    }

    /// Stores the sensor scan mode; the core does not interpret it.
    pub fn set_scan_mode(&self, mode: u16) {
        self.settings.rcu(|current| Settings {
            scan_mode: mode,
            ..Settings::clone(current)
        });
    }

    pub fn scan_mode(&self) -> u16 {
        self.settings.load().scan_mode
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.signal
            .timeout_enabled()
            .then(|| self.settings.load().timeout)
            .flatten()
    }

    /// Interrupts a caller blocked in [`TouchDevice::get_frame`], which then
    /// returns [`FrameOutcome::Interrupted`]. Returns false if no call was
    /// blocked.
    pub fn interrupt_waiter(&self) -> bool {
        self.signal.interrupt()
    }

    pub fn state(&self) -> AcqState {
        AcqState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

fn check_count(count: usize) -> Result<()> {
    if count == 0 {
        return Err(Error::InvalidArgument("zero byte count"));
    }
    if count > MAX_FRAME_SIZE {
        return Err(Error::InvalidArgument("byte count exceeds maximum"));
    }
    Ok(())
}

impl Drop for TouchDevice {
    fn drop(&mut self) {
        self.irq.unregister();
        self.top.disable();
        debug!("device unbound");
    }
}
