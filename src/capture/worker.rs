//! Deferred capture worker.
//!
//! A single named thread owns the bus. It runs the capture scheduled by the
//! interrupt top half and executes raw bus requests from the control
//! surface, so no two bus transactions ever overlap.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Instant, SystemTime};

use bytes::Bytes;
use crossbeam::channel::{bounded, select, Receiver, Sender};
use tracing::{debug, info, trace, warn};

use super::buffer::FrameBuffers;
use super::frame::AcqState;
use super::irq::TopHalf;
use super::stats::AcquisitionStats;
use crate::bus::{Readout, RegisterBus, Transport};
use crate::error::{BusError, Error, Result};
use crate::sync::Signal;
use crate::WorkerConfig;

/// 16-bit word of the frame header carrying the sensor's frame counter.
const FRAME_COUNTER_WORD: usize = 2;

enum Command {
    Read {
        address: u16,
        len: usize,
        reply: Sender<std::result::Result<Readout, BusError>>,
    },
    Write {
        address: u16,
        data: Vec<u8>,
        reply: Sender<std::result::Result<(), BusError>>,
    },
    ResetBuffers,
    Shutdown,
}

/// State the worker thread owns or shares with the rest of the device.
pub(crate) struct WorkerContext<T> {
    pub bus: RegisterBus<T>,
    pub buffers: FrameBuffers,
    pub signal: Arc<Signal>,
    pub top: Arc<TopHalf>,
    /// Set by the reset operation, read-and-cleared only here.
    pub reset_pending: Arc<AtomicBool>,
    pub state: Arc<AtomicU8>,
    pub stats: Arc<AcquisitionStats>,
    pub read_register: u16,
    pub detect_repeated: bool,
}

struct Worker<T> {
    ctx: WorkerContext<T>,
    last_frame_no: Option<u16>,
}

pub(crate) struct CaptureWorker {
    commands: Sender<Command>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureWorker {
    pub(crate) fn spawn<T>(
        config: &WorkerConfig,
        ctx: WorkerContext<T>,
        captures: Receiver<()>,
    ) -> io::Result<Self>
    where
        T: Transport + 'static,
    {
        let (commands, command_rx) = bounded(config.command_queue_depth.max(1));
        let cpu = config.cpu;
        let worker = Worker {
            ctx,
            last_frame_no: None,
        };

        let thread = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || {
                if let Some(id) = cpu {
                    if !core_affinity::set_for_current(core_affinity::CoreId { id }) {
                        warn!(cpu = id, "could not pin capture worker");
                    }
                }
                worker.run(captures, command_rx);
            })?;

        Ok(Self {
            commands,
            thread: Some(thread),
        })
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::WorkerGone)
    }

    /// Best-effort read of `len` bytes at `address`, run on the worker.
    pub(crate) fn read(&self, address: u16, len: usize) -> Result<Readout> {
        let (reply, response) = bounded(1);
        self.send(Command::Read {
            address,
            len,
            reply,
        })?;
        let readout = response.recv().map_err(|_| Error::WorkerGone)??;
        Ok(readout)
    }

    pub(crate) fn write(&self, address: u16, data: Vec<u8>) -> Result<()> {
        let (reply, response) = bounded(1);
        self.send(Command::Write {
            address,
            data,
            reply,
        })?;
        response.recv().map_err(|_| Error::WorkerGone)??;
        Ok(())
    }

    pub(crate) fn reset_buffers(&self) -> Result<()> {
        self.send(Command::ResetBuffers)
    }

    pub(crate) fn shutdown(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.commands.send(Command::Shutdown);
            let _ = thread.join();
        }
    }
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<T: Transport> Worker<T> {
    fn run(mut self, captures: Receiver<()>, commands: Receiver<Command>) {
        info!("capture worker started");
        loop {
            select! {
                recv(captures) -> msg => match msg {
                    Ok(()) => self.capture(),
                    Err(_) => break,
                },
                recv(commands) -> msg => match msg {
                    Ok(Command::Shutdown) | Err(_) => break,
                    Ok(command) => self.execute(command),
                },
            }
        }
        info!("capture worker stopped");
    }

    fn transition(&self, from: AcqState, to: AcqState) {
        // Fails only when the interface was closed meanwhile; Idle then wins.
        if self
            .ctx
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            trace!(?from, ?to, "acquisition state");
        }
    }

    fn capture(&mut self) {
        let started = Instant::now();
        self.transition(AcqState::WaitIrq, AcqState::Capturing);
        self.ctx.stats.record_capture();

        let request = self.ctx.signal.pending();
        let buf = self.ctx.buffers.begin_capture(request);
        if let Err(err) = self.ctx.bus.read(self.ctx.read_register, buf) {
            // Best effort: whatever arrived is still published.
            self.ctx.stats.record_bus_error();
            warn!(%err, size = request.size, "frame read failed, keeping transferred bytes");
        }

        let outcome = if self.ctx.reset_pending.swap(false, Ordering::AcqRel) {
            self.ctx.stats.record_suppressed();
            debug!("frame discarded after reset");
            AcqState::Suppressed
        } else {
            if self.ctx.detect_repeated {
                self.check_repeated();
            }
            let sequence = self.ctx.buffers.commit(SystemTime::now());
            self.ctx.signal.wake();
            self.ctx.stats.record_published();
            trace!(sequence, size = request.size, "frame published");
            AcqState::Published
        };
        self.transition(AcqState::Capturing, outcome);

        metrics::histogram!("touchframe_capture_time_us").record(started.elapsed().as_micros() as f64);

        self.transition(outcome, AcqState::WaitIrq);
        self.ctx.top.enable();
    }

    fn check_repeated(&mut self) {
        let offset = FRAME_COUNTER_WORD * 2;
        let data = self.ctx.buffers.working();
        if data.len() < offset + 2 {
            return;
        }
        let frame_no = u16::from_ne_bytes([data[offset], data[offset + 1]]);
        if self.last_frame_no == Some(frame_no) {
            self.ctx.stats.record_repeated();
            warn!(frame_no, "sensor delivered the same frame twice");
        }
        self.last_frame_no = Some(frame_no);
    }

    fn execute(&mut self, command: Command) {
        match command {
            Command::Read {
                address,
                len,
                reply,
            } => {
                let mut data = vec![0u8; len];
                let result = match self.ctx.bus.read(address, &mut data) {
                    Ok(()) => Ok(Readout {
                        data: Bytes::from(data),
                        fault: None,
                    }),
                    Err(err @ BusError::Transfer(_)) => {
                        self.ctx.stats.record_bus_error();
                        warn!(%err, address, len, "raw read failed, returning transferred bytes");
                        Ok(Readout {
                            data: Bytes::from(data),
                            fault: Some(err),
                        })
                    }
                    Err(err) => Err(err),
                };
                let _ = reply.send(result);
            }
            Command::Write {
                address,
                data,
                reply,
            } => {
                let result = self.ctx.bus.write(address, &data);
                if let Err(err) = &result {
                    if matches!(err, BusError::Transfer(_)) {
                        self.ctx.stats.record_bus_error();
                    }
                    warn!(%err, address, len = data.len(), "raw write failed");
                }
                let _ = reply.send(result);
            }
            Command::ResetBuffers => {
                self.ctx.buffers.reset();
                self.last_frame_no = None;
            }
            Command::Shutdown => {}
        }
    }
}
