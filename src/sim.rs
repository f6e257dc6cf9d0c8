//! Software interrupt and reset lines for running the core without hardware.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::capture::IrqHandler;
use crate::platform::{InterruptLine, ResetLevel, ResetLine};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Interrupt and reset lines driven by the caller instead of a sensor.
#[derive(Default)]
pub struct SimLines {
    handler: Mutex<Option<IrqHandler>>,
    masked: AtomicBool,
    reset: Mutex<Option<ResetLevel>>,
    refuse_registration: AtomicBool,
}

impl SimLines {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Lines whose interrupt registration fails, for exercising setup
    /// unwinding.
    pub fn refusing_registration() -> Arc<Self> {
        let lines = Self::default();
        lines.refuse_registration.store(true, Ordering::SeqCst);
        Arc::new(lines)
    }

    /// Fires the frame-ready interrupt. Returns false if no handler is
    /// registered.
    pub fn raise(&self) -> bool {
        let handler = lock(&self.handler).clone();
        match handler {
            Some(handler) => {
                trace!("simulated interrupt");
                handler.on_interrupt();
                true
            }
            None => false,
        }
    }

    pub fn is_masked(&self) -> bool {
        self.masked.load(Ordering::SeqCst)
    }

    pub fn is_registered(&self) -> bool {
        lock(&self.handler).is_some()
    }

    /// Current reset level, `None` until the line is configured.
    pub fn reset_level(&self) -> Option<ResetLevel> {
        *lock(&self.reset)
    }
}

impl InterruptLine for SimLines {
    fn register(&self, handler: IrqHandler) -> io::Result<()> {
        if self.refuse_registration.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::ResourceBusy,
                "interrupt line already claimed",
            ));
        }
        *lock(&self.handler) = Some(handler);
        Ok(())
    }

    fn unregister(&self) {
        lock(&self.handler).take();
    }

    fn mask(&self) {
        self.masked.store(true, Ordering::SeqCst);
    }

    fn unmask(&self) {
        self.masked.store(false, Ordering::SeqCst);
    }
}

impl ResetLine for SimLines {
    fn configure_output(&self, initial: ResetLevel) -> io::Result<()> {
        *lock(&self.reset) = Some(initial);
        Ok(())
    }

    fn set_level(&self, level: ResetLevel) -> io::Result<()> {
        *lock(&self.reset) = Some(level);
        Ok(())
    }
}
