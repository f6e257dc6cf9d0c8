//! Collaborator interfaces the surrounding platform implements.
//!
//! The acquisition core never touches hardware directly: it receives a bus
//! [`Transport`], an interrupt line it can mask and unmask, and a reset line.

use std::io;
use std::sync::Arc;

use crate::bus::Transport;
use crate::capture::IrqHandler;

/// Level of the sensor's reset line. Low holds the sensor in reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetLevel {
    Low,
    High,
}

/// The frame-ready interrupt line.
///
/// Masking is level-style: the core masks the line as soon as an interrupt
/// arrives and unmasks it only after the deferred capture has finished. None
/// of these methods may call back into the registered handler synchronously.
pub trait InterruptLine: Send + Sync {
    /// Installs `handler`, which the platform invokes from its interrupt
    /// context each time the line fires.
    fn register(&self, handler: IrqHandler) -> io::Result<()>;

    fn unregister(&self);

    fn mask(&self);

    fn unmask(&self);
}

pub trait ResetLine: Send + Sync {
    /// Configures the line as an output driven at `initial`.
    fn configure_output(&self, initial: ResetLevel) -> io::Result<()>;

    fn set_level(&self, level: ResetLevel) -> io::Result<()>;
}

/// Everything a device instance needs from the platform.
pub struct Platform {
    pub transport: Box<dyn Transport>,
    pub irq: Arc<dyn InterruptLine>,
    pub reset: Arc<dyn ResetLine>,
}
