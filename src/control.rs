//! Control surface: one command per operation the outer shell exposes.

use bytes::Bytes;
use tracing::trace;

use crate::bus::Readout;
use crate::capture::FrameRequest;
use crate::device::TouchDevice;
use crate::error::Result;
use crate::platform::ResetLevel;
use crate::sync::FrameOutcome;

#[derive(Debug, Clone)]
pub enum Command {
    GetFrame(FrameRequest),
    Reset(ResetLevel),
    BusRead { address: u16, count: usize },
    BusWrite { address: u16, data: Bytes },
    Unblock,
    UnblockRelease,
    Suspend,
    Resume,
    SetTimeout { enabled: bool, report_interval_us: u32 },
    SetScanMode(u16),
}

#[derive(Debug)]
pub enum Reply {
    Frame(FrameOutcome),
    Read(Readout),
    Done,
}

impl TouchDevice {
    /// Runs one control command.
    pub fn execute(&self, command: Command) -> Result<Reply> {
        trace!(?command, "control command");
        let reply = match command {
            Command::GetFrame(request) => Reply::Frame(self.get_frame(request)?),
            Command::Reset(level) => {
                self.reset(level)?;
                Reply::Done
            }
            Command::BusRead { address, count } => Reply::Read(self.bus_read(address, count)?),
            Command::BusWrite { address, data } => {
                self.bus_write(address, &data)?;
                Reply::Done
            }
            Command::Unblock => {
                self.unblock();
                Reply::Done
            }
            Command::UnblockRelease => {
                self.unblock_release();
                Reply::Done
            }
            Command::Suspend => {
                self.suspend();
                Reply::Done
            }
            Command::Resume => {
                self.resume();
                Reply::Done
            }
            Command::SetTimeout {
                enabled,
                report_interval_us,
            } => {
                self.set_timeout(enabled, report_interval_us);
                Reply::Done
            }
            Command::SetScanMode(mode) => {
                self.set_scan_mode(mode);
                Reply::Done
            }
        };
        Ok(reply)
    }
}
