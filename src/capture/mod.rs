pub mod buffer;
pub mod frame;
pub mod irq;
pub mod stats;
pub(crate) mod worker;

pub use buffer::{FrameBuffers, PublishedSlot};
pub use frame::{AcqState, Frame, FrameRequest, Handle, FRAME_HEADER_SIZE, MAX_FRAME_SIZE};
pub use irq::IrqHandler;
pub use stats::{AcquisitionStats, StatsSnapshot};
