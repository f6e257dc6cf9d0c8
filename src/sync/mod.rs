pub mod deadline;
pub mod gate;
pub mod signal;

pub use deadline::Deadline;
pub use gate::{FrameGate, FrameOutcome};
pub use signal::{Signal, Wake};
