use thiserror::Error;

/// Failures of a single bus transaction.
#[derive(Debug, Error)]
pub enum BusError {
    /// Transactions move whole 16-bit words.
    #[error("transaction size {0} is not a multiple of 2")]
    OddLength(usize),

    #[error("transaction size {size} exceeds the {max} byte limit")]
    TooLarge { size: usize, max: usize },

    /// The transport reported a failure. Any bytes it did transfer have
    /// already been placed in the caller's buffer.
    #[error("transfer failed: {0}")]
    Transfer(#[from] std::io::Error),
}

/// Errors returned by the acquisition core.
#[derive(Debug, Error)]
pub enum Error {
    /// Rejected before any I/O took place.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("bus transaction failed: {0}")]
    Bus(#[from] BusError),

    #[error("device is already open")]
    Busy,

    #[error("device is not open")]
    NotOpen,

    /// Binding the device failed; everything acquired so far was released.
    #[error("device setup failed during {stage}: {source}")]
    Setup {
        stage: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("reset line failed: {0}")]
    ResetLine(#[source] std::io::Error),

    #[error("capture worker is no longer running")]
    WorkerGone,

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;
