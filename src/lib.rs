pub mod bus;
pub mod capture;
pub mod control;
pub mod device;
pub mod error;
pub mod platform;
pub mod sim;
pub mod sync;

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use capture::{AcqState, Frame, FrameRequest, StatsSnapshot, FRAME_HEADER_SIZE, MAX_FRAME_SIZE};
pub use control::{Command, Reply};
pub use device::TouchDevice;
pub use error::{BusError, Error, Result};
pub use platform::{InterruptLine, Platform, ResetLevel, ResetLine};
pub use sync::FrameOutcome;

/// Register holding the sensor's frame data.
pub const FRAME_DATA_REGISTER: u16 = 0x0400;
/// Multiplier from the consumer's report interval to the frame deadline.
pub const DEFAULT_TIMEOUT_SCALE: u32 = 20;

/// Configuration for one bound device
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub acquisition: AcquisitionConfig,
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub read_register: u16,
    pub timeout_scale: u32,
    /// Warn when two consecutive frames carry the same frame counter.
    pub detect_repeated_frames: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub thread_name: String,
    pub cpu: Option<usize>, // Pin the capture worker to this core
    pub command_queue_depth: usize,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            read_register: FRAME_DATA_REGISTER,
            timeout_scale: DEFAULT_TIMEOUT_SCALE,
            detect_repeated_frames: false,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            thread_name: "touchframe-capture".into(),
            cpu: None,
            command_queue_depth: 4,
        }
    }
}

impl Config {
    /// Defaults, overridden by the TOML file at `path` (if any), overridden
    /// by `TOUCHFRAME_<SECTION>__<KEY>` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let loaded = builder
            .add_source(
                config::Environment::with_prefix("TOUCHFRAME")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(loaded.try_deserialize()?)
    }
}

/// Settings changed at runtime through the control surface.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    /// Frame deadline; `None` when the report interval was zero.
    pub timeout: Option<Duration>,
    pub scan_mode: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_sensor() {
        let config = Config::default();
        assert_eq!(config.acquisition.read_register, 0x0400);
        assert_eq!(config.acquisition.timeout_scale, 20);
        assert!(!config.acquisition.detect_repeated_frames);
        assert_eq!(config.worker.command_queue_depth, 4);
    }

    #[test]
    fn load_merges_a_partial_toml_file_over_defaults() {
        let path = std::env::temp_dir().join(format!("touchframe-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            "[acquisition]\ntimeout_scale = 5\ndetect_repeated_frames = true\n\n[worker]\ncpu = 1\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.acquisition.timeout_scale, 5);
        assert!(config.acquisition.detect_repeated_frames);
        assert_eq!(config.acquisition.read_register, FRAME_DATA_REGISTER);
        assert_eq!(config.worker.cpu, Some(1));
        assert_eq!(config.worker.thread_name, "touchframe-capture");
    }
}
