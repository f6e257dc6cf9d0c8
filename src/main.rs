//! Touchframe acquisition harness over a simulated sensor

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use color_eyre::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use touchframe::bus::MemoryTransport;
use touchframe::sim::SimLines;
use touchframe::{Config, FrameOutcome, FrameRequest, Platform, TouchDevice, FRAME_HEADER_SIZE};

/// Simulated report interval of the sensor.
const REPORT_INTERVAL: Duration = Duration::from_millis(8);
/// Frame payload the consumer asks for, header included.
const REQUEST_SIZE: usize = FRAME_HEADER_SIZE + 256;

fn init_tracing() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("touchframe=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::uptime());

    #[cfg(feature = "profiling")]
    {
        use tracing_subscriber::layer::SubscriberExt;
        let subscriber = builder
            .finish()
            .with(tracing_tracy::TracyLayer::default());
        tracing::subscriber::set_global_default(subscriber)?;
    }
    #[cfg(not(feature = "profiling"))]
    builder.init();

    Ok(())
}

/// Writes a new frame into the sensor's register space and raises the
/// interrupt, once per report interval.
fn run_sensor(memory: MemoryTransport, lines: Arc<SimLines>, register: u16, running: Arc<AtomicBool>) {
    let mut frame_no: u16 = 0;
    while running.load(Ordering::Relaxed) {
        frame_no = frame_no.wrapping_add(1);
        let mut words = vec![0u16; REQUEST_SIZE / 2];
        words[2] = frame_no;
        for (i, word) in words.iter_mut().enumerate().skip(FRAME_HEADER_SIZE / 2) {
            *word = frame_no.wrapping_mul(31).wrapping_add(i as u16);
        }
        memory.load_words(register, &words);
        lines.raise();
        thread::sleep(REPORT_INTERVAL);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing()?;

    info!("Touchframe harness launching...");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    let memory = MemoryTransport::new();
    let lines = SimLines::new();
    let device = Arc::new(TouchDevice::bind(
        Platform {
            transport: Box::new(memory.clone()),
            irq: lines.clone(),
            reset: lines.clone(),
        },
        &config,
    )?);

    device.open()?;
    device.set_timeout(true, u32::try_from(REPORT_INTERVAL.as_micros())?);
    device.reset(touchframe::ResetLevel::High)?;

    let running = Arc::new(AtomicBool::new(true));
    let sensor = {
        let running = running.clone();
        let register = config.acquisition.read_register;
        let lines = lines.clone();
        thread::Builder::new()
            .name("sim-sensor".into())
            .spawn(move || run_sensor(memory, lines, register, running))?
    };

    // The consumer blocks in the gate, so it runs on a blocking task.
    let consumer = {
        let device = device.clone();
        tokio::task::spawn_blocking(move || {
            let request = FrameRequest::new(REQUEST_SIZE, 1, 1);
            let mut frames = 0u64;
            loop {
                match device.get_frame(request) {
                    Ok(FrameOutcome::Frame(frame)) => {
                        frames += 1;
                        if frames % 125 == 0 {
                            info!(sequence = frame.sequence, frames, "frames received");
                        }
                    }
                    Ok(FrameOutcome::TimedOut) => warn!("frame deadline expired"),
                    Ok(FrameOutcome::Interrupted) => continue,
                    Ok(FrameOutcome::Unblocked) => break,
                    Err(err) => {
                        warn!(%err, "get_frame failed");
                        break;
                    }
                }
            }
            frames
        })
    };

    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received, suspending acquisition");
    device.suspend();

    let frames = consumer.await?;
    running.store(false, Ordering::Relaxed);
    if sensor.join().is_err() {
        warn!("sensor thread panicked");
    }

    device.close()?;
    info!(frames, stats = ?device.stats(), "Touchframe shutting down");
    Ok(())
}
