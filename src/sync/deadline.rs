//! Cancellable single-shot deadline.
//!
//! A dedicated thread multiplexes arm/cancel commands with a crossbeam timer
//! channel and runs the expiry callback when the timer fires. Commands are
//! acknowledged only after the thread has applied them, so once
//! [`Deadline::cancel`] or [`Deadline::arm`] returns no earlier expiry can
//! still be in flight. The callback must not call back into its deadline.

use std::io;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{after, bounded, never, select, Receiver, Sender};
use tracing::{debug, trace};

enum Control {
    Arm { after: Duration, reply: Sender<bool> },
    Cancel { reply: Sender<bool> },
    Armed { reply: Sender<bool> },
    Shutdown,
}

pub struct Deadline {
    commands: Sender<Control>,
    thread: Option<JoinHandle<()>>,
}

impl Deadline {
    /// Starts the timer thread. Nothing is armed yet.
    pub fn spawn<F>(name: &str, on_expire: F) -> io::Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let (commands, command_rx) = bounded(1);
        let thread = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || run(command_rx, on_expire))?;

        Ok(Self {
            commands,
            thread: Some(thread),
        })
    }

    fn request(&self, control: impl FnOnce(Sender<bool>) -> Control) -> bool {
        let (reply, response) = bounded(1);
        if self.commands.send(control(reply)).is_err() {
            return false;
        }
        response.recv().unwrap_or(false)
    }

    /// Arms the deadline `after` from now, replacing any armed instance.
    /// Returns true if an earlier instance was cancelled.
    pub fn arm(&self, after: Duration) -> bool {
        let replaced = self.request(|reply| Control::Arm { after, reply });
        trace!(?after, replaced, "deadline armed");
        replaced
    }

    /// Disarms the deadline. Returns true if it was armed.
    pub fn cancel(&self) -> bool {
        let cancelled = self.request(|reply| Control::Cancel { reply });
        if cancelled {
            trace!("deadline cancelled");
        }
        cancelled
    }

    pub fn is_armed(&self) -> bool {
        self.request(|reply| Control::Armed { reply })
    }
}

fn run<F: Fn()>(commands: Receiver<Control>, on_expire: F) {
    let mut timer: Receiver<Instant> = never();
    let mut armed = false;
    loop {
        let command = select! {
            recv(commands) -> msg => Some(msg),
            recv(timer) -> _ => None,
        };
        match command {
            None => {
                timer = never();
                armed = false;
                on_expire();
            }
            Some(Ok(Control::Arm { after: delay, reply })) => {
                let _ = reply.send(armed);
                timer = after(delay);
                armed = true;
            }
            Some(Ok(Control::Cancel { reply })) => {
                let _ = reply.send(armed);
                timer = never();
                armed = false;
            }
            Some(Ok(Control::Armed { reply })) => {
                let _ = reply.send(armed);
            }
            Some(Ok(Control::Shutdown)) | Some(Err(_)) => break,
        }
    }
    debug!("deadline thread stopped");
}

impl Drop for Deadline {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.commands.send(Control::Shutdown);
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting() -> (Deadline, Arc<AtomicUsize>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let deadline = {
            let fired = fired.clone();
            Deadline::spawn("test-deadline", move || {
                fired.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap()
        };
        (deadline, fired)
    }

    #[test]
    fn fires_once_after_the_delay() {
        let (deadline, fired) = counting();
        deadline.arm(Duration::from_millis(10));
        thread::sleep(Duration::from_millis(100));

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!deadline.is_armed());
    }

    #[test]
    fn cancel_prevents_expiry() {
        let (deadline, fired) = counting();
        deadline.arm(Duration::from_millis(50));
        assert!(deadline.cancel());
        thread::sleep(Duration::from_millis(120));

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!deadline.cancel());
    }

    #[test]
    fn rearming_replaces_the_previous_instance() {
        let (deadline, fired) = counting();
        assert!(!deadline.arm(Duration::from_millis(40)));
        thread::sleep(Duration::from_millis(20));
        assert!(deadline.arm(Duration::from_millis(200)));
        thread::sleep(Duration::from_millis(60));

        // The first instance would have fired by now.
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        deadline.cancel();
    }

    #[test]
    fn drop_stops_the_thread_without_firing() {
        let (deadline, fired) = counting();
        deadline.arm(Duration::from_secs(10));
        drop(deadline);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
