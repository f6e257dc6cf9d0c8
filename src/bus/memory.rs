//! In-memory register space speaking the same framed protocol as the sensor.

use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use super::{Transport, HEADER_SIZE, MAX_TRANSFER_SIZE, READ_COMMAND, WRITE_COMMAND};

const ADDRESS_SPACE: usize = 0x1_0000;

struct MemoryState {
    /// Register contents in wire order (big-endian words).
    memory: Vec<u8>,
    failures: usize,
    transactions: u64,
}

/// A [`Transport`] backed by a 64 KiB byte array.
///
/// Clones share the same register space, so a test (or the demo harness) can
/// keep a handle to load frames while the capture worker owns another.
#[derive(Clone)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                // Room for a maximum transfer starting at the last address.
                memory: vec![0; ADDRESS_SPACE + MAX_TRANSFER_SIZE],
                failures: 0,
                transactions: 0,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores raw wire bytes at `address`.
    pub fn load(&self, address: u16, wire: &[u8]) {
        let start = usize::from(address);
        self.lock().memory[start..start + wire.len()].copy_from_slice(wire);
    }

    /// Stores `words` at `address` the way the sensor holds them.
    pub fn load_words(&self, address: u16, words: &[u16]) {
        let wire: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
        self.load(address, &wire);
    }

    /// Returns `len` raw wire bytes at `address`.
    pub fn peek(&self, address: u16, len: usize) -> Vec<u8> {
        let start = usize::from(address);
        self.lock().memory[start..start + len].to_vec()
    }

    /// Makes the next `count` transactions fail after transferring nothing.
    pub fn fail_next(&self, count: usize) {
        self.lock().failures = count;
    }

    /// Number of transactions seen so far, failed ones included.
    pub fn transactions(&self) -> u64 {
        self.lock().transactions
    }
}

fn parse_header(tx: &[u8]) -> io::Result<(u8, usize)> {
    if tx.len() < HEADER_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "transfer shorter than the transaction header",
        ));
    }
    let address = u16::from_be_bytes([tx[1], tx[2]]);
    Ok((tx[0], usize::from(address)))
}

impl MemoryState {
    fn begin(&mut self) -> io::Result<()> {
        self.transactions += 1;
        if self.failures > 0 {
            self.failures -= 1;
            return Err(io::Error::other("injected transfer failure"));
        }
        Ok(())
    }

    fn store(&mut self, address: usize, payload: &[u8]) {
        self.memory[address..address + payload.len()].copy_from_slice(payload);
    }
}

impl Transport for MemoryTransport {
    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> io::Result<()> {
        let (command, address) = parse_header(tx)?;
        let mut state = self.lock();
        state.begin()?;

        let payload = tx.len() - HEADER_SIZE;
        match command {
            READ_COMMAND => {
                rx[..HEADER_SIZE].fill(0);
                rx[HEADER_SIZE..].copy_from_slice(&state.memory[address..address + payload]);
                Ok(())
            }
            WRITE_COMMAND => {
                state.store(address, &tx[HEADER_SIZE..]);
                Ok(())
            }
            other => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unknown command code {other:#04x}"),
            )),
        }
    }

    fn write(&mut self, tx: &[u8]) -> io::Result<()> {
        let (command, address) = parse_header(tx)?;
        let mut state = self.lock();
        state.begin()?;

        if command != WRITE_COMMAND {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("command {command:#04x} needs a full-duplex transfer"),
            ));
        }
        state.store(address, &tx[HEADER_SIZE..]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_pad_the_header_and_return_wire_bytes() {
        let mut mem = MemoryTransport::new();
        mem.load_words(0x0400, &[0x0102, 0x0304]);

        let tx = [READ_COMMAND, 0x04, 0x00, 0, 0, 0, 0];
        let mut rx = [0xFFu8; 7];
        mem.transfer(&tx, &mut rx).unwrap();

        assert_eq!(rx, [0, 0, 0, 1, 2, 3, 4]);
        assert_eq!(mem.transactions(), 1);
    }

    #[test]
    fn injected_failures_are_counted_and_cleared() {
        let mut mem = MemoryTransport::new();
        mem.fail_next(1);

        assert!(mem.write(&[WRITE_COMMAND, 0, 0, 9, 9]).is_err());
        mem.write(&[WRITE_COMMAND, 0, 0, 9, 9]).unwrap();

        assert_eq!(mem.peek(0, 2), vec![9, 9]);
        assert_eq!(mem.transactions(), 2);
    }

    #[test]
    fn unknown_commands_are_refused() {
        let mut mem = MemoryTransport::new();
        let mut rx = [0u8; 3];
        assert!(mem.transfer(&[0x7F, 0, 0], &mut rx).is_err());
        assert!(mem.write(&[READ_COMMAND, 0, 0]).is_err());
    }
}
