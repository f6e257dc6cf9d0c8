//! Register-addressed bus transactions.
//!
//! Every transaction starts with a 3 byte header: the command code followed by
//! the register address, high byte first. The device transfers 16-bit words
//! big-endian; payloads are converted to host order on read and back to
//! big-endian on write, in place.

pub mod memory;

use std::io;

use bytes::Bytes;
use tracing::{trace, warn};

use crate::capture::MAX_FRAME_SIZE;
use crate::error::BusError;

pub use memory::MemoryTransport;

/// Size of the transaction header (command, address hi, address lo).
pub const HEADER_SIZE: usize = 3;
pub const READ_COMMAND: u8 = 0x03;
pub const WRITE_COMMAND: u8 = 0x02;
/// Largest payload a single transaction may carry.
pub const MAX_TRANSFER_SIZE: usize = MAX_FRAME_SIZE;

/// Raw transfer primitives supplied by the platform.
///
/// Implementations own the physical bus and are only ever driven from the
/// capture worker thread.
pub trait Transport: Send {
    /// Full-duplex transfer: clocks out `tx` while filling `rx`, which has the
    /// same length. On error `rx` holds whatever was received.
    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> io::Result<()>;

    /// Transmit-only transfer.
    fn write(&mut self, tx: &[u8]) -> io::Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> io::Result<()> {
        (**self).transfer(tx, rx)
    }

    fn write(&mut self, tx: &[u8]) -> io::Result<()> {
        (**self).write(tx)
    }
}

/// Builds the transaction header for `command` at `address`.
pub fn header(command: u8, address: u16) -> [u8; HEADER_SIZE] {
    let [hi, lo] = address.to_be_bytes();
    [command, hi, lo]
}

/// Converts big-endian 16-bit words to host order in place.
pub fn be_words_to_host(buf: &mut [u8]) {
    for word in buf.chunks_exact_mut(2) {
        let value = u16::from_be_bytes([word[0], word[1]]);
        word.copy_from_slice(&value.to_ne_bytes());
    }
}

/// Converts host-order 16-bit words to big-endian in place.
pub fn host_words_to_be(buf: &mut [u8]) {
    for word in buf.chunks_exact_mut(2) {
        let value = u16::from_ne_bytes([word[0], word[1]]);
        word.copy_from_slice(&value.to_be_bytes());
    }
}

/// Result of a best-effort raw read: the bytes as received, plus the
/// transport failure if there was one.
#[derive(Debug)]
pub struct Readout {
    pub data: Bytes,
    pub fault: Option<BusError>,
}

fn check_size(size: usize) -> Result<(), BusError> {
    if size % 2 != 0 {
        warn!(size, "rejecting odd-sized bus transaction");
        return Err(BusError::OddLength(size));
    }
    if size > MAX_TRANSFER_SIZE {
        warn!(size, max = MAX_TRANSFER_SIZE, "rejecting oversized bus transaction");
        return Err(BusError::TooLarge {
            size,
            max: MAX_TRANSFER_SIZE,
        });
    }
    Ok(())
}

/// Issues framed read/write transactions over a [`Transport`].
///
/// Scratch buffers for the header-prefixed transfers are allocated once, at
/// the maximum transaction size.
pub struct RegisterBus<T> {
    transport: T,
    tx: Vec<u8>,
    rx: Vec<u8>,
}

impl<T: Transport> RegisterBus<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            tx: vec![0; HEADER_SIZE + MAX_TRANSFER_SIZE],
            rx: vec![0; HEADER_SIZE + MAX_TRANSFER_SIZE],
        }
    }

    /// Reads `out.len()` bytes starting at `address` into `out`, converted to
    /// host word order.
    ///
    /// Size violations are rejected before any I/O and leave `out` untouched.
    /// A transport failure still fills `out` with whatever was received and
    /// then returns [`BusError::Transfer`]; whether to use those bytes is the
    /// caller's decision.
    pub fn read(&mut self, address: u16, out: &mut [u8]) -> Result<(), BusError> {
        let size = out.len();
        check_size(size)?;

        let total = HEADER_SIZE + size;
        let tx = &mut self.tx[..total];
        tx.fill(0);
        tx[..HEADER_SIZE].copy_from_slice(&header(READ_COMMAND, address));
        let rx = &mut self.rx[..total];
        rx.fill(0);

        let result = self.transport.transfer(tx, rx);
        out.copy_from_slice(&rx[HEADER_SIZE..]);
        be_words_to_host(out);
        trace!(address, size, ok = result.is_ok(), "bus read");

        result.map_err(BusError::from)
    }

    /// Writes `data` (host word order) starting at `address`.
    pub fn write(&mut self, address: u16, data: &[u8]) -> Result<(), BusError> {
        let size = data.len();
        check_size(size)?;

        let tx = &mut self.tx[..HEADER_SIZE + size];
        tx[..HEADER_SIZE].copy_from_slice(&header(WRITE_COMMAND, address));
        tx[HEADER_SIZE..].copy_from_slice(data);
        host_words_to_be(&mut tx[HEADER_SIZE..]);

        let result = self.transport.write(tx);
        trace!(address, size, ok = result.is_ok(), "bus write");

        result.map_err(BusError::from)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Records every transfer and answers reads with a fixed byte pattern.
    #[derive(Default)]
    struct Recorder {
        sent: Vec<Vec<u8>>,
        reply: Vec<u8>,
        fail: bool,
    }

    impl Transport for Recorder {
        fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> io::Result<()> {
            self.sent.push(tx.to_vec());
            let n = self.reply.len().min(rx.len());
            rx[..n].copy_from_slice(&self.reply[..n]);
            if self.fail {
                return Err(io::Error::other("line noise"));
            }
            Ok(())
        }

        fn write(&mut self, tx: &[u8]) -> io::Result<()> {
            self.sent.push(tx.to_vec());
            Ok(())
        }
    }

    #[test]
    fn read_frames_header_and_swaps_payload() {
        let mut bus = RegisterBus::new(Recorder {
            reply: vec![0xAA, 0xAA, 0xAA, 0x12, 0x34, 0xAB, 0xCD],
            ..Default::default()
        });

        let mut out = [0u8; 4];
        bus.read(0x0400, &mut out).unwrap();

        assert_eq!(bus.transport().sent[0], vec![0x03, 0x04, 0x00, 0, 0, 0, 0]);
        assert_eq!(u16::from_ne_bytes([out[0], out[1]]), 0x1234);
        assert_eq!(u16::from_ne_bytes([out[2], out[3]]), 0xABCD);
    }

    #[test]
    fn write_frames_header_and_sends_big_endian() {
        let mut bus = RegisterBus::new(Recorder::default());
        let mut data = Vec::new();
        data.extend_from_slice(&0x1234u16.to_ne_bytes());
        data.extend_from_slice(&0xBEEFu16.to_ne_bytes());

        bus.write(0x12F0, &data).unwrap();

        assert_eq!(
            bus.transport().sent[0],
            vec![0x02, 0x12, 0xF0, 0x12, 0x34, 0xBE, 0xEF]
        );
    }

    #[test]
    fn odd_sizes_are_rejected_without_touching_the_buffer() {
        let mut bus = RegisterBus::new(Recorder {
            reply: vec![0x55; 16],
            ..Default::default()
        });
        let mut buf = [0xEEu8; 8];

        let err = bus.read(0x0000, &mut buf[2..5]).unwrap_err();
        assert!(matches!(err, BusError::OddLength(3)));
        assert_eq!(buf, [0xEE; 8]);

        let err = bus.write(0x0000, &buf[..5]).unwrap_err();
        assert!(matches!(err, BusError::OddLength(5)));
        assert!(bus.transport().sent.is_empty());
    }

    #[test]
    fn oversized_transactions_are_rejected() {
        let mut bus = RegisterBus::new(Recorder::default());
        let mut buf = vec![0u8; MAX_TRANSFER_SIZE + 2];

        let err = bus.read(0, &mut buf).unwrap_err();
        assert!(matches!(err, BusError::TooLarge { .. }));
        assert!(bus.transport().sent.is_empty());
    }

    #[test]
    fn failed_transfer_still_delivers_received_bytes() {
        let mut bus = RegisterBus::new(Recorder {
            reply: vec![0, 0, 0, 0x00, 0x07],
            fail: true,
            ..Default::default()
        });
        let mut out = [0u8; 2];

        let err = bus.read(0x0400, &mut out).unwrap_err();
        assert!(matches!(err, BusError::Transfer(_)));
        assert_eq!(u16::from_ne_bytes(out), 7);
    }

    proptest! {
        #[test]
        fn word_order_conversion_is_an_involution(words in proptest::collection::vec(any::<u16>(), 0..64)) {
            let mut buf: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
            be_words_to_host(&mut buf);
            let host: Vec<u16> = buf
                .chunks_exact(2)
                .map(|w| u16::from_ne_bytes([w[0], w[1]]))
                .collect();
            prop_assert_eq!(&host, &words);

            host_words_to_be(&mut buf);
            let wire: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
            prop_assert_eq!(buf, wire);
        }

        #[test]
        fn write_then_read_returns_the_original_bytes(
            address in 0u16..0xF000,
            words in proptest::collection::vec(any::<u16>(), 1..128),
        ) {
            let data: Vec<u8> = words.iter().flat_map(|w| w.to_ne_bytes()).collect();
            let mut bus = RegisterBus::new(MemoryTransport::new());

            bus.write(address, &data).unwrap();
            let mut back = vec![0u8; data.len()];
            bus.read(address, &mut back).unwrap();

            prop_assert_eq!(back, data);
        }
    }
}
