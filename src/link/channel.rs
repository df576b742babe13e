//! Serial channel abstraction.
//!
//! Byte-oriented, full-duplex, non-blocking: `recv` returns whatever has
//! arrived (possibly nothing) and never waits. The flight build wires this
//! to the UART; tests and the ground simulation use [`MemChannel`] pairs.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::errors::LinkError;

/// Non-blocking byte channel to the mission-management controller.
pub trait SerialChannel {
    /// Queue bytes for the peer.
    fn send(&mut self, bytes: &[u8]) -> Result<(), LinkError>;

    /// Read available bytes into `buf`, returning how many were read.
    /// Returns 0 when nothing is pending.
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, LinkError>;
}

#[derive(Debug, Default)]
struct Pipe {
    bytes: VecDeque<u8>,
    closed: bool,
}

/// One endpoint of an in-memory full-duplex channel.
///
/// Created in pairs; what one endpoint sends the other receives, in order.
/// Dropping an endpoint closes the pipe its peer reads from.
pub struct MemChannel {
    outgoing: Arc<Mutex<Pipe>>,
    incoming: Arc<Mutex<Pipe>>,
}

impl MemChannel {
    /// Create a connected pair of endpoints.
    pub fn pair() -> (MemChannel, MemChannel) {
        let a_to_b = Arc::new(Mutex::new(Pipe::default()));
        let b_to_a = Arc::new(Mutex::new(Pipe::default()));
        (
            MemChannel {
                outgoing: Arc::clone(&a_to_b),
                incoming: Arc::clone(&b_to_a),
            },
            MemChannel {
                outgoing: b_to_a,
                incoming: a_to_b,
            },
        )
    }

    /// Bytes queued but not yet received by the peer.
    pub fn pending_to_peer(&self) -> usize {
        self.outgoing.lock().expect("pipe lock").bytes.len()
    }
}

impl Drop for MemChannel {
    fn drop(&mut self) {
        self.outgoing.lock().expect("pipe lock").closed = true;
        self.incoming.lock().expect("pipe lock").closed = true;
    }
}

impl SerialChannel for MemChannel {
    fn send(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        let mut pipe = self.outgoing.lock().expect("pipe lock");
        if pipe.closed {
            return Err(LinkError::ChannelClosed("peer endpoint dropped".to_string()));
        }
        pipe.bytes.extend(bytes);
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, LinkError> {
        let mut pipe = self.incoming.lock().expect("pipe lock");
        let mut read = 0;
        while read < buf.len() {
            match pipe.bytes.pop_front() {
                Some(byte) => {
                    buf[read] = byte;
                    read += 1;
                }
                None => break,
            }
        }
        if read == 0 && pipe.closed {
            return Err(LinkError::ChannelClosed("peer endpoint dropped".to_string()));
        }
        Ok(read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_roundtrip() {
        let (mut a, mut b) = MemChannel::pair();
        a.send(b"hello").unwrap();

        let mut buf = [0u8; 16];
        let n = b.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn test_recv_nonblocking_empty() {
        let (_a, mut b) = MemChannel::pair();
        let mut buf = [0u8; 8];
        assert_eq!(b.recv(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_duplex() {
        let (mut a, mut b) = MemChannel::pair();
        a.send(b"ping").unwrap();
        b.send(b"pong").unwrap();

        let mut buf = [0u8; 8];
        let n = b.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");
        let n = a.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"pong");
    }

    #[test]
    fn test_closed_peer_detected() {
        let (a, mut b) = MemChannel::pair();
        drop(a);
        let mut buf = [0u8; 8];
        assert!(matches!(
            b.recv(&mut buf),
            Err(LinkError::ChannelClosed(_))
        ));
        assert!(matches!(b.send(b"x"), Err(LinkError::ChannelClosed(_))));
    }

    #[test]
    fn test_partial_reads_preserve_order() {
        let (mut a, mut b) = MemChannel::pair();
        a.send(b"abcdef").unwrap();

        let mut small = [0u8; 2];
        assert_eq!(b.recv(&mut small).unwrap(), 2);
        assert_eq!(&small, b"ab");
        let mut rest = [0u8; 8];
        let n = b.recv(&mut rest).unwrap();
        assert_eq!(&rest[..n], b"cdef");
    }
}
