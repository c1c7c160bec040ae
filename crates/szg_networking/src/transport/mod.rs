//! # Transport Layer
//!
//! Length-prefixed frames over blocking TCP.
//!
//! ## Frame Structure
//!
//! ```text
//!  len:u32 (kind + payload) | kind:u8 | payload
//! ```
//!
//! ## Design
//!
//! - One reader per connection thread, writers shared behind a lock
//! - `TCP_NODELAY` on every socket; frames are written with one `write_all`
//! - Frames above the configured maximum close the connection
//! - A read timeout keeps the partial frame; the next `recv` resumes it
//! - Statistics are shared atomics so readers and writers update them freely

use std::io::{self, BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{NetError, NetResult};

/// Largest frame accepted by default.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// What a frame carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    /// Record dictionary, always the first frame.
    Dictionary = 1,
    /// Concatenated structured records.
    Records = 2,
    /// One record with routing history.
    Routed = 3,
    /// Slave-to-master schema.
    Handshake = 4,
    /// Master accept or reject.
    HandshakeReply = 5,
    /// One master/slave frame.
    MasterFrame = 6,
    /// Slave acknowledgement of a frame.
    Ack = 7,
    /// One input queue.
    Input = 8,
    /// New input signature.
    Signature = 9,
    /// Orderly close.
    Close = 10,
}

impl FrameKind {
    /// Decodes a wire tag.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Dictionary),
            2 => Some(Self::Records),
            3 => Some(Self::Routed),
            4 => Some(Self::Handshake),
            5 => Some(Self::HandshakeReply),
            6 => Some(Self::MasterFrame),
            7 => Some(Self::Ack),
            8 => Some(Self::Input),
            9 => Some(Self::Signature),
            10 => Some(Self::Close),
            _ => None,
        }
    }
}

/// One received frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Frame kind.
    pub kind: FrameKind,
    /// Payload bytes.
    pub payload: Vec<u8>,
}

/// Transport statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Frames sent.
    pub frames_sent: u64,
    /// Frames received.
    pub frames_received: u64,
    /// Bytes sent, headers included.
    pub bytes_sent: u64,
    /// Bytes received, headers included.
    pub bytes_received: u64,
    /// Failed sends.
    pub send_errors: u64,
}

#[derive(Debug, Default)]
struct SharedStats {
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    send_errors: AtomicU64,
}

impl SharedStats {
    fn snapshot(&self) -> TransportStats {
        TransportStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
        }
    }
}

/// Sending half of a connection.
#[derive(Debug)]
pub struct FrameWriter {
    stream: TcpStream,
    stats: Arc<SharedStats>,
    scratch: Vec<u8>,
}

impl FrameWriter {
    /// Sends one frame.
    pub fn send(&mut self, kind: FrameKind, payload: &[u8]) -> NetResult<()> {
        let len = u32::try_from(payload.len() + 1)
            .map_err(|_| NetError::Protocol(format!("frame of {} bytes too large", payload.len())))?;
        self.scratch.clear();
        self.scratch.reserve(payload.len() + 5);
        self.scratch.extend_from_slice(&len.to_le_bytes());
        self.scratch.push(kind as u8);
        self.scratch.extend_from_slice(payload);
        match self.stream.write_all(&self.scratch) {
            Ok(()) => {
                self.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .bytes_sent
                    .fetch_add(self.scratch.len() as u64, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.stats.send_errors.fetch_add(1, Ordering::Relaxed);
                Err(e.into())
            }
        }
    }

    /// Shuts both directions, waking the reader.
    pub fn shutdown(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    /// Handle that can shut the socket down while a send is blocked.
    pub fn shutdown_handle(&self) -> io::Result<ShutdownHandle> {
        self.stream.try_clone().map(ShutdownHandle)
    }

    /// Statistics shared with the reader.
    #[must_use]
    pub fn stats(&self) -> TransportStats {
        self.stats.snapshot()
    }

    /// Remote address.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }
}

/// Closes a socket from any thread.
#[derive(Debug)]
pub struct ShutdownHandle(TcpStream);

impl ShutdownHandle {
    /// Shuts both directions. Blocked reads and writes on the socket fail.
    pub fn shutdown(&self) {
        let _ = self.0.shutdown(Shutdown::Both);
    }
}

/// Receiving half of a connection.
#[derive(Debug)]
pub struct FrameReader {
    stream: BufReader<TcpStream>,
    stats: Arc<SharedStats>,
    max_frame: usize,
    /// Bytes of the frame being read, header included.
    partial: Vec<u8>,
    filled: usize,
}

impl FrameReader {
    /// Blocks for the next frame. A clean end of stream is `NetError::Closed`.
    ///
    /// A timeout leaves the bytes read so far in place, so calling again
    /// continues the same frame.
    pub fn recv(&mut self) -> NetResult<Frame> {
        self.fill(4)?;
        let len = u32::from_le_bytes([self.partial[0], self.partial[1], self.partial[2], self.partial[3]]) as usize;
        if len == 0 || len > self.max_frame {
            return Err(NetError::Protocol(format!("frame length {len} out of range")));
        }
        self.fill(len + 4)?;
        let mut body = std::mem::take(&mut self.partial);
        self.filled = 0;
        self.stats.frames_received.fetch_add(1, Ordering::Relaxed);
        self.stats
            .bytes_received
            .fetch_add(len as u64 + 4, Ordering::Relaxed);
        let kind = FrameKind::from_u8(body[4])
            .ok_or_else(|| NetError::Protocol(format!("unknown frame kind {}", body[4])))?;
        body.drain(..5);
        Ok(Frame { kind, payload: body })
    }

    fn fill(&mut self, target: usize) -> NetResult<()> {
        if self.partial.len() < target {
            self.partial.resize(target, 0);
        }
        while self.filled < target {
            match self.stream.read(&mut self.partial[self.filled..target]) {
                Ok(0) => return Err(NetError::Closed),
                Ok(n) => self.filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    return Err(match e.kind() {
                        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => NetError::Closed,
                        _ => e.into(),
                    })
                }
            }
        }
        Ok(())
    }

    /// Receives a frame and checks its kind.
    pub fn expect(&mut self, kind: FrameKind) -> NetResult<Vec<u8>> {
        let frame = self.recv()?;
        if frame.kind == kind {
            Ok(frame.payload)
        } else {
            Err(NetError::Protocol(format!("expected {kind:?}, got {:?}", frame.kind)))
        }
    }

    /// Sets a read timeout; `None` blocks forever.
    pub fn set_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.get_ref().set_read_timeout(timeout)
    }

    /// Overrides the largest accepted frame.
    pub fn set_max_frame(&mut self, max: usize) {
        self.max_frame = max;
    }
}

/// Splits a connected stream into framed halves.
pub fn split(stream: TcpStream) -> io::Result<(FrameReader, FrameWriter)> {
    stream.set_nodelay(true)?;
    let stats = Arc::new(SharedStats::default());
    let reader = FrameReader {
        stream: BufReader::new(stream.try_clone()?),
        stats: Arc::clone(&stats),
        max_frame: MAX_FRAME_SIZE,
        partial: Vec::new(),
        filled: 0,
    };
    let writer = FrameWriter { stream, stats, scratch: Vec::new() };
    Ok((reader, writer))
}

/// Connects and splits.
pub fn connect(addr: SocketAddr, timeout: Duration) -> NetResult<(FrameReader, FrameWriter)> {
    let stream = TcpStream::connect_timeout(&addr, timeout)?;
    tracing::debug!(target: "szg::transport", "connected to {addr}");
    Ok(split(stream)?)
}

/// Returns true for errors that only mean the connection went away.
#[must_use]
pub fn is_disconnect(err: &NetError) -> bool {
    match err {
        NetError::Closed => true,
        NetError::Io(e) => matches!(
            e.kind(),
            io::ErrorKind::BrokenPipe
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::NotConnected
                | io::ErrorKind::UnexpectedEof
        ),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn pair() -> ((FrameReader, FrameWriter), (FrameReader, FrameWriter)) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = connect(addr, Duration::from_secs(2)).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, split(server).unwrap())
    }

    #[test]
    fn test_frames_arrive_in_order() {
        let ((_, mut tx), (mut rx, _)) = pair();
        tx.send(FrameKind::Dictionary, b"dict").unwrap();
        tx.send(FrameKind::Records, &[]).unwrap();
        assert_eq!(rx.expect(FrameKind::Dictionary).unwrap(), b"dict");
        let frame = rx.recv().unwrap();
        assert_eq!(frame.kind, FrameKind::Records);
        assert!(frame.payload.is_empty());
        assert_eq!(tx.stats().frames_sent, 2);
        assert_eq!(tx.stats().bytes_sent, 9 + 5);
    }

    #[test]
    fn test_shutdown_reports_closed() {
        let ((_, tx), (mut rx, _)) = pair();
        tx.shutdown();
        drop(tx);
        let err = rx.recv().unwrap_err();
        assert!(is_disconnect(&err), "{err}");
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let ((_, mut tx), (mut rx, _)) = pair();
        rx.set_max_frame(8);
        tx.send(FrameKind::Input, &[0u8; 32]).unwrap();
        assert!(matches!(rx.recv(), Err(NetError::Protocol(_))));
    }

    #[test]
    fn test_timeout_mid_frame_resumes() {
        let ((_, mut tx), (mut rx, _)) = pair();
        rx.set_timeout(Some(Duration::from_millis(50))).unwrap();
        let mut raw = 7u32.to_le_bytes().to_vec();
        raw.push(FrameKind::MasterFrame as u8);
        raw.extend_from_slice(b"abcdef");
        tx.stream.write_all(&raw[..7]).unwrap();
        let err = rx.recv().unwrap_err();
        assert!(matches!(&err, NetError::Io(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)), "{err}");
        tx.stream.write_all(&raw[7..]).unwrap();
        tx.send(FrameKind::Ack, b"next").unwrap();
        let frame = rx.recv().unwrap();
        assert_eq!(frame.kind, FrameKind::MasterFrame);
        assert_eq!(frame.payload, b"abcdef");
        assert_eq!(rx.expect(FrameKind::Ack).unwrap(), b"next");
    }
}
