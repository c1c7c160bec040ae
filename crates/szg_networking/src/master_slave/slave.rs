//! Slave end of the frame exchange.

use std::net::SocketAddr;
use std::time::Duration;

use szg_core::{FieldSchema, TransferError};

use crate::error::{NetError, NetResult};
use crate::master_slave::message::{decode_reply, encode_ack, FrameMessage, Hello};
use crate::transport::{self, FrameKind, FrameReader, FrameWriter};

/// Connection from a slave to its master.
#[derive(Debug)]
pub struct SlaveSync {
    label: String,
    reader: FrameReader,
    writer: FrameWriter,
    last_frame: u64,
}

impl SlaveSync {
    /// Connects, sends the schema and waits for the master's verdict.
    ///
    /// A rejected schema is `NetError::Transfer(TransferError::SchemaMismatch)`;
    /// the slave must not retry with the same fields.
    pub fn connect(addr: SocketAddr, label: &str, schema: Vec<FieldSchema>, timeout: Duration) -> NetResult<Self> {
        let (mut reader, mut writer) = transport::connect(addr, timeout)?;
        let hello = Hello { label: label.to_owned(), schema };
        writer.send(FrameKind::Handshake, &hello.encode())?;
        reader.set_timeout(Some(timeout))?;
        let verdict = decode_reply(&reader.expect(FrameKind::HandshakeReply)?)?;
        reader.set_timeout(None)?;
        if let Err(reason) = verdict {
            tracing::error!(target: "szg::slave", "master at {addr} rejected '{label}': {reason}");
            writer.shutdown();
            return Err(TransferError::SchemaMismatch(reason).into());
        }
        tracing::info!(target: "szg::slave", "'{label}' joined master at {addr}");
        Ok(Self { label: label.to_owned(), reader, writer, last_frame: 0 })
    }

    /// Label sent at handshake.
    #[inline]
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Number of the last frame received.
    #[inline]
    #[must_use]
    pub const fn last_frame(&self) -> u64 {
        self.last_frame
    }

    /// Waits for the next frame. `None` blocks until one arrives.
    ///
    /// `NetError::Timeout` leaves the link usable; a frame cut off by the
    /// timeout is finished by the next call.
    pub fn receive(&mut self, timeout: Option<Duration>) -> NetResult<FrameMessage> {
        self.reader.set_timeout(timeout)?;
        let frame = match self.reader.recv() {
            Ok(frame) => frame,
            Err(NetError::Io(e))
                if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) =>
            {
                return Err(NetError::Timeout("master frame".into()));
            }
            Err(err) => return Err(err),
        };
        match frame.kind {
            FrameKind::MasterFrame => {
                let message = FrameMessage::decode(&frame.payload)?;
                self.last_frame = message.number;
                Ok(message)
            }
            FrameKind::Close => Err(NetError::Closed),
            other => Err(NetError::Protocol(format!("expected a frame, got {other:?}"))),
        }
    }

    /// Tells the master frame `number` is ready.
    pub fn acknowledge(&mut self, number: u64) -> NetResult<()> {
        self.writer.send(FrameKind::Ack, &encode_ack(number))
    }

    /// Leaves the session.
    pub fn disconnect(&mut self) {
        let _ = self.writer.send(FrameKind::Close, &[]);
        self.writer.shutdown();
    }
}
