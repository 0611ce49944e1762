//! Non-blocking duplex transport (§4.4). Plaintext at connection start; the
//! protocol state machine drives an in-place upgrade to TLS once the
//! `STARTTLS` frame has fully drained, on the same file descriptor
//! throughout — only the TLS session object layered over it is added.
//! The socket and the (optional) TLS session are kept as separate fields
//! rather than an owned `rustls::StreamOwned` so the upgrade is a plain
//! assignment instead of a move-out-and-replace.

use std::io::{self, Read, Write};

use mio::net::TcpStream as MioTcpStream;

use crate::buffer::FrameBuffer;
use crate::codec::{self, MsgType};
use crate::error::ConnectionError;

#[cfg(feature = "tls")]
use rustls::ClientConnection;

/// Outcome of one attempt to pull a complete frame out of the socket.
pub enum ReadOutcome {
    /// Not enough bytes yet; try again on the next readable event.
    Partial,
    /// A complete frame is ready, header included.
    Frame(Vec<u8>),
    /// The peer closed the connection.
    Eof,
}

pub struct Transport {
    sock: MioTcpStream,
    #[cfg(feature = "tls")]
    tls: Option<ClientConnection>,
}

impl Transport {
    pub fn connect(stream: MioTcpStream) -> Self {
        Transport {
            sock: stream,
            #[cfg(feature = "tls")]
            tls: None,
        }
    }

    /// True once the handshake upgraded us to TLS (§3's "in TLS" flag).
    #[cfg(feature = "tls")]
    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    #[cfg(not(feature = "tls"))]
    pub fn is_tls(&self) -> bool {
        false
    }

    /// Layers a TLS session over the existing socket. Only called once the
    /// main send buffer has fully drained (invariant 5 / §4.7).
    #[cfg(feature = "tls")]
    pub fn upgrade_to_tls(&mut self, conn: ClientConnection) {
        self.tls = Some(conn);
    }

    fn read_raw(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        #[cfg(feature = "tls")]
        if let Some(tls) = &mut self.tls {
            let mut stream = rustls::Stream::new(tls, &mut self.sock);
            return stream.read(buf);
        }
        self.sock.read(buf)
    }

    fn write_raw(&mut self, buf: &[u8]) -> io::Result<usize> {
        #[cfg(feature = "tls")]
        if let Some(tls) = &mut self.tls {
            let mut stream = rustls::Stream::new(tls, &mut self.sock);
            return stream.write(buf);
        }
        self.sock.write(buf)
    }

    /// Reads whatever is available into `recv`, then tries to assemble one
    /// complete frame. `skipping` carries across calls while an oversized
    /// frame is being discarded (§4.4).
    pub fn read_frame(
        &mut self,
        recv: &mut FrameBuffer,
        skipping: &mut Option<SkipState>,
    ) -> Result<ReadOutcome, ConnectionError> {
        let mut chunk = [0u8; 16 * 1024];
        loop {
            match self.read_raw(&mut chunk) {
                Ok(0) => return Ok(ReadOutcome::Eof),
                Ok(n) => {
                    if let Some(skip) = skipping {
                        let take = skip.remaining.min(n as u64) as usize;
                        skip.remaining -= take as u64;
                        if skip.remaining == 0 {
                            let len = skip.total_len as u32;
                            *skipping = None;
                            return Err(ConnectionError::MessageTooLarge {
                                len,
                                max: recv.max() as u32,
                            });
                        }
                        continue;
                    }
                    recv.append(&chunk[..n])?;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ConnectionError::Transport(e)),
            }
        }

        if skipping.is_some() {
            return Ok(ReadOutcome::Partial);
        }

        let Some(body_len) = codec::peek_frame_len(recv.as_slice()) else {
            return Ok(ReadOutcome::Partial);
        };
        let total_len = codec::FRAME_HEADER_LEN as u64 + body_len as u64;
        if total_len as usize > recv.max() {
            log::warn!(
                "Server wants to send too long message {total_len} bytes. Disconnecting from server"
            );
            let header_seen = recv.len() as u64;
            recv.clear();
            *skipping = Some(SkipState {
                remaining: total_len - header_seen,
                total_len,
            });
            return Ok(ReadOutcome::Partial);
        }

        if (recv.len() as u64) < total_len {
            return Ok(ReadOutcome::Partial);
        }

        let frame = recv.take_frame(total_len as usize);

        // Cheap rejection of unsupported message types, mirroring the
        // original's `msgio_read` peeking the type before full decode.
        if frame.len() >= 6 {
            let type_raw = u16::from_be_bytes([frame[4], frame[5]]);
            if MsgType::from_u16(type_raw).is_none() {
                return Err(ConnectionError::UnsupportedMessageType(type_raw));
            }
        }

        Ok(ReadOutcome::Frame(frame.to_vec()))
    }

    /// Writes as much of `unsent` as the socket accepts right now. Returns
    /// the number of bytes written; a partial write is a normal outcome.
    pub fn write_some(&mut self, unsent: &[u8]) -> Result<usize, ConnectionError> {
        match self.write_raw(unsent) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(0),
            Err(e) => Err(ConnectionError::Transport(e)),
        }
    }

    pub fn underlying(&self) -> &MioTcpStream {
        &self.sock
    }

    pub fn underlying_mut(&mut self) -> &mut MioTcpStream {
        &mut self.sock
    }
}

/// Tracks how many more bytes of an oversized frame must be discarded
/// before the connection is torn down (§4.4's "skipping" mode exists only
/// to make the disconnect log precise).
pub struct SkipState {
    pub remaining: u64,
    pub total_len: u64,
}
