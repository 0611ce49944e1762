//! Error taxonomy, split by disposition rather than by subsystem: every
//! error a caller can receive from this crate tells it, by type alone,
//! whether the connection should be torn down or the process should abort.

use std::io;

use thiserror::Error;

/// Decode failures reported by the message codec (§4.3). Each variant maps
/// to a fixed log level at the call site (see `log_level`).
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("received message with option with invalid length")]
    BadOptionLength,
    #[error("can't allocate memory for decoded message")]
    OutOfMemory,
    #[error("received inconsistent message (tlv len > msg size)")]
    TlvExceedsFrame,
    #[error("received message with option with invalid value")]
    BadOptionValue,
    #[error("unknown error occurred when decoding message")]
    Unknown,
}

impl DecodeError {
    /// The level this error is logged at, independent of the caller.
    pub fn log_level(&self) -> log::Level {
        match self {
            DecodeError::OutOfMemory => log::Level::Error,
            DecodeError::Unknown => log::Level::Error,
            _ => log::Level::Warn,
        }
    }
}

/// Fatal-connection errors (§7): any of these tears the connection down,
/// unregisters from the voting subsystem, and returns control to bootstrap.
/// None of these abort the process.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("server closed connection")]
    Eof,

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("received unsupported message type {0}")]
    UnsupportedMessageType(u16),

    #[error("server wants to send too long message ({len} bytes, max {max})")]
    MessageTooLarge { len: u32, max: u32 },

    #[error("received message in unexpected protocol state")]
    UnexpectedState,

    #[error("received message doesn't contain seq_number or it's not the expected one")]
    BadSequenceNumber,

    #[error("server doesn't reply in expected time (echo reply not on time)")]
    EchoReplyNotOnTime,

    #[error("echo request already in flight, can't schedule another one")]
    EchoAlreadyInFlight,

    #[error("required option {0} is unset")]
    MissingOption(&'static str),

    #[error("incompatible tls configuration (server {server:?} client {client:?})")]
    IncompatibleTls {
        server: crate::codec::options::TlsSupported,
        client: crate::codec::options::TlsSupported,
    },

    #[error("server doesn't support required decision algorithm")]
    UnsupportedDecisionAlgorithm,

    #[error(
        "server accepts maximum {server_max} bytes message but this client minimum is {min} bytes"
    )]
    ServerRequestMaxTooSmall { server_max: u32, min: u32 },

    #[error(
        "server may send message up to {server_max} bytes but this client maximum is {max} bytes"
    )]
    ServerReplyMaxTooLarge { server_max: u32, max: u32 },

    #[error("server doesn't accept sent decision algorithm or heartbeat interval")]
    SetOptionRejected,

    #[error("server error{}", .0.map(|c| format!(" {c}")).unwrap_or_default())]
    ServerError(Option<u16>),

    #[error("tls error: {0}")]
    Tls(String),

    #[error("poll error (hangup/error/invalid) on main socket")]
    PollError,

    #[error("can't store message from server: {0}")]
    BufferStorage(#[from] crate::buffer::BufferError),
}

/// Fatal-process errors (§7): the process has no way to make progress and
/// must abort with a diagnostic line and exit code 1.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to initialize the votequorum API: {0}")]
    VotequorumInit(String),

    #[error("can't register votequorum device: {0}")]
    VotequorumRegister(String),

    #[error("votequorum dispatch failed: {0}")]
    VotequorumDispatch(String),

    #[error("can't allocate send buffer: {0}")]
    BufferAllocation(#[from] crate::buffer::BufferError),

    #[error("tls library initialization failed: {0}")]
    TlsInit(String),

    #[error("socket creation failed: {0}")]
    Socket(#[from] io::Error),
}
