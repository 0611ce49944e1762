//! Thin contract over encode/decode of typed messages (§4.3). The state
//! machine and echo channel call into `message` directly; this module just
//! groups the wire-format pieces and re-exports the handful of names used
//! elsewhere in the crate.

pub mod message;
pub mod options;

pub use message::{decode, peek_frame_len, DecodedMessage, MsgType, FRAME_HEADER_LEN};
pub use options::{DecisionAlgorithm, OptionTag, TlsSupported};
