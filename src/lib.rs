//! Client-side protocol engine for the net quorum-device arbitrator.
//!
//! The crate is organized bottom-up, the way the original C sources and
//! this workspace's mio heritage both lay things out: framing and timers
//! first, the wire codec next, transport and TLS above that, the protocol
//! state machine and echo channel on top, and the event loop gluing it
//! all together. `main.rs` only does bootstrap.

pub mod buffer;
pub mod codec;
pub mod config;
pub mod error;
pub mod event_loop;
pub mod instance;
pub mod protocol;
pub mod timer;
pub mod transport;
pub mod votequorum;

#[cfg(feature = "tls")]
pub mod tls;
