//! Protocol state machine (§4.5) and echo channel (§4.6). `state` owns the
//! four-state handshake plus the steady state; `echo` owns the independent
//! heartbeat sub-protocol that only becomes active once the handshake
//! completes.

pub mod echo;
pub mod state;

pub use state::{HandshakeState, State};
