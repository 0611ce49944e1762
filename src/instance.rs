//! The connection instance (§3's data model): every piece of mutable state
//! the event loop threads through a single poll iteration, owned in one
//! place so the state machine and echo channel can be plain functions
//! taking `&mut Connection` rather than methods scattered across objects.

use std::time::Duration;

use crate::buffer::FrameBuffer;
use crate::codec::options::{DecisionAlgorithm, TlsSupported};
use crate::protocol::HandshakeState;
use crate::timer::{TimerHandle, TimerWheel};
use crate::transport::{SkipState, Transport};

pub const RECV_MAX: usize = 16 * 1024 * 1024;
pub const SEND_FLOOR: usize = 32 * 1024;
const INITIAL_CAPACITY: usize = 4096;

/// The client TLS configuration handle, present unconditionally so callers
/// never need `#[cfg]` of their own; it degenerates to `()` when the crate
/// is built without the `tls` feature.
#[cfg(feature = "tls")]
pub type TlsConfigHandle = std::sync::Arc<rustls::ClientConfig>;
#[cfg(not(feature = "tls"))]
pub type TlsConfigHandle = ();

/// Everything invariant 1-7 in §3 talks about, bundled together. The timer
/// wheel is parameterized over `Connection` itself so heartbeat callbacks
/// can mutate echo state directly.
pub struct Connection {
    pub transport: Transport,
    pub recv: FrameBuffer,
    pub main_send: FrameBuffer,
    pub echo_send: FrameBuffer,
    pub skip: Option<SkipState>,

    pub state: HandshakeState,
    pub next_expected_seq: u32,
    pub main_seq: u32,

    pub echo_request_expected: u32,
    pub echo_reply_received: u32,
    pub echo_in_flight: bool,

    pub client_tls_supported: TlsSupported,
    pub server_tls_supported: Option<TlsSupported>,

    pub node_id: u32,
    pub cluster_name: String,
    pub host: String,
    pub port: u16,
    pub decision_algorithm: DecisionAlgorithm,

    /// Negotiated echo heartbeat period, sent to the server in `SET_OPTION`
    /// and used to rearm the echo timer (§4.6).
    pub heartbeat_interval: Duration,

    /// Reserved per §3/§4.8; computed from `quorum.device.sync_timeout` but
    /// never consulted by any operation the original spec names.
    pub sync_heartbeat_interval: Duration,

    pub timers: TimerWheel<Connection>,
    pub heartbeat_timer: Option<TimerHandle>,

    pub disconnect_pending: Option<crate::error::ConnectionError>,

    /// Ring id carried by the most recent votequorum membership
    /// notification (§2/§6), and whether that notification reported the
    /// cluster as quorate. `None` until the first notification arrives.
    pub last_ring_id: Option<u64>,
    pub quorate: bool,

    /// Client TLS configuration, built once at bootstrap and reused for
    /// the single in-place upgrade performed on `STARTTLS` (§4.4). `None`
    /// when TLS is compiled out or the client never advertises support.
    pub tls_config: Option<TlsConfigHandle>,
}

impl Connection {
    pub fn new(
        transport: Transport,
        node_id: u32,
        cluster_name: String,
        host: String,
        port: u16,
        client_tls_supported: TlsSupported,
        decision_algorithm: DecisionAlgorithm,
        heartbeat_interval: Duration,
        sync_heartbeat_interval: Duration,
        tls_config: Option<TlsConfigHandle>,
    ) -> Self {
        Connection {
            transport,
            recv: FrameBuffer::new(INITIAL_CAPACITY, RECV_MAX),
            main_send: FrameBuffer::new(INITIAL_CAPACITY, SEND_FLOOR),
            echo_send: FrameBuffer::new(INITIAL_CAPACITY, SEND_FLOOR),
            skip: None,
            state: HandshakeState::WaitPreinitReply,
            next_expected_seq: 1,
            main_seq: 0,
            echo_request_expected: 0,
            echo_reply_received: 0,
            echo_in_flight: false,
            client_tls_supported,
            server_tls_supported: None,
            node_id,
            cluster_name,
            host,
            port,
            decision_algorithm,
            heartbeat_interval,
            sync_heartbeat_interval,
            timers: TimerWheel::new(),
            heartbeat_timer: None,
            disconnect_pending: None,
            last_ring_id: None,
            quorate: false,
            tls_config,
        }
    }

    /// Invariant 1: a main-channel send is "in flight" iff the buffer has
    /// unsent bytes.
    pub fn main_sending(&self) -> bool {
        self.main_send.in_flight()
    }

    pub fn next_main_seq(&mut self) -> u32 {
        self.main_seq += 1;
        self.main_seq
    }

    pub fn mark_disconnect(&mut self, err: crate::error::ConnectionError) {
        if self.disconnect_pending.is_none() {
            log::error!("Disconnecting from server: {err}");
            self.disconnect_pending = Some(err);
        }
    }

    pub fn should_disconnect(&self) -> bool {
        self.disconnect_pending.is_some()
    }

    /// §4.7's writer-priority rule: prefer the main buffer, except while an
    /// echo-request is already mid-flight and the main buffer hasn't
    /// started sending yet.
    pub fn should_send_echo_first(&self) -> bool {
        !(self.main_sending() && self.echo_send.progress() == 0)
    }

    /// Heartbeat interval clamped into the `u32` milliseconds the wire
    /// option carries.
    pub fn echo_heartbeat_ms(&self) -> u32 {
        self.heartbeat_interval.as_millis().min(u32::MAX as u128) as u32
    }
}
