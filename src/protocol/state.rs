//! Handshake state machine (§4.5). Each handler validates the inbound
//! message against the current state and sequence counter, then either
//! advances the state and enqueues the next outbound message or marks the
//! connection for disconnect.

use crate::codec::{self, options::TlsSupported, DecodedMessage, MsgType};
use crate::error::ConnectionError;
use crate::instance::Connection;
use crate::protocol::echo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    WaitPreinitReply,
    WaitStarttlsSent,
    WaitInitReply,
    WaitSetOptionReply,
    Steady,
}

/// Re-exported under the name the data model (§3) uses.
pub type State = HandshakeState;

const MIN_SERVER_REQUEST_MAX: u32 = crate::instance::SEND_FLOOR as u32;

/// Sends `PREINIT` and enters `WAIT_PREINIT_REPLY`. Called once, right
/// after the socket connects.
pub fn start(conn: &mut Connection) -> Result<(), ConnectionError> {
    conn.next_expected_seq = 1;
    let seq = conn.next_main_seq();
    let frame = codec::message::encode_preinit(seq, &conn.cluster_name);
    conn.main_send.set(&frame)?;
    conn.state = HandshakeState::WaitPreinitReply;
    log::debug!("Sent PREINIT(seq={seq})");
    Ok(())
}

/// Dispatches one decoded frame to the handler for the current state.
/// Returns `Ok(())` having possibly enqueued an outbound message, or an
/// error the caller should pass to `Connection::mark_disconnect`.
pub fn on_message(conn: &mut Connection, msg: DecodedMessage) -> Result<(), ConnectionError> {
    let msg_type = msg.msg_type.ok_or(ConnectionError::UnexpectedState)?;

    if msg_type == MsgType::ServerError {
        log::error!("Server sent error: {:?}", msg.reply_error_code);
        return Err(ConnectionError::ServerError(msg.reply_error_code));
    }

    if msg_type == MsgType::EchoReply && conn.state != HandshakeState::WaitPreinitReply {
        return echo::on_echo_reply(conn, msg);
    }

    match (conn.state, msg_type) {
        (HandshakeState::WaitPreinitReply, MsgType::PreinitReply) => on_preinit_reply(conn, msg),
        (HandshakeState::WaitInitReply, MsgType::InitReply) => on_init_reply(conn, msg),
        (HandshakeState::WaitSetOptionReply, MsgType::SetOptionReply) => {
            on_set_option_reply(conn, msg)
        }
        _ => Err(ConnectionError::UnexpectedState),
    }
}

fn check_seq(conn: &Connection, msg: &DecodedMessage) -> Result<(), ConnectionError> {
    match msg.seq_number {
        Some(seq) if seq == conn.next_expected_seq => Ok(()),
        _ => Err(ConnectionError::BadSequenceNumber),
    }
}

fn on_preinit_reply(conn: &mut Connection, msg: DecodedMessage) -> Result<(), ConnectionError> {
    check_seq(conn, &msg)?;
    let server_tls = msg
        .tls_supported
        .ok_or(ConnectionError::MissingOption("tls_supported"))?;
    let _cert_required = msg
        .tls_client_cert_required
        .ok_or(ConnectionError::MissingOption("tls_client_cert_required"))?;
    conn.server_tls_supported = Some(server_tls);
    conn.next_expected_seq += 1;

    let use_tls = TlsSupported::negotiate(server_tls, conn.client_tls_supported).map_err(|_| {
        ConnectionError::IncompatibleTls {
            server: server_tls,
            client: conn.client_tls_supported,
        }
    })?;

    if use_tls {
        let seq = conn.next_main_seq();
        let frame = codec::message::encode_starttls(seq);
        conn.main_send.set(&frame)?;
        conn.state = HandshakeState::WaitStarttlsSent;
        log::debug!("Sent STARTTLS(seq={seq})");
        Ok(())
    } else {
        send_init(conn)
    }
}

/// §4.7: the only moment the transport changes mid-connection. Called by
/// the event loop once the `STARTTLS` frame has fully drained.
pub fn send_init(conn: &mut Connection) -> Result<(), ConnectionError> {
    let seq = conn.next_main_seq();
    let frame = codec::message::encode_init(seq, conn.node_id);
    conn.main_send.set(&frame)?;
    conn.state = HandshakeState::WaitInitReply;
    log::debug!("Sent INIT(seq={seq})");
    Ok(())
}

fn on_init_reply(conn: &mut Connection, msg: DecodedMessage) -> Result<(), ConnectionError> {
    check_seq(conn, &msg)?;
    conn.next_expected_seq += 1;

    let server_max_request_size = msg
        .server_max_request_size
        .ok_or(ConnectionError::MissingOption("server_max_request_size"))?;
    let server_max_reply_size = msg
        .server_max_reply_size
        .ok_or(ConnectionError::MissingOption("server_max_reply_size"))?;
    msg.supported_messages
        .as_ref()
        .ok_or(ConnectionError::MissingOption("supported_messages"))?;
    msg.supported_options
        .as_ref()
        .ok_or(ConnectionError::MissingOption("supported_options"))?;
    let supported_algorithms = msg
        .supported_decision_algorithms
        .ok_or(ConnectionError::MissingOption("supported_decision_algorithms"))?;

    if server_max_request_size < MIN_SERVER_REQUEST_MAX {
        return Err(ConnectionError::ServerRequestMaxTooSmall {
            server_max: server_max_request_size,
            min: MIN_SERVER_REQUEST_MAX,
        });
    }
    if server_max_reply_size as usize > crate::instance::RECV_MAX {
        return Err(ConnectionError::ServerReplyMaxTooLarge {
            server_max: server_max_reply_size,
            max: crate::instance::RECV_MAX as u32,
        });
    }

    // Invariant 7: buffer maxima only ever move upward, here.
    conn.main_send.set_max(server_max_request_size as usize);
    conn.echo_send.set_max(server_max_request_size as usize);
    conn.recv.set_max(server_max_reply_size as usize);

    if !supported_algorithms.contains(&conn.decision_algorithm) {
        return Err(ConnectionError::UnsupportedDecisionAlgorithm);
    }

    let seq = conn.next_main_seq();
    let frame = codec::message::encode_set_option(
        seq,
        conn.decision_algorithm,
        conn.echo_heartbeat_ms(),
    );
    conn.main_send.set(&frame)?;
    conn.state = HandshakeState::WaitSetOptionReply;
    log::debug!("Sent SET_OPTION(seq={seq})");
    Ok(())
}

fn on_set_option_reply(conn: &mut Connection, msg: DecodedMessage) -> Result<(), ConnectionError> {
    check_seq(conn, &msg)?;
    conn.next_expected_seq += 1;

    let algo = msg
        .decision_algorithm
        .ok_or(ConnectionError::MissingOption("decision_algorithm"))?;
    let heartbeat_interval = msg
        .heartbeat_interval
        .ok_or(ConnectionError::MissingOption("heartbeat_interval"))?;

    if algo != conn.decision_algorithm || heartbeat_interval != conn.echo_heartbeat_ms() {
        return Err(ConnectionError::SetOptionRejected);
    }

    conn.state = HandshakeState::Steady;
    log::debug!("Handshake complete, entering steady state");

    if heartbeat_interval > 0 {
        echo::schedule_heartbeat(conn, heartbeat_interval);
    }
    Ok(())
}
