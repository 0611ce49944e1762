//! Echo channel (§4.6): an independent liveness sub-protocol, driven by a
//! periodic timer rearmed at the negotiated heartbeat interval. Shares no
//! sequence state with the main channel (invariant 3).

use std::time::Duration;

use crate::codec::{self, DecodedMessage};
use crate::error::ConnectionError;
use crate::instance::Connection;
use crate::timer::TimerAction;

/// Registers the periodic heartbeat timer. Called once, when
/// `SET_OPTION_REPLY` confirms a nonzero heartbeat interval.
pub fn schedule_heartbeat(conn: &mut Connection, heartbeat_ms: u32) {
    let interval = Duration::from_millis(heartbeat_ms as u64);
    let handle = conn.timers.add(interval, |conn: &mut Connection| {
        if let Err(e) = fire_heartbeat(conn) {
            conn.mark_disconnect(e);
            return TimerAction::Cancel;
        }
        TimerAction::Reschedule
    });
    conn.heartbeat_timer = Some(handle);
}

/// The timer callback body, split out so it can return a normal `Result`
/// instead of folding the disconnect into the `TimerAction` plumbing.
fn fire_heartbeat(conn: &mut Connection) -> Result<(), ConnectionError> {
    // invariant 2: a new echo-request may only be scheduled once the
    // previous one's reply arrived.
    if conn.echo_in_flight {
        return Err(ConnectionError::EchoReplyNotOnTime);
    }
    if conn.echo_reply_received != conn.echo_request_expected {
        return Err(ConnectionError::EchoReplyNotOnTime);
    }

    conn.echo_request_expected += 1;
    let frame = codec::message::encode_echo_request(conn.echo_request_expected);
    conn.echo_send.set(&frame)?;
    conn.echo_in_flight = true;
    log::debug!("Sent ECHO_REQUEST(seq={})", conn.echo_request_expected);
    Ok(())
}

/// Handles an `ECHO_REPLY` arriving on the main socket (it shares the
/// frame/seq wire format but not the main channel's sequence counter).
pub fn on_echo_reply(conn: &mut Connection, msg: DecodedMessage) -> Result<(), ConnectionError> {
    let seq = msg.seq_number.ok_or(ConnectionError::BadSequenceNumber)?;
    if seq != conn.echo_request_expected {
        return Err(ConnectionError::BadSequenceNumber);
    }
    conn.echo_reply_received = seq;
    conn.echo_in_flight = false;
    log::debug!("Received ECHO_REPLY(seq={seq})");
    Ok(())
}
