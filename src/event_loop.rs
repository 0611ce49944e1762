//! Event loop (§4.7): the single driver. One iteration composes the poll
//! set, blocks bounded by the timer wheel, then dispatches readable,
//! writable and timer work in the exact order the spec lists, so that a
//! disconnect decided mid-iteration always short-circuits the rest of it.

use std::io;
use std::os::unix::io::AsRawFd;
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};

use crate::codec;
use crate::error::{ConnectionError, ProcessError};
use crate::instance::Connection;
use crate::protocol::state;
use crate::transport::{ReadOutcome, Transport};
use crate::votequorum::VotingSubsystem;

const SERVER_TOKEN: Token = Token(0);
const VOTEQUORUM_TOKEN: Token = Token(1);

pub struct EventLoop {
    poll: Poll,
    events: Events,
}

impl EventLoop {
    pub fn new(conn: &Connection, voting: &dyn VotingSubsystem) -> io::Result<Self> {
        let poll = Poll::new()?;
        poll.registry().register(
            &mut SourceFd(&conn.transport.underlying().as_raw_fd()),
            SERVER_TOKEN,
            Interest::READABLE,
        )?;
        poll.registry().register(
            &mut SourceFd(&voting.fd()),
            VOTEQUORUM_TOKEN,
            Interest::READABLE,
        )?;
        Ok(EventLoop {
            poll,
            events: Events::with_capacity(16),
        })
    }

    /// Runs until the connection is marked for disconnect. A votequorum
    /// dispatch failure or a failure to maintain the poll registration
    /// itself is fatal-process (§7) and aborts the whole run, mirroring the
    /// original's `errx(1, ...)` on the same conditions.
    pub fn run(
        &mut self,
        conn: &mut Connection,
        voting: &mut dyn VotingSubsystem,
    ) -> Result<(), ProcessError> {
        loop {
            self.reregister_writable(conn)?;

            let timeout = conn.timers.time_to_next_deadline();
            if let Err(e) = self.poll.poll(&mut self.events, timeout) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(ProcessError::Socket(e));
            }

            for event in self.events.iter() {
                if event.token() == VOTEQUORUM_TOKEN && event.is_readable() {
                    dispatch_votequorum(conn, voting)?;
                }
                if event.token() == SERVER_TOKEN {
                    if event.is_error() || event.is_read_closed() {
                        conn.mark_disconnect(ConnectionError::PollError);
                    } else if event.is_readable() {
                        if let Err(e) = handle_readable(conn) {
                            conn.mark_disconnect(e);
                        }
                    }
                }
            }

            if !conn.should_disconnect() {
                let writable = self
                    .events
                    .iter()
                    .any(|e| e.token() == SERVER_TOKEN && e.is_writable());
                if writable {
                    if let Err(e) = handle_writable(conn) {
                        conn.mark_disconnect(e);
                    }
                }
            }

            if !conn.should_disconnect() {
                // The wheel's callbacks take `&mut Connection`, which
                // includes the wheel itself; borrow it out for the
                // duration of the call to avoid aliasing `conn`.
                let mut timers = std::mem::take(&mut conn.timers);
                timers.expire_due(conn);
                conn.timers = timers;
            }

            if conn.should_disconnect() {
                return Ok(());
            }
        }
    }

    fn reregister_writable(&self, conn: &Connection) -> Result<(), ProcessError> {
        let want_writable = conn.main_send.in_flight() || conn.echo_send.in_flight();
        let interest = if want_writable {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        self.poll
            .registry()
            .reregister(
                &mut SourceFd(&conn.transport.underlying().as_raw_fd()),
                SERVER_TOKEN,
                interest,
            )
            .map_err(ProcessError::Socket)
    }
}

/// Pumps the voting subsystem's dispatch loop and records any membership
/// notification it returns (§2's "receive ring-id notifications"). A
/// dispatch failure is fatal-process (§7): the original aborts via
/// `errx(1, "Can't dispatch votequorum messages")` on the same condition.
fn dispatch_votequorum(
    conn: &mut Connection,
    voting: &mut dyn VotingSubsystem,
) -> Result<(), ProcessError> {
    let events = voting.dispatch()?;
    for event in events {
        log::debug!(
            "Membership update: quorate={} ring_id={}",
            event.quorate,
            event.ring_id
        );
        conn.last_ring_id = Some(event.ring_id);
        conn.quorate = event.quorate;
    }
    Ok(())
}

fn handle_readable(conn: &mut Connection) -> Result<(), ConnectionError> {
    loop {
        let outcome = {
            let Connection {
                transport,
                recv,
                skip,
                ..
            } = conn;
            transport.read_frame(recv, skip)?
        };
        match outcome {
            ReadOutcome::Partial => return Ok(()),
            ReadOutcome::Eof => return Err(ConnectionError::Eof),
            ReadOutcome::Frame(frame) => {
                let decoded = codec::decode(&frame)?;
                state::on_message(conn, decoded)?;
                maybe_upgrade_after_starttls(conn)?;
            }
        }
    }
}

fn handle_writable(conn: &mut Connection) -> Result<(), ConnectionError> {
    let send_echo_first = conn.should_send_echo_first();
    let order = if send_echo_first {
        [true, false]
    } else {
        [false, true]
    };

    for echo_first in order {
        let buf = if echo_first {
            &mut conn.echo_send
        } else {
            &mut conn.main_send
        };
        if !buf.in_flight() {
            continue;
        }
        let written = conn.transport.write_some(buf.unsent())?;
        if written > 0 {
            let buf = if echo_first {
                &mut conn.echo_send
            } else {
                &mut conn.main_send
            };
            buf.advance_progress(written);
            if !buf.in_flight() {
                buf.clear();
            }
        }
        break;
    }

    maybe_upgrade_after_starttls(conn)
}

/// §4.7: once the `STARTTLS` frame has fully drained, upgrade the
/// transport and immediately queue `INIT`. The only place the transport
/// changes mid-connection (invariant 5).
fn maybe_upgrade_after_starttls(conn: &mut Connection) -> Result<(), ConnectionError> {
    if conn.state != crate::protocol::HandshakeState::WaitStarttlsSent {
        return Ok(());
    }
    if conn.main_send.in_flight() {
        return Ok(());
    }

    if !conn.transport.is_tls() {
        perform_tls_upgrade(conn)?;
    }

    state::send_init(conn)
}

#[cfg(feature = "tls")]
fn perform_tls_upgrade(conn: &mut Connection) -> Result<(), ConnectionError> {
    let config = conn
        .tls_config
        .clone()
        .ok_or_else(|| ConnectionError::Tls("no client TLS configuration loaded".into()))?;
    let server_name = rustls::pki_types::ServerName::try_from(conn.host.clone())
        .map_err(|e| ConnectionError::Tls(format!("invalid server name: {e}")))?;
    let client_conn = rustls::ClientConnection::new(config, server_name)
        .map_err(|e| ConnectionError::Tls(e.to_string()))?;

    conn.transport.upgrade_to_tls(client_conn);
    log::debug!("TLS handshake started with {}", conn.host);
    Ok(())
}

#[cfg(not(feature = "tls"))]
fn perform_tls_upgrade(_conn: &mut Connection) -> Result<(), ConnectionError> {
    Err(ConnectionError::Tls("built without TLS support".into()))
}
