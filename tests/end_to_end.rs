//! Drives the real `Connection`/`EventLoop` against an in-process mock
//! server speaking the wire protocol directly, covering the handshake and
//! disconnect paths end to end rather than unit-testing each handler in
//! isolation.

mod util;

use std::net::TcpStream as StdTcpStream;
use std::time::Duration;

use mio::net::TcpStream as MioTcpStream;

use qdevice_net::codec::message::{encode_echo_reply, encode_init_reply, encode_preinit_reply, encode_set_option_reply};
use qdevice_net::codec::options::{DecisionAlgorithm, TlsSupported};
use qdevice_net::codec::decode;
use qdevice_net::error::ConnectionError;
use qdevice_net::event_loop::EventLoop;
use qdevice_net::instance::Connection;
use qdevice_net::protocol::{state, HandshakeState};
use qdevice_net::transport::Transport;
use qdevice_net::votequorum::test_double::TestVotingSubsystem;

use util::{read_frame, spawn_mock_server, write_frame};

fn build_connection(addr: std::net::SocketAddr, heartbeat: Duration) -> (Connection, TestVotingSubsystem) {
    let stream = MioTcpStream::connect(addr).expect("connect to mock server");
    let transport = Transport::connect(stream);
    let conn = Connection::new(
        transport,
        /* node_id */ 1,
        "mycluster".to_string(),
        addr.ip().to_string(),
        addr.port(),
        TlsSupported::Unsupported,
        DecisionAlgorithm::Test,
        heartbeat,
        heartbeat,
        None,
    );
    let voting = TestVotingSubsystem::new().expect("build voting double");
    (conn, voting)
}

fn run_to_disconnect(mut conn: Connection, mut voting: TestVotingSubsystem) -> Connection {
    state::start(&mut conn).expect("send PREINIT");
    let mut event_loop = EventLoop::new(&conn, &voting).expect("build event loop");
    event_loop
        .run(&mut conn, &mut voting)
        .expect("event loop returns on disconnect, not on error");
    conn
}

#[test]
fn plain_handshake_reaches_steady_and_exchanges_one_heartbeat() {
    let (addr, server) = spawn_mock_server(|mut stream: StdTcpStream| {
        let preinit = read_frame(&mut stream);
        let preinit = decode(&preinit).unwrap();
        assert_eq!(preinit.cluster_name.as_deref(), Some("mycluster"));
        let seq = preinit.seq_number.unwrap();
        write_frame(
            &mut stream,
            &encode_preinit_reply(seq, TlsSupported::Unsupported, false),
        );

        let init = read_frame(&mut stream);
        let init = decode(&init).unwrap();
        let seq = init.seq_number.unwrap();
        write_frame(
            &mut stream,
            &encode_init_reply(seq, 65536, 65536, &[DecisionAlgorithm::Test]),
        );

        let set_option = read_frame(&mut stream);
        let set_option = decode(&set_option).unwrap();
        let seq = set_option.seq_number.unwrap();
        let heartbeat_ms = set_option.heartbeat_interval.unwrap();
        write_frame(
            &mut stream,
            &encode_set_option_reply(seq, DecisionAlgorithm::Test, heartbeat_ms),
        );

        let echo_request = read_frame(&mut stream);
        let echo_request = decode(&echo_request).unwrap();
        assert_eq!(echo_request.seq_number, Some(1));
        write_frame(&mut stream, &encode_echo_reply(1));

        // Closing here hands the client a clean EOF once it has nothing
        // left to prove.
    });

    let (conn, voting) = build_connection(addr, Duration::from_millis(20));
    let conn = run_to_disconnect(conn, voting);

    assert_eq!(conn.state, HandshakeState::Steady);
    assert_eq!(conn.echo_reply_received, 1);
    assert!(matches!(conn.disconnect_pending, Some(ConnectionError::Eof)));

    server.join().unwrap();
}

#[test]
fn incompatible_tls_disconnects_after_preinit_reply() {
    let (addr, server) = spawn_mock_server(|mut stream: StdTcpStream| {
        let preinit = read_frame(&mut stream);
        let seq = decode(&preinit).unwrap().seq_number.unwrap();
        write_frame(
            &mut stream,
            &encode_preinit_reply(seq, TlsSupported::Required, false),
        );
    });

    let (conn, voting) = build_connection(addr, Duration::from_secs(60));
    let conn = run_to_disconnect(conn, voting);

    assert_eq!(conn.state, HandshakeState::WaitPreinitReply);
    assert!(matches!(
        conn.disconnect_pending,
        Some(ConnectionError::IncompatibleTls { .. })
    ));

    server.join().unwrap();
}

#[test]
fn unsupported_decision_algorithm_disconnects_after_init_reply() {
    let (addr, server) = spawn_mock_server(|mut stream: StdTcpStream| {
        let preinit = read_frame(&mut stream);
        let seq = decode(&preinit).unwrap().seq_number.unwrap();
        write_frame(
            &mut stream,
            &encode_preinit_reply(seq, TlsSupported::Unsupported, false),
        );

        let init = read_frame(&mut stream);
        let seq = decode(&init).unwrap().seq_number.unwrap();
        write_frame(
            &mut stream,
            &encode_init_reply(seq, 65536, 65536, &[DecisionAlgorithm::Unknown(5)]),
        );
    });

    let (conn, voting) = build_connection(addr, Duration::from_secs(60));
    let conn = run_to_disconnect(conn, voting);

    assert_eq!(conn.state, HandshakeState::WaitInitReply);
    assert!(matches!(
        conn.disconnect_pending,
        Some(ConnectionError::UnsupportedDecisionAlgorithm)
    ));

    server.join().unwrap();
}

#[test]
fn missed_echo_reply_disconnects() {
    let (addr, server) = spawn_mock_server(|mut stream: StdTcpStream| {
        let preinit = read_frame(&mut stream);
        let seq = decode(&preinit).unwrap().seq_number.unwrap();
        write_frame(
            &mut stream,
            &encode_preinit_reply(seq, TlsSupported::Unsupported, false),
        );

        let init = read_frame(&mut stream);
        let seq = decode(&init).unwrap().seq_number.unwrap();
        write_frame(
            &mut stream,
            &encode_init_reply(seq, 65536, 65536, &[DecisionAlgorithm::Test]),
        );

        let set_option = read_frame(&mut stream);
        let set_option = decode(&set_option).unwrap();
        let seq = set_option.seq_number.unwrap();
        let heartbeat_ms = set_option.heartbeat_interval.unwrap();
        write_frame(
            &mut stream,
            &encode_set_option_reply(seq, DecisionAlgorithm::Test, heartbeat_ms),
        );

        // Never replies to the echo request that follows; keep the socket
        // open well past two heartbeat periods so the client's own timer,
        // not an EOF, is what ends the connection.
        std::thread::sleep(Duration::from_millis(300));
    });

    let (conn, voting) = build_connection(addr, Duration::from_millis(15));
    let conn = run_to_disconnect(conn, voting);

    assert_eq!(conn.state, HandshakeState::Steady);
    assert!(matches!(
        conn.disconnect_pending,
        Some(ConnectionError::EchoReplyNotOnTime)
    ));

    server.join().unwrap();
}

#[test]
fn oversized_frame_disconnects_with_declared_length() {
    const BODY_LEN: u32 = 10_000;

    let (addr, server) = spawn_mock_server(|mut stream: StdTcpStream| {
        let preinit = read_frame(&mut stream);
        let seq = decode(&preinit).unwrap().seq_number.unwrap();
        write_frame(
            &mut stream,
            &encode_preinit_reply(seq, TlsSupported::Unsupported, false),
        );

        let init = read_frame(&mut stream);
        let seq = decode(&init).unwrap().seq_number.unwrap();
        // Shrinks the client's receive ceiling well below the bogus frame
        // sent after the handshake completes.
        write_frame(&mut stream, &encode_init_reply(seq, 65536, 4096, &[DecisionAlgorithm::Test]));

        let set_option = read_frame(&mut stream);
        let set_option = decode(&set_option).unwrap();
        let seq = set_option.seq_number.unwrap();
        let heartbeat_ms = set_option.heartbeat_interval.unwrap();
        write_frame(
            &mut stream,
            &encode_set_option_reply(seq, DecisionAlgorithm::Test, heartbeat_ms),
        );

        // Written in two writes, with a pause in between, so the client
        // observes the declared length before the oversized body arrives
        // (a single combined write would make the body overflow the recv
        // buffer's append check before the length is ever peeked).
        use std::io::Write;
        stream.write_all(&BODY_LEN.to_be_bytes()).unwrap();
        stream.flush().unwrap();
        std::thread::sleep(Duration::from_millis(100));
        stream.write_all(&vec![0u8; BODY_LEN as usize]).unwrap();
    });

    let (conn, voting) = build_connection(addr, Duration::from_secs(60));
    let conn = run_to_disconnect(conn, voting);

    assert_eq!(conn.state, HandshakeState::Steady);
    assert!(matches!(
        conn.disconnect_pending,
        Some(ConnectionError::MessageTooLarge { len, max }) if len == 4 + BODY_LEN && max == 4096
    ));

    server.join().unwrap();
}
