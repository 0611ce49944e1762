// Not all functions are used by every test.
#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Binds a listener on an ephemeral localhost port and runs `script`
/// against the first connection it accepts, on its own thread. Returns the
/// address to connect to and a handle to join once the test is done.
pub fn spawn_mock_server<F>(script: F) -> (std::net::SocketAddr, JoinHandle<()>)
where
    F: FnOnce(TcpStream) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
    let addr = listener.local_addr().unwrap();
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept client connection");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        script(stream);
    });
    (addr, handle)
}

/// Reads one length-prefixed frame (header included) off a blocking stream.
pub fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).expect("read frame header");
    let body_len = u32::from_be_bytes(header) as usize;
    let mut body = vec![0u8; body_len];
    stream.read_exact(&mut body).expect("read frame body");
    let mut frame = header.to_vec();
    frame.extend_from_slice(&body);
    frame
}

pub fn write_frame(stream: &mut TcpStream, frame: &[u8]) {
    stream.write_all(frame).expect("write frame");
}
