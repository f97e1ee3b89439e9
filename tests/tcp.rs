//! Socket behavior against the bundled TCP transport, over loopback.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use streamlane::{Socket, SocketError};

const TIMEOUT: Duration = Duration::from_secs(5);

fn wait_until(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn loopback_echo() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let (done_tx, done_rx) = mpsc::channel::<()>();

    let server = std::thread::spawn(move || {
        let (mut peer, _) = listener.accept().unwrap();
        let mut buf = [0u8; 256];
        let n = peer.read(&mut buf).unwrap();
        peer.write_all(&buf[..n]).unwrap();
        // hold the connection until the client saw the echo
        let _ = done_rx.recv_timeout(TIMEOUT);
    });

    let socket = Socket::connect_tcp("127.0.0.1", port).unwrap();
    assert!(wait_until(|| socket.is_connected()));

    let (tx, rx) = mpsc::channel();
    socket
        .read(move |value| {
            let _ = tx.send(value);
        })
        .unwrap();

    // writability arrives as its own event; retry until it has
    assert!(wait_until(|| socket.write("ping\n").is_ok()));
    assert_eq!(
        rx.recv_timeout(TIMEOUT).unwrap().as_deref(),
        Some("ping")
    );

    done_tx.send(()).unwrap();
    server.join().unwrap();
}

#[test]
fn peer_close_disconnects() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let (close_tx, close_rx) = mpsc::channel::<()>();

    let server = std::thread::spawn(move || {
        let (peer, _) = listener.accept().unwrap();
        let _ = close_rx.recv_timeout(TIMEOUT);
        drop(peer);
    });

    let socket = Socket::connect_tcp("127.0.0.1", port).unwrap();
    assert!(wait_until(|| socket.is_connected()));

    close_tx.send(()).unwrap();
    assert!(wait_until(|| !socket.is_connected()));
    assert!(matches!(socket.write("ping"), Err(SocketError::NotConnected)));
    assert!(matches!(socket.read(|_| {}), Err(SocketError::NotConnected)));

    server.join().unwrap();
}

#[test]
fn refused_connection_never_connects() {
    // grab a free port, then close the listener so nobody is there
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    match Socket::connect_tcp("127.0.0.1", port) {
        // the transport may observe the refusal synchronously
        Err(SocketError::ConnectionFailed { .. }) => {}
        Err(other) => panic!("unexpected error: {other}"),
        Ok(socket) => {
            std::thread::sleep(Duration::from_millis(500));
            assert!(!socket.is_connected());
            assert!(matches!(socket.write("ping"), Err(SocketError::NotConnected)));
        }
    }
}

#[test]
fn unresolvable_host_fails_construction() {
    let err = Socket::connect_tcp("host.invalid", 9000).unwrap_err();
    assert!(matches!(err, SocketError::ConnectionFailed { .. }));
}
