//! End-to-end tests for `LanTransport` over loopback sockets.
//!
//! Every wait is bounded by a timeout so a state-machine bug fails the test
//! instead of hanging it.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use lanshare_core::{Role, Transport, TransportError, TransportEvent, TransportState};
use lanshare_lan::{LanListener, LanTransport, TlsConfig};
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::io::AsyncReadExt;
use tokio::time::timeout;

const STEP: Duration = Duration::from_secs(5);

fn loopback() -> IpAddr {
    "127.0.0.1".parse().unwrap()
}

fn any_port() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

async fn next(t: &mut LanTransport) -> Option<TransportEvent> {
    timeout(STEP, t.next_event())
        .await
        .expect("timed out waiting for a transport event")
}

async fn expect_state(t: &mut LanTransport, state: TransportState) {
    assert_eq!(next(t).await, Some(TransportEvent::StateChanged(state)));
}

/// Reads `Data` events until `n` bytes have arrived.
async fn read_bytes(t: &mut LanTransport, n: usize) -> Vec<u8> {
    let mut out = Vec::new();
    while out.len() < n {
        match next(t).await {
            Some(TransportEvent::Data(chunk)) => out.extend_from_slice(&chunk),
            other => panic!("expected data, got {other:?}"),
        }
    }
    out
}

async fn drain(t: &mut LanTransport) -> Vec<TransportEvent> {
    let mut out = Vec::new();
    while let Some(event) = next(t).await {
        out.push(event);
    }
    out
}

struct Pki {
    server: TlsConfig,
    client: TlsConfig,
}

/// A server certificate for `localhost` and a client that trusts it.
fn localhost_pki() -> Pki {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der()));
    Pki {
        server: TlsConfig::serving(vec![cert.cert.der().clone()], key).unwrap(),
        client: TlsConfig::trusting(vec![cert.cert.der().clone()])
            .unwrap()
            .with_server_name("localhost")
            .unwrap(),
    }
}

// ── Plaintext ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_plain_round_trip_and_graceful_close() {
    let listener = LanListener::bind(any_port(), None).await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut client = LanTransport::connect(None, loopback(), port);
    client.write(b"hello");
    client.start();
    let mut server = timeout(STEP, listener.accept()).await.unwrap().unwrap();
    assert_eq!(server.role(), Role::Acceptor);
    server.start();

    expect_state(&mut client, TransportState::Connecting).await;
    expect_state(&mut client, TransportState::Connected).await;
    expect_state(&mut server, TransportState::Connecting).await;
    expect_state(&mut server, TransportState::Connected).await;
    assert_eq!(read_bytes(&mut server, 5).await, b"hello");

    server.write(b"world");
    assert_eq!(read_bytes(&mut client, 5).await, b"world");

    client.close();
    assert_eq!(
        drain(&mut client).await,
        vec![
            TransportEvent::StateChanged(TransportState::Closing),
            TransportEvent::Closed,
        ]
    );
    assert_eq!(client.state(), TransportState::Closed);

    // The server sees end of stream and closes too.
    assert_eq!(
        drain(&mut server).await,
        vec![
            TransportEvent::StateChanged(TransportState::Closing),
            TransportEvent::Closed,
        ]
    );
    assert_eq!(server.state(), TransportState::Closed);
}

#[tokio::test]
async fn test_close_before_connect_flushes_queued_writes() {
    let listener = LanListener::bind(any_port(), None).await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut client = LanTransport::connect(None, loopback(), port);
    client.write(b"queued ");
    client.write(b"in order");
    client.close();
    client.write(b"dropped after close");
    client.start();
    let mut server = timeout(STEP, listener.accept()).await.unwrap().unwrap();
    server.start();

    assert_eq!(
        drain(&mut client).await,
        vec![
            TransportEvent::StateChanged(TransportState::Connecting),
            TransportEvent::StateChanged(TransportState::Connected),
            TransportEvent::StateChanged(TransportState::Closing),
            TransportEvent::Closed,
        ]
    );

    expect_state(&mut server, TransportState::Connecting).await;
    expect_state(&mut server, TransportState::Connected).await;
    let mut received = Vec::new();
    for event in drain(&mut server).await {
        if let TransportEvent::Data(chunk) = event {
            received.extend_from_slice(&chunk);
        }
    }
    assert_eq!(received, b"queued in order");
}

#[tokio::test]
async fn test_connect_refused_reports_connect_error() {
    let port = {
        let listener = LanListener::bind(any_port(), None).await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let mut client = LanTransport::connect(None, loopback(), port);
    client.start();

    let events = drain(&mut client).await;
    assert_eq!(events[0], TransportEvent::StateChanged(TransportState::Connecting));
    assert!(
        matches!(events[1], TransportEvent::Error(TransportError::Connect { .. })),
        "got {:?}",
        events[1]
    );
    assert_eq!(events.len(), 2);
    assert_eq!(client.state(), TransportState::Error);
}

#[tokio::test]
async fn test_abort_is_immediate_and_idempotent() {
    let listener = LanListener::bind(any_port(), None).await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut client = LanTransport::connect(None, loopback(), port);
    client.start();
    let mut server = timeout(STEP, listener.accept()).await.unwrap().unwrap();
    server.start();
    expect_state(&mut client, TransportState::Connecting).await;
    expect_state(&mut client, TransportState::Connected).await;

    client.abort();
    client.abort();
    client.write(b"ignored");

    assert_eq!(client.state(), TransportState::Closed);
    assert_eq!(next(&mut client).await, None);

    // The peer observes the socket going away.
    let tail = drain(&mut server).await;
    assert!(matches!(
        tail.last(),
        Some(TransportEvent::Closed) | Some(TransportEvent::Error(_))
    ));
}

#[tokio::test]
async fn test_abort_discards_writes_blocked_on_a_stalled_peer() {
    // Arrange: a raw peer that does not read until the client aborts.
    const PAYLOAD: usize = 64 * 1024 * 1024;
    let listener = tokio::net::TcpListener::bind(any_port()).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let mut client = LanTransport::connect(None, loopback(), port);
    client.start();
    let (mut peer, _) = timeout(STEP, listener.accept()).await.unwrap().unwrap();
    expect_state(&mut client, TransportState::Connecting).await;
    expect_state(&mut client, TransportState::Connected).await;

    // Act
    client.write(&vec![0x5a; PAYLOAD]);
    tokio::time::sleep(Duration::from_millis(200)).await;
    client.abort();
    drop(client);

    // Assert: the socket closes with most of the payload never sent.
    let mut received = 0usize;
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        match timeout(STEP, peer.read(&mut buf))
            .await
            .expect("socket was not closed after abort")
        {
            Ok(0) | Err(_) => break,
            Ok(n) => received += n,
        }
    }
    assert!(received < PAYLOAD, "peer received all {received} bytes");
}

// ── TLS ───────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_tls_round_trip_passes_through_handshake() {
    let pki = localhost_pki();
    let listener = LanListener::bind(any_port(), Some(pki.server)).await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut client = LanTransport::connect(Some(pki.client), loopback(), port);
    client.write(b"secret");
    client.start();
    let mut server = timeout(STEP, listener.accept()).await.unwrap().unwrap();
    server.start();

    expect_state(&mut client, TransportState::Connecting).await;
    expect_state(&mut client, TransportState::TlsHandshaking).await;
    expect_state(&mut client, TransportState::Connected).await;
    expect_state(&mut server, TransportState::Connecting).await;
    expect_state(&mut server, TransportState::TlsHandshaking).await;
    expect_state(&mut server, TransportState::Connected).await;
    assert_eq!(read_bytes(&mut server, 6).await, b"secret");

    server.write(b"reply");
    assert_eq!(read_bytes(&mut client, 5).await, b"reply");

    client.close();
    assert_eq!(drain(&mut client).await.last(), Some(&TransportEvent::Closed));
}

#[tokio::test]
async fn test_tls_untrusted_certificate_fails_without_data() {
    let pki = localhost_pki();
    let stranger = localhost_pki();
    let listener = LanListener::bind(any_port(), Some(pki.server)).await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut client = LanTransport::connect(Some(stranger.client), loopback(), port);
    client.write(b"never sent");
    client.start();
    let mut server = timeout(STEP, listener.accept()).await.unwrap().unwrap();
    server.start();

    let events = drain(&mut client).await;
    assert_eq!(events.len(), 3, "got {events:?}");
    assert_eq!(events[0], TransportEvent::StateChanged(TransportState::Connecting));
    assert_eq!(events[1], TransportEvent::StateChanged(TransportState::TlsHandshaking));
    assert!(matches!(events[2], TransportEvent::Error(TransportError::Tls(_))));
    assert_eq!(client.state(), TransportState::Error);

    let server_events = drain(&mut server).await;
    assert!(!server_events
        .iter()
        .any(|e| matches!(e, TransportEvent::Data(_))));
}

#[tokio::test]
async fn test_tls_name_mismatch_fails_handshake() {
    let pki = localhost_pki();
    let listener = LanListener::bind(any_port(), Some(pki.server)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    // Verifies against "other.lan" instead of the certificate's "localhost".
    let client_tls = pki.client.with_server_name("other.lan").unwrap();

    let mut client = LanTransport::connect(Some(client_tls), loopback(), port);
    client.start();
    let mut server = timeout(STEP, listener.accept()).await.unwrap().unwrap();
    server.start();

    let events = drain(&mut client).await;
    assert!(matches!(
        events.last(),
        Some(TransportEvent::Error(TransportError::Tls(_)))
    ));
    drop(server);
}

#[tokio::test]
async fn test_tls_acceptor_without_server_config_fails() {
    let pki = localhost_pki();
    // The listener has only a client-side configuration.
    let listener = LanListener::bind(any_port(), Some(pki.client.clone())).await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut client = LanTransport::connect(Some(pki.client), loopback(), port);
    client.start();
    let mut server = timeout(STEP, listener.accept()).await.unwrap().unwrap();
    server.start();

    let events = drain(&mut server).await;
    assert_eq!(
        events.last(),
        Some(&TransportEvent::Error(TransportError::Tls(
            "no server certificate configured".to_string()
        )))
    );
    let client_events = drain(&mut client).await;
    assert!(matches!(client_events.last(), Some(TransportEvent::Error(_))));
}
