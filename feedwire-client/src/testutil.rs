//! Scripted in-process peers for connection and stream tests.

use std::sync::Arc;
use std::time::Duration;

use feedwire_protocol::{Decoder, Encoder, Message};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::connection::{Connection, ConnectionConfig};

/// One accepted peer socket with frame-level read/write helpers.
pub(crate) struct TestPeer {
    socket: TcpStream,
    decoder: Decoder,
}

impl TestPeer {
    /// Reads the next complete message off the socket.
    pub(crate) async fn read_message(&mut self) -> (u16, Message) {
        loop {
            if let Some(decoded) = self.decoder.decode_message().unwrap() {
                return decoded;
            }
            let mut buf = [0u8; 4096];
            let n = self.socket.read(&mut buf).await.unwrap();
            assert!(n > 0, "peer: connection closed while awaiting a message");
            self.decoder.extend(&buf[..n]);
        }
    }

    pub(crate) async fn send(&mut self, stream_id: u16, message: &Message) {
        let bytes = Encoder::encode(stream_id, message).unwrap();
        self.socket.write_all(&bytes).await.unwrap();
    }
}

/// Installs a test subscriber honoring `RUST_LOG`; repeated calls are no-ops.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub(crate) async fn listen() -> (TcpListener, String) {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    (listener, addr)
}

pub(crate) async fn accept(listener: &TcpListener) -> TestPeer {
    let (socket, _) = listener.accept().await.unwrap();
    TestPeer {
        socket,
        decoder: Decoder::new(),
    }
}

/// Connects to `addr` and spawns the read loop, with a generous request
/// timeout so scripted tests never race it.
pub(crate) async fn connect(addr: &str) -> Arc<Connection> {
    connect_with(ConnectionConfig::new(addr).with_request_timeout(Duration::from_secs(5))).await
}

pub(crate) async fn connect_with(config: ConnectionConfig) -> Arc<Connection> {
    let conn = Arc::new(Connection::new(config));
    conn.connect().await.unwrap();
    tokio::spawn(conn.clone().run());
    conn
}
