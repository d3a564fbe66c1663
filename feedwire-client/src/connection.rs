//! TCP connection management and inbound frame dispatch.
//!
//! One `Connection` owns one socket. All logical streams share it: writes are
//! serialized through the writer lock, and a single read loop decodes frames
//! and routes each one to its stream's state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use feedwire_protocol::{Decoder, Encoder, Message, DEFAULT_PORT};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::channel::{Channel, StreamState};
use crate::error::ClientError;

/// Configuration for a feed service connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// `host` or `host:port`; a bare host uses the default port.
    pub address: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub read_buffer_size: usize,
}

impl ConnectionConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            read_buffer_size: 64 * 1024,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Splits the address on its last colon into host and port.
    pub(crate) fn host_port(&self) -> Result<(String, u16), ClientError> {
        match self.address.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse()
                    .map_err(|_| ClientError::InvalidAddress(self.address.clone()))?;
                Ok((host.to_owned(), port))
            }
            None => Ok((self.address.clone(), DEFAULT_PORT)),
        }
    }
}

/// A connection to the feed service, multiplexing logical streams over one
/// socket.
pub struct Connection {
    config: ConnectionConfig,
    writer: Mutex<Option<WriteHalf<TcpStream>>>,
    reader: Mutex<Option<ReadHalf<TcpStream>>>,
    decoder: Mutex<Decoder>,
    streams: Mutex<HashMap<u16, Arc<StreamState>>>,
    // stream id 0 is the control plane, so local ids start at 1
    next_stream_id: AtomicU16,
    connected: AtomicBool,
}

impl Connection {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            decoder: Mutex::new(Decoder::new()),
            streams: Mutex::new(HashMap::new()),
            next_stream_id: AtomicU16::new(1),
            connected: AtomicBool::new(false),
        }
    }

    /// Establishes the TCP connection. The caller is expected to spawn
    /// [`Connection::run`] afterwards to drive the read loop.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let (host, port) = self.config.host_port()?;
        tracing::debug!(host = %host, port, "connecting to feed service");

        let socket = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect((host.as_str(), port)),
        )
        .await
        .map_err(|_| ClientError::Timeout)??;
        socket.set_nodelay(true).ok();

        let (read_half, write_half) = tokio::io::split(socket);
        *self.reader.lock().await = Some(read_half);
        *self.writer.lock().await = Some(write_half);
        self.decoder.lock().await.clear();
        self.connected.store(true, Ordering::SeqCst);

        tracing::info!(address = %self.config.address, "connected");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub(crate) fn request_timeout(&self) -> Duration {
        self.config.request_timeout
    }

    /// Opens a logical stream and returns a channel bound to it.
    ///
    /// The open command is fire-and-forget: no reply is expected, and later
    /// failures surface as errors on the stream's own requests.
    pub async fn create_stream(self: &Arc<Self>) -> Result<Channel, ClientError> {
        let stream_id = self.next_stream_id.fetch_add(1, Ordering::SeqCst);
        let (state, events) = StreamState::new(stream_id);
        let state = Arc::new(state);
        self.streams.lock().await.insert(stream_id, state.clone());

        if let Err(err) = self.write_message(0, &Message::OpenStream { stream_id }).await {
            self.streams.lock().await.remove(&stream_id);
            return Err(err);
        }
        Ok(Channel::new(self.clone(), state, events))
    }

    /// Closes a logical stream: deregisters it and notifies the peer.
    pub(crate) async fn close_stream(&self, stream_id: u16) -> Result<(), ClientError> {
        self.streams.lock().await.remove(&stream_id);
        self.write_message(0, &Message::CloseStream { stream_id })
            .await
    }

    /// Encodes and writes one message under the writer lock.
    pub(crate) async fn write_message(
        &self,
        stream_id: u16,
        message: &Message,
    ) -> Result<(), ClientError> {
        let bytes = Encoder::encode(stream_id, message)?;
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(ClientError::NotConnected)?;
        writer.write_all(&bytes).await?;
        Ok(())
    }

    /// Drives the read loop until the connection fails, then tears down.
    pub async fn run(self: Arc<Self>) {
        match self.read_loop().await {
            Err(ClientError::ConnectionClosed) => {
                tracing::debug!(address = %self.config.address, "connection closed by peer");
            }
            Err(err) => {
                tracing::warn!(address = %self.config.address, %err, "connection failed");
            }
            Ok(()) => {}
        }
        self.teardown().await;
    }

    async fn read_loop(&self) -> Result<(), ClientError> {
        let mut buf = vec![0u8; self.config.read_buffer_size];
        loop {
            let n = {
                let mut reader = self.reader.lock().await;
                let reader = reader.as_mut().ok_or(ClientError::NotConnected)?;
                reader.read(&mut buf).await?
            };
            if n == 0 {
                return Err(ClientError::ConnectionClosed);
            }

            let mut decoder = self.decoder.lock().await;
            decoder.extend(&buf[..n]);
            // decode errors (unknown command, malformed payload) are fatal:
            // the byte stream can no longer be trusted to stay framed
            while let Some((stream_id, message)) = decoder.decode_message()? {
                self.dispatch(stream_id, message).await?;
            }
        }
    }

    async fn dispatch(&self, stream_id: u16, message: Message) -> Result<(), ClientError> {
        if stream_id == 0 {
            tracing::debug!(?message, "control message");
            return Ok(());
        }

        let stream = self.streams.lock().await.get(&stream_id).cloned();
        let Some(stream) = stream else {
            // the peer may not have seen our close yet; stale frames are
            // dropped rather than killing the connection
            tracing::warn!(
                stream_id,
                command = message.command().raw(),
                "frame for unregistered stream, dropping"
            );
            return Ok(());
        };

        if message.command().is_push() {
            stream.handle_push(message).await;
            Ok(())
        } else {
            stream.handle_reply(message).await
        }
    }

    /// Marks the connection dead and fails everything still in flight.
    async fn teardown(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.reader.lock().await.take();

        let streams: Vec<_> = self
            .streams
            .lock()
            .await
            .drain()
            .map(|(_, state)| state)
            .collect();
        for state in streams {
            state.fail_pending().await;
        }
    }

    /// Shuts down the socket; the read loop notices and finishes teardown.
    pub async fn close(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
    }
}
