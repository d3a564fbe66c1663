//! Top-level client entry point: lazy connection management, bucket
//! registries, and durable feed handles.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::connection::{Connection, ConnectionConfig};
use crate::error::ClientError;
use crate::feed::Feed;
use crate::watch::Bucket;

/// Lazily dials and caches one shared connection.
///
/// The slot lock is held across the dial, so concurrent callers queue behind
/// a single in-flight connect and all observe the same connection.
pub(crate) struct Connector {
    config: ConnectionConfig,
    slot: Mutex<Option<Arc<Connection>>>,
}

impl Connector {
    fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            slot: Mutex::new(None),
        }
    }

    pub(crate) async fn get(&self) -> Result<Arc<Connection>, ClientError> {
        let mut slot = self.slot.lock().await;
        if let Some(conn) = slot.as_ref() {
            if conn.is_connected() {
                return Ok(conn.clone());
            }
            // evict the dead connection before redialing
            *slot = None;
        }

        let conn = Arc::new(Connection::new(self.config.clone()));
        conn.connect().await?;
        tokio::spawn(conn.clone().run());
        *slot = Some(conn.clone());
        Ok(conn)
    }
}

/// Client facade over one feed service endpoint.
///
/// The connection is dialed on first use and shared by every bucket and feed
/// opened through this manager.
pub struct FeedManager {
    connector: Arc<Connector>,
    buckets: Mutex<HashMap<String, Arc<Bucket>>>,
}

impl FeedManager {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            connector: Arc::new(Connector::new(config)),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the shared connection, dialing it if necessary.
    pub async fn connection(&self) -> Result<Arc<Connection>, ClientError> {
        self.connector.get().await
    }

    /// Returns the registry for a named bucket, creating it on first use.
    ///
    /// Registries are cached by name: every watch on the same bucket shares
    /// one logical stream.
    pub async fn bucket(&self, name: &str) -> Arc<Bucket> {
        let mut buckets = self.buckets.lock().await;
        buckets
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(Bucket::new(self.connector.clone(), name)))
            .clone()
    }

    /// Opens a durable feed by name on its own logical stream.
    pub async fn open_feed(&self, name: &str) -> Result<Feed, ClientError> {
        let conn = self.connector.get().await?;
        let channel = conn.create_stream().await?;
        channel.select_feed(name).await?;
        Ok(Feed::new(channel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_concurrent_connects_share_one_dial() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();
        tokio::spawn(async move {
            let mut sockets = Vec::new();
            loop {
                let (socket, _) = listener.accept().await.unwrap();
                counter.fetch_add(1, Ordering::SeqCst);
                sockets.push(socket);
            }
        });

        let manager = FeedManager::new(ConnectionConfig::new(addr));
        let (a, b) = tokio::join!(manager.connection(), manager.connection());
        let a = a.unwrap();
        let b = b.unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dead_connection_is_redialed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let (drop_first, dropped) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            let (first_socket, _) = listener.accept().await.unwrap();
            let _ = dropped.await;
            drop(first_socket);
            let (_second_socket, _) = listener.accept().await.unwrap();
            std::future::pending::<()>().await
        });

        let manager = FeedManager::new(ConnectionConfig::new(addr));
        let first = manager.connection().await.unwrap();

        drop_first.send(()).unwrap();
        // wait for the read loop to notice the peer is gone
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!first.is_connected());

        let second = manager.connection().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(second.is_connected());
    }

    #[tokio::test]
    async fn test_bucket_registry_is_cached_by_name() {
        let (listener, addr) = testutil::listen().await;
        drop(listener);

        let manager = FeedManager::new(ConnectionConfig::new(addr));
        let a = manager.bucket("users").await;
        let b = manager.bucket("users").await;
        let c = manager.bucket("orders").await;

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
