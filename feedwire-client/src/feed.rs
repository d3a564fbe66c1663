//! Durable feed consumption.
//!
//! A feed hands out items one at a time; each item stays leased to the
//! consumer until it is acknowledged, cancelled, or its lease lapses.

use std::sync::Arc;

use crate::channel::Channel;
use crate::error::ClientError;
use crate::event::FeedEvent;

/// A named durable feed, bound to its own logical stream.
pub struct Feed {
    channel: Arc<Channel>,
}

impl Feed {
    pub(crate) fn new(channel: Channel) -> Self {
        Self {
            channel: Arc::new(channel),
        }
    }

    /// Dequeues the next unacknowledged item.
    pub async fn pop_item(&self) -> Result<FeedItem, ClientError> {
        let event = self.channel.pop().await?;
        Ok(FeedItem {
            channel: self.channel.clone(),
            event,
        })
    }

    /// Closes the feed's stream.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.channel.close().await
    }
}

/// One leased feed item.
///
/// The item commands (`ack`, `refresh`, `cancel`) are positional: they apply
/// to whichever item the stream currently holds, which is why a feed should
/// process one item at a time.
pub struct FeedItem {
    channel: Arc<Channel>,
    pub event: FeedEvent,
}

impl FeedItem {
    /// Acknowledges the item at the given durability level.
    pub async fn ack(&self, durability: i32) -> Result<(), ClientError> {
        self.channel.ack(durability).await
    }

    /// Extends the item's processing lease.
    pub async fn refresh(&self, period_ms: u32) -> Result<(), ClientError> {
        self.channel.refresh(period_ms).await
    }

    /// Returns the item to the feed without acknowledging it.
    pub async fn cancel(&self) -> Result<(), ClientError> {
        self.channel.cancel().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionConfig;
    use crate::manager::FeedManager;
    use crate::testutil;
    use bytes::Bytes;
    use feedwire_protocol::Message;

    #[tokio::test]
    async fn test_durable_feed_round_trip() {
        let (listener, addr) = testutil::listen().await;
        let peer_task = tokio::spawn(async move {
            let mut peer = testutil::accept(&listener).await;
            let _ = peer.read_message().await; // open

            let (stream_id, select) = peer.read_message().await;
            assert_eq!(
                select,
                Message::SelectFeed {
                    feed_name: "orders".into()
                }
            );
            peer.send(stream_id, &Message::Success).await;

            let (_, pop) = peer.read_message().await;
            assert_eq!(pop, Message::FeedPop { flags: 0 });
            peer.send(
                stream_id,
                &Message::FeedMutSet {
                    seq_no: 7,
                    cas: 11,
                    rev_no: 2,
                    expiry: 0,
                    lock_time: 0,
                    partition: 5,
                    datatype: 1,
                    key: Bytes::from_static(b"order-7"),
                    value: Bytes::from_static(b"{\"total\":10}"),
                },
            )
            .await;

            let (_, refresh) = peer.read_message().await;
            assert_eq!(refresh, Message::FeedRefresh { period_ms: 5000 });
            peer.send(stream_id, &Message::Success).await;

            let (_, ack) = peer.read_message().await;
            assert_eq!(ack, Message::FeedAck { durability: 1 });
            peer.send(stream_id, &Message::Success).await;
            peer
        });

        let manager = FeedManager::new(ConnectionConfig::new(addr));
        let feed = manager.open_feed("orders").await.unwrap();

        let item = feed.pop_item().await.unwrap();
        assert_eq!(item.event.seq_no(), 7);
        assert_eq!(item.event.key().unwrap().as_ref(), b"order-7");

        item.refresh(5000).await.unwrap();
        item.ack(1).await.unwrap();
        let _peer = peer_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_rollback_item_and_cancel() {
        let (listener, addr) = testutil::listen().await;
        let peer_task = tokio::spawn(async move {
            let mut peer = testutil::accept(&listener).await;
            let _ = peer.read_message().await; // open
            let (stream_id, _) = peer.read_message().await; // select feed
            peer.send(stream_id, &Message::Success).await;

            let _ = peer.read_message().await; // pop
            peer.send(stream_id, &Message::FeedMutRollback { seq_no: 99 })
                .await;

            let (_, cancel) = peer.read_message().await;
            assert_eq!(cancel, Message::FeedCancel);
            peer.send(stream_id, &Message::Success).await;
            peer
        });

        let manager = FeedManager::new(ConnectionConfig::new(addr));
        let feed = manager.open_feed("orders").await.unwrap();

        let item = feed.pop_item().await.unwrap();
        assert_eq!(item.event, FeedEvent::Rollback { seq_no: 99 });
        item.cancel().await.unwrap();
        let _peer = peer_task.await.unwrap();
    }
}
