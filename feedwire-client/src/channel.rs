//! Logical streams and their request/reply state machine.
//!
//! Replies on a stream carry no request identifier: the protocol guarantees
//! replies arrive in request order, so each stream keeps a FIFO queue of
//! pending requests and the oldest entry claims the next reply. Pushed events
//! bypass the queue entirely.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use feedwire_protocol::Message;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::connection::Connection;
use crate::error::ClientError;
use crate::event::{FeedEvent, PushEvent};

/// What kind of reply a pending request accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestKind {
    /// Expects a plain success.
    Status,
    /// Expects a partition count.
    PartitionCount,
    /// Expects a durable-feed item.
    FeedItem,
}

impl RequestKind {
    fn name(self) -> &'static str {
        match self {
            RequestKind::Status => "status",
            RequestKind::PartitionCount => "partition-count",
            RequestKind::FeedItem => "feed-item",
        }
    }

    fn accepts(self, message: &Message) -> bool {
        match self {
            RequestKind::Status => matches!(message, Message::Success),
            RequestKind::PartitionCount => matches!(message, Message::PartitionCount { .. }),
            RequestKind::FeedItem => matches!(
                message,
                Message::FeedMutSet { .. }
                    | Message::FeedMutExpire { .. }
                    | Message::FeedMutDelete { .. }
                    | Message::FeedMutRollback { .. }
            ),
        }
    }
}

struct Pending {
    kind: RequestKind,
    tx: oneshot::Sender<Result<Message, ClientError>>,
}

/// Per-stream state shared between the channel handle and the read loop.
pub(crate) struct StreamState {
    id: u16,
    pending: Mutex<VecDeque<Pending>>,
    push_tx: Mutex<Option<mpsc::UnboundedSender<PushEvent>>>,
}

impl StreamState {
    pub(crate) fn new(id: u16) -> (Self, mpsc::UnboundedReceiver<PushEvent>) {
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let state = Self {
            id,
            pending: Mutex::new(VecDeque::new()),
            push_tx: Mutex::new(Some(push_tx)),
        };
        (state, push_rx)
    }

    /// Routes a pushed message. Never touches the pending queue.
    pub(crate) async fn handle_push(&self, message: Message) {
        match message {
            Message::PushFilterAdded { filter_id } => {
                tracing::debug!(stream_id = self.id, filter_id, "filter active");
            }
            Message::PushFilterRemoved { filter_id } => {
                tracing::debug!(stream_id = self.id, filter_id, "filter removed");
            }
            other => match PushEvent::from_message(other) {
                Some(event) => {
                    if let Some(tx) = self.push_tx.lock().await.as_ref() {
                        // a send error just means the consumer went away
                        let _ = tx.send(event);
                    }
                }
                None => {
                    tracing::warn!(stream_id = self.id, "unroutable push message, dropping");
                }
            },
        }
    }

    /// Routes a reply to the oldest pending request.
    ///
    /// A remote error resolves that request alone; a reply whose kind does
    /// not match is fatal because the queue alignment can no longer be
    /// trusted.
    pub(crate) async fn handle_reply(&self, message: Message) -> Result<(), ClientError> {
        let pending = self.pending.lock().await.pop_front();
        let Some(pending) = pending else {
            tracing::warn!(
                stream_id = self.id,
                command = message.command().raw(),
                "reply with no pending request, dropping"
            );
            return Ok(());
        };

        if let Message::Error { code, message } = message {
            let _ = pending.tx.send(Err(ClientError::Remote { code, message }));
            return Ok(());
        }

        if !pending.kind.accepts(&message) {
            let command = message.command().raw();
            let _ = pending.tx.send(Err(ClientError::UnexpectedReply {
                request: pending.kind.name(),
                command,
            }));
            return Err(ClientError::UnexpectedReply {
                request: pending.kind.name(),
                command,
            });
        }

        let _ = pending.tx.send(Ok(message));
        Ok(())
    }

    /// Fails every pending request and closes the push channel.
    pub(crate) async fn fail_pending(&self) {
        let mut pending = self.pending.lock().await;
        while let Some(entry) = pending.pop_front() {
            let _ = entry.tx.send(Err(ClientError::ConnectionClosed));
        }
        drop(pending);
        // dropping the sender ends any fan-out loop reading this stream
        self.push_tx.lock().await.take();
    }
}

/// A logical stream multiplexed over a shared connection.
pub struct Channel {
    conn: Arc<Connection>,
    state: Arc<StreamState>,
    events: Mutex<Option<mpsc::UnboundedReceiver<PushEvent>>>,
}

impl Channel {
    pub(crate) fn new(
        conn: Arc<Connection>,
        state: Arc<StreamState>,
        events: mpsc::UnboundedReceiver<PushEvent>,
    ) -> Self {
        Self {
            conn,
            state,
            events: Mutex::new(Some(events)),
        }
    }

    pub fn id(&self) -> u16 {
        self.state.id
    }

    /// Hands out this channel's push-event receiver. Returns `None` once
    /// taken, or after the connection tore the stream down.
    pub async fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PushEvent>> {
        self.events.lock().await.take()
    }

    /// Sends a request and awaits its reply.
    ///
    /// The pending entry is enqueued under the same lock that covers the
    /// socket write, so a fast reply can never beat its handler into the
    /// queue. A timed-out entry stays queued on purpose: its late reply must
    /// still be consumed in order, and lands in a closed oneshot.
    async fn request(&self, kind: RequestKind, message: Message) -> Result<Message, ClientError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.state.pending.lock().await;
            pending.push_back(Pending { kind, tx });
            if let Err(err) = self.conn.write_message(self.state.id, &message).await {
                pending.pop_back();
                return Err(err);
            }
        }

        match tokio::time::timeout(self.conn.request_timeout(), rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(ClientError::ConnectionClosed),
            Err(_) => Err(ClientError::Timeout),
        }
    }

    async fn expect_success(&self, message: Message) -> Result<(), ClientError> {
        self.request(RequestKind::Status, message).await.map(|_| ())
    }

    /// Binds this stream to a named durable feed.
    pub async fn select_feed(&self, name: &str) -> Result<(), ClientError> {
        self.expect_success(Message::SelectFeed {
            feed_name: name.to_owned(),
        })
        .await
    }

    /// Binds this stream to a named bucket.
    pub async fn select_bucket(&self, name: &str) -> Result<(), ClientError> {
        self.expect_success(Message::BucketSelect {
            bucket_name: name.to_owned(),
        })
        .await
    }

    /// Asks the selected bucket for its partition count.
    pub async fn partition_count(&self) -> Result<u16, ClientError> {
        match self
            .request(RequestKind::PartitionCount, Message::GetPartitionCount)
            .await?
        {
            Message::PartitionCount { count } => Ok(count),
            other => Err(ClientError::UnexpectedReply {
                request: RequestKind::PartitionCount.name(),
                command: other.command().raw(),
            }),
        }
    }

    /// Registers (or replaces) a filter under `filter_id`. Empty bytes mean
    /// match-all.
    pub async fn add_filter(&self, filter_id: u16, filter: Bytes) -> Result<(), ClientError> {
        self.expect_success(Message::StreamAddFilter { filter_id, filter })
            .await
    }

    /// Unregisters a filter.
    pub async fn remove_filter(&self, filter_id: u16) -> Result<(), ClientError> {
        self.expect_success(Message::StreamRemoveFilter { filter_id })
            .await
    }

    /// Begins push delivery, either for one partition or (with `None`) for
    /// the whole stream.
    pub async fn start(&self, partition: impl Into<Option<u16>>) -> Result<(), ClientError> {
        self.expect_success(Message::StreamStart {
            partition: partition.into(),
        })
        .await
    }

    /// Ends push delivery; same scoping as [`Channel::start`].
    pub async fn stop(&self, partition: impl Into<Option<u16>>) -> Result<(), ClientError> {
        self.expect_success(Message::StreamStop {
            partition: partition.into(),
        })
        .await
    }

    /// Dequeues the next unacknowledged item from the selected feed.
    pub async fn pop(&self) -> Result<FeedEvent, ClientError> {
        let reply = self
            .request(RequestKind::FeedItem, Message::FeedPop { flags: 0 })
            .await?;
        let command = reply.command().raw();
        FeedEvent::from_feed_reply(reply).ok_or(ClientError::UnexpectedReply {
            request: RequestKind::FeedItem.name(),
            command,
        })
    }

    /// Acknowledges the current feed item at the given durability level.
    pub async fn ack(&self, durability: i32) -> Result<(), ClientError> {
        self.expect_success(Message::FeedAck { durability }).await
    }

    /// Extends the processing lease on the current feed item.
    pub async fn refresh(&self, period_ms: u32) -> Result<(), ClientError> {
        self.expect_success(Message::FeedRefresh { period_ms }).await
    }

    /// Cancels the current feed item, returning it to the feed.
    pub async fn cancel(&self) -> Result<(), ClientError> {
        self.expect_success(Message::FeedCancel).await
    }

    /// Closes the logical stream.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.conn.close_stream(self.state.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionConfig;
    use crate::testutil;
    use std::time::Duration;
    use tokio_test::assert_ok;

    fn push_set(seq_no: u64, filters: Vec<u16>) -> Message {
        Message::PushMutSet {
            seq_no,
            cas: 100,
            rev_no: 1,
            expiry: 0,
            lock_time: 0,
            partition: 0,
            datatype: 1,
            key: Bytes::from_static(b"doc-1"),
            value: Bytes::from_static(b"{\"age\":19}"),
            filters,
        }
    }

    #[tokio::test]
    async fn test_fifo_correlation_with_interleaved_push() {
        let (listener, addr) = testutil::listen().await;
        let peer_task = tokio::spawn(async move {
            let mut peer = testutil::accept(&listener).await;
            let (_, open) = peer.read_message().await;
            let Message::OpenStream { stream_id } = open else {
                panic!("expected open, got {open:?}");
            };

            let (_, first) = peer.read_message().await;
            assert!(matches!(first, Message::BucketSelect { .. }));
            let (_, second) = peer.read_message().await;
            assert!(matches!(second, Message::GetPartitionCount));

            // a push interleaved between request and replies must not
            // disturb reply correlation
            peer.send(stream_id, &push_set(1, vec![])).await;
            peer.send(stream_id, &Message::Success).await;
            peer.send(stream_id, &Message::PartitionCount { count: 64 })
                .await;
            peer
        });

        let conn = testutil::connect(&addr).await;
        let channel = conn.create_stream().await.unwrap();

        let (select, count) =
            tokio::join!(channel.select_bucket("default"), channel.partition_count());
        assert_ok!(select);
        assert_eq!(count.unwrap(), 64);

        // the interleaved push arrived on the event channel
        let mut events = channel.take_events().await.unwrap();
        let push = events.recv().await.unwrap();
        assert_eq!(push.event.seq_no(), 1);
        let _peer = peer_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_remote_error_resolves_single_request() {
        let (listener, addr) = testutil::listen().await;
        let peer_task = tokio::spawn(async move {
            let mut peer = testutil::accept(&listener).await;
            let _ = peer.read_message().await; // open
            let (stream_id, _) = peer.read_message().await;
            peer.send(
                stream_id,
                &Message::Error {
                    code: 13,
                    message: "no such bucket".into(),
                },
            )
            .await;

            // the connection survives; the next request succeeds
            let (_, next) = peer.read_message().await;
            assert!(matches!(next, Message::GetPartitionCount));
            peer.send(stream_id, &Message::PartitionCount { count: 4 })
                .await;
            peer
        });

        let conn = testutil::connect(&addr).await;
        let channel = conn.create_stream().await.unwrap();

        let result = channel.select_bucket("missing").await;
        assert!(matches!(result, Err(ClientError::Remote { code: 13, .. })));

        assert_eq!(channel.partition_count().await.unwrap(), 4);
        assert!(conn.is_connected());
        let _peer = peer_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout_preserves_reply_alignment() {
        let (listener, addr) = testutil::listen().await;
        let peer_task = tokio::spawn(async move {
            let mut peer = testutil::accept(&listener).await;
            let _ = peer.read_message().await; // open
            let (stream_id, first) = peer.read_message().await;
            assert!(matches!(first, Message::BucketSelect { .. }));

            // reply only after the client's request timeout has fired
            tokio::time::sleep(Duration::from_millis(150)).await;
            peer.send(stream_id, &Message::Success).await;

            let (_, second) = peer.read_message().await;
            assert!(matches!(second, Message::GetPartitionCount));
            peer.send(stream_id, &Message::PartitionCount { count: 16 })
                .await;
            peer
        });

        let config = ConnectionConfig::new(addr.clone())
            .with_request_timeout(Duration::from_millis(100));
        let conn = testutil::connect_with(config).await;
        let channel = conn.create_stream().await.unwrap();

        let result = channel.select_bucket("default").await;
        assert!(matches!(result, Err(ClientError::Timeout)));

        // wait out the late reply so the next request gets a fresh timeout
        // window of its own
        tokio::time::sleep(Duration::from_millis(150)).await;

        // the late reply is consumed by the timed-out entry, keeping the
        // queue aligned for the next request
        assert_eq!(channel.partition_count().await.unwrap(), 16);
        let _peer = peer_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_filtered_push_delivery() {
        let (listener, addr) = testutil::listen().await;
        let peer_task = tokio::spawn(async move {
            let mut peer = testutil::accept(&listener).await;
            let _ = peer.read_message().await; // open
            let (stream_id, add) = peer.read_message().await;
            let Message::StreamAddFilter { filter_id, filter } = add else {
                panic!("expected add filter, got {add:?}");
            };
            assert_eq!(filter_id, 3);
            assert_eq!(filter.as_ref(), b"{}");
            peer.send(stream_id, &Message::Success).await;

            let (_, start) = peer.read_message().await;
            assert_eq!(start, Message::StreamStart { partition: Some(0) });
            peer.send(stream_id, &Message::Success).await;

            peer.send(stream_id, &push_set(42, vec![3])).await;
            peer
        });

        let conn = testutil::connect(&addr).await;
        let channel = conn.create_stream().await.unwrap();

        channel
            .add_filter(3, Bytes::from_static(b"{}"))
            .await
            .unwrap();
        channel.start(0u16).await.unwrap();

        let mut events = channel.take_events().await.unwrap();
        let push = events.recv().await.unwrap();
        assert_eq!(push.filters, vec![3]);
        assert_eq!(push.event.seq_no(), 42);
        assert_eq!(push.event.key().unwrap().as_ref(), b"doc-1");
        let _peer = peer_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_channel_scoped_start_has_no_partition() {
        let (listener, addr) = testutil::listen().await;
        let peer_task = tokio::spawn(async move {
            let mut peer = testutil::accept(&listener).await;
            let _ = peer.read_message().await; // open
            let (stream_id, start) = peer.read_message().await;
            assert_eq!(start, Message::StreamStart { partition: None });
            peer.send(stream_id, &Message::Success).await;

            let (_, stop) = peer.read_message().await;
            assert_eq!(stop, Message::StreamStop { partition: None });
            peer.send(stream_id, &Message::Success).await;
            peer
        });

        let conn = testutil::connect(&addr).await;
        let channel = conn.create_stream().await.unwrap();
        assert_ok!(channel.start(None).await);
        assert_ok!(channel.stop(None).await);
        let _peer = peer_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_deregisters_stream() {
        let (listener, addr) = testutil::listen().await;
        let peer_task = tokio::spawn(async move {
            let mut peer = testutil::accept(&listener).await;
            let (_, open) = peer.read_message().await;
            let Message::OpenStream { stream_id } = open else {
                panic!("expected open, got {open:?}");
            };
            let (control, close) = peer.read_message().await;
            assert_eq!(control, 0);
            assert_eq!(close, Message::CloseStream { stream_id });
            peer
        });

        let conn = testutil::connect(&addr).await;
        let channel = conn.create_stream().await.unwrap();
        channel.close().await.unwrap();
        let _peer = peer_task.await.unwrap();
    }
}
