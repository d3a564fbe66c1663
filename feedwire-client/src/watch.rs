//! Subscription registry: declarative watches over a bucket.
//!
//! All watches on one bucket share one logical stream. Each watch occupies a
//! slot whose index doubles as its wire filter id; pushed events arrive once
//! per physical mutation, tagged with every matching filter id, and a local
//! fan-out task copies them to the tagged watches.

use std::sync::Arc;

use bytes::Bytes;
use feedwire_protocol::compile;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};

use crate::channel::Channel;
use crate::error::ClientError;
use crate::event::{FeedEvent, PushEvent};
use crate::manager::Connector;

#[derive(Clone)]
struct SharedStream {
    channel: Arc<Channel>,
    partitions: u16,
}

struct WatchSlot {
    tx: mpsc::UnboundedSender<FeedEvent>,
}

/// The watch registry for one named bucket.
pub struct Bucket {
    name: String,
    connector: Arc<Connector>,
    // single-flight: the lock is held across the whole stream setup
    shared: Mutex<Option<SharedStream>>,
    // slot index == wire filter id; cancelled watches leave a None behind
    // so later pushes tagged with their id are recognizably stale
    slots: Arc<Mutex<Vec<Option<WatchSlot>>>>,
}

impl Bucket {
    pub(crate) fn new(connector: Arc<Connector>, name: &str) -> Self {
        Self {
            name: name.to_owned(),
            connector,
            shared: Mutex::new(None),
            slots: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the bucket's shared stream, setting it up on first use.
    async fn shared(&self) -> Result<SharedStream, ClientError> {
        let mut guard = self.shared.lock().await;
        if let Some(shared) = guard.as_ref() {
            return Ok(shared.clone());
        }

        let conn = self.connector.get().await?;
        let channel = Arc::new(conn.create_stream().await?);
        channel.select_bucket(&self.name).await?;
        let partitions = channel.partition_count().await?;

        let events = channel
            .take_events()
            .await
            .ok_or(ClientError::NotConnected)?;
        tokio::spawn(fan_out(self.name.clone(), events, self.slots.clone()));

        let shared = SharedStream {
            channel,
            partitions,
        };
        *guard = Some(shared.clone());
        tracing::debug!(bucket = %self.name, partitions, "watch stream established");
        Ok(shared)
    }

    /// Registers a watch for the given declarative query.
    ///
    /// An empty query registers an empty filter and watches everything. The
    /// first watch on a bucket also starts push delivery for every
    /// partition.
    pub async fn watch(self: &Arc<Self>, query: &Value) -> Result<Watch, ClientError> {
        let filter = compile(query)?;
        let filter_bytes = filter
            .map(|expr| Bytes::from(expr.to_wire()))
            .unwrap_or_default();

        let shared = self.shared().await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (filter_id, first) = {
            let mut slots = self.slots.lock().await;
            // "first" means no live watch, not an empty slot vector: if an
            // earlier registration failed and left only nulled slots, push
            // delivery still has to be started
            let first = slots.iter().all(Option::is_none);
            let filter_id = slots.len() as u16;
            slots.push(Some(WatchSlot { tx }));
            (filter_id, first)
        };

        if let Err(err) = shared.channel.add_filter(filter_id, filter_bytes).await {
            self.clear_slot(filter_id).await;
            return Err(err);
        }

        if first {
            for partition in 0..shared.partitions {
                if let Err(err) = shared.channel.start(partition).await {
                    tracing::warn!(
                        bucket = %self.name,
                        partition,
                        %err,
                        "failed to start push delivery"
                    );
                }
            }
        }

        Ok(Watch {
            bucket: self.clone(),
            filter_id,
            rx,
        })
    }

    async fn clear_slot(&self, filter_id: u16) {
        if let Some(slot) = self.slots.lock().await.get_mut(filter_id as usize) {
            *slot = None;
        }
    }

    /// Replaces the filter behind an existing watch.
    pub(crate) async fn update_watch(
        &self,
        filter_id: u16,
        query: &Value,
    ) -> Result<(), ClientError> {
        let filter = compile(query)?;
        let filter_bytes = filter
            .map(|expr| Bytes::from(expr.to_wire()))
            .unwrap_or_default();
        let shared = self.shared().await?;
        shared.channel.add_filter(filter_id, filter_bytes).await
    }

    /// Removes a watch: nulls its slot immediately, then tells the peer.
    ///
    /// The slot is cleared before the wire round trip so pushes that race
    /// the removal are dropped rather than delivered to a dead watch.
    pub(crate) async fn remove_watch(&self, filter_id: u16) -> Result<(), ClientError> {
        self.clear_slot(filter_id).await;
        let shared = self.shared().await?;
        shared.channel.remove_filter(filter_id).await
    }
}

/// Copies each pushed event to every tagged, still-active watch.
async fn fan_out(
    bucket: String,
    mut events: mpsc::UnboundedReceiver<PushEvent>,
    slots: Arc<Mutex<Vec<Option<WatchSlot>>>>,
) {
    while let Some(push) = events.recv().await {
        let slots = slots.lock().await;
        for &filter_id in &push.filters {
            match slots.get(filter_id as usize).and_then(Option::as_ref) {
                Some(slot) => {
                    let _ = slot.tx.send(push.event.clone());
                }
                None => {
                    tracing::debug!(
                        bucket = %bucket,
                        filter_id,
                        "push for inactive filter, dropping"
                    );
                }
            }
        }
    }
    tracing::debug!(bucket = %bucket, "watch stream fan-out ended");
}

/// One registered watch. Events matching its filter arrive on `next`.
pub struct Watch {
    bucket: Arc<Bucket>,
    filter_id: u16,
    rx: mpsc::UnboundedReceiver<FeedEvent>,
}

impl Watch {
    pub fn filter_id(&self) -> u16 {
        self.filter_id
    }

    /// Awaits the next matching event. Returns `None` once the watch is
    /// disconnected from its stream.
    pub async fn next(&mut self) -> Option<FeedEvent> {
        self.rx.recv().await
    }

    /// Replaces this watch's filter with a new query.
    pub async fn update(&self, query: &Value) -> Result<(), ClientError> {
        self.bucket.update_watch(self.filter_id, query).await
    }

    /// Cancels the watch. Delivery stops immediately; the remote filter
    /// removal is best-effort.
    pub async fn cancel(self) -> Result<(), ClientError> {
        self.bucket.remove_watch(self.filter_id).await
    }
}
