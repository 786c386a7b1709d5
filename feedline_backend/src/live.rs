//! Process-local registry of live feed channels.
//!
//! Each viewer may hold any number of open channels. Publishing clones the
//! item onto every channel the recipient owns. Channels are bounded: when a
//! subscriber falls behind and its queue is full, the newest item is dropped
//! for that subscriber only and a warning is logged. The durable timeline row
//! is unaffected, so a lagging client can recover through the paged read.

use crate::config::LiveConfig;
use futures_util::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

pub type ChannelId = u64;

type ViewerChannels<T> = HashMap<ChannelId, mpsc::Sender<T>>;

pub struct LiveRegistry<T> {
    inner: Arc<RegistryInner<T>>,
}

struct RegistryInner<T> {
    channels: RwLock<HashMap<i64, ViewerChannels<T>>>,
    next_channel: AtomicU64,
    capacity: usize,
    closing: CancellationToken,
}

impl<T> Clone for LiveRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> LiveRegistry<T> {
    pub fn new(config: LiveConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                channels: RwLock::new(HashMap::new()),
                next_channel: AtomicU64::new(1),
                capacity: config.channel_capacity.max(1),
                closing: CancellationToken::new(),
            }),
        }
    }

    /// Opens a channel for `viewer`. Dropping the returned feed deregisters it.
    /// Once the registry is closed the returned feed ends immediately.
    pub fn register(&self, viewer: i64) -> LiveFeed<T> {
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        let channel = self.inner.next_channel.fetch_add(1, Ordering::Relaxed);
        {
            let mut channels = self
                .inner
                .channels
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if self.inner.closing.is_cancelled() {
                tracing::debug!(viewer, channel, "live registry closed, refusing channel");
            } else {
                channels.entry(viewer).or_default().insert(channel, tx);
                tracing::debug!(viewer, channel, "live channel registered");
            }
        }
        LiveFeed {
            viewer,
            channel,
            rx,
            registry: self.clone(),
        }
    }

    pub fn deregister(&self, viewer: i64, channel: ChannelId) {
        let mut channels = self
            .inner
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(owned) = channels.get_mut(&viewer) {
            if owned.remove(&channel).is_some() {
                tracing::debug!(viewer, channel, "live channel deregistered");
            }
            if owned.is_empty() {
                channels.remove(&viewer);
            }
        }
    }

    /// Enqueues a copy of `item` on every channel owned by `recipient` and
    /// returns how many channels accepted it.
    pub fn publish(&self, recipient: i64, item: &T) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();
        {
            let channels = self
                .inner
                .channels
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            let Some(owned) = channels.get(&recipient) else {
                return 0;
            };
            for (channel, tx) in owned {
                match tx.try_send(item.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        tracing::warn!(
                            viewer = recipient,
                            channel,
                            "live channel full, dropping item"
                        );
                    }
                    Err(TrySendError::Closed(_)) => closed.push(*channel),
                }
            }
        }
        for channel in closed {
            self.deregister(recipient, channel);
        }
        delivered
    }

    /// Ends every open feed and refuses new ones. Called when the process
    /// starts shutting down so streaming connections can finish.
    pub fn close(&self) {
        let mut channels = self
            .inner
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        self.inner.closing.cancel();
        let open: usize = channels.values().map(HashMap::len).sum();
        channels.clear();
        tracing::info!(open, "live registry closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closing.is_cancelled()
    }

    /// Resolves once `close` has been called.
    pub fn closed(&self) -> WaitForCancellationFutureOwned {
        self.inner.closing.clone().cancelled_owned()
    }

    pub fn channel_count(&self, viewer: i64) -> usize {
        self.inner
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&viewer)
            .map_or(0, HashMap::len)
    }
}

/// Order-preserving stream of items published to one live channel.
pub struct LiveFeed<T: Clone + Send + 'static> {
    viewer: i64,
    channel: ChannelId,
    rx: mpsc::Receiver<T>,
    registry: LiveRegistry<T>,
}

impl<T: Clone + Send + 'static> LiveFeed<T> {
    pub fn viewer(&self) -> i64 {
        self.viewer
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}

impl<T: Clone + Send + 'static> Stream for LiveFeed<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_recv(cx)
    }
}

impl<T: Clone + Send + 'static> Drop for LiveFeed<T> {
    fn drop(&mut self) {
        self.registry.deregister(self.viewer, self.channel);
    }
}
