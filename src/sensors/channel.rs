//! Broadcast channel that replays the latest value to new subscribers

use futures::stream::{self, BoxStream, StreamExt};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;

/// Buffered values per subscriber before it starts lagging
pub const DEFAULT_CAPACITY: usize = 64;

struct Inner<T> {
    latest: Option<T>,
    sender: broadcast::Sender<T>,
}

pub struct ReplayChannel<T> {
    inner: Mutex<Inner<T>>,
}

impl<T: Clone + Send + 'static> Default for ReplayChannel<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl<T: Clone + Send + 'static> ReplayChannel<T> {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Mutex::new(Inner { latest: None, sender }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store `value` as latest and deliver it to every live subscriber.
    /// Returns the number of subscribers reached.
    pub fn publish(&self, value: T) -> usize {
        let mut inner = self.lock();
        inner.latest = Some(value.clone());
        // Err only means nobody is listening right now
        inner.sender.send(value).unwrap_or(0)
    }

    /// Join the channel: the latest value (if any) first, then live values.
    /// Publishing and subscribing share one lock, so nothing falls between
    /// the replayed value and the live feed.
    pub fn subscribe(&self) -> Subscription<T> {
        let inner = self.lock();
        Subscription {
            replay: inner.latest.clone(),
            receiver: inner.sender.subscribe(),
        }
    }

    pub fn latest(&self) -> Option<T> {
        self.lock().latest.clone()
    }

    #[cfg(test)]
    pub fn subscriber_count(&self) -> usize {
        self.lock().sender.receiver_count()
    }
}

pub struct Subscription<T> {
    replay: Option<T>,
    receiver: broadcast::Receiver<T>,
}

impl<T: Clone + Send + 'static> Subscription<T> {
    /// Next value, or `None` once the channel is gone
    pub async fn recv(&mut self) -> Option<T> {
        if let Some(value) = self.replay.take() {
            return Some(value);
        }

        loop {
            match self.receiver.recv().await {
                Ok(value) => return Some(value),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Subscriber lagged, skipped {} values", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> BoxStream<'static, T> {
        stream::unfold(self, |mut sub| async move {
            let value = sub.recv().await?;
            Some((value, sub))
        })
        .boxed()
    }
}
