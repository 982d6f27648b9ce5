//! Replay-of-latest multicast subject.
//!
//! The one stream primitive the store needs: a shared cell holding the most
//! recent value plus a set of subscriber channels. A new subscriber gets the
//! latest value first, then every value published after it subscribed.

use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures::stream::{FusedStream, Stream};

pub(crate) struct Replay<T> {
    inner: Mutex<ReplayInner<T>>,
}

struct ReplayInner<T> {
    latest: Option<T>,
    subscribers: Vec<UnboundedSender<T>>,
    closed: bool,
}

impl<T: Clone> Replay<T> {
    pub(crate) fn new() -> Self {
        Self::from_latest(None)
    }

    pub(crate) fn seeded(value: T) -> Self {
        Self::from_latest(Some(value))
    }

    fn from_latest(latest: Option<T>) -> Self {
        Self {
            inner: Mutex::new(ReplayInner {
                latest,
                subscribers: Vec::new(),
                closed: false,
            }),
        }
    }

    /// Deliver `value` to every live subscriber and make it the replayed value.
    /// Subscribers whose receiving half was dropped are pruned here.
    pub(crate) fn publish(&self, value: T) {
        let mut inner = self.lock();
        if inner.closed {
            return;
        }
        inner
            .subscribers
            .retain(|tx| tx.unbounded_send(value.clone()).is_ok());
        inner.latest = Some(value);
    }

    pub(crate) fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded();
        let mut inner = self.lock();
        if let Some(latest) = &inner.latest {
            // Cannot fail: `rx` is alive.
            let _ = tx.unbounded_send(latest.clone());
        }
        if !inner.closed {
            inner.subscribers.push(tx);
        }
        Subscription { rx }
    }

    pub(crate) fn latest(&self) -> Option<T> {
        self.lock().latest.clone()
    }

    /// Terminate the subject. Existing subscriptions end after draining what
    /// was already delivered; new ones get the latest value and then end.
    pub(crate) fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.subscribers.clear();
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn lock(&self) -> MutexGuard<'_, ReplayInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A live view of an action or state stream.
///
/// Values are queued for the subscription as soon as they are published, so a
/// slow consumer never loses or reorders values. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    /// Values already delivered and not yet consumed, without waiting.
    pub fn drain_ready(&mut self) -> Vec<T> {
        let mut ready = Vec::new();
        while let Ok(Some(value)) = self.rx.try_next() {
            ready.push(value);
        }
        ready
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        Pin::new(&mut self.rx).poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rx.size_hint()
    }
}

impl<T> FusedStream for Subscription<T> {
    fn is_terminated(&self) -> bool {
        self.rx.is_terminated()
    }
}
