use super::CallState;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Buffered states per subscriber; one call cycle publishes far fewer.
pub const SUBSCRIBER_BUFFER: usize = 16;

struct NotifierInner {
    next_id: u64,
    current: CallState,
    subscribers: HashMap<u64, mpsc::Sender<CallState>>,
}

/// Fan-out of call state changes to short-lived subscribers.
///
/// Publishing never waits: a subscriber whose buffer is full misses the
/// update, a subscriber that went away is dropped. A full subscriber is
/// closed rather than left without the Idle that ends a call.
#[derive(Clone)]
pub struct StateNotifier {
    inner: Arc<Mutex<NotifierInner>>,
}

/// Receiving end of a subscription, unsubscribes itself when dropped.
pub struct StateSubscription {
    id: u64,
    rx: mpsc::Receiver<CallState>,
    notifier: StateNotifier,
}

impl StateNotifier {
    pub fn new(initial: CallState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(NotifierInner {
                next_id: 0,
                current: initial,
                subscribers: HashMap::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, NotifierInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn subscribe(&self) -> StateSubscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.subscribers.insert(id, tx);
        debug!(id, subscribers = inner.subscribers.len(), "state subscriber added");
        StateSubscription {
            id,
            rx,
            notifier: self.clone(),
        }
    }

    pub fn unsubscribe(&self, subscription: StateSubscription) {
        drop(subscription);
    }

    fn remove(&self, id: u64) {
        let mut inner = self.lock();
        if inner.subscribers.remove(&id).is_some() {
            debug!(id, subscribers = inner.subscribers.len(), "state subscriber removed");
        }
    }

    pub fn publish(&self, state: CallState) {
        let mut inner = self.lock();
        inner.current = state;
        inner.subscribers.retain(|id, tx| match tx.try_send(state) {
            Ok(_) => true,
            // a lagging subscriber must not miss the end of a call: closing
            // its channel tells it to look at the current state instead
            Err(TrySendError::Full(_)) if state == CallState::Idle => {
                warn!(id, %state, "state subscriber is lagging, closing it");
                false
            }
            Err(TrySendError::Full(_)) => {
                debug!(id, %state, "state subscriber is lagging, update dropped");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }

    /// Last published state
    pub fn current(&self) -> CallState {
        self.lock().current
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}

impl StateSubscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn recv(&mut self) -> Option<CallState> {
        self.rx.recv().await
    }

    /// Last state published by the notifier, buffered or not.
    pub fn current(&self) -> CallState {
        self.notifier.current()
    }

    /// A buffered state, if any, without waiting.
    pub fn try_recv(&mut self) -> Option<CallState> {
        self.rx.try_recv().ok()
    }
}

impl Drop for StateSubscription {
    fn drop(&mut self) {
        self.notifier.remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let notifier = StateNotifier::new(CallState::Uninitialized);
        let mut first = notifier.subscribe();
        let mut second = notifier.subscribe();
        assert_ne!(first.id(), second.id());

        notifier.publish(CallState::Idle);
        assert_eq!(first.recv().await, Some(CallState::Idle));
        assert_eq!(second.recv().await, Some(CallState::Idle));
        assert_eq!(notifier.current(), CallState::Idle);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let notifier = StateNotifier::new(CallState::Uninitialized);
        notifier.publish(CallState::WaitingRegistration);
        assert_eq!(notifier.current(), CallState::WaitingRegistration);
        assert_eq!(notifier.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_block() {
        let notifier = StateNotifier::new(CallState::Idle);
        let mut slow = notifier.subscribe();
        for _ in 0..SUBSCRIBER_BUFFER * 3 {
            notifier.publish(CallState::WaitEstablishment);
        }
        notifier.publish(CallState::WaitCompletion);
        assert_eq!(notifier.current(), CallState::WaitCompletion);

        let mut received = 0;
        while let Some(state) = slow.try_recv() {
            assert_eq!(state, CallState::WaitEstablishment);
            received += 1;
        }
        assert_eq!(received, SUBSCRIBER_BUFFER);
        assert_eq!(notifier.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_full_subscriber_closed_on_idle() {
        let notifier = StateNotifier::new(CallState::Idle);
        let mut slow = notifier.subscribe();
        let mut keeping_up = notifier.subscribe();
        for _ in 0..SUBSCRIBER_BUFFER {
            notifier.publish(CallState::WaitCompletion);
            assert_eq!(keeping_up.recv().await, Some(CallState::WaitCompletion));
        }
        notifier.publish(CallState::Idle);
        assert_eq!(notifier.subscriber_count(), 1);
        assert_eq!(keeping_up.recv().await, Some(CallState::Idle));

        // buffered states are still delivered, then the channel ends
        let mut received = 0;
        while let Some(state) = slow.recv().await {
            assert_eq!(state, CallState::WaitCompletion);
            received += 1;
        }
        assert_eq!(received, SUBSCRIBER_BUFFER);
        assert_eq!(slow.current(), CallState::Idle);
    }

    #[tokio::test]
    async fn test_unsubscribe_on_drop() {
        let notifier = StateNotifier::new(CallState::Idle);
        let first = notifier.subscribe();
        let second = notifier.subscribe();
        assert_eq!(notifier.subscriber_count(), 2);
        notifier.unsubscribe(first);
        assert_eq!(notifier.subscriber_count(), 1);
        drop(second);
        assert_eq!(notifier.subscriber_count(), 0);
        notifier.publish(CallState::WaitCompletion);
    }
}
