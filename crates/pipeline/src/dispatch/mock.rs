use super::{Dispatcher, QueueMessage};
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Dispatcher that keeps every accepted message for inspection.
///
/// Rejection can be switched on globally or per document; `attempts` counts
/// every call, accepted or not.
#[derive(Default)]
pub struct MockDispatcher {
    sent: Mutex<Vec<QueueMessage>>,
    reject_all: AtomicBool,
    reject: Mutex<HashSet<u64>>,
    delay: Mutex<Option<Duration>>,
    attempts: AtomicUsize,
}

impl MockDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject_all(&self, reject: bool) {
        self.reject_all.store(reject, Ordering::SeqCst);
    }

    pub fn reject(&self, infoleg_id: u64) {
        if let Ok(mut reject) = self.reject.lock() {
            reject.insert(infoleg_id);
        }
    }

    pub fn delay(&self, delay: Duration) {
        if let Ok(mut slot) = self.delay.lock() {
            *slot = Some(delay);
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Accepted messages, in acceptance order.
    pub fn sent(&self) -> Vec<QueueMessage> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Dispatcher for MockDispatcher {
    fn name(&self) -> &str {
        "mock"
    }

    async fn send(&self, message: QueueMessage) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay.lock().ok().and_then(|slot| *slot);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let rejected = self.reject_all.load(Ordering::SeqCst)
            || self.reject.lock().is_ok_and(|reject| reject.contains(&message.infoleg_id));
        if rejected {
            exn::bail!(ErrorKind::Dispatch(format!("queue rejected {}", message.infoleg_id)));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(message);
        }
        Ok(())
    }
}
