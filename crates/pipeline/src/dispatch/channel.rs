use super::{Dispatcher, QueueMessage};
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// In-process queue: messages go to whoever holds the receiving end.
///
/// The channel is bounded, so a slow consumer pushes back on senders until
/// the dispatch timeout gives up on them.
#[derive(Clone)]
pub struct ChannelDispatcher {
    tx: mpsc::Sender<QueueMessage>,
}

impl ChannelDispatcher {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<QueueMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Dispatcher for ChannelDispatcher {
    fn name(&self) -> &str {
        "channel"
    }

    async fn send(&self, message: QueueMessage) -> Result<()> {
        if self.tx.send(message).await.is_err() {
            exn::bail!(ErrorKind::Dispatch("receiver dropped".to_string()));
        }
        Ok(())
    }
}
