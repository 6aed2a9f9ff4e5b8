// In-process broadcast feeds for gossiped blocks and transactions

use crate::core::{Block, Transaction};
use tokio::sync::broadcast;

/// Default per-subscriber buffer
pub const DEFAULT_FEED_CAPACITY: usize = 1024;

/// Fan-out channel: every subscriber sees every published item
#[derive(Debug, Clone)]
pub struct Feed<T: Clone> {
    sender: broadcast::Sender<T>,
}

impl<T: Clone> Feed<T> {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an item. Returns the number of subscribers reached.
    pub fn publish(&self, item: T) -> usize {
        self.sender.send(item).unwrap_or(0)
    }

    pub fn subscribe(&self) -> Subscription<T> {
        Subscription {
            receiver: self.sender.subscribe(),
        }
    }
}

impl<T: Clone> Default for Feed<T> {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}

/// Receiving end of a feed
#[derive(Debug)]
pub struct Subscription<T: Clone> {
    receiver: broadcast::Receiver<T>,
}

impl<T: Clone> Subscription<T> {
    /// Next item, or `None` once every publisher is gone.
    ///
    /// A subscriber that falls behind skips the overwritten items.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            match self.receiver.recv().await {
                Ok(item) => return Some(item),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("Feed subscriber lagged, skipped {} items", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

}

/// Source of newly arriving blocks
pub type BlockGossip = Feed<Block>;

/// Source of newly arriving transactions
pub type TransactionListener = Feed<Transaction>;

impl Feed<Transaction> {
    /// Subscribe to newly arriving transactions
    pub fn register_for_new_transactions(&self) -> Subscription<Transaction> {
        self.subscribe()
    }
}
