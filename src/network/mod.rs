// Block gossip and transaction feeds

mod feed;

pub use feed::{BlockGossip, Feed, Subscription, TransactionListener, DEFAULT_FEED_CAPACITY};
