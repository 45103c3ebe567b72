//! Consensus change notifications.
//!
//! The writer publishes one `ConsensusChange` per committed block or reorg,
//! in commit order, after the state is durable. Delivery runs on a dedicated
//! dispatch thread behind a bounded channel; a slow subscriber applies
//! backpressure to the writer rather than dropping changes.

use crate::diffs::DiffSummary;
use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use silo_types::BlockId;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::debug;

/// Capacity of the writer → dispatcher channel.
const CHANGE_QUEUE_DEPTH: usize = 32;

/// One committed change to the canonical chain.
#[derive(Debug, Clone)]
pub struct ConsensusChange {
    /// Blocks removed from the path, newest first.
    pub reverted_blocks: Vec<BlockId>,
    /// Blocks added to the path, oldest first.
    pub applied_blocks: Vec<BlockId>,
    /// Per-category diff record counts across the change.
    pub diff_summary: DiffSummary,
}

/// Downstream consumer of consensus changes (wallet, renter, host).
pub trait ConsensusSubscriber: Send + Sync {
    /// Called exactly once per committed change, in commit order.
    ///
    /// Must not call back into the consensus set: the writer may be blocked
    /// on the change queue while holding the consensus lock.
    fn process_consensus_change(&self, change: &ConsensusChange);
}

/// Fan-out from the consensus writer to subscribers.
pub(crate) struct SubscriberHub {
    sender: Option<Sender<ConsensusChange>>,
    subscribers: Arc<Mutex<Vec<Arc<dyn ConsensusSubscriber>>>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl SubscriberHub {
    pub(crate) fn new() -> Self {
        let (sender, receiver) = bounded::<ConsensusChange>(CHANGE_QUEUE_DEPTH);
        let subscribers: Arc<Mutex<Vec<Arc<dyn ConsensusSubscriber>>>> =
            Arc::new(Mutex::new(Vec::new()));

        let dispatch_subscribers = Arc::clone(&subscribers);
        let dispatcher = std::thread::Builder::new()
            .name("consensus-fanout".into())
            .spawn(move || {
                for change in receiver {
                    let subscribers = dispatch_subscribers.lock().clone();
                    for subscriber in subscribers {
                        subscriber.process_consensus_change(&change);
                    }
                }
            })
            .expect("failed to spawn subscriber dispatch thread");

        Self {
            sender: Some(sender),
            subscribers,
            dispatcher: Some(dispatcher),
        }
    }

    /// Register a subscriber for all future changes.
    pub(crate) fn subscribe(&self, subscriber: Arc<dyn ConsensusSubscriber>) {
        self.subscribers.lock().push(subscriber);
    }

    /// Publish a committed change. Blocks when the queue is full.
    pub(crate) fn publish(&self, change: ConsensusChange) {
        debug!(
            applied = change.applied_blocks.len(),
            reverted = change.reverted_blocks.len(),
            "publishing consensus change"
        );
        if let Some(sender) = &self.sender {
            // The dispatcher only stops when the hub is dropped.
            let _ = sender.send(change);
        }
    }
}

impl Drop for SubscriberHub {
    fn drop(&mut self) {
        // Close the channel so the dispatcher drains and exits.
        self.sender.take();
        if let Some(handle) = self.dispatcher.take() {
            let _ = handle.join();
        }
    }
}
