//! Transaction relay used as the node's acceptor
//!
//! Received transactions are checked for basic sanity, de-duplicated and
//! queued for relay. The queue is drained by an async task; parsing and
//! broadcasting the transaction itself is left to whatever consumes it.

use nearpay_core::{RelayConfig, Transaction, TransactionAcceptor, TxId};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

/// Ids of queued transactions, bounded with oldest-first eviction
#[derive(Default)]
struct SeenSet {
    ids: HashSet<TxId>,
    order: VecDeque<TxId>,
}

impl SeenSet {
    fn contains(&self, id: &TxId) -> bool {
        self.ids.contains(id)
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    fn insert(&mut self, id: TxId, max: usize) {
        if !self.ids.insert(id) {
            return;
        }
        self.order.push_back(id);

        while self.order.len() > max {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }
}

/// Acceptor that forwards new transactions into the relay queue
pub struct RelayAcceptor {
    config: RelayConfig,
    seen: Mutex<SeenSet>,
    queue: mpsc::Sender<Transaction>,
}

impl RelayAcceptor {
    pub fn new(config: RelayConfig, queue: mpsc::Sender<Transaction>) -> Self {
        Self {
            config,
            seen: Mutex::new(SeenSet::default()),
            queue,
        }
    }

    /// Whether a transaction was already queued
    pub fn has_seen(&self, id: &TxId) -> bool {
        self.seen.lock().contains(id)
    }

    /// Number of distinct transactions currently remembered
    pub fn seen_count(&self) -> usize {
        self.seen.lock().len()
    }
}

impl TransactionAcceptor for RelayAcceptor {
    fn accept(&self, tx: &Transaction) -> bool {
        if tx.is_empty() {
            warn!("Refusing empty transaction");
            return false;
        }

        if tx.len() > self.config.max_tx_size {
            warn!(
                "Refusing transaction of {} bytes (limit {})",
                tx.len(),
                self.config.max_tx_size
            );
            return false;
        }

        let id = tx.id();
        let mut seen = self.seen.lock();

        if seen.contains(&id) {
            debug!("Transaction {} already queued for relay", id);
            return true;
        }

        match self.queue.try_send(tx.clone()) {
            Ok(()) => {
                seen.insert(id, self.config.max_seen.max(1));
                info!("Queued transaction {} for relay", id);
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!("Relay queue full, refusing transaction {}", id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!("Relay stopped, refusing transaction {}", id);
                false
            }
        }
    }
}

/// Create an acceptor and the receiving end of its relay queue
pub fn create_relay(config: RelayConfig) -> (Arc<RelayAcceptor>, mpsc::Receiver<Transaction>) {
    let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
    (Arc::new(RelayAcceptor::new(config, tx)), rx)
}

/// Drain the relay queue until every sender is gone.
///
/// Returns the number of transactions relayed.
pub async fn run_relay(mut queue: mpsc::Receiver<Transaction>) -> usize {
    let mut relayed = 0;

    while let Some(tx) = queue.recv().await {
        relayed += 1;
        info!(
            "Relaying transaction {} ({} bytes)",
            tx.id().to_hex(),
            tx.len()
        );
    }

    debug!("Relay queue closed after {} transactions", relayed);
    relayed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relay(max_tx_size: usize, queue_capacity: usize) -> (Arc<RelayAcceptor>, mpsc::Receiver<Transaction>) {
        create_relay(RelayConfig {
            max_tx_size,
            queue_capacity,
            max_seen: 100,
        })
    }

    #[test]
    fn test_refuses_empty_and_oversized() {
        let (acceptor, _rx) = relay(4, 10);

        assert!(!acceptor.accept(&Transaction::new(Vec::new())));
        assert!(!acceptor.accept(&Transaction::new(vec![1; 5])));
        assert!(acceptor.accept(&Transaction::new(vec![1; 4])));
        assert_eq!(acceptor.seen_count(), 1);
    }

    #[test]
    fn test_duplicates_are_accepted_once_queued() {
        let (acceptor, mut rx) = relay(100, 10);
        let tx = Transaction::new(b"spend".to_vec());

        assert!(acceptor.accept(&tx));
        assert!(acceptor.accept(&tx));

        assert!(acceptor.has_seen(&tx.id()));
        assert_eq!(rx.try_recv().unwrap(), tx);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_full_queue_refuses() {
        let (acceptor, _rx) = relay(100, 1);

        assert!(acceptor.accept(&Transaction::new(vec![1])));
        assert!(!acceptor.accept(&Transaction::new(vec![2])));
        assert!(!acceptor.has_seen(&Transaction::new(vec![2]).id()));
    }

    #[test]
    fn test_seen_set_forgets_oldest() {
        let (acceptor, _rx) = create_relay(RelayConfig {
            max_tx_size: 100,
            queue_capacity: 10,
            max_seen: 3,
        });
        let txs: Vec<Transaction> = (1..=5u8).map(|i| Transaction::new(vec![i])).collect();

        for tx in &txs {
            assert!(acceptor.accept(tx));
        }

        assert_eq!(acceptor.seen_count(), 3);
        assert!(!acceptor.has_seen(&txs[0].id()));
        assert!(!acceptor.has_seen(&txs[1].id()));
        assert!(acceptor.has_seen(&txs[2].id()));
        assert!(acceptor.has_seen(&txs[4].id()));
    }

    #[test]
    fn test_closed_queue_refuses() {
        let (acceptor, rx) = relay(100, 10);
        drop(rx);

        assert!(!acceptor.accept(&Transaction::new(vec![1])));
    }

    #[tokio::test]
    async fn test_relay_drains_until_senders_gone() {
        let (acceptor, rx) = relay(100, 10);
        let task = tokio::spawn(run_relay(rx));

        assert!(acceptor.accept(&Transaction::new(vec![1])));
        assert!(acceptor.accept(&Transaction::new(vec![2])));
        assert!(acceptor.accept(&Transaction::new(vec![2])));
        drop(acceptor);

        assert_eq!(task.await.unwrap(), 2);
    }
}
