//! Core traits defining NEARPAY interfaces

use crate::types::Transaction;

/// Result type for NEARPAY operations
pub type PaymentResult<T> = Result<T, crate::error::PaymentError>;

/// Decides whether a received transaction can be accepted.
///
/// Called synchronously from the listener thread, once per transaction and
/// in request order. Implementations may have side effects (queueing the
/// transaction for broadcast, recording it) regardless of the answer.
///
/// No timeout is imposed by the listener: an implementation that blocks
/// forever stalls the whole listener.
pub trait TransactionAcceptor: Send + Sync {
    /// Returns `true` if the transaction is acceptable
    fn accept(&self, tx: &Transaction) -> bool;
}

impl<F> TransactionAcceptor for F
where
    F: Fn(&Transaction) -> bool + Send + Sync,
{
    fn accept(&self, tx: &Transaction) -> bool {
        self(tx)
    }
}
