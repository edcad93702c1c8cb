//! Per-connection payment handling
//!
//! A handler services exactly one accepted connection: it reads a single
//! payment, offers every contained transaction to the acceptor and answers
//! with an acknowledgment only if all of them were accepted. Whatever
//! happens, the streams and the socket are released before it returns.

use crate::message::{decode_request_with_limit, encode_ack, Payment, PaymentAck};
use crate::transport::{Connection, Release};
use nearpay_core::{
    ListenerConfig, PaymentError, PaymentResult, TransactionAcceptor, DEFAULT_MAX_FRAME_SIZE,
};
use std::io;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of servicing one connection
#[derive(Debug)]
pub enum ConnectionOutcome {
    /// Every transaction was accepted and the acknowledgment was sent
    Acknowledged { transactions: usize },
    /// At least one transaction was refused; nothing was sent
    Rejected { transactions: usize, rejected: usize },
    /// The connection was dropped before a decision could be delivered
    Abandoned(PaymentError),
}

impl ConnectionOutcome {
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, ConnectionOutcome::Acknowledged { .. })
    }
}

/// Owns the resources of one connection and releases them on drop,
/// output stream first, then input stream, then the socket.
struct ConnectionScope<C: Connection> {
    peer: String,
    conn: C,
    input: Option<C::Input>,
    output: Option<C::Output>,
}

impl<C: Connection> ConnectionScope<C> {
    fn new(conn: C) -> Self {
        Self {
            peer: conn.peer(),
            conn,
            input: None,
            output: None,
        }
    }

    fn open_streams(&mut self) -> io::Result<(&mut C::Input, &mut C::Output)> {
        let input = self.input.insert(self.conn.open_input()?);
        let output = self.output.insert(self.conn.open_output()?);
        Ok((input, output))
    }
}

/// Release one resource, reporting failure as `PaymentError::Release`
fn release<R: Release + ?Sized>(resource: &mut R) -> PaymentResult<()> {
    resource.release().map_err(PaymentError::Release)
}

fn release_quietly<R: Release + ?Sized>(peer: &str, what: &str, resource: &mut R) {
    if let Err(e) = release(resource) {
        debug!("Ignoring error on {} of {}: {}", what, peer, e);
    }
}

impl<C: Connection> Drop for ConnectionScope<C> {
    fn drop(&mut self) {
        if let Some(mut output) = self.output.take() {
            release_quietly(&self.peer, "output stream", &mut output);
        }
        if let Some(mut input) = self.input.take() {
            release_quietly(&self.peer, "input stream", &mut input);
        }
        release_quietly(&self.peer, "socket", &mut self.conn);
    }
}

/// Services accepted connections one at a time
pub struct ConnectionHandler<V: TransactionAcceptor + ?Sized> {
    acceptor: Arc<V>,
    max_frame_size: u32,
    ack_memo: Option<String>,
}

impl<V: TransactionAcceptor + ?Sized> ConnectionHandler<V> {
    pub fn new(acceptor: Arc<V>) -> Self {
        Self {
            acceptor,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            ack_memo: None,
        }
    }

    pub fn from_config(acceptor: Arc<V>, config: &ListenerConfig) -> Self {
        Self::new(acceptor)
            .with_max_frame_size(config.max_frame_size)
            .with_ack_memo(config.ack_memo.clone())
    }

    pub fn with_max_frame_size(mut self, max_frame_size: u32) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn with_ack_memo(mut self, memo: Option<String>) -> Self {
        self.ack_memo = memo;
        self
    }

    pub fn acceptor(&self) -> &Arc<V> {
        &self.acceptor
    }

    /// Service one connection to completion.
    ///
    /// Never fails: errors abandon the connection and are reported through
    /// [`ConnectionOutcome::Abandoned`].
    pub fn handle<C: Connection>(&self, conn: C) -> ConnectionOutcome {
        let mut scope = ConnectionScope::new(conn);

        match self.serve(&mut scope) {
            Ok(outcome) => outcome,
            Err(PaymentError::StreamClosed) => {
                info!("Peer {} disconnected before sending a payment", scope.peer);
                ConnectionOutcome::Abandoned(PaymentError::StreamClosed)
            }
            Err(e) => {
                warn!("Abandoning connection from {}: {}", scope.peer, e);
                ConnectionOutcome::Abandoned(e)
            }
        }
    }

    fn serve<C: Connection>(&self, scope: &mut ConnectionScope<C>) -> PaymentResult<ConnectionOutcome> {
        let peer = scope.peer.clone();
        let (input, output) = scope.open_streams()?;

        let payment = decode_request_with_limit(input, self.max_frame_size)?;
        debug!(
            "Got payment message from {} with {} transactions",
            peer,
            payment.transactions.len()
        );

        let transactions = payment.transactions.len();
        let rejected = self.offer_all(&payment);

        if rejected > 0 {
            info!(
                "Refused {} of {} transactions from {}, not sending anything",
                rejected, transactions, peer
            );
            return Ok(ConnectionOutcome::Rejected {
                transactions,
                rejected,
            });
        }

        let ack = PaymentAck::for_payment(&payment, self.ack_memo.clone());
        encode_ack(output, &ack)?;

        info!("Sent ack for {} transactions to {}", transactions, peer);
        Ok(ConnectionOutcome::Acknowledged { transactions })
    }

    /// Offer every transaction, even after a refusal, and count refusals
    fn offer_all(&self, payment: &Payment) -> usize {
        let mut rejected = 0;

        for tx in &payment.transactions {
            if !self.acceptor.accept(tx) {
                debug!("Transaction {} refused", tx.id());
                rejected += 1;
            }
        }

        rejected
    }
}
