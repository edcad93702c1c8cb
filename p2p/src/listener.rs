//! Accept loop for the payment service
//!
//! [`PaymentListener`] owns the listening resource and services peers
//! strictly one after another. It is stopped from another thread by
//! clearing the running flag and closing the listening resource, which
//! makes the parked `accept` fail so the loop can observe the flag.

use crate::handler::{ConnectionHandler, ConnectionOutcome};
use crate::transport::{Connection, ServiceListener, TcpServiceListener};
use nearpay_core::{ListenerConfig, PaymentError, PaymentResult, TransactionAcceptor};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Name of the thread started by [`PaymentListener::spawn`]
pub const LISTENER_THREAD_NAME: &str = "payment-listener";

/// Lifecycle state of a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Listening,
    Stopped,
}

/// Thread-safe handle that stops a listener
pub struct StopHandle<L: ServiceListener> {
    running: Arc<AtomicBool>,
    listener: Arc<L>,
}

impl<L: ServiceListener> Clone for StopHandle<L> {
    fn clone(&self) -> Self {
        Self {
            running: self.running.clone(),
            listener: self.listener.clone(),
        }
    }
}

impl<L: ServiceListener> StopHandle<L> {
    /// Stop accepting connections.
    ///
    /// Only the first call closes the listening resource; later calls do
    /// nothing. A connection already being serviced runs to completion.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        info!("Stopping payment listener '{}'", self.listener.record().name);

        if let Err(e) = self.listener.close() {
            debug!("Ignoring error closing listening resource: {}", e);
        }
    }

    pub fn state(&self) -> ListenerState {
        if self.running.load(Ordering::SeqCst) {
            ListenerState::Listening
        } else {
            ListenerState::Stopped
        }
    }
}

/// Sequential accept loop bound to one listening resource
pub struct PaymentListener<L: ServiceListener, V: TransactionAcceptor + ?Sized> {
    listener: Arc<L>,
    handler: ConnectionHandler<V>,
    running: Arc<AtomicBool>,
}

impl<V: TransactionAcceptor + ?Sized> PaymentListener<TcpServiceListener, V> {
    /// Bind the TCP service endpoint described by `config`.
    ///
    /// Fails with `PaymentError::ResourceAcquisition` if the endpoint cannot
    /// be bound.
    pub fn bind(config: &ListenerConfig, acceptor: Arc<V>) -> PaymentResult<Self> {
        let listener = TcpServiceListener::from_config(config)?;
        Ok(Self::with_handler(
            listener,
            ConnectionHandler::from_config(acceptor, config),
        ))
    }
}

impl<L: ServiceListener, V: TransactionAcceptor + ?Sized> PaymentListener<L, V> {
    /// Wrap an already acquired listening resource
    pub fn new(listener: L, acceptor: Arc<V>) -> Self {
        Self::with_handler(listener, ConnectionHandler::new(acceptor))
    }

    pub fn with_handler(listener: L, handler: ConnectionHandler<V>) -> Self {
        Self {
            listener: Arc::new(listener),
            handler,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn state(&self) -> ListenerState {
        self.stop_handle().state()
    }

    pub fn stop_handle(&self) -> StopHandle<L> {
        StopHandle {
            running: self.running.clone(),
            listener: self.listener.clone(),
        }
    }

    pub fn stop(&self) {
        self.stop_handle().stop();
    }

    /// Run the accept loop on the calling thread until stopped.
    ///
    /// Failures of a single connection or a single accept never end the
    /// loop; only [`stop`](Self::stop) does.
    pub fn run(&self) {
        let record = self.listener.record();
        info!("Accepting payments for '{}' ({})", record.name, record.uuid);

        while self.running.load(Ordering::SeqCst) {
            match self.accept_next() {
                Ok(conn) => {
                    info!("Accepted connection from {}", conn.peer());
                    self.dispatch(conn);
                }
                Err(e) if self.running.load(Ordering::SeqCst) => {
                    warn!("Exception in accept loop: {}", e);
                }
                Err(e) => debug!("Accept interrupted by stop: {}", e),
            }
        }

        info!("Payment listener '{}' stopped", record.name);
    }

    /// Wait for the next peer
    pub fn accept_next(&self) -> PaymentResult<L::Conn> {
        self.listener.accept().map_err(PaymentError::Accept)
    }

    fn dispatch<C: Connection>(&self, conn: C) {
        match self.handler.handle(conn) {
            ConnectionOutcome::Acknowledged { transactions } => {
                debug!("Payment with {} transactions acknowledged", transactions)
            }
            ConnectionOutcome::Rejected { rejected, .. } => {
                debug!("Payment rejected ({} transactions refused)", rejected)
            }
            ConnectionOutcome::Abandoned(e) => debug!("Connection abandoned: {}", e),
        }
    }
}

impl<L, V> PaymentListener<L, V>
where
    L: ServiceListener + 'static,
    V: TransactionAcceptor + ?Sized + 'static,
{
    /// Run the accept loop on a dedicated thread
    pub fn spawn(self) -> io::Result<ListenerHandle<L>> {
        let stop = self.stop_handle();
        let thread = thread::Builder::new()
            .name(LISTENER_THREAD_NAME.to_string())
            .spawn(move || self.run())?;

        Ok(ListenerHandle { stop, thread })
    }
}

/// Handle to a listener running on its own thread
pub struct ListenerHandle<L: ServiceListener> {
    stop: StopHandle<L>,
    thread: JoinHandle<()>,
}

impl<L: ServiceListener> ListenerHandle<L> {
    pub fn stop_handle(&self) -> StopHandle<L> {
        self.stop.clone()
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn state(&self) -> ListenerState {
        self.stop.state()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the accept loop to exit
    pub fn join(self) -> thread::Result<()> {
        self.thread.join()
    }

    /// Stop the listener and wait for its thread
    pub fn shutdown(self) -> thread::Result<()> {
        self.stop();
        self.join()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{decode_ack, encode_request, Payment};
    use crate::transport::{ServiceRecord, TcpConnection};
    use nearpay_core::{Transaction, DEFAULT_MAX_FRAME_SIZE};
    use std::io::Write;
    use std::net::{SocketAddr, TcpStream};
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::time::Duration;

    fn loopback_config() -> ListenerConfig {
        ListenerConfig {
            listen_addr: "127.0.0.1:0".into(),
            ..Default::default()
        }
    }

    fn accept_all() -> Arc<dyn TransactionAcceptor> {
        Arc::new(|_: &Transaction| true)
    }

    fn send(addr: SocketAddr, payment: &Payment) -> Option<Vec<u8>> {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        encode_request(&mut stream, payment).unwrap();
        decode_ack(&mut stream, DEFAULT_MAX_FRAME_SIZE)
            .ok()
            .map(|ack| ack.payment.merchant_data)
    }

    /// Join the listener thread, failing if it does not exit in time
    fn join_within(handle: ListenerHandle<TcpServiceListener>, timeout: Duration) {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let _ = tx.send(handle.join());
        });
        rx.recv_timeout(timeout)
            .expect("listener thread did not exit")
            .unwrap();
    }

    #[test]
    fn test_initial_state_is_listening() {
        let listener = PaymentListener::bind(&loopback_config(), accept_all()).unwrap();

        assert_eq!(listener.state(), ListenerState::Listening);
        listener.stop();
        assert_eq!(listener.state(), ListenerState::Stopped);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let listener = PaymentListener::bind(&loopback_config(), accept_all()).unwrap();
        let handle = listener.stop_handle();

        handle.stop();
        handle.stop();
        listener.stop();

        assert_eq!(handle.state(), ListenerState::Stopped);
        assert!(listener.listener().is_closed());
    }

    #[test]
    fn test_run_after_stop_returns_immediately() {
        let listener = PaymentListener::bind(&loopback_config(), accept_all()).unwrap();

        listener.stop();
        listener.run();

        assert_eq!(listener.state(), ListenerState::Stopped);
    }

    #[test]
    fn test_stop_unblocks_parked_accept() {
        let listener = PaymentListener::bind(&loopback_config(), accept_all()).unwrap();
        let handle = listener.spawn().unwrap();

        thread::sleep(Duration::from_millis(100));
        assert!(!handle.is_finished());

        handle.stop();
        assert_eq!(handle.state(), ListenerState::Stopped);
        join_within(handle, Duration::from_secs(5));
    }

    #[test]
    fn test_stopped_listener_refuses_connects() {
        let listener = PaymentListener::bind(&loopback_config(), accept_all()).unwrap();
        let addr = listener.listener().local_addr();
        let handle = listener.spawn().unwrap();
        let held = handle.stop_handle();

        join_within_after_stop(handle);

        assert_eq!(held.state(), ListenerState::Stopped);
        assert!(TcpStream::connect_timeout(&addr, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_serves_connections_sequentially() {
        let listener = PaymentListener::bind(&loopback_config(), accept_all()).unwrap();
        let addr = listener.listener().local_addr();
        let handle = listener.spawn().unwrap();

        for i in 0..3u8 {
            let payment = Payment::new(vec![i], vec![Transaction::new(vec![i; 8])]);
            assert_eq!(send(addr, &payment), Some(vec![i]));
        }

        join_within_after_stop(handle);
    }

    fn join_within_after_stop(handle: ListenerHandle<TcpServiceListener>) {
        handle.stop();
        join_within(handle, Duration::from_secs(5));
    }

    #[test]
    fn test_garbage_does_not_stop_listener() {
        let listener = PaymentListener::bind(&loopback_config(), accept_all()).unwrap();
        let addr = listener.listener().local_addr();
        let handle = listener.spawn().unwrap();

        {
            let mut stream = TcpStream::connect(addr).unwrap();
            stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
            stream.write_all(&[0x00, 0x00, 0x00, 0x02, 0xff, 0xff]).unwrap();
            assert!(decode_ack(&mut stream, DEFAULT_MAX_FRAME_SIZE).is_err());
        }

        assert_eq!(handle.state(), ListenerState::Listening);
        let payment = Payment::new(b"next".to_vec(), vec![Transaction::new(vec![1])]);
        assert_eq!(send(addr, &payment), Some(b"next".to_vec()));

        join_within_after_stop(handle);
    }

    #[test]
    fn test_in_flight_connection_completes_after_stop() {
        let (entered_tx, entered_rx) = mpsc::channel::<()>();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let entered_tx = parking_lot::Mutex::new(entered_tx);
        let release_rx = parking_lot::Mutex::new(release_rx);

        let acceptor = move |_: &Transaction| {
            let _ = entered_tx.lock().send(());
            let _ = release_rx.lock().recv_timeout(Duration::from_secs(5));
            true
        };

        let listener = PaymentListener::bind(&loopback_config(), Arc::new(acceptor)).unwrap();
        let addr = listener.listener().local_addr();
        let handle = listener.spawn().unwrap();

        let client = thread::spawn(move || {
            send(addr, &Payment::new(b"slow".to_vec(), vec![Transaction::new(vec![1])]))
        });

        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        handle.stop();
        release_tx.send(()).unwrap();

        assert_eq!(client.join().unwrap(), Some(b"slow".to_vec()));
        join_within(handle, Duration::from_secs(5));
    }

    /// Listener whose accept always fails until closed
    struct FlakyListener {
        attempts: AtomicUsize,
        closed: AtomicBool,
        record: ServiceRecord,
    }

    impl ServiceListener for FlakyListener {
        type Conn = TcpConnection;

        fn accept(&self) -> io::Result<TcpConnection> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(1));
            if self.closed.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::NotConnected, "closed"));
            }
            Err(io::Error::new(io::ErrorKind::Other, "radio hiccup"))
        }

        fn close(&self) -> io::Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Err(io::Error::new(io::ErrorKind::Other, "close failed"))
        }

        fn record(&self) -> &ServiceRecord {
            &self.record
        }
    }

    #[test]
    fn test_accept_errors_do_not_end_loop() {
        let flaky = FlakyListener {
            attempts: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            record: ServiceRecord::default(),
        };
        let listener = PaymentListener::new(flaky, accept_all());
        let stop = listener.stop_handle();
        let runner = thread::spawn(move || {
            listener.run();
            listener.listener().attempts.load(Ordering::SeqCst)
        });

        thread::sleep(Duration::from_millis(50));
        assert!(!runner.is_finished());

        stop.stop();
        stop.stop();

        let attempts = runner.join().unwrap();
        assert!(attempts > 1);
        assert_eq!(stop.state(), ListenerState::Stopped);
    }

    #[test]
    fn test_accept_failure_is_reported_as_accept_error() {
        let flaky = FlakyListener {
            attempts: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            record: ServiceRecord::default(),
        };
        let listener = PaymentListener::new(flaky, accept_all());

        let err = listener.accept_next().unwrap_err();

        assert!(matches!(err, PaymentError::Accept(_)));
        assert_eq!(listener.listener().attempts.load(Ordering::SeqCst), 1);
    }
}
