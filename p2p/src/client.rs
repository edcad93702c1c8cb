//! Sending side of the payment protocol

use crate::message::{decode_ack, encode_request, Payment, PaymentAck, WireError};
use nearpay_core::{ClientConfig, PaymentError, PaymentResult};
use std::io::{BufReader, BufWriter};
use std::net::{SocketAddr, TcpStream};
use tracing::{debug, info};

/// Connection to a remote payment service
pub struct PaymentClient {
    stream: TcpStream,
    peer: SocketAddr,
    max_frame_size: u32,
}

impl PaymentClient {
    /// Connect to a payment service
    pub fn connect(addr: SocketAddr, config: &ClientConfig) -> PaymentResult<Self> {
        let stream = TcpStream::connect_timeout(&addr, config.connect_timeout())?;
        stream.set_read_timeout(Some(config.ack_timeout()))?;
        stream.set_nodelay(true)?;

        debug!("Connected to payment service at {}", addr);

        Ok(Self {
            stream,
            peer: addr,
            max_frame_size: config.max_frame_size,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Send a payment and wait for the answer.
    ///
    /// Returns `Ok(None)` when the service drops the connection without an
    /// acknowledgment, which is how a refusal is signalled.
    pub fn send(self, payment: &Payment) -> PaymentResult<Option<PaymentAck>> {
        let mut writer = BufWriter::new(self.stream.try_clone()?);
        encode_request(&mut writer, payment)?;
        drop(writer);

        info!(
            "Sent payment with {} transactions to {}",
            payment.transactions.len(),
            self.peer
        );

        let mut reader = BufReader::new(&self.stream);
        match decode_ack(&mut reader, self.max_frame_size) {
            Ok(ack) if ack.acknowledges(payment) => {
                info!("Payment acknowledged by {}", self.peer);
                Ok(Some(ack))
            }
            Ok(_) => Err(PaymentError::Malformed(
                "acknowledgment does not match payment".into(),
            )),
            Err(WireError::StreamClosed) => {
                info!("{} closed the connection without acknowledging", self.peer);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Connect, send one payment and wait for the answer
pub fn send_payment(
    addr: SocketAddr,
    payment: &Payment,
    config: &ClientConfig,
) -> PaymentResult<Option<PaymentAck>> {
    PaymentClient::connect(addr, config)?.send(payment)
}
