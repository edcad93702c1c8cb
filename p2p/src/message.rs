//! Payment protocol messages and framing
//!
//! Every message travels as a single frame:
//!
//! ```text
//! [length: u32 BE]        # Payload length
//! [payload: bytes]        # CBOR-encoded map
//! ```
//!
//! Payloads are CBOR maps keyed by field name. Keys a reader does not know
//! are skipped, and absent keys take their default value, so either side can
//! grow the schema without breaking older peers. Byte blobs are encoded as
//! CBOR byte strings and may hold any byte value.

use nearpay_core::{PaymentError, Transaction, DEFAULT_MAX_FRAME_SIZE};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::io::{self, Read, Write};
use thiserror::Error;

/// Size of the length prefix in front of every frame
pub const FRAME_HEADER_LEN: usize = 4;

/// Errors produced while reading or writing frames
#[derive(Error, Debug)]
pub enum WireError {
    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Frame of {size} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { size: u64, max: u32 },

    #[error("Stream closed by peer")]
    StreamClosed,

    #[error("I/O error: {0}")]
    Io(#[source] io::Error),

    #[error("Write failed: {0}")]
    Write(#[source] io::Error),
}

impl WireError {
    /// The peer sent bytes that are not a valid message
    pub fn is_malformed(&self) -> bool {
        matches!(self, WireError::Malformed(_) | WireError::FrameTooLarge { .. })
    }
}

impl From<WireError> for PaymentError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Malformed(msg) => PaymentError::Malformed(msg),
            err @ WireError::FrameTooLarge { .. } => PaymentError::Malformed(err.to_string()),
            WireError::StreamClosed => PaymentError::StreamClosed,
            WireError::Io(e) => PaymentError::Io(e),
            WireError::Write(e) => PaymentError::Write(e),
        }
    }
}

/// Payment message sent by the paying peer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Opaque context echoed back in the acknowledgment
    #[serde(default, with = "serde_bytes")]
    pub merchant_data: Vec<u8>,

    /// Transactions in the order they must be offered for acceptance
    #[serde(default)]
    pub transactions: Vec<Transaction>,

    /// Free-text note from the payer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
}

impl Payment {
    pub fn new(merchant_data: impl Into<Vec<u8>>, transactions: Vec<Transaction>) -> Self {
        Self {
            merchant_data: merchant_data.into(),
            transactions,
            memo: None,
        }
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }
}

/// Acknowledgment confirming every transaction of a payment was accepted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAck {
    /// The payment being acknowledged, echoed in full
    #[serde(default)]
    pub payment: Payment,

    /// Free-text note from the receiver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
}

impl PaymentAck {
    /// Build the acknowledgment for a payment
    pub fn for_payment(payment: &Payment, memo: Option<String>) -> Self {
        Self {
            payment: payment.clone(),
            memo,
        }
    }

    /// Whether this acknowledgment answers exactly the given payment
    pub fn acknowledges(&self, payment: &Payment) -> bool {
        self.payment == *payment
    }

    pub fn merchant_data(&self) -> &[u8] {
        &self.payment.merchant_data
    }
}

// =============================================================================
// Framing
// =============================================================================

fn read_error(err: io::Error) -> WireError {
    match err.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted => WireError::StreamClosed,
        _ => WireError::Io(err),
    }
}

/// Read one length-prefixed frame, blocking until it is complete.
///
/// The length is checked against `max_size` before the body is read, so an
/// oversized prefix never causes an allocation.
pub fn read_frame<R: Read + ?Sized>(reader: &mut R, max_size: u32) -> Result<Vec<u8>, WireError> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    reader.read_exact(&mut header).map_err(read_error)?;

    let len = u32::from_be_bytes(header);
    if len > max_size {
        return Err(WireError::FrameTooLarge {
            size: len as u64,
            max: max_size,
        });
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).map_err(read_error)?;
    Ok(body)
}

/// Write one length-prefixed frame and flush it
pub fn write_frame<W: Write + ?Sized>(writer: &mut W, payload: &[u8]) -> Result<(), WireError> {
    let len = u32::try_from(payload.len()).map_err(|_| WireError::FrameTooLarge {
        size: payload.len() as u64,
        max: u32::MAX,
    })?;

    writer.write_all(&len.to_be_bytes()).map_err(WireError::Write)?;
    writer.write_all(payload).map_err(WireError::Write)?;
    writer.flush().map_err(WireError::Write)
}

fn encode_payload<T: Serialize>(value: &T) -> Result<Vec<u8>, WireError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| WireError::Malformed(format!("cannot encode payload: {}", e)))?;
    Ok(buf)
}

fn decode_payload<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, WireError> {
    let mut remaining = bytes;
    let value = ciborium::from_reader(&mut remaining)
        .map_err(|e| WireError::Malformed(e.to_string()))?;

    if !remaining.is_empty() {
        return Err(WireError::Malformed(format!(
            "{} trailing bytes after payload",
            remaining.len()
        )));
    }

    Ok(value)
}

// =============================================================================
// Message Encoding/Decoding
// =============================================================================

/// Write a payment request frame
pub fn encode_request<W: Write + ?Sized>(writer: &mut W, payment: &Payment) -> Result<(), WireError> {
    write_frame(writer, &encode_payload(payment)?)
}

/// Read one payment request frame using the default frame limit
pub fn decode_request<R: Read + ?Sized>(reader: &mut R) -> Result<Payment, WireError> {
    decode_request_with_limit(reader, DEFAULT_MAX_FRAME_SIZE)
}

/// Read one payment request frame
pub fn decode_request_with_limit<R: Read + ?Sized>(
    reader: &mut R,
    max_size: u32,
) -> Result<Payment, WireError> {
    decode_payload(&read_frame(reader, max_size)?)
}

/// Write an acknowledgment frame
pub fn encode_ack<W: Write + ?Sized>(writer: &mut W, ack: &PaymentAck) -> Result<(), WireError> {
    write_frame(writer, &encode_payload(ack)?)
}

/// Read one acknowledgment frame
pub fn decode_ack<R: Read + ?Sized>(reader: &mut R, max_size: u32) -> Result<PaymentAck, WireError> {
    decode_payload(&read_frame(reader, max_size)?)
}
