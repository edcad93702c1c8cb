//! NEARPAY Payment Listener
//!
//! Receives payments from nearby peers:
//! - Length-prefixed CBOR framing for payment and acknowledgment messages
//! - One connection serviced at a time, with guaranteed resource release
//! - Accept loop that can be stopped from any thread

pub mod message;
pub mod transport;
pub mod handler;
pub mod listener;
pub mod client;

pub use message::*;
pub use transport::*;
pub use handler::*;
pub use listener::*;
pub use client::*;
