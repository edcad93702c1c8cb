//! NEARPAY Node Implementation
//!
//! Embeds the payment listener in a long-running process:
//! - Relay acceptor that queues received transactions
//! - Graceful shutdown on Ctrl-C

mod node;
mod relay;

pub use node::*;
pub use relay::*;
