//! NEARPAY Core Library
//!
//! Core types, traits, and configuration shared by the NEARPAY listener
//! and the node that embeds it.

pub mod types;
pub mod traits;
pub mod error;
pub mod config;

pub use types::*;
pub use traits::*;
pub use error::*;
pub use config::*;
