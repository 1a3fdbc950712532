//! Inter-process communication
//!
//! Typed messages with per-receiver FIFO ordering and response
//! correlation, plus the RPC plane built on top of them.

pub mod message;
pub mod rpc;

pub use message::{Message, MessageId, MessageQueue};
