//! Wire protocol: the messages exchanged over the bidirectional command
//! stream and the unary dispatch call.

pub mod client;
pub mod codec;
pub mod server;

pub use client::ClientMessage;
pub use server::{ProcessingInstructions, WireCommand, WireOutcome};
