//! Core types and traits for uiport.
//!
//! This crate provides the protocol primitives shared by both endpoints: the
//! wire messages, the state and patch types, and the port abstraction a
//! transport has to implement. Servers and clients live in their own crates.

mod hub;
mod message;
mod port;
mod state;

pub use hub::{Hub, HubListener};
pub use message::{Message, MessageError};
pub use port::{Acceptor, Connector, Port, PortReceiver, PortSender, TransportError};
pub use state::{State, StateError, Update};

/// Boxed error used for application-provided callbacks (state producers,
/// action handlers, transports).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
