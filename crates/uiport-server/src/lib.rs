//! Server side of uiport.
//!
//! A [`Server`] owns the authoritative state. Each client port gets the
//! baseline state with every buffered update folded in as its first message,
//! then receives every later update and directive. Clients call back in with
//! named actions, dispatched to the handlers in [`ServerConfig`].

mod config;
mod handler;
mod server;

pub use config::ServerConfig;
pub use handler::{ArgError, Args};
pub use server::{ClientId, Server, ServerError};
pub use uiport_core::{BoxError, State, Update};
