//! Client side of uiport.
//!
//! A [`Client`] mirrors the server's state (initial state plus every update,
//! in arrival order), notifies listeners of changes and directives, and turns
//! action calls into correlated request/response round-trips.

mod actions;
mod client;
mod listeners;
mod pending;

pub use actions::{Action, Actions};
pub use client::{Client, ClientError, Phase, Subscription};
pub use uiport_core::{State, Update};
