//! In-process transport.
//!
//! A [`Hub`] routes `open(name)` calls to whichever [`HubListener`] is
//! registered under that name, handing it the far end of a fresh port pair.
//! Useful for endpoints living in the same process and for tests.

use crate::{Acceptor, Connector, Port, TransportError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

type Endpoints = HashMap<String, mpsc::UnboundedSender<Port>>;

/// Named-endpoint registry for in-process ports.
#[derive(Debug, Clone, Default)]
pub struct Hub {
    endpoints: Arc<Mutex<Endpoints>>,
}

/// Incoming ports for one endpoint name.
#[derive(Debug)]
pub struct HubListener {
    name: String,
    rx: mpsc::UnboundedReceiver<Port>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen on `name`, replacing any previous listener for it.
    pub fn listen(&self, name: impl Into<String>) -> HubListener {
        let name = name.into();
        let (tx, rx) = mpsc::unbounded_channel();
        self.endpoints().insert(name.clone(), tx);
        HubListener { name, rx }
    }

    fn endpoints(&self) -> std::sync::MutexGuard<'_, Endpoints> {
        // A panic while holding this lock cannot leave the map half-updated.
        self.endpoints.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl HubListener {
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl Connector for Hub {
    async fn open(&self, name: &str) -> Result<Port, TransportError> {
        let (local, remote) = Port::pair(name);
        let mut endpoints = self.endpoints();
        let delivered = endpoints
            .get(name)
            .is_some_and(|listener| listener.send(remote).is_ok());
        if !delivered {
            endpoints.remove(name);
            return Err(TransportError::NoEndpoint(name.to_string()));
        }
        Ok(local)
    }
}

#[async_trait]
impl Acceptor for HubListener {
    async fn accept(&mut self) -> Option<Port> {
        self.rx.recv().await
    }
}
