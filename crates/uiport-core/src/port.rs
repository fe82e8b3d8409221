//! The port abstraction.
//!
//! A [`Port`] is an ordered duplex channel of text frames between exactly two
//! parties, opened under an endpoint name. Transports produce ports through
//! [`Connector`] (the initiating side) and [`Acceptor`] (the listening side);
//! everything above this module only sees ports.

use crate::{BoxError, Message, MessageError};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// One end of a named duplex channel.
#[derive(Debug)]
pub struct Port {
    name: String,
    sender: PortSender,
    receiver: PortReceiver,
}

/// Sending half of a port. Dropping every clone closes the port for the peer.
#[derive(Debug, Clone)]
pub struct PortSender {
    tx: mpsc::UnboundedSender<String>,
}

/// Receiving half of a port.
#[derive(Debug)]
pub struct PortReceiver {
    rx: mpsc::UnboundedReceiver<String>,
}

impl Port {
    /// Create two connected ends sharing `name`.
    pub fn pair(name: impl Into<String>) -> (Port, Port) {
        let name = name.into();
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let a = Port::from_channels(name.clone(), a_tx, b_rx);
        let b = Port::from_channels(name, b_tx, a_rx);
        (a, b)
    }

    /// Wrap raw channels, for transports that pump frames themselves.
    pub fn from_channels(
        name: impl Into<String>,
        tx: mpsc::UnboundedSender<String>,
        rx: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        Self {
            name: name.into(),
            sender: PortSender { tx },
            receiver: PortReceiver { rx },
        }
    }

    /// The endpoint name this port was opened under.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn split(self) -> (PortSender, PortReceiver) {
        (self.sender, self.receiver)
    }
}

impl PortSender {
    /// Encode and send a message.
    pub fn send(&self, message: &Message) -> Result<(), TransportError> {
        self.send_frame(message.encode()?)
    }

    /// Send an already encoded frame. Broadcasts encode once and fan the
    /// frame out through this.
    pub fn send_frame(&self, frame: String) -> Result<(), TransportError> {
        self.tx.send(frame).map_err(|_| TransportError::Closed)
    }

    /// Whether the peer has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl PortReceiver {
    /// Next frame, or `None` once the peer has closed the port.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Close the receiving side; the peer's sends fail from now on.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

/// Opens ports by endpoint name.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, name: &str) -> Result<Port, TransportError>;
}

/// Yields incoming ports. `None` means the acceptor is exhausted.
#[async_trait]
pub trait Acceptor: Send {
    async fn accept(&mut self) -> Option<Port>;
}

/// Transport-level failure.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("port is closed")]
    Closed,
    #[error("no endpoint listening on '{0}'")]
    NoEndpoint(String),
    #[error(transparent)]
    Message(#[from] MessageError),
    #[error("transport failure: {0}")]
    Other(#[source] BoxError),
}
