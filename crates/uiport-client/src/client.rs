//! Client implementation.

use crate::actions::Actions;
use crate::listeners::Listeners;
use crate::pending::PendingTable;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uiport_core::{Connector, Message, PortReceiver, PortSender, State, TransportError};

type StateListener = dyn Fn(&State) + Send + Sync;
type DirectiveListener = dyn Fn(&Value) + Send + Sync;

/// Client lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Created, `connect` not called yet.
    Unconnected,
    /// Port opening or waiting for the initial state.
    Connecting,
    /// Initial state received.
    Connected,
    /// Torn down. Terminal; create a new client to reconnect.
    Disconnected,
}

/// A client bound to one server endpoint name.
///
/// Cheap to clone; clones share the connection, mirrored state and
/// listeners.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    connector: Arc<dyn Connector>,
    core: Mutex<Core>,
}

struct Core {
    phase: Phase,
    port: Option<PortSender>,
    reader: Option<JoinHandle<()>>,
    state: Option<State>,
    init: Option<oneshot::Sender<Result<State, ClientError>>>,
    listeners: Listeners<StateListener>,
    directives: HashMap<String, Listeners<DirectiveListener>>,
    pending: PendingTable,
}

/// Handle returned by listener registration.
#[derive(Debug)]
pub struct Subscription {
    inner: Weak<Inner>,
    target: Target,
}

#[derive(Debug)]
enum Target {
    State(u64),
    Directive(String, u64),
}

impl Client {
    /// Create an unconnected client for endpoint `name`.
    pub fn new(name: impl Into<String>, connector: impl Connector + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                connector: Arc::new(connector),
                core: Mutex::new(Core {
                    phase: Phase::Unconnected,
                    port: None,
                    reader: None,
                    state: None,
                    init: None,
                    listeners: Listeners::new(),
                    directives: HashMap::new(),
                    pending: PendingTable::new(),
                }),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn phase(&self) -> Phase {
        self.inner.core().phase
    }

    /// The mirrored state, once the initial state has arrived.
    pub fn state(&self) -> Option<State> {
        self.inner.core().state.clone()
    }

    /// Number of actions still waiting for their result.
    pub fn pending_requests(&self) -> usize {
        self.inner.core().pending.len()
    }

    /// Open the port and wait for the initial state.
    ///
    /// A client connects once. Calling this again, or after
    /// [`Client::disconnect`], is an error.
    pub async fn connect(&self) -> Result<State, ClientError> {
        let (init_tx, init_rx) = oneshot::channel();
        {
            let mut core = self.inner.core();
            match core.phase {
                Phase::Unconnected => {}
                Phase::Connecting | Phase::Connected => return Err(ClientError::AlreadyConnected),
                Phase::Disconnected => return Err(ClientError::Closed),
            }
            core.phase = Phase::Connecting;
            core.init = Some(init_tx);
        }
        tracing::debug!(endpoint = %self.inner.name, "connecting");

        let port = match self.inner.connector.open(&self.inner.name).await {
            Ok(port) => port,
            Err(e) => {
                let mut core = self.inner.core();
                if core.phase == Phase::Connecting {
                    core.phase = Phase::Unconnected;
                    core.init = None;
                }
                return Err(e.into());
            }
        };

        {
            let mut core = self.inner.core();
            if core.phase != Phase::Connecting {
                // Disconnected while the port was opening.
                return Err(ClientError::Disconnected);
            }
            let (sender, receiver) = port.split();
            core.port = Some(sender);
            core.reader = Some(tokio::spawn(read_loop(
                Arc::downgrade(&self.inner),
                receiver,
            )));
        }

        init_rx.await.unwrap_or(Err(ClientError::Disconnected))
    }

    /// Tear down: drop state listeners, close the port and reject every
    /// pending action with [`ClientError::Disconnected`].
    pub fn disconnect(&self) -> Result<(), ClientError> {
        let mut core = self.inner.core();
        if !matches!(core.phase, Phase::Connecting | Phase::Connected) {
            return Err(ClientError::NotConnected);
        }

        core.phase = Phase::Disconnected;
        core.listeners.clear();
        core.port = None;
        if let Some(reader) = core.reader.take() {
            reader.abort();
        }
        if let Some(init) = core.init.take() {
            let _ = init.send(Err(ClientError::Disconnected));
        }
        core.pending.fail_all(|| ClientError::Disconnected);

        tracing::debug!(endpoint = %self.inner.name, "disconnected");
        Ok(())
    }

    /// Invoke action `name` on the server and wait for its result.
    ///
    /// Only a connected client may call; until the initial state has
    /// arrived this fails with [`ClientError::NotConnected`]. Dropping the
    /// returned future abandons the request.
    pub async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, ClientError> {
        let (uid, reply) = {
            let mut core = self.inner.core();
            if core.phase == Phase::Connecting {
                return Err(ClientError::NotConnected);
            }
            let Some(port) = core.port.clone() else {
                return Err(match core.phase {
                    Phase::Connected => ClientError::ConnectionLost,
                    _ => ClientError::NotConnected,
                });
            };

            tracing::info!(?args, "> {name}");
            let (uid, reply) = core.pending.register();
            let message = Message::Action {
                uid: Some(uid),
                name: name.to_string(),
                args,
            };
            if let Err(e) = port.send(&message) {
                core.pending.cancel(uid);
                return Err(match e {
                    TransportError::Closed => ClientError::ConnectionLost,
                    other => other.into(),
                });
            }
            (uid, reply)
        };

        let _guard = CancelOnDrop {
            inner: Arc::downgrade(&self.inner),
            uid,
        };
        reply.await.unwrap_or(Err(ClientError::Disconnected))
    }

    /// The callable action surface.
    pub fn actions(&self) -> Actions {
        Actions::new(self.clone())
    }

    /// Call `listener` with the full mirrored state after every INIT or
    /// UPDATE is applied.
    pub fn add_listener(&self, listener: impl Fn(&State) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.core().listeners.add(Arc::new(listener));
        Subscription {
            inner: Arc::downgrade(&self.inner),
            target: Target::State(id),
        }
    }

    /// Call `listener` with the payload of every directive named `name`.
    /// Listeners for the same name run in registration order.
    pub fn add_directive_listener(
        &self,
        name: impl Into<String>,
        listener: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Subscription {
        let name = name.into();
        let id = self
            .inner
            .core()
            .directives
            .entry(name.clone())
            .or_insert_with(Listeners::new)
            .add(Arc::new(listener));
        Subscription {
            inner: Arc::downgrade(&self.inner),
            target: Target::Directive(name, id),
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("name", &self.inner.name)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn core(&self) -> MutexGuard<'_, Core> {
        // Listeners run outside the lock, so a poisoned lock only means a
        // panic inside this module's own bookkeeping.
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle(&self, message: Message) {
        match message {
            Message::Init { state } => {
                tracing::info!(?state, "State");
                let listeners = {
                    let mut core = self.core();
                    core.state = Some(state.clone());
                    if core.phase == Phase::Connecting {
                        core.phase = Phase::Connected;
                    }
                    if let Some(init) = core.init.take() {
                        let _ = init.send(Ok(state.clone()));
                    }
                    core.listeners.snapshot()
                };
                notify(&listeners, &state);
            }

            Message::Update { update } => {
                let (listeners, state) = {
                    let mut core = self.core();
                    let state = core.state.get_or_insert_with(State::new);
                    state.apply(&update);
                    let state = state.clone();
                    (core.listeners.snapshot(), state)
                };
                tracing::info!(?state, "State");
                notify(&listeners, &state);
            }

            Message::ActionResult { uid, result, error } => {
                let reply = match error {
                    Some(error) => Err(ClientError::Remote(error)),
                    None => Ok(result.unwrap_or(Value::Null)),
                };
                if !self.core().pending.resolve(uid, reply) {
                    tracing::debug!(uid, "result for a request nobody is waiting on");
                }
            }

            Message::Directive { name, payload } => {
                tracing::info!(?payload, "< {name}");
                let listeners = self
                    .core()
                    .directives
                    .get(&name)
                    .map(Listeners::snapshot)
                    .unwrap_or_default();
                for listener in listeners {
                    listener(&payload);
                }
            }

            Message::Action { name, .. } => {
                tracing::warn!("unexpected ACTION '{name}' from server");
            }
        }
    }

    /// The peer closed the port.
    fn connection_lost(&self) {
        let mut core = self.core();
        if core.port.take().is_none() {
            return;
        }
        tracing::debug!(endpoint = %self.name, "port closed by server");

        core.reader = None;
        if let Some(init) = core.init.take() {
            let _ = init.send(Err(ClientError::ConnectionLost));
        }
        core.pending.fail_all(|| ClientError::ConnectionLost);
    }

    fn unsubscribe(&self, target: &Target) -> bool {
        let mut core = self.core();
        match target {
            Target::State(id) => core.listeners.remove(*id),
            Target::Directive(name, id) => {
                let Some(listeners) = core.directives.get_mut(name) else {
                    return false;
                };
                let removed = listeners.remove(*id);
                if listeners.is_empty() {
                    core.directives.remove(name);
                }
                removed
            }
        }
    }
}

impl Subscription {
    /// Remove exactly the listener this subscription was returned for.
    /// Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        match self.inner.upgrade() {
            Some(inner) => inner.unsubscribe(&self.target),
            None => false,
        }
    }
}

fn notify(listeners: &[Arc<StateListener>], state: &State) {
    for listener in listeners {
        listener(state);
    }
}

async fn read_loop(inner: Weak<Inner>, mut receiver: PortReceiver) {
    while let Some(frame) = receiver.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        match Message::decode(&frame) {
            Ok(message) => inner.handle(message),
            Err(e) => tracing::warn!("{e}"),
        }
    }
    if let Some(inner) = inner.upgrade() {
        inner.connection_lost();
    }
}

/// Drops the pending entry of a call whose future was dropped early.
struct CancelOnDrop {
    inner: Weak<Inner>,
    uid: u64,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.core().pending.cancel(self.uid);
        }
    }
}

/// Client-side failure.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("already connected")]
    AlreadyConnected,
    #[error("not connected")]
    NotConnected,
    #[error("client was disconnected; create a new client to reconnect")]
    Closed,
    #[error("disconnected")]
    Disconnected,
    #[error("connection lost")]
    ConnectionLost,
    /// The server reported an error for the action.
    #[error("{0}")]
    Remote(String),
    #[error("unexpected action result: {0}")]
    Decode(#[source] serde_json::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
}
