//! Server implementation.

use crate::config::ServerConfig;
use crate::handler::Args;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use uiport_core::{
    Acceptor, BoxError, Message, MessageError, Port, PortReceiver, PortSender, State, Update,
};

/// Identifies one connected port for the lifetime of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle to a running server. Cheap to clone; every clone drives the same
/// state.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    config: ServerConfig,
    shared: RwLock<Shared>,
}

#[derive(Default)]
struct Shared {
    next_id: u64,
    /// Registration order.
    clients: Vec<ClientEntry>,
    /// Every update ever broadcast. Append-only.
    updates: Vec<Update>,
}

struct ClientEntry {
    id: ClientId,
    sender: PortSender,
    handshake: Handshake,
}

enum Handshake {
    /// Waiting for the baseline state. Holds directives and action results
    /// to flush after INIT.
    Pending(Vec<String>),
    Live,
}

impl Server {
    /// Create a server. It serves nothing until ports are handed to it with
    /// [`Server::serve`] or [`Server::attach`].
    pub fn new(name: impl Into<String>, config: ServerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                config,
                shared: RwLock::new(Shared::default()),
            }),
        }
    }

    /// Create a server and start accepting ports from `acceptor`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn create<A>(name: impl Into<String>, config: ServerConfig, acceptor: A) -> Self
    where
        A: Acceptor + 'static,
    {
        let server = Self::new(name, config);
        server.serve(acceptor);
        server
    }

    /// The endpoint name this server answers to.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Accept ports until the acceptor is exhausted. Ports opened under a
    /// different endpoint name are dropped.
    pub fn serve<A>(&self, mut acceptor: A) -> JoinHandle<()>
    where
        A: Acceptor + 'static,
    {
        let server = self.clone();
        tokio::spawn(async move {
            while let Some(port) = acceptor.accept().await {
                if port.name() != server.name() {
                    tracing::debug!(port = port.name(), "ignoring port for another endpoint");
                    continue;
                }
                server.attach(port).await;
            }
            tracing::debug!(server = server.name(), "acceptor closed");
        })
    }

    /// Register a connected port and start serving it.
    pub async fn attach(&self, port: Port) -> ClientId {
        let (sender, receiver) = port.split();

        let id = {
            let mut shared = self.inner.shared.write().await;
            shared.next_id += 1;
            let id = ClientId(shared.next_id);
            shared.clients.push(ClientEntry {
                id,
                sender: sender.clone(),
                handshake: Handshake::Pending(Vec::new()),
            });
            id
        };
        tracing::debug!(client = %id, server = self.name(), "client connected");

        tokio::spawn(handle_connection(self.clone(), id, receiver));
        id
    }

    /// Append `update` to the update log and broadcast it to every client.
    ///
    /// Clients still waiting for their initial state get the update folded
    /// into it instead.
    pub async fn update_state(&self, update: Update) -> Result<(), ServerError> {
        tracing::info!(?update, "State");
        let frame = Message::Update {
            update: update.clone(),
        }
        .encode()?;

        let mut shared = self.inner.shared.write().await;
        shared.updates.push(update);
        for client in &shared.clients {
            if matches!(client.handshake, Handshake::Live) {
                deliver(client, frame.clone());
            }
        }
        Ok(())
    }

    /// Broadcast a directive to every registered client.
    pub async fn send_directive(
        &self,
        name: impl Into<String>,
        payload: Value,
    ) -> Result<(), ServerError> {
        let name = name.into();
        tracing::info!(?payload, "> {name}");
        let frame = Message::Directive { name, payload }.encode()?;

        let mut shared = self.inner.shared.write().await;
        for client in &mut shared.clients {
            client.send_or_queue(frame.clone());
        }
        Ok(())
    }

    /// Send `message` to one client, behind its INIT if that is still
    /// pending. Returns false if the client is no longer registered.
    async fn send_to(&self, id: ClientId, message: &Message) -> Result<bool, ServerError> {
        let frame = message.encode()?;
        let mut shared = self.inner.shared.write().await;
        match shared.clients.iter_mut().find(|client| client.id == id) {
            Some(client) => {
                client.send_or_queue(frame);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Number of registered clients, including those still handshaking.
    pub async fn client_count(&self) -> usize {
        self.inner.shared.read().await.clients.len()
    }

    /// Run the handler for `name`.
    async fn invoke(&self, name: &str, args: Args) -> Result<Value, ServerError> {
        let handler = self
            .inner
            .config
            .handlers
            .get(name)
            .cloned()
            .ok_or_else(|| ServerError::UnknownAction(name.to_string()))?;

        // On its own task so a panicking handler only fails this action.
        match tokio::spawn(handler(self.clone(), args)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(ServerError::Handler {
                action: name.to_string(),
                source,
            }),
            Err(_) => Err(ServerError::HandlerPanicked(name.to_string())),
        }
    }

    /// Send INIT to a client whose baseline state has resolved. Returns
    /// false if the client went away while the baseline was computed; the
    /// caller must then drop it.
    async fn complete_handshake(&self, id: ClientId, base: State) -> bool {
        let mut shared = self.inner.shared.write().await;
        let Shared {
            clients, updates, ..
        } = &mut *shared;

        let Some(client) = clients.iter_mut().find(|client| client.id == id) else {
            return false;
        };
        if client.sender.is_closed() {
            tracing::debug!(client = %id, "client left during init, not sending INIT");
            return false;
        }

        let state = State::fold(base, updates.iter());
        let init = match (Message::Init { state }).encode() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(client = %id, "{e}");
                return false;
            }
        };

        let queued = match std::mem::replace(&mut client.handshake, Handshake::Live) {
            Handshake::Pending(queued) => queued,
            Handshake::Live => Vec::new(),
        };
        std::iter::once(init)
            .chain(queued)
            .all(|frame| client.sender.send_frame(frame).is_ok())
    }

    async fn unregister(&self, id: ClientId) {
        let mut shared = self.inner.shared.write().await;
        shared.clients.retain(|client| client.id != id);
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("name", &self.inner.name)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

fn deliver(client: &ClientEntry, frame: String) {
    if client.sender.send_frame(frame).is_err() {
        tracing::debug!(client = %client.id, "dropping frame for closed port");
    }
}

impl ClientEntry {
    fn send_or_queue(&mut self, frame: String) {
        if let Handshake::Pending(queued) = &mut self.handshake {
            queued.push(frame);
            return;
        }
        deliver(self, frame);
    }
}

async fn handle_connection(server: Server, id: ClientId, mut receiver: PortReceiver) {
    let mut init = (server.inner.config.init)();
    let mut initializing = true;

    loop {
        tokio::select! {
            result = &mut init, if initializing => {
                initializing = false;
                match result {
                    Ok(base) => {
                        if !server.complete_handshake(id, base).await {
                            break;
                        }
                        if let Some(hook) = &server.inner.config.on_connect {
                            hook();
                        }
                    }
                    Err(source) => {
                        tracing::warn!(client = %id, "failed to produce initial state: {source}");
                        break;
                    }
                }
            }

            frame = receiver.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = dispatch(&server, id, &frame).await {
                    match e {
                        ServerError::Message(_) | ServerError::UnexpectedMessage(_) => {
                            tracing::warn!(client = %id, "{e}");
                        }
                        _ => tracing::error!(client = %id, "{e}"),
                    }
                }
            }
        }
    }

    server.unregister(id).await;
    tracing::debug!(client = %id, "client disconnected");
    if let Some(hook) = &server.inner.config.on_disconnect {
        hook();
    }
}

/// Handle one inbound frame to completion.
///
/// Failures of correlated actions are answered with an ACTION_RESULT and
/// count as handled; uncorrelated failures are returned to the caller.
async fn dispatch(server: &Server, id: ClientId, frame: &str) -> Result<(), ServerError> {
    let (uid, name, args) = match Message::decode(frame)? {
        Message::Action { uid, name, args } => (uid, name, args),
        other => return Err(ServerError::UnexpectedMessage(other.kind())),
    };
    tracing::info!(?args, "< {name}");

    let outcome = server.invoke(&name, Args::new(args)).await;
    let Some(uid) = uid else {
        return outcome.map(drop);
    };

    let reply = match outcome {
        Ok(result) => Message::action_ok(uid, result),
        Err(e) => {
            tracing::debug!(uid, "{e}");
            Message::action_err(uid, e.remote_message())
        }
    };
    if !server.send_to(id, &reply).await? {
        tracing::debug!(uid, "client left before the result of {name}");
    }
    Ok(())
}

/// Server-side failure.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Unknown action: {0}")]
    UnknownAction(String),
    #[error("action '{action}' failed: {source}")]
    Handler {
        action: String,
        #[source]
        source: BoxError,
    },
    #[error("action '{0}' panicked")]
    HandlerPanicked(String),
    #[error("unexpected {0} message from client")]
    UnexpectedMessage(&'static str),
    #[error(transparent)]
    Message(#[from] MessageError),
}

impl ServerError {
    /// The text reported to the client in an ACTION_RESULT error field.
    pub fn remote_message(&self) -> String {
        match self {
            ServerError::Handler { source, .. } => source.to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::{Notify, mpsc};
    use tokio::time::timeout;

    struct RawClient {
        tx: PortSender,
        rx: PortReceiver,
    }

    impl RawClient {
        async fn connect(server: &Server) -> Self {
            let (local, remote) = Port::pair(server.name());
            server.attach(remote).await;
            let (tx, rx) = local.split();
            Self { tx, rx }
        }

        fn send(&self, message: Message) {
            self.tx.send(&message).unwrap();
        }

        async fn next(&mut self) -> Message {
            let frame = timeout(Duration::from_secs(1), self.rx.recv())
                .await
                .expect("timed out waiting for a message")
                .expect("port closed");
            Message::decode(&frame).unwrap()
        }
    }

    fn state(value: Value) -> State {
        State::try_from(value).unwrap()
    }

    async fn echo(_server: Server, args: Args) -> Result<Value, BoxError> {
        Ok(args.raw(0).cloned().unwrap_or(Value::Null))
    }

    async fn fail(_server: Server, _args: Args) -> Result<Value, BoxError> {
        Err("nope".into())
    }

    async fn boom(_server: Server, _args: Args) -> Result<Value, BoxError> {
        panic!("boom")
    }

    fn counter_config() -> ServerConfig {
        ServerConfig::with_state(state(json!({"count": 0})))
            .handler("echo", echo)
            .handler("fail", fail)
            .handler("boom", boom)
    }

    fn counter() -> Server {
        Server::new("counter", counter_config())
    }

    /// A server whose baseline state resolves only once `gate` is notified.
    fn gated(gate: Arc<Notify>) -> ServerConfig {
        ServerConfig::new(move || {
            let gate = gate.clone();
            async move {
                gate.notified().await;
                Ok::<_, BoxError>(state(json!({"count": 0})))
            }
        })
    }

    /// Signals once per client the server has dropped.
    fn departures(config: ServerConfig) -> (ServerConfig, mpsc::UnboundedReceiver<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let config = config.on_disconnect(move || {
            let _ = tx.send(());
        });
        (config, rx)
    }

    async fn departed(rx: &mut mpsc::UnboundedReceiver<()>) {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for a departure")
            .expect("server gone");
    }

    #[tokio::test]
    async fn init_folds_buffered_updates() {
        let server = counter();
        server
            .update_state(Update::new().set("count", 1))
            .await
            .unwrap();
        server
            .update_state(Update::new().set("label", "one"))
            .await
            .unwrap();

        let mut client = RawClient::connect(&server).await;
        assert_eq!(
            client.next().await,
            Message::Init {
                state: state(json!({"count": 1, "label": "one"}))
            }
        );

        server
            .update_state(Update::new().set("count", 2))
            .await
            .unwrap();
        assert_eq!(
            client.next().await,
            Message::Update {
                update: Update::new().set("count", 2)
            }
        );
    }

    #[tokio::test]
    async fn init_is_first_even_while_init_is_pending() {
        let gate = Arc::new(Notify::new());
        let server = Server::new("counter", gated(gate.clone()));

        let mut client = RawClient::connect(&server).await;
        server
            .update_state(Update::new().set("count", 5))
            .await
            .unwrap();
        server.send_directive("ping", json!(1)).await.unwrap();
        gate.notify_one();

        assert_eq!(
            client.next().await,
            Message::Init {
                state: state(json!({"count": 5}))
            }
        );
        assert_eq!(
            client.next().await,
            Message::Directive {
                name: "ping".into(),
                payload: json!(1)
            }
        );
    }

    #[tokio::test]
    async fn client_leaving_during_init_gets_no_init() {
        let gate = Arc::new(Notify::new());
        let connected = Arc::new(AtomicUsize::new(0));
        let disconnected = Arc::new(AtomicUsize::new(0));
        let config = {
            let connected = connected.clone();
            let disconnected = disconnected.clone();
            gated(gate.clone())
                .on_connect(move || {
                    connected.fetch_add(1, Ordering::SeqCst);
                })
                .on_disconnect(move || {
                    disconnected.fetch_add(1, Ordering::SeqCst);
                })
        };
        let (config, mut gone) = departures(config);
        let server = Server::new("counter", config);

        let client = RawClient::connect(&server).await;
        assert_eq!(server.client_count().await, 1);
        drop(client);
        gate.notify_one();

        departed(&mut gone).await;
        assert_eq!(server.client_count().await, 0);
        assert_eq!(connected.load(Ordering::SeqCst), 0);
        assert_eq!(disconnected.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn closed_port_is_detected_after_init() {
        let gate = Arc::new(Notify::new());
        let connected = Arc::new(AtomicUsize::new(0));
        let config = {
            let connected = connected.clone();
            gated(gate.clone()).on_connect(move || {
                connected.fetch_add(1, Ordering::SeqCst);
            })
        };
        let (config, mut gone) = departures(config);
        let server = Server::new("counter", config);

        // The client stops listening but its sending half stays open, so only
        // the liveness check after init can notice.
        let RawClient { tx, rx } = RawClient::connect(&server).await;
        drop(rx);
        gate.notify_one();

        departed(&mut gone).await;
        assert_eq!(connected.load(Ordering::SeqCst), 0);
        assert_eq!(server.client_count().await, 0);

        // Nothing is queued for the dropped client any more.
        server.send_directive("ping", json!(1)).await.unwrap();
        assert_eq!(server.client_count().await, 0);
        drop(tx);
    }

    #[tokio::test]
    async fn result_of_a_call_during_init_follows_init() {
        let gate = Arc::new(Notify::new());
        let config = {
            let release = gate.clone();
            gated(gate.clone()).handler("release", move |server: Server, args: Args| {
                let release = release.clone();
                async move {
                    let count: i64 = args.get(0)?;
                    server.update_state(Update::new().set("count", count)).await?;
                    // Init can only finish once this handler has returned.
                    release.notify_one();
                    Ok::<_, BoxError>(json!(count))
                }
            })
        };
        let server = Server::new("counter", config);

        let mut client = RawClient::connect(&server).await;
        client.send(Message::Action {
            uid: Some(1),
            name: "release".into(),
            args: vec![json!(3)],
        });

        assert_eq!(
            client.next().await,
            Message::Init {
                state: state(json!({"count": 3}))
            }
        );
        assert_eq!(client.next().await, Message::action_ok(1, json!(3)));
    }

    #[tokio::test]
    async fn correlated_results() {
        let server = counter();
        let mut client = RawClient::connect(&server).await;
        assert!(matches!(client.next().await, Message::Init { .. }));

        client.send(Message::Action {
            uid: Some(1),
            name: "echo".into(),
            args: vec![json!(3)],
        });
        assert_eq!(client.next().await, Message::action_ok(1, json!(3)));

        client.send(Message::Action {
            uid: Some(2),
            name: "missing".into(),
            args: vec![],
        });
        assert_eq!(
            client.next().await,
            Message::action_err(2, "Unknown action: missing")
        );

        client.send(Message::Action {
            uid: Some(3),
            name: "fail".into(),
            args: vec![],
        });
        assert_eq!(client.next().await, Message::action_err(3, "nope"));

        client.send(Message::Action {
            uid: Some(4),
            name: "boom".into(),
            args: vec![],
        });
        assert_eq!(
            client.next().await,
            Message::action_err(4, "action 'boom' panicked")
        );
    }

    #[tokio::test]
    async fn uncorrelated_failures_keep_serving() {
        let server = counter();
        let mut client = RawClient::connect(&server).await;
        assert!(matches!(client.next().await, Message::Init { .. }));

        client.send(Message::Action {
            uid: None,
            name: "missing".into(),
            args: vec![],
        });
        client.send(Message::Directive {
            name: "bogus".into(),
            payload: Value::Null,
        });
        client.tx.send_frame("not json".into()).unwrap();
        client.send(Message::Action {
            uid: Some(9),
            name: "echo".into(),
            args: vec![json!("still here")],
        });

        assert_eq!(client.next().await, Message::action_ok(9, json!("still here")));
    }

    #[tokio::test]
    async fn disconnected_clients_leave_the_registry() {
        let (config, mut gone) = departures(counter_config());
        let server = Server::new("counter", config);
        let mut stays = RawClient::connect(&server).await;
        let leaves = RawClient::connect(&server).await;
        assert!(matches!(stays.next().await, Message::Init { .. }));
        assert_eq!(server.client_count().await, 2);

        drop(leaves);
        departed(&mut gone).await;
        assert_eq!(server.client_count().await, 1);

        server
            .update_state(Update::new().set("count", 1))
            .await
            .unwrap();
        assert_eq!(
            stays.next().await,
            Message::Update {
                update: Update::new().set("count", 1)
            }
        );
    }

    struct Queue(Vec<Port>);

    #[async_trait::async_trait]
    impl Acceptor for Queue {
        async fn accept(&mut self) -> Option<Port> {
            self.0.pop()
        }
    }

    #[tokio::test]
    async fn serve_ignores_ports_for_other_endpoints() {
        let server = counter();
        let (other, other_remote) = Port::pair("timer");
        let (ours, ours_remote) = Port::pair("counter");

        server
            .serve(Queue(vec![ours_remote, other_remote]))
            .await
            .unwrap();
        assert_eq!(server.client_count().await, 1);

        let (_tx, mut rx) = other.split();
        assert_eq!(rx.recv().await, None);

        let (_tx, mut rx) = ours.split();
        let frame = timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(Message::decode(&frame).unwrap(), Message::Init { .. }));
    }

    #[tokio::test]
    async fn create_serves_hub_ports() {
        use uiport_core::{Connector, Hub};

        let hub = Hub::new();
        let server = Server::create(
            "counter",
            ServerConfig::with_state(State::new()),
            hub.listen("counter"),
        );

        let port = hub.open("counter").await.unwrap();
        let (_tx, mut rx) = port.split();
        let frame = timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            Message::decode(&frame).unwrap(),
            Message::Init {
                state: State::new()
            }
        );
        assert_eq!(server.client_count().await, 1);
    }
}
