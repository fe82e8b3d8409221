//! Server configuration.

use crate::Server;
use crate::handler::{Args, HandlerFn, HookFn, InitFn};
use futures_util::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use uiport_core::{BoxError, State};

/// What a server needs to know: how to produce its baseline state, which
/// actions it serves, and optional connection hooks.
///
/// ```ignore
/// let config = ServerConfig::with_state(initial)
///     .on_connect(|| tracing::info!("ui attached"))
///     .handler("increment", increment);
/// ```
#[derive(Clone)]
pub struct ServerConfig {
    pub(crate) init: InitFn,
    pub(crate) on_connect: Option<HookFn>,
    pub(crate) on_disconnect: Option<HookFn>,
    pub(crate) handlers: HashMap<String, HandlerFn>,
}

impl ServerConfig {
    /// Configure with an asynchronous baseline-state producer. It runs once
    /// per connecting client.
    pub fn new<F, Fut>(init: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<State, BoxError>> + Send + 'static,
    {
        Self {
            init: Arc::new(move || init().boxed()),
            on_connect: None,
            on_disconnect: None,
            handlers: HashMap::new(),
        }
    }

    /// Configure with a fixed baseline state.
    pub fn with_state(state: State) -> Self {
        Self::new(move || {
            let state = state.clone();
            async move { Ok::<_, BoxError>(state) }
        })
    }

    /// Called after a client has been sent its initial state.
    pub fn on_connect(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(hook));
        self
    }

    /// Called whenever a client's port closes.
    pub fn on_disconnect(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(hook));
        self
    }

    /// Register the handler for action `name`. Action names are unique:
    /// registering a name again replaces the earlier handler.
    pub fn handler<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Server, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        let handler: HandlerFn = Arc::new(move |server, args| handler(server, args).boxed());
        self.handlers.insert(name.into(), handler);
        self
    }

    /// Whether an action named `name` is registered.
    pub fn handles(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut actions: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        actions.sort_unstable();
        f.debug_struct("ServerConfig")
            .field("actions", &actions)
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .finish()
    }
}
