//! Callable-by-name action surface.
//!
//! Action names are not declared up front: any name yields an invoker, built
//! on first use and cached for the lifetime of the surface.

use crate::{Client, ClientError};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Invokers for a client's actions, keyed by name.
#[derive(Debug, Clone)]
pub struct Actions {
    client: Client,
    cache: Arc<Mutex<HashMap<String, Action>>>,
}

/// An invoker for one named action.
#[derive(Debug, Clone)]
pub struct Action {
    name: Arc<str>,
    client: Client,
}

impl Actions {
    pub(crate) fn new(client: Client) -> Self {
        Self {
            client,
            cache: Arc::default(),
        }
    }

    /// The invoker for action `name`.
    pub fn get(&self, name: &str) -> Action {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache
            .entry(name.to_string())
            .or_insert_with(|| Action {
                name: Arc::from(name),
                client: self.client.clone(),
            })
            .clone()
    }

    /// Shorthand for `get(name).call(args)`.
    pub async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, ClientError> {
        self.get(name).call(args).await
    }
}

impl Action {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send the action and wait for its result.
    pub async fn call(&self, args: Vec<Value>) -> Result<Value, ClientError> {
        self.client.call(&self.name, args).await
    }

    /// Like [`Action::call`], deserializing the result into `T`.
    pub async fn call_as<T: DeserializeOwned>(&self, args: Vec<Value>) -> Result<T, ClientError> {
        let value = self.call(args).await?;
        serde_json::from_value(value).map_err(ClientError::Decode)
    }
}
