//! Action handler plumbing.

use crate::Server;
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use uiport_core::{BoxError, State};

pub(crate) type InitFn = Arc<dyn Fn() -> BoxFuture<'static, Result<State, BoxError>> + Send + Sync>;
pub(crate) type HandlerFn =
    Arc<dyn Fn(Server, Args) -> BoxFuture<'static, Result<Value, BoxError>> + Send + Sync>;
pub(crate) type HookFn = Arc<dyn Fn() + Send + Sync>;

/// Positional arguments of an action invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args(Vec<Value>);

impl Args {
    pub fn new(args: Vec<Value>) -> Self {
        Self(args)
    }

    /// Deserialize the argument at `index`.
    ///
    /// A missing trailing argument reads as `null`, so `Option<T>` parameters
    /// may be omitted by the caller.
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> Result<T, ArgError> {
        match self.0.get(index) {
            Some(value) => {
                T::deserialize(value).map_err(|source| ArgError::Invalid { index, source })
            }
            None => T::deserialize(&Value::Null).map_err(|_| ArgError::Missing(index)),
        }
    }

    /// The raw argument at `index`.
    pub fn raw(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<Value> {
        self.0
    }
}

/// Error reading an action argument.
#[derive(Debug, thiserror::Error)]
pub enum ArgError {
    #[error("missing argument {0}")]
    Missing(usize),
    #[error("invalid argument {index}: {source}")]
    Invalid {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn positional_access() {
        let args = Args::new(vec![json!(5), json!("five")]);
        assert_eq!(args.get::<i64>(0).unwrap(), 5);
        assert_eq!(args.get::<String>(1).unwrap(), "five");
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn missing_optional_reads_as_none() {
        let args = Args::default();
        assert_eq!(args.get::<Option<u32>>(0).unwrap(), None);
        assert!(matches!(args.get::<u32>(0), Err(ArgError::Missing(0))));
    }

    #[test]
    fn wrong_type_is_invalid() {
        let args = Args::new(vec![json!("five")]);
        assert!(matches!(
            args.get::<u32>(0),
            Err(ArgError::Invalid { index: 0, .. })
        ));
    }
}
