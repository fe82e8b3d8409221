//! Synchronized state and shallow patches.
//!
//! Both are plain JSON objects. Applications usually work with their own
//! structs and convert at the edges with [`State::from_typed`] and
//! [`State::to_typed`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The full synchronized state: a mapping of named fields to values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State(Map<String, Value>);

/// A partial state. Applying it replaces only the fields it names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Update(Map<String, Value>);

impl State {
    /// An empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a state from any value that serializes to a JSON object.
    pub fn from_typed<T: Serialize>(value: &T) -> Result<Self, StateError> {
        object(serde_json::to_value(value)?).map(Self)
    }

    /// Deserialize the state into an application type.
    pub fn to_typed<T: DeserializeOwned>(&self) -> Result<T, StateError> {
        Ok(serde_json::from_value(Value::Object(self.0.clone()))?)
    }

    /// Look up a top-level field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Shallow merge: every field named by `update` is replaced wholesale,
    /// nested objects included. Other fields are left untouched.
    pub fn apply(&mut self, update: &Update) {
        for (field, value) in &update.0 {
            self.0.insert(field.clone(), value.clone());
        }
    }

    /// Apply `updates` to `base` in order.
    pub fn fold<'a>(mut base: State, updates: impl IntoIterator<Item = &'a Update>) -> State {
        for update in updates {
            base.apply(update);
        }
        base
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl Update {
    /// An empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field assignment.
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Build a patch from any value that serializes to a JSON object.
    ///
    /// Fields serialized as `null` are kept: they overwrite the field with
    /// `null` on the receiving side.
    pub fn from_typed<T: Serialize>(value: &T) -> Result<Self, StateError> {
        object(serde_json::to_value(value)?).map(Self)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl From<Map<String, Value>> for State {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Map<String, Value>> for Update {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for State {
    type Error = StateError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        object(value).map(Self)
    }
}

impl TryFrom<Value> for Update {
    type Error = StateError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        object(value).map(Self)
    }
}

fn object(value: Value) -> Result<Map<String, Value>, StateError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(StateError::NotAnObject(kind(&other))),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Error converting between application types and state.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("state must be a JSON object, got {0}")]
    NotAnObject(&'static str),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state(value: Value) -> State {
        State::try_from(value).unwrap()
    }

    #[test]
    fn apply_replaces_named_fields_only() {
        let mut s = state(json!({"count": 0, "label": "a"}));
        s.apply(&Update::new().set("count", 3));
        assert_eq!(s, state(json!({"count": 3, "label": "a"})));
    }

    #[test]
    fn apply_is_shallow() {
        let mut s = state(json!({"nested": {"a": 1, "b": 2}}));
        s.apply(&Update::new().set("nested", json!({"a": 5})));
        assert_eq!(s.get("nested"), Some(&json!({"a": 5})));
    }

    #[test]
    fn fold_is_last_write_wins() {
        let updates = [
            Update::new().set("count", 1),
            Update::new().set("other", true),
            Update::new().set("count", 2),
        ];
        let s = State::fold(state(json!({"count": 0})), &updates);
        assert_eq!(s, state(json!({"count": 2, "other": true})));
    }

    #[test]
    fn typed_roundtrip() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Counter {
            count: u32,
        }

        let s = State::from_typed(&Counter { count: 4 }).unwrap();
        assert_eq!(s.get("count"), Some(&json!(4)));
        assert_eq!(s.to_typed::<Counter>().unwrap(), Counter { count: 4 });
    }

    #[test]
    fn non_object_rejected() {
        let err = State::try_from(json!([1, 2])).unwrap_err();
        assert!(matches!(err, StateError::NotAnObject("array")));
        assert!(Update::from_typed(&5).is_err());
    }
}
