#![deny(missing_docs)]

//! Transactional access to a persisted, structured object.
//!
//! A [`StateHandler`] knows how to decode, encode and compare one kind of
//! object (for example the descriptor of an artifact set). A [`State`] keeps
//! the object as it was loaded next to the object as it is being modified,
//! so that a commit can skip rewriting storage when nothing changed.
//!
//! ```
//! # use ocm_state::{State, StateError, StateHandler};
//! struct Lines;
//!
//! impl StateHandler for Lines {
//!     type Object = Vec<String>;
//!
//!     fn initial(&self) -> Self::Object {
//!         Vec::new()
//!     }
//!
//!     fn decode(&self, data: &[u8]) -> Result<Self::Object, StateError> {
//!         let text = std::str::from_utf8(data).map_err(StateError::decode)?;
//!         Ok(text.lines().map(str::to_string).collect())
//!     }
//!
//!     fn encode(&self, object: &Self::Object) -> Result<Vec<u8>, StateError> {
//!         Ok(object.iter().map(|l| format!("{l}\n")).collect::<String>().into_bytes())
//!     }
//!
//!     fn equivalent(&self, a: &Self::Object, b: &Self::Object) -> bool {
//!         a == b
//!     }
//! }
//!
//! let mut state = State::open(Lines, Some(b"a\nb\n".as_slice())).unwrap();
//! assert!(state.encode_if_changed().unwrap().is_none());
//!
//! state.get_mut().push("c".to_string());
//! assert_eq!(state.encode_if_changed().unwrap().unwrap(), b"a\nb\nc\n");
//! ```

mod store;

pub use store::{FileStateStore, StateStore};

/// A boxed error produced by a [`StateHandler`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// An error that can occur when loading or storing state.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// The persisted bytes could not be decoded.
    #[error("failed to decode state")]
    Decode(#[source] BoxError),

    /// The object could not be encoded.
    #[error("failed to encode state")]
    Encode(#[source] BoxError),

    /// The backing storage could not be read or written.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StateError {
    /// Wraps an error as a decode error.
    pub fn decode(err: impl Into<BoxError>) -> Self {
        StateError::Decode(err.into())
    }

    /// Wraps an error as an encode error.
    pub fn encode(err: impl Into<BoxError>) -> Self {
        StateError::Encode(err.into())
    }
}

/// The capabilities needed to handle one kind of persisted object.
///
/// Implementations must make sure that an object survives an encode/decode
/// round trip: `equivalent(&decode(&encode(x)?)?, x)` holds for every valid
/// `x`.
pub trait StateHandler {
    /// The in-memory representation of the state.
    type Object: Clone;

    /// The value used when no persisted state exists yet.
    fn initial(&self) -> Self::Object;

    /// Decodes persisted bytes.
    fn decode(&self, data: &[u8]) -> Result<Self::Object, StateError>;

    /// Encodes an object into bytes for persistence.
    fn encode(&self, object: &Self::Object) -> Result<Vec<u8>, StateError>;

    /// Returns true if both objects describe the same state.
    fn equivalent(&self, a: &Self::Object, b: &Self::Object) -> bool;
}

/// A loaded object together with a snapshot of what is persisted.
pub struct State<H: StateHandler> {
    handler: H,
    persisted: Option<H::Object>,
    current: H::Object,
}

impl<H: StateHandler> State<H> {
    /// Decodes `data` or, if there is no persisted state, starts from the
    /// handler's initial value.
    pub fn open(handler: H, data: Option<&[u8]>) -> Result<Self, StateError> {
        let persisted = data.map(|data| handler.decode(data)).transpose()?;
        let current = match &persisted {
            Some(object) => object.clone(),
            None => handler.initial(),
        };
        Ok(Self {
            handler,
            persisted,
            current,
        })
    }

    /// Loads the state from a store.
    pub fn load(handler: H, store: &impl StateStore) -> Result<Self, StateError> {
        let data = store.load()?;
        Self::open(handler, data.as_deref())
    }

    /// Returns the handler.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Returns the current object.
    pub fn get(&self) -> &H::Object {
        &self.current
    }

    /// Returns the current object for modification.
    pub fn get_mut(&mut self) -> &mut H::Object {
        &mut self.current
    }

    /// Returns the object as it was last persisted, if anything was.
    pub fn persisted(&self) -> Option<&H::Object> {
        self.persisted.as_ref()
    }

    /// Returns true if the current object differs from what is persisted.
    /// State that was never persisted always counts as changed.
    pub fn has_changed(&self) -> bool {
        match &self.persisted {
            Some(persisted) => !self.handler.equivalent(persisted, &self.current),
            None => true,
        }
    }

    /// Encodes the current object if it has to be written.
    pub fn encode_if_changed(&self) -> Result<Option<Vec<u8>>, StateError> {
        if !self.has_changed() {
            return Ok(None);
        }
        self.handler.encode(&self.current).map(Some)
    }

    /// Records that the current object has been written.
    pub fn mark_persisted(&mut self) {
        self.persisted = Some(self.current.clone());
    }

    /// Writes the current object to `store` if it changed and returns
    /// whether anything was written.
    pub fn commit(&mut self, store: &impl StateStore) -> Result<bool, StateError> {
        match self.encode_if_changed()? {
            Some(data) => {
                store.store(&data)?;
                self.mark_persisted();
                Ok(true)
            }
            None => {
                tracing::debug!("state unchanged, skipping rewrite");
                Ok(false)
            }
        }
    }

    /// Discards all modifications since the last commit.
    pub fn reset(&mut self) {
        self.current = match &self.persisted {
            Some(object) => object.clone(),
            None => self.handler.initial(),
        };
    }

    /// Consumes the state, returning the current object.
    pub fn into_inner(self) -> H::Object {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::{json, Map, Value};

    /// Stores a JSON object. Objects are compared by value, so key order in
    /// the persisted bytes does not matter.
    struct JsonHandler;

    impl StateHandler for JsonHandler {
        type Object = Map<String, Value>;

        fn initial(&self) -> Self::Object {
            Map::new()
        }

        fn decode(&self, data: &[u8]) -> Result<Self::Object, StateError> {
            serde_json::from_slice(data).map_err(StateError::decode)
        }

        fn encode(&self, object: &Self::Object) -> Result<Vec<u8>, StateError> {
            serde_json::to_vec(object).map_err(StateError::encode)
        }

        fn equivalent(&self, a: &Self::Object, b: &Self::Object) -> bool {
            a == b
        }
    }

    #[test]
    fn test_initial_state_counts_as_changed() {
        let state = State::open(JsonHandler, None).unwrap();
        assert!(state.get().is_empty());
        assert!(state.has_changed());
        assert_eq!(state.encode_if_changed().unwrap().unwrap(), b"{}");
    }

    #[test]
    fn test_unchanged_state_is_not_encoded() {
        let state = State::open(JsonHandler, Some(br#"{"b": 1, "a": 2}"#.as_slice())).unwrap();
        assert!(!state.has_changed());
        assert!(state.encode_if_changed().unwrap().is_none());
    }

    #[test]
    fn test_modify_and_mark_persisted() {
        let mut state = State::open(JsonHandler, Some(br#"{"a": 1}"#.as_slice())).unwrap();
        state.get_mut().insert("b".to_string(), json!(2));
        assert!(state.has_changed());

        let data = state.encode_if_changed().unwrap().unwrap();
        assert_eq!(data, br#"{"a":1,"b":2}"#);
        state.mark_persisted();
        assert!(!state.has_changed());

        // Reverting to the persisted content is not a change.
        state.get_mut().insert("b".to_string(), json!(3));
        state.reset();
        assert!(!state.has_changed());
        assert_eq!(state.get().get("b"), Some(&json!(2)));
    }

    #[test]
    fn test_round_trip_preserves_equivalence() {
        let object = json!({"manifests": [{"digest": "sha256:abc", "tags": ["v1"]}]});
        let Value::Object(object) = object else {
            unreachable!()
        };
        let encoded = JsonHandler.encode(&object).unwrap();
        let decoded = JsonHandler.decode(&encoded).unwrap();
        assert!(JsonHandler.equivalent(&decoded, &object));
    }

    #[test]
    fn test_decode_error() {
        assert_matches!(
            State::open(JsonHandler, Some(b"not json".as_slice())).err(),
            Some(StateError::Decode(_))
        );
    }
}
