//! Ledger - the persistent state of one story, and the key-value store seam
//! it is saved through.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use story_graph::{EdgeRemovalPolicy, Graph, GraphError, Node, Uid};

use crate::error::{EngineError, PersistenceError};
use crate::frame::CallStack;
use crate::journal::Journal;

/// Opaque key-value storage. Backends live outside the core.
pub trait KvStore {
    fn get(&self, key: Uid) -> Result<Option<Vec<u8>>, PersistenceError>;
    fn put(&mut self, key: Uid, value: Vec<u8>) -> Result<(), PersistenceError>;
    fn delete(&mut self, key: Uid) -> Result<(), PersistenceError>;
}

/// Process-local store, mostly for tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    entries: HashMap<Uid, Vec<u8>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KvStore for InMemoryStore {
    fn get(&self, key: Uid) -> Result<Option<Vec<u8>>, PersistenceError> {
        Ok(self.entries.get(&key).cloned())
    }

    fn put(&mut self, key: Uid, value: Vec<u8>) -> Result<(), PersistenceError> {
        self.entries.insert(key, value);
        Ok(())
    }

    fn delete(&mut self, key: Uid) -> Result<(), PersistenceError> {
        self.entries.remove(&key);
        Ok(())
    }
}

/// Graph, journal and cursor of one story.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ledger {
    pub uid: Uid,
    pub graph: Graph,
    pub journal: Journal,
    pub cursor: Uid,
    #[serde(default)]
    pub call_stack: CallStack,
    /// Number of turns run so far.
    pub step: u64,
}

impl Ledger {
    /// Create a ledger with the cursor on `start`.
    pub fn new(graph: Graph, start: Uid) -> Result<Self, GraphError> {
        if !graph.contains_node(start) {
            return Err(GraphError::NodeNotFound(start));
        }
        Ok(Self {
            uid: Uid::new(),
            graph,
            journal: Journal::new(),
            cursor: start,
            call_stack: CallStack::new(),
            step: 0,
        })
    }

    pub fn cursor_node(&self) -> Option<&Node> {
        self.graph.node(self.cursor)
    }

    /// Remove a node from the story graph. The cursor node cannot be removed.
    pub fn remove_node(&mut self, uid: Uid, policy: EdgeRemovalPolicy) -> Result<Node, EngineError> {
        if uid == self.cursor {
            return Err(EngineError::CursorRemoval(uid));
        }
        Ok(self.graph.remove_node(uid, policy)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, PersistenceError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PersistenceError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Store under the ledger's own uid.
    pub fn save(&self, store: &mut dyn KvStore) -> Result<(), PersistenceError> {
        let bytes = self.to_bytes()?;
        debug!(ledger = %self.uid, bytes = bytes.len(), "saving ledger");
        store.put(self.uid, bytes)
    }

    pub fn load(store: &dyn KvStore, uid: Uid) -> Result<Self, PersistenceError> {
        let bytes = store
            .get(uid)?
            .ok_or_else(|| PersistenceError::NotFound(uid.to_string()))?;
        Self::from_bytes(&bytes)
    }

    pub fn delete(store: &mut dyn KvStore, uid: Uid) -> Result<(), PersistenceError> {
        store.delete(uid)
    }
}
