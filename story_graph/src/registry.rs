//! Registry - a generic indexed collection used for graph contents and
//! template libraries, plus the criteria and path types used to query it.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::entities::{Entity, Uid};
use crate::error::GraphError;
use crate::provision::ProvisionKey;

/// Hierarchical address built from scope labels, e.g. `town/market/stall`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopePath(Vec<String>);

impl ScopePath {
    /// The empty (global) scope.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn new(segments: Vec<String>) -> Self {
        Self(segments)
    }

    /// Parse a `/`-separated path; empty segments are dropped.
    pub fn parse(path: &str) -> Self {
        Self(
            path.split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn push(&mut self, segment: impl Into<String>) {
        self.0.push(segment.into());
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn starts_with(&self, prefix: &ScopePath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Number of leading segments shared with `other`.
    pub fn common_prefix_len(&self, other: &ScopePath) -> usize {
        self.0
            .iter()
            .zip(other.0.iter())
            .take_while(|(a, b)| a == b)
            .count()
    }

    /// The path without its last segment.
    pub fn parent(&self) -> ScopePath {
        let mut segments = self.0.clone();
        segments.pop();
        Self(segments)
    }
}

impl std::fmt::Display for ScopePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

/// A path matcher with at most one wildcard, which must be the last segment.
///
/// `town/market` matches exactly that path; `town/*` matches any path below
/// `town` (one or more further segments).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathPattern {
    prefix: Vec<String>,
    wildcard: bool,
}

impl PathPattern {
    pub fn parse(pattern: &str) -> Result<Self, GraphError> {
        let mut segments: Vec<String> = pattern
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let wildcard = segments.last().map(|s| s == "*").unwrap_or(false);
        if wildcard {
            segments.pop();
        }
        if segments.iter().any(|s| s.contains('*')) {
            return Err(GraphError::InvalidPathPattern(pattern.to_string()));
        }

        Ok(Self {
            prefix: segments,
            wildcard,
        })
    }

    pub fn matches(&self, path: &ScopePath) -> bool {
        let segments = path.segments();
        if self.wildcard {
            segments.len() > self.prefix.len() && segments.starts_with(&self.prefix)
        } else {
            segments == self.prefix.as_slice()
        }
    }

    /// Literal segments in the pattern; more literals means more specific.
    pub fn specificity(&self) -> usize {
        self.prefix.len()
    }
}

impl std::fmt::Display for PathPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut text = self.prefix.join("/");
        if self.wildcard {
            if !text.is_empty() {
                text.push('/');
            }
            text.push('*');
        }
        write!(f, "{}", text)
    }
}

impl Serialize for PathPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PathPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        PathPattern::parse(&text).map_err(D::Error::custom)
    }
}

/// A conjunction of filters over registry entries. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criteria {
    pub label: Option<String>,
    /// Entity type (`is_instance`).
    pub kind: Option<String>,
    pub provides: Option<ProvisionKey>,
    /// Required subset of the entity's tags.
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub path: Option<PathPattern>,
}

impl Criteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn provides(mut self, key: ProvisionKey) -> Self {
        self.provides = Some(key);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn path(mut self, pattern: PathPattern) -> Self {
        self.path = Some(pattern);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Test an entity. `path` is the entity's scope path when the caller can
    /// compute it; a path pattern never matches an entity without one.
    pub fn matches<T: Entity + ?Sized>(&self, item: &T, path: Option<&ScopePath>) -> bool {
        if let Some(label) = &self.label {
            if item.label() != Some(label.as_str()) {
                return false;
            }
        }
        if let Some(kind) = &self.kind {
            if item.kind() != kind.as_str() {
                return false;
            }
        }
        if let Some(key) = &self.provides {
            if !item.provides_key(key) {
                return false;
            }
        }
        if !item.has_tags(&self.tags) {
            return false;
        }
        if let Some(pattern) = &self.path {
            match path {
                Some(path) => pattern.matches(path),
                None => false,
            }
        } else {
            true
        }
    }
}

/// Insertion-ordered collection of entities keyed by [`Uid`].
///
/// Iteration order is insertion order, which doubles as the deterministic
/// tie-breaker for resolution.
#[derive(Debug, Clone)]
pub struct Registry<T> {
    items: BTreeMap<u64, T>,
    index: HashMap<Uid, u64>,
    next_seq: u64,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            items: BTreeMap::new(),
            index: HashMap::new(),
            next_seq: 0,
        }
    }
}

impl<T: Entity> Registry<T> {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entity; fails if its UID is already present.
    pub fn add(&mut self, item: T) -> Result<Uid, GraphError> {
        let uid = item.uid();
        if self.index.contains_key(&uid) {
            return Err(GraphError::DuplicateId(uid));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.index.insert(uid, seq);
        self.items.insert(seq, item);
        Ok(uid)
    }

    pub fn get(&self, uid: Uid) -> Option<&T> {
        self.index.get(&uid).and_then(|seq| self.items.get(seq))
    }

    pub fn get_mut(&mut self, uid: Uid) -> Option<&mut T> {
        match self.index.get(&uid) {
            Some(seq) => self.items.get_mut(seq),
            None => None,
        }
    }

    pub fn contains(&self, uid: Uid) -> bool {
        self.index.contains_key(&uid)
    }

    pub fn remove(&mut self, uid: Uid) -> Option<T> {
        let seq = self.index.remove(&uid)?;
        self.items.remove(&seq)
    }

    /// Position of an entity in insertion order (lower is older).
    pub fn insertion_order(&self, uid: Uid) -> Option<u64> {
        self.index.get(&uid).copied()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.values()
    }

    /// Consume the registry, yielding entities in insertion order.
    pub fn into_vec(self) -> Vec<T> {
        self.items.into_values().collect()
    }

    /// Entities matching every criterion, in insertion order.
    pub fn find_all(&self, criteria: &Criteria) -> Vec<&T> {
        self.items
            .values()
            .filter(|item| criteria.matches(*item, item.path().as_ref()))
            .collect()
    }

    /// The oldest entity matching every criterion.
    pub fn find_one(&self, criteria: &Criteria) -> Option<&T> {
        self.items
            .values()
            .find(|item| criteria.matches(*item, item.path().as_ref()))
    }

    /// Entities matching an arbitrary predicate.
    pub fn find_by<F>(&self, predicate: F) -> Vec<&T>
    where
        F: Fn(&T) -> bool,
    {
        self.items.values().filter(|item| predicate(*item)).collect()
    }

    pub fn find_by_label(&self, label: &str) -> Option<&T> {
        self.items.values().find(|item| item.label() == Some(label))
    }

    pub fn find_by_tags(&self, tags: &BTreeSet<String>) -> Vec<&T> {
        self.find_by(|item| item.has_tags(tags))
    }

    pub fn find_providers(&self, key: &ProvisionKey) -> Vec<&T> {
        self.find_by(|item| item.provides_key(key))
    }
}

impl<T: Serialize> Serialize for Registry<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.items.values())
    }
}

impl<'de, T> Deserialize<'de> for Registry<T>
where
    T: Deserialize<'de> + Entity,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let items = Vec::<T>::deserialize(deserializer)?;
        let mut registry = Registry::new();
        for item in items {
            registry.add(item).map_err(D::Error::custom)?;
        }
        Ok(registry)
    }
}
