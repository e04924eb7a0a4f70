//! Host facts gathered from a target system.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Fact key holding the host's own name, used as the cache identity when
/// facts accompany a probe.
pub const HOSTNAME_FACT: &str = "hostname";

/// Facts gathered from a host.
///
/// An ordered map of fact name to JSON value. Probecache treats the contents
/// as opaque except for [`HOSTNAME_FACT`], which scopes cached results to the
/// host the facts describe.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Facts {
    data: IndexMap<String, JsonValue>,
}

impl Facts {
    /// Create empty facts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create facts pre-populated with the host's name.
    pub fn with_name(name: impl Into<String>) -> Self {
        let mut facts = Self::new();
        facts.set(HOSTNAME_FACT, JsonValue::String(name.into()));
        facts
    }

    /// Set a fact.
    pub fn set(&mut self, key: impl Into<String>, value: JsonValue) {
        self.data.insert(key.into(), value);
    }

    /// Get a fact.
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.data.get(key)
    }

    /// Get a fact value as a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    /// The host's name, if these facts carry one.
    ///
    /// Must be stable across gathers for the same host; cached entries are
    /// scoped by it.
    pub fn name(&self) -> Option<&str> {
        self.get_str(HOSTNAME_FACT).filter(|s| !s.is_empty())
    }

    /// All facts.
    pub fn all(&self) -> &IndexMap<String, JsonValue> {
        &self.data
    }

    /// Number of facts.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether no facts have been gathered.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
