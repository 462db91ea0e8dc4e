//! Name → handler registries for actions and exchangers.
//!
//! A registry is owned by the server instance and shared by every call.
//! Writes take the lock exclusively; reads clone the `Arc` out, so a
//! dispatch that raced a re-registration keeps running the handler it
//! resolved while later lookups see the replacement.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::action::Action;
use crate::exchange::Exchanger;

/// Anything stored in a registry: a unique key plus a description.
pub trait Named: Send + Sync {
    /// Registry key. Actions use their name, exchangers their command.
    fn name(&self) -> &str;

    fn description(&self) -> &str;
}

/// Thread-safe mapping with last-write-wins registration.
pub struct Registry<H: Named + ?Sized> {
    entries: RwLock<HashMap<String, Arc<H>>>,
}

impl<H: Named + ?Sized> Registry<H> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler under its own name, returning the one it replaced.
    pub fn register(&self, handler: Arc<H>) -> Option<Arc<H>> {
        let name = handler.name().to_string();
        let previous = self.entries.write().insert(name.clone(), handler);
        if previous.is_some() {
            tracing::debug!(name = %name, "registry entry replaced");
        }
        previous
    }

    /// Exact, case-sensitive lookup.
    pub fn lookup(&self, name: &str) -> Option<Arc<H>> {
        self.entries.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    /// `(name, description)` pairs sorted by name, taken from one snapshot.
    pub fn list(&self) -> Vec<(String, String)> {
        let mut listed: Vec<(String, String)> = self
            .entries
            .read()
            .values()
            .map(|h| (h.name().to_string(), h.description().to_string()))
            .collect();
        listed.sort();
        listed
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<H: Named + ?Sized> Default for Registry<H> {
    fn default() -> Self {
        Self::new()
    }
}

pub type ActionRegistry = Registry<dyn Action>;
pub type ExchangerRegistry = Registry<dyn Exchanger>;
