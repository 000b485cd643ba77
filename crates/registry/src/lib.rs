//! Keyed schema registries.
//!
//! Plain CRUD over named configuration schemas: exchange, strategy, frame,
//! risk, sizing, action, walker. The engine resolves everything by name
//! through a [`RegistrySet`] at construction time — an explicit keyed store
//! rather than ambient globals.

pub mod file;
pub mod schemas;

pub use file::SchemaFile;
pub use schemas::*;

use std::collections::HashMap;
use std::sync::RwLock;

use common::{Error, Result};

/// A named, keyed store of one schema kind.
pub struct SchemaRegistry<T: Clone> {
    kind: &'static str,
    items: RwLock<HashMap<String, T>>,
}

impl<T: Clone> SchemaRegistry<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            items: RwLock::new(HashMap::new()),
        }
    }

    /// Register a schema under a new name. Duplicate names are an error;
    /// use [`SchemaRegistry::override_schema`] to replace intentionally.
    pub fn add(&self, name: &str, schema: T) -> Result<()> {
        let mut items = self.items.write().expect("registry poisoned");
        if items.contains_key(name) {
            return Err(Error::Config(format!(
                "{} schema '{name}' is already registered",
                self.kind
            )));
        }
        items.insert(name.to_string(), schema);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<T> {
        self.items
            .read()
            .expect("registry poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("{} schema '{name}'", self.kind)))
    }

    /// Registered names, sorted for stable iteration.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .items
            .read()
            .expect("registry poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Insert or replace, no duplicate check.
    pub fn override_schema(&self, name: &str, schema: T) {
        self.items
            .write()
            .expect("registry poisoned")
            .insert(name.to_string(), schema);
    }
}

/// All registries the engine wiring resolves schemas through.
pub struct RegistrySet {
    pub exchanges: SchemaRegistry<ExchangeSchema>,
    pub strategies: SchemaRegistry<StrategySchema>,
    pub frames: SchemaRegistry<FrameSchema>,
    pub risks: SchemaRegistry<RiskSchema>,
    pub sizings: SchemaRegistry<SizingSchema>,
    pub actions: SchemaRegistry<ActionSchema>,
    pub walkers: SchemaRegistry<WalkerSchema>,
}

impl Default for RegistrySet {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistrySet {
    pub fn new() -> Self {
        Self {
            exchanges: SchemaRegistry::new("exchange"),
            strategies: SchemaRegistry::new("strategy"),
            frames: SchemaRegistry::new("frame"),
            risks: SchemaRegistry::new("risk"),
            sizings: SchemaRegistry::new("sizing"),
            actions: SchemaRegistry::new("action"),
            walkers: SchemaRegistry::new("walker"),
        }
    }

    /// Populate every registry from a parsed schema file.
    pub fn from_file(file: &SchemaFile) -> Result<Self> {
        let set = Self::new();
        for schema in &file.exchanges {
            set.exchanges.add(&schema.name, schema.clone())?;
        }
        for schema in &file.strategies {
            set.strategies.add(&schema.name, schema.clone())?;
        }
        for schema in &file.frames {
            set.frames.add(&schema.name, schema.clone())?;
        }
        for schema in &file.risks {
            set.risks.add(&schema.name, schema.clone())?;
        }
        for schema in &file.sizings {
            set.sizings.add(&schema.name, schema.clone())?;
        }
        for schema in &file.actions {
            set.actions.add(&schema.name, schema.clone())?;
        }
        for schema in &file.walkers {
            set.walkers.add(&schema.name, schema.clone())?;
        }
        Ok(set)
    }
}
