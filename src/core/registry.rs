use crate::core::shard::Shard;
use crate::core::types::{FourCC, fourcc_to_string};
use std::collections::HashMap;

/// Builds a fresh unit instance.
pub type ShardFactory = fn() -> Box<dyn Shard>;

/// Unit factories, keyed by vendor and name.
#[derive(Default)]
pub struct ShardRegistry {
    factories: HashMap<(FourCC, String), ShardFactory>,
}

impl ShardRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` as `name` under `vendor`. Replaces any earlier
    /// registration of the same pair.
    pub fn register(&mut self, vendor: FourCC, name: &str, factory: ShardFactory) {
        if self
            .factories
            .insert((vendor, name.to_string()), factory)
            .is_some()
        {
            log::warn!(
                "shard {} of vendor {} registered twice, keeping the latest",
                name,
                fourcc_to_string(vendor)
            );
        }
    }

    pub fn create_with_vendor(&self, vendor: FourCC, name: &str) -> Option<Box<dyn Shard>> {
        self.factories
            .get(&(vendor, name.to_string()))
            .map(|factory| factory())
    }

    /// Creates `name` if exactly one vendor registered it.
    pub fn create(&self, name: &str) -> Option<Box<dyn Shard>> {
        let mut matches = self.factories.iter().filter(|((_, n), _)| n == name);
        let (_, factory) = matches.next()?;
        if matches.next().is_some() {
            log::warn!("shard {name} is registered by several vendors, a vendor is required");
            return None;
        }
        Some(factory())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.keys().any(|(_, n)| n == name)
    }

    /// Registered names, sorted and deduplicated.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().map(|(_, n)| n.clone()).collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
