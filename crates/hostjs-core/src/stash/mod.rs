//! Heap stash: host-only metadata attached to engine objects
//!
//! Entries are keyed by the owner's [`ObjectId`], which carries a slot
//! generation, so an identity is never shared by two objects. Every
//! attachment holds one unit on the owner. The script side cannot see the
//! entries and the engine does not know about them, so reclamation is
//! explicit: [`HeapStash::compact`] evicts owners that nothing but the stash
//! keeps alive.

pub mod ledger;

use hostjs_engine::{Engine, ObjectId, RawValue, ValueType};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::{HostError, HostResult};

struct StashEntry {
    /// Owner value; `held` units are held on it.
    owner: RawValue,
    held: u32,
    /// Attached values, one unit each.
    values: FxHashMap<String, RawValue>,
}

impl StashEntry {
    fn release(self, engine: &dyn Engine) {
        for (_, value) in self.values {
            engine.free(value);
        }
        for _ in 0..self.held {
            engine.free(self.owner);
        }
    }
}

/// Runtime-wide side table of hidden metadata.
#[derive(Default)]
pub struct HeapStash {
    entries: FxHashMap<ObjectId, StashEntry>,
}

impl HeapStash {
    pub fn new() -> Self {
        Self::default()
    }

    fn owner_id(engine: &dyn Engine, owner: RawValue) -> HostResult<ObjectId> {
        let kind = engine.type_of(owner);
        if !matches!(kind, ValueType::Object | ValueType::Function) {
            return Err(HostError::type_mismatch("object", kind.name()));
        }
        engine
            .identity(owner)
            .ok_or_else(|| HostError::type_mismatch("object", "freed value"))
    }

    /// Attach `value` to `owner` under `name`. Both are borrowed; the stash
    /// takes its own units.
    pub fn attach(
        &mut self,
        engine: &dyn Engine,
        owner: RawValue,
        name: &str,
        value: RawValue,
    ) -> HostResult<()> {
        let id = Self::owner_id(engine, owner)?;
        let entry = self.entries.entry(id).or_insert_with(|| StashEntry {
            owner,
            held: 0,
            values: FxHashMap::default(),
        });
        if entry.values.contains_key(name) {
            return Err(HostError::DuplicateHiddenKey(name.to_string()));
        }
        entry.values.insert(name.to_string(), engine.dup(value));
        entry.owner = engine.dup(owner);
        entry.held += 1;
        Ok(())
    }

    pub fn has(&self, engine: &dyn Engine, owner: RawValue, name: &str) -> bool {
        engine
            .identity(owner)
            .and_then(|id| self.entries.get(&id))
            .is_some_and(|entry| entry.values.contains_key(name))
    }

    /// Attached value (borrowed from the stash).
    pub fn get(&self, engine: &dyn Engine, owner: RawValue, name: &str) -> HostResult<RawValue> {
        let entry = engine
            .identity(owner)
            .and_then(|id| self.entries.get(&id))
            .ok_or(HostError::MissingHiddenRoot)?;
        entry
            .values
            .get(name)
            .copied()
            .ok_or_else(|| HostError::MissingHiddenKey(name.to_string()))
    }

    /// Evict every owner whose live count is covered by the stash's own
    /// units, repeating until a pass evicts nothing. Returns the number of
    /// evicted owners.
    pub fn compact(&mut self, engine: &dyn Engine) -> usize {
        let mut evicted = 0;
        loop {
            let unreferenced: Vec<ObjectId> = self
                .entries
                .iter()
                .filter(|(_, entry)| {
                    ledger::is_unreferenced(engine.ref_count(entry.owner), entry.held)
                })
                .map(|(id, _)| *id)
                .collect();
            if unreferenced.is_empty() {
                break;
            }
            evicted += unreferenced.len();
            for id in unreferenced {
                if let Some(entry) = self.entries.remove(&id) {
                    entry.release(engine);
                }
            }
        }
        if evicted > 0 {
            let external: u32 = self
                .entries
                .values()
                .map(|entry| ledger::external_units(engine.ref_count(entry.owner), entry.held))
                .sum();
            debug!(
                evicted,
                remaining = self.entries.len(),
                external,
                "heap stash compacted"
            );
        }
        evicted
    }

    /// Release every entry regardless of reachability.
    pub fn clear(&mut self, engine: &dyn Engine) {
        for (_, entry) in self.entries.drain() {
            entry.release(engine);
        }
    }

    /// Number of tracked owners.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Units the stash holds on `owner`.
    pub fn held_units(&self, engine: &dyn Engine, owner: RawValue) -> u32 {
        engine
            .identity(owner)
            .and_then(|id| self.entries.get(&id))
            .map_or(0, |entry| entry.held)
    }
}
