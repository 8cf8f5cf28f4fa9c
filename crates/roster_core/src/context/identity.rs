//! Identity map: one managed instance per entity type and id.
//!
//! # Invariants
//! - `by_id` holds exactly the entries that carry an id.
//! - Keys are handed out by the owning context and never reused.

use crate::model::entity::{Entity, EntityId, Handle, ReferenceResolver};
use crate::model::member::Member;
use crate::model::team::Team;
use rusqlite::types::Value;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryState {
    /// Tracked, not yet inserted.
    New,
    Managed,
    /// Scheduled for deletion on the next flush.
    Removed,
}

#[derive(Debug)]
pub(crate) struct Entry<E> {
    pub(crate) entity: E,
    /// Column values at load or last flush; `None` for read-only entries.
    pub(crate) snapshot: Option<Vec<Value>>,
    pub(crate) state: EntryState,
    pub(crate) read_only: bool,
    /// Context epoch when the row was loaded or last written.
    pub(crate) loaded_epoch: u64,
}

/// Managed instances of one entity type.
#[derive(Debug)]
pub struct Identities<E> {
    context: u64,
    pub(crate) entries: BTreeMap<u64, Entry<E>>,
    pub(crate) by_id: HashMap<EntityId, u64>,
}

impl<E: Entity> Identities<E> {
    fn new(context: u64) -> Self {
        Self {
            context,
            entries: BTreeMap::new(),
            by_id: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn entity(&self, key: u64) -> Option<&E> {
        self.entries.get(&key).map(|entry| &entry.entity)
    }

    pub(crate) fn entity_mut(&mut self, key: u64) -> Option<&mut E> {
        self.entries.get_mut(&key).map(|entry| &mut entry.entity)
    }

    pub(crate) fn key_of(&self, id: EntityId) -> Option<u64> {
        self.by_id.get(&id).copied()
    }

    pub(crate) fn handle_of(&self, id: EntityId) -> Option<Handle<E>> {
        self.key_of(id).map(|key| Handle::new(self.context, key))
    }

    pub(crate) fn id_of(&self, key: u64) -> Option<EntityId> {
        self.entries.get(&key).and_then(|entry| entry.entity.id())
    }

    pub(crate) fn insert(&mut self, key: u64, entry: Entry<E>) {
        if let Some(id) = entry.entity.id() {
            self.by_id.insert(id, key);
        }
        self.entries.insert(key, entry);
    }

    pub(crate) fn evict(&mut self, key: u64) -> Option<Entry<E>> {
        let entry = self.entries.remove(&key)?;
        if let Some(id) = entry.entity.id() {
            self.by_id.remove(&id);
        }
        Some(entry)
    }
}

/// Every identity map of one persistence context.
#[derive(Debug)]
pub struct Registry {
    context: u64,
    pub(crate) members: Identities<Member>,
    pub(crate) teams: Identities<Team>,
}

impl Registry {
    pub(crate) fn new(context: u64) -> Self {
        Self {
            context,
            members: Identities::new(context),
            teams: Identities::new(context),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.members.len() + self.teams.len()
    }
}

impl ReferenceResolver for Registry {
    fn context(&self) -> u64 {
        self.context
    }

    fn resolve_id(&self, table: &'static str, key: u64) -> Option<EntityId> {
        if table == Team::TABLE {
            self.teams.id_of(key)
        } else if table == Member::TABLE {
            self.members.id_of(key)
        } else {
            None
        }
    }
}
