//! Flush: dirty checking and the ordered write batch.
//!
//! # Invariants
//! - Inserts and updates run parents first (Team, then Member); deletes run
//!   children first (Member, then Team).
//! - Nothing in the identity map changes until the whole batch succeeded.
//! - Insert-only columns never appear in an `UPDATE`.

use super::identity::EntryState;
use super::PersistenceContext;
use crate::model::entity::{writable_properties, ColumnKind, Entity, EntityId, ReferenceResolver};
use crate::model::member::Member;
use crate::model::team::Team;
use crate::query::{delete_sql, insert_sql, update_sql};
use crate::repo::{RepoError, RepoResult};
use crate::store::{Params, Statement};
use log::{debug, error, warn};
use rusqlite::types::Value;
use std::collections::HashMap;
use std::time::Instant;

/// Resolves references against ids assigned earlier in the same batch,
/// then against the identity map.
struct BatchRefs<'a> {
    registry: &'a super::Registry,
    assigned: &'a HashMap<u64, EntityId>,
}

impl ReferenceResolver for BatchRefs<'_> {
    fn context(&self) -> u64 {
        self.registry.context()
    }

    fn resolve_id(&self, table: &'static str, key: u64) -> Option<EntityId> {
        self.assigned
            .get(&key)
            .copied()
            .or_else(|| self.registry.resolve_id(table, key))
    }
}

struct Written<E> {
    key: u64,
    entity: E,
    values: Vec<Value>,
    inserted: bool,
}

struct Batch {
    teams: Vec<Written<Team>>,
    members: Vec<Written<Member>>,
    removed_members: Vec<u64>,
    removed_teams: Vec<u64>,
}

impl Batch {
    fn counts(&self) -> (usize, usize, usize) {
        let inserted = self.teams.iter().filter(|w| w.inserted).count()
            + self.members.iter().filter(|w| w.inserted).count();
        let updated = self.teams.len() + self.members.len() - inserted;
        let deleted = self.removed_members.len() + self.removed_teams.len();
        (inserted, updated, deleted)
    }
}

impl PersistenceContext<'_> {
    /// Writes every pending change: inserts for tracked entities, updates
    /// for dirty ones, deletes for removed ones.
    ///
    /// Runs inside the open transaction if there is one, otherwise in its
    /// own. A flush with nothing pending issues no statement.
    pub fn flush(&mut self) -> RepoResult<()> {
        if !self.has_pending_changes() {
            return Ok(());
        }
        let started_at = Instant::now();
        let own_transaction = !self.in_transaction;
        if own_transaction {
            self.store.begin_transaction()?;
        }

        let batch = match self.write_batch() {
            Ok(batch) => batch,
            Err(err) => {
                if own_transaction {
                    if let Err(rollback_err) = self.store.rollback() {
                        warn!("event=flush module=context status=rollback_failed error={rollback_err}");
                    }
                }
                error!(
                    "event=flush module=context status=error duration_ms={} error={err}",
                    started_at.elapsed().as_millis()
                );
                return Err(err);
            }
        };

        if own_transaction {
            if let Err(err) = self.store.commit() {
                if let Err(rollback_err) = self.store.rollback() {
                    warn!("event=flush module=context status=rollback_failed error={rollback_err}");
                }
                error!("event=flush module=context status=error stage=commit error={err}");
                return Err(err.into());
            }
        }

        let (inserted, updated, deleted) = batch.counts();
        self.apply_batch(batch);
        debug!(
            "event=flush module=context status=ok inserted={inserted} updated={updated} deleted={deleted} duration_ms={}",
            started_at.elapsed().as_millis()
        );
        Ok(())
    }

    /// Cheap pre-check so that an idle flush never opens a transaction.
    pub(crate) fn has_pending_changes(&self) -> bool {
        self.pending_in::<Team>() || self.pending_in::<Member>()
    }

    fn pending_in<E: Entity>(&self) -> bool {
        E::identities(&self.registry)
            .entries
            .values()
            .any(|entry| match entry.state {
                EntryState::New | EntryState::Removed => true,
                EntryState::Managed if entry.read_only => false,
                EntryState::Managed => match entry.entity.column_values(&self.registry) {
                    Ok(values) => entry.snapshot.as_ref() != Some(&values),
                    Err(_) => true,
                },
            })
    }

    fn write_batch(&self) -> RepoResult<Batch> {
        let mut assigned = HashMap::new();
        let teams = self.write_phase::<Team>(&mut assigned)?;
        let members = self.write_phase::<Member>(&mut assigned)?;
        let removed_members = self.delete_phase::<Member>()?;
        let removed_teams = self.delete_phase::<Team>()?;
        Ok(Batch {
            teams,
            members,
            removed_members,
            removed_teams,
        })
    }

    fn write_phase<E: Entity>(
        &self,
        assigned: &mut HashMap<u64, EntityId>,
    ) -> RepoResult<Vec<Written<E>>> {
        let stale_epoch = self.stale.get(E::TABLE).copied();
        let mut written = Vec::new();

        for (&key, entry) in &E::identities(&self.registry).entries {
            match entry.state {
                EntryState::Removed => {}
                EntryState::New => {
                    let mut entity = entry.entity.clone();
                    if let Some(fields) = entity.audit_mut() {
                        self.auditing.on_create(fields);
                    }
                    let values = entity.column_values(&BatchRefs {
                        registry: &self.registry,
                        assigned: &*assigned,
                    })?;
                    let id = self.insert_row::<E>(&values)?;
                    entity.assign_id(id);
                    assigned.insert(key, id);
                    written.push(Written {
                        key,
                        entity,
                        values,
                        inserted: true,
                    });
                }
                EntryState::Managed if entry.read_only => {}
                EntryState::Managed => {
                    let refs = BatchRefs {
                        registry: &self.registry,
                        assigned: &*assigned,
                    };
                    let current = entry.entity.column_values(&refs)?;
                    if entry.snapshot.as_ref() == Some(&current) {
                        continue;
                    }
                    if stale_epoch.is_some_and(|epoch| entry.loaded_epoch <= epoch) {
                        return Err(RepoError::StaleState { table: E::TABLE });
                    }
                    let mut entity = entry.entity.clone();
                    if let Some(fields) = entity.audit_mut() {
                        self.auditing.on_update(fields);
                    }
                    let values = entity.column_values(&refs)?;
                    self.update_row(&entity, &values)?;
                    written.push(Written {
                        key,
                        entity,
                        values,
                        inserted: false,
                    });
                }
            }
        }
        Ok(written)
    }

    fn delete_phase<E: Entity>(&self) -> RepoResult<Vec<u64>> {
        let mut removed = Vec::new();
        for (&key, entry) in &E::identities(&self.registry).entries {
            if entry.state != EntryState::Removed {
                continue;
            }
            let id = entry.entity.id().ok_or_else(|| {
                RepoError::InvalidData(format!("removed {} has no id", E::NAME))
            })?;
            self.store.execute_write(&[Statement::new(
                delete_sql::<E>(),
                Params::Positional(vec![Value::Integer(id)]),
            )])?;
            removed.push(key);
        }
        Ok(removed)
    }

    pub(crate) fn insert_row<E: Entity>(&self, values: &[Value]) -> RepoResult<EntityId> {
        let rows = self
            .store
            .execute_query(&insert_sql::<E>(), &Params::Positional(values.to_vec()))?;
        let row = rows.first().ok_or_else(|| {
            RepoError::InvalidData(format!("insert into {} returned no identity", E::TABLE))
        })?;
        Ok(row.first::<EntityId>()?)
    }

    fn update_row<E: Entity>(&self, entity: &E, values: &[Value]) -> RepoResult<()> {
        let id = entity
            .id()
            .ok_or_else(|| RepoError::InvalidData(format!("managed {} has no id", E::NAME)))?;
        let mut params = writable_properties::<E>()
            .zip(values)
            .filter(|(property, _)| property.kind == ColumnKind::Updatable)
            .map(|(_, value)| value.clone())
            .collect::<Vec<_>>();
        params.push(Value::Integer(id));
        self.store
            .execute_write(&[Statement::new(update_sql::<E>(), Params::Positional(params))])?;
        Ok(())
    }

    fn apply_batch(&mut self, batch: Batch) {
        self.apply_written(batch.teams);
        self.apply_written(batch.members);
        for key in batch.removed_members {
            self.registry.members.evict(key);
        }
        for key in batch.removed_teams {
            self.registry.teams.evict(key);
        }
    }

    fn apply_written<E: Entity>(&mut self, written: Vec<Written<E>>) {
        let epoch = self.epoch;
        let identities = E::identities_mut(&mut self.registry);
        for item in written {
            if item.inserted {
                if let Some(id) = item.entity.id() {
                    identities.by_id.insert(id, item.key);
                }
            }
            if let Some(entry) = identities.entries.get_mut(&item.key) {
                if item.inserted {
                    entry.state = EntryState::Managed;
                    entry.loaded_epoch = epoch;
                }
                entry.snapshot = (!entry.read_only).then_some(item.values);
                entry.entity = item.entity;
            }
        }
    }
}
