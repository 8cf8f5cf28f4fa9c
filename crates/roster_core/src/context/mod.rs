//! Persistence context: the unit of work over one store.
//!
//! # Responsibility
//! - Own every managed entity and hand out typed `Handle`s to them.
//! - Track changes through snapshots and write them on `flush`.
//! - Resolve lazy associations and keep both sides of `Member.team` in step.
//! - Own the transaction boundary for explicit units of work.
//!
//! # Invariants
//! - At most one managed instance per entity type and id.
//! - Query results never overwrite the state of an already managed instance.
//! - Handle keys are unique process-wide and never reused, so a handle issued
//!   by another context never matches a local entry.
//!
//! # See also
//! - `flush` for write ordering and atomicity.
//! - `repo` for the repositories that drive the context.

mod flush;
mod identity;

pub use identity::{Identities, Registry};

use crate::audit::Auditing;
use crate::model::entity::{Entity, EntityId, Handle, Lazy, LazyCollection};
use crate::model::member::Member;
use crate::model::team::Team;
use crate::query::{select_by_id_sql, select_list};
use crate::repo::{RepoError, RepoResult};
use crate::store::{Params, Row, Statement, Store};
use identity::{Entry, EntryState};
use log::{debug, info, warn};
use rusqlite::types::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_HANDLE_KEY: AtomicU64 = AtomicU64::new(1);

/// When pending changes reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushMode {
    /// Flush before every query issued through the context, so results
    /// observe pending changes.
    #[default]
    Auto,
    /// Flush only on `flush` and `commit`.
    Commit,
}

/// Unit of work bound to one store.
pub struct PersistenceContext<'s> {
    store: &'s dyn Store,
    registry: Registry,
    auditing: Auditing,
    flush_mode: FlushMode,
    in_transaction: bool,
    id: u64,
    /// Bumped by every bulk write that kept the context.
    epoch: u64,
    /// Table -> epoch of the last bulk write that kept the context.
    stale: HashMap<&'static str, u64>,
}

impl<'s> PersistenceContext<'s> {
    pub fn new(store: &'s dyn Store) -> Self {
        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            store,
            registry: Registry::new(id),
            auditing: Auditing::default(),
            flush_mode: FlushMode::default(),
            in_transaction: false,
            id,
            epoch: 0,
            stale: HashMap::new(),
        }
    }

    pub fn with_auditing(mut self, auditing: Auditing) -> Self {
        self.auditing = auditing;
        self
    }

    pub fn with_flush_mode(mut self, flush_mode: FlushMode) -> Self {
        self.flush_mode = flush_mode;
        self
    }

    /// Id stamped on every handle this context issues.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn store(&self) -> &'s dyn Store {
        self.store
    }

    pub fn flush_mode(&self) -> FlushMode {
        self.flush_mode
    }

    pub fn set_flush_mode(&mut self, flush_mode: FlushMode) {
        self.flush_mode = flush_mode;
    }

    /// Number of managed instances, removed ones included until flushed.
    pub fn managed_count(&self) -> usize {
        self.registry.len()
    }

    /// Registers a transient entity; it is inserted on the next flush.
    pub fn track<E: Entity>(&mut self, entity: E) -> RepoResult<Handle<E>> {
        if let Some(id) = entity.id() {
            return Err(RepoError::AlreadyPersistent {
                entity: E::NAME,
                id,
            });
        }
        let handle = self.register(entity, None, EntryState::New, false);
        E::link(&mut self.registry, handle.key());
        Ok(handle)
    }

    /// Registers and inserts a transient entity right away, assigning its
    /// identity. Referenced entities must already be persistent.
    pub fn persist<E: Entity>(&mut self, entity: E) -> RepoResult<Handle<E>> {
        if let Some(id) = entity.id() {
            return Err(RepoError::AlreadyPersistent {
                entity: E::NAME,
                id,
            });
        }
        let mut entity = entity;
        if let Some(fields) = entity.audit_mut() {
            self.auditing.on_create(fields);
        }
        let values = entity.column_values(&self.registry)?;
        let id = self.insert_row::<E>(&values)?;
        entity.assign_id(id);
        debug!(
            "event=persist module=context status=ok entity={} id={id}",
            E::NAME
        );
        let handle = self.register(entity, Some(values), EntryState::Managed, false);
        E::link(&mut self.registry, handle.key());
        Ok(handle)
    }

    /// Copies a detached, identified entity onto its managed instance,
    /// loading that instance first if needed. Changes are written on flush.
    ///
    /// Fails with `Detached` when the entity still holds a handle issued by
    /// another context.
    pub fn merge<E: Entity>(&mut self, entity: E) -> RepoResult<Handle<E>> {
        if let Err(err @ RepoError::Detached { .. }) = entity.column_values(&self.registry) {
            return Err(err);
        }
        let Some(id) = entity.id() else {
            return self.persist(entity);
        };
        let handle = self.find::<E>(id)?.ok_or_else(|| RepoError::NotFound {
            entity: E::NAME,
            key: id.to_string(),
        })?;
        E::unlink(&mut self.registry, handle.key());
        entity.merge_into(self.get_mut(handle)?);
        E::link(&mut self.registry, handle.key());
        Ok(handle)
    }

    /// Managed instance for `id`, loading it on a miss.
    pub fn find<E: Entity>(&mut self, id: EntityId) -> RepoResult<Option<Handle<E>>> {
        let identities = E::identities(&self.registry);
        if let Some(key) = identities.key_of(id) {
            let removed = identities
                .entries
                .get(&key)
                .is_some_and(|entry| entry.state == EntryState::Removed);
            return Ok((!removed).then(|| Handle::new(self.id, key)));
        }
        let rows = self.store.execute_query(
            &select_by_id_sql::<E>(),
            &Params::Positional(vec![Value::Integer(id)]),
        )?;
        let handles = self.attach_rows::<E>(&rows, "", false)?;
        Ok(handles.into_iter().next())
    }

    pub fn get<E: Entity>(&self, handle: Handle<E>) -> RepoResult<&E> {
        E::identities(&self.registry)
            .entity(handle.key())
            .ok_or(RepoError::Detached { entity: E::NAME })
    }

    /// Mutable access; changes are picked up by dirty checking on flush.
    pub fn get_mut<E: Entity>(&mut self, handle: Handle<E>) -> RepoResult<&mut E> {
        E::identities_mut(&mut self.registry)
            .entity_mut(handle.key())
            .ok_or(RepoError::Detached { entity: E::NAME })
    }

    /// Whether `handle` denotes a managed, not removed, instance.
    pub fn contains<E: Entity>(&self, handle: Handle<E>) -> bool {
        E::identities(&self.registry)
            .entries
            .get(&handle.key())
            .is_some_and(|entry| entry.state != EntryState::Removed)
    }

    /// Schedules deletion on the next flush. A never-flushed entity is
    /// simply forgotten.
    pub fn remove<E: Entity>(&mut self, handle: Handle<E>) -> RepoResult<()> {
        let state = E::identities(&self.registry)
            .entries
            .get(&handle.key())
            .map(|entry| entry.state)
            .ok_or(RepoError::Detached { entity: E::NAME })?;
        E::unlink(&mut self.registry, handle.key());
        let identities = E::identities_mut(&mut self.registry);
        match state {
            EntryState::New => {
                identities.evict(handle.key());
            }
            EntryState::Managed | EntryState::Removed => {
                if let Some(entry) = identities.entries.get_mut(&handle.key()) {
                    entry.state = EntryState::Removed;
                }
            }
        }
        Ok(())
    }

    /// Stops managing one instance without writing it. References to other
    /// managed instances come back as plain ids, so the entity can be merged
    /// into another context.
    pub fn detach<E: Entity>(&mut self, handle: Handle<E>) -> RepoResult<E> {
        if !E::identities(&self.registry).entries.contains_key(&handle.key()) {
            return Err(RepoError::Detached { entity: E::NAME });
        }
        E::unlink(&mut self.registry, handle.key());
        let mut entity = E::identities_mut(&mut self.registry)
            .evict(handle.key())
            .map(|entry| entry.entity)
            .ok_or(RepoError::Detached { entity: E::NAME })?;
        entity.release(&self.registry);
        Ok(entity)
    }

    /// Drops every managed instance and snapshot without writing.
    pub fn clear(&mut self) {
        let dropped = self.registry.len();
        self.registry = Registry::new(self.id);
        self.stale.clear();
        debug!("event=context_clear module=context status=ok dropped={dropped}");
    }

    /// Marks an instance read-only (no snapshot, never dirty-checked) or
    /// makes it writable again, snapshotting its current state.
    pub fn set_read_only<E: Entity>(
        &mut self,
        handle: Handle<E>,
        read_only: bool,
    ) -> RepoResult<()> {
        let snapshot = if read_only {
            None
        } else {
            Some(self.get(handle)?.column_values(&self.registry)?)
        };
        let entry = E::identities_mut(&mut self.registry)
            .entries
            .get_mut(&handle.key())
            .ok_or(RepoError::Detached { entity: E::NAME })?;
        entry.read_only = read_only;
        if entry.state == EntryState::Managed {
            entry.snapshot = snapshot;
        }
        Ok(())
    }

    pub fn is_read_only<E: Entity>(&self, handle: Handle<E>) -> bool {
        E::identities(&self.registry)
            .entries
            .get(&handle.key())
            .is_some_and(|entry| entry.read_only)
    }

    /// Team of `member`, loading it when the reference is unloaded and the
    /// team is not managed yet (one query per distinct team).
    pub fn team_of(&mut self, member: Handle<Member>) -> RepoResult<Option<Handle<Team>>> {
        let team_id = match self.get(member)?.team {
            None => return Ok(None),
            Some(Lazy::Loaded(team)) => return Ok(Some(team)),
            Some(Lazy::Unloaded(team_id)) => team_id,
        };
        let team = self.find::<Team>(team_id)?.ok_or_else(|| RepoError::NotFound {
            entity: Team::NAME,
            key: team_id.to_string(),
        })?;
        self.get_mut(member)?.team = Some(Lazy::Loaded(team));
        Ok(Some(team))
    }

    /// Members of `team`, initializing its member collection on first use.
    pub fn members_of(&mut self, team: Handle<Team>) -> RepoResult<Vec<Handle<Member>>> {
        if let LazyCollection::Loaded(handles) = self.get(team)?.members() {
            return Ok(handles.clone());
        }
        let team_id = self
            .get(team)?
            .id()
            .ok_or(RepoError::TransientReference { entity: Team::NAME })?;

        let sql = format!(
            "SELECT {} FROM {} WHERE team_id = ? ORDER BY member_id",
            select_list::<Member>(None, ""),
            Member::TABLE
        );
        let rows = self.query_rows(&sql, Params::Positional(vec![Value::Integer(team_id)]))?;
        let loaded = self.attach_rows::<Member>(&rows, "", false)?;

        let mut handles = Vec::with_capacity(loaded.len());
        for (&key, entry) in &self.registry.members.entries {
            if entry.state == EntryState::Removed {
                continue;
            }
            let belongs = match entry.entity.team {
                Some(Lazy::Loaded(owner)) => owner == team,
                Some(Lazy::Unloaded(owner_id)) => owner_id == team_id,
                None => false,
            };
            if belongs {
                handles.push(Handle::new(self.id, key));
            }
        }
        for handle in &handles {
            if let Some(member) = self.registry.members.entity_mut(handle.key()) {
                member.team = Some(Lazy::Loaded(team));
            }
        }
        *self.get_mut(team)?.members_mut() = LazyCollection::Loaded(handles.clone());
        Ok(handles)
    }

    /// Moves `member` to `team` (or unassigns it), updating the owning side
    /// and every loaded member collection. An unloaded collection observes
    /// the change once initialized.
    pub fn change_team(
        &mut self,
        member: Handle<Member>,
        team: Option<Handle<Team>>,
    ) -> RepoResult<()> {
        if let Some(team) = team {
            self.get(team)?;
        }
        let previous = match self.get(member)?.team {
            Some(Lazy::Loaded(previous)) => Some(previous),
            Some(Lazy::Unloaded(previous_id)) => self.registry.teams.handle_of(previous_id),
            None => None,
        };
        if let Some(previous) = previous.filter(|previous| Some(*previous) != team) {
            if let Some(previous) = self.registry.teams.entity_mut(previous.key()) {
                if let LazyCollection::Loaded(handles) = previous.members_mut() {
                    handles.retain(|handle| *handle != member);
                }
            }
        }

        self.get_mut(member)?.team = team.map(Lazy::Loaded);

        if let Some(team) = team {
            if let LazyCollection::Loaded(handles) = self.get_mut(team)?.members_mut() {
                if !handles.contains(&member) {
                    handles.push(member);
                }
            }
        }
        Ok(())
    }

    /// Opens an explicit transaction; flushes inside it join it.
    pub fn begin(&mut self) -> RepoResult<()> {
        self.store.begin_transaction()?;
        self.in_transaction = true;
        debug!("event=tx_begin module=context status=ok");
        Ok(())
    }

    /// Flushes pending changes and commits.
    pub fn commit(&mut self) -> RepoResult<()> {
        self.flush()?;
        self.store.commit()?;
        self.in_transaction = false;
        debug!("event=tx_commit module=context status=ok");
        Ok(())
    }

    /// Rolls back and clears the context, since managed state may no longer
    /// match the store.
    pub fn rollback(&mut self) -> RepoResult<()> {
        self.in_transaction = false;
        self.clear();
        self.store.rollback()?;
        debug!("event=tx_rollback module=context status=ok");
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Runs `work` in a transaction: commit on `Ok`, rollback on `Err`.
    pub fn transaction<T>(
        &mut self,
        work: impl FnOnce(&mut Self) -> RepoResult<T>,
    ) -> RepoResult<T> {
        self.begin()?;
        let outcome = work(self).and_then(|value| self.commit().map(|()| value));
        if let Err(err) = &outcome {
            if self.in_transaction {
                if let Err(rollback_err) = self.rollback() {
                    warn!("event=tx_rollback module=context status=error error={rollback_err} cause={err}");
                }
            }
        }
        outcome
    }

    /// Fails with `StaleState` when `handle` was loaded before a bulk write
    /// to its table that kept the context.
    pub fn verify_fresh<E: Entity>(&self, handle: Handle<E>) -> RepoResult<()> {
        let entry = E::identities(&self.registry)
            .entries
            .get(&handle.key())
            .ok_or(RepoError::Detached { entity: E::NAME })?;
        match self.stale.get(E::TABLE) {
            Some(&epoch) if entry.loaded_epoch <= epoch => {
                Err(RepoError::StaleState { table: E::TABLE })
            }
            _ => Ok(()),
        }
    }

    /// Reloads one managed instance from the store, discarding its pending
    /// changes and clearing its stale mark.
    pub fn refresh<E: Entity>(&mut self, handle: Handle<E>) -> RepoResult<()> {
        let id = self
            .get(handle)?
            .id()
            .ok_or(RepoError::TransientReference { entity: E::NAME })?;
        let rows = self.store.execute_query(
            &select_by_id_sql::<E>(),
            &Params::Positional(vec![Value::Integer(id)]),
        )?;
        let row = rows.first().ok_or_else(|| RepoError::NotFound {
            entity: E::NAME,
            key: id.to_string(),
        })?;
        let fresh = E::from_row(row, "")?;
        let snapshot = fresh.column_values(&self.registry)?;
        let epoch = self.epoch;
        if let Some(entry) = E::identities_mut(&mut self.registry)
            .entries
            .get_mut(&handle.key())
        {
            fresh.merge_into(&mut entry.entity);
            entry.snapshot = (!entry.read_only).then_some(snapshot);
            entry.loaded_epoch = epoch;
        }
        Ok(())
    }

    /// Runs a query for the query layer, flushing first in `Auto` mode.
    pub(crate) fn query_rows(&mut self, sql: &str, params: Params) -> RepoResult<Vec<Row>> {
        if self.flush_mode == FlushMode::Auto {
            self.flush()?;
        }
        Ok(self.store.execute_query(sql, &params)?)
    }

    /// Maps rows (columns under `prefix`) to managed instances. Rows whose
    /// id is already managed resolve to the existing handle.
    pub(crate) fn attach_rows<E: Entity>(
        &mut self,
        rows: &[Row],
        prefix: &str,
        read_only: bool,
    ) -> RepoResult<Vec<Handle<E>>> {
        let mut handles = Vec::with_capacity(rows.len());
        for row in rows {
            let entity = E::from_row(row, prefix)?;
            let id = entity
                .id()
                .ok_or_else(|| RepoError::InvalidData(format!("{} row without id", E::NAME)))?;
            if let Some(handle) = E::identities(&self.registry).handle_of(id) {
                handles.push(handle);
                continue;
            }
            let snapshot = if read_only {
                None
            } else {
                Some(entity.column_values(&self.registry)?)
            };
            handles.push(self.register(entity, snapshot, EntryState::Managed, read_only));
        }
        Ok(handles)
    }

    /// Runs one set-based write after flushing pending changes.
    ///
    /// With `clear_automatically` the context is cleared afterwards.
    /// Otherwise instances of `table` loaded before the write are marked
    /// stale: flushing a change to one fails with `StaleState`.
    pub(crate) fn execute_bulk(
        &mut self,
        statement: Statement,
        table: &'static str,
        clear_automatically: bool,
    ) -> RepoResult<usize> {
        let started_at = Instant::now();
        self.flush()?;
        let affected = self.store.execute_write(std::slice::from_ref(&statement))?;
        if clear_automatically {
            self.clear();
        } else {
            warn!(
                "event=bulk_update module=context status=stale table={table} affected={affected} managed={}",
                self.registry.len()
            );
            self.stale.insert(table, self.epoch);
            self.epoch += 1;
        }
        info!(
            "event=bulk_update module=context status=ok table={table} affected={affected} cleared={clear_automatically} duration_ms={}",
            started_at.elapsed().as_millis()
        );
        Ok(affected)
    }

    fn register<E: Entity>(
        &mut self,
        entity: E,
        snapshot: Option<Vec<Value>>,
        state: EntryState,
        read_only: bool,
    ) -> Handle<E> {
        let key = NEXT_HANDLE_KEY.fetch_add(1, Ordering::Relaxed);
        let epoch = self.epoch;
        E::identities_mut(&mut self.registry).insert(
            key,
            Entry {
                entity,
                snapshot,
                state,
                read_only,
                loaded_epoch: epoch,
            },
        );
        Handle::new(self.id, key)
    }
}

#[cfg(test)]
mod tests {
    use super::{FlushMode, PersistenceContext};
    use crate::db::open_db_in_memory;
    use crate::model::member::Member;
    use crate::model::team::Team;
    use crate::repo::RepoError;
    use crate::store::SqliteStore;

    fn store() -> SqliteStore {
        SqliteStore::new(open_db_in_memory().unwrap())
    }

    #[test]
    fn idle_flush_issues_no_statement() {
        let store = store();
        let mut ctx = PersistenceContext::new(&store);
        ctx.flush().unwrap();
        assert_eq!(store.executed_queries(), 0);
    }

    #[test]
    fn tracked_team_and_member_flush_in_parent_first_order() {
        let store = store();
        let mut ctx = PersistenceContext::new(&store).with_flush_mode(FlushMode::Commit);
        let member = ctx.track(Member::with_age("member1", 10)).unwrap();
        let team = ctx.track(Team::new("teamA")).unwrap();
        ctx.change_team(member, Some(team)).unwrap();

        ctx.flush().unwrap();

        let team_id = ctx.get(team).unwrap().id().unwrap();
        assert!(ctx.get(member).unwrap().id().is_some());
        let stored: i64 = store
            .connection()
            .query_row("SELECT team_id FROM member", [], |row| row.get(0))
            .unwrap();
        assert_eq!(stored, team_id);
    }

    #[test]
    fn persist_rejects_reference_to_unflushed_team() {
        let store = store();
        let mut ctx = PersistenceContext::new(&store);
        let team = ctx.track(Team::new("teamA")).unwrap();
        let err = ctx.persist(Member::with_team("member1", 10, team)).unwrap_err();
        assert!(matches!(err, RepoError::TransientReference { entity: "Team" }));
    }

    #[test]
    fn handles_do_not_survive_clear() {
        let store = store();
        let mut ctx = PersistenceContext::new(&store);
        let member = ctx.persist(Member::new("member1")).unwrap();
        ctx.clear();
        assert!(matches!(ctx.get(member), Err(RepoError::Detached { .. })));

        let id = store
            .connection()
            .query_row("SELECT member_id FROM member", [], |row| row.get(0))
            .unwrap();
        let reloaded = ctx.find::<Member>(id).unwrap().unwrap();
        assert_ne!(reloaded, member);
    }

    #[test]
    fn removing_unflushed_entity_forgets_it() {
        let store = store();
        let mut ctx = PersistenceContext::new(&store);
        let member = ctx.track(Member::new("member1")).unwrap();
        ctx.remove(member).unwrap();
        ctx.flush().unwrap();
        assert_eq!(ctx.managed_count(), 0);
        assert_eq!(store.executed_queries(), 0);
    }
}
