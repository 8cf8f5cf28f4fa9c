//! Generic CRUD repository over any `Entity`.
//!
//! # Responsibility
//! - Provide the CRUD contract shared by every entity repository.
//!
//! # Invariants
//! - Repositories hold no entity state; every call goes through the
//!   caller's `PersistenceContext`.
//! - Deletes are scheduled on the context and written on flush.

use crate::context::PersistenceContext;
use crate::model::entity::{Entity, EntityId, Handle};
use crate::page::{Page, PageRequest};
use crate::query::derived::DerivedQuery;
use crate::query::sort::Sort;
use crate::repo::{RepoError, RepoResult};

/// CRUD contract per entity type.
pub trait CrudRepository<E: Entity> {
    /// Inserts a transient entity, or merges an identified one onto its
    /// managed instance (written on flush).
    fn save(&self, ctx: &mut PersistenceContext<'_>, entity: E) -> RepoResult<Handle<E>>;
    fn find_by_id(
        &self,
        ctx: &mut PersistenceContext<'_>,
        id: EntityId,
    ) -> RepoResult<Option<Handle<E>>>;
    fn find_all(&self, ctx: &mut PersistenceContext<'_>) -> RepoResult<Vec<Handle<E>>>;
    fn find_all_sorted(
        &self,
        ctx: &mut PersistenceContext<'_>,
        sort: &Sort,
    ) -> RepoResult<Vec<Handle<E>>>;
    fn find_all_paged(
        &self,
        ctx: &mut PersistenceContext<'_>,
        request: &PageRequest,
    ) -> RepoResult<Page<Handle<E>>>;
    fn count(&self, ctx: &mut PersistenceContext<'_>) -> RepoResult<u64>;
    fn delete(&self, ctx: &mut PersistenceContext<'_>, handle: Handle<E>) -> RepoResult<()>;
    /// Loads every row and schedules each for deletion; returns how many.
    fn delete_all(&self, ctx: &mut PersistenceContext<'_>) -> RepoResult<usize>;

    /// Like `find_by_id`, but a missing row is `NotFound`.
    fn get_by_id(&self, ctx: &mut PersistenceContext<'_>, id: EntityId) -> RepoResult<Handle<E>> {
        self.find_by_id(ctx, id)?.ok_or_else(|| RepoError::NotFound {
            entity: E::NAME,
            key: id.to_string(),
        })
    }

    fn exists_by_id(&self, ctx: &mut PersistenceContext<'_>, id: EntityId) -> RepoResult<bool> {
        Ok(self.find_by_id(ctx, id)?.is_some())
    }

    /// Deletes the row with `id`; a missing row is ignored.
    fn delete_by_id(&self, ctx: &mut PersistenceContext<'_>, id: EntityId) -> RepoResult<()> {
        match self.find_by_id(ctx, id)? {
            Some(handle) => self.delete(ctx, handle),
            None => Ok(()),
        }
    }
}

/// Context-backed implementation of `CrudRepository`.
#[derive(Debug, Clone)]
pub struct EntityRepository<E> {
    all: DerivedQuery<E>,
}

impl<E: Entity> EntityRepository<E> {
    pub fn new() -> Self {
        Self {
            all: DerivedQuery::all(),
        }
    }
}

impl<E: Entity> Default for EntityRepository<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> CrudRepository<E> for EntityRepository<E> {
    fn save(&self, ctx: &mut PersistenceContext<'_>, entity: E) -> RepoResult<Handle<E>> {
        match entity.id() {
            None => ctx.persist(entity),
            Some(_) => ctx.merge(entity),
        }
    }

    fn find_by_id(
        &self,
        ctx: &mut PersistenceContext<'_>,
        id: EntityId,
    ) -> RepoResult<Option<Handle<E>>> {
        ctx.find::<E>(id)
    }

    fn find_all(&self, ctx: &mut PersistenceContext<'_>) -> RepoResult<Vec<Handle<E>>> {
        Ok(self.all.find(ctx, &[])?.list())
    }

    fn find_all_sorted(
        &self,
        ctx: &mut PersistenceContext<'_>,
        sort: &Sort,
    ) -> RepoResult<Vec<Handle<E>>> {
        Ok(self.all.find_sorted(ctx, &[], sort)?.list())
    }

    fn find_all_paged(
        &self,
        ctx: &mut PersistenceContext<'_>,
        request: &PageRequest,
    ) -> RepoResult<Page<Handle<E>>> {
        self.all.page(ctx, &[], request)
    }

    fn count(&self, ctx: &mut PersistenceContext<'_>) -> RepoResult<u64> {
        self.all.count(ctx, &[])
    }

    fn delete(&self, ctx: &mut PersistenceContext<'_>, handle: Handle<E>) -> RepoResult<()> {
        ctx.remove(handle)
    }

    fn delete_all(&self, ctx: &mut PersistenceContext<'_>) -> RepoResult<usize> {
        let handles = self.find_all(ctx)?;
        for handle in &handles {
            ctx.remove(*handle)?;
        }
        Ok(handles.len())
    }
}
