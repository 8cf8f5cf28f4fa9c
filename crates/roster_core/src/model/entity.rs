//! Entity metadata, typed handles and explicit lazy references.
//!
//! # Responsibility
//! - Describe how an entity maps onto one table (`Entity`, `Property`).
//! - Give callers a stable, typed key (`Handle`) into a persistence context.
//! - Make association loading state visible in the type (`Lazy`,
//!   `LazyCollection`) instead of hiding it behind proxies.
//!
//! # Invariants
//! - `Entity::properties()` lists the identity column first.
//! - `column_values` returns values in `writable_properties` order.

use crate::context::{Identities, Registry};
use crate::repo::RepoResult;
use crate::store::Row;
use rusqlite::types::Value;
use std::fmt::{Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Database identity of a persistent entity.
pub type EntityId = i64;

/// How a property takes part in writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Store-generated identity, never written.
    Id,
    /// Written on insert and update.
    Updatable,
    /// Written on insert only.
    InsertOnly,
}

/// Mapping of one entity property onto a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Property {
    /// Property name used by derived queries and sorts (`createdDate`).
    pub name: &'static str,
    pub column: &'static str,
    pub kind: ColumnKind,
}

impl Property {
    pub const fn id(name: &'static str, column: &'static str) -> Self {
        Self {
            name,
            column,
            kind: ColumnKind::Id,
        }
    }

    pub const fn updatable(name: &'static str, column: &'static str) -> Self {
        Self {
            name,
            column,
            kind: ColumnKind::Updatable,
        }
    }

    pub const fn insert_only(name: &'static str, column: &'static str) -> Self {
        Self {
            name,
            column,
            kind: ColumnKind::InsertOnly,
        }
    }
}

/// Resolves handles of referenced entities to their database identity.
pub trait ReferenceResolver {
    /// Id of the persistence context whose handles this resolver accepts.
    fn context(&self) -> u64;

    fn resolve_id(&self, table: &'static str, key: u64) -> Option<EntityId>;
}

/// A persistent type mapped onto one table.
pub trait Entity: Clone + Debug + 'static {
    /// Entity name used in errors and logs.
    const NAME: &'static str;
    const TABLE: &'static str;

    fn properties() -> &'static [Property];

    fn id(&self) -> Option<EntityId>;

    /// Assigns the store-generated identity. Called by the persistence
    /// context exactly once per entity.
    fn assign_id(&mut self, id: EntityId);

    /// Column values for every writable property, in declaration order.
    fn column_values(&self, refs: &dyn ReferenceResolver) -> RepoResult<Vec<Value>>;

    /// Builds a detached instance from a row; `prefix` selects joined columns.
    fn from_row(row: &Row, prefix: &str) -> RepoResult<Self>;

    /// Audit stamps, for entities that carry them.
    fn audit_mut(&mut self) -> Option<&mut crate::model::audit::AuditFields> {
        None
    }

    /// Copies the state of a detached instance onto the managed one.
    /// Context-owned state (loaded collections) stays with `managed`.
    fn merge_into(self, managed: &mut Self) {
        *managed = self;
    }

    /// Drops back-references to the instance stored under `key`; called
    /// when it is removed.
    #[doc(hidden)]
    fn unlink(_registry: &mut Registry, _key: u64) {}

    /// Adds the instance stored under `key` to loaded back-references;
    /// called when a new instance is registered.
    #[doc(hidden)]
    fn link(_registry: &mut Registry, _key: u64) {}

    /// Replaces handles into `registry` with plain ids; called when the
    /// instance leaves the context that issued those handles.
    #[doc(hidden)]
    fn release(&mut self, _registry: &Registry) {}

    #[doc(hidden)]
    fn identities(registry: &Registry) -> &Identities<Self>;

    #[doc(hidden)]
    fn identities_mut(registry: &mut Registry) -> &mut Identities<Self>;
}

/// Identity column of `E`.
pub fn id_property<E: Entity>() -> &'static Property {
    E::properties()
        .iter()
        .find(|property| property.kind == ColumnKind::Id)
        .unwrap_or(&E::properties()[0])
}

/// Properties written on insert, in declaration order.
pub fn writable_properties<E: Entity>() -> impl Iterator<Item = &'static Property> {
    E::properties()
        .iter()
        .filter(|property| property.kind != ColumnKind::Id)
}

/// Looks up a property by its name, as written in a derived query or sort.
pub fn find_property<E: Entity>(name: &str) -> Option<&'static Property> {
    E::properties()
        .iter()
        .find(|property| property.name.eq_ignore_ascii_case(name))
}

/// Typed key of an entity managed by one persistence context.
///
/// Two handles are equal exactly when they denote the same managed instance.
/// A handle is only meaningful to the context that issued it; every other
/// context rejects it as `Detached`.
pub struct Handle<E> {
    context: u64,
    key: u64,
    _marker: PhantomData<fn() -> E>,
}

impl<E> Handle<E> {
    pub(crate) fn new(context: u64, key: u64) -> Self {
        Self {
            context,
            key,
            _marker: PhantomData,
        }
    }

    /// Id of the issuing persistence context.
    pub fn context(&self) -> u64 {
        self.context
    }

    pub fn key(&self) -> u64 {
        self.key
    }
}

impl<E> Clone for Handle<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for Handle<E> {}

impl<E> PartialEq for Handle<E> {
    fn eq(&self, other: &Self) -> bool {
        self.context == other.context && self.key == other.key
    }
}

impl<E> Eq for Handle<E> {}

impl<E> Hash for Handle<E> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.context.hash(state);
        self.key.hash(state);
    }
}

impl<E> Debug for Handle<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handle#{}:{}", self.context, self.key)
    }
}

/// Many-to-one reference whose target may not be loaded yet.
pub enum Lazy<T> {
    /// Only the foreign key is known; resolving it costs one query unless the
    /// target is already managed.
    Unloaded(EntityId),
    /// Target is managed by the context.
    Loaded(Handle<T>),
}

impl<T> Lazy<T> {
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }

    pub fn handle(&self) -> Option<Handle<T>> {
        match self {
            Self::Loaded(handle) => Some(*handle),
            Self::Unloaded(_) => None,
        }
    }
}

impl<T> Clone for Lazy<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Lazy<T> {}

impl<T> PartialEq for Lazy<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Unloaded(left), Self::Unloaded(right)) => left == right,
            (Self::Loaded(left), Self::Loaded(right)) => left == right,
            _ => false,
        }
    }
}

impl<T> Debug for Lazy<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unloaded(id) => write!(f, "Unloaded({id})"),
            Self::Loaded(handle) => write!(f, "Loaded({handle:?})"),
        }
    }
}

/// One-to-many inverse view; never written, loaded on first access.
pub enum LazyCollection<T> {
    Unloaded,
    Loaded(Vec<Handle<T>>),
}

impl<T> LazyCollection<T> {
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }

    /// Loaded handles, or `None` when the collection was never initialized.
    pub fn handles(&self) -> Option<&[Handle<T>]> {
        match self {
            Self::Loaded(handles) => Some(handles),
            Self::Unloaded => None,
        }
    }
}

impl<T> Clone for LazyCollection<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Unloaded => Self::Unloaded,
            Self::Loaded(handles) => Self::Loaded(handles.clone()),
        }
    }
}

impl<T> Debug for LazyCollection<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unloaded => write!(f, "Unloaded"),
            Self::Loaded(handles) => f.debug_tuple("Loaded").field(handles).finish(),
        }
    }
}
