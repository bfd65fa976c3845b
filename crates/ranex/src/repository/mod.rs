// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Entity repository with serialized asynchronous teardown.
//!
//! Holds per-connection state objects (DU contexts, UE contexts) keyed by a
//! bounded index that is reused after removal. Removal is never performed
//! synchronously inside the handler that decides it: [`EntityRepository::request_removal`]
//! schedules an erase task on the entity's ordered lane, behind any
//! in-flight procedure already holding that lane. Once the erase ran, every
//! later lookup of the key fails explicitly, never with a stale reference.
//!
//! Procedures must re-resolve the entity by key at the start of every
//! resumption step ([`EntityRepository::try_with_entity`]) instead of caching
//! a reference across a suspension point.

pub mod sequencer;

pub use sequencer::{KeyedTaskSequencer, LaneToken, SequencedTask};

use crate::exec::TaskExecutor;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Index of an entity inside a repository. Drawn from `0..capacity` and
/// reused after removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityId(u32);

impl EntityId {
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors returned by [`EntityRepository::add`].
#[derive(Debug)]
pub enum RepositoryError {
    /// Every index in the bounded range is occupied.
    CapacityExhausted { capacity: usize },
}

impl fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryError::CapacityExhausted { capacity } => {
                write!(f, "maximum number of entities reached ({})", capacity)
            }
        }
    }
}

impl std::error::Error for RepositoryError {}

struct RepoShared<T> {
    slots: Mutex<Vec<Option<T>>>,
}

/// Bounded table of live entities plus their ordered teardown lanes.
///
/// All mutation funnels through tasks on the control-plane executor passed at
/// construction (single-writer discipline by construction); the internal lock
/// only makes that discipline `Sync`.
pub struct EntityRepository<T> {
    shared: Arc<RepoShared<T>>,
    sequencer: KeyedTaskSequencer,
    capacity: usize,
}

impl<T> Clone for EntityRepository<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            sequencer: self.sequencer.clone(),
            capacity: self.capacity,
        }
    }
}

impl<T: Send + 'static> EntityRepository<T> {
    /// Repository over indices `0..capacity`, serializing per-entity async
    /// work onto `ctrl_executor`.
    pub fn new(capacity: usize, ctrl_executor: Arc<dyn TaskExecutor>) -> Self {
        assert!(capacity > 0, "entity repository needs a non-zero capacity");
        Self {
            shared: Arc::new(RepoShared {
                slots: Mutex::new((0..capacity).map(|_| None).collect()),
            }),
            sequencer: KeyedTaskSequencer::new(ctrl_executor),
            capacity,
        }
    }

    /// Insert an entity at the lowest free index.
    pub fn add(&self, entity: T) -> Result<EntityId, RepositoryError> {
        let mut slots = self.shared.slots.lock();
        match slots.iter_mut().enumerate().find(|(_, s)| s.is_none()) {
            Some((index, slot)) => {
                *slot = Some(entity);
                let id = EntityId(index as u32);
                log::info!("[ranex] added entity {}", id);
                Ok(id)
            }
            None => {
                log::error!(
                    "[ranex] entity creation failed: maximum number of entities reached ({})",
                    self.capacity
                );
                Err(RepositoryError::CapacityExhausted {
                    capacity: self.capacity,
                })
            }
        }
    }

    /// True while `id` maps to a live entity.
    pub fn contains(&self, id: EntityId) -> bool {
        self.shared
            .slots
            .lock()
            .get(id.0 as usize)
            .is_some_and(Option::is_some)
    }

    /// Run `f` against the entity. Panics when the key is absent; handlers
    /// that merely suspect the entity still exists must use
    /// [`try_with_entity`](Self::try_with_entity).
    pub fn with_entity<R>(&self, id: EntityId, f: impl FnOnce(&mut T) -> R) -> R {
        let mut slots = self.shared.slots.lock();
        let entity = slots
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .unwrap_or_else(|| panic!("entity not found for index {}", id));
        f(entity)
    }

    /// Run `f` against the entity, or return `None` when the key was
    /// removed. This is the re-resolution step every asynchronous procedure
    /// performs after a suspension point.
    pub fn try_with_entity<R>(&self, id: EntityId, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut slots = self.shared.slots.lock();
        let entity = slots.get_mut(id.0 as usize)?.as_mut()?;
        Some(f(entity))
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.shared
            .slots
            .lock()
            .iter()
            .filter(|s| s.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueue entity-scoped asynchronous work on `id`'s ordered lane.
    pub fn schedule(&self, id: EntityId, task: SequencedTask) {
        self.sequencer.enqueue(id.0, task);
    }

    /// Schedule removal of `id` behind any in-flight procedure on its lane.
    ///
    /// Non-blocking; the erase is eventually consistent. Requesting removal
    /// of an index outside the bounded range is a programming error.
    pub fn request_removal(&self, id: EntityId) {
        assert!(
            (id.0 as usize) < self.capacity,
            "invalid entity index {}",
            id
        );
        log::debug!("[ranex] scheduling entity {} removal", id);

        let shared = Arc::clone(&self.shared);
        self.sequencer.enqueue(
            id.0,
            Box::new(move |token| {
                let removed = shared.slots.lock()[id.0 as usize].take();
                assert!(
                    removed.is_some(),
                    "removal ran for missing entity index {}",
                    id
                );
                log::info!("[ranex] removed entity {}", id);
                token.release();
            }),
        );
    }
}
