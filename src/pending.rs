// src/pending.rs
//! Ordered set of resources that still have to be materialized.

use std::collections::HashSet;
use std::fmt;

/// Stable identity of a deferred handle.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct HandleId(pub(crate) u64);

impl HandleId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Anything that can sit in a [`PendingRegistry`].
pub trait Registrant {
    fn registry_id(&self) -> HandleId;
}

/// FIFO by registration, duplicate-free.
///
/// Besides membership it counts every registration it has ever accepted, so a loading screen
/// can show `progress()` while the registry drains.
pub struct PendingRegistry<H> {
    entries: Vec<H>,
    ids: HashSet<HandleId>,
    total: usize,
}

impl<H> Default for PendingRegistry<H> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            ids: HashSet::new(),
            total: 0,
        }
    }
}

impl<H: Registrant> PendingRegistry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `handle`. Returns false (and changes nothing) if it is already registered.
    pub fn register(&mut self, handle: H) -> bool {
        if !self.ids.insert(handle.registry_id()) {
            return false;
        }
        self.entries.push(handle);
        self.total += 1;
        true
    }

    /// Removes the handle with `id`. Absent ids are ignored.
    pub fn unregister(&mut self, id: HandleId) -> Option<H> {
        if !self.ids.remove(&id) {
            return None;
        }
        // Drains take from the front, so this usually stops at once.
        let pos = self.entries.iter().position(|h| h.registry_id() == id)?;
        Some(self.entries.remove(pos))
    }

    pub fn contains(&self, id: HandleId) -> bool {
        self.ids.contains(&id)
    }

    pub fn front(&self) -> Option<&H> {
        self.entries.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &H> {
        self.entries.iter()
    }

    /// Number of handles still pending.
    pub fn remaining(&self) -> usize {
        self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of handles ever registered since creation or the last `reset_total`.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Completed fraction in `[0, 1]`; an untouched registry counts as done.
    pub fn progress(&self) -> f32 {
        if self.total == 0 {
            return 1.0;
        }
        let done = self.total.saturating_sub(self.entries.len());
        done as f32 / self.total as f32
    }

    pub fn reset_total(&mut self) {
        self.total = self.entries.len();
    }

    pub fn clear(&mut self) -> Vec<H> {
        self.ids.clear();
        std::mem::take(&mut self.entries)
    }
}

impl<H: Registrant + Clone> PendingRegistry<H> {
    /// Copy of the current members in registration order.
    pub fn snapshot(&self) -> Vec<H> {
        self.entries.clone()
    }
}

impl<H> fmt::Debug for PendingRegistry<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRegistry")
            .field("remaining", &self.entries.len())
            .field("total", &self.total)
            .finish()
    }
}
