// src/deferred.rs
//! Proxy handles that materialize their resource on first use.
//!
//! A [`DeferredHandle`] is either `Pending` (it still holds the locator and the parameters it
//! was requested with) or `Ready` (it holds the real resource). Every capability call goes
//! through [`DeferredHandle::ensure_materialized`], so the materialize-or-forward decision lives
//! in exactly one place.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::pending::{HandleId, Registrant};
use crate::resource_manager::{Loader, Shared};
use crate::source::SourceLocator;

enum Slot<L: Loader> {
    Pending {
        locator: SourceLocator,
        params: L::Params,
    },
    Ready(Arc<L::Resource>),
}

struct Inner<L: Loader> {
    id: HandleId,
    key: String,
    slot: Mutex<Slot<L>>,
    owner: Weak<Shared<L>>,
}

pub struct DeferredHandle<L: Loader> {
    inner: Arc<Inner<L>>,
}

impl<L: Loader> Clone for DeferredHandle<L> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<L: Loader> DeferredHandle<L> {
    pub(crate) fn pending(
        id: HandleId,
        key: String,
        locator: SourceLocator,
        params: L::Params,
        owner: Weak<Shared<L>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                id,
                key,
                slot: Mutex::new(Slot::Pending { locator, params }),
                owner,
            }),
        }
    }

    pub fn id(&self) -> HandleId {
        self.inner.id
    }

    /// The cache key this handle was requested under.
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn is_materialized(&self) -> bool {
        matches!(*self.inner.slot.lock(), Slot::Ready(_))
    }

    /// The real resource if it exists already. Never triggers a load.
    pub fn get(&self) -> Option<Arc<L::Resource>> {
        match &*self.inner.slot.lock() {
            Slot::Ready(resource) => Some(resource.clone()),
            Slot::Pending { .. } => None,
        }
    }

    /// Parameters the handle will be materialized with, while it is still pending.
    pub fn pending_params(&self) -> Option<L::Params> {
        match &*self.inner.slot.lock() {
            Slot::Pending { params, .. } => Some(params.clone()),
            Slot::Ready(_) => None,
        }
    }

    pub fn same_handle(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns the real resource, loading it first if needed.
    ///
    /// Loading happens at most once: once the slot is `Ready` this is a lock and a clone. If the
    /// loader fails the handle stays pending and registered, and a later call tries again.
    pub fn ensure_materialized(&self) -> Result<Arc<L::Resource>> {
        let (locator, params) = match &*self.inner.slot.lock() {
            Slot::Ready(resource) => return Ok(resource.clone()),
            Slot::Pending { locator, params } => (locator.clone(), params.clone()),
        };

        let owner = self
            .inner
            .owner
            .upgrade()
            .ok_or_else(|| Error::Detached(self.inner.key.clone()))?;

        let resource = owner
            .materialize(&self.inner.key, &locator, &params)
            .map_err(|e| Error::loader(&self.inner.key, e))?;
        let resource = Arc::new(resource);

        *self.inner.slot.lock() = Slot::Ready(resource.clone());
        owner.settle(self.inner.id);
        Ok(resource)
    }

    /// Runs `f` against the real resource.
    pub fn with<R>(&self, f: impl FnOnce(&L::Resource) -> R) -> Result<R> {
        let resource = self.ensure_materialized()?;
        Ok(f(&resource))
    }

    /// Releases the resource through the owning cache and drops the key from it, so the next
    /// request for the key materializes a fresh resource.
    ///
    /// A handle that never materialized is unregistered without loading. Once the cache is gone
    /// there is nothing left to release through.
    pub fn release(&self) {
        match self.inner.owner.upgrade() {
            Some(owner) => owner.release_handle(self),
            None => log::debug!("release of `{}` after its cache was dropped", self.inner.key),
        }
    }
}

impl<L: Loader> Registrant for DeferredHandle<L> {
    fn registry_id(&self) -> HandleId {
        self.inner.id
    }
}

impl<L: Loader> PartialEq for DeferredHandle<L> {
    fn eq(&self, other: &Self) -> bool {
        self.same_handle(other)
    }
}

impl<L: Loader> Eq for DeferredHandle<L> {}

impl<L: Loader> fmt::Debug for DeferredHandle<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredHandle")
            .field("id", &self.inner.id)
            .field("key", &self.inner.key)
            .field("materialized", &self.is_materialized())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource_manager::{CacheConfig, ResourceCache};
    use crate::source::DecodeSource;
    use std::io::Read;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Reads the source as text. Fails while `broken` is set.
    #[derive(Default)]
    struct TextLoader {
        loads: AtomicUsize,
        broken: AtomicBool,
    }

    impl Loader for TextLoader {
        type Resource = String;
        type Params = ();

        fn load(&self, key: &str, source: &mut DecodeSource, _params: &()) -> Result<String> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.broken.load(Ordering::SeqCst) {
                return Err(Error::custom(format!("{} unavailable", key)));
            }
            let mut text = String::new();
            source.read_to_string(&mut text)?;
            Ok(text)
        }
    }

    fn deferred_cache() -> ResourceCache<TextLoader> {
        ResourceCache::new(TextLoader::default(), CacheConfig::default().with_deferred(true))
    }

    fn pending(cache: &ResourceCache<TextLoader>, key: &str, text: &str) -> DeferredHandle<TextLoader> {
        let handle = cache
            .request(key, SourceLocator::from(text.as_bytes()), ())
            .unwrap();
        handle.as_deferred().unwrap().clone()
    }

    #[test]
    fn loads_once_and_then_forwards() {
        let cache = deferred_cache();
        let handle = pending(&cache, "greeting", "hello");
        assert!(handle.get().is_none());
        assert_eq!(handle.pending_params(), Some(()));

        let first = handle.ensure_materialized().unwrap();
        let second = handle.ensure_materialized().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(handle.with(|s| s.len()).unwrap(), 5);
        assert_eq!(cache.loader().loads.load(Ordering::SeqCst), 1);
        assert!(handle.pending_params().is_none());
    }

    #[test]
    fn failure_keeps_the_handle_pending_for_a_retry() {
        let cache = deferred_cache();
        let handle = pending(&cache, "greeting", "hello");
        cache.loader().broken.store(true, Ordering::SeqCst);

        let err = handle.ensure_materialized().unwrap_err();
        assert!(err.is_loader());
        assert!(!handle.is_materialized());
        assert_eq!(cache.pending_count(), 1);

        cache.loader().broken.store(false, Ordering::SeqCst);
        assert_eq!(*handle.ensure_materialized().unwrap(), "hello");
        assert_eq!(cache.pending_count(), 0);
        assert_eq!(cache.loader().loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dropped_cache_detaches_pending_handles() {
        let cache = deferred_cache();
        let handle = pending(&cache, "greeting", "hello");
        drop(cache);

        assert!(matches!(handle.ensure_materialized(), Err(Error::Detached(key)) if key == "greeting"));
        handle.release();
    }

    #[test]
    fn releasing_a_pending_handle_never_loads_it() {
        let cache = deferred_cache();
        let handle = pending(&cache, "greeting", "hello");

        handle.release();
        assert_eq!(cache.loader().loads.load(Ordering::SeqCst), 0);
        assert_eq!(cache.pending_count(), 0);
        assert!(!cache.contains("greeting"));
    }
}
