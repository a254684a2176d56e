// src/resource_manager.rs
//! Resource cache with deferred materialization.
//! - Keys: one real resource per key, shared by every holder
//! - Deferral: in deferred mode a request returns a pending handle without decoding anything
//! - Single-flight: a key that is being materialized cannot be requested again until it is done
//! - Draining: batch, one-at-a-time, or within a per-frame budget

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::context::{MaterializationContext, Mode};
use crate::deferred::DeferredHandle;
use crate::error::{Error, Result};
use crate::location::ResourceLocations;
use crate::pending::{HandleId, PendingRegistry};
use crate::source::{DecodeSource, SourceLocator};

// ---------- Loader ----------

/// Turns a byte source into a real resource. Runs on the thread that owns the GPU/audio context.
pub trait Loader {
    type Resource;
    type Params: Clone + fmt::Debug;

    fn load(&self, key: &str, source: &mut DecodeSource, params: &Self::Params) -> Result<Self::Resource>;

    /// Frees whatever the resource holds in the context. Called on unload.
    fn release(&self, _key: &str, _resource: &Self::Resource) {}
}

// ---------- Config ----------

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Initial value of the context's deferred flag.
    pub deferred: bool,
    /// Time `tick()` may spend materializing pending handles.
    pub frame_budget: Option<Duration>,
    /// Upper bound on handles materialized per `tick()`.
    pub max_per_tick: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            deferred: false,
            frame_budget: Some(Duration::from_millis(4)),
            max_per_tick: None,
        }
    }
}

impl CacheConfig {
    pub fn with_deferred(mut self, deferred: bool) -> Self {
        self.deferred = deferred;
        self
    }

    pub fn with_frame_budget(mut self, budget: Option<Duration>) -> Self {
        self.frame_budget = budget;
        self
    }

    pub fn with_max_per_tick(mut self, max: Option<usize>) -> Self {
        self.max_per_tick = max;
        self
    }
}

// ---------- Handle ----------

/// What a request hands back: the real resource, or a proxy for it.
pub enum Handle<L: Loader> {
    Ready(Arc<L::Resource>),
    Deferred(DeferredHandle<L>),
}

impl<L: Loader> Handle<L> {
    /// The real resource, materializing a deferred handle if necessary.
    pub fn resolve(&self) -> Result<Arc<L::Resource>> {
        match self {
            Handle::Ready(resource) => Ok(resource.clone()),
            Handle::Deferred(handle) => handle.ensure_materialized(),
        }
    }

    /// The real resource if it exists already.
    pub fn get(&self) -> Option<Arc<L::Resource>> {
        match self {
            Handle::Ready(resource) => Some(resource.clone()),
            Handle::Deferred(handle) => handle.get(),
        }
    }

    pub fn is_ready(&self) -> bool {
        match self {
            Handle::Ready(_) => true,
            Handle::Deferred(handle) => handle.is_materialized(),
        }
    }

    pub fn as_deferred(&self) -> Option<&DeferredHandle<L>> {
        match self {
            Handle::Deferred(handle) => Some(handle),
            Handle::Ready(_) => None,
        }
    }
}

impl<L: Loader> Clone for Handle<L> {
    fn clone(&self) -> Self {
        match self {
            Handle::Ready(resource) => Handle::Ready(resource.clone()),
            Handle::Deferred(handle) => Handle::Deferred(handle.clone()),
        }
    }
}

impl<L: Loader> fmt::Debug for Handle<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handle::Ready(_) => f.write_str("Handle::Ready"),
            Handle::Deferred(handle) => f.debug_tuple("Handle::Deferred").field(handle).finish(),
        }
    }
}

// ---------- Drain report ----------

/// Outcome of a drain, one entry per handle visited, in registry order.
pub struct DrainReport<L: Loader> {
    outcomes: Vec<(DeferredHandle<L>, Result<()>)>,
}

impl<L: Loader> Default for DrainReport<L> {
    fn default() -> Self {
        Self {
            outcomes: Vec::new(),
        }
    }
}

impl<L: Loader> DrainReport<L> {
    pub fn outcomes(&self) -> &[(DeferredHandle<L>, Result<()>)] {
        &self.outcomes
    }

    pub fn into_outcomes(self) -> Vec<(DeferredHandle<L>, Result<()>)> {
        self.outcomes
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn materialized(&self) -> usize {
        self.outcomes.iter().filter(|(_, r)| r.is_ok()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&DeferredHandle<L>, &Error)> {
        self.outcomes
            .iter()
            .filter_map(|(h, r)| r.as_ref().err().map(|e| (h, e)))
    }

    pub fn is_clean(&self) -> bool {
        self.outcomes.iter().all(|(_, r)| r.is_ok())
    }
}

impl<L: Loader> fmt::Debug for DrainReport<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrainReport")
            .field("visited", &self.outcomes.len())
            .field("materialized", &self.materialized())
            .finish()
    }
}

// ---------- Stats ----------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub deferred: u64,
    pub materialized: u64,
    pub failed: u64,
    pub pending: u64,
    pub entries: u64,
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hit_rate = if self.hits + self.misses > 0 {
            self.hits as f64 / (self.hits + self.misses) as f64 * 100.0
        } else {
            0.0
        };

        write!(
            f,
            "CacheStats {{ hits: {}, misses: {}, hit_rate: {:.2}%, deferred: {}, \
             materialized: {}, failed: {}, pending: {}, entries: {} }}",
            self.hits,
            self.misses,
            hit_rate,
            self.deferred,
            self.materialized,
            self.failed,
            self.pending,
            self.entries
        )
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    deferred: AtomicU64,
    materialized: AtomicU64,
    failed: AtomicU64,
}

// ---------- Shared state ----------

enum Entry<L: Loader> {
    Ready(Arc<L::Resource>),
    Deferred(DeferredHandle<L>),
}

impl<L: Loader> Entry<L> {
    fn to_handle(&self) -> Handle<L> {
        match self {
            Entry::Ready(resource) => Handle::Ready(resource.clone()),
            Entry::Deferred(handle) => Handle::Deferred(handle.clone()),
        }
    }
}

struct CacheState<L: Loader> {
    entries: HashMap<String, Entry<L>>,
    pending: PendingRegistry<DeferredHandle<L>>,
    in_flight: HashSet<String>,
}

/// Everything deferred handles need to reach back into; they hold it weakly.
pub(crate) struct Shared<L: Loader> {
    loader: L,
    context: MaterializationContext,
    state: Mutex<CacheState<L>>,
    next_id: AtomicU64,
    counters: Counters,
}

/// Removes the key from the in-flight set however the load ends.
struct FlightGuard<'a, L: Loader> {
    state: &'a Mutex<CacheState<L>>,
    key: String,
}

impl<L: Loader> Drop for FlightGuard<'_, L> {
    fn drop(&mut self) {
        self.state.lock().in_flight.remove(&self.key);
    }
}

impl<L: Loader> Shared<L> {
    fn begin_flight(&self, key: &str) -> Result<FlightGuard<'_, L>> {
        let mut state = self.state.lock();
        if !state.in_flight.insert(key.to_string()) {
            return Err(Error::ReentrantLoad {
                key: key.to_string(),
            });
        }
        Ok(FlightGuard {
            state: &self.state,
            key: key.to_string(),
        })
    }

    /// Runs the loader synchronously with deferral suppressed.
    pub(crate) fn materialize(
        &self,
        key: &str,
        locator: &SourceLocator,
        params: &L::Params,
    ) -> Result<L::Resource> {
        let _flight = self.begin_flight(key)?;
        let _scope = self.context.suppress_deferred();
        let started = Instant::now();

        let result = locator
            .open()
            .and_then(|mut source| self.loader.load(key, &mut source, params));

        match &result {
            Ok(_) => {
                self.counters.materialized.fetch_add(1, Ordering::Relaxed);
                log::debug!("materialized `{}` in {:?}", key, started.elapsed());
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                log::warn!("failed to materialize `{}`: {}", key, e);
            }
        }
        result
    }

    /// A handle finished materializing: it leaves the pending set.
    pub(crate) fn settle(&self, id: HandleId) {
        self.state.lock().pending.unregister(id);
    }

    /// Drops `key` and releases its resource if one was created.
    fn unload(&self, key: &str) -> bool {
        let entry = {
            let mut state = self.state.lock();
            let entry = state.entries.remove(key);
            if let Some(Entry::Deferred(handle)) = &entry {
                state.pending.unregister(handle.id());
            }
            entry
        };

        let resource = match entry {
            None => return false,
            Some(Entry::Ready(resource)) => Some(resource),
            Some(Entry::Deferred(handle)) => handle.get(),
        };
        if let Some(resource) = resource {
            self.loader.release(key, &resource);
        }
        log::debug!("unloaded `{}`", key);
        true
    }

    /// Releases through a handle. The key's entry goes first, so the next request loads afresh.
    /// A key that was unloaded and requested again belongs to the new handle and is left alone.
    pub(crate) fn release_handle(&self, handle: &DeferredHandle<L>) {
        {
            let mut state = self.state.lock();
            let owns_key = matches!(
                state.entries.get(handle.key()),
                Some(Entry::Deferred(current)) if current.same_handle(handle)
            );
            if owns_key {
                state.entries.remove(handle.key());
            }
            state.pending.unregister(handle.id());
        }
        if let Some(resource) = handle.get() {
            self.loader.release(handle.key(), &resource);
        }
        log::debug!("released `{}` through {}", handle.key(), handle.id());
    }
}

// ---------- ResourceCache ----------

pub struct ResourceCache<L: Loader> {
    shared: Arc<Shared<L>>,
    cfg: CacheConfig,
}

impl<L: Loader> ResourceCache<L> {
    pub fn new(loader: L, cfg: CacheConfig) -> Self {
        let shared = Arc::new(Shared {
            loader,
            context: MaterializationContext::new(cfg.deferred),
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                pending: PendingRegistry::new(),
                in_flight: HashSet::new(),
            }),
            next_id: AtomicU64::new(1),
            counters: Counters::default(),
        });
        Self { shared, cfg }
    }

    pub fn with_loader(loader: L) -> Self {
        Self::new(loader, CacheConfig::default())
    }

    pub fn loader(&self) -> &L {
        &self.shared.loader
    }

    pub fn context(&self) -> &MaterializationContext {
        &self.shared.context
    }

    pub fn config(&self) -> &CacheConfig {
        &self.cfg
    }

    // ---------- Requests ----------

    /// Returns the resource for `key`, creating it (now or later, per `mode`) on a miss.
    ///
    /// A hit returns whatever is stored for the key, pending or ready. A failed immediate load
    /// caches nothing, so the same key can be tried again.
    pub fn get_or_create(
        &self,
        key: &str,
        locator: SourceLocator,
        params: L::Params,
        mode: Mode,
    ) -> Result<Handle<L>> {
        let mut state = self.shared.state.lock();
        if state.in_flight.contains(key) {
            return Err(Error::ReentrantLoad {
                key: key.to_string(),
            });
        }
        if let Some(entry) = state.entries.get(key) {
            self.shared.counters.hits.fetch_add(1, Ordering::Relaxed);
            log::debug!("cache hit for `{}`", key);
            return Ok(entry.to_handle());
        }
        self.shared.counters.misses.fetch_add(1, Ordering::Relaxed);

        match mode {
            Mode::Deferred => {
                let id = HandleId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
                let handle = DeferredHandle::pending(
                    id,
                    key.to_string(),
                    locator,
                    params,
                    Arc::downgrade(&self.shared),
                );
                state.pending.register(handle.clone());
                state
                    .entries
                    .insert(key.to_string(), Entry::Deferred(handle.clone()));
                self.shared.counters.deferred.fetch_add(1, Ordering::Relaxed);
                log::debug!("deferred `{}` as {}", key, id);
                Ok(Handle::Deferred(handle))
            }
            Mode::Immediate => {
                drop(state);
                let resource = Arc::new(self.shared.materialize(key, &locator, &params)?);
                self.shared
                    .state
                    .lock()
                    .entries
                    .insert(key.to_string(), Entry::Ready(resource.clone()));
                Ok(Handle::Ready(resource))
            }
        }
    }

    /// Like [`get_or_create`](Self::get_or_create) with the mode taken from the context.
    pub fn request(&self, key: &str, locator: SourceLocator, params: L::Params) -> Result<Handle<L>> {
        let mode = self.shared.context.mode();
        self.get_or_create(key, locator, params, mode)
    }

    /// Requests an anonymous in-memory resource, keyed by its content fingerprint.
    pub fn request_bytes<B: Into<Arc<[u8]>>>(&self, bytes: B, params: L::Params) -> Result<Handle<L>> {
        let locator = SourceLocator::Bytes(bytes.into());
        let key = locator.fingerprint();
        self.request(&key, locator, params)
    }

    /// Requests `reference`, resolving it through `locations` only on a miss.
    pub fn request_located(
        &self,
        locations: &ResourceLocations,
        reference: &str,
        params: L::Params,
    ) -> Result<Handle<L>> {
        if let Some(handle) = self.get(reference) {
            self.shared.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(handle);
        }
        let locator = locations.resolve(reference)?;
        self.request(reference, locator, params)
    }

    /// Lookup only; never loads.
    pub fn get(&self, key: &str) -> Option<Handle<L>> {
        self.shared.state.lock().entries.get(key).map(Entry::to_handle)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.shared.state.lock().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ---------- Draining ----------

    /// Materializes every pending handle in registration order.
    ///
    /// One failure never stops the walk; all outcomes come back in the report. Failed handles
    /// stay registered.
    pub fn drain(&self) -> DrainReport<L> {
        let pending = self.shared.state.lock().pending.snapshot();
        let mut report = DrainReport::default();
        for handle in pending {
            self.drain_handle(handle, &mut report);
        }
        if !report.is_empty() {
            log::info!(
                "drained {} deferred resource(s), {} failed",
                report.len(),
                report.len() - report.materialized()
            );
        }
        report
    }

    /// Materializes the oldest pending handle. A failure leaves it at the front.
    pub fn drain_next(&self) -> Option<(DeferredHandle<L>, Result<()>)> {
        let handle = self.shared.state.lock().pending.front().cloned()?;
        let outcome = handle.ensure_materialized().map(|_| ());
        Some((handle, outcome))
    }

    /// Per-frame drain bounded by the configured time budget and per-tick cap.
    ///
    /// At least one pending handle is visited per call so loading always makes progress.
    pub fn tick(&self) -> DrainReport<L> {
        let pending = self.shared.state.lock().pending.snapshot();
        let started = Instant::now();
        let mut report = DrainReport::default();

        for handle in pending {
            if !report.is_empty() {
                if let Some(budget) = self.cfg.frame_budget {
                    if started.elapsed() >= budget {
                        break;
                    }
                }
                if let Some(max) = self.cfg.max_per_tick {
                    if report.len() >= max {
                        break;
                    }
                }
            }
            self.drain_handle(handle, &mut report);
        }
        report
    }

    fn drain_handle(&self, handle: DeferredHandle<L>, report: &mut DrainReport<L>) {
        // Loading an earlier handle may have pulled this one in already.
        if handle.is_materialized() {
            return;
        }
        let outcome = handle.ensure_materialized().map(|_| ());
        if let Err(e) = &outcome {
            log::warn!("deferred `{}` stays pending: {}", handle.key(), e);
        }
        report.outcomes.push((handle, outcome));
    }

    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().pending.remaining()
    }

    pub fn pending_keys(&self) -> Vec<String> {
        self.shared
            .state
            .lock()
            .pending
            .iter()
            .map(|h| h.key().to_string())
            .collect()
    }

    /// Loading progress in `[0, 1]` over everything deferred so far.
    pub fn progress(&self) -> f32 {
        self.shared.state.lock().pending.progress()
    }

    // ---------- Unloading ----------

    /// Forgets `key` and releases its resource if one was created.
    ///
    /// Outstanding handles to the key keep their `Arc`, but the resource behind it has been
    /// released in the context. The next request for the key loads a fresh one.
    pub fn unload(&self, key: &str) -> bool {
        self.shared.unload(key)
    }

    pub fn clear(&self) {
        let keys: Vec<String> = self.shared.state.lock().entries.keys().cloned().collect();
        for key in keys {
            self.unload(&key);
        }
        self.shared.state.lock().pending.reset_total();
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.shared.counters;
        let state = self.shared.state.lock();
        CacheStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            deferred: c.deferred.load(Ordering::Relaxed),
            materialized: c.materialized.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            pending: state.pending.remaining() as u64,
            entries: state.entries.len() as u64,
        }
    }
}

impl<L: Loader> fmt::Debug for ResourceCache<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceCache")
            .field("context", &self.shared.context)
            .field("stats", &self.stats())
            .finish()
    }
}
