// src/context.rs
//! Materialization mode shared by a cache and the handles it hands out.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether a request produces a real resource now or a pending handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Immediate,
    Deferred,
}

impl Mode {
    pub fn is_deferred(self) -> bool {
        self == Mode::Deferred
    }
}

/// Flag set consulted when a request does not name its mode explicitly.
///
/// Changes made through [`MaterializationContext::scoped`] are undone when the returned guard
/// drops, on every exit path.
#[derive(Default)]
pub struct MaterializationContext {
    deferred: AtomicBool,
}

impl MaterializationContext {
    pub fn new(deferred: bool) -> Self {
        Self {
            deferred: AtomicBool::new(deferred),
        }
    }

    #[inline]
    pub fn is_deferred(&self) -> bool {
        self.deferred.load(Ordering::Acquire)
    }

    #[inline]
    pub fn mode(&self) -> Mode {
        if self.is_deferred() {
            Mode::Deferred
        } else {
            Mode::Immediate
        }
    }

    /// Sets the flag outright. Returns the previous value.
    pub fn set_deferred(&self, deferred: bool) -> bool {
        self.deferred.swap(deferred, Ordering::AcqRel)
    }

    /// Sets the flag until the guard drops.
    #[must_use = "the previous mode is restored as soon as the guard is dropped"]
    pub fn scoped(&self, deferred: bool) -> ContextScope<'_> {
        let previous = self.set_deferred(deferred);
        ContextScope {
            context: self,
            previous,
        }
    }

    /// Forces synchronous loading for the lifetime of the guard.
    #[must_use = "the previous mode is restored as soon as the guard is dropped"]
    pub fn suppress_deferred(&self) -> ContextScope<'_> {
        self.scoped(false)
    }
}

impl fmt::Debug for MaterializationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaterializationContext")
            .field("mode", &self.mode())
            .finish()
    }
}

pub struct ContextScope<'a> {
    context: &'a MaterializationContext,
    previous: bool,
}

impl ContextScope<'_> {
    /// Value the flag will go back to.
    pub fn previous(&self) -> bool {
        self.previous
    }
}

impl Drop for ContextScope<'_> {
    fn drop(&mut self) {
        self.context.deferred.store(self.previous, Ordering::Release);
    }
}
