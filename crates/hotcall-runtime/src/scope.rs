//! Execution scopes: the unit of class ownership and scope-local storage.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub u64);

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(0);

type Local = Arc<dyn Any + Send + Sync>;

/// A scope that owns classes and can carry values attached by other
/// components. Attached values live exactly as long as the scope.
pub struct ExecutionScope {
    id: ScopeId,
    name: Arc<str>,
    locals: DashMap<u64, Local>,
}

impl ExecutionScope {
    pub(crate) fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            id: ScopeId(NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.into(),
            locals: DashMap::new(),
        })
    }

    pub(crate) fn bootstrap() -> Arc<Self> {
        Self::new("bootstrap")
    }

    pub fn id(&self) -> ScopeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return the value stored under `key`, running `init` to create it if
    /// absent.
    ///
    /// `init` runs at most once per key even when many threads race on an
    /// empty slot; the losers wait and receive the winner's value. Returns
    /// `None` if the slot holds a value of another type.
    pub fn local_or_init<T, F>(&self, key: u64, init: F) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        let local = self
            .locals
            .entry(key)
            .or_insert_with(|| Arc::new(init()) as Local)
            .clone();
        local.downcast::<T>().ok()
    }

    /// Return the value stored under `key` without creating it.
    pub fn local<T: Any + Send + Sync>(&self, key: u64) -> Option<Arc<T>> {
        let local = self.locals.get(&key)?.clone();
        local.downcast::<T>().ok()
    }
}

impl fmt::Debug for ExecutionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionScope")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("locals", &self.locals.len())
            .finish()
    }
}
