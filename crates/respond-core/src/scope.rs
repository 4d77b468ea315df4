//! Request-scoped storage carried across asynchronous boundaries.
//!
//! A [`RequestScope`] hands out one [`ScopeInstance`] per request. The
//! instance holds request-local values keyed by type and is reference
//! counted: every holder calls [`ScopeInstance::release`] once, and the
//! last release clears the storage.
//!
//! [`RequestScope::run_in_scope`] runs a unit of work with the instance
//! passed in explicitly *and* installed as the task-local current scope,
//! so synchronous stage code several calls deep can reach it through
//! [`ScopeInstance::current`] without threading it through every signature.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

tokio::task_local! {
    static CURRENT_SCOPE: Arc<ScopeInstance>;
}

type Store = HashMap<TypeId, Box<dyn Any + Send + Sync>>;

// ── ScopeInstance ────────────────────────────────────────────────────────

/// Request-local storage for one in-flight request.
pub struct ScopeInstance {
    id: Uuid,
    created_at: DateTime<Utc>,
    store: RwLock<Store>,
    references: AtomicUsize,
    /// Live-instance counter of the owning scope, decremented on final release.
    live: Arc<AtomicUsize>,
}

impl ScopeInstance {
    fn new(live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::AcqRel);
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            store: RwLock::new(HashMap::new()),
            references: AtomicUsize::new(1),
            live,
        }
    }

    /// The scope instance active on the current task, if any.
    pub fn current() -> Option<Arc<ScopeInstance>> {
        CURRENT_SCOPE.try_with(Arc::clone).ok()
    }

    /// Unique id of this instance.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// When the instance was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Store a request-local value, returning the previous value of that type.
    pub fn put<T: Any + Send + Sync>(&self, value: T) -> Option<T> {
        let mut store = self.store.write().unwrap_or_else(PoisonError::into_inner);
        store
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|prev| prev.downcast::<T>().ok())
            .map(|prev| *prev)
    }

    /// Fetch a clone of the request-local value of type `T`.
    pub fn get<T: Any + Send + Sync + Clone>(&self) -> Option<T> {
        let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
        store
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    /// Whether a value of type `T` is stored.
    pub fn contains<T: Any>(&self) -> bool {
        let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
        store.contains_key(&TypeId::of::<T>())
    }

    /// Take an additional reference; it must be matched by a [`release`](Self::release).
    pub fn reference(self: &Arc<Self>) -> Arc<Self> {
        self.references.fetch_add(1, Ordering::AcqRel);
        Arc::clone(self)
    }

    /// Outstanding references.
    pub fn references(&self) -> usize {
        self.references.load(Ordering::Acquire)
    }

    /// Whether every reference has been released.
    pub fn is_released(&self) -> bool {
        self.references() == 0
    }

    /// Drop one reference. The last release clears the storage.
    ///
    /// Returns `true` when this call released the final reference. Releasing
    /// an instance with no outstanding references is logged and ignored.
    pub fn release(&self) -> bool {
        let prev = self
            .references
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match prev {
            Ok(1) => {
                self.store
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clear();
                self.live.fetch_sub(1, Ordering::AcqRel);
                let age_ms = (Utc::now() - self.created_at).num_milliseconds();
                debug!(scope = %self.id, age_ms, "request scope instance released");
                true
            }
            Ok(_) => false,
            Err(_) => {
                warn!(scope = %self.id, "release called on an already released scope instance");
                false
            }
        }
    }
}

impl std::fmt::Debug for ScopeInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeInstance")
            .field("id", &self.id)
            .field("references", &self.references())
            .finish_non_exhaustive()
    }
}

// ── ReleaseGuard ─────────────────────────────────────────────────────────

/// Releases one reference of a scope instance when dropped.
///
/// Dropping happens on every exit path, including early returns and
/// unwinding, so holding a guard for the duration of a unit of work
/// guarantees the matching release.
#[must_use = "the scope instance is released as soon as the guard is dropped"]
pub struct ReleaseGuard {
    instance: Arc<ScopeInstance>,
}

impl ReleaseGuard {
    /// Guard an existing reference of `instance`.
    pub fn new(instance: Arc<ScopeInstance>) -> Self {
        Self { instance }
    }

    /// The guarded instance.
    pub fn instance(&self) -> &Arc<ScopeInstance> {
        &self.instance
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.instance.release();
    }
}

// ── RequestScope ─────────────────────────────────────────────────────────

/// Factory and runner for request scope instances.
///
/// Cheap to clone; clones share the live-instance counter.
#[derive(Clone, Default)]
pub struct RequestScope {
    live: Arc<AtomicUsize>,
}

impl RequestScope {
    /// Create a new request scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh instance holding one reference.
    pub fn create_instance(&self) -> Arc<ScopeInstance> {
        let instance = Arc::new(ScopeInstance::new(Arc::clone(&self.live)));
        debug!(scope = %instance.id(), "request scope instance created");
        instance
    }

    /// Number of instances created by this scope that are not fully released.
    pub fn live_instances(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Run `work` with `instance` active.
    ///
    /// The instance is handed to `work` and also installed as the task-local
    /// current scope for every poll of the returned future.
    pub async fn run_in_scope<F, Fut, T>(&self, instance: &Arc<ScopeInstance>, work: F) -> T
    where
        F: FnOnce(Arc<ScopeInstance>) -> Fut,
        Fut: Future<Output = T>,
    {
        CURRENT_SCOPE
            .scope(Arc::clone(instance), work(Arc::clone(instance)))
            .await
    }
}
