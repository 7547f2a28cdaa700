// Object pool
//
// Process-wide free lists of reusable scratch objects, keyed by type. A write
// takes a serialization context from the pool, resets it and hands it back when
// done, so vtable and string caches keep their allocations between writes.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, OnceLock};

/// Upper bound on idle objects kept per type.
const MAX_IDLE_PER_TYPE: usize = 32;

/// A thread-safe pool of idle objects of any `Send` type.
#[derive(Debug, Default)]
pub struct ObjectPool {
    idle: Mutex<HashMap<TypeId, Vec<Box<dyn Any + Send>>>>,
}

impl ObjectPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TypeId, Vec<Box<dyn Any + Send>>>> {
        // A panic while holding the lock cannot leave the free lists inconsistent.
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Takes an idle `T`, or a fresh default one when the pool has none.
    pub fn take<T: Any + Send + Default>(&self) -> T {
        let boxed = self
            .lock()
            .get_mut(&TypeId::of::<T>())
            .and_then(|idle| idle.pop());
        boxed
            .and_then(|object| object.downcast::<T>().ok())
            .map(|object| *object)
            .unwrap_or_default()
    }

    /// Returns `object` to the pool. Dropped when the pool is full.
    pub fn give<T: Any + Send>(&self, object: T) {
        let mut idle = self.lock();
        let list = idle.entry(TypeId::of::<T>()).or_default();
        if list.len() < MAX_IDLE_PER_TYPE {
            list.push(Box::new(object));
        }
    }

    /// Number of idle objects of type `T`.
    pub fn idle<T: Any>(&self) -> usize {
        self.lock().get(&TypeId::of::<T>()).map_or(0, Vec::len)
    }
}

/// The pool shared by every serializer in the process.
pub fn global() -> &'static ObjectPool {
    static POOL: OnceLock<ObjectPool> = OnceLock::new();
    POOL.get_or_init(ObjectPool::new)
}
