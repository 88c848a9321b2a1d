//! Process-wide registry of live instruments.
//!
//! Instruments register themselves once created; any part of the program can then look up
//! "the" instance of a type without threading a handle through every call. The registry holds
//! [`Weak`] references only, so it never keeps an instrument (or its port) alive. Dead
//! entries are pruned on every access.
//!
//! Call [`clear`] on teardown, or between tests that register instances.

use parking_lot::Mutex;
use std::any::{Any, TypeId};
use std::sync::{Arc, LazyLock, Weak};
use tracing::debug;

struct Registered {
    type_id: TypeId,
    instance: Weak<dyn Any + Send + Sync>,
}

static REGISTRY: LazyLock<Mutex<Vec<Registered>>> = LazyLock::new(|| Mutex::new(Vec::new()));

/// Track `instance`. Registering the same instance twice is a no-op.
pub fn register<T: Any + Send + Sync>(instance: &Arc<T>) {
    let weak: Weak<dyn Any + Send + Sync> = Arc::<T>::downgrade(instance);
    let mut entries = REGISTRY.lock();
    entries.retain(|e| e.instance.strong_count() > 0);
    if entries
        .iter()
        .any(|e| std::ptr::addr_eq(e.instance.as_ptr(), weak.as_ptr()))
    {
        return;
    }
    entries.push(Registered {
        type_id: TypeId::of::<T>(),
        instance: weak,
    });
    debug!(
        instrument_type = std::any::type_name::<T>(),
        live = entries.len(),
        "Registered instrument"
    );
}

/// Live instances of `T`, oldest first.
pub fn instances<T: Any + Send + Sync>() -> Vec<Arc<T>> {
    let mut entries = REGISTRY.lock();
    entries.retain(|e| e.instance.strong_count() > 0);
    entries
        .iter()
        .filter(|e| e.type_id == TypeId::of::<T>())
        .filter_map(|e| e.instance.upgrade())
        .filter_map(|any| any.downcast::<T>().ok())
        .collect()
}

/// Oldest live instance of `T`.
pub fn first_instance<T: Any + Send + Sync>() -> Option<Arc<T>> {
    instances::<T>().into_iter().next()
}

/// Number of live registered instances of any type.
pub fn len() -> usize {
    let mut entries = REGISTRY.lock();
    entries.retain(|e| e.instance.strong_count() > 0);
    entries.len()
}

/// Forget every instance.
pub fn clear() {
    REGISTRY.lock().clear();
}
