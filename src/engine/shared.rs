// Copyright 2024-2026 GAVID Contributors
// Licensed under the Apache License, Version 2.0

//! Lazily initialized shared handle.

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

/// One lazily built `Arc<T>` shared by every caller.
///
/// Initialization is check, lock, check, init: the fast path is a lock-free
/// read, and concurrent first callers serialize on the guard so the
/// initializer runs once. A failed initializer leaves the slot empty.
pub struct SharedSlot<T> {
    value: OnceLock<Arc<T>>,
    init_guard: Mutex<()>,
}

impl<T> SharedSlot<T> {
    pub const fn new() -> Self {
        Self {
            value: OnceLock::new(),
            init_guard: parking_lot::const_mutex(()),
        }
    }

    /// The value if it has been built.
    pub fn get(&self) -> Option<Arc<T>> {
        self.value.get().cloned()
    }

    pub fn is_initialized(&self) -> bool {
        self.value.get().is_some()
    }

    /// Return the shared value, building it with `init` on first use.
    pub fn get_or_try_init<E, F>(&self, init: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        if let Some(value) = self.value.get() {
            return Ok(value.clone());
        }

        let _guard = self.init_guard.lock();
        if let Some(value) = self.value.get() {
            return Ok(value.clone());
        }

        let value = Arc::new(init()?);
        // The guard is held, so no other writer can have filled the slot.
        let _ = self.value.set(value.clone());
        Ok(value)
    }
}

impl<T> Default for SharedSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_initializes_once() {
        let slot = SharedSlot::new();
        let calls = AtomicUsize::new(0);
        let a = slot
            .get_or_try_init(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ()>(7)
            })
            .unwrap();
        let b = slot
            .get_or_try_init(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ()>(8)
            })
            .unwrap();
        assert_eq!(*a, 7);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failure_leaves_slot_empty() {
        let slot: SharedSlot<u32> = SharedSlot::new();
        assert_eq!(slot.get_or_try_init(|| Err("boom")).unwrap_err(), "boom");
        assert!(!slot.is_initialized());
        assert_eq!(*slot.get_or_try_init(|| Ok::<_, &str>(3)).unwrap(), 3);
    }

    #[test]
    fn test_concurrent_first_access_builds_once() {
        let slot = Arc::new(SharedSlot::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let slot = slot.clone();
                let calls = calls.clone();
                std::thread::spawn(move || {
                    slot.get_or_try_init(|| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(std::time::Duration::from_millis(20));
                        Ok::<_, ()>(String::from("engine"))
                    })
                    .unwrap()
                })
            })
            .collect();
        let values: Vec<Arc<String>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(values.iter().all(|v| Arc::ptr_eq(v, &values[0])));
    }
}
