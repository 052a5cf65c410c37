use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// A registry mapping opaque handles to shared socket objects.
///
/// The registry holds the library-side strong reference to each object;
/// `remove` and `pop_any` hand that reference back, which is how explicit
/// deletion and teardown drain the library.
pub struct HandleRegistry<H, T> {
    map: Mutex<BTreeMap<H, Arc<T>>>,
}

impl<H, T> HandleRegistry<H, T>
where
    H: Ord + Copy + fmt::Debug,
{
    pub fn new() -> Self {
        Self {
            map: Mutex::new(BTreeMap::new()),
        }
    }

    /// Adds an object under `handle`. Registering the same handle twice is
    /// a programmer error and panics.
    pub fn add(&self, handle: H, obj: Arc<T>) {
        let prev = self.map.lock().unwrap().insert(handle, obj);
        assert!(prev.is_none(), "handle {:?} registered twice", handle);
    }

    pub fn find(&self, handle: H) -> Option<Arc<T>> {
        self.map.lock().unwrap().get(&handle).cloned()
    }

    pub fn remove(&self, handle: H) -> Option<Arc<T>> {
        self.map.lock().unwrap().remove(&handle)
    }

    /// Removes and returns one object, in handle order; `None` once empty.
    pub fn pop_any(&self) -> Option<Arc<T>> {
        self.map.lock().unwrap().pop_first().map(|(_, obj)| obj)
    }

    pub fn is_empty(&self) -> bool {
        self.map.lock().unwrap().is_empty()
    }
}

impl<H, T> Default for HandleRegistry<H, T>
where
    H: Ord + Copy + fmt::Debug,
{
    fn default() -> Self {
        Self::new()
    }
}
