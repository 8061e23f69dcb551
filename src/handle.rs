//! Shared-ownership handles with explicit handover.
//!
//! Engine objects that are referenced from more than one place (programs,
//! textures, models) live behind [`Shared<T>`]. Cloning retains, dropping
//! releases, and the payload is destroyed exactly once when the last handle
//! goes away. The core is single-threaded cooperative, so the handle is
//! `Rc`-backed and deliberately not `Send`.
//!
//! [`Passed<T>`] is the handover sink: a constructor that consumes one of its
//! option fields takes `impl Into<Passed<T>>`. Moving a `Shared` in (or
//! calling [`Shared::pass`]) transfers the caller's reference without an
//! extra retain; passing `&Shared` retains. If the constructor fails before
//! extracting the sink, dropping the sink releases the transferred reference,
//! so no accounting leaks across the error path.

use std::cell::RefCell;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use rustc_hash::FxHashMap;

/// A shared reference to an engine object.
pub struct Shared<T>(Rc<T>);

impl<T> Shared<T> {
    pub fn new(value: T) -> Self {
        Shared(Rc::new(value))
    }

    /// Hands the caller's reference over to a callee.
    ///
    /// The returned sink transfers ownership into a consuming constructor;
    /// the caller's binding is moved out and no longer usable.
    #[must_use]
    pub fn pass(self) -> Passed<T> {
        Passed(Some(self))
    }

    /// Number of live handles to this object.
    #[must_use]
    pub fn strong_count(this: &Self) -> usize {
        Rc::strong_count(&this.0)
    }

    /// Whether two handles refer to the same object.
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }

    /// Unwraps the payload if this is the last handle; used at teardown so
    /// the sole owner can release backend resources.
    pub fn try_into_inner(this: Self) -> std::result::Result<T, Self> {
        Rc::try_unwrap(this.0).map_err(Shared)
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Shared(Rc::clone(&self.0))
    }
}

impl<T> Deref for Shared<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Shared").field(&self.0).finish()
    }
}

/// A reference in flight between a caller and a consuming constructor.
pub struct Passed<T>(Option<Shared<T>>);

impl<T> Passed<T> {
    /// Extracts the transferred handle. Called once by the consumer.
    #[must_use]
    pub fn take(mut self) -> Shared<T> {
        self.0.take().expect("handle already extracted")
    }
}

impl<T> From<Shared<T>> for Passed<T> {
    /// Moving a handle in is the explicit handover: no extra retain.
    fn from(handle: Shared<T>) -> Self {
        Passed(Some(handle))
    }
}

impl<T> From<&Shared<T>> for Passed<T> {
    /// Borrowing retains: the caller keeps its own reference.
    fn from(handle: &Shared<T>) -> Self {
        Passed(Some(handle.clone()))
    }
}

/// Diagnostic registry of live object counts per type name.
///
/// Owned by the engine context; a side channel for leak hunting, never used
/// for correctness.
#[derive(Default)]
pub struct InstanceRegistry {
    counts: RefCell<FxHashMap<&'static str, i64>>,
}

impl InstanceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self, class: &'static str) {
        *self.counts.borrow_mut().entry(class).or_insert(0) += 1;
    }

    pub fn dropped(&self, class: &'static str) {
        let mut counts = self.counts.borrow_mut();
        let n = counts.entry(class).or_insert(0);
        *n -= 1;
        if *n < 0 {
            log::warn!("instance registry underflow for {class}");
        }
    }

    #[must_use]
    pub fn live(&self, class: &str) -> i64 {
        self.counts.borrow().get(class).copied().unwrap_or(0)
    }

    /// One line per class with a nonzero live count, for debug overlays.
    #[must_use]
    pub fn report(&self) -> String {
        let counts = self.counts.borrow();
        let mut classes: Vec<_> = counts.iter().filter(|&(_, &n)| n != 0).collect();
        classes.sort_by_key(|(name, _)| *name);
        classes
            .iter()
            .map(|(name, n)| format!("{name}: {n}\n"))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc as StdRc;

    struct DropCounter(StdRc<Cell<u32>>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn test_new_then_drop_destroys_once() {
        let drops = StdRc::new(Cell::new(0));
        let handle = Shared::new(DropCounter(drops.clone()));
        drop(handle);
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn test_clone_retains() {
        let drops = StdRc::new(Cell::new(0));
        let a = Shared::new(DropCounter(drops.clone()));
        let b = a.clone();
        assert_eq!(Shared::strong_count(&a), 2);
        drop(a);
        assert_eq!(drops.get(), 0);
        drop(b);
        assert_eq!(drops.get(), 1);
    }

    struct Consumer {
        held: Shared<DropCounter>,
    }

    impl Consumer {
        fn new(field: impl Into<Passed<DropCounter>>) -> Self {
            Consumer {
                held: field.into().take(),
            }
        }
    }

    #[test]
    fn test_pass_transfers_single_reference() {
        let drops = StdRc::new(Cell::new(0));
        let x = Shared::new(DropCounter(drops.clone()));
        let y = Consumer::new(x.pass());
        // x is moved out; y holds the one and only reference
        assert_eq!(Shared::strong_count(&y.held), 1);
        drop(y);
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn test_borrow_retains_for_caller() {
        let drops = StdRc::new(Cell::new(0));
        let x = Shared::new(DropCounter(drops.clone()));
        let y = Consumer::new(&x);
        assert_eq!(Shared::strong_count(&x), 2);
        drop(y);
        assert_eq!(drops.get(), 0);
        drop(x);
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn test_failed_constructor_drops_sink() {
        let drops = StdRc::new(Cell::new(0));
        let x = Shared::new(DropCounter(drops.clone()));
        let sink: Passed<DropCounter> = x.pass();
        // Constructor bails before take(): the sink owns the reference
        drop(sink);
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn test_registry_counts() {
        let registry = InstanceRegistry::new();
        registry.created("model");
        registry.created("model");
        registry.dropped("model");
        assert_eq!(registry.live("model"), 1);
        assert_eq!(registry.live("texture"), 0);
    }
}
