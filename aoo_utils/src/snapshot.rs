//! Copy-on-write publication of shared state.
//!
//! Writers (network or control threads) clone the current value, modify the clone, and
//! swap it in. Readers hold a [`Snapshot`], an immutable reference-counted view, and
//! refresh it at their own pace. Refreshing never blocks: if a writer is currently
//! swapping, the reader keeps its previous snapshot until the next attempt.

use std::sync::{
    Arc, Mutex, PoisonError, TryLockError,
    atomic::{AtomicU64, Ordering},
};

/// A shared value, updated by cloning.
///
/// Replaced values are retired rather than dropped, until no snapshot refers to them
/// anymore, so readers never run a destructor (or free memory) when refreshing.
#[derive(Debug, Default)]
pub struct Published<T> {
    state: Mutex<State<T>>,
    generation: AtomicU64,
}

#[derive(Debug, Default)]
struct State<T> {
    current: Arc<T>,
    retired: Vec<Arc<T>>,
}

/// An immutable view of a [`Published`] value, at some generation.
#[derive(Debug)]
pub struct Snapshot<T> {
    value: Arc<T>,
    generation: u64,
}

impl<T> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            generation: self.generation,
        }
    }
}

impl<T> core::ops::Deref for Snapshot<T> {
    type Target = T;

    #[inline(always)]
    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> Snapshot<T> {
    #[inline(always)]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl<T> Published<T> {
    pub fn new(value: T) -> Self {
        Self {
            state: Mutex::new(State {
                current: Arc::new(value),
                retired: Vec::new(),
            }),
            generation: AtomicU64::new(0),
        }
    }

    /// Returns the current value. Blocks while a writer is swapping.
    pub fn load(&self) -> Arc<T> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&state.current)
    }

    /// Returns a snapshot of the current value. Blocks while a writer is swapping.
    pub fn snapshot(&self) -> Snapshot<T> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Snapshot {
            value: Arc::clone(&state.current),
            generation: self.generation.load(Ordering::Acquire),
        }
    }

    /// Returns the generation of the current value, incremented by every update.
    #[inline(always)]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Brings `snapshot` up to date, without blocking.
    ///
    /// Returns `true` if it now reflects the current value. On `false`, a writer holds
    /// the lock and `snapshot` is left untouched.
    pub fn refresh(&self, snapshot: &mut Snapshot<T>) -> bool {
        if snapshot.generation == self.generation.load(Ordering::Acquire) {
            return true;
        }

        let state = match self.state.try_lock() {
            Ok(s) => s,
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
            Err(TryLockError::WouldBlock) => return false,
        };

        // never the last reference, see `State::retired`
        snapshot.value = Arc::clone(&state.current);
        snapshot.generation = self.generation.load(Ordering::Acquire);

        true
    }
}

impl<T: Clone> Published<T> {
    /// Applies `f` to a copy of the current value, then publishes the copy.
    ///
    /// Returns `f`'s output.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let mut next = T::clone(&state.current);
        let res = f(&mut next);

        let previous = core::mem::replace(&mut state.current, Arc::new(next));
        self.generation.fetch_add(1, Ordering::AcqRel);

        // values no snapshot refers to anymore can be dropped here, off the reading thread
        state.retired.retain(|v| Arc::strong_count(v) > 1);
        state.retired.push(previous);

        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshots_are_immutable() {
        let published = Published::new(vec![1, 2]);
        let mut snapshot = published.snapshot();

        published.update(|v| v.push(3));

        assert_eq!(*snapshot, [1, 2]);
        assert_eq!(*published.load(), [1, 2, 3]);

        assert!(published.refresh(&mut snapshot));
        assert_eq!(*snapshot, [1, 2, 3]);
        assert_eq!(snapshot.generation(), 1);
    }

    #[test]
    fn refresh_does_not_block_on_writers() {
        let published = Published::new(0u32);
        let mut snapshot = published.snapshot();

        published.update(|v| *v = 1);

        let guard = published.state.lock().unwrap();
        assert!(!published.refresh(&mut snapshot));
        assert_eq!(*snapshot, 0);
        drop(guard);

        assert!(published.refresh(&mut snapshot));
        assert_eq!(*snapshot, 1);
    }

    #[test]
    fn retired_values_outlive_snapshots() {
        let published = Published::new(String::from("first"));
        let mut snapshot = published.snapshot();
        let first = Arc::downgrade(&snapshot.value);

        published.update(|s| s.push('!'));
        published.update(|s| s.push('?'));

        assert!(published.refresh(&mut snapshot));
        // the reader let go, but the writer still holds it
        assert!(first.upgrade().is_some());

        published.update(|s| s.clear());
        assert!(first.upgrade().is_none());
    }

    #[test]
    fn update_returns_closure_output() {
        let published = Published::new(vec!['a']);
        let len = published.update(|v| {
            v.push('b');
            v.len()
        });
        assert_eq!(len, 2);
        assert_eq!(published.generation(), 1);
    }

    #[test]
    fn concurrent_readers_and_writers() {
        let published = Arc::new(Published::new(Vec::<u32>::new()));

        let writer = {
            let published = Arc::clone(&published);
            std::thread::spawn(move || {
                for i in 0..500 {
                    published.update(|v| v.push(i));
                }
            })
        };

        let mut snapshot = published.snapshot();
        let mut last_len = 0;
        while last_len < 500 {
            published.refresh(&mut snapshot);
            // values only ever grow, and are never observed half-written
            assert!(snapshot.len() >= last_len);
            assert!(snapshot.iter().enumerate().all(|(i, &v)| i as u32 == v));
            last_len = snapshot.len();
        }

        writer.join().unwrap();
    }
}
