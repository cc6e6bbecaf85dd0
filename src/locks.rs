//! Per-title mutual exclusion inside one process.
//!
//! Looking up a duplicate and then creating or retitling it is a read-then-write sequence
//! against the tracker. Messages for the same repository and title are serialized here; other
//! titles proceed in parallel.

use crate::ticket::CanonicalTitle;
use crate::tracker::RepoSpec;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

type Key = (RepoSpec, CanonicalTitle);

#[derive(Debug, Default)]
pub struct TitleLocks {
    slots: Mutex<HashMap<Key, Arc<Mutex<()>>>>,
}

impl TitleLocks {
    /// Runs `f` while holding the lock for `(repo, title)`
    pub fn with<T, F>(&self, repo: &RepoSpec, title: &CanonicalTitle, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        let slot = {
            let mut slots = relock(self.slots.lock());
            Arc::clone(
                slots
                    .entry((repo.clone(), title.clone()))
                    .or_insert_with(Default::default),
            )
        };
        let res = {
            let _guard = relock(slot.lock());
            f()
        };
        drop(slot);
        let mut slots = relock(self.slots.lock());
        let key = (repo.clone(), title.clone());
        // nobody else is waiting: forget the slot
        if slots.get(&key).map_or(false, |s| Arc::strong_count(s) == 1) {
            slots.remove(&key);
        }
        res
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        relock(self.slots.lock()).len()
    }
}

/// A panic in another message's pipeline leaves no state behind which needs protecting
fn relock<'a, T>(
    res: Result<MutexGuard<'a, T>, std::sync::PoisonError<MutexGuard<'a, T>>>,
) -> MutexGuard<'a, T> {
    res.unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod test {
    use super::*;
    use rayon::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn same_title_is_serialized() {
        let locks = TitleLocks::default();
        let repo = RepoSpec::new("acme", "billing");
        let title = CanonicalTitle::new("prod err: boom");
        let inside = AtomicUsize::new(0);
        let max_inside = AtomicUsize::new(0);
        (0..16).into_par_iter().for_each(|_| {
            locks.with(&repo, &title, || {
                let n = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(n, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(2));
                inside.fetch_sub(1, Ordering::SeqCst);
            })
        });
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(locks.len(), 0);
    }

    #[test]
    fn returns_closure_result() {
        let locks = TitleLocks::default();
        let repo = RepoSpec::new("acme", "billing");
        let v = locks.with(&repo, &CanonicalTitle::new("a"), || 42);
        assert_eq!(v, 42);
    }
}
