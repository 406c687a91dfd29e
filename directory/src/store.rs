//! Atomically swappable holder of the current snapshot.
//!
//! Readers load one `Arc` and keep using it for as long as they like; the
//! single writer replaces the pointer with a fully built snapshot. A reader
//! therefore sees either the old or the new snapshot, never a mix.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use arc_swap::ArcSwapOption;

use crate::{snapshot::Snapshot, types::DirectoryEntry};

pub struct SnapshotStore<E> {
    current: ArcSwapOption<Snapshot<E>>,
    /// Handed out by `load()` until the first publish.
    empty: Arc<Snapshot<E>>,
    generation: AtomicU64,
}

impl<E: DirectoryEntry> SnapshotStore<E> {
    pub fn new() -> Self {
        Self {
            current: ArcSwapOption::empty(),
            empty: Arc::new(Snapshot::empty()),
            generation: AtomicU64::new(0),
        }
    }

    /// Current snapshot, or `None` before the first publish. Never blocks.
    pub fn read(&self) -> Option<Arc<Snapshot<E>>> {
        self.current.load_full()
    }

    /// Current snapshot, or a shared empty one before the first publish.
    pub fn load(&self) -> Arc<Snapshot<E>> {
        self.read().unwrap_or_else(|| Arc::clone(&self.empty))
    }

    /// Stamp the next generation on `snapshot` and make it the current one.
    ///
    /// Intended for one writer per store: generations are only strictly
    /// increasing in publish order when publishes do not race.
    pub fn publish(&self, mut snapshot: Snapshot<E>) -> Arc<Snapshot<E>> {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        snapshot.set_generation(generation);
        let snapshot = Arc::new(snapshot);
        self.current.store(Some(Arc::clone(&snapshot)));
        snapshot
    }

    /// Generation of the last publish; 0 when nothing was published.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn is_populated(&self) -> bool {
        self.current.load().is_some()
    }
}

impl<E: DirectoryEntry> Default for SnapshotStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::AtomicBool,
        thread,
    };

    use super::*;
    use crate::{
        snapshot::{IndexBuilder, SnapshotBuilder},
        types::User,
    };

    /// Every user in generation `g` is named `g{g}-{i}`; a torn view would
    /// mix names from different batches.
    fn batch(tag: u64, size: usize) -> Snapshot<User> {
        IndexBuilder.build(
            (0..size)
                .map(|i| User::new(format!("U{i}"), format!("g{tag}-{i}")))
                .collect(),
        )
    }

    #[test]
    fn test_empty_store() {
        let store: SnapshotStore<User> = SnapshotStore::new();
        assert!(store.read().is_none());
        assert!(store.load().is_empty());
        assert_eq!(store.generation(), 0);
        assert!(!store.is_populated());
    }

    #[test]
    fn test_publish_replaces_and_stamps_generation() {
        let store = SnapshotStore::new();
        let first = store.publish(batch(1, 3));
        assert_eq!(first.generation(), 1);

        let held = store.load();
        let second = store.publish(batch(2, 5));
        assert_eq!(second.generation(), 2);

        // A reader holding the old snapshot keeps an intact view.
        assert_eq!(held.len(), 3);
        assert_eq!(held.get("U0").unwrap().name, "g1-0");
        assert_eq!(store.load().len(), 5);
        assert_eq!(store.generation(), 2);
    }

    #[test]
    fn test_concurrent_readers_never_observe_torn_snapshot() {
        const SIZE: usize = 64;
        let store = Arc::new(SnapshotStore::new());
        store.publish(batch(0, SIZE));
        let done = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    let mut last_generation = 0;
                    while !done.load(Ordering::Acquire) {
                        let snapshot = store.load();
                        assert!(snapshot.generation() >= last_generation);
                        last_generation = snapshot.generation();

                        let tag = &snapshot.get("U0").unwrap().name;
                        let prefix = tag.split('-').next().unwrap().to_string();
                        assert_eq!(snapshot.len(), SIZE);
                        assert_eq!(snapshot.by_alias().len(), SIZE);
                        for (alias, id) in snapshot.by_alias() {
                            let user = snapshot.get(id).unwrap();
                            assert!(user.name.starts_with(&format!("{prefix}-")));
                            assert_eq!(alias.as_str(), format!("@{}", user.name));
                        }
                    }
                })
            })
            .collect();

        for tag in 1..200 {
            store.publish(batch(tag, SIZE));
        }
        done.store(true, Ordering::Release);

        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(store.generation(), 200);
    }
}
