//! Onion request path cache
//!
//! Exactly two paths of exactly three hops each. Every hop is persisted
//! under its own fixed coordinate key (`"0-0"` … `"1-2"`), so a single
//! missing or unreadable coordinate is enough to treat the cached paths as
//! absent.
//!
//! Slot state machine, per path:
//!
//! ```text
//! Absent → Populating → Populated → Invalidated → Absent
//! ```

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::storage::{KeyValueStore, Table};

use super::node::Snode;
use super::pool::NodePool;

/// Number of cached paths
pub const PATH_COUNT: usize = 2;
/// Hops per path
pub const PATH_LENGTH: usize = 3;

/// Lifecycle of one path slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Absent,
    Populating,
    Populated,
    Invalidated,
}

/// A fully populated path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnionPath {
    /// Slot index, 0 or 1
    pub index: usize,
    pub hops: [Snode; PATH_LENGTH],
}

impl OnionPath {
    /// Whether `node` is one of the hops
    pub fn contains(&self, node: &Snode) -> bool {
        self.hops.iter().any(|h| h == node)
    }

    /// Stable identity of the hop sequence
    pub fn fingerprint(&self) -> String {
        self.hops
            .iter()
            .map(|h| h.keys().ed25519.as_str())
            .collect::<Vec<_>>()
            .join(":")
    }
}

fn coordinate(path: usize, hop: usize) -> String {
    format!("{}-{}", path, hop)
}

/// Marks a rebuild in flight; released on drop
pub struct RebuildGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for RebuildGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Persisted cache of the two onion request paths
pub struct PathCache {
    store: Arc<dyn KeyValueStore>,
    slots: Mutex<[SlotState; PATH_COUNT]>,
    rebuilding: AtomicBool,
}

impl PathCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            slots: Mutex::new([SlotState::Absent; PATH_COUNT]),
            rebuilding: AtomicBool::new(false),
        }
    }

    /// Current state of slot `index`
    pub fn slot_state(&self, index: usize) -> SlotState {
        self.slots.lock().get(index).copied().unwrap_or(SlotState::Absent)
    }

    fn read_hop(&self, path: usize, hop: usize) -> SyncResult<Option<Snode>> {
        let key = coordinate(path, hop);
        let Some(bytes) = self.store.get(Table::OnionPaths, &key)? else {
            return Ok(None);
        };
        let parsed = std::str::from_utf8(&bytes)
            .map_err(|e| SyncError::InvalidId(e.to_string()))
            .and_then(|s| s.parse::<Snode>());
        match parsed {
            Ok(node) => Ok(Some(node)),
            Err(e) => {
                warn!(coordinate = %key, ?e, "Unreadable path coordinate");
                Ok(None)
            }
        }
    }

    fn read_path(&self, index: usize) -> SyncResult<Option<OnionPath>> {
        let (Some(a), Some(b), Some(c)) = (
            self.read_hop(index, 0)?,
            self.read_hop(index, 1)?,
            self.read_hop(index, 2)?,
        ) else {
            return Ok(None);
        };
        Ok(Some(OnionPath {
            index,
            hops: [a, b, c],
        }))
    }

    /// Both paths, or nothing if any of the six coordinates is missing
    pub fn paths(&self) -> SyncResult<Vec<OnionPath>> {
        let mut paths = Vec::with_capacity(PATH_COUNT);
        let mut complete = true;
        for index in 0..PATH_COUNT {
            match self.read_path(index)? {
                Some(path) => paths.push(path),
                None => {
                    complete = false;
                    let mut slots = self.slots.lock();
                    if slots[index] != SlotState::Populating {
                        slots[index] = SlotState::Absent;
                    }
                }
            }
        }
        if !complete {
            return Ok(Vec::new());
        }

        let mut slots = self.slots.lock();
        for slot in slots.iter_mut() {
            *slot = SlotState::Populated;
        }
        Ok(paths)
    }

    /// Persist a full set of paths
    ///
    /// # Errors
    ///
    /// `InvalidOperation` unless given exactly two paths of three distinct
    /// nodes each.
    pub fn set_paths(&self, paths: &[[Snode; PATH_LENGTH]]) -> SyncResult<Vec<OnionPath>> {
        if paths.len() != PATH_COUNT {
            return Err(SyncError::InvalidOperation(format!(
                "expected {} paths, got {}",
                PATH_COUNT,
                paths.len()
            )));
        }
        for hops in paths {
            let distinct: BTreeSet<&Snode> = hops.iter().collect();
            if distinct.len() != PATH_LENGTH {
                return Err(SyncError::InvalidOperation(
                    "path reuses a node".to_string(),
                ));
            }
        }

        let mut stored = Vec::with_capacity(PATH_COUNT);
        for (index, hops) in paths.iter().enumerate() {
            self.slots.lock()[index] = SlotState::Populating;
            let result = hops.iter().enumerate().try_for_each(|(hop, node)| {
                self.store.insert_or_update(
                    Table::OnionPaths,
                    &coordinate(index, hop),
                    node.to_string().as_bytes(),
                )
            });
            if let Err(e) = result {
                self.slots.lock()[index] = SlotState::Absent;
                return Err(e);
            }
            self.slots.lock()[index] = SlotState::Populated;
            stored.push(OnionPath {
                index,
                hops: hops.clone(),
            });
        }
        debug!("Persisted onion request paths");
        Ok(stored)
    }

    /// Build and persist two fresh paths from the pool
    ///
    /// Nodes within a path are distinct. With at least six nodes the two
    /// paths are disjoint; with fewer, no hop repeats the node at the same
    /// position of the other path.
    ///
    /// # Errors
    ///
    /// `InsufficientNodes` when the pool holds fewer than three nodes; the
    /// cache is left untouched.
    pub fn rebuild(&self, pool: &BTreeSet<Snode>) -> SyncResult<Vec<OnionPath>> {
        if pool.len() < PATH_LENGTH {
            warn!(available = pool.len(), "Not enough nodes to build paths");
            return Err(SyncError::InsufficientNodes {
                needed: PATH_LENGTH,
                available: pool.len(),
            });
        }

        let mut nodes: Vec<Snode> = pool.iter().cloned().collect();
        nodes.shuffle(&mut rand::rng());

        let first: [Snode; PATH_LENGTH] = [nodes[0].clone(), nodes[1].clone(), nodes[2].clone()];
        let second = if nodes.len() >= PATH_COUNT * PATH_LENGTH {
            [nodes[3].clone(), nodes[4].clone(), nodes[5].clone()]
        } else {
            // Unused nodes first, then the first path rotated by one
            let candidates: Vec<&Snode> = nodes[PATH_LENGTH..]
                .iter()
                .chain(nodes[1..PATH_LENGTH].iter())
                .chain(std::iter::once(&nodes[0]))
                .collect();
            let mut picked: Vec<Snode> = Vec::with_capacity(PATH_LENGTH);
            for hop in 0..PATH_LENGTH {
                let choice = candidates
                    .iter()
                    .find(|n| !picked.contains(**n) && ***n != first[hop])
                    .or_else(|| candidates.iter().find(|n| !picked.contains(**n)))
                    .ok_or(SyncError::InsufficientNodes {
                        needed: PATH_LENGTH,
                        available: pool.len(),
                    })?;
                picked.push((*choice).clone());
            }
            [picked[0].clone(), picked[1].clone(), picked[2].clone()]
        };

        let paths = self.set_paths(&[first, second])?;
        info!(pool = pool.len(), "Rebuilt onion request paths");
        Ok(paths)
    }

    /// Drop one path; the next use is expected to rebuild
    pub fn invalidate(&self, index: usize) -> SyncResult<()> {
        if index >= PATH_COUNT {
            return Err(SyncError::InvalidOperation(format!("no path slot {}", index)));
        }
        self.slots.lock()[index] = SlotState::Invalidated;
        for hop in 0..PATH_LENGTH {
            self.store.delete(Table::OnionPaths, &coordinate(index, hop))?;
        }
        self.slots.lock()[index] = SlotState::Absent;
        info!(path = index, "Invalidated onion request path");
        Ok(())
    }

    /// Drop both paths
    pub fn clear(&self) -> SyncResult<()> {
        for index in 0..PATH_COUNT {
            self.invalidate(index)?;
        }
        Ok(())
    }

    /// Claim the single rebuild slot; `None` if a rebuild is in flight
    pub fn try_begin_rebuild(&self) -> Option<RebuildGuard<'_>> {
        self.rebuilding
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RebuildGuard {
                flag: &self.rebuilding,
            })
    }

    /// Current paths, rebuilding from the pool if none are usable
    ///
    /// # Errors
    ///
    /// `Transport` if another rebuild is already in flight, or
    /// `InsufficientNodes` if the pool is too small.
    pub fn paths_or_rebuild(&self, pool: &NodePool) -> SyncResult<Vec<OnionPath>> {
        let paths = self.paths()?;
        if !paths.is_empty() {
            return Ok(paths);
        }
        let Some(_guard) = self.try_begin_rebuild() else {
            debug!("Path rebuild already in flight");
            return Err(SyncError::Transport("path rebuild in progress".to_string()));
        };
        self.rebuild(&pool.get()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::node::test_node;
    use crate::storage::MemoryStore;

    fn pool(n: u8) -> BTreeSet<Snode> {
        (1..=n).map(test_node).collect()
    }

    fn cache() -> (PathCache, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (PathCache::new(store.clone()), store)
    }

    #[test]
    fn test_empty_cache_has_no_paths() {
        let (cache, _) = cache();
        assert!(cache.paths().unwrap().is_empty());
        assert_eq!(cache.slot_state(0), SlotState::Absent);
    }

    #[test]
    fn test_rebuild_with_large_pool_gives_disjoint_paths() {
        let (cache, _) = cache();
        let paths = cache.rebuild(&pool(10)).unwrap();
        assert_eq!(paths.len(), 2);
        for node in &paths[0].hops {
            assert!(!paths[1].contains(node));
        }
        assert_eq!(cache.paths().unwrap(), paths);
        assert_eq!(cache.slot_state(1), SlotState::Populated);
    }

    #[test]
    fn test_rebuild_with_small_pool_avoids_same_position() {
        for size in 3..6 {
            let (cache, _) = cache();
            let paths = cache.rebuild(&pool(size)).unwrap();
            for path in &paths {
                let distinct: BTreeSet<&Snode> = path.hops.iter().collect();
                assert_eq!(distinct.len(), PATH_LENGTH);
            }
            for hop in 0..PATH_LENGTH {
                assert_ne!(paths[0].hops[hop], paths[1].hops[hop]);
            }
        }
    }

    #[test]
    fn test_rebuild_with_two_nodes_fails() {
        let (cache, _) = cache();
        assert!(matches!(
            cache.rebuild(&pool(2)),
            Err(SyncError::InsufficientNodes { needed: 3, available: 2 })
        ));
        assert!(cache.paths().unwrap().is_empty());
    }

    #[test]
    fn test_missing_coordinate_hides_all_paths() {
        for (path, hop) in [(0, 0), (0, 2), (1, 1)] {
            let (cache, store) = cache();
            cache.rebuild(&pool(6)).unwrap();
            store.delete(Table::OnionPaths, &coordinate(path, hop)).unwrap();
            assert!(cache.paths().unwrap().is_empty());
            assert_eq!(cache.slot_state(path), SlotState::Absent);
        }
    }

    #[test]
    fn test_corrupt_coordinate_hides_all_paths() {
        let (cache, store) = cache();
        cache.rebuild(&pool(6)).unwrap();
        store
            .insert_or_update(Table::OnionPaths, "1-2", b"not a node")
            .unwrap();
        assert!(cache.paths().unwrap().is_empty());
    }

    #[test]
    fn test_invalidate_clears_path() {
        let (cache, store) = cache();
        cache.rebuild(&pool(6)).unwrap();
        cache.invalidate(1).unwrap();
        assert!(cache.paths().unwrap().is_empty());
        assert!(store.get(Table::OnionPaths, "1-0").unwrap().is_none());
        assert!(store.get(Table::OnionPaths, "0-0").unwrap().is_some());
        assert_eq!(cache.slot_state(1), SlotState::Absent);
    }

    #[test]
    fn test_set_paths_rejects_repeated_node() {
        let (cache, _) = cache();
        let bad = [test_node(1), test_node(1), test_node(2)];
        let good = [test_node(3), test_node(4), test_node(5)];
        assert!(cache.set_paths(&[bad, good]).is_err());
    }

    #[test]
    fn test_single_rebuild_in_flight() {
        let (cache, _) = cache();
        let guard = cache.try_begin_rebuild();
        assert!(guard.is_some());
        assert!(cache.try_begin_rebuild().is_none());
        drop(guard);
        assert!(cache.try_begin_rebuild().is_some());
    }

    #[test]
    fn test_paths_or_rebuild() {
        let store = Arc::new(MemoryStore::new());
        let cache = PathCache::new(store.clone());
        let node_pool = NodePool::new(store);
        node_pool.set(&pool(8)).unwrap();

        let built = cache.paths_or_rebuild(&node_pool).unwrap();
        assert_eq!(built.len(), 2);
        // Second call reuses the cached paths
        assert_eq!(cache.paths_or_rebuild(&node_pool).unwrap(), built);

        cache.invalidate(0).unwrap();
        let _guard = cache.try_begin_rebuild();
        assert!(matches!(
            cache.paths_or_rebuild(&node_pool),
            Err(SyncError::Transport(_))
        ));
    }
}
