//! The repository port (§6) and the concurrency primitives around it (§5).
//!
//! `RepositoryPort` is an async trait so any storage backend can plug in
//! behind the protocol handlers. The cache and per-ref lock registry are
//! concrete generic types here rather than baked into a single repository
//! implementation, per §9's design note.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OnceCell};
use tokio_util::sync::CancellationToken;

use crate::hash::ObjectId;
use crate::objects::GitObject;

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),
    #[error("ref error: {0}")]
    RefError(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("io error: {0}")]
    Io(String),
}

/// Minimal operations the core needs from a repository backend (§6).
#[async_trait]
pub trait RepositoryPort: Send + Sync {
    /// One of 20 (SHA-1) or 32 (SHA-256).
    fn hash_width_bytes(&self) -> usize;

    /// Absolute path to the bare repository directory.
    fn git_dir(&self) -> &Path;

    /// Current ref snapshot, excluding HEAD.
    async fn get_references(&self, cancel: &CancellationToken) -> Result<HashMap<String, ObjectId>, RepoError>;

    /// HEAD's raw content: either a resolved hash or a `ref: <name>` symref target.
    async fn read_head(&self, cancel: &CancellationToken) -> Result<HeadValue, RepoError>;

    async fn read_object(&self, id: &ObjectId, cancel: &CancellationToken) -> Result<GitObject, RepoError>;

    /// Idempotent: writing an object that already exists returns its existing hash.
    async fn write_object(&self, object: &GitObject, cancel: &CancellationToken) -> Result<ObjectId, RepoError>;

    /// Acquire a deadlock-free scoped lock over every named ref (sorted internally).
    async fn acquire_multi_ref_lock(
        &self,
        names: &[String],
        cancel: &CancellationToken,
    ) -> Result<RefLockGuard, RepoError>;

    /// Compare-and-set a ref's value. `new = None` deletes. Must be called
    /// while holding a [`RefLockGuard`] covering `name`.
    async fn write_ref_with_cas(
        &self,
        guard: &RefLockGuard,
        name: &str,
        expected: Option<&ObjectId>,
        new: Option<&ObjectId>,
        cancel: &CancellationToken,
    ) -> Result<(), RepoError>;

    /// Force the next ref/object read to re-scan on-disk state.
    fn invalidate_caches(&self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadValue {
    Hash(ObjectId),
    Symref(String),
    Unborn,
}

/// RAII guard over a sorted set of acquired ref mutexes. Dropping it releases
/// every held lock, regardless of which exit path was taken (§9).
pub struct RefLockGuard {
    _permits: Vec<tokio::sync::OwnedMutexGuard<()>>,
    names: Vec<String>,
}

impl RefLockGuard {
    pub fn holds(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }
}

/// Process-wide mapping from reference name to a mutex, entries created on
/// first use (§9 "per-ref mutex registry"). The multi-ref lock acquires
/// entries in sorted order to stay deadlock-free under any interleaving.
#[derive(Default)]
pub struct RefLockRegistry {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RefLockRegistry {
    pub fn new() -> Self {
        Self { locks: Mutex::new(HashMap::new()) }
    }

    async fn get_or_insert(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(name.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Acquire locks for every name, in ordinal-sorted order, regardless of
    /// the order `names` was given in.
    pub async fn acquire(&self, names: &[String], cancel: &CancellationToken) -> Result<RefLockGuard, RepoError> {
        let mut sorted: Vec<String> = names.to_vec();
        sorted.sort();
        sorted.dedup();

        let mut permits = Vec::with_capacity(sorted.len());
        for name in &sorted {
            let mutex = self.get_or_insert(name).await;
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RepoError::Cancelled),
                guard = mutex.lock_owned() => guard,
            };
            permits.push(permit);
        }
        Ok(RefLockGuard { _permits: permits, names: sorted })
    }
}

/// Thread-safe `path -> handle` cache with an at-most-once construction
/// guarantee per key (§5). `OnceCell` behind the outer map means the mutex
/// protecting the map is never held during the (possibly slow) construction
/// of an individual handle.
pub struct RepositoryCache<R> {
    entries: Mutex<HashMap<PathBuf, Arc<OnceCell<Arc<R>>>>>,
}

impl<R> Default for RepositoryCache<R> {
    fn default() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }
}

impl<R> RepositoryCache<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached handle for `path`, constructing it at most once
    /// even under concurrent callers requesting the same canonicalised path.
    pub async fn get_or_create<F, Fut>(&self, path: &Path, construct: F) -> Arc<R>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Arc<R>>,
    {
        let cell = {
            let mut entries = self.entries.lock().await;
            entries.entry(path.to_path_buf()).or_insert_with(|| Arc::new(OnceCell::new())).clone()
        };
        cell.get_or_init(construct).await.clone()
    }

    /// Drop the cached handle for one path; the next `get_or_create` rebuilds it.
    pub async fn remove(&self, path: &Path) {
        self.entries.lock().await.remove(path);
    }

    /// Drop every cached handle.
    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }
}

/// Test-only in-memory `RepositoryPort` implementation, backing this
/// crate's own unit and integration tests.
#[cfg(any(test, feature = "test-util"))]
pub mod memory {
    use super::*;
    use std::collections::HashMap as Map;
    use std::sync::RwLock as StdRwLock;

    pub struct MemoryRepository {
        dir: PathBuf,
        objects: StdRwLock<Map<ObjectId, GitObject>>,
        refs: StdRwLock<Map<String, ObjectId>>,
        head: StdRwLock<HeadValue>,
        lock_registry: RefLockRegistry,
    }

    impl MemoryRepository {
        pub fn new(dir: PathBuf) -> Self {
            Self {
                dir,
                objects: StdRwLock::new(Map::new()),
                refs: StdRwLock::new(Map::new()),
                head: StdRwLock::new(HeadValue::Symref("refs/heads/main".to_string())),
                lock_registry: RefLockRegistry::new(),
            }
        }

        pub fn set_head_symref(&self, target: &str) {
            *self.head.write().unwrap() = HeadValue::Symref(target.to_string());
        }

        /// Test helper: insert directly, bypassing CAS.
        pub fn force_set_ref(&self, name: &str, id: ObjectId) {
            self.refs.write().unwrap().insert(name.to_string(), id);
        }
    }

    #[async_trait]
    impl RepositoryPort for MemoryRepository {
        fn hash_width_bytes(&self) -> usize {
            crate::hash::SHA1_WIDTH
        }

        fn git_dir(&self) -> &Path {
            &self.dir
        }

        async fn get_references(&self, _cancel: &CancellationToken) -> Result<HashMap<String, ObjectId>, RepoError> {
            Ok(self.refs.read().unwrap().clone())
        }

        async fn read_head(&self, _cancel: &CancellationToken) -> Result<HeadValue, RepoError> {
            Ok(self.head.read().unwrap().clone())
        }

        async fn read_object(&self, id: &ObjectId, _cancel: &CancellationToken) -> Result<GitObject, RepoError> {
            self.objects
                .read()
                .unwrap()
                .get(id)
                .cloned()
                .ok_or_else(|| RepoError::ObjectNotFound(id.clone()))
        }

        async fn write_object(&self, object: &GitObject, _cancel: &CancellationToken) -> Result<ObjectId, RepoError> {
            let id = object.compute_id(self.hash_width_bytes());
            self.objects.write().unwrap().entry(id.clone()).or_insert_with(|| object.clone());
            Ok(id)
        }

        async fn acquire_multi_ref_lock(
            &self,
            names: &[String],
            cancel: &CancellationToken,
        ) -> Result<RefLockGuard, RepoError> {
            self.lock_registry.acquire(names, cancel).await
        }

        async fn write_ref_with_cas(
            &self,
            guard: &RefLockGuard,
            name: &str,
            expected: Option<&ObjectId>,
            new: Option<&ObjectId>,
            _cancel: &CancellationToken,
        ) -> Result<(), RepoError> {
            if !guard.holds(name) {
                return Err(RepoError::RefError(format!("{name} not covered by held lock")));
            }
            let mut refs = self.refs.write().unwrap();
            let current = refs.get(name);
            if current.map(|c| c.as_bytes()) != expected.map(|e| e.as_bytes()) {
                return Err(RepoError::RefError("compare-and-set mismatch".to_string()));
            }
            match new {
                Some(id) => {
                    refs.insert(name.to_string(), id.clone());
                }
                None => {
                    refs.remove(name);
                }
            }
            Ok(())
        }

        fn invalidate_caches(&self) {}
    }
}
