//! Directory path resolution with a memoizing cache
//!
//! Files in a chimera namespace only know the inode number of their parent
//! directory. The resolver turns those numbers into absolute paths, asking
//! the store once per directory and remembering the answer for the rest of
//! the run. The namespace is assumed static during a dump, so a cached path
//! never changes.
//!
//! The cache is unbounded: it grows with the number of distinct directories,
//! which is small next to the number of files.

use crate::error::{ResolveError, ResolveResult, StoreResult};
use crate::store::{FileRow, Inumber, MetadataStore, ROOT_PNFSID};
use std::collections::HashMap;
use tracing::debug;

/// Canonical form of a root path: `/` followed by its non-empty segments
pub fn canonical_root(root_path: &str) -> String {
    let segments: Vec<_> = root_path.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

/// Cache counters for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that went to the store
    pub misses: u64,
    /// Store lookups that found nothing
    pub unresolved: u64,
}

/// Resolves root paths and parent directories against a metadata store
///
/// Owns the store connection for the duration of the extraction, so lookups
/// and the file scan share one connection.
pub struct PathResolver {
    store: Box<dyn MetadataStore>,
    dirs: HashMap<Inumber, String>,
    stats: CacheStats,
}

impl PathResolver {
    pub fn new(store: Box<dyn MetadataStore>) -> Self {
        Self {
            store,
            dirs: HashMap::new(),
            stats: CacheStats::default(),
        }
    }

    /// Resolve a slash-separated root path to its inode number
    ///
    /// Starts at the sentinel root record and descends one segment at a
    /// time. Empty segments are ignored, so `"/pnfs/"`, `"pnfs"` and
    /// `"//pnfs"` are the same path and `""` is the sentinel root itself.
    pub fn resolve_root(&mut self, root_path: &str) -> ResolveResult<Inumber> {
        let mut current = self.store.root_sentinel(ROOT_PNFSID)?.ok_or_else(|| {
            ResolveError::RootSentinelMissing {
                pnfsid: ROOT_PNFSID.to_string(),
            }
        })?;
        debug!(inumber = %current, "Found namespace root");

        for segment in root_path.split('/').filter(|s| !s.is_empty()) {
            current = self.store.child_inumber(current, segment)?.ok_or_else(|| {
                ResolveError::RootNotFound {
                    segment: segment.to_string(),
                }
            })?;
            debug!(segment, inumber = %current, "Resolved root segment");
        }

        Ok(current)
    }

    /// Pre-populate the cache with a known directory path
    pub fn seed(&mut self, inumber: Inumber, path: impl Into<String>) {
        self.dirs.insert(inumber, path.into());
    }

    /// Absolute path of a parent directory, `None` if it cannot be resolved
    ///
    /// An empty path from the store counts as unresolved. Successful lookups are cached for the rest of the run. Failed lookups
    /// are not remembered and will be asked again on the next call.
    pub fn parent_path(&mut self, inumber: Inumber) -> StoreResult<Option<&str>> {
        if self.dirs.contains_key(&inumber) {
            self.stats.hits += 1;
        } else {
            self.stats.misses += 1;
            match self.store.inumber_path(inumber)? {
                // inumber2path answers '' once the t_dirs chain is gone
                Some(path) if !path.is_empty() => {
                    self.dirs.insert(inumber, path);
                }
                _ => {
                    self.stats.unresolved += 1;
                    return Ok(None);
                }
            }
        }
        Ok(self.dirs.get(&inumber).map(String::as_str))
    }

    /// Start the file scan on the underlying store
    pub fn open_files(&mut self, batch_size: usize) -> StoreResult<()> {
        self.store.open_files(batch_size)
    }

    /// Next batch of the file scan
    pub fn next_files(&mut self) -> StoreResult<Option<Vec<FileRow>>> {
        self.store.next_files()
    }

    /// Number of directories currently cached
    pub fn cached_dirs(&self) -> usize {
        self.dirs.len()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Give the store back, dropping the cache
    pub fn into_store(self) -> Box<dyn MetadataStore> {
        self.store
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::Backend;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// In-memory store that counts path lookups
    #[derive(Default)]
    pub(crate) struct MemoryStore {
        /// (parent, name) -> child
        pub links: HashMap<(i64, String), i64>,
        pub paths: HashMap<i64, String>,
        pub files: Vec<FileRow>,
        pub path_queries: Rc<RefCell<HashMap<i64, u32>>>,
        pub batch_size: usize,
        pub cursor: Option<usize>,
    }

    impl MemoryStore {
        /// Namespace with /a/b below the sentinel root (inumber 1)
        pub fn with_dirs() -> Self {
            let mut store = MemoryStore::default();
            store.links.insert((1, "a".into()), 2);
            store.links.insert((2, "b".into()), 3);
            store.paths.insert(1, "/".into());
            store.paths.insert(2, "/a".into());
            store.paths.insert(3, "/a/b".into());
            store
        }
    }

    impl MetadataStore for MemoryStore {
        fn backend(&self) -> Backend {
            Backend::Sqlite
        }

        fn root_sentinel(&mut self, pnfsid: &str) -> StoreResult<Option<Inumber>> {
            Ok((pnfsid == ROOT_PNFSID).then_some(Inumber(1)))
        }

        fn child_inumber(&mut self, parent: Inumber, name: &str) -> StoreResult<Option<Inumber>> {
            Ok(self.links.get(&(parent.0, name.to_string())).copied().map(Inumber))
        }

        fn inumber_path(&mut self, inumber: Inumber) -> StoreResult<Option<String>> {
            *self.path_queries.borrow_mut().entry(inumber.0).or_default() += 1;
            Ok(self.paths.get(&inumber.0).cloned())
        }

        fn open_files(&mut self, batch_size: usize) -> StoreResult<()> {
            self.batch_size = batch_size.max(1);
            self.cursor = Some(0);
            Ok(())
        }

        fn next_files(&mut self) -> StoreResult<Option<Vec<FileRow>>> {
            let pos = self.cursor.unwrap_or(self.files.len());
            if pos >= self.files.len() {
                return Ok(None);
            }
            let end = (pos + self.batch_size).min(self.files.len());
            self.cursor = Some(end);
            Ok(Some(self.files[pos..end].to_vec()))
        }

        fn close(self: Box<Self>) -> StoreResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_canonical_root() {
        assert_eq!(canonical_root("/pnfs"), "/pnfs");
        assert_eq!(canonical_root("pnfs//desy.de/"), "/pnfs/desy.de");
        assert_eq!(canonical_root(""), "/");
    }

    #[test]
    fn test_resolve_root() {
        let mut resolver = PathResolver::new(Box::new(MemoryStore::with_dirs()));
        assert_eq!(resolver.resolve_root("a/b").unwrap(), Inumber(3));
        assert_eq!(resolver.resolve_root("/a/b/").unwrap(), Inumber(3));
        assert_eq!(resolver.resolve_root("/").unwrap(), Inumber(1));
    }

    #[test]
    fn test_resolve_root_names_missing_segment() {
        let mut resolver = PathResolver::new(Box::new(MemoryStore::with_dirs()));
        match resolver.resolve_root("a/x") {
            Err(ResolveError::RootNotFound { segment }) => assert_eq!(segment, "x"),
            other => panic!("expected RootNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_parent_path_is_cached() {
        let store = MemoryStore::with_dirs();
        let queries = Rc::clone(&store.path_queries);
        let mut resolver = PathResolver::new(Box::new(store));

        let first = resolver.parent_path(Inumber(3)).unwrap().map(str::to_string);
        let second = resolver.parent_path(Inumber(3)).unwrap().map(str::to_string);
        assert_eq!(first.as_deref(), Some("/a/b"));
        assert_eq!(first, second);

        assert_eq!(queries.borrow().get(&3), Some(&1));
        assert_eq!(
            resolver.stats(),
            CacheStats {
                hits: 1,
                misses: 1,
                unresolved: 0
            }
        );
    }

    #[test]
    fn test_unresolved_parent_is_retried() {
        let store = MemoryStore::with_dirs();
        let queries = Rc::clone(&store.path_queries);
        let mut resolver = PathResolver::new(Box::new(store));

        assert_eq!(resolver.parent_path(Inumber(42)).unwrap(), None);
        assert_eq!(resolver.parent_path(Inumber(42)).unwrap(), None);
        assert_eq!(queries.borrow().get(&42), Some(&2));
        assert_eq!(resolver.stats().unresolved, 2);
        assert_eq!(resolver.cached_dirs(), 0);
    }

    #[test]
    fn test_empty_path_is_unresolved() {
        let mut store = MemoryStore::with_dirs();
        store.paths.insert(50, String::new());
        let queries = Rc::clone(&store.path_queries);
        let mut resolver = PathResolver::new(Box::new(store));

        assert_eq!(resolver.parent_path(Inumber(50)).unwrap(), None);
        assert_eq!(resolver.parent_path(Inumber(50)).unwrap(), None);
        assert_eq!(queries.borrow().get(&50), Some(&2));
        assert_eq!(resolver.stats().unresolved, 2);
        assert_eq!(resolver.cached_dirs(), 0);
    }

    #[test]
    fn test_seeded_root_needs_no_query() {
        let store = MemoryStore::with_dirs();
        let queries = Rc::clone(&store.path_queries);
        let mut resolver = PathResolver::new(Box::new(store));

        let root = resolver.resolve_root("/a").unwrap();
        resolver.seed(root, "/a");
        assert_eq!(resolver.parent_path(root).unwrap(), Some("/a"));
        assert!(queries.borrow().is_empty());
    }
}
