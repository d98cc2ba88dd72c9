//! Process-wide mapping from virtual path to archive-backed file
//! descriptor.
//!
//! Grounded on `examples/original_source/src/filecache.h`: the descriptor
//! layout (archive/member paths, raw-read geometry, multi-volume layout,
//! flag bits, nested-archive metadata) and the `LOCAL_FS_ENTRY` /
//! `LOOP_FS_ENTRY` pointer sentinels are carried over unchanged in
//! meaning. Per `spec.md` §9 Design Notes, the pointer sentinels become a
//! sum type (`CacheLookup`) instead of magic pointer values, and
//! `filecache_clone` becomes `Arc::clone` (§5: "long-lived holders must
//! clone").

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::config::ConfigStore;

/// Compression method code, carried only for `getxattr` per spec.md §3.
pub type Method = u16;

/// POSIX stat-like snapshot. A small subset of `libc::stat` fields, enough
/// to populate `fuser::FileAttr` and the `(name, kind, hash, valid, stat)`
/// directory entry tuple of spec.md §3.
#[derive(Debug, Clone, Copy)]
pub struct Stat {
    pub size: u64,
    pub blocks: u64,
    pub mtime: i64,
    pub mode: u32,
    pub is_dir: bool,
    pub is_symlink: bool,
}

/// Multi-volume layout of a raw-read descriptor.
#[derive(Debug, Clone, Copy, Default)]
pub struct VolumeLayout {
    pub vno_base: i16,
    pub vno_first: i16,
    pub vlen: i16,
    pub vpos: i16,
    pub vtype: i16,
}

/// Flag bits of a [`FileCacheEntry`], named individually but also exposed
/// as a whole word (`flags_uint32` in the source) so callers can snapshot
/// or reset them atomically.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags(pub u32);

macro_rules! flag_bit {
    ($getter:ident, $setter:ident, $bit:expr) => {
        pub fn $getter(self) -> bool {
            self.0 & (1 << $bit) != 0
        }
        pub fn $setter(&mut self, value: bool) {
            if value {
                self.0 |= 1 << $bit;
            } else {
                self.0 &= !(1 << $bit);
            }
        }
    };
}

impl Flags {
    flag_bit!(raw, set_raw, 0);
    flag_bit!(multipart, set_multipart, 1);
    flag_bit!(force_dir, set_force_dir, 2);
    flag_bit!(vsize_fixup_needed, set_vsize_fixup_needed, 3);
    flag_bit!(encrypted, set_encrypted, 4);
    flag_bit!(vsize_resolved, set_vsize_resolved, 5);
    flag_bit!(detection_deferred, set_detection_deferred, 6);
    flag_bit!(is_nested_rar, set_is_nested_rar, 7);
    flag_bit!(unresolved, set_unresolved, 8);
    flag_bit!(dry_run_done, set_dry_run_done, 9);
    flag_bit!(check_atime, set_check_atime, 10);
    flag_bit!(direct_io, set_direct_io, 11);
    flag_bit!(avi_tested, set_avi_tested, 12);
    flag_bit!(save_eof, set_save_eof, 13);
}

/// One file-cache descriptor: where a virtual path lives inside which
/// archive. See spec.md §3 for the full field table.
#[derive(Debug, Clone)]
pub struct FileCacheEntry {
    pub archive_path: String,
    pub member_name: String,
    pub link_target: Option<String>,
    pub method: Method,
    pub stat: Stat,
    pub offset: u64,
    pub vsize_first: u64,
    pub vsize_real_first: u64,
    pub vsize_next: u64,
    pub vsize_real_next: u64,
    pub volume: VolumeLayout,
    pub flags: Flags,
    pub nested_depth: u8,
    pub parent_archive: Option<String>,
}

impl FileCacheEntry {
    /// A descriptor with every numeric field zeroed, matching the
    /// `calloc`-style allocation in `filecache_alloc`.
    pub fn new(archive_path: impl Into<String>, member_name: impl Into<String>) -> Self {
        Self {
            archive_path: archive_path.into(),
            member_name: member_name.into(),
            link_target: None,
            method: 0,
            stat: Stat { size: 0, blocks: 0, mtime: 0, mode: 0, is_dir: false, is_symlink: false },
            offset: 0,
            vsize_first: 0,
            vsize_real_first: 0,
            vsize_next: 0,
            vsize_real_next: 0,
            volume: VolumeLayout::default(),
            flags: Flags::default(),
            nested_depth: 0,
            parent_archive: None,
        }
    }
}

/// Result of a [`FileCache::get`] lookup. Replaces the `LOCAL_FS_ENTRY` /
/// `LOOP_FS_ENTRY` pointer sentinels of the source with a sum type, per
/// spec.md §9 Design Notes.
#[derive(Debug, Clone)]
pub enum CacheLookup {
    /// No cached knowledge of this path.
    Missing,
    /// Path resolves to the underlying real filesystem.
    Local,
    /// Path has been recognized as loop-forming.
    Loop,
    /// Path is backed by an archive member.
    Present(Arc<FileCacheEntry>),
}

#[derive(Debug, Clone)]
enum Slot {
    Local,
    Loop,
    Entry(Arc<FileCacheEntry>),
}

/// Concurrent virtual-path -> descriptor map guarded by a single
/// process-wide readers-writer lock, per spec.md §4.2 / §5.
#[derive(Default)]
pub struct FileCache {
    inner: RwLock<HashMap<String, Slot>>,
}

impl FileCache {
    pub fn new() -> Self {
        Self { inner: RwLock::new(HashMap::new()) }
    }

    /// Shared-lock lookup. Never blocks a structural mutation for longer
    /// than the clone of the returned `Arc`.
    pub fn get(&self, path: &str) -> CacheLookup {
        let guard = self.inner.read().expect("file cache lock poisoned");
        match guard.get(path) {
            None => CacheLookup::Missing,
            Some(Slot::Local) => CacheLookup::Local,
            Some(Slot::Loop) => CacheLookup::Loop,
            Some(Slot::Entry(entry)) => CacheLookup::Present(Arc::clone(entry)),
        }
    }

    /// Inserts a fresh descriptor for `path` under the exclusive lock and
    /// returns it for in-place population by the caller.
    pub fn alloc(&self, path: &str, entry: FileCacheEntry) -> Arc<FileCacheEntry> {
        let arc = Arc::new(entry);
        let mut guard = self.inner.write().expect("file cache lock poisoned");
        guard.insert(path.to_owned(), Slot::Entry(Arc::clone(&arc)));
        arc
    }

    /// Marks `path` as resolving to the underlying real filesystem.
    pub fn mark_local(&self, path: &str) {
        let mut guard = self.inner.write().expect("file cache lock poisoned");
        guard.insert(path.to_owned(), Slot::Local);
    }

    /// Marks `path` as loop-forming.
    pub fn mark_loop(&self, path: &str) {
        let mut guard = self.inner.write().expect("file cache lock poisoned");
        guard.insert(path.to_owned(), Slot::Loop);
    }

    /// Removes and frees any cached entry for `path`.
    pub fn invalidate(&self, path: &str) {
        let mut guard = self.inner.write().expect("file cache lock poisoned");
        guard.remove(path);
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("file cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Owns both the file cache and the configuration store the coordinator
/// consults together on every lookup, mirroring how the source's two
/// globals (`file_access_lock` and the config hash table) are always
/// taken in sequence by the FUSE callbacks.
pub struct Caches {
    pub files: FileCache,
    pub config: ConfigStore,
}

impl Caches {
    pub fn new(config: ConfigStore) -> Self {
        Self { files: FileCache::new(), config }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_after_invalidate_is_missing() {
        let cache = FileCache::new();
        cache.alloc("/a.rar/x.txt", FileCacheEntry::new("/a.rar", "x.txt"));
        assert!(matches!(cache.get("/a.rar/x.txt"), CacheLookup::Present(_)));
        cache.invalidate("/a.rar/x.txt");
        assert!(matches!(cache.get("/a.rar/x.txt"), CacheLookup::Missing));
    }

    #[test]
    fn sentinels_distinguish_from_missing_and_present() {
        let cache = FileCache::new();
        cache.mark_local("/local");
        cache.mark_loop("/loopy");
        cache.alloc("/a.rar/x", FileCacheEntry::new("/a.rar", "x"));

        assert!(matches!(cache.get("/local"), CacheLookup::Local));
        assert!(matches!(cache.get("/loopy"), CacheLookup::Loop));
        assert!(matches!(cache.get("/a.rar/x"), CacheLookup::Present(_)));
        assert!(matches!(cache.get("/nope"), CacheLookup::Missing));
    }

    #[test]
    fn flag_bits_round_trip_independently() {
        let mut flags = Flags::default();
        flags.set_raw(true);
        flags.set_encrypted(true);
        assert!(flags.raw());
        assert!(flags.encrypted());
        assert!(!flags.multipart());
        flags.set_raw(false);
        assert!(!flags.raw());
        assert!(flags.encrypted());
    }

    #[test]
    fn alloc_returns_independent_arc_snapshot() {
        let cache = FileCache::new();
        let arc = cache.alloc("/a.rar/x", FileCacheEntry::new("/a.rar", "x"));
        cache.invalidate("/a.rar/x");
        // the clone held by the caller outlives invalidation of the map slot.
        assert_eq!(arc.member_name, "x");
    }
}
