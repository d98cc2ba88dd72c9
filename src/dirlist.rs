//! Ordered, deduplicated directory listing produced by merging real
//! filesystem entries with archive-member entries.
//!
//! Grounded on `examples/original_source/src/dirlist.c`: a 32-bit FNV hash
//! shortcuts name comparisons, `close` bubble-sorts by `(name, kind)` and
//! then walks the sorted run marking later duplicates invalid, and
//! `REGULAR_FS` entries always win a collision because the coordinator adds
//! them after the archive-derived ones (see `coordinator.rs`).

use std::sync::Arc;

use crate::filecache::FileCacheEntry;

/// Kind of a directory entry, ordered so `REGULAR_FS < ARCHIVE_MEMBER <
/// DIRECTORY_MARKER` matches the source's `(name, kind)` tie-break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EntryKind {
    RegularFs,
    ArchiveMember,
    DirectoryMarker,
}

/// One entry of a [`DirEntryList`].
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
    hash: u32,
    pub valid: bool,
    pub stat: Option<Arc<FileCacheEntry>>,
}

/// FNV-1a over a name, used only to shortcut equality tests (spec.md §3).
fn hash_name(name: &str) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c9dc5;
    const PRIME: u32 = 0x0100_0193;
    name.bytes().fold(OFFSET_BASIS, |h, b| (h ^ b as u32).wrapping_mul(PRIME))
}

/// Ordered sequence of directory entries. The C source models this as an
/// intrusively linked list with a sentinel head; here it is a plain `Vec`,
/// which resolves the "make sure list1/list2 are heads" TODO by
/// construction (see `DESIGN.md`).
#[derive(Debug, Clone, Default)]
pub struct DirEntryList {
    entries: Vec<DirEntry>,
    closed: bool,
}

impl DirEntryList {
    /// Opens a fresh, empty listing.
    pub fn open() -> Self {
        Self { entries: Vec::new(), closed: false }
    }

    /// Adds `name` with `kind` and optional `stat`, returning the index of
    /// the entry. If an entry with the same name and hash already exists,
    /// its index is returned instead of inserting a duplicate.
    pub fn add(&mut self, name: &str, kind: EntryKind, stat: Option<Arc<FileCacheEntry>>) -> usize {
        let hash = hash_name(name);
        if let Some(idx) = self.entries.iter().position(|e| e.hash == hash && e.name == name) {
            return idx;
        }
        self.entries.push(DirEntry { name: name.to_owned(), kind, hash, valid: true, stat });
        self.entries.len() - 1
    }

    /// Sorts ascending by `(name, kind)` and marks later duplicates
    /// invalid, keeping the first occurrence of each `(name, kind)` pair
    /// valid. `REGULAR_FS` entries beat `ARCHIVE_MEMBER` entries because
    /// callers add local entries last (see `coordinator::enumerate_dir`)
    /// and this sort is stable.
    pub fn close(&mut self) {
        self.entries.sort_by(|a, b| a.name.cmp(&b.name).then(a.kind.cmp(&b.kind)));
        for i in 1..self.entries.len() {
            let (left, right) = self.entries.split_at_mut(i);
            let prev = left.last().unwrap();
            let cur = &mut right[0];
            if prev.name == cur.name {
                cur.valid = false;
            }
        }
        self.closed = true;
    }

    /// Deep copy of this listing.
    pub fn dup(&self) -> Self {
        self.clone()
    }

    /// Appends a copy of `other`'s entries onto `self`.
    pub fn append(&mut self, other: &DirEntryList) {
        self.entries.extend(other.entries.iter().cloned());
        self.closed = false;
    }

    /// Entries in listing order. Sorted and deduplicated only after
    /// [`DirEntryList::close`] has been called.
    pub fn entries(&self) -> &[DirEntry] {
        &self.entries
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
