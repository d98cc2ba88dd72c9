//! Recursive-unpack guard: archive fingerprinting, cycle detection, path
//! sanitization, and size/depth limits for nested RAR archives.
//!
//! Grounded on `examples/original_source/src/recursion.c` /
//! `recursion.h`. Stack-allocated (owned by the calling thread, never
//! shared, per spec.md §5) rather than behind a lock.

mod buffer;

pub use buffer::{ExtractBuffer, SinkOutcome};

use crate::error::{Error, Result};

/// Absolute ceiling on recursion depth (spec.md §3).
pub const MAX_RECURSION_DEPTH: usize = 10;
/// Default recursion depth when not overridden by `--recursion-depth`.
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 5;
/// Default cumulative unpacked-size ceiling: 10 GiB.
pub const DEFAULT_MAX_UNPACKED_SIZE: u64 = 10 * 1024 * 1024 * 1024;

const FNV_64_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_64_PRIME: u64 = 0x0000_0100_0000_01b3;
const FINGERPRINT_CHUNK_SIZE: usize = 4096;

fn fnv1a_64(data: &[u8]) -> u64 {
    data.iter().fold(FNV_64_OFFSET_BASIS, |h, &b| (h ^ b as u64).wrapping_mul(FNV_64_PRIME))
}

/// Identity used for cycle detection: `(hash64, size, mtime)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    pub hash: u64,
    pub size: u64,
    pub mtime: i64,
}

impl Fingerprint {
    /// `FNV1a(FNV1a(first_4KiB) XOR FNV1a(last_4KiB))`. If the archive is
    /// shorter than 4 KiB, only the first chunk is hashed and the XOR term
    /// is zero (spec.md §4.4).
    pub fn compute(data: &[u8], mtime: i64) -> Self {
        let first = &data[..data.len().min(FINGERPRINT_CHUNK_SIZE)];
        let first_hash = fnv1a_64(first);
        let last_hash = if data.len() > FINGERPRINT_CHUNK_SIZE {
            let last = &data[data.len() - FINGERPRINT_CHUNK_SIZE..];
            fnv1a_64(last)
        } else {
            0
        };
        let combined = first_hash ^ last_hash;
        let hash = fnv1a_64(&combined.to_le_bytes());
        Self { hash, size: data.len() as u64, mtime }
    }
}

/// Per in-flight nested-extraction operation. Owned exclusively by the
/// calling thread; never shared (spec.md §5).
pub struct RecursionContext {
    depth: usize,
    max_depth: usize,
    visited: Vec<Fingerprint>,
    archive_chain: Vec<String>,
    total_unpacked_size: u64,
    max_unpacked_size: u64,
}

impl RecursionContext {
    /// Initializes a context with the configured defaults. `max_depth` is
    /// clamped to `1..=MAX_RECURSION_DEPTH`.
    pub fn new(max_depth: usize, max_unpacked_size: u64) -> Self {
        let max_depth = max_depth.clamp(1, MAX_RECURSION_DEPTH);
        Self {
            depth: 0,
            max_depth,
            visited: Vec::with_capacity(max_depth),
            archive_chain: Vec::with_capacity(max_depth),
            total_unpacked_size: 0,
            max_unpacked_size,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn total_unpacked_size(&self) -> u64 {
        self.total_unpacked_size
    }

    pub fn chain(&self) -> &[String] {
        &self.archive_chain
    }

    /// `true` if `fp` matches any fingerprint currently on the visited
    /// stack. Logs the full chain on a match. Fail-secure: the guard is
    /// only ever called with a concrete fingerprint, so there is no
    /// "null input" case to special-case in safe Rust.
    pub fn is_cycle(&self, fp: &Fingerprint) -> bool {
        if let Some(i) = self.visited.iter().position(|v| v == fp) {
            tracing::warn!(
                chain = ?self.archive_chain,
                at_level = i,
                "recursive archive cycle detected"
            );
            return true;
        }
        false
    }

    /// Pushes `fp`/`archive_path` onto the visited stack. Rejects once
    /// `depth == max_depth`.
    pub fn push(&mut self, fp: Fingerprint, archive_path: impl Into<String>) -> Result<()> {
        if self.depth == self.max_depth {
            return Err(Error::Loop);
        }
        self.visited.push(fp);
        self.archive_chain.push(archive_path.into());
        self.depth += 1;
        Ok(())
    }

    /// Pops the most recently pushed archive. Clamped at zero.
    pub fn pop(&mut self) {
        if self.depth == 0 {
            return;
        }
        self.depth -= 1;
        self.visited.pop();
        self.archive_chain.pop();
    }

    /// Rejects negative sizes (unrepresentable as `u64` here, so this
    /// reduces to the overflow-safe comparison) and any `n` that would
    /// exceed `max_unpacked_size`. On success, adds `n` to the running
    /// total.
    pub fn check_size(&mut self, n: u64) -> Result<()> {
        if n > self.max_unpacked_size || self.total_unpacked_size > self.max_unpacked_size - n {
            return Err(Error::TooLarge);
        }
        self.total_unpacked_size += n;
        Ok(())
    }
}

/// Sanitizes a nested-archive path per spec.md §4.4. Applies each rule in
/// order; the first failure rejects the whole path.
pub fn sanitize(path: &str) -> Option<String> {
    if path.is_empty() || path.len() > 4096 {
        return None;
    }
    if path.starts_with('/') || path.starts_with('\\') {
        return None;
    }
    if is_drive_letter_path(path) {
        return None;
    }
    if std::str::from_utf8(path.as_bytes()).is_err() {
        return None;
    }

    let forward = path.replace('\\', "/");
    let stripped = strip_dotdot_components(&forward);
    if stripped.starts_with("..") {
        return None;
    }
    if stripped.is_empty() {
        return None;
    }
    Some(stripped)
}

fn is_drive_letter_path(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'/' || bytes[2] == b'\\')
}

/// Strips every `..` component: matches `..` followed by `/`, `\`, or
/// end-of-string, advancing past it and one optional separator.
fn strip_dotdot_components(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut rest = path;
    while !rest.is_empty() {
        if rest == ".." || rest.starts_with("../") {
            rest = if rest == ".." { "" } else { &rest[3..] };
            continue;
        }
        let mut chars = rest.chars();
        let c = chars.next().unwrap();
        out.push(c);
        rest = chars.as_str();
    }
    out
}
