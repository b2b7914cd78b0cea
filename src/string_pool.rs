
use std::cmp::Ordering;

use anyhow::Result;

use crate::pool::NONE;
use crate::treap::{Treap, TreapOrd};
use crate::util::SvError::Dump;

/// Longest path, in components, the converter will resolve.
pub const MAX_PATH_DEPTH: usize = 1000;

/// Compares two interned ids by the bytes they reference, ties broken by
/// the id itself.  The identity tie-break gives every id a unique position
/// in the treap; value equality is detected separately by the caller.
struct ValueOrd<'a> {
    data: &'a [u8],
    offsets: &'a [u32],
}

impl ValueOrd<'_> {
    fn value(&self, id: u32) -> &[u8] {
        let start = self.offsets[id as usize] as usize;
        let end = self.data[start..]
            .iter()
            .position(|&b| b == 0)
            .map(|n| start + n)
            .unwrap_or(self.data.len());
        &self.data[start..end]
    }
}

impl TreapOrd for ValueOrd<'_> {
    fn cmp_ids(&self, a: u32, b: u32) -> Ordering {
        self.value(a).cmp(self.value(b)).then(a.cmp(&b))
    }
}

/// Interns byte strings to dense 32-bit ids.  The byte arena is
/// append-only and NUL-terminated per entry; equal strings always receive
/// the same id within one pool.
#[derive(Debug, Default)]
pub struct StringPool {
    data: Vec<u8>,
    offsets: Vec<u32>,
    index: Treap,
}

impl StringPool {
    pub fn new() -> Self {
        StringPool::default()
    }

    pub fn len(&self) -> u32 {
        self.offsets.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Intern `bytes`, returning its id.  Idempotent: a string equal to an
    /// earlier one returns the earlier id.
    ///
    /// The entry is allocated speculatively at the top of the arenas; on a
    /// match the allocation is rolled back.
    pub fn intern(&mut self, bytes: &[u8]) -> u32 {
        let id = self.offsets.len() as u32;
        let offset = self.data.len() as u32;
        self.data.extend_from_slice(bytes);
        self.data.push(0);
        self.offsets.push(offset);
        self.index.push_slot();

        let existing = {
            let ord = ValueOrd { data: &self.data, offsets: &self.offsets };
            match self.index.psearch(&ord, id) {
                Some(prev) if ord.value(prev) == bytes => Some(prev),
                _ => None,
            }
        };
        match existing {
            Some(prev) => {
                self.index.pop_slot();
                self.offsets.pop();
                self.data.truncate(offset as usize);
                prev
            }
            None => {
                let ord = ValueOrd { data: &self.data, offsets: &self.offsets };
                self.index.insert(&ord, id);
                id
            }
        }
    }

    /// The bytes of an interned id.  `NONE` fetches as the empty string.
    pub fn fetch(&self, id: u32) -> &[u8] {
        if id == NONE || id as usize >= self.offsets.len() {
            return b"";
        }
        let ord = ValueOrd { data: &self.data, offsets: &self.offsets };
        let start = self.offsets[id as usize] as usize;
        let len = ord.value(id).len();
        &self.data[start..start + len]
    }

    /// Split `bytes` on any of the delimiter bytes, intern each non-empty
    /// token and return the id sequence.  Fails once the sequence would
    /// exceed `max` components.
    pub fn tokenize(&mut self, bytes: &[u8], delim: &[u8], max: usize) -> Result<Vec<u32>> {
        let mut ids = Vec::new();
        for token in bytes.split(|b| delim.contains(b)) {
            if token.is_empty() {
                continue;
            }
            if ids.len() == max {
                return Err(Dump(format!(
                    "path deeper than {} components: {}",
                    max,
                    String::from_utf8_lossy(bytes)
                ))
                .into());
            }
            ids.push(self.intern(token));
        }
        Ok(ids)
    }

    /// Join the strings behind `ids` with `sep`, stopping at a `NONE` id.
    pub fn join(&self, ids: &[u32], sep: u8) -> Vec<u8> {
        let mut out = Vec::new();
        for (i, &id) in ids.iter().enumerate() {
            if id == NONE {
                break;
            }
            if i > 0 {
                out.push(sep);
            }
            out.extend_from_slice(self.fetch(id));
        }
        out
    }

    pub fn reset(&mut self) {
        self.data.clear();
        self.offsets.clear();
        self.index.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_is_idempotent() {
        let mut pool = StringPool::new();
        let a = pool.intern(b"trunk");
        let b = pool.intern(b"branches");
        let c = pool.intern(b"trunk");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn fetch_round_trips() {
        let mut pool = StringPool::new();
        let id = pool.intern(b"some file.txt");
        assert_eq!(pool.fetch(id), b"some file.txt");
        let empty = pool.intern(b"");
        assert_eq!(pool.fetch(empty), b"");
        assert_eq!(pool.fetch(NONE), b"");
    }

    #[test]
    fn equal_bytes_equal_ids_across_many_strings() {
        let mut pool = StringPool::new();
        let words: Vec<String> = (0..200).map(|i| format!("w{}", i % 50)).collect();
        let first: Vec<u32> = words.iter().map(|w| pool.intern(w.as_bytes())).collect();
        let second: Vec<u32> = words.iter().map(|w| pool.intern(w.as_bytes())).collect();
        assert_eq!(first, second);
        assert_eq!(pool.len(), 50);
    }

    #[test]
    fn speculative_rollback_keeps_arena_compact() {
        let mut pool = StringPool::new();
        pool.intern(b"alpha");
        let before = pool.data.len();
        pool.intern(b"alpha");
        pool.intern(b"alpha");
        assert_eq!(pool.data.len(), before);
    }

    #[test]
    fn tokenize_splits_and_interns() {
        let mut pool = StringPool::new();
        let path = pool.tokenize(b"trunk/src/main.c", b"/", MAX_PATH_DEPTH).unwrap();
        assert_eq!(path.len(), 3);
        assert_eq!(pool.fetch(path[0]), b"trunk");
        assert_eq!(pool.fetch(path[2]), b"main.c");
        // Leading and doubled separators produce no empty components.
        let other = pool.tokenize(b"/trunk//src", b"/", MAX_PATH_DEPTH).unwrap();
        assert_eq!(other.len(), 2);
        assert_eq!(other[0], path[0]);
        // The root path is the empty sequence.
        assert!(pool.tokenize(b"", b"/", MAX_PATH_DEPTH).unwrap().is_empty());
    }

    #[test]
    fn tokenize_enforces_depth_cap() {
        let mut pool = StringPool::new();
        let deep = vec![b'a', b'/'].repeat(MAX_PATH_DEPTH);
        let ok = pool.tokenize(&deep, b"/", MAX_PATH_DEPTH).unwrap();
        assert_eq!(ok.len(), MAX_PATH_DEPTH);
        let too_deep = vec![b'a', b'/'].repeat(MAX_PATH_DEPTH + 1);
        assert!(pool.tokenize(&too_deep, b"/", MAX_PATH_DEPTH).is_err());
    }

    #[test]
    fn join_stops_at_none() {
        let mut pool = StringPool::new();
        let a = pool.intern(b"a");
        let b = pool.intern(b"b");
        assert_eq!(pool.join(&[a, b], b'/'), b"a/b");
        assert_eq!(pool.join(&[a, NONE, b], b'/'), b"a");
        assert_eq!(pool.join(&[], b'/'), b"");
    }
}
