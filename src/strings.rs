//! String handles and their storage tiers.
//!
//! A register holds an `i32` handle. `0` is the null string, positive values
//! are offsets into the constant blob of the progs, negative values `-(1+idx)`
//! index the known-string table. The first `STRINGTEMP_BUFFERS` known entries
//! are the temp ring.

use crate::utils::{lossy, until_nul};
use fnv::FnvHashMap;

pub const STRINGTEMP_BUFFERS: usize = 16;
pub const STRINGTEMP_LENGTH: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QcStr {
    Null,
    Constant(usize),
    Temp(usize),
    Zoned(usize),
    Engine(usize),
    /// Negative handle naming a freed or unallocated known-string entry.
    Dangling(usize),
}

#[derive(Debug, Clone)]
enum Known {
    Temp(Vec<u8>),
    Zoned(Vec<u8>),
    Engine(Vec<u8>),
    Free,
}

#[derive(Debug)]
pub struct Strings {
    blob: Vec<u8>,
    known: Vec<Known>,
    free: Vec<usize>,
    zoned: Vec<u8>,
    temp_next: usize,
    engine_lookup: FnvHashMap<Vec<u8>, usize>,
}

#[inline]
fn handle(idx: usize) -> i32 {
    -(1 + idx as i32)
}

impl Strings {
    pub fn new(blob: Vec<u8>) -> Strings {
        Strings {
            blob,
            known: vec![Known::Temp(Vec::new()); STRINGTEMP_BUFFERS],
            free: Vec::new(),
            zoned: Vec::new(),
            temp_next: 0,
            engine_lookup: FnvHashMap::default(),
        }
    }

    pub fn decode(&self, h: i32) -> QcStr {
        if h == 0 {
            return QcStr::Null;
        }
        if h > 0 {
            return QcStr::Constant(h as usize);
        }
        let idx = (-(h as i64) - 1) as usize;
        match self.known.get(idx) {
            Some(Known::Temp(_)) => QcStr::Temp(idx),
            Some(Known::Zoned(_)) => QcStr::Zoned(idx),
            Some(Known::Engine(_)) => QcStr::Engine(idx),
            Some(Known::Free) | None => QcStr::Dangling(idx),
        }
    }

    /// Contents of a handle, invalid handles read as empty.
    pub fn get(&self, h: i32) -> &[u8] {
        match self.decode(h) {
            QcStr::Null => b"",
            QcStr::Constant(ofs) => match self.blob.get(ofs..) {
                Some(s) => until_nul(s),
                None => {
                    debug!("string offset {ofs} is out of range");
                    b""
                }
            },
            QcStr::Temp(idx) | QcStr::Zoned(idx) | QcStr::Engine(idx) => match &self.known[idx] {
                Known::Temp(s) | Known::Zoned(s) | Known::Engine(s) => s,
                Known::Free => b"",
            },
            QcStr::Dangling(idx) => {
                debug!("string handle {h} (known #{idx}) is dangling");
                b""
            }
        }
    }

    pub fn is_valid(&self, h: i32) -> bool {
        match self.decode(h) {
            QcStr::Constant(ofs) => ofs < self.blob.len(),
            QcStr::Dangling(_) => false,
            _ => true,
        }
    }

    pub fn blob(&self) -> &[u8] {
        &self.blob
    }

    /// Copy into the next temp ring slot. Reusing a slot changes what earlier
    /// handles to it read.
    pub fn temp(&mut self, s: &[u8]) -> i32 {
        let slot = self.temp_next;
        self.temp_next = (self.temp_next + 1) % STRINGTEMP_BUFFERS;
        let s = until_nul(s);
        let s = if s.len() >= STRINGTEMP_LENGTH {
            qc_warn!("temp string of {} bytes truncated to {}: {}...",
                     s.len(), STRINGTEMP_LENGTH - 1, lossy(&s[..32]));
            &s[..STRINGTEMP_LENGTH - 1]
        } else {
            s
        };
        self.known[slot] = Known::Temp(s.to_vec());
        handle(slot)
    }

    fn alloc(&mut self, entry: Known) -> usize {
        if let Some(idx) = self.free.pop() {
            self.known[idx] = entry;
            idx
        } else {
            self.known.push(entry);
            self.known.len() - 1
        }
    }

    /// Host-owned string, deduplicated by content and alive until the VM goes.
    pub fn engine(&mut self, s: &[u8]) -> i32 {
        let s = until_nul(s);
        if let Some(&idx) = self.engine_lookup.get(s) {
            return handle(idx);
        }
        let idx = self.alloc(Known::Engine(s.to_vec()));
        self.engine_lookup.insert(s.to_vec(), idx);
        handle(idx)
    }

    fn is_zoned(&self, idx: usize) -> bool {
        self.zoned.get(idx / 8).map(|b| b & (1 << (idx % 8)) != 0).unwrap_or(false)
    }

    fn mark_zoned(&mut self, idx: usize) {
        if idx / 8 >= self.zoned.len() {
            let bits = (idx + 32) & !31;
            self.zoned.resize(bits / 8, 0);
        }
        self.zoned[idx / 8] |= 1 << (idx % 8);
    }

    fn clear_zoned(&mut self, idx: usize) {
        if let Some(b) = self.zoned.get_mut(idx / 8) {
            *b &= !(1 << (idx % 8));
        }
    }

    /// Concatenate `parts` into a new persistent string.
    pub fn zone(&mut self, parts: &[&[u8]]) -> i32 {
        let mut s = Vec::with_capacity(parts.iter().map(|p| p.len()).sum());
        for p in parts {
            s.extend_from_slice(until_nul(p));
        }
        let idx = self.alloc(Known::Zoned(s));
        self.mark_zoned(idx);
        handle(idx)
    }

    /// Returns whether anything was released. Handle `0` is a silent no-op,
    /// anything that is not a live zoned string warns.
    pub fn unzone(&mut self, h: i32) -> bool {
        match self.decode(h) {
            QcStr::Null => false,
            QcStr::Zoned(idx) if self.is_zoned(idx) => {
                self.clear_zoned(idx);
                self.known[idx] = Known::Free;
                self.free.push(idx);
                true
            }
            other => {
                qc_warn!("strunzone: handle {h} is not a zoned string ({other:?})");
                false
            }
        }
    }

    /// Release every zoned string, highest index first.
    pub fn unzone_all(&mut self) -> usize {
        let mut n = 0;
        for idx in (0..self.zoned.len() * 8).rev() {
            if self.is_zoned(idx) {
                self.unzone(handle(idx));
                n += 1;
            }
        }
        if n > 0 {
            debug!("released {n} zoned strings");
        }
        n
    }

    pub fn zoned_count(&self) -> usize {
        self.zoned.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Capacity of the zone bitmap in bits.
    pub fn zone_bitmap_bits(&self) -> usize {
        self.zoned.len() * 8
    }

    /// Offset of a constant string equal to `s`, if the blob has one.
    pub fn find_constant(&self, s: &[u8]) -> Option<i32> {
        let mut ofs = 1;
        while ofs < self.blob.len() {
            let here = until_nul(&self.blob[ofs..]);
            if here == s {
                return Some(ofs as i32);
            }
            ofs += here.len() + 1;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::warning_count;

    fn strings() -> Strings {
        Strings::new(b"\0hello\0world\0".to_vec())
    }

    #[test]
    fn decode_kinds() {
        let mut s = strings();
        assert_eq!(s.decode(0), QcStr::Null);
        assert_eq!(s.decode(1), QcStr::Constant(1));
        assert_eq!(s.get(1), b"hello");
        assert_eq!(s.get(7), b"world");
        let t = s.temp(b"tmp");
        assert_eq!(s.decode(t), QcStr::Temp(0));
        let z = s.zone(&[b"z"]);
        assert_eq!(s.decode(z), QcStr::Zoned(STRINGTEMP_BUFFERS));
        let e = s.engine(b"eng");
        assert_eq!(s.decode(e), QcStr::Engine(STRINGTEMP_BUFFERS + 1));
        assert_eq!(s.decode(-500), QcStr::Dangling(499));
        assert_eq!(s.get(-500), b"");
    }

    #[test]
    fn zone_concatenates() {
        let mut s = strings();
        let h = s.zone(&[b"a", b"b", b"c"]);
        assert_eq!(s.get(h), b"abc");
        let e = s.zone(&[]);
        assert_eq!(s.get(e), b"");
        assert_eq!(s.zoned_count(), 2);
    }

    #[test]
    fn zone_unzone_leaves_bitmap_empty() {
        let mut s = strings();
        let hs: Vec<i32> = (0..40).map(|i| s.zone(&[format!("s{i}").as_bytes()])).collect();
        assert_eq!(s.zoned_count(), 40);
        for &h in hs.iter().rev().step_by(2) {
            assert!(s.unzone(h));
        }
        for &h in hs.iter().step_by(2) {
            assert!(s.unzone(h));
        }
        assert_eq!(s.zoned_count(), 0);
        assert!(s.zone_bitmap_bits() % 32 == 0);
    }

    #[test]
    fn bitmap_grows_in_words() {
        let mut s = strings();
        s.zone(&[b"x"]);
        assert_eq!(s.zone_bitmap_bits(), 32);
        for _ in 0..20 {
            s.zone(&[b"y"]);
        }
        assert_eq!(s.zone_bitmap_bits(), 64);
    }

    #[test]
    fn double_unzone_warns() {
        let mut s = strings();
        let h = s.zone(&[b"once"]);
        assert!(s.unzone(h));
        let before = warning_count();
        assert!(!s.unzone(h));
        assert_eq!(warning_count(), before + 1);
        let t = s.temp(b"tmp");
        assert!(!s.unzone(t));
        assert!(!s.unzone(1));
        assert_eq!(warning_count(), before + 3);
        assert!(!s.unzone(0));
        assert_eq!(warning_count(), before + 3);
    }

    #[test]
    fn freed_indices_are_reused() {
        let mut s = strings();
        let a = s.zone(&[b"a"]);
        s.unzone(a);
        let b = s.zone(&[b"b"]);
        assert_eq!(a, b);
        assert_eq!(s.get(b), b"b");
    }

    #[test]
    fn unzone_all_releases_everything() {
        let mut s = strings();
        for i in 0..10 {
            s.zone(&[format!("{i}").as_bytes()]);
        }
        assert_eq!(s.unzone_all(), 10);
        assert_eq!(s.zoned_count(), 0);
    }

    #[test]
    fn temp_ring_recycles() {
        let mut s = strings();
        let first = s.temp(b"first");
        for i in 0..STRINGTEMP_BUFFERS - 1 {
            s.temp(format!("{i}").as_bytes());
        }
        assert_eq!(s.get(first), b"first");
        let again = s.temp(b"again");
        assert_eq!(first, again);
        assert_eq!(s.get(first), b"again");
    }

    #[test]
    fn temp_truncates_with_warning() {
        let mut s = strings();
        let before = warning_count();
        let h = s.temp(&[b'x'; 2000]);
        assert_eq!(s.get(h).len(), STRINGTEMP_LENGTH - 1);
        assert_eq!(warning_count(), before + 1);
    }

    #[test]
    fn engine_strings_dedup() {
        let mut s = strings();
        assert_eq!(s.engine(b"same"), s.engine(b"same"));
        assert_ne!(s.engine(b"same"), s.engine(b"other"));
    }

    #[test]
    fn constants_are_found() {
        let s = strings();
        assert_eq!(s.find_constant(b"world"), Some(7));
        assert_eq!(s.find_constant(b"nope"), None);
    }
}
