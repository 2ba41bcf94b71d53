//! String buffers (`DP_QC_STRINGBUFFERS`).
//!
//! Bytecode handles are `slot + 1`, so `0` never names a buffer. A buffer is
//! a list of optional strings, holes are `None`.

use crate::error::Result;
use crate::guard::VmRole;
use crate::strings::STRINGTEMP_LENGTH;
use crate::utils::lossy;
use crate::vm::Exec;
use globset::{Glob, GlobMatcher};

pub const MAX_STRBUFS: usize = 64;
/// Highest string index plus one a single buffer can hold.
pub const MAX_BUFSTRS: usize = 1 << 20;

#[derive(Debug, Default)]
struct StrBuf {
    owner: Option<VmRole>,
    strings: Vec<Option<Vec<u8>>>,
}

impl StrBuf {
    fn trim(&mut self) {
        while matches!(self.strings.last(), Some(None)) {
            self.strings.pop();
        }
    }

    fn set(&mut self, idx: usize, s: &[u8], op: &str) -> bool {
        if idx >= MAX_BUFSTRS {
            qc_warn!("{op}: index {idx} is past the {MAX_BUFSTRS} string limit");
            return false;
        }
        if idx >= self.strings.len() {
            self.strings.resize(idx + 1, None);
        }
        self.strings[idx] = Some(s.to_vec());
        true
    }
}

#[derive(Debug)]
pub struct StrBufs {
    slots: Vec<StrBuf>,
}

impl Default for StrBufs {
    fn default() -> Self {
        StrBufs::new()
    }
}

fn sort_key(s: &[u8], prefix: i32) -> &[u8] {
    match usize::try_from(prefix) {
        Ok(n) if n > 0 => &s[..n.min(s.len())],
        _ => s,
    }
}

impl StrBufs {
    pub fn new() -> StrBufs {
        StrBufs { slots: (0..MAX_STRBUFS).map(|_| StrBuf::default()).collect() }
    }

    fn buf(&self, owner: VmRole, h: i32, op: &str) -> Option<&StrBuf> {
        let b = h.checked_sub(1)
                 .and_then(|i| usize::try_from(i).ok())
                 .and_then(|i| self.slots.get(i));
        match b {
            Some(b) if b.owner == Some(owner) => Some(b),
            Some(StrBuf { owner: Some(other), .. }) => {
                qc_warn!("{op}: buffer {h} belongs to the {other} VM");
                None
            }
            _ => {
                qc_warn!("{op}: invalid buffer {h}");
                None
            }
        }
    }

    fn buf_mut(&mut self, owner: VmRole, h: i32, op: &str) -> Option<&mut StrBuf> {
        self.buf(owner, h, op)?;
        self.slots.get_mut(h as usize - 1)
    }

    /// Handle of a fresh buffer, `0` when all are taken.
    pub fn create(&mut self, owner: VmRole) -> i32 {
        match self.slots.iter().position(|b| b.owner.is_none()) {
            Some(i) => {
                self.slots[i] = StrBuf { owner: Some(owner), strings: Vec::new() };
                i as i32 + 1
            }
            None => {
                qc_warn!("buf_create: all {MAX_STRBUFS} string buffers are in use");
                0
            }
        }
    }

    pub fn del(&mut self, owner: VmRole, h: i32) -> bool {
        match self.buf_mut(owner, h, "buf_del") {
            Some(b) => {
                *b = StrBuf::default();
                true
            }
            None => false,
        }
    }

    pub fn size(&self, owner: VmRole, h: i32) -> Option<usize> {
        self.buf(owner, h, "buf_getsize").map(|b| b.strings.len())
    }

    /// Replace the contents of `dst` with a copy of `src`.
    pub fn copy(&mut self, owner: VmRole, src: i32, dst: i32) -> bool {
        if src == dst {
            return self.buf(owner, src, "buf_copy").is_some();
        }
        let Some(strings) = self.buf(owner, src, "buf_copy").map(|b| b.strings.clone()) else {
            return false;
        };
        match self.buf_mut(owner, dst, "buf_copy") {
            Some(b) => {
                b.strings = strings;
                true
            }
            None => false,
        }
    }

    /// Sort on the first `prefix` bytes, `prefix <= 0` compares whole
    /// strings. Holes are squeezed out first.
    pub fn sort(&mut self, owner: VmRole, h: i32, prefix: i32, backward: bool) -> bool {
        let Some(b) = self.buf_mut(owner, h, "buf_sort") else {
            return false;
        };
        let mut strings: Vec<Vec<u8>> = b.strings.drain(..).flatten().collect();
        strings.sort_by(|x, y| {
            let ord = sort_key(x, prefix).cmp(sort_key(y, prefix));
            if backward { ord.reverse() } else { ord }
        });
        b.strings = strings.into_iter().map(Some).collect();
        true
    }

    /// Live strings joined by `glue`, cut to what a temp string can hold.
    pub fn implode(&self, owner: VmRole, h: i32, glue: &[u8]) -> Option<Vec<u8>> {
        const LIMIT: usize = STRINGTEMP_LENGTH - 1;
        let b = self.buf(owner, h, "buf_implode")?;
        let mut out = Vec::new();
        let push = |piece: &[u8], out: &mut Vec<u8>| {
            let room = LIMIT - out.len();
            out.extend_from_slice(&piece[..piece.len().min(room)]);
            piece.len() <= room
        };
        for (i, s) in b.strings.iter().flatten().enumerate() {
            if (i > 0 && !push(glue, &mut out)) || !push(s, &mut out) {
                qc_warn!("buf_implode: result truncated to {LIMIT} bytes");
                break;
            }
        }
        Some(out)
    }

    pub fn get(&self, owner: VmRole, h: i32, idx: i32) -> Option<&[u8]> {
        let b = self.buf(owner, h, "bufstr_get")?;
        usize::try_from(idx).ok()
                            .and_then(|i| b.strings.get(i))
                            .and_then(|s| s.as_deref())
    }

    pub fn set(&mut self, owner: VmRole, h: i32, idx: i32, s: &[u8]) -> bool {
        let Ok(idx) = usize::try_from(idx) else {
            qc_warn!("bufstr_set: negative index {idx}");
            return false;
        };
        match self.buf_mut(owner, h, "bufstr_set") {
            Some(b) => b.set(idx, s, "bufstr_set"),
            None => false,
        }
    }

    /// Index the string was stored at, `-1` on failure. With `append` the
    /// string goes after the last one, otherwise into the first hole.
    pub fn add(&mut self, owner: VmRole, h: i32, s: &[u8], append: bool) -> i32 {
        let Some(b) = self.buf_mut(owner, h, "bufstr_add") else {
            return -1;
        };
        let idx = if append {
            b.strings.len()
        } else {
            b.strings.iter().position(|s| s.is_none()).unwrap_or(b.strings.len())
        };
        if b.set(idx, s, "bufstr_add") { idx as i32 } else { -1 }
    }

    pub fn free_str(&mut self, owner: VmRole, h: i32, idx: i32) -> bool {
        let Some(b) = self.buf_mut(owner, h, "bufstr_free") else {
            return false;
        };
        match usize::try_from(idx).ok().and_then(|i| b.strings.get_mut(i)) {
            Some(s) => {
                *s = None;
                b.trim();
                true
            }
            None => false,
        }
    }

    /// Append each line of `text`, without line terminators.
    pub fn add_lines(&mut self, owner: VmRole, h: i32, text: &[u8]) -> bool {
        let Some(b) = self.buf_mut(owner, h, "buf_loadfile") else {
            return false;
        };
        let text = text.strip_suffix(b"\n").unwrap_or(text);
        if text.is_empty() {
            return true;
        }
        for line in text.split(|&c| c == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            let idx = b.strings.len();
            if !b.set(idx, line, "buf_loadfile") {
                return false;
            }
        }
        true
    }

    /// Strings `start..start + count`, holes as empty strings.
    pub fn range(&self, owner: VmRole, h: i32, start: usize, count: usize) -> Option<Vec<Vec<u8>>> {
        let b = self.buf(owner, h, "buf_writefile")?;
        Some(b.strings.iter()
                      .skip(start)
                      .take(count)
                      .map(|s| s.clone().unwrap_or_default())
                      .collect())
    }

    pub fn replace(&mut self, owner: VmRole, h: i32, strings: Vec<Vec<u8>>, op: &str) -> bool {
        match self.buf_mut(owner, h, op) {
            Some(b) => {
                b.strings = strings.into_iter().map(Some).collect();
                true
            }
            None => false,
        }
    }

    pub fn live_count(&self, owner: VmRole) -> usize {
        self.slots.iter().filter(|b| b.owner == Some(owner)).count()
    }

    pub fn shutdown(&mut self, owner: VmRole) -> usize {
        let mut n = 0;
        for b in self.slots.iter_mut().filter(|b| b.owner == Some(owner)) {
            *b = StrBuf::default();
            n += 1;
        }
        if n > 0 {
            debug!("released {n} string buffers of the {owner} VM");
        }
        n
    }
}

fn pattern(p: &[u8]) -> Option<GlobMatcher> {
    if p.is_empty() {
        return None;
    }
    match Glob::new(&lossy(p)) {
        Ok(g) => Some(g.compile_matcher()),
        Err(e) => {
            qc_warn!("buf_cvarlist: bad pattern \"{}\": {e}", lossy(p));
            None
        }
    }
}

// float() buf_create
pub fn pf_buf_create(e: &mut Exec<'_>) -> Result<()> {
    let owner = e.role();
    let h = e.host.bufs.create(owner);
    e.ret_float(h as f32);
    Ok(())
}

pub fn pf_buf_del(e: &mut Exec<'_>) -> Result<()> {
    let h = e.float(0) as i32;
    let owner = e.role();
    e.host.bufs.del(owner, h);
    Ok(())
}

pub fn pf_buf_getsize(e: &mut Exec<'_>) -> Result<()> {
    let h = e.float(0) as i32;
    let n = e.host.bufs.size(e.role(), h).map(|n| n as f32).unwrap_or(-1.0);
    e.ret_float(n);
    Ok(())
}

pub fn pf_buf_copy(e: &mut Exec<'_>) -> Result<()> {
    let (src, dst) = (e.float(0) as i32, e.float(1) as i32);
    let owner = e.role();
    e.host.bufs.copy(owner, src, dst);
    Ok(())
}

// void(float bufhandle, float sortprefixlen, float backward) buf_sort
pub fn pf_buf_sort(e: &mut Exec<'_>) -> Result<()> {
    let h = e.float(0) as i32;
    let prefix = e.float(1) as i32;
    let backward = e.float(2) != 0.0;
    let owner = e.role();
    e.host.bufs.sort(owner, h, prefix, backward);
    Ok(())
}

pub fn pf_buf_implode(e: &mut Exec<'_>) -> Result<()> {
    let h = e.float(0) as i32;
    let glue = e.string(1);
    match e.host.bufs.implode(e.role(), h, &glue) {
        Some(s) => e.ret_tstring(&s),
        None => e.ret_null(),
    }
    Ok(())
}

pub fn pf_bufstr_get(e: &mut Exec<'_>) -> Result<()> {
    let (h, idx) = (e.float(0) as i32, e.float(1) as i32);
    let s = e.host.bufs.get(e.role(), h, idx).map(|s| s.to_vec());
    match s {
        Some(s) => e.ret_tstring(&s),
        None => e.ret_null(),
    }
    Ok(())
}

pub fn pf_bufstr_set(e: &mut Exec<'_>) -> Result<()> {
    let (h, idx) = (e.float(0) as i32, e.float(1) as i32);
    let s = e.string(2);
    let owner = e.role();
    e.host.bufs.set(owner, h, idx, &s);
    Ok(())
}

// float(float bufhandle, string str, float order) bufstr_add
pub fn pf_bufstr_add(e: &mut Exec<'_>) -> Result<()> {
    let h = e.float(0) as i32;
    let s = e.string(1);
    let append = e.float(2) != 0.0;
    let owner = e.role();
    let idx = e.host.bufs.add(owner, h, &s, append);
    e.ret_float(idx as f32);
    Ok(())
}

pub fn pf_bufstr_free(e: &mut Exec<'_>) -> Result<()> {
    let (h, idx) = (e.float(0) as i32, e.float(1) as i32);
    let owner = e.role();
    e.host.bufs.free_str(owner, h, idx);
    Ok(())
}

// float(string filename, float bufhandle) buf_loadfile
pub fn pf_buf_loadfile(e: &mut Exec<'_>) -> Result<()> {
    let name = lossy(&e.string(0)).into_owned();
    let h = e.float(1) as i32;
    let owner = e.role();
    let ok = match e.host.sandbox.read(&name) {
        Ok(text) => e.host.bufs.add_lines(owner, h, &text),
        Err(err) => {
            debug!("buf_loadfile: {name}: {err}");
            false
        }
    };
    e.ret_float(ok as i32 as f32);
    Ok(())
}

// float(float filehandle, float bufhandle, float startpos, float numstrings) buf_writefile
pub fn pf_buf_writefile(e: &mut Exec<'_>) -> Result<()> {
    let fh = e.float(0) as i32;
    let h = e.float(1) as i32;
    let start = e.float(2).max(0.0) as usize;
    let count = if e.argc() > 3 { e.float(3).max(0.0) as usize } else { usize::MAX };
    let owner = e.role();
    let Some(strings) = e.host.bufs.range(owner, h, start, count) else {
        e.ret_float(0.0);
        return Ok(());
    };
    let mut ok = true;
    for mut s in strings {
        s.push(b'\n');
        ok &= e.host.files.write(owner, fh, &s);
        if !ok {
            break;
        }
    }
    e.ret_float(ok as i32 as f32);
    Ok(())
}

// void(float bufhandle, string pattern, string antipattern) buf_cvarlist
pub fn pf_buf_cvarlist(e: &mut Exec<'_>) -> Result<()> {
    let h = e.float(0) as i32;
    let pat = pattern(&e.string(1));
    let anti = pattern(&e.string(2));
    let names: Vec<Vec<u8>> = e.host.cvars.names()
        .into_iter()
        .filter(|n| pat.as_ref().map(|p| p.is_match(n)).unwrap_or(true))
        .filter(|n| !anti.as_ref().map(|p| p.is_match(n)).unwrap_or(false))
        .map(|n| n.as_bytes().to_vec())
        .collect();
    let owner = e.role();
    e.host.bufs.replace(owner, h, names, "buf_cvarlist");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::warning_count;

    const SV: VmRole = VmRole::Server;

    fn filled(bufs: &mut StrBufs, items: &[&str]) -> i32 {
        let h = bufs.create(SV);
        for s in items {
            bufs.add(SV, h, s.as_bytes(), true);
        }
        h
    }

    #[test]
    fn handles_start_at_one() {
        let mut bufs = StrBufs::new();
        assert_eq!(bufs.create(SV), 1);
        assert_eq!(bufs.create(VmRole::Client), 2);
        let before = warning_count();
        assert_eq!(bufs.size(SV, 0), None);
        assert_eq!(bufs.size(SV, 2), None);
        assert_eq!(bufs.size(SV, 65), None);
        assert_eq!(warning_count(), before + 3);
    }

    #[test]
    fn sort_and_implode() {
        let mut bufs = StrBufs::new();
        let h = filled(&mut bufs, &["b", "a", "c"]);
        assert!(bufs.sort(SV, h, 0, false));
        assert_eq!(bufs.implode(SV, h, b",").unwrap(), b"a,b,c");
        bufs.sort(SV, h, 0, true);
        assert_eq!(bufs.implode(SV, h, b",").unwrap(), b"c,b,a");
    }

    #[test]
    fn sort_prefix_is_stable_and_squeezes_holes() {
        let mut bufs = StrBufs::new();
        let h = filled(&mut bufs, &["ab2", "x", "ab1", "aa9"]);
        bufs.free_str(SV, h, 1);
        bufs.sort(SV, h, 2, false);
        assert_eq!(bufs.size(SV, h), Some(3));
        assert_eq!(bufs.implode(SV, h, b" ").unwrap(), b"aa9 ab2 ab1");
    }

    #[test]
    fn add_fills_holes_unless_appending() {
        let mut bufs = StrBufs::new();
        let h = filled(&mut bufs, &["0", "1", "2"]);
        assert!(bufs.free_str(SV, h, 1));
        assert_eq!(bufs.add(SV, h, b"end", true), 3);
        assert_eq!(bufs.add(SV, h, b"hole", false), 1);
        assert_eq!(bufs.get(SV, h, 1), Some(&b"hole"[..]));
        assert_eq!(bufs.get(SV, h, 9), None);
    }

    #[test]
    fn free_trims_the_tail() {
        let mut bufs = StrBufs::new();
        let h = filled(&mut bufs, &["a", "b", "c"]);
        bufs.free_str(SV, h, 1);
        assert_eq!(bufs.size(SV, h), Some(3));
        bufs.free_str(SV, h, 2);
        assert_eq!(bufs.size(SV, h), Some(1));
    }

    #[test]
    fn set_grows() {
        let mut bufs = StrBufs::new();
        let h = bufs.create(SV);
        assert!(bufs.set(SV, h, 4, b"far"));
        assert_eq!(bufs.size(SV, h), Some(5));
        assert_eq!(bufs.implode(SV, h, b"+").unwrap(), b"far");
    }

    #[test]
    fn set_past_the_limit_is_refused() {
        let mut bufs = StrBufs::new();
        let h = filled(&mut bufs, &["a"]);
        let before = warning_count();
        assert!(!bufs.set(SV, h, 1_000_000_000, b"x"));
        assert!(!bufs.set(SV, h, MAX_BUFSTRS as i32, b"x"));
        assert_eq!(warning_count(), before + 2);
        assert_eq!(bufs.size(SV, h), Some(1));
        assert!(bufs.set(SV, h, MAX_BUFSTRS as i32 - 1, b"last"));
        assert_eq!(bufs.size(SV, h), Some(MAX_BUFSTRS));
    }

    #[test]
    fn implode_truncates() {
        let mut bufs = StrBufs::new();
        let h = bufs.create(SV);
        let long = vec![b'x'; 600];
        bufs.add(SV, h, &long, true);
        bufs.add(SV, h, &long, true);
        let before = warning_count();
        assert_eq!(bufs.implode(SV, h, b"").unwrap().len(), STRINGTEMP_LENGTH - 1);
        assert_eq!(warning_count(), before + 1);
    }

    #[test]
    fn implode_stops_at_the_bound() {
        let mut bufs = StrBufs::new();
        let items: Vec<String> = (0..2000).map(|i| format!("item{i}")).collect();
        let items: Vec<&str> = items.iter().map(|s| s.as_str()).collect();
        let h = filled(&mut bufs, &items);
        let before = warning_count();
        let out = bufs.implode(SV, h, b", ").unwrap();
        assert_eq!(out.len(), STRINGTEMP_LENGTH - 1);
        assert!(out.starts_with(b"item0, item1, item2"));
        assert_eq!(warning_count(), before + 1);
        let h = filled(&mut bufs, &["a", "b"]);
        assert_eq!(bufs.implode(SV, h, b"-").unwrap(), b"a-b");
    }

    #[test]
    fn copy_and_lines() {
        let mut bufs = StrBufs::new();
        let a = bufs.create(SV);
        bufs.add_lines(SV, a, b"one\r\ntwo\n\nfour\n");
        assert_eq!(bufs.implode(SV, a, b"|").unwrap(), b"one|two||four");
        let b = bufs.create(SV);
        assert!(bufs.copy(SV, a, b));
        assert_eq!(bufs.size(SV, b), Some(4));
    }

    #[test]
    fn sweep_by_owner() {
        let mut bufs = StrBufs::new();
        filled(&mut bufs, &["s"]);
        let c = bufs.create(VmRole::Client);
        assert_eq!(bufs.shutdown(SV), 1);
        assert_eq!(bufs.live_count(SV), 0);
        assert_eq!(bufs.size(VmRole::Client, c), Some(0));
        assert_eq!(bufs.create(SV), 1);
    }

    #[test]
    fn exhaustion() {
        let mut bufs = StrBufs::new();
        for _ in 0..MAX_STRBUFS {
            assert!(bufs.create(SV) > 0);
        }
        assert_eq!(bufs.create(SV), 0);
    }
}
