//! File-search handles for `search_begin` and friends.

use crate::error::Result;
use crate::fs::{is_safe_name, Sandbox};
use crate::guard::VmRole;
use crate::utils::lossy;
use crate::vm::Exec;
use chrono::{DateTime, Local};
use globset::{GlobBuilder, GlobMatcher};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::SystemTime;
use walkdir::WalkDir;

pub const MAX_SEARCHES: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundFile {
    pub name: String,
    pub mtime: Option<SystemTime>,
    pub size: u64,
}

#[derive(Debug)]
struct Search {
    owner: VmRole,
    files: Vec<FoundFile>,
}

#[derive(Debug)]
pub struct Searches {
    slots: Vec<Option<Search>>,
}

impl Default for Searches {
    fn default() -> Self {
        Searches::new()
    }
}

fn rel_slash(path: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for c in path.components() {
        parts.push(c.as_os_str().to_str()?);
    }
    Some(parts.join("/"))
}

fn walk(root: &Path, mut keep: impl FnMut(&str) -> bool, out: &mut BTreeMap<String, FoundFile>) {
    for entry in WalkDir::new(root).follow_links(false).into_iter().flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(rel) = entry.path().strip_prefix(root).ok().and_then(rel_slash) else {
            continue;
        };
        if out.contains_key(&rel) || !keep(&rel) {
            continue;
        }
        let meta = entry.metadata().ok();
        out.insert(rel.clone(), FoundFile {
            name: rel,
            mtime: meta.as_ref().and_then(|m| m.modified().ok()),
            size: meta.map(|m| m.len()).unwrap_or(0),
        });
    }
}

/// Files visible to bytecode that match `matcher`, sorted by name. Data
/// copies shadow game directory copies.
pub fn find(sandbox: &Sandbox, matcher: &GlobMatcher) -> Vec<FoundFile> {
    let mut found = BTreeMap::new();
    walk(&sandbox.data_dir(), |rel| matcher.is_match(rel), &mut found);
    walk(sandbox.gamedir(),
         |rel| sandbox.fallback_allowed(rel) && matcher.is_match(rel),
         &mut found);
    found.into_values().collect()
}

impl Searches {
    pub fn new() -> Searches {
        Searches { slots: (0..MAX_SEARCHES).map(|_| None).collect() }
    }

    fn get(&self, owner: VmRole, h: i32, op: &str) -> Option<&Search> {
        match usize::try_from(h).ok().and_then(|i| self.slots.get(i)) {
            Some(Some(s)) if s.owner == owner => Some(s),
            Some(Some(s)) => {
                qc_warn!("{op}: search handle {h} belongs to the {} VM", s.owner);
                None
            }
            _ => {
                qc_warn!("{op}: invalid search handle {h}");
                None
            }
        }
    }

    /// Handle of a new search, or `-1` when nothing matched or every slot is
    /// taken.
    pub fn begin(&mut self, owner: VmRole, sandbox: &Sandbox, pattern: &str,
                 caseinsensitive: bool, quiet: bool) -> i32 {
        if !is_safe_name(pattern) {
            qc_warn!("search_begin: rejected unsafe pattern \"{pattern}\"");
            return -1;
        }
        let Some(slot) = self.slots.iter().position(|s| s.is_none()) else {
            qc_warn!("search_begin: all {MAX_SEARCHES} search handles are in use");
            return -1;
        };
        let matcher = match GlobBuilder::new(pattern).case_insensitive(caseinsensitive)
                                                     .literal_separator(true)
                                                     .build() {
            Ok(g) => g.compile_matcher(),
            Err(e) => {
                qc_warn!("search_begin: bad pattern \"{pattern}\": {e}");
                return -1;
            }
        };
        let files = find(sandbox, &matcher);
        if files.is_empty() {
            if !quiet {
                debug!("search_begin: no files match \"{pattern}\"");
            }
            return -1;
        }
        trace!("search_begin \"{pattern}\": {} files -> {slot}", files.len());
        self.slots[slot] = Some(Search { owner, files });
        slot as i32
    }

    pub fn end(&mut self, owner: VmRole, h: i32) -> bool {
        if self.get(owner, h, "search_end").is_none() {
            return false;
        }
        self.slots[h as usize] = None;
        true
    }

    pub fn count(&self, owner: VmRole, h: i32) -> Option<usize> {
        self.get(owner, h, "search_getsize").map(|s| s.files.len())
    }

    pub fn file(&self, owner: VmRole, h: i32, idx: i32, op: &str) -> Option<&FoundFile> {
        let s = self.get(owner, h, op)?;
        let f = usize::try_from(idx).ok().and_then(|i| s.files.get(i));
        if f.is_none() {
            qc_warn!("{op}: index {idx} out of range for search handle {h}");
        }
        f
    }

    pub fn shutdown(&mut self, owner: VmRole) -> usize {
        let mut n = 0;
        for slot in self.slots.iter_mut() {
            if slot.as_ref().map(|s| s.owner == owner).unwrap_or(false) {
                *slot = None;
                n += 1;
            }
        }
        if n > 0 {
            debug!("released {n} searches of the {owner} VM");
        }
        n
    }
}

pub fn format_mtime(t: SystemTime) -> String {
    DateTime::<Local>::from(t).format("%Y-%m-%d %H:%M:%S").to_string()
}

// float(string pattern, float caseinsensitive, float quiet) search_begin
pub fn pf_search_begin(e: &mut Exec<'_>) -> Result<()> {
    let pattern = lossy(&e.string(0)).into_owned();
    let ci = e.float(1) != 0.0;
    let quiet = e.float(2) != 0.0;
    let owner = e.role();
    let sandbox = &e.host.sandbox;
    let h = e.host.searches.begin(owner, sandbox, &pattern, ci, quiet);
    e.ret_float(h as f32);
    Ok(())
}

pub fn pf_search_end(e: &mut Exec<'_>) -> Result<()> {
    let h = e.float(0) as i32;
    let owner = e.role();
    e.host.searches.end(owner, h);
    Ok(())
}

pub fn pf_search_getsize(e: &mut Exec<'_>) -> Result<()> {
    let h = e.float(0) as i32;
    let n = e.host.searches.count(e.role(), h).map(|n| n as f32).unwrap_or(-1.0);
    e.ret_float(n);
    Ok(())
}

pub fn pf_search_getfilename(e: &mut Exec<'_>) -> Result<()> {
    let (h, idx) = (e.float(0) as i32, e.float(1) as i32);
    let name = e.host.searches.file(e.role(), h, idx, "search_getfilename")
                              .map(|f| f.name.clone());
    match name {
        Some(name) => e.ret_tstring(name.as_bytes()),
        None => e.ret_null(),
    }
    Ok(())
}

pub fn pf_search_getfilesize(e: &mut Exec<'_>) -> Result<()> {
    let (h, idx) = (e.float(0) as i32, e.float(1) as i32);
    let size = e.host.searches.file(e.role(), h, idx, "search_getfilesize")
                              .map(|f| f.size as f32)
                              .unwrap_or(0.0);
    e.ret_float(size);
    Ok(())
}

pub fn pf_search_getfilemtime(e: &mut Exec<'_>) -> Result<()> {
    let (h, idx) = (e.float(0) as i32, e.float(1) as i32);
    let mtime = e.host.searches.file(e.role(), h, idx, "search_getfilemtime")
                               .and_then(|f| f.mtime)
                               .map(format_mtime);
    match mtime {
        Some(t) => e.ret_tstring(t.as_bytes()),
        None => e.ret_null(),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::warning_count;
    use std::fs;

    fn tree() -> (tempfile::TempDir, Sandbox) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("data/maps")).unwrap();
        fs::create_dir_all(root.join("configs")).unwrap();
        fs::write(root.join("data/b.txt"), b"bb").unwrap();
        fs::write(root.join("data/A.txt"), b"a").unwrap();
        fs::write(root.join("data/maps/m.txt"), b"m").unwrap();
        fs::write(root.join("configs/x.cfg"), b"x").unwrap();
        fs::write(root.join("hidden.txt"), b"h").unwrap();
        let sandbox = Sandbox::new(root);
        (dir, sandbox)
    }

    #[test]
    fn sorted_matches() {
        let (_dir, sb) = tree();
        let mut s = Searches::new();
        let h = s.begin(VmRole::Server, &sb, "*.txt", false, false);
        assert_eq!(h, 0);
        assert_eq!(s.count(VmRole::Server, h), Some(2));
        assert_eq!(s.file(VmRole::Server, h, 0, "t").unwrap().name, "A.txt");
        assert_eq!(s.file(VmRole::Server, h, 1, "t").unwrap().size, 2);
    }

    #[test]
    fn case_and_subdirs() {
        let (_dir, sb) = tree();
        let mut s = Searches::new();
        let h = s.begin(VmRole::Server, &sb, "a.*", true, false);
        assert_eq!(s.count(VmRole::Server, h), Some(1));
        let h = s.begin(VmRole::Server, &sb, "maps/*", false, false);
        assert_eq!(s.file(VmRole::Server, h, 0, "t").unwrap().name, "maps/m.txt");
    }

    #[test]
    fn fallback_files_are_visible() {
        let (_dir, sb) = tree();
        let mut s = Searches::new();
        let h = s.begin(VmRole::Client, &sb, "configs/*.cfg", false, false);
        assert_eq!(s.count(VmRole::Client, h), Some(1));
        assert_eq!(s.begin(VmRole::Client, &sb, "hidden.txt", false, true), -1);
    }

    #[test]
    fn zero_matches_is_failure() {
        let (_dir, sb) = tree();
        let mut s = Searches::new();
        assert_eq!(s.begin(VmRole::Server, &sb, "*.nothing", false, true), -1);
        assert_eq!(s.begin(VmRole::Server, &sb, "../*", false, true), -1);
    }

    #[test]
    fn slots_run_out() {
        let (_dir, sb) = tree();
        let mut s = Searches::new();
        for i in 0..MAX_SEARCHES {
            assert_eq!(s.begin(VmRole::Server, &sb, "*.txt", false, false), i as i32);
        }
        let before = warning_count();
        assert_eq!(s.begin(VmRole::Server, &sb, "*.txt", false, false), -1);
        assert_eq!(warning_count(), before + 1);
        assert!(s.end(VmRole::Server, 5));
        assert_eq!(s.begin(VmRole::Server, &sb, "*.txt", false, false), 5);
    }

    #[test]
    fn owners_and_sweep() {
        let (_dir, sb) = tree();
        let mut s = Searches::new();
        let a = s.begin(VmRole::Server, &sb, "*.txt", false, false);
        let b = s.begin(VmRole::Client, &sb, "*.txt", false, false);
        let before = warning_count();
        assert_eq!(s.count(VmRole::Client, a), None);
        assert!(s.file(VmRole::Server, a, 9, "t").is_none());
        assert_eq!(warning_count(), before + 2);
        assert_eq!(s.shutdown(VmRole::Server), 1);
        assert_eq!(s.count(VmRole::Client, b), Some(2));
    }
}
