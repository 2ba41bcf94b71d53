//! File handles for `fopen` and friends.
//!
//! Handles are slot indices into a process-wide table shared by both VMs and
//! tagged with the owning VM. Misuse warns and yields a sentinel.

use crate::error::Result;
use crate::fs::Sandbox;
use crate::guard::VmRole;
use crate::utils::lossy;
use crate::vm::Exec;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};

pub const FILE_CACHE: usize = 1024;
const TABLE_GROWTH: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    Read,
    Append,
    Write,
}

impl FileMode {
    pub fn from_qc(mode: f32) -> Option<FileMode> {
        match mode as i32 {
            0 => Some(FileMode::Read),
            1 => Some(FileMode::Append),
            2 => Some(FileMode::Write),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct QcFile {
    owner: VmRole,
    name: String,
    file: File,
    mode: FileMode,
    cache: Box<[u8; FILE_CACHE]>,
    cache_pos: usize,
    cache_len: usize,
    size: u64,
    cursor: u64,
}

impl QcFile {
    /// Next byte through the cache, `None` at end of file.
    fn next_byte(&mut self) -> Option<u8> {
        if self.cache_pos >= self.cache_len {
            match self.file.read(&mut self.cache[..]) {
                Ok(0) => return None,
                Ok(n) => {
                    self.cache_len = n;
                    self.cache_pos = 0;
                    self.cursor += n as u64;
                }
                Err(e) => {
                    qc_warn!("read error on {}: {e}", self.name);
                    return None;
                }
            }
        }
        let c = self.cache[self.cache_pos];
        self.cache_pos += 1;
        Some(c)
    }
}

#[derive(Debug, Default)]
pub struct Files {
    slots: Vec<Option<QcFile>>,
}

impl Files {
    pub fn new() -> Files {
        Files::default()
    }

    fn slot(&mut self) -> usize {
        if let Some(i) = self.slots.iter().position(|s| s.is_none()) {
            return i;
        }
        let i = self.slots.len();
        self.slots.resize_with(i + TABLE_GROWTH, || None);
        i
    }

    fn get_mut(&mut self, owner: VmRole, h: i32, op: &str) -> Option<&mut QcFile> {
        let idx = usize::try_from(h).ok();
        let entry = idx.and_then(|i| self.slots.get(i));
        match entry {
            Some(Some(f)) if f.owner == owner => {
                idx.and_then(|i| self.slots.get_mut(i)).and_then(|s| s.as_mut())
            }
            Some(Some(f)) => {
                qc_warn!("{op}: file handle {h} belongs to the {} VM", f.owner);
                None
            }
            _ => {
                qc_warn!("{op}: invalid file handle {h}");
                None
            }
        }
    }

    /// Handle of the opened file, or `-1`.
    pub fn open(&mut self, owner: VmRole, sandbox: &Sandbox, name: &str, mode: FileMode) -> i32 {
        let path = match mode {
            FileMode::Read => sandbox.read_path(name),
            FileMode::Append | FileMode::Write => sandbox.write_path(name),
        };
        let Some(path) = path else {
            debug!("fopen: cannot find {name}");
            return -1;
        };
        let res = match mode {
            FileMode::Read => File::open(&path),
            FileMode::Append => OpenOptions::new().append(true).create(true).open(&path),
            FileMode::Write => File::create(&path),
        };
        let file = match res {
            Ok(f) => f,
            Err(e) => {
                debug!("fopen: {}: {e}", path.display());
                return -1;
            }
        };
        let size = file.metadata().map(|m| m.len()).unwrap_or(0);
        let i = self.slot();
        self.slots[i] = Some(QcFile {
            owner,
            name: name.to_string(),
            file,
            mode,
            cache: Box::new([0; FILE_CACHE]),
            cache_pos: 0,
            cache_len: 0,
            size,
            cursor: 0,
        });
        trace!("fopen {name} ({mode:?}) -> {i}");
        i as i32
    }

    pub fn close(&mut self, owner: VmRole, h: i32) -> bool {
        if self.get_mut(owner, h, "fclose").is_none() {
            return false;
        }
        self.slots[h as usize] = None;
        true
    }

    /// One line without its terminator. `None` only at true end of file, an
    /// empty line is `Some("")`. A NUL ends the returned text but not the
    /// scan for the newline.
    pub fn gets(&mut self, owner: VmRole, h: i32) -> Option<Vec<u8>> {
        let f = self.get_mut(owner, h, "fgets")?;
        if f.mode != FileMode::Read {
            qc_warn!("fgets: {} was not opened for reading", f.name);
            return None;
        }
        let mut line = Vec::new();
        let mut got_any = false;
        let mut terminated = false;
        while let Some(c) = f.next_byte() {
            got_any = true;
            match c {
                b'\n' => break,
                0 => terminated = true,
                c if !terminated => line.push(c),
                _ => (),
            }
        }
        if !got_any {
            return None;
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(line)
    }

    pub fn write(&mut self, owner: VmRole, h: i32, data: &[u8]) -> bool {
        let Some(f) = self.get_mut(owner, h, "fputs") else {
            return false;
        };
        if f.mode == FileMode::Read {
            qc_warn!("fputs: {} was opened for reading", f.name);
            return false;
        }
        match f.file.write_all(data) {
            Ok(()) => {
                f.size += data.len() as u64;
                true
            }
            Err(e) => {
                qc_warn!("write error on {}: {e}", f.name);
                false
            }
        }
    }

    pub fn size(&mut self, owner: VmRole, h: i32) -> Option<u64> {
        self.get_mut(owner, h, "fsize").map(|f| f.size)
    }

    /// Bytes of the file not yet returned.
    pub fn remaining(&mut self, owner: VmRole, h: i32) -> Option<u64> {
        self.get_mut(owner, h, "fremaining").map(|f| {
            f.size.saturating_sub(f.cursor) + (f.cache_len - f.cache_pos) as u64
        })
    }

    pub fn open_count(&self, owner: VmRole) -> usize {
        self.slots.iter().flatten().filter(|f| f.owner == owner).count()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Close every file of `owner`, leaving other VMs' files open.
    pub fn shutdown(&mut self, owner: VmRole) -> usize {
        let mut n = 0;
        for slot in self.slots.iter_mut() {
            if slot.as_ref().map(|f| f.owner == owner).unwrap_or(false) {
                if let Some(f) = slot.take() {
                    debug!("closing {} left open by the {owner} VM", f.name);
                }
                n += 1;
            }
        }
        n
    }
}

// float(string filename, float mode) fopen
pub fn pf_fopen(e: &mut Exec<'_>) -> Result<()> {
    let name = e.string(0);
    let name = lossy(&name);
    let h = match FileMode::from_qc(e.float(1)) {
        Some(mode) => {
            let owner = e.role();
            let sandbox = &e.host.sandbox;
            e.host.files.open(owner, sandbox, &name, mode)
        }
        None => {
            qc_warn!("fopen: {name}: invalid mode {}", e.float(1));
            -1
        }
    };
    e.ret_float(h as f32);
    Ok(())
}

pub fn pf_fclose(e: &mut Exec<'_>) -> Result<()> {
    let h = e.float(0) as i32;
    let owner = e.role();
    e.host.files.close(owner, h);
    Ok(())
}

pub fn pf_fgets(e: &mut Exec<'_>) -> Result<()> {
    let h = e.float(0) as i32;
    let owner = e.role();
    match e.host.files.gets(owner, h) {
        Some(line) => e.ret_tstring(&line),
        None => e.ret_null(),
    }
    Ok(())
}

pub fn pf_fputs(e: &mut Exec<'_>) -> Result<()> {
    let h = e.float(0) as i32;
    let s = e.strings_from(1);
    let owner = e.role();
    e.host.files.write(owner, h, &s);
    Ok(())
}
