//! Entity field memory.
//!
//! Entities are numbered, `0` is the world and is never freed. Each entity
//! owns `entityfields` 32-bit slots. A field pointer (what `ADDRESS` yields)
//! is the flat slot index `num * entityfields + field`.

use crate::error::Result;

pub const MAX_EDICTS: usize = 8192;

#[derive(Debug, Clone)]
pub struct Edicts {
    fields: usize,
    data: Vec<i32>,
    free: Vec<bool>,
    max: usize,
}

impl Edicts {
    pub fn new(fields: usize, max: usize) -> Edicts {
        Edicts { fields, data: vec![0; fields], free: vec![false], max: max.max(1) }
    }

    pub fn fields(&self) -> usize {
        self.fields
    }

    /// Number of entity slots, free or not, including the world.
    pub fn len(&self) -> usize {
        self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }

    pub fn is_free(&self, num: i32) -> bool {
        usize::try_from(num).ok().and_then(|n| self.free.get(n)).copied().unwrap_or(true)
    }

    /// First free slot after the world, growing the table when full.
    pub fn alloc(&mut self) -> Result<i32> {
        let num = match self.free.iter().skip(1).position(|&f| f) {
            Some(i) => i + 1,
            None => {
                if self.free.len() >= self.max {
                    bail!(NoFreeEdicts { max: self.max });
                }
                self.free.push(true);
                self.data.resize(self.free.len() * self.fields, 0);
                self.free.len() - 1
            }
        };
        self.free[num] = false;
        self.clear(num);
        Ok(num as i32)
    }

    fn clear(&mut self, num: usize) {
        let ofs = num * self.fields;
        self.data[ofs..ofs + self.fields].iter_mut().for_each(|v| *v = 0);
    }

    /// Returns false for the world and for entities that are already free.
    pub fn free(&mut self, num: i32) -> bool {
        match usize::try_from(num) {
            Ok(n) if n > 0 && n < self.free.len() && !self.free[n] => {
                self.free[n] = true;
                self.clear(n);
                true
            }
            _ => false,
        }
    }

    /// Next live entity after `num`, `0` when there is none.
    pub fn next(&self, num: i32) -> i32 {
        let start = usize::try_from(num).map(|n| n + 1).unwrap_or(1);
        (start..self.free.len()).find(|&n| !self.free[n]).map(|n| n as i32).unwrap_or(0)
    }

    pub fn pointer(&self, num: i32, field: i32) -> Result<usize> {
        let (Ok(n), Ok(f)) = (usize::try_from(num), usize::try_from(field)) else {
            bail!(BadEdict { num })
        };
        if n >= self.free.len() || f >= self.fields {
            bail!(BadEdict { num });
        }
        Ok(n * self.fields + f)
    }

    pub fn read(&self, ptr: usize) -> Result<i32> {
        self.data.get(ptr).copied().ok_or_else(|| error!(BadEdict, num: (ptr / self.fields.max(1)) as i32))
    }

    pub fn write(&mut self, ptr: usize, v: i32) -> Result<()> {
        let fields = self.fields.max(1);
        match self.data.get_mut(ptr) {
            Some(slot) => {
                *slot = v;
                Ok(())
            }
            None => err!(BadEdict, num: (ptr / fields) as i32),
        }
    }

    pub fn field(&self, num: i32, field: i32) -> Result<i32> {
        self.read(self.pointer(num, field)?)
    }

    pub fn set_field(&mut self, num: i32, field: i32, v: i32) -> Result<()> {
        let ptr = self.pointer(num, field)?;
        self.write(ptr, v)
    }

    pub fn live_count(&self) -> usize {
        self.free.iter().filter(|f| !**f).count()
    }
}
