//! Register file: typed views over the flat global array.
//!
//! Every slot is 32 bits. Floats, ints, string handles, entity numbers and
//! function numbers share the same slot; vectors take three consecutive ones.

use glam::Vec3;

pub const OFS_NULL: usize = 0;
pub const OFS_RETURN: usize = 1;
pub const OFS_PARM0: usize = 4;
pub const PARM_STRIDE: usize = 3;
pub const MAX_PARMS: usize = 8;
pub const RESERVED_OFS: usize = 28;

pub const GLOBAL_SELF: usize = 28;
pub const GLOBAL_OTHER: usize = 29;
pub const GLOBAL_WORLD: usize = 30;
pub const GLOBAL_TIME: usize = 31;

#[inline]
pub const fn parm(n: usize) -> usize {
    OFS_PARM0 + n * PARM_STRIDE
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Globals {
    data: Vec<i32>,
}

impl Globals {
    pub fn new(data: Vec<i32>) -> Globals {
        let mut data = data;
        if data.len() < RESERVED_OFS {
            data.resize(RESERVED_OFS, 0);
        }
        Globals { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn int(&self, ofs: usize) -> i32 {
        self.data.get(ofs).copied().unwrap_or(0)
    }

    #[inline]
    pub fn set_int(&mut self, ofs: usize, v: i32) {
        if let Some(slot) = self.data.get_mut(ofs) {
            *slot = v;
        }
    }

    #[inline]
    pub fn float(&self, ofs: usize) -> f32 {
        f32::from_bits(self.int(ofs) as u32)
    }

    #[inline]
    pub fn set_float(&mut self, ofs: usize, v: f32) {
        self.set_int(ofs, v.to_bits() as i32)
    }

    pub fn vector(&self, ofs: usize) -> Vec3 {
        Vec3::new(self.float(ofs), self.float(ofs + 1), self.float(ofs + 2))
    }

    pub fn set_vector(&mut self, ofs: usize, v: Vec3) {
        self.set_float(ofs, v.x);
        self.set_float(ofs + 1, v.y);
        self.set_float(ofs + 2, v.z);
    }

    /// Raw string handle, decode it with `Strings::decode`.
    #[inline]
    pub fn string(&self, ofs: usize) -> i32 {
        self.int(ofs)
    }

    #[inline]
    pub fn edict(&self, ofs: usize) -> i32 {
        self.int(ofs)
    }

    #[inline]
    pub fn function(&self, ofs: usize) -> i32 {
        self.int(ofs)
    }

    pub fn copy(&mut self, dst: usize, src: usize, n: usize) {
        for i in 0..n {
            let v = self.int(src + i);
            self.set_int(dst + i, v);
        }
    }

    pub fn slice(&self, ofs: usize, n: usize) -> &[i32] {
        let end = (ofs + n).min(self.data.len());
        self.data.get(ofs..end).unwrap_or(&[])
    }

    pub fn raw(&self) -> &[i32] {
        &self.data
    }

    pub fn raw_mut(&mut self) -> &mut [i32] {
        &mut self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_window() {
        assert_eq!(parm(0), 4);
        assert_eq!(parm(1), 7);
        assert_eq!(parm(7), 25);
        assert!(parm(7) + PARM_STRIDE <= RESERVED_OFS);
    }

    #[test]
    fn float_int_aliasing() {
        let mut g = Globals::new(vec![]);
        g.set_float(OFS_RETURN, 1.0);
        assert_eq!(g.int(OFS_RETURN), 0x3f800000);
        g.set_vector(parm(0), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(g.float(parm(0) + 2), 3.0);
        assert_eq!(g.vector(parm(0)), Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn out_of_range_reads_zero() {
        let mut g = Globals::new(vec![]);
        assert_eq!(g.len(), RESERVED_OFS);
        assert_eq!(g.int(5000), 0);
        g.set_int(5000, 1);
        assert_eq!(g.int(5000), 0);
    }
}
