//! `progs.dat` version 6 decoding and encoding.

use crate::error::Result;
use crate::utils::{lossy, until_nul};
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

pub const PROG_VERSION: i32 = 6;
pub const DEF_SAVEGLOBAL: u16 = 1 << 15;

const HEADER_SIZE: usize = 15 * 4;
const STATEMENT_SIZE: usize = 8;
const DEF_SIZE: usize = 8;
const FUNCTION_SIZE: usize = 36;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub version: i32,
    pub crc: i32,
    pub ofs_statements: i32,
    pub numstatements: i32,
    pub ofs_globaldefs: i32,
    pub numglobaldefs: i32,
    pub ofs_fielddefs: i32,
    pub numfielddefs: i32,
    pub ofs_functions: i32,
    pub numfunctions: i32,
    pub ofs_strings: i32,
    pub numstrings: i32,
    pub ofs_globals: i32,
    pub numglobals: i32,
    pub entityfields: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    pub op: u16,
    pub a: u16,
    pub b: u16,
    pub c: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Def {
    pub ty: u16,
    pub ofs: u16,
    pub s_name: i32,
}

impl Def {
    pub fn etype(&self) -> EType {
        EType::from(self.ty & !DEF_SAVEGLOBAL)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    /// Negative values name a builtin slot.
    pub first_statement: i32,
    pub parm_start: i32,
    pub locals: i32,
    pub profile: i32,
    pub s_name: i32,
    pub s_file: i32,
    pub numparms: i32,
    pub parm_size: [u8; 8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EType {
    Void,
    String,
    Float,
    Vector,
    Entity,
    Field,
    Function,
    Pointer,
    Bad(u16),
}

impl From<u16> for EType {
    fn from(v: u16) -> Self {
        match v {
            0 => EType::Void,
            1 => EType::String,
            2 => EType::Float,
            3 => EType::Vector,
            4 => EType::Entity,
            5 => EType::Field,
            6 => EType::Function,
            7 => EType::Pointer,
            x => EType::Bad(x),
        }
    }
}

impl From<EType> for u16 {
    fn from(v: EType) -> Self {
        match v {
            EType::Void => 0,
            EType::String => 1,
            EType::Float => 2,
            EType::Vector => 3,
            EType::Entity => 4,
            EType::Field => 5,
            EType::Function => 6,
            EType::Pointer => 7,
            EType::Bad(x) => x,
        }
    }
}

impl EType {
    pub fn size(&self) -> usize {
        match self {
            EType::Vector => 3,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Progs {
    pub header: Header,
    pub statements: Vec<Statement>,
    pub globaldefs: Vec<Def>,
    pub fielddefs: Vec<Def>,
    pub functions: Vec<Function>,
    pub strings: Vec<u8>,
    pub globals: Vec<i32>,
}

fn opts() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .allow_trailing_bytes()
}

fn lump<'a>(bytes: &'a [u8], name: &'static str, ofs: i32, num: i32, size: usize) -> Result<&'a [u8]> {
    let (Ok(ofs), Ok(num)) = (usize::try_from(ofs), usize::try_from(num)) else {
        bail!(ProgsTruncated { lump: name })
    };
    bytes.get(ofs..ofs + num * size).ok_or_else(|| error!(ProgsTruncated, lump: name))
}

fn decode_all<'a, T: Deserialize<'a>>(lump: &'a [u8], size: usize) -> Result<Vec<T>> {
    lump.chunks_exact(size)
        .map(|c| opts().deserialize(c).map_err(|e| e.into()))
        .collect()
}

impl Progs {
    pub fn load(bytes: &[u8]) -> Result<Progs> {
        let head = bytes.get(..HEADER_SIZE).ok_or_else(|| error!(ProgsTruncated, lump: "header"))?;
        let header: Header = opts().deserialize(head)?;
        if header.version != PROG_VERSION {
            bail!(ProgsVersion { expect: PROG_VERSION, got: header.version });
        }
        let h = &header;
        let statements = decode_all(lump(bytes, "statements", h.ofs_statements, h.numstatements, STATEMENT_SIZE)?,
                                    STATEMENT_SIZE)?;
        let globaldefs = decode_all(lump(bytes, "globaldefs", h.ofs_globaldefs, h.numglobaldefs, DEF_SIZE)?,
                                    DEF_SIZE)?;
        let fielddefs = decode_all(lump(bytes, "fielddefs", h.ofs_fielddefs, h.numfielddefs, DEF_SIZE)?,
                                   DEF_SIZE)?;
        let functions = decode_all(lump(bytes, "functions", h.ofs_functions, h.numfunctions, FUNCTION_SIZE)?,
                                   FUNCTION_SIZE)?;
        let strings = lump(bytes, "strings", h.ofs_strings, h.numstrings, 1)?.to_vec();
        let globals = decode_all(lump(bytes, "globals", h.ofs_globals, h.numglobals, 4)?, 4)?;
        debug!("loaded progs: {} statements, {} functions, {} globals, {} entity fields",
               statements.len(), functions.len(), h.numglobals, h.entityfields);
        Ok(Progs { header, statements, globaldefs, fielddefs, functions, strings, globals })
    }

    /// Lay the lumps out back to back after the header, recomputing offsets.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut header = self.header;
        header.version = PROG_VERSION;
        let mut ofs = HEADER_SIZE;
        macro_rules! place {
            ($ofs_f:ident, $num_f:ident, $v:expr, $size:expr) => {{
                header.$ofs_f = ofs.try_into()?;
                header.$num_f = $v.len().try_into()?;
                ofs += $v.len() * $size;
            }};
        }
        place!(ofs_statements, numstatements, self.statements, STATEMENT_SIZE);
        place!(ofs_globaldefs, numglobaldefs, self.globaldefs, DEF_SIZE);
        place!(ofs_fielddefs, numfielddefs, self.fielddefs, DEF_SIZE);
        place!(ofs_functions, numfunctions, self.functions, FUNCTION_SIZE);
        place!(ofs_strings, numstrings, self.strings, 1);
        place!(ofs_globals, numglobals, self.globals, 4);
        let mut out = Vec::with_capacity(ofs);
        opts().serialize_into(&mut out, &header)?;
        for s in &self.statements { opts().serialize_into(&mut out, s)?; }
        for d in &self.globaldefs { opts().serialize_into(&mut out, d)?; }
        for d in &self.fielddefs { opts().serialize_into(&mut out, d)?; }
        for f in &self.functions { opts().serialize_into(&mut out, f)?; }
        out.extend_from_slice(&self.strings);
        for g in &self.globals { opts().serialize_into(&mut out, g)?; }
        Ok(out)
    }

    pub fn string_at(&self, ofs: i32) -> &[u8] {
        usize::try_from(ofs).ok()
                            .and_then(|o| self.strings.get(o..))
                            .map(until_nul)
                            .unwrap_or(b"")
    }

    pub fn function_name(&self, fnum: usize) -> Cow<'_, str> {
        match self.functions.get(fnum) {
            Some(f) => lossy(self.string_at(f.s_name)),
            None => Cow::Borrowed("<bad function>"),
        }
    }

    pub fn function_file(&self, fnum: usize) -> Cow<'_, str> {
        match self.functions.get(fnum) {
            Some(f) => lossy(self.string_at(f.s_file)),
            None => Cow::Borrowed("?"),
        }
    }

    pub fn find_function(&self, name: &str) -> Option<usize> {
        self.functions.iter()
                      .position(|f| self.string_at(f.s_name) == name.as_bytes())
    }

    pub fn find_global(&self, name: &str) -> Option<&Def> {
        self.globaldefs.iter().find(|d| self.string_at(d.s_name) == name.as_bytes())
    }

    pub fn find_field(&self, name: &str) -> Option<&Def> {
        self.fielddefs.iter().find(|d| self.string_at(d.s_name) == name.as_bytes())
    }

    pub fn def_name(&self, def: &Def) -> Cow<'_, str> {
        lossy(self.string_at(def.s_name))
    }
}
