//! QuakeC opcodes and an in-memory progs assembler.
//!
//! `ProgsBuilder` produces the same layout a QuakeC compiler would: string 0
//! is empty, function 0 is the null function, globals below `RESERVED_OFS`
//! are the return and parameter registers, followed by the system globals.

use crate::error::Result;
use crate::progs::{Def, EType, Function, Header, Progs, Statement, DEF_SAVEGLOBAL, PROG_VERSION};
use crate::regs::{parm, RESERVED_OFS, MAX_PARMS};
use fnv::FnvHashMap;
use glam::Vec3;
use std::fmt;

macro_rules! qc_opcodes {
    ($($op:ident = $n:literal),+ $(,)?) => {
        #[allow(non_camel_case_types)]
        #[repr(u16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Op {
            $($op = $n),+
        }

        pub const NUM_OPS: u16 = count_args!($($op),+);

        impl Op {
            pub fn from_num(n: u16) -> Result<Op> {
                match n {
                    $($n => Ok(Op::$op),)+
                    _ => err!(BadOpcode, op: n)
                }
            }

            pub fn name(&self) -> &'static str {
                match self {
                    $(Op::$op => stringify!($op)),+
                }
            }
        }
    }
}

qc_opcodes! {
    DONE = 0,
    MUL_F = 1, MUL_V = 2, MUL_FV = 3, MUL_VF = 4,
    DIV_F = 5,
    ADD_F = 6, ADD_V = 7,
    SUB_F = 8, SUB_V = 9,

    EQ_F = 10, EQ_V = 11, EQ_S = 12, EQ_E = 13, EQ_FNC = 14,
    NE_F = 15, NE_V = 16, NE_S = 17, NE_E = 18, NE_FNC = 19,
    LE = 20, GE = 21, LT = 22, GT = 23,

    LOAD_F = 24, LOAD_V = 25, LOAD_S = 26, LOAD_ENT = 27, LOAD_FLD = 28, LOAD_FNC = 29,
    ADDRESS = 30,

    STORE_F = 31, STORE_V = 32, STORE_S = 33, STORE_ENT = 34, STORE_FLD = 35, STORE_FNC = 36,
    STOREP_F = 37, STOREP_V = 38, STOREP_S = 39, STOREP_ENT = 40, STOREP_FLD = 41, STOREP_FNC = 42,

    RETURN = 43,
    NOT_F = 44, NOT_V = 45, NOT_S = 46, NOT_ENT = 47, NOT_FNC = 48,
    IF = 49, IFNOT = 50,

    CALL0 = 51, CALL1 = 52, CALL2 = 53, CALL3 = 54, CALL4 = 55,
    CALL5 = 56, CALL6 = 57, CALL7 = 58, CALL8 = 59,

    STATE = 60,
    GOTO = 61,
    AND = 62, OR = 63,
    BITAND = 64, BITOR = 65,
}

impl Op {
    /// `CALLn` for `n` arguments.
    pub fn call(nargs: usize) -> Op {
        match nargs {
            0 => Op::CALL0, 1 => Op::CALL1, 2 => Op::CALL2,
            3 => Op::CALL3, 4 => Op::CALL4, 5 => Op::CALL5,
            6 => Op::CALL6, 7 => Op::CALL7, _ => Op::CALL8,
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name().to_lowercase())
    }
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct Lbl(u32, &'static str);

impl fmt::Display for Lbl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.1, self.0)
    }
}

#[derive(Debug, Clone, Copy)]
enum Operand { A, B }

#[derive(Debug, Clone, Default)]
pub struct ProgsBuilder {
    statements: Vec<Statement>,
    globaldefs: Vec<Def>,
    fielddefs: Vec<Def>,
    functions: Vec<Function>,
    strings: Vec<u8>,
    string_lookup: FnvHashMap<String, i32>,
    globals: Vec<i32>,
    entityfields: i32,
    label_names: Vec<&'static str>,
    marks: FnvHashMap<u32, usize>,
    fixups: Vec<(usize, Operand, Lbl)>,
    current: Option<usize>,
}

impl ProgsBuilder {
    pub fn new() -> ProgsBuilder {
        let mut b = ProgsBuilder {
            strings: vec![0],
            globals: vec![0; RESERVED_OFS],
            ..Default::default()
        };
        b.statements.push(Statement::default());
        b.functions.push(Function::default());
        b.globaldefs.push(Def::default());
        for name in ["self", "other"] {
            b.global(name, EType::Entity, &[0]);
        }
        b.global("world", EType::Entity, &[0]);
        b.global("time", EType::Float, &[0]);
        b
    }

    /// Constant string offset, deduplicated.
    pub fn string(&mut self, s: &str) -> i32 {
        if s.is_empty() {
            return 0;
        }
        if let Some(&ofs) = self.string_lookup.get(s) {
            return ofs;
        }
        let ofs = self.strings.len() as i32;
        self.strings.extend_from_slice(s.as_bytes());
        self.strings.push(0);
        self.string_lookup.insert(s.to_string(), ofs);
        ofs
    }

    fn alloc(&mut self, vals: &[i32]) -> u16 {
        let ofs = self.globals.len() as u16;
        self.globals.extend_from_slice(vals);
        ofs
    }

    /// Named global, `name` may be empty for an anonymous slot.
    pub fn global(&mut self, name: &str, ty: EType, vals: &[i32]) -> u16 {
        let ofs = self.alloc(vals);
        if !name.is_empty() {
            let s_name = self.string(name);
            self.globaldefs.push(Def { ty: u16::from(ty) | DEF_SAVEGLOBAL, ofs, s_name });
        }
        ofs
    }

    pub fn global_float(&mut self, name: &str, v: f32) -> u16 {
        self.global(name, EType::Float, &[v.to_bits() as i32])
    }

    pub fn global_vector(&mut self, name: &str, v: Vec3) -> u16 {
        let ofs = self.global(name, EType::Vector, &[v.x.to_bits() as i32,
                                                    v.y.to_bits() as i32,
                                                    v.z.to_bits() as i32]);
        if !name.is_empty() {
            for (i, c) in ["_x", "_y", "_z"].iter().enumerate() {
                let s_name = self.string(&format!("{name}{c}"));
                self.globaldefs.push(Def { ty: EType::Float.into(), ofs: ofs + i as u16, s_name });
            }
        }
        ofs
    }

    pub fn global_string(&mut self, name: &str, v: &str) -> u16 {
        let s = self.string(v);
        self.global(name, EType::String, &[s])
    }

    pub fn global_entity(&mut self, name: &str) -> u16 {
        self.global(name, EType::Entity, &[0])
    }

    pub fn global_function(&mut self, name: &str, fnum: i32) -> u16 {
        self.global(name, EType::Function, &[fnum])
    }

    /// Anonymous global referencing function `fnum`, for `CALLn` operands.
    pub fn func_ref(&mut self, fnum: i32) -> u16 {
        self.global("", EType::Function, &[fnum])
    }

    /// Anonymous float constant.
    pub fn float(&mut self, v: f32) -> u16 {
        self.global("", EType::Float, &[v.to_bits() as i32])
    }

    /// Anonymous string constant.
    pub fn str(&mut self, v: &str) -> u16 {
        let s = self.string(v);
        self.global("", EType::String, &[s])
    }

    pub fn vector(&mut self, v: Vec3) -> u16 {
        self.global_vector("", v)
    }

    /// Scratch storage inside the current function.
    pub fn local(&mut self, ty: EType) -> u16 {
        self.global("", ty, &vec![0; ty.size()])
    }

    /// Entity field plus the global holding its offset, as compilers emit.
    pub fn field(&mut self, name: &str, ty: EType) -> u16 {
        let fofs = self.entityfields;
        self.entityfields += ty.size() as i32;
        let s_name = self.string(name);
        self.fielddefs.push(Def { ty: ty.into(), ofs: fofs as u16, s_name });
        self.global(name, EType::Field, &[fofs])
    }

    /// Builtin function. Number `0` is a slot-0 stub bound by name at load.
    pub fn builtin(&mut self, name: &str, number: i32) -> i32 {
        let s_name = self.string(name);
        let fnum = self.functions.len() as i32;
        self.functions.push(Function { first_statement: -number, s_name, ..Default::default() });
        self.global_function(name, fnum);
        fnum
    }

    /// Start a function body. Parameters get contiguous globals at the start
    /// of the locals window, returned in order.
    pub fn begin(&mut self, name: &str, parms: &[EType]) -> (i32, Vec<u16>) {
        assert!(self.current.is_none(), "nested function definitions");
        assert!(parms.len() <= MAX_PARMS);
        let s_name = self.string(name);
        let s_file = self.string("qcasm");
        let fnum = self.functions.len();
        self.global_function(name, fnum as i32);
        let parm_start = self.globals.len() as i32;
        let mut parm_size = [0u8; 8];
        let mut ofs = Vec::with_capacity(parms.len());
        for (i, ty) in parms.iter().enumerate() {
            parm_size[i] = ty.size() as u8;
            ofs.push(self.local(*ty));
        }
        self.functions.push(Function {
            first_statement: self.statements.len() as i32,
            parm_start,
            locals: 0,
            profile: 0,
            s_name,
            s_file,
            numparms: parms.len() as i32,
            parm_size,
        });
        self.current = Some(fnum);
        (fnum as i32, ofs)
    }

    pub fn op(&mut self, op: Op, a: u16, b: u16, c: u16) -> usize {
        self.statements.push(Statement { op: op as u16, a, b, c });
        self.statements.len() - 1
    }

    /// Call `func` (a global holding a function) with arguments copied into
    /// the parameter registers.
    pub fn call(&mut self, func: u16, args: &[(u16, EType)]) {
        for (i, (ofs, ty)) in args.iter().enumerate() {
            let store = match ty {
                EType::Vector => Op::STORE_V,
                EType::String => Op::STORE_S,
                EType::Entity => Op::STORE_ENT,
                EType::Function => Op::STORE_FNC,
                EType::Field => Op::STORE_FLD,
                _ => Op::STORE_F,
            };
            self.op(store, *ofs, parm(i) as u16, 0);
        }
        self.op(Op::call(args.len()), func, 0, 0);
    }

    pub fn label(&mut self, text: &'static str) -> Lbl {
        let idx = self.label_names.len();
        self.label_names.push(text);
        Lbl(idx as u32, text)
    }

    pub fn mark(&mut self, lbl: Lbl) {
        self.marks.insert(lbl.0, self.statements.len());
    }

    pub fn goto(&mut self, lbl: Lbl) {
        let idx = self.op(Op::GOTO, 0, 0, 0);
        self.fixups.push((idx, Operand::A, lbl));
    }

    /// `IF`/`IFNOT` on `cond`, jumping to `lbl`.
    pub fn branch(&mut self, op: Op, cond: u16, lbl: Lbl) {
        let idx = self.op(op, cond, 0, 0);
        self.fixups.push((idx, Operand::B, lbl));
    }

    pub fn end(&mut self) -> i32 {
        let fnum = self.current.take().expect("end() without begin()");
        let f = &mut self.functions[fnum];
        f.locals = self.globals.len() as i32 - f.parm_start;
        fnum as i32
    }

    pub fn statement_count(&self) -> usize {
        self.statements.len()
    }

    pub fn build(mut self) -> Result<Progs> {
        for (idx, which, Lbl(id, name)) in self.fixups.drain(..) {
            let Some(&tgt) = self.marks.get(&id) else {
                bail!(LinkError { dst: format!("{name}#{id}"), src: idx })
            };
            let dip = (tgt as i64 - idx as i64) as i16 as u16;
            match which {
                Operand::A => self.statements[idx].a = dip,
                Operand::B => self.statements[idx].b = dip,
            }
        }
        let header = Header {
            version: PROG_VERSION,
            entityfields: self.entityfields,
            ..Default::default()
        };
        let mut progs = Progs {
            header,
            statements: self.statements,
            globaldefs: self.globaldefs,
            fielddefs: self.fielddefs,
            functions: self.functions,
            strings: self.strings,
            globals: self.globals,
        };
        progs.header.numglobals = progs.globals.len() as i32;
        progs.header.numfunctions = progs.functions.len() as i32;
        progs.header.numstatements = progs.statements.len() as i32;
        Ok(progs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_numbers() {
        assert_eq!(NUM_OPS, 66);
        assert_eq!(Op::from_num(51), Ok(Op::CALL0));
        assert_eq!(Op::from_num(65), Ok(Op::BITOR));
        assert!(Op::from_num(66).is_err());
        assert_eq!(Op::call(3), Op::CALL3);
        assert_eq!(Op::STOREP_V.to_string(), "storep_v");
    }

    #[test]
    fn labels_resolve_relative() {
        let mut b = ProgsBuilder::new();
        let c = b.float(1.0);
        b.begin("loop", &[]);
        let top = b.label("top");
        let out = b.label("out");
        b.mark(top);
        let first = b.statement_count();
        b.branch(Op::IFNOT, c, out);
        b.goto(top);
        b.mark(out);
        b.op(Op::DONE, 0, 0, 0);
        b.end();
        let progs = b.build().unwrap();
        assert_eq!(progs.statements[first].b as i16, 2);
        assert_eq!(progs.statements[first + 1].a as i16, -1);
    }

    #[test]
    fn unmarked_label() {
        let mut b = ProgsBuilder::new();
        b.begin("f", &[]);
        let never = b.label("never");
        b.goto(never);
        b.end();
        assert!(b.build().is_err());
    }

    #[test]
    fn function_layout() {
        let mut b = ProgsBuilder::new();
        let (fnum, parms) = b.begin("f", &[EType::Float, EType::Vector]);
        b.local(EType::Float);
        b.op(Op::DONE, 0, 0, 0);
        b.end();
        let bi = b.builtin("strlen", 0);
        let progs = b.build().unwrap();
        let f = &progs.functions[fnum as usize];
        assert_eq!(f.numparms, 2);
        assert_eq!(&f.parm_size[..2], &[1, 3]);
        assert_eq!(f.parm_start as u16, parms[0]);
        assert_eq!(parms[1], parms[0] + 1);
        assert_eq!(f.locals, 5);
        assert_eq!(progs.functions[bi as usize].first_statement, 0);
        assert!(progs.find_global("self").is_some());
        assert_eq!(progs.find_global("time").map(|d| d.ofs as usize), Some(crate::regs::GLOBAL_TIME));
    }
}
