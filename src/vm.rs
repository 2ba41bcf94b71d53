//! The QuakeC interpreter.
//!
//! A `QcVm` owns one loaded program: its register file, string table,
//! entities, builtin dispatch table and tokenizer state. Resources shared by
//! both VMs (files, searches, buffers, cvars) live in `host::Shared` and are
//! reached through `Exec` while a builtin runs.

use crate::cvar::Cvars;
use crate::edict::{Edicts, MAX_EDICTS};
use crate::error::{Error, Meta, Result, TraceFrame, Traceback};
use crate::fixme;
use crate::guard::VmRole;
use crate::host::Shared;
use crate::progs::{EType, Function, Progs};
use crate::qcasm::Op;
use crate::registry::{self, Slot};
use crate::regs::*;
use crate::strings::Strings;
use crate::tokenize::Tokens;
use crate::utils::{ftoa, lossy, q_atof};
use glam::Vec3;
use std::borrow::Cow;
use std::io::Write;

pub const MAX_BUILTINS: usize = 1024;
pub const MAX_STACK_DEPTH: usize = 1024;
pub const LOCALSTACK_SIZE: usize = 16384;
pub const RUNAWAY_LIMIT: u32 = 0x1000000;

#[derive(Debug, Clone, Copy)]
struct Frame {
    /// Statement to resume at.
    s: i32,
    /// Function to resume in.
    f: i32,
}

#[derive(Debug, Clone, Copy, Default)]
struct StateFields {
    nextthink: Option<i32>,
    frame: Option<i32>,
    think: Option<i32>,
}

#[derive(Debug, Clone)]
struct AutoCvar {
    name: String,
    ofs: usize,
    ty: EType,
}

#[derive(Debug)]
pub struct QcVm {
    role: VmRole,
    pub progs: Progs,
    pub globals: Globals,
    pub strings: Strings,
    pub edicts: Edicts,
    pub builtins: Vec<Slot>,
    /// Slots below this are bound eagerly at load.
    pub num_builtins: usize,
    pub extensions_enabled: bool,
    pub tokens: Tokens,
    stack: Vec<Frame>,
    local_stack: Vec<i32>,
    xfunction: i32,
    xstatement: i32,
    /// Argument count of the builtin call in progress.
    pub argc: usize,
    pub runaway_limit: u32,
    /// Log every executed statement.
    pub trace: bool,
    /// Forbid `ADDRESS` on the world entity.
    pub world_locked: bool,
    autocvars: Vec<AutoCvar>,
    state_fields: StateFields,
}

fn parse_vector(s: &str) -> Vec3 {
    let mut it = s.split_whitespace().map(|t| q_atof(t.as_bytes()));
    Vec3::new(it.next().unwrap_or(0.0), it.next().unwrap_or(0.0), it.next().unwrap_or(0.0))
}

impl QcVm {
    pub fn new(role: VmRole, progs: Progs, cvars: &mut Cvars) -> Result<QcVm> {
        let field = |name: &str| progs.find_field(name).map(|d| d.ofs as i32);
        let state_fields = StateFields {
            nextthink: field("nextthink"),
            frame: field("frame"),
            think: field("think"),
        };
        let extensions_enabled = !(role == VmRole::Server && cvars.value("pr_checkextension") == 0.0);
        let runaway = cvars.value("pr_runaway");
        let mut vm = QcVm {
            role,
            globals: Globals::new(progs.globals.clone()),
            strings: Strings::new(progs.strings.clone()),
            edicts: Edicts::new(progs.header.entityfields.max(0) as usize, MAX_EDICTS),
            builtins: vec![Slot::Unresolved; MAX_BUILTINS],
            num_builtins: registry::BASE_BUILTINS,
            extensions_enabled,
            tokens: Tokens::default(),
            stack: Vec::new(),
            local_stack: Vec::new(),
            xfunction: 0,
            xstatement: 0,
            argc: 0,
            runaway_limit: if runaway >= 1.0 { runaway as u32 } else { RUNAWAY_LIMIT },
            trace: false,
            world_locked: false,
            autocvars: Vec::new(),
            state_fields,
            progs,
        };
        registry::install(&mut vm);
        vm.init_autocvars(cvars);
        info!("{} VM loaded: {} functions, {} statements{}",
              role, vm.progs.functions.len(), vm.progs.statements.len(),
              if extensions_enabled { "" } else { " (extensions disabled)" });
        Ok(vm)
    }

    pub fn role(&self) -> VmRole {
        self.role
    }

    pub fn function(&self, fnum: i32) -> Result<Function> {
        if fnum == 0 {
            bail!(NullFunction);
        }
        usize::try_from(fnum).ok()
                             .and_then(|i| self.progs.functions.get(i))
                             .copied()
                             .ok_or_else(|| error!(BadFunction, idx: fnum))
    }

    pub fn function_name(&self, fnum: i32) -> Cow<'_, str> {
        match usize::try_from(fnum) {
            Ok(i) => self.progs.function_name(i),
            Err(_) => Cow::Borrowed("<bad function>"),
        }
    }

    pub fn find_function(&self, name: &str) -> Result<i32> {
        match self.progs.find_function(name) {
            Some(i) if i > 0 => Ok(i as i32),
            _ => err!(NoSuchFunction, name: name.to_string()),
        }
    }

    /// Offset of a named global.
    pub fn global_ofs(&self, name: &str) -> Option<usize> {
        self.progs.find_global(name).map(|d| d.ofs as usize)
    }

    /// Statement currently executing, the `CALLn` while a builtin runs.
    pub fn xstatement(&self) -> i32 {
        self.xstatement
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    fn init_autocvars(&mut self, cvars: &mut Cvars) {
        let mut found = Vec::new();
        let mut vectors = Vec::new();
        for def in self.progs.globaldefs.iter() {
            let name = self.progs.def_name(def);
            let Some(cvar) = name.strip_prefix("autocvar_") else { continue };
            let ty = def.etype();
            if ty == EType::Vector {
                vectors.push(def.ofs as usize);
            }
            found.push(AutoCvar { name: cvar.to_string(), ofs: def.ofs as usize, ty });
        }
        // Vector components carry their own float defs.
        found.retain(|ac| ac.ty != EType::Float
                          || !vectors.iter().any(|&v| (v..v + 3).contains(&ac.ofs)));
        for ac in found.iter() {
            if cvars.exists(&ac.name) {
                cvars.register_auto(&ac.name, "");
                self.sync_autocvar(cvars, &ac.name, ac);
                continue;
            }
            let default = match ac.ty {
                EType::Float => ftoa(self.globals.float(ac.ofs)),
                EType::Vector => {
                    let v = self.globals.vector(ac.ofs);
                    format!("{} {} {}", ftoa(v.x), ftoa(v.y), ftoa(v.z))
                }
                EType::String => lossy(self.strings.get(self.globals.string(ac.ofs))).into_owned(),
                other => {
                    qc_warn!("autocvar_{}: unsupported type {other:?}", ac.name);
                    continue;
                }
            };
            cvars.register_auto(&ac.name, &default);
        }
        debug!("{} VM declares {} autocvars", self.role, found.len());
        self.autocvars = found;
    }

    fn sync_autocvar(&mut self, cvars: &Cvars, name: &str, ac: &AutoCvar) {
        let Some(var) = cvars.get(name) else { return };
        match ac.ty {
            EType::Float => self.globals.set_float(ac.ofs, var.value),
            EType::Vector => self.globals.set_vector(ac.ofs, parse_vector(&var.string)),
            EType::String => {
                let h = self.strings.engine(var.string.as_bytes());
                self.globals.set_int(ac.ofs, h);
            }
            _ => (),
        }
    }

    /// Push the value of cvar `name` into the matching autocvar global, if
    /// this program declares one.
    pub fn update_autocvar(&mut self, cvars: &Cvars, name: &str) -> bool {
        let Some(ac) = self.autocvars.iter().find(|ac| ac.name == name).cloned() else {
            return false;
        };
        self.sync_autocvar(cvars, name, &ac);
        true
    }

    pub fn has_autocvar(&self, name: &str) -> bool {
        self.autocvars.iter().any(|ac| ac.name == name)
    }

    /// Release everything this VM owns: zoned strings, then its files,
    /// searches and buffers in the shared tables, then the tokenizer.
    pub fn shutdown(&mut self, host: &mut Shared) {
        let role = self.role;
        let zoned = self.strings.unzone_all();
        let files = host.files.shutdown(role);
        let searches = host.searches.shutdown(role);
        let bufs = host.bufs.shutdown(role);
        self.tokens.clear();
        self.reset();
        info!("{role} VM shut down ({zoned} zoned strings, {files} files, \
               {searches} searches, {bufs} buffers released)");
    }

    /// Run function `fnum` to completion. Errors carry a QuakeC traceback
    /// and leave the VM at top level.
    pub fn execute(&mut self, host: &mut Shared, fnum: i32) -> Result<()> {
        let f = self.function(fnum)?;
        if f.first_statement < 0 {
            let slot = -(f.first_statement as i64);
            if slot as usize >= MAX_BUILTINS {
                bail!(BadBuiltinNumber { slot });
            }
            self.argc = f.numparms.clamp(0, MAX_PARMS as i32) as usize;
            if let Slot::Unresolved = self.builtins[slot as usize] {
                fixme::bind_slot(self, &host.cvars, slot as usize)?;
            }
            return self.call_builtin(host, slot as usize);
        }
        let res = self.run(host, fnum);
        if let Err(err) = res {
            let tb = self.unwind_traceback(err);
            self.reset();
            return Err(tb.into());
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.stack.clear();
        self.local_stack.clear();
        self.xfunction = 0;
        self.argc = 0;
    }

    fn unwind_traceback(&self, err: Error) -> Traceback {
        let frame = |f: i32, statement: i32| TraceFrame {
            func: self.function_name(f).into_owned(),
            file: usize::try_from(f).map(|i| self.progs.function_file(i).into_owned())
                                    .unwrap_or_default(),
            statement,
        };
        let mut frames = vec![frame(self.xfunction, self.xstatement)];
        for fr in self.stack.iter().rev().filter(|fr| fr.f > 0) {
            frames.push(frame(fr.f, fr.s - 1));
        }
        let err = err.fallback(Meta::Function(self.function_name(self.xfunction).into_owned()))
                     .fallback(Meta::Statement(self.xstatement));
        log::error!("{} VM: {err}", self.role);
        Traceback { frames, err }
    }

    fn call_builtin(&mut self, host: &mut Shared, slot: usize) -> Result<()> {
        let f = match self.builtins.get(slot) {
            Some(Slot::Resolved(f)) => *f,
            Some(Slot::Unresolved) => fixme::pf_fixme,
            None => bail!(BadBuiltinNumber { slot: slot as i64 }),
        };
        trace!("builtin #{slot} ({} args)", self.argc);
        f(&mut Exec { vm: self, host }).map_err(|e| match registry::lookup(slot) {
            Some(b) => e.op(b.name),
            None => e,
        })
    }

    fn enter_function(&mut self, fnum: i32, resume: i32) -> Result<i32> {
        let f = self.function(fnum)?;
        if self.stack.len() >= MAX_STACK_DEPTH {
            bail!(StackOverflow { depth: self.stack.len() });
        }
        let locals = f.locals.max(0) as usize;
        if self.local_stack.len() + locals > LOCALSTACK_SIZE {
            bail!(LocalsOverflow { size: LOCALSTACK_SIZE });
        }
        self.stack.push(Frame { s: resume, f: self.xfunction });
        let start = f.parm_start.max(0) as usize;
        for i in 0..locals {
            self.local_stack.push(self.globals.int(start + i));
        }
        let mut o = start;
        for i in 0..(f.numparms.clamp(0, MAX_PARMS as i32) as usize) {
            for j in 0..f.parm_size[i] as usize {
                self.globals.set_int(o, self.globals.int(parm(i) + j));
                o += 1;
            }
        }
        self.xfunction = fnum;
        Ok(f.first_statement)
    }

    fn leave_function(&mut self) -> Result<i32> {
        let f = self.function(self.xfunction)?;
        let locals = f.locals.max(0) as usize;
        let Some(base) = self.local_stack.len().checked_sub(locals) else {
            bail!(LocalsOverflow { size: self.local_stack.len() });
        };
        let start = f.parm_start.max(0) as usize;
        for (i, v) in self.local_stack.drain(base..).enumerate() {
            self.globals.set_int(start + i, v);
        }
        let fr = self.stack.pop().ok_or_else(|| error!(StackOverflow, depth: 0))?;
        self.xfunction = fr.f;
        Ok(fr.s)
    }

    fn run(&mut self, host: &mut Shared, fnum: i32) -> Result<()> {
        let exit_depth = self.stack.len();
        let mut s = self.enter_function(fnum, -1)?;
        let mut budget = self.runaway_limit;
        loop {
            budget = budget.saturating_sub(1);
            if budget == 0 {
                bail!(RunawayLoop { limit: self.runaway_limit });
            }
            let st = *usize::try_from(s).ok()
                                        .and_then(|i| self.progs.statements.get(i))
                                        .ok_or_else(|| error!(BadStatement, idx: s))?;
            self.xstatement = s;
            let op = Op::from_num(st.op)?;
            let (a, b, c) = (st.a as usize, st.b as usize, st.c as usize);
            if self.trace {
                trace!("{:>6}: {:<10} {a:>5} {b:>5} {c:>5}", s, op);
            }
            s += 1;

            macro_rules! float_op {
                (|$x:ident, $y:ident| $body:expr) => {{
                    let $x = self.globals.float(a);
                    let $y = self.globals.float(b);
                    self.globals.set_float(c, $body);
                }};
            }
            macro_rules! cmp_op {
                ($body:expr) => {{
                    let t: bool = $body;
                    self.globals.set_float(c, if t { 1.0 } else { 0.0 });
                }};
            }
            macro_rules! vec_op {
                (|$x:ident, $y:ident| $body:expr) => {{
                    let $x = self.globals.vector(a);
                    let $y = self.globals.vector(b);
                    self.globals.set_vector(c, $body);
                }};
            }
            macro_rules! str_eq {
                () => {
                    self.strings.get(self.globals.string(a)) == self.strings.get(self.globals.string(b))
                };
            }

            use Op::*;
            match op {
                ADD_F => float_op!(|x, y| x + y),
                SUB_F => float_op!(|x, y| x - y),
                MUL_F => float_op!(|x, y| x * y),
                DIV_F => float_op!(|x, y| x / y),
                ADD_V => vec_op!(|x, y| x + y),
                SUB_V => vec_op!(|x, y| x - y),
                MUL_V => {
                    let d = self.globals.vector(a).dot(self.globals.vector(b));
                    self.globals.set_float(c, d);
                }
                MUL_FV => {
                    let v = self.globals.float(a) * self.globals.vector(b);
                    self.globals.set_vector(c, v);
                }
                MUL_VF => {
                    let v = self.globals.vector(a) * self.globals.float(b);
                    self.globals.set_vector(c, v);
                }
                BITAND => float_op!(|x, y| ((x as i32) & (y as i32)) as f32),
                BITOR => float_op!(|x, y| ((x as i32) | (y as i32)) as f32),

                GE => cmp_op!(self.globals.float(a) >= self.globals.float(b)),
                LE => cmp_op!(self.globals.float(a) <= self.globals.float(b)),
                GT => cmp_op!(self.globals.float(a) > self.globals.float(b)),
                LT => cmp_op!(self.globals.float(a) < self.globals.float(b)),
                AND => cmp_op!(self.globals.float(a) != 0.0 && self.globals.float(b) != 0.0),
                OR => cmp_op!(self.globals.float(a) != 0.0 || self.globals.float(b) != 0.0),

                NOT_F => cmp_op!(self.globals.float(a) == 0.0),
                NOT_V => cmp_op!(self.globals.vector(a) == Vec3::ZERO),
                NOT_S => cmp_op!(self.globals.string(a) == 0
                               || self.strings.get(self.globals.string(a)).is_empty()),
                NOT_ENT | NOT_FNC => cmp_op!(self.globals.int(a) == 0),

                EQ_F => cmp_op!(self.globals.float(a) == self.globals.float(b)),
                EQ_V => cmp_op!(self.globals.vector(a) == self.globals.vector(b)),
                EQ_S => cmp_op!(str_eq!()),
                EQ_E | EQ_FNC => cmp_op!(self.globals.int(a) == self.globals.int(b)),
                NE_F => cmp_op!(self.globals.float(a) != self.globals.float(b)),
                NE_V => cmp_op!(self.globals.vector(a) != self.globals.vector(b)),
                NE_S => cmp_op!(!str_eq!()),
                NE_E | NE_FNC => cmp_op!(self.globals.int(a) != self.globals.int(b)),

                STORE_F | STORE_S | STORE_ENT | STORE_FLD | STORE_FNC => {
                    self.globals.copy(b, a, 1);
                }
                STORE_V => self.globals.copy(b, a, 3),

                STOREP_F | STOREP_S | STOREP_ENT | STOREP_FLD | STOREP_FNC => {
                    let ptr = self.globals.int(b) as u32 as usize;
                    self.edicts.write(ptr, self.globals.int(a))?;
                }
                STOREP_V => {
                    let ptr = self.globals.int(b) as u32 as usize;
                    for i in 0..3 {
                        self.edicts.write(ptr + i, self.globals.int(a + i))?;
                    }
                }

                ADDRESS => {
                    let (ent, field) = (self.globals.edict(a), self.globals.int(b));
                    if ent == 0 && self.world_locked {
                        bail!(AssignmentToWorld);
                    }
                    let ptr = self.edicts.pointer(ent, field)?;
                    self.globals.set_int(c, ptr as i32);
                }

                LOAD_F | LOAD_S | LOAD_ENT | LOAD_FLD | LOAD_FNC => {
                    let v = self.edicts.field(self.globals.edict(a), self.globals.int(b))?;
                    self.globals.set_int(c, v);
                }
                LOAD_V => {
                    let ptr = self.edicts.pointer(self.globals.edict(a), self.globals.int(b))?;
                    for i in 0..3 {
                        let v = self.edicts.read(ptr + i)?;
                        self.globals.set_int(c + i, v);
                    }
                }

                IFNOT => if self.globals.int(a) == 0 {
                    s += st.b as i16 as i32 - 1;
                },
                IF => if self.globals.int(a) != 0 {
                    s += st.b as i16 as i32 - 1;
                },
                GOTO => s += st.a as i16 as i32 - 1,

                CALL0 | CALL1 | CALL2 | CALL3 | CALL4 | CALL5 | CALL6 | CALL7 | CALL8 => {
                    self.argc = (st.op - CALL0 as u16) as usize;
                    let fnum = self.globals.function(a);
                    let f = self.function(fnum)?;
                    if f.first_statement < 0 {
                        let slot = -(f.first_statement as i64);
                        if slot as usize >= MAX_BUILTINS {
                            bail!(BadBuiltinNumber { slot });
                        }
                        self.call_builtin(host, slot as usize)?;
                    } else {
                        s = self.enter_function(fnum, s)?;
                    }
                }

                DONE | RETURN => {
                    if op == RETURN {
                        self.globals.copy(OFS_RETURN, a, 3);
                    }
                    s = self.leave_function()?;
                    if self.stack.len() == exit_depth {
                        return Ok(());
                    }
                }

                STATE => {
                    let ent = self.globals.edict(GLOBAL_SELF);
                    let StateFields { nextthink: Some(nt), frame: Some(fr), think: Some(th) } =
                        self.state_fields else {
                            bail!(NoSuchField { name: "nextthink/frame/think" })
                        };
                    let time = self.globals.float(GLOBAL_TIME);
                    self.edicts.set_field(ent, nt, (time + 0.1).to_bits() as i32)?;
                    self.edicts.set_field(ent, fr, self.globals.int(a))?;
                    self.edicts.set_field(ent, th, self.globals.int(b))?;
                }
            }
        }
    }
}

/// Builtin invocation context: the running VM plus the process-wide state.
pub struct Exec<'a> {
    pub vm: &'a mut QcVm,
    pub host: &'a mut Shared,
}

impl Exec<'_> {
    pub fn role(&self) -> VmRole {
        self.vm.role
    }

    pub fn argc(&self) -> usize {
        self.vm.argc
    }

    pub fn float(&self, n: usize) -> f32 {
        self.vm.globals.float(parm(n))
    }

    pub fn int(&self, n: usize) -> i32 {
        self.vm.globals.int(parm(n))
    }

    pub fn vector(&self, n: usize) -> Vec3 {
        self.vm.globals.vector(parm(n))
    }

    pub fn string_handle(&self, n: usize) -> i32 {
        self.vm.globals.string(parm(n))
    }

    pub fn string(&self, n: usize) -> Vec<u8> {
        self.vm.strings.get(self.string_handle(n)).to_vec()
    }

    pub fn edict(&self, n: usize) -> i32 {
        self.vm.globals.edict(parm(n))
    }

    pub fn function(&self, n: usize) -> i32 {
        self.vm.globals.function(parm(n))
    }

    /// Arguments `n..argc` concatenated.
    pub fn strings_from(&self, n: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for i in n..self.argc() {
            out.extend_from_slice(self.vm.strings.get(self.string_handle(i)));
        }
        out
    }

    pub fn ret_float(&mut self, v: f32) {
        self.vm.globals.set_float(OFS_RETURN, v);
    }

    pub fn ret_int(&mut self, v: i32) {
        self.vm.globals.set_int(OFS_RETURN, v);
    }

    pub fn ret_vector(&mut self, v: Vec3) {
        self.vm.globals.set_vector(OFS_RETURN, v);
    }

    pub fn ret_string(&mut self, h: i32) {
        self.vm.globals.set_int(OFS_RETURN, h);
    }

    pub fn ret_edict(&mut self, num: i32) {
        self.vm.globals.set_int(OFS_RETURN, num);
    }

    /// Return a copy of `s` in a temp string.
    pub fn ret_tstring(&mut self, s: &[u8]) {
        let h = self.vm.strings.temp(s);
        self.ret_string(h);
    }

    pub fn ret_null(&mut self) {
        self.ret_string(0);
    }

    pub fn print(&mut self, s: &[u8]) -> Result<()> {
        self.host.stdout.write_all(s)?;
        self.host.stdout.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::host::Host;
    use crate::qcasm::ProgsBuilder;
    use crate::regs::OFS_RETURN;

    fn run(b: ProgsBuilder, name: &str) -> (Host, Result<()>) {
        let mut host = Host::in_memory();
        host.load(VmRole::Server, b.build().unwrap()).unwrap();
        let res = host.execute(VmRole::Server, name);
        (host, res)
    }

    #[test]
    fn arithmetic_and_return() {
        let mut b = ProgsBuilder::new();
        let two = b.float(2.0);
        let three = b.float(3.0);
        b.begin("main", &[]);
        let t = b.local(EType::Float);
        b.op(Op::MUL_F, two, three, t);
        b.op(Op::ADD_F, t, two, t);
        b.op(Op::RETURN, t, 0, 0);
        b.end();
        let (host, res) = run(b, "main");
        res.unwrap();
        assert_eq!(host.vm(VmRole::Server).unwrap().globals.float(OFS_RETURN), 8.0);
    }

    #[test]
    fn calls_copy_parameters_and_restore_locals() {
        let mut b = ProgsBuilder::new();
        let (sq, parms) = b.begin("square", &[EType::Float]);
        let x = parms[0];
        let r = b.local(EType::Float);
        b.op(Op::MUL_F, x, x, r);
        b.op(Op::RETURN, r, 0, 0);
        b.end();
        let sq_ref = b.func_ref(sq);
        let five = b.float(5.0);
        let out = b.global_float("out", 0.0);
        b.begin("main", &[]);
        b.call(sq_ref, &[(five, EType::Float)]);
        b.op(Op::STORE_F, OFS_RETURN as u16, out, 0);
        b.op(Op::DONE, 0, 0, 0);
        b.end();
        let (host, res) = run(b, "main");
        res.unwrap();
        let vm = host.vm(VmRole::Server).unwrap();
        assert_eq!(vm.globals.float(out as usize), 25.0);
        assert_eq!(vm.globals.float(x as usize), 0.0);
        assert_eq!(vm.depth(), 0);
    }

    #[test]
    fn loops_and_branches() {
        let mut b = ProgsBuilder::new();
        let one = b.float(1.0);
        let ten = b.float(10.0);
        let n = b.global_float("n", 0.0);
        b.begin("count", &[]);
        let c = b.local(EType::Float);
        let top = b.label("top");
        let out = b.label("out");
        b.mark(top);
        b.op(Op::LT, n, ten, c);
        b.branch(Op::IFNOT, c, out);
        b.op(Op::ADD_F, n, one, n);
        b.goto(top);
        b.mark(out);
        b.op(Op::DONE, 0, 0, 0);
        b.end();
        let (host, res) = run(b, "count");
        res.unwrap();
        assert_eq!(host.vm(VmRole::Server).unwrap().globals.float(n as usize), 10.0);
    }

    #[test]
    fn runaway_loops_are_stopped() {
        let mut b = ProgsBuilder::new();
        b.begin("spin", &[]);
        let top = b.label("top");
        b.mark(top);
        b.goto(top);
        b.end();
        let mut host = Host::in_memory();
        host.set_cvar("pr_runaway", "1000");
        host.load(VmRole::Server, b.build().unwrap()).unwrap();
        let err = host.execute(VmRole::Server, "spin").unwrap_err();
        assert_eq!(err.cause().kind(), &ErrorKind::RunawayLoop { limit: 1000 });
        assert_eq!(err.trace_functions(), vec!["spin"]);
        assert_eq!(host.vm(VmRole::Server).unwrap().depth(), 0);
    }

    #[test]
    fn null_function_call_has_traceback() {
        let mut b = ProgsBuilder::new();
        let null = b.func_ref(0);
        b.begin("inner", &[]);
        b.op(Op::CALL0, null, 0, 0);
        b.op(Op::DONE, 0, 0, 0);
        let inner = b.end();
        let inner_ref = b.func_ref(inner);
        b.begin("outer", &[]);
        b.op(Op::CALL0, inner_ref, 0, 0);
        b.op(Op::DONE, 0, 0, 0);
        b.end();
        let (_host, res) = run(b, "outer");
        let err = res.unwrap_err();
        assert_eq!(err.cause().kind(), &ErrorKind::NullFunction);
        assert_eq!(err.trace_functions(), vec!["inner", "outer"]);
    }

    #[test]
    fn builtin_errors_name_the_builtin() {
        let mut b = ProgsBuilder::new();
        let error = b.builtin("error", 10);
        let error_ref = b.func_ref(error);
        let msg = b.str("boom");
        b.begin("die", &[]);
        b.call(error_ref, &[(msg, EType::String)]);
        b.op(Op::DONE, 0, 0, 0);
        b.end();
        let (_host, res) = run(b, "die");
        let err = res.unwrap_err();
        assert_eq!(err.cause().kind(), &ErrorKind::ProgramError { msg: "boom".into() });
        let text = err.cause().to_string();
        assert!(text.starts_with("Program Error: boom (in error) [die:"), "{text}");
    }

    #[test]
    fn string_comparison_is_by_content() {
        let mut b = ProgsBuilder::new();
        let x = b.str("abc");
        let empty = b.str("");
        let eq = b.global_float("eq", 0.0);
        let not = b.global_float("not", 0.0);
        b.begin("main", &[]);
        let y = b.local(EType::String);
        b.op(Op::STORE_S, x, y, 0);
        b.op(Op::EQ_S, x, y, eq);
        b.op(Op::NOT_S, empty, 0, not);
        b.op(Op::DONE, 0, 0, 0);
        b.end();
        let (host, res) = run(b, "main");
        res.unwrap();
        let vm = host.vm(VmRole::Server).unwrap();
        assert_eq!(vm.globals.float(eq as usize), 1.0);
        assert_eq!(vm.globals.float(not as usize), 1.0);
    }

    #[test]
    fn entity_fields() {
        let mut b = ProgsBuilder::new();
        let health = b.field("health", EType::Float);
        let hp = b.float(75.0);
        let got = b.global_float("got", 0.0);
        let spawn = b.builtin("spawn", 14);
        let spawn_ref = b.func_ref(spawn);
        b.begin("main", &[]);
        let e = b.local(EType::Entity);
        let p = b.local(EType::Pointer);
        b.op(Op::CALL0, spawn_ref, 0, 0);
        b.op(Op::STORE_ENT, OFS_RETURN as u16, e, 0);
        b.op(Op::ADDRESS, e, health, p);
        b.op(Op::STOREP_F, hp, p, 0);
        b.op(Op::LOAD_F, e, health, got);
        b.op(Op::DONE, 0, 0, 0);
        b.end();
        let (host, res) = run(b, "main");
        res.unwrap();
        assert_eq!(host.vm(VmRole::Server).unwrap().globals.float(got as usize), 75.0);
    }

    #[test]
    fn world_is_write_protected_when_locked() {
        let mut b = ProgsBuilder::new();
        let health = b.field("health", EType::Float);
        let world = b.global_entity("w");
        b.begin("main", &[]);
        let p = b.local(EType::Pointer);
        b.op(Op::ADDRESS, world, health, p);
        b.op(Op::DONE, 0, 0, 0);
        b.end();
        let mut host = Host::in_memory();
        host.load(VmRole::Server, b.build().unwrap()).unwrap();
        host.vm_mut(VmRole::Server).unwrap().world_locked = true;
        let err = host.execute(VmRole::Server, "main").unwrap_err();
        assert_eq!(err.cause().kind(), &ErrorKind::AssignmentToWorld);
    }

    #[test]
    fn state_sets_think() {
        let mut b = ProgsBuilder::new();
        let nextthink = b.field("nextthink", EType::Float);
        let frame = b.field("frame", EType::Float);
        let think = b.field("think", EType::Function);
        let frame_no = b.float(4.0);
        let f_nt = b.global_float("nt", 0.0);
        let f_fr = b.global_float("fr", 0.0);
        let f_th = b.global_function("th", 0);
        let spawn = b.builtin("spawn", 14);
        let spawn_ref = b.func_ref(spawn);
        let (walk, _) = b.begin("walk", &[]);
        b.op(Op::DONE, 0, 0, 0);
        b.end();
        let walk_ref = b.func_ref(walk);
        b.begin("main", &[]);
        b.op(Op::CALL0, spawn_ref, 0, 0);
        b.op(Op::STORE_ENT, OFS_RETURN as u16, GLOBAL_SELF as u16, 0);
        b.op(Op::STATE, frame_no, walk_ref, 0);
        b.op(Op::LOAD_F, GLOBAL_SELF as u16, nextthink, f_nt);
        b.op(Op::LOAD_F, GLOBAL_SELF as u16, frame, f_fr);
        b.op(Op::LOAD_FNC, GLOBAL_SELF as u16, think, f_th);
        b.op(Op::DONE, 0, 0, 0);
        b.end();
        let mut host = Host::in_memory();
        host.load(VmRole::Server, b.build().unwrap()).unwrap();
        host.vm_mut(VmRole::Server).unwrap().globals.set_float(GLOBAL_TIME, 1.0);
        host.execute(VmRole::Server, "main").unwrap();
        let vm = host.vm(VmRole::Server).unwrap();
        assert_eq!(vm.globals.float(f_nt as usize), 1.1);
        assert_eq!(vm.globals.float(f_fr as usize), 4.0);
        assert_eq!(vm.globals.function(f_th as usize), walk);
    }

    #[test]
    fn recursion_overflows() {
        let mut b = ProgsBuilder::new();
        let fnum = 1 + 0;
        let self_ref = b.func_ref(fnum);
        let (f, _) = b.begin("forever", &[]);
        assert_eq!(f, fnum);
        b.op(Op::CALL0, self_ref, 0, 0);
        b.op(Op::DONE, 0, 0, 0);
        b.end();
        let (_host, res) = run(b, "forever");
        assert!(matches!(res.unwrap_err().cause().kind(), ErrorKind::StackOverflow { .. }));
    }

    #[test]
    fn unknown_function() {
        let (_host, res) = run(ProgsBuilder::new(), "nope");
        assert_eq!(res.unwrap_err().kind(), &ErrorKind::NoSuchFunction { name: "nope".into() });
    }

    #[test]
    fn autocvars_follow_cvars() {
        let mut b = ProgsBuilder::new();
        let grav = b.global_float("autocvar_sv_gravity", 800.0);
        let dir = b.global_vector("autocvar_g_dir", Vec3::new(1.0, 2.0, 3.0));
        let name = b.global_string("autocvar_g_name", "quake");
        let mut host = Host::in_memory();
        host.shared.cvars.register("sv_gravity", "800", 0, "");
        host.set_cvar("sv_gravity", "600");
        host.load(VmRole::Server, b.build().unwrap()).unwrap();
        assert_eq!(host.shared.cvars.string("g_dir"), Some("1 2 3"));
        assert_eq!(host.shared.cvars.string("g_name"), Some("quake"));
        assert!(!host.shared.cvars.exists("g_dir_x"));
        host.set_cvar("g_dir", "4 5 6");
        host.set_cvar("g_name", "arena");
        let vm = host.vm(VmRole::Server).unwrap();
        assert_eq!(vm.globals.float(grav as usize), 600.0);
        assert_eq!(vm.globals.vector(dir as usize), Vec3::new(4.0, 5.0, 6.0));
        assert_eq!(vm.strings.get(vm.globals.string(name as usize)), b"arena");
    }
}
