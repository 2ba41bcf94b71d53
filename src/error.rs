//! Structured Errors

use crate::VmRole;
use std::borrow::Cow;
use std::mem::{discriminant, replace};
use std::error;
use std::fmt;
use std::num::TryFromIntError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum Meta {
    /// Name of the builtin that raised the error
    Builtin(Cow<'static, str>),
    /// QuakeC function executing when the error was raised
    Function(String),
    /// Statement index of the faulting instruction
    Statement(i32),
}

#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct MetaSet {
    meta: Vec<Meta>,
}

macro_rules! get_inner_meta {
    ($name:ident, $meta_name:ident, $inner_t:ty) => {
        #[allow(dead_code)]
        fn $name(&self) -> Option<$inner_t> {
            self.meta.iter().find_map(|m| if let Meta::$meta_name(name) = m {
                Some(name)
            } else {
                None
            }).cloned()
        }
    }
}

impl MetaSet {
    /// Add metadata which should replace previous metadata of the same type.
    ///
    /// # Returns
    /// Returns the previous metadata, if it exists.
    fn amend(&mut self, data: Meta) -> Option<Meta> {
        let pos = self.meta.iter()
                           .position(|m| discriminant(m) == discriminant(&data));
        if let Some(idx) = pos {
            Some(replace(&mut self.meta[idx], data))
        } else {
            self.meta.push(data);
            None
        }
    }

    /// Add metadata which should function as a fallback, but should not replace
    /// metadata of the same kind if it exists.
    fn fallback(&mut self, data: Meta) {
        if !self.meta.iter().any(|m| discriminant(m) == discriminant(&data)) {
            self.meta.push(data);
        }
    }

    get_inner_meta!(builtin, Builtin, Cow<'static, str>);
    get_inner_meta!(function, Function, String);
    get_inner_meta!(statement, Statement, i32);
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct TraceFrame {
    pub func: String,
    pub file: String,
    pub statement: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Traceback {
    pub frames: Vec<TraceFrame>,
    pub err: Error,
}

#[derive(Clone, PartialEq)]
pub enum ErrorKind {
    /// Lazy resolution found no descriptor or no implementation for the role.
    UnimplementedBuiltin { slot: usize, name: Option<String> },
    BadBuiltinNumber { slot: i64 },
    /// A VM was activated while another one was still active.
    VmAlreadyActive { active: VmRole, requested: VmRole },
    NoProgsLoaded { role: VmRole },
    ProgsVersion { expect: i32, got: i32 },
    ProgsTruncated { lump: &'static str },
    ProgsDecode { msg: String },
    BadOpcode { op: u16 },
    BadStatement { idx: i32 },
    NullFunction,
    BadFunction { idx: i32 },
    NoSuchFunction { name: String },
    NoSuchField { name: &'static str },
    BadEdict { num: i32 },
    AssignmentToWorld,
    NoFreeEdicts { max: usize },
    RunawayLoop { limit: u32 },
    StackOverflow { depth: usize },
    LocalsOverflow { size: usize },
    /// Raised by the `error` builtin.
    ProgramError { msg: String },
    LinkError { dst: String, src: usize },
    Traceback { tb: Box<Traceback> },
    IOError { kind: std::io::ErrorKind },
}

impl From<std::io::Error> for Error {
    fn from(v: std::io::Error) -> Self {
        Error::new(ErrorKind::IOError { kind: v.kind() })
    }
}

impl From<ErrorKind> for Error {
    fn from(v: ErrorKind) -> Self {
        Error::new(v)
    }
}

impl From<Traceback> for Error {
    fn from(v: Traceback) -> Self {
        Error::new(ErrorKind::Traceback { tb: Box::new(v) })
    }
}

impl From<bincode::Error> for Error {
    fn from(v: bincode::Error) -> Self {
        Error::new(ErrorKind::ProgsDecode { msg: v.to_string() })
    }
}

/// Structural Error Type
#[derive(Clone)]
pub struct Error {
    inner: ErrorInner
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_error(self, f)
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_error(&Error::new(self.clone()), f)
    }
}

#[derive(Clone)]
struct ErrorInner {
    meta: MetaSet,
    ty: ErrorKind,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Error {
        Error {
            inner: ErrorInner { meta: Default::default(), ty: kind }
        }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.inner.ty
    }

    pub fn meta(&self) -> &MetaSet {
        &self.inner.meta
    }

    /// Terminal conditions abort the running program and return control to
    /// the host. Load-time and I/O errors leave the VM untouched.
    pub fn is_fatal(&self) -> bool {
        use ErrorKind::*;
        !matches!(self.cause().kind(),
                  ProgsVersion { .. } | ProgsTruncated { .. } | ProgsDecode { .. } |
                  NoProgsLoaded { .. } | NoSuchFunction { .. } | IOError { .. } |
                  LinkError { .. })
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.inner.meta == other.inner.meta && self.inner.ty == other.inner.ty
    }
}

fn fmt_error(err: &Error, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    use ErrorKind::*;

    let meta = err.meta();
    match err.kind() {
        UnimplementedBuiltin { slot, name: Some(name) } =>
            write!(f, "Link Error: Builtin #{slot} ({name}) is not implemented")?,
        UnimplementedBuiltin { slot, name: None } =>
            write!(f, "Link Error: Builtin #{slot} is not implemented")?,
        BadBuiltinNumber { slot } =>
            write!(f, "Link Error: Bad builtin call number {slot}")?,
        VmAlreadyActive { active, requested } =>
            write!(f, "VM Switch Error: Cannot activate the {requested} VM, \
                       the {active} VM is already active")?,
        NoProgsLoaded { role } =>
            write!(f, "Error: No progs loaded for the {role} VM")?,
        ProgsVersion { expect, got } =>
            write!(f, "Progs Error: Expected version {expect}, but got {got}")?,
        ProgsTruncated { lump } =>
            write!(f, "Progs Error: The {lump} lump extends past the end of the file")?,
        ProgsDecode { msg } =>
            write!(f, "Progs Error: {msg}")?,
        BadOpcode { op } =>
            write!(f, "Runtime Error: Bad opcode {op}")?,
        BadStatement { idx } =>
            write!(f, "Runtime Error: Statement {idx} is out of range")?,
        NullFunction =>
            write!(f, "Runtime Error: NULL function")?,
        BadFunction { idx } =>
            write!(f, "Runtime Error: Function {idx} is out of range")?,
        NoSuchFunction { name } =>
            write!(f, "Error: No such function `{name}'")?,
        NoSuchField { name } =>
            write!(f, "Progs Error: Required entity field `{name}' was not found")?,
        BadEdict { num } =>
            write!(f, "Runtime Error: Bad entity number {num}")?,
        AssignmentToWorld =>
            write!(f, "Runtime Error: Assignment to world entity")?,
        NoFreeEdicts { max } =>
            write!(f, "Runtime Error: No free edicts (max {max})")?,
        RunawayLoop { limit } =>
            write!(f, "Runtime Error: Runaway loop error, {limit} statements executed")?,
        StackOverflow { depth } =>
            write!(f, "Runtime Error: Stack overflow at depth {depth}")?,
        LocalsOverflow { size } =>
            write!(f, "Runtime Error: Locals stack overflow ({size} slots)")?,
        ProgramError { msg } =>
            write!(f, "Program Error: {msg}")?,
        LinkError { dst, src } =>
            write!(f, "Link Error: Label {dst} referenced by statement {src} was never marked")?,
        ErrorKind::Traceback { tb: _ } => {
            writeln!(f, "Traceback:")?;
            err.write_traceback(f)?;
            return fmt_error(err.cause(), f);
        },
        IOError { kind } => {
            let err: std::io::Error = (*kind).into();
            write!(f, "IOError: {}", err)?;
        }
    }

    if let Some(op) = meta.builtin() {
        write!(f, " (in {op})")?;
    }

    if let Some(func) = meta.function() {
        write!(f, " [{func}")?;
        if let Some(st) = meta.statement() {
            write!(f, ":{st}")?;
        }
        write!(f, "]")?;
    }

    Ok(())
}

impl Error {
    pub fn fallback(mut self, meta: Meta) -> Self {
        self.inner.meta.fallback(meta);
        self
    }

    /// Name the builtin that raised this error.
    pub fn op(mut self, name: &'static str) -> Error {
        self.inner.meta.amend(Meta::Builtin(Cow::Borrowed(name)));
        self
    }

    pub fn cause(&self) -> &Error {
        match self.kind() {
            ErrorKind::Traceback { tb } => {
                tb.err.cause()
            },
            _ => self
        }
    }

    pub fn write_traceback(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let ErrorKind::Traceback { tb } = self.kind() {
            tb.err.write_traceback(f)?;
            for TraceFrame { func, file, statement } in tb.frames.iter() {
                writeln!(f, "  - {func} ({file}:{statement})")?;
            }
        }
        Ok(())
    }

    /// QuakeC function names on the traceback, innermost first.
    pub fn trace_functions(&self) -> Vec<&str> {
        let mut out = Vec::new();
        let mut err = self;
        while let ErrorKind::Traceback { tb } = err.kind() {
            out.extend(tb.frames.iter().map(|fr| fr.func.as_str()));
            err = &tb.err;
        }
        out
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_error(&Error::new(self.clone()), f)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_error(self, f)
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        None
    }
}

impl From<TryFromIntError> for Error {
    fn from(err: TryFromIntError) -> Self {
        Error::new(ErrorKind::ProgsDecode { msg: format!("lump too large: {err}") })
    }
}

macro_rules! err {
    ($kind:ident, $($init:tt)* ) => {
        Err((crate::error::ErrorKind::$kind { $($init)* }).into())
    };
}

macro_rules! bail {
    (($kind:ident $($init:tt)*)$($extra:tt)*) => {
        return Err({
            let err: $crate::error::Error = (crate::error::ErrorKind::$kind  $($init)* ).into();
            err$($extra)*
        })
    };
    ($kind:ident $($init:tt)*) => {
        return Err((crate::error::ErrorKind::$kind  $($init)* ).into())
    };
}

macro_rules! error {
    ($kind:ident, $($init:tt)* ) => {
        crate::error::Error::new(crate::error::ErrorKind::$kind { $($init)* })
    };
}
