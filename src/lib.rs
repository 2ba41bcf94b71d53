//! # qcvm
//!
//! A QuakeC virtual machine with a lazily linked builtin table.
//!
//! Bytecode names host functions ("builtins") by number. The classic Quake
//! set is bound when a program loads; everything above it is bound on first
//! call, so programs built for other engines load even when they reference
//! builtins this host does not have. Programs can ask what is available with
//! `checkextension`, `builtinsupported` and `checkbuiltin`.
//!
//! ```no_run
//! use qcvm::{Host, VmRole};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut host = Host::new("/srv/quake/id1");
//!     host.load_file(VmRole::Server, "/srv/quake/id1/progs.dat")?;
//!     host.execute(VmRole::Server, "worldspawn")?;
//!     Ok(())
//! }
//! ```

#![allow(clippy::upper_case_acronyms)]

#[macro_use]
extern crate lazy_static;
#[allow(unused_imports)]
#[macro_use]
extern crate log;
#[macro_use]
pub mod error;
#[macro_use]
pub mod utils;
#[macro_use]
pub mod logging;
pub mod stylize;
pub mod regs;
pub mod strings;
pub mod progs;
pub mod qcasm;
pub mod edict;
pub mod guard;
pub mod cvar;
pub mod fs;
pub mod files;
pub mod search;
pub mod strbuf;
pub mod tokenize;
pub mod markup;
pub mod vm;
pub mod registry;
pub mod fixme;
pub mod ext;
pub mod sprintf;
pub mod subrs;
pub mod host;
pub mod platform;

pub use error::{Error, ErrorKind, Result};
pub use guard::{VmGuard, VmRole};
pub use host::{Capture, Host, Shared};
pub use progs::Progs;
pub use qcasm::ProgsBuilder;
pub use vm::{Exec, QcVm};
