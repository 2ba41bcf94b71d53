//! The host: both VM instances and the tables they share.

use crate::cvar::Cvars;
use crate::error::Result;
use crate::ext;
use crate::files::Files;
use crate::fs::Sandbox;
use crate::guard::{VmGuard, VmRole};
use crate::progs::Progs;
use crate::search::Searches;
use crate::strbuf::StrBufs;
use crate::vm::QcVm;
use fnv::FnvHashSet;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fmt::Debug;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Console sink for `print` and friends.
pub trait OutStream: Write + Debug + Send {}
impl<T: Write + Debug + Send> OutStream for T {}

/// Shared in-memory console.
#[derive(Debug, Clone, Default)]
pub struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    pub fn contents(&self) -> String {
        let buf = self.0.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&buf).into_owned()
    }

    pub fn take(&self) -> String {
        let mut buf = self.0.lock().unwrap_or_else(|e| e.into_inner());
        let s = String::from_utf8_lossy(&buf).into_owned();
        buf.clear();
        s
    }
}

impl Write for Capture {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut buf = self.0.lock().unwrap_or_else(|e| e.into_inner());
        buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Process-wide state reached from builtins. Resource tables are shared by
/// both VMs and partitioned by owner.
#[derive(Debug)]
pub struct Shared {
    pub cvars: Cvars,
    pub files: Files,
    pub searches: Searches,
    pub bufs: StrBufs,
    pub sandbox: Sandbox,
    /// Console commands `checkcommand` reports.
    pub commands: FnvHashSet<String>,
    pub stdout: Box<dyn OutStream>,
    pub rng: StdRng,
    /// Text queued by `localcmd`.
    pub cmdbuf: Vec<u8>,
    /// Cvars changed by bytecode since the last sync.
    pub dirty_autocvars: Vec<String>,
    /// Extension names `checkextension` has already logged.
    pub queried_extensions: FnvHashSet<String>,
}

impl Shared {
    pub fn new(sandbox: Sandbox, stdout: Box<dyn OutStream>) -> Shared {
        let mut cvars = Cvars::new();
        ext::register_cvars(&mut cvars);
        Shared {
            cvars,
            files: Files::new(),
            searches: Searches::new(),
            bufs: StrBufs::new(),
            sandbox,
            commands: FnvHashSet::default(),
            stdout,
            rng: StdRng::from_entropy(),
            cmdbuf: Vec::new(),
            dirty_autocvars: Vec::new(),
            queried_extensions: FnvHashSet::default(),
        }
    }
}

#[derive(Debug)]
pub struct Host {
    pub shared: Shared,
    sv: Option<QcVm>,
    cl: Option<QcVm>,
    capture: Option<Capture>,
}

impl Host {
    /// A host printing to stdout with files under `gamedir`.
    pub fn new(gamedir: impl Into<PathBuf>) -> Host {
        Host {
            shared: Shared::new(Sandbox::new(gamedir), Box::new(io::stdout())),
            sv: None,
            cl: None,
            capture: None,
        }
    }

    /// A host whose console output is captured, see [`Host::take_output`].
    pub fn with_capture(gamedir: impl Into<PathBuf>) -> Host {
        let capture = Capture::default();
        Host {
            shared: Shared::new(Sandbox::new(gamedir), Box::new(capture.clone())),
            sv: None,
            cl: None,
            capture: Some(capture),
        }
    }

    /// Captured console and a game directory that does not exist.
    pub fn in_memory() -> Host {
        Host::with_capture("/nonexistent/qcvm")
    }

    fn parts(&mut self, role: VmRole) -> (&mut Option<QcVm>, &mut Shared) {
        match role {
            VmRole::Server => (&mut self.sv, &mut self.shared),
            VmRole::Client => (&mut self.cl, &mut self.shared),
        }
    }

    pub fn vm(&self, role: VmRole) -> Option<&QcVm> {
        match role {
            VmRole::Server => self.sv.as_ref(),
            VmRole::Client => self.cl.as_ref(),
        }
    }

    pub fn vm_mut(&mut self, role: VmRole) -> Option<&mut QcVm> {
        self.parts(role).0.as_mut()
    }

    /// Replace the program of `role`, shutting the previous one down first.
    pub fn load(&mut self, role: VmRole, progs: Progs) -> Result<()> {
        self.unload(role);
        let (slot, shared) = self.parts(role);
        *slot = Some(QcVm::new(role, progs, &mut shared.cvars)?);
        Ok(())
    }

    pub fn load_file(&mut self, role: VmRole, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            log::error!("cannot read {}: {e}", path.display());
            e
        })?;
        let progs = Progs::load(&bytes)?;
        self.load(role, progs)
    }

    /// Shut down and drop the program of `role`. Returns whether one was
    /// loaded.
    pub fn unload(&mut self, role: VmRole) -> bool {
        let (slot, shared) = self.parts(role);
        let Some(mut vm) = slot.take() else {
            return false;
        };
        let _g = VmGuard::force(role);
        vm.shutdown(shared);
        true
    }

    /// Run the QuakeC function `name` in `role`'s VM.
    pub fn execute(&mut self, role: VmRole, name: &str) -> Result<()> {
        let res = (|| {
            let (slot, shared) = self.parts(role);
            let vm = slot.as_mut().ok_or_else(|| error!(NoProgsLoaded, role))?;
            let _g = VmGuard::enter(role)?;
            let fnum = vm.find_function(name)?;
            vm.execute(shared, fnum)
        })();
        self.sync_autocvars();
        res
    }

    /// Push the current values of `names` into every VM's autocvar
    /// globals, each VM switched in while it is written.
    fn push_autocvars(&mut self, names: &[String]) {
        for (role, vm) in [(VmRole::Server, self.sv.as_mut()), (VmRole::Client, self.cl.as_mut())] {
            let Some(vm) = vm else { continue };
            let _g = VmGuard::force(role);
            for name in names {
                vm.update_autocvar(&self.shared.cvars, name);
            }
        }
    }

    /// Cvars changed by bytecode since the last sync.
    fn sync_autocvars(&mut self) {
        let dirty = std::mem::take(&mut self.shared.dirty_autocvars);
        if !dirty.is_empty() {
            self.push_autocvars(&dirty);
        }
    }

    /// Set a cvar from the console side. Returns whether it changed.
    pub fn set_cvar(&mut self, name: &str, value: &str) -> bool {
        if !self.shared.cvars.set(name, value) {
            return false;
        }
        self.push_autocvars(&[name.to_string()]);
        true
    }

    pub fn add_command(&mut self, name: &str) {
        self.shared.commands.insert(name.to_string());
    }

    /// Console text captured since the last call, empty unless the host was
    /// made with a capture.
    pub fn take_output(&mut self) -> String {
        self.capture.as_ref().map(|c| c.take()).unwrap_or_default()
    }

    /// Drain the `localcmd` queue.
    pub fn take_commands(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.shared.cmdbuf)
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        self.unload(VmRole::Client);
        self.unload(VmRole::Server);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::registry::BuiltinFn;
    use crate::qcasm::ProgsBuilder;
    use crate::regs::{parm, MAX_PARMS, OFS_RETURN, PARM_STRIDE};
    use crate::utils::lossy;
    use crate::vm::Exec;
    use glam::Vec3;

    /// One builtin argument.
    #[derive(Debug, Clone)]
    pub enum Arg {
        F(f32),
        I(i32),
        V(Vec3),
        /// Text, stored as an engine string.
        S(Vec<u8>),
        /// Raw string handle.
        Str(i32),
        Ent(i32),
        Func(i32),
        Null,
    }

    impl Arg {
        pub fn s(s: &str) -> Arg {
            Arg::S(s.as_bytes().to_vec())
        }
    }

    /// A lone VM for calling builtins directly.
    pub struct Rig {
        pub vm: QcVm,
        pub shared: Shared,
        out: Capture,
    }

    impl Rig {
        pub fn new(role: VmRole) -> Rig {
            Rig::with_progs(role, ProgsBuilder::new().build().unwrap())
        }

        pub fn with_progs(role: VmRole, progs: Progs) -> Rig {
            crate::logging::setup_logging();
            let out = Capture::default();
            let mut shared = Shared::new(Sandbox::new("/nonexistent/qcvm"), Box::new(out.clone()));
            let vm = QcVm::new(role, progs, &mut shared.cvars).unwrap();
            Rig { vm, shared, out }
        }

        pub fn args(&mut self, args: &[Arg]) -> &mut Self {
            for i in 0..MAX_PARMS * PARM_STRIDE {
                self.vm.globals.set_int(parm(0) + i, 0);
            }
            for (i, arg) in args.iter().enumerate() {
                let ofs = parm(i);
                match arg {
                    Arg::F(v) => self.vm.globals.set_float(ofs, *v),
                    Arg::V(v) => self.vm.globals.set_vector(ofs, *v),
                    Arg::S(s) => {
                        let h = self.vm.strings.engine(s);
                        self.vm.globals.set_int(ofs, h);
                    }
                    Arg::I(v) | Arg::Str(v) | Arg::Ent(v) | Arg::Func(v) => {
                        self.vm.globals.set_int(ofs, *v)
                    }
                    Arg::Null => self.vm.globals.set_int(ofs, 0),
                }
            }
            self.vm.argc = args.len();
            self
        }

        pub fn call(&mut self, f: BuiltinFn) -> Result<()> {
            f(&mut Exec { vm: &mut self.vm, host: &mut self.shared })
        }

        pub fn float(&self) -> f32 {
            self.vm.globals.float(OFS_RETURN)
        }

        pub fn int(&self) -> i32 {
            self.vm.globals.int(OFS_RETURN)
        }

        pub fn vector(&self) -> Vec3 {
            self.vm.globals.vector(OFS_RETURN)
        }

        pub fn edict(&self) -> i32 {
            self.vm.globals.edict(OFS_RETURN)
        }

        pub fn string(&self) -> String {
            lossy(self.vm.strings.get(self.vm.globals.string(OFS_RETURN))).into_owned()
        }

        pub fn output(&self) -> String {
            self.out.contents()
        }
    }
}
