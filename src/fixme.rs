//! Lazy builtin binding.
//!
//! Every slot above the base set starts out `Unresolved`. The first call
//! through such a slot lands here, finds the builtin by number, installs it
//! for good and forwards the call.

use crate::cvar::Cvars;
use crate::error::Result;
use crate::guard::VmRole;
use crate::qcasm::Op;
use crate::registry::{self, BuiltinFn, Slot};
use crate::vm::{Exec, QcVm, MAX_BUILTINS};

/// Implementation of builtin `slot` for `role`, if there is one.
pub fn resolve(slot: usize, role: VmRole) -> Option<BuiltinFn> {
    registry::lookup(slot).and_then(|b| b.implementation(role))
}

fn bind(vm: &mut QcVm, cvars: &Cvars, slot: usize, qc_name: Option<String>) -> Result<BuiltinFn> {
    let desc = registry::lookup(slot);
    let unimplemented = || error!(UnimplementedBuiltin,
                                  slot,
                                  name: qc_name.clone().or_else(|| desc.map(|b| b.name.to_string())));
    if slot >= vm.num_builtins && !vm.extensions_enabled {
        log::error!("{} VM: builtin #{slot} called with extensions disabled", vm.role());
        return Err(unimplemented());
    }
    let Some(f) = resolve(slot, vm.role()) else {
        log::error!("{} VM: builtin #{slot} is not implemented", vm.role());
        return Err(unimplemented());
    };
    match vm.builtins[slot] {
        Slot::Resolved(prev) => debug_assert_eq!(prev as usize, f as usize, "slot {slot} rebound"),
        Slot::Unresolved => vm.builtins[slot] = Slot::Resolved(f),
    }
    let name = desc.map(|b| b.name).unwrap_or("?");
    let stub = desc.map(|b| b.stub).unwrap_or(false);
    if stub || cvars.value("pr_checkextension") == 2.0 {
        qc_warn!("{} VM: binding builtin #{slot} ({name}){}",
                 vm.role(), if stub { ", which is only partially implemented" } else { "" });
    } else {
        debug!("{} VM: binding builtin #{slot} ({name})", vm.role());
    }
    Ok(f)
}

/// Bind `slot` without a call in progress.
pub fn bind_slot(vm: &mut QcVm, cvars: &Cvars, slot: usize) -> Result<BuiltinFn> {
    bind(vm, cvars, slot, None)
}

/// Bind the slot named by the `CALLn` statement currently executing.
pub fn resolve_pending(vm: &mut QcVm, cvars: &Cvars) -> Result<BuiltinFn> {
    let s = vm.xstatement();
    let st = usize::try_from(s).ok()
                               .and_then(|i| vm.progs.statements.get(i))
                               .copied()
                               .ok_or_else(|| error!(BadStatement, idx: s))?;
    if !(Op::CALL0 as u16..=Op::CALL8 as u16).contains(&st.op) {
        bail!(BadStatement { idx: s });
    }
    let fnum = vm.globals.function(st.a as usize);
    let f = vm.function(fnum)?;
    let slot = -(f.first_statement as i64);
    if slot <= 0 || slot as usize >= MAX_BUILTINS {
        bail!(BadBuiltinNumber { slot });
    }
    let qc_name = vm.function_name(fnum).into_owned();
    bind(vm, cvars, slot as usize, Some(qc_name))
}

/// Default handler of every unresolved slot.
pub fn pf_fixme(e: &mut Exec<'_>) -> Result<()> {
    let f = resolve_pending(e.vm, &e.host.cvars)?;
    f(e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::host::Host;
    use crate::logging::warning_count;
    use crate::progs::EType;
    use crate::qcasm::ProgsBuilder;
    use crate::regs::OFS_RETURN;

    /// `main` calls builtin `name` bound as `number` on "hello" and stores
    /// the result in `out`.
    fn caller(name: &str, number: i32) -> (ProgsBuilder, u16) {
        let mut b = ProgsBuilder::new();
        let f = b.builtin(name, number);
        let fref = b.func_ref(f);
        let arg = b.str("hello");
        let out = b.global_float("out", 0.0);
        b.begin("main", &[]);
        b.call(fref, &[(arg, EType::String)]);
        b.op(Op::STORE_F, OFS_RETURN as u16, out, 0);
        b.op(Op::DONE, 0, 0, 0);
        b.end();
        (b, out)
    }

    #[test]
    fn pure_resolution() {
        assert!(resolve(114, VmRole::Server).is_some());
        assert!(resolve(3, VmRole::Server).is_none());
        assert!(resolve(2, VmRole::Client).is_none());
        let sw = registry::find("stringwidth").unwrap().number;
        assert!(resolve(sw, VmRole::Server).is_none());
        assert!(resolve(sw, VmRole::Client).is_some());
    }

    #[test]
    fn binds_once_and_stays() {
        let (b, out) = caller("strlen", 0);
        let mut host = Host::in_memory();
        host.load(VmRole::Server, b.build().unwrap()).unwrap();
        assert!(matches!(host.vm(VmRole::Server).unwrap().builtins[114], Slot::Unresolved));
        host.execute(VmRole::Server, "main").unwrap();
        let vm = host.vm(VmRole::Server).unwrap();
        assert_eq!(vm.globals.float(out as usize), 5.0);
        let Slot::Resolved(first) = vm.builtins[114] else { panic!("not bound") };
        host.execute(VmRole::Server, "main").unwrap();
        let Slot::Resolved(again) = host.vm(VmRole::Server).unwrap().builtins[114] else {
            panic!("unbound")
        };
        assert_eq!(first as usize, again as usize);
    }

    #[test]
    fn unknown_slot_names_the_function() {
        let (b, _) = caller("frobnicate", 900);
        let mut host = Host::in_memory();
        host.load(VmRole::Server, b.build().unwrap()).unwrap();
        let err = host.execute(VmRole::Server, "main").unwrap_err();
        assert_eq!(err.cause().kind(),
                   &ErrorKind::UnimplementedBuiltin { slot: 900, name: Some("frobnicate".into()) });
        assert!(err.is_fatal());
        assert!(matches!(host.vm(VmRole::Server).unwrap().builtins[900], Slot::Unresolved));
    }

    #[test]
    fn wrong_role_is_unimplemented() {
        let (b, _) = caller("stringwidth", 0);
        let mut host = Host::in_memory();
        host.load(VmRole::Server, b.build().unwrap()).unwrap();
        let err = host.execute(VmRole::Server, "main").unwrap_err();
        assert!(matches!(err.cause().kind(), ErrorKind::UnimplementedBuiltin { .. }));
    }

    #[test]
    fn extensions_disabled_on_server() {
        let (b, _) = caller("strlen", 114);
        let progs = b.build().unwrap();
        let mut host = Host::in_memory();
        host.set_cvar("pr_checkextension", "0");
        host.load(VmRole::Server, progs.clone()).unwrap();
        let err = host.execute(VmRole::Server, "main").unwrap_err();
        assert_eq!(err.cause().kind(),
                   &ErrorKind::UnimplementedBuiltin { slot: 114, name: Some("strlen".into()) });
        host.load(VmRole::Client, progs).unwrap();
        host.execute(VmRole::Client, "main").unwrap();
    }

    #[test]
    fn warn_mode_reports_bindings() {
        let (b, _) = caller("strlen", 114);
        let mut host = Host::in_memory();
        host.set_cvar("pr_checkextension", "2");
        host.load(VmRole::Server, b.build().unwrap()).unwrap();
        let before = warning_count();
        host.execute(VmRole::Server, "main").unwrap();
        assert_eq!(warning_count(), before + 1);
        host.execute(VmRole::Server, "main").unwrap();
        assert_eq!(warning_count(), before + 1);
    }

    #[test]
    fn top_level_builtin_execution() {
        let mut b = ProgsBuilder::new();
        b.builtin("buf_create", 0);
        let mut host = Host::in_memory();
        host.load(VmRole::Client, b.build().unwrap()).unwrap();
        host.execute(VmRole::Client, "buf_create").unwrap();
        let vm = host.vm(VmRole::Client).unwrap();
        assert_eq!(vm.globals.float(OFS_RETURN), 1.0);
        assert!(matches!(vm.builtins[460], Slot::Resolved(_)));
    }
}
