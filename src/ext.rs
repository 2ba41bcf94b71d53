//! Extension queries: `checkextension`, `builtinsupported` and
//! `checkbuiltin`.

use crate::cvar::Cvars;
use crate::error::Result;
use crate::guard::VmRole;
use crate::registry::{self, Slot};
use crate::utils::lossy;
use crate::vm::{Exec, QcVm, MAX_BUILTINS};

/// Extensions whose builtins are all implemented here.
pub const EXTENSIONS: &[&str] = &[
    "DP_QC_ASINACOSATANATAN2TAN",
    "DP_QC_AUTOCVARS",
    "DP_QC_CRC16",
    "DP_QC_CVAR_DEFSTRING",
    "DP_QC_CVAR_STRING",
    "DP_QC_CVAR_TYPE",
    "DP_QC_ETOS",
    "DP_QC_FS_SEARCH",
    "DP_QC_MINMAXBOUND",
    "DP_QC_SINCOSSQRTPOW",
    "DP_QC_SPRINTF",
    "DP_QC_STRFTIME",
    "DP_QC_STRINGBUFFERS",
    "DP_QC_STRINGCOLORFUNCTIONS",
    "DP_QC_STRING_CASE_FUNCTIONS",
    "DP_QC_STRREPLACE",
    "DP_QC_TOKENIZEBYSEPARATOR",
    "DP_QC_TOKENIZE_CONSOLE",
    "DP_QC_URI_ESCAPE",
    "DP_SV_PRINT",
    "FRIK_FILE",
    "FTE_QC_CHECKCOMMAND",
    "FTE_QC_INTCONV",
    "FTE_STRINGS",
];

fn block_cvar(name: &str) -> String {
    format!("pr_ext_{}", name.to_ascii_lowercase())
}

/// Whether `name` is listed and not switched off with `pr_ext_<name> 0`.
pub fn check_extension(cvars: &Cvars, name: &str) -> bool {
    if !EXTENSIONS.iter().any(|e| e.eq_ignore_ascii_case(name)) {
        return false;
    }
    let block = block_cvar(name);
    if cvars.exists(&block) && cvars.value(&block) == 0.0 {
        info!("{name} is disabled by {block}");
        return false;
    }
    true
}

/// What `checkbuiltin` reports for function `fnum` without binding anything.
pub fn builtin_usable(vm: &QcVm, fnum: i32) -> bool {
    let Ok(f) = vm.function(fnum) else { return false };
    if f.first_statement >= 0 {
        return false;
    }
    let slot = -(f.first_statement as i64) as usize;
    if slot >= MAX_BUILTINS {
        return false;
    }
    let desc = registry::lookup(slot);
    match vm.builtins[slot] {
        Slot::Resolved(_) => !desc.map(|b| b.stub).unwrap_or(false),
        Slot::Unresolved => {
            if slot >= vm.num_builtins && !vm.extensions_enabled {
                return false;
            }
            desc.map(|b| !b.stub && b.implementation(vm.role()).is_some()).unwrap_or(false)
        }
    }
}

/// Register a `pr_ext_<name>` switch for every listed extension.
pub fn register_cvars(cvars: &mut Cvars) {
    for name in EXTENSIONS {
        cvars.register(&block_cvar(name), "1", 0, "0 hides the extension from checkextension");
    }
}

// float(string s) checkextension
pub fn pf_checkextension(e: &mut Exec<'_>) -> Result<()> {
    let name = e.string(0);
    let name = lossy(&name);
    let yes = check_extension(&e.host.cvars, &name);
    if e.host.queried_extensions.insert(name.to_ascii_uppercase()) {
        info!("{} VM: checkextension(\"{name}\") = {yes}", e.role());
    }
    e.ret_float(yes as i32 as f32);
    Ok(())
}

// float(string builtinname) builtinsupported
// Known names report their number whether or not this VM implements them.
pub fn pf_builtinsupported(e: &mut Exec<'_>) -> Result<()> {
    let name = e.string(0);
    let n = registry::find(&lossy(&name))
        .map(|b| b.number as f32)
        .unwrap_or(0.0);
    e.ret_float(n);
    Ok(())
}

// float(__variant funcref) checkbuiltin
pub fn pf_checkbuiltin(e: &mut Exec<'_>) -> Result<()> {
    let fnum = e.function(0);
    let yes = builtin_usable(e.vm, fnum);
    e.ret_float(yes as i32 as f32);
    Ok(())
}

/// Extensions in the list that would be refused for `role` on this host.
pub fn disabled(cvars: &Cvars, role: VmRole) -> Vec<&'static str> {
    if role == VmRole::Server && cvars.value("pr_checkextension") == 0.0 {
        return EXTENSIONS.to_vec();
    }
    EXTENSIONS.iter().copied().filter(|n| !check_extension(cvars, n)).collect()
}
