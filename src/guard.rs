//! Active-VM tracking.
//!
//! At most one VM is active on a thread. Activating one while another is
//! active is a host bug and fails with `VmAlreadyActive`.

use crate::error::Result;
use std::cell::Cell;
use std::fmt;

/// Identity of a VM instance, also the owner tag of its resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VmRole {
    Server,
    Client,
}

impl VmRole {
    pub fn name(&self) -> &'static str {
        match self {
            VmRole::Server => "server",
            VmRole::Client => "client",
        }
    }
}

impl fmt::Display for VmRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

thread_local! {
    static ACTIVE: Cell<Option<VmRole>> = const { Cell::new(None) };
}

pub fn active() -> Option<VmRole> {
    ACTIVE.with(|a| a.get())
}

/// Set the active VM. Replacing one active VM with another is fatal, any
/// transition through `None` is allowed.
pub fn switch_vm(new: Option<VmRole>) -> Result<()> {
    ACTIVE.with(|a| {
        if let (Some(active), Some(requested)) = (a.get(), new) {
            log::error!("cannot activate the {requested} VM while the {active} VM is active");
            bail!(VmAlreadyActive { active, requested });
        }
        a.set(new);
        Ok(())
    })
}

/// Scoped activation, the previous value is restored on drop, including
/// during unwinding.
#[must_use]
#[derive(Debug)]
pub struct VmGuard {
    prev: Option<VmRole>,
}

impl VmGuard {
    pub fn enter(role: VmRole) -> Result<VmGuard> {
        let prev = active();
        switch_vm(Some(role))?;
        trace!("enter {role} VM");
        Ok(VmGuard { prev })
    }

    /// Clear whatever is active and activate `role`, for callbacks that must
    /// visit each VM in turn.
    pub fn force(role: VmRole) -> VmGuard {
        let prev = active();
        ACTIVE.with(|a| a.set(Some(role)));
        trace!("force {role} VM (was {prev:?})");
        VmGuard { prev }
    }
}

impl Drop for VmGuard {
    fn drop(&mut self) {
        ACTIVE.with(|a| a.set(self.prev));
    }
}
