//! External collaborators (spec §6): the netlink effector and the
//! interface-name helper. Both are contracts only — this crate ships no
//! concrete netlink implementation (spec §1 non-goals: "does not itself
//! speak to the kernel"). A backend crate would implement `NetlinkEffector`
//! the way the teacher's `src/netlink.rs` wraps `netavark`'s netlink socket
//! (`bridge_apply`/`veth_apply`), and wire it through `IfResolver` instead
//! of calling `if_nametoindex` directly so tests can fake resolution.

use crate::error::LsdnResult;

/// An ifindex; `0` means unresolved (mirrors `lsdn_if.ifindex`).
pub type IfIndex = u32;

/// `lsdn_if`: an owned interface name plus its resolved index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Iface {
    name: String,
    index: IfIndex,
}

impl Iface {
    pub fn new() -> Self {
        Iface {
            name: String::new(),
            index: 0,
        }
    }

    pub fn with_name(name: impl Into<String>) -> Self {
        Iface {
            name: name.into(),
            index: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.index = 0;
    }

    pub fn index(&self) -> IfIndex {
        self.index
    }

    pub fn is_resolved(&self) -> bool {
        self.index != 0
    }

    pub fn reset(&mut self) {
        self.name.clear();
        self.index = 0;
    }

    /// Resolve `name` to an ifindex using the given resolver, caching the
    /// result (`lsdn_if_resolve`).
    pub fn resolve(&mut self, resolver: &dyn IfResolver) -> LsdnResult<()> {
        self.index = resolver.resolve(&self.name)?;
        Ok(())
    }
}

impl Default for Iface {
    fn default() -> Self {
        Self::new()
    }
}

/// Name -> ifindex resolution, injected so the validator (§4.4 step 3,
/// `VIRT_NOIF`) doesn't have to call into the kernel directly. `Context`
/// holds at most one of these (`Context::set_if_resolver`); `validate`
/// resolves every connected virt's interface through it before checking
/// `is_resolved`, so `VIRT_NOIF` reflects an actual resolution failure
/// rather than "no resolver was ever asked."
pub trait IfResolver {
    fn resolve(&self, name: &str) -> LsdnResult<IfIndex>;
}

/// The netlink/TC effector (spec §6). An opaque handle stored on `Context`;
/// all mutation of kernel state is delegated here so the core stays
/// synchronous, blocking, and kernel-agnostic otherwise (§5).
pub trait NetlinkEffector {
    fn link_bridge_create(&mut self, ifname: &str) -> LsdnResult<Iface>;
    fn link_set(&mut self, ifindex: IfIndex, up: bool) -> LsdnResult<()>;
    fn link_set_master(&mut self, master_ifindex: IfIndex, child_ifindex: IfIndex) -> LsdnResult<()>;
    fn link_delete(&mut self, iface: &Iface) -> LsdnResult<()>;
}
