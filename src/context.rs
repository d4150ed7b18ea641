//! `Context`: the arena owner and every graph-mutating operation (spec §4.1,
//! §4.3). Validation (`validate.rs`) and the commit engine (`commit.rs`) are
//! additional `impl Context` blocks in their own files — this file only
//! covers construction, attribute assignment, topology wiring, and the
//! `free()` cascades.

use std::net::IpAddr;

use tracing::{debug, trace};

use crate::effector::{Iface, IfResolver};
use crate::entities::{Net, Pa, Phys, RemotePa, RemoteVirt, Settings, StartupHook, Virt};
use crate::error::{LsdnError, LsdnResult};
use crate::ids::{Arena, Id};
use crate::names::NameScope;
use crate::netops::{NetOps, NullNetOps};
use crate::nettypes::{Mac, NetType, SwitchType};
use crate::problem::{ProblemReporter, SubjectNameResolver};
use crate::state::ObjectState;

/// The whole topology: every arena, every name scope, and the bookkeeping
/// a `validate`/`commit` pass needs (spec §4.1 "owned by one `Context`").
pub struct Context {
    pub(crate) settings: Arena<Settings>,
    pub(crate) nets: Arena<Net>,
    pub(crate) physs: Arena<Phys>,
    pub(crate) pas: Arena<Pa>,
    pub(crate) remote_pas: Arena<RemotePa>,
    pub(crate) virts: Arena<Virt>,
    pub(crate) remote_virts: Arena<RemoteVirt>,

    settings_names: NameScope<Settings>,
    net_names: NameScope<Net>,
    phys_names: NameScope<Phys>,

    pub(crate) problems: ProblemReporter,
    /// Guards against a `validate`/`commit` call re-entering itself from a
    /// startup hook or a net-ops callback (spec §5, `LsdnError::Busy`).
    pub(crate) committing: bool,
    /// Monotonic counter backing `next_ifname` (`lsdn_mk_ifname`'s counter).
    ifcount: u32,
    /// Resolves a connected virt's interface name to an ifindex during
    /// validation (spec §4.4 step 3, `VIRT_NOIF`). `None` until a backend
    /// installs one with `set_if_resolver` — no interface can resolve
    /// without it, the same way the original can't validate `VIRT_NOIF`
    /// without a live `if_nametoindex`.
    pub(crate) if_resolver: Option<Box<dyn IfResolver>>,
}

impl Context {
    pub fn new() -> Self {
        Context {
            settings: Arena::new(),
            nets: Arena::new(),
            physs: Arena::new(),
            pas: Arena::new(),
            remote_pas: Arena::new(),
            virts: Arena::new(),
            remote_virts: Arena::new(),
            settings_names: NameScope::new(),
            net_names: NameScope::new(),
            phys_names: NameScope::new(),
            problems: ProblemReporter::new(),
            committing: false,
            ifcount: 0,
            if_resolver: None,
        }
    }

    /// Install the resolver the validator uses to turn a connected virt's
    /// interface name into an ifindex (spec §4.4 step 3, §6 "injected so the
    /// validator doesn't have to call into the kernel directly").
    pub fn set_if_resolver(&mut self, resolver: Box<dyn IfResolver>) {
        self.if_resolver = Some(resolver);
    }

    /// Mint a unique interface name `"{prefix}{n}"`, for a backend that needs
    /// to create a bridge/tunnel interface without colliding with another one
    /// this `Context` has already named (`lsdn_mk_ifname`).
    pub fn next_ifname(&mut self, prefix: &str) -> String {
        let n = self.ifcount;
        self.ifcount += 1;
        format!("{}{}", prefix, n)
    }

    fn guard_not_committing(&self) -> LsdnResult<()> {
        if self.committing {
            Err(LsdnError::Busy)
        } else {
            Ok(())
        }
    }

    // ---- settings -----------------------------------------------------

    fn settings_new(&mut self, nettype: NetType, switch_type: SwitchType) -> Id<Settings> {
        self.settings.insert(Settings {
            state: ObjectState::New,
            name: None,
            nettype,
            switch_type,
            netops: Some(Box::new(NullNetOps)),
            startup_hook: None,
            nets: Vec::new(),
        })
    }

    pub fn settings_new_direct(&mut self) -> Id<Settings> {
        self.settings_new(NetType::Direct, SwitchType::Learning)
    }

    pub fn settings_new_vlan(&mut self) -> Id<Settings> {
        self.settings_new(NetType::Vlan, SwitchType::Learning)
    }

    pub fn settings_new_vxlan_mcast(&mut self, port: u16, mcast_ip: IpAddr) -> Id<Settings> {
        self.settings_new(NetType::VxlanMcast { port, mcast_ip }, SwitchType::Learning)
    }

    pub fn settings_new_vxlan_e2e(&mut self, port: u16) -> Id<Settings> {
        self.settings_new(NetType::VxlanE2e { port }, SwitchType::LearningE2e)
    }

    pub fn settings_new_vxlan_static(&mut self, port: u16) -> Id<Settings> {
        self.settings_new(NetType::VxlanStatic { port }, SwitchType::StaticE2e)
    }

    pub fn settings_set_name(&mut self, id: Id<Settings>, name: &str) -> LsdnResult<()> {
        if !self.settings.contains(id) {
            return Err(LsdnError::NoMem);
        }
        self.settings_names.remove_by_id(id);
        self.settings_names.set(name, id)?;
        self.settings.get_mut(id).expect("checked above").name = Some(name.to_string());
        Ok(())
    }

    pub fn settings_by_name(&self, name: &str) -> Option<Id<Settings>> {
        self.settings_names.search(name)
    }

    pub fn settings_set_netops(&mut self, id: Id<Settings>, ops: Box<dyn NetOps>) -> LsdnResult<()> {
        let settings = self.settings.get_mut(id).ok_or(LsdnError::NoMem)?;
        settings.netops = Some(ops);
        Ok(())
    }

    pub fn settings_set_startup_hook(&mut self, id: Id<Settings>, hook: StartupHook) -> LsdnResult<()> {
        let settings = self.settings.get_mut(id).ok_or(LsdnError::NoMem)?;
        settings.startup_hook = Some(hook);
        Ok(())
    }

    /// Free a settings profile and every network still using it (spec §3
    /// "Settings lifecycle").
    pub fn settings_free(&mut self, id: Id<Settings>) -> LsdnResult<()> {
        self.guard_not_committing()?;
        let nets = match self.settings.get(id) {
            Some(s) => s.nets.clone(),
            None => return Ok(()),
        };
        for net_id in nets {
            self.net_free(net_id)?;
        }
        self.settings_names.remove_by_id(id);
        self.settings.remove(id);
        Ok(())
    }

    // ---- nets -----------------------------------------------------------

    pub fn net_new(&mut self, settings: Id<Settings>, vnet_id: u32, name: Option<&str>) -> LsdnResult<Id<Net>> {
        self.guard_not_committing()?;
        if !self.settings.contains(settings) {
            return Err(LsdnError::NoMem);
        }
        let id = self.nets.insert(Net {
            state: ObjectState::New,
            name: None,
            settings,
            vnet_id,
            virts: Vec::new(),
            virt_names: NameScope::new(),
            attachments: Vec::new(),
        });
        if let Some(name) = name {
            if let Err(e) = self.net_set_name(id, name) {
                self.nets.remove(id);
                return Err(e);
            }
        }
        self.settings.get_mut(settings).expect("checked above").nets.push(id);
        trace!(?id, ?settings, vnet_id, "net created");
        Ok(id)
    }

    pub fn net_set_name(&mut self, id: Id<Net>, name: &str) -> LsdnResult<()> {
        if !self.nets.contains(id) {
            return Err(LsdnError::NoMem);
        }
        self.net_names.remove_by_id(id);
        self.net_names.set(name, id)?;
        self.nets.get_mut(id).expect("checked above").name = Some(name.to_string());
        Ok(())
    }

    pub fn net_by_name(&self, name: &str) -> Option<Id<Net>> {
        self.net_names.search(name)
    }

    pub fn virt_by_name(&self, net: Id<Net>, name: &str) -> Option<Id<Virt>> {
        self.nets.get(net)?.virt_names.search(name)
    }

    /// Free a network: every virt it contains, then every attachment that
    /// only existed to carry those virts.
    pub fn net_free(&mut self, id: Id<Net>) -> LsdnResult<()> {
        self.guard_not_committing()?;
        let (virts, attachments, settings) = match self.nets.get(id) {
            Some(net) => (net.virts.clone(), net.attachments.clone(), net.settings),
            None => return Ok(()),
        };
        for virt_id in virts {
            self.virt_free(virt_id)?;
        }
        for pa_id in attachments {
            if let Some(pa) = self.pas.get_mut(pa_id) {
                pa.explicitly_attached = false;
            }
            self.pa_free_if_unused(pa_id);
        }
        if let Some(settings) = self.settings.get_mut(settings) {
            settings.nets.retain(|n| *n != id);
        }
        self.net_names.remove_by_id(id);
        self.nets.remove(id);
        Ok(())
    }

    // ---- physs ------------------------------------------------------------

    pub fn phys_new(&mut self, name: Option<&str>) -> LsdnResult<Id<Phys>> {
        self.guard_not_committing()?;
        let id = self.physs.insert(Phys {
            state: ObjectState::New,
            name: None,
            attr_iface: None,
            attr_ip: None,
            is_local: false,
            committed_as_local: false,
            attachments: Vec::new(),
        });
        if let Some(name) = name {
            if let Err(e) = self.phys_set_name(id, name) {
                self.physs.remove(id);
                return Err(e);
            }
        }
        Ok(id)
    }

    pub fn phys_set_name(&mut self, id: Id<Phys>, name: &str) -> LsdnResult<()> {
        if !self.physs.contains(id) {
            return Err(LsdnError::NoMem);
        }
        self.phys_names.remove_by_id(id);
        self.phys_names.set(name, id)?;
        self.physs.get_mut(id).expect("checked above").name = Some(name.to_string());
        Ok(())
    }

    pub fn phys_by_name(&self, name: &str) -> Option<Id<Phys>> {
        self.phys_names.search(name)
    }

    /// Set `iface`. A no-op assignment of the same value does not dirty the
    /// phys (spec §4.3, §8 invariant 10).
    pub fn phys_set_iface(&mut self, id: Id<Phys>, iface: &str) -> LsdnResult<()> {
        let phys = self.physs.get_mut(id).ok_or(LsdnError::NoMem)?;
        if phys.attr_iface.as_deref() == Some(iface) {
            return Ok(());
        }
        phys.attr_iface = Some(iface.to_string());
        phys.state.renew();
        Ok(())
    }

    pub fn phys_clear_iface(&mut self, id: Id<Phys>) -> LsdnResult<()> {
        let phys = self.physs.get_mut(id).ok_or(LsdnError::NoMem)?;
        if phys.attr_iface.take().is_some() {
            phys.state.renew();
        }
        Ok(())
    }

    pub fn phys_set_ip(&mut self, id: Id<Phys>, ip: IpAddr) -> LsdnResult<()> {
        let phys = self.physs.get_mut(id).ok_or(LsdnError::NoMem)?;
        if phys.attr_ip == Some(ip) {
            return Ok(());
        }
        phys.attr_ip = Some(ip);
        phys.state.renew();
        Ok(())
    }

    pub fn phys_clear_ip(&mut self, id: Id<Phys>) -> LsdnResult<()> {
        let phys = self.physs.get_mut(id).ok_or(LsdnError::NoMem)?;
        if phys.attr_ip.take().is_some() {
            phys.state.renew();
        }
        Ok(())
    }

    pub fn phys_claim_local(&mut self, id: Id<Phys>) -> LsdnResult<()> {
        let phys = self.physs.get_mut(id).ok_or(LsdnError::NoMem)?;
        if !phys.is_local {
            phys.is_local = true;
            phys.state.renew();
        }
        Ok(())
    }

    pub fn phys_unclaim_local(&mut self, id: Id<Phys>) -> LsdnResult<()> {
        let phys = self.physs.get_mut(id).ok_or(LsdnError::NoMem)?;
        if phys.is_local {
            phys.is_local = false;
            phys.state.renew();
        }
        Ok(())
    }

    /// Explicitly attach `phys` to `net` (spec §3 `pa.explicitly_attached`).
    /// Idempotent: attaching twice is a no-op, matching invariant 10.
    pub fn phys_attach(&mut self, phys: Id<Phys>, net: Id<Net>) -> LsdnResult<Id<Pa>> {
        self.guard_not_committing()?;
        if !self.physs.contains(phys) || !self.nets.contains(net) {
            return Err(LsdnError::NoMem);
        }
        self.find_or_create_attachment(phys, net, true)
    }

    pub fn phys_detach(&mut self, phys: Id<Phys>, net: Id<Net>) -> LsdnResult<()> {
        self.guard_not_committing()?;
        let pa_id = match self.find_attachment(phys, net) {
            Some(id) => id,
            None => return Ok(()),
        };
        if let Some(pa) = self.pas.get_mut(pa_id) {
            if !pa.explicitly_attached {
                return Ok(());
            }
            pa.explicitly_attached = false;
            pa.state.renew();
        }
        self.pa_free_if_unused(pa_id);
        Ok(())
    }

    /// Free a phys: disconnect every virt still routed through it, drop its
    /// attachments, then remove it.
    pub fn phys_free(&mut self, id: Id<Phys>) -> LsdnResult<()> {
        self.guard_not_committing()?;
        let attachments = match self.physs.get(id) {
            Some(phys) => phys.attachments.clone(),
            None => return Ok(()),
        };
        for pa_id in attachments {
            let connected = self.pas.get(pa_id).map(|pa| pa.connected_virts.clone()).unwrap_or_default();
            for virt_id in connected {
                self.virt_disconnect(virt_id)?;
            }
            if let Some(pa) = self.pas.get_mut(pa_id) {
                pa.explicitly_attached = false;
            }
            self.pa_free_if_unused(pa_id);
        }
        self.phys_names.remove_by_id(id);
        self.physs.remove(id);
        Ok(())
    }

    // ---- pa (phys x net attachment) ---------------------------------------

    fn find_attachment(&self, phys: Id<Phys>, net: Id<Net>) -> Option<Id<Pa>> {
        self.physs.get(phys)?.attachments.iter().copied().find(|id| {
            self.pas.get(*id).map(|pa| pa.net == net).unwrap_or(false)
        })
    }

    fn find_or_create_attachment(&mut self, phys: Id<Phys>, net: Id<Net>, explicit: bool) -> LsdnResult<Id<Pa>> {
        if let Some(id) = self.find_attachment(phys, net) {
            if explicit {
                let pa = self.pas.get_mut(id).expect("just found");
                if !pa.explicitly_attached {
                    pa.explicitly_attached = true;
                    pa.state.renew();
                }
            }
            return Ok(id);
        }
        let id = self.pas.insert(Pa {
            state: ObjectState::New,
            phys,
            net,
            explicitly_attached: explicit,
            connected_virts: Vec::new(),
            remote_pa_list: Vec::new(),
            pa_view_list: Vec::new(),
            bridge_if: None,
            tunnel_if: None,
        });
        self.physs.get_mut(phys).expect("checked by caller").attachments.push(id);
        self.nets.get_mut(net).expect("checked by caller").attachments.push(id);
        Ok(id)
    }

    /// Remove a `pa` immediately if it is `NEW` (never committed) and has no
    /// reason left to exist (spec §3: not explicitly attached, no virts);
    /// otherwise mark it `DELETE` for the next decommit sweep to pick up.
    fn pa_free_if_unused(&mut self, pa_id: Id<Pa>) {
        let still_needed = match self.pas.get(pa_id) {
            Some(pa) => pa.explicitly_attached || !pa.connected_virts.is_empty(),
            None => return,
        };
        if still_needed {
            return;
        }
        let was_new = self.pas.get(pa_id).map(|pa| pa.state == ObjectState::New).unwrap_or(false);
        if was_new {
            self.remove_pa_from_parents(pa_id);
            self.pas.remove(pa_id);
        } else if let Some(pa) = self.pas.get_mut(pa_id) {
            pa.state.mark_for_free();
        }
    }

    pub(crate) fn remove_pa_from_parents(&mut self, pa_id: Id<Pa>) {
        if let Some(pa) = self.pas.get(pa_id) {
            let (phys, net) = (pa.phys, pa.net);
            if let Some(phys) = self.physs.get_mut(phys) {
                phys.attachments.retain(|id| *id != pa_id);
            }
            if let Some(net) = self.nets.get_mut(net) {
                net.attachments.retain(|id| *id != pa_id);
            }
        }
    }

    // ---- virts --------------------------------------------------------

    pub fn virt_new(&mut self, net: Id<Net>, name: Option<&str>) -> LsdnResult<Id<Virt>> {
        self.guard_not_committing()?;
        if !self.nets.contains(net) {
            return Err(LsdnError::NoMem);
        }
        let id = self.virts.insert(Virt {
            state: ObjectState::New,
            name: None,
            net,
            attr_mac: None,
            connected_through: None,
            connected_if: Iface::new(),
            committed_to: None,
            committed_if: Iface::new(),
            virt_view_list: Vec::new(),
        });
        if let Some(name) = name {
            let net_mut = self.nets.get_mut(net).expect("checked above");
            if let Err(e) = net_mut.virt_names.set(name, id) {
                self.virts.remove(id);
                return Err(e);
            }
            self.virts.get_mut(id).expect("just inserted").name = Some(name.to_string());
        }
        self.nets.get_mut(net).expect("checked above").virts.push(id);
        Ok(id)
    }

    pub fn virt_set_name(&mut self, id: Id<Virt>, name: &str) -> LsdnResult<()> {
        let net = self.virts.get(id).ok_or(LsdnError::NoMem)?.net;
        let scope = &mut self.nets.get_mut(net).expect("virt outlives its net").virt_names;
        scope.remove_by_id(id);
        scope.set(name, id)?;
        self.virts.get_mut(id).expect("checked above").name = Some(name.to_string());
        Ok(())
    }

    pub fn virt_set_mac(&mut self, id: Id<Virt>, mac: Mac) -> LsdnResult<()> {
        let virt = self.virts.get_mut(id).ok_or(LsdnError::NoMem)?;
        if virt.attr_mac == Some(mac) {
            return Ok(());
        }
        virt.attr_mac = Some(mac);
        virt.state.renew();
        Ok(())
    }

    pub fn virt_clear_mac(&mut self, id: Id<Virt>) -> LsdnResult<()> {
        let virt = self.virts.get_mut(id).ok_or(LsdnError::NoMem)?;
        if virt.attr_mac.take().is_some() {
            virt.state.renew();
        }
        Ok(())
    }

    /// Route `virt` through `(phys, if_name)`. Implicitly attaches `phys` to
    /// the virt's network if it isn't already (spec §3 `pa`: "exists either
    /// because a user attached it, or because a virt needs it").
    pub fn virt_connect(&mut self, virt: Id<Virt>, phys: Id<Phys>, if_name: &str) -> LsdnResult<()> {
        self.guard_not_committing()?;
        let net = self.virts.get(virt).ok_or(LsdnError::NoMem)?.net;
        if !self.physs.contains(phys) {
            return Err(LsdnError::NoMem);
        }
        self.virt_disconnect(virt)?;
        let pa_id = self.find_or_create_attachment(phys, net, false)?;
        self.pas.get_mut(pa_id).expect("just created").connected_virts.push(virt);
        let virt_mut = self.virts.get_mut(virt).expect("checked above");
        virt_mut.connected_through = Some(pa_id);
        virt_mut.connected_if = Iface::with_name(if_name);
        virt_mut.state.renew();
        debug!(?virt, ?phys, if_name, "virt connected");
        Ok(())
    }

    pub fn virt_disconnect(&mut self, id: Id<Virt>) -> LsdnResult<()> {
        self.guard_not_committing()?;
        let pa_id = match self.virts.get(id) {
            Some(virt) => virt.connected_through,
            None => return Ok(()),
        };
        let Some(pa_id) = pa_id else { return Ok(()) };
        if let Some(pa) = self.pas.get_mut(pa_id) {
            pa.connected_virts.retain(|v| *v != id);
        }
        let virt = self.virts.get_mut(id).expect("checked above");
        virt.connected_through = None;
        virt.connected_if.reset();
        virt.state.renew();
        self.pa_free_if_unused(pa_id);
        Ok(())
    }

    pub fn virt_free(&mut self, id: Id<Virt>) -> LsdnResult<()> {
        self.guard_not_committing()?;
        let net = match self.virts.get(id) {
            Some(virt) => virt.net,
            None => return Ok(()),
        };
        self.virt_disconnect(id)?;
        let was_new = self.virts.get(id).map(|v| v.state == ObjectState::New).unwrap_or(false);
        if let Some(net) = self.nets.get_mut(net) {
            net.virt_names.remove_by_id(id);
        }
        if was_new {
            if let Some(net) = self.nets.get_mut(net) {
                net.virts.retain(|v| *v != id);
            }
            self.virts.remove(id);
        } else if let Some(virt) = self.virts.get_mut(id) {
            virt.state.mark_for_free();
        }
        Ok(())
    }

    /// Tear down the entire topology: mark every object `DELETE` and run a
    /// decommit-only commit (spec §6 "full cleanup"). Leaves the `Context`
    /// empty and ready to reuse or drop.
    pub fn cleanup(&mut self) -> LsdnResult<()> {
        let net_ids = self.nets.ids();
        for net in net_ids {
            self.net_free(net)?;
        }
        let settings_ids = self.settings.ids();
        for settings in settings_ids {
            self.settings_names.remove_by_id(settings);
            self.settings.remove(settings);
        }
        let phys_ids = self.physs.ids();
        for phys in phys_ids {
            self.phys_free(phys)?;
        }
        self.commit()
    }

    /// Explicit, fallible counterpart to `Drop`: runs a final decommit and
    /// consumes the context. `Drop` alone cannot report the `LsdnResult` this
    /// returns, so callers that care about a clean teardown should call this
    /// instead of just letting the `Context` go out of scope.
    pub fn free(mut self) -> LsdnResult<()> {
        self.cleanup()
    }

    /// Temporarily remove a settings profile's backend so it can be called
    /// with a live `&Context`/`&mut Context` in hand, without the aliasing
    /// conflict of a `&mut dyn NetOps` borrowed out of `self` at the same
    /// time as `self` itself (see `netops.rs`). Callers must pair this with
    /// `restore_netops` before returning.
    pub(crate) fn take_netops(&mut self, settings: Id<Settings>) -> Option<Box<dyn NetOps>> {
        self.settings.get_mut(settings)?.netops.take()
    }

    pub(crate) fn restore_netops(&mut self, settings: Id<Settings>, ops: Box<dyn NetOps>) {
        if let Some(s) = self.settings.get_mut(settings) {
            s.netops = Some(ops);
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if !self.pas.is_empty() || !self.virts.is_empty() {
            tracing::warn!("Context dropped with live pas/virts still materialized; call Context::free() first to decommit them");
        }
    }
}

impl SubjectNameResolver for Context {
    fn net_name(&self, id: Id<Net>) -> Option<&str> {
        self.nets.get(id)?.name.as_deref()
    }

    fn virt_name(&self, id: Id<Virt>) -> Option<&str> {
        self.virts.get(id)?.name.as_deref()
    }

    fn phys_name(&self, id: Id<Phys>) -> Option<&str> {
        self.physs.get(id)?.name.as_deref()
    }
}
