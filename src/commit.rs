//! The commit engine (spec §4.6): startup hooks, validate, decommit sweep,
//! recommit sweep, ack sweep. Grounded in `lsdn_commit` in
//! `netmodel/lsdn.c`, which runs the same five steps in the same order.

use crate::context::Context;
use crate::entities::{Pa, RemotePa, RemoteVirt};
use crate::error::LsdnResult;
use crate::ids::Id;
use crate::problem::ProblemCallback;
use crate::state::ObjectState;

impl Context {
    /// Commit the current topology, reporting problems to `stderr_handler`
    /// via the default callback. See `commit_with` to supply your own.
    pub fn commit(&mut self) -> LsdnResult<()> {
        self.commit_with(&mut |_problem| {})
    }

    pub fn commit_with(&mut self, cb: &mut ProblemCallback<'_>) -> LsdnResult<()> {
        self.guard_not_committing_pub()?;
        self.run_startup_hooks();
        // Validation runs before the decommit sweep, so a rejected topology
        // here has not touched the kernel yet - surface it as `Validate`,
        // not `Commit` (spec §4.6 step 2, §8 S2).
        self.validate(cb)?;

        self.committing = true;
        self.decommit_sweep();
        self.recommit_sweep();
        self.ack_sweep();
        self.committing = false;
        Ok(())
    }

    /// Invoke each settings' startup hook once per local `(phys, net)` pair
    /// using that settings profile (spec §4.6 step 1, §6 user startup hook).
    fn run_startup_hooks(&mut self) {
        for net_id in self.nets.ids() {
            let (settings_id, attachments) = {
                let net = self.nets.get(net_id).unwrap();
                (net.settings, net.attachments.clone())
            };
            let has_hook = self
                .settings
                .get(settings_id)
                .map(|s| s.startup_hook.is_some())
                .unwrap_or(false);
            if !has_hook {
                continue;
            }
            for pa_id in attachments {
                let phys_id = match self.pas.get(pa_id) {
                    Some(pa) if self.physs.get(pa.phys).map(|p| p.is_local).unwrap_or(false) => pa.phys,
                    _ => continue,
                };
                if let Some(mut hook) = self.settings.get_mut(settings_id).and_then(|s| s.startup_hook.take()) {
                    hook(net_id, phys_id, self);
                    if let Some(s) = self.settings.get_mut(settings_id) {
                        s.startup_hook = Some(hook);
                    }
                }
            }
        }
    }

    /// Tear down everything marked `DELETE`/`RENEW`, in reverse dependency
    /// order (virts, then remote mirrors, then pas) so a backend never sees
    /// a dangling reference while decommitting (spec §4.6 step 2).
    fn decommit_sweep(&mut self) {
        for virt_id in self.virts.ids() {
            let needs = self.virts.get_mut(virt_id).unwrap().state.ack_uncommit();
            if !needs {
                continue;
            }
            self.decommit_virt(virt_id);
        }
        for pa_id in self.pas.ids() {
            let needs = self.pas.get_mut(pa_id).unwrap().state.ack_uncommit();
            if !needs {
                continue;
            }
            self.decommit_pa(pa_id);
        }
        let virt_ids: Vec<_> = self
            .virts
            .iter()
            .filter(|(_, v)| v.state == ObjectState::Delete)
            .map(|(id, _)| id)
            .collect();
        for virt_id in virt_ids {
            self.free_committed_virt(virt_id);
        }
        let pa_ids: Vec<_> = self
            .pas
            .iter()
            .filter(|(_, pa)| pa.state == ObjectState::Delete)
            .map(|(id, _)| id)
            .collect();
        for pa_id in pa_ids {
            self.free_committed_pa(pa_id);
        }
    }

    /// Remove every remote-view mirror this virt appears in and, if the virt
    /// was ever materialized on a local pa, ask the backend to tear it down.
    fn decommit_virt(&mut self, virt_id: Id<crate::entities::Virt>) {
        let committed_to = self.virts.get(virt_id).unwrap().committed_to;
        if let Some(pa_id) = committed_to {
            self.with_pa_netops(pa_id, |ops, ctx, _pa| {
                if let Some(virt) = ctx.virts.get(virt_id) {
                    ops.remove_virt(ctx, virt);
                }
            });
        }
        for rpa_id in self.remote_pas.ids() {
            let removed: Vec<_> = {
                let rpa = self.remote_pas.get(rpa_id).unwrap();
                rpa.remote_virts
                    .iter()
                    .copied()
                    .filter(|rv| self.remote_virts.get(*rv).map(|r| r.virt == virt_id).unwrap_or(false))
                    .collect()
            };
            for rv_id in removed {
                self.with_pa_netops(self.remote_pas.get(rpa_id).unwrap().local, |ops, ctx, _pa| {
                    if let Some(rv) = ctx.remote_virts.get(rv_id) {
                        ops.remove_remote_virt(ctx, rv);
                    }
                });
                self.remote_virts.remove(rv_id);
                if let Some(rpa) = self.remote_pas.get_mut(rpa_id) {
                    rpa.remote_virts.retain(|rv| *rv != rv_id);
                }
            }
        }
        let virt = self.virts.get_mut(virt_id).unwrap();
        virt.committed_to = None;
        virt.committed_if.reset();
    }

    /// Destroy a pa's materialization if it was ever locally created, then
    /// drop every remote-pa mirror that references it.
    fn decommit_pa(&mut self, pa_id: Id<Pa>) {
        let was_local_materialized = self
            .physs
            .get(self.pas.get(pa_id).unwrap().phys)
            .map(|p| p.committed_as_local)
            .unwrap_or(false);
        if was_local_materialized {
            self.with_pa_netops(pa_id, |ops, ctx, pa| ops.destroy_pa(ctx, pa));
        }
        let as_local: Vec<_> = self.pas.get(pa_id).unwrap().remote_pa_list.clone();
        for rpa_id in as_local {
            self.with_pa_netops(pa_id, |ops, ctx, _pa| {
                if let Some(rpa) = ctx.remote_pas.get(rpa_id) {
                    ops.remove_remote_pa(ctx, rpa);
                }
            });
            self.remote_pas.remove(rpa_id);
        }
        let as_remote: Vec<_> = self.pas.get(pa_id).unwrap().pa_view_list.clone();
        for rpa_id in as_remote {
            if let Some(rpa) = self.remote_pas.get(rpa_id) {
                let local = rpa.local;
                self.with_pa_netops(local, |ops, ctx, _pa| {
                    if let Some(rpa) = ctx.remote_pas.get(rpa_id) {
                        ops.remove_remote_pa(ctx, rpa);
                    }
                });
            }
            self.remote_pas.remove(rpa_id);
        }
        if let Some(pa) = self.pas.get_mut(pa_id) {
            pa.remote_pa_list.clear();
            pa.pa_view_list.clear();
        }
    }

    fn free_committed_virt(&mut self, virt_id: Id<crate::entities::Virt>) {
        if let Some(virt) = self.virts.get(virt_id) {
            let net = virt.net;
            if let Some(net) = self.nets.get_mut(net) {
                net.virts.retain(|v| *v != virt_id);
                net.virt_names.remove_by_id(virt_id);
            }
        }
        self.virts.remove(virt_id);
    }

    fn free_committed_pa(&mut self, pa_id: Id<Pa>) {
        self.remove_pa_from_parents(pa_id);
        self.pas.remove(pa_id);
    }

    /// Materialize every `NEW`/`RENEW` object: local pas first (so a
    /// backend's `create_pa` has run before anything that depends on it),
    /// then remote-view mirrors, then virts (spec §4.6 step 3).
    fn recommit_sweep(&mut self) {
        for pa_id in self.pas.ids() {
            if !self.pas.get(pa_id).unwrap().state.should_be_validated() {
                continue;
            }
            self.commit_pa(pa_id);
        }
        for virt_id in self.virts.ids() {
            if !self.virts.get(virt_id).unwrap().state.should_be_validated() {
                continue;
            }
            self.commit_virt(virt_id);
        }
    }

    fn commit_pa(&mut self, pa_id: Id<Pa>) {
        let phys_id = self.pas.get(pa_id).unwrap().phys;
        let is_local = self.physs.get(phys_id).unwrap().is_local;
        if is_local {
            self.with_pa_netops(pa_id, |ops, ctx, pa| ops.create_pa(ctx, pa));
            if let Some(phys) = self.physs.get_mut(phys_id) {
                phys.committed_as_local = true;
            }
        }
        let net_id = self.pas.get(pa_id).unwrap().net;
        let peers: Vec<Id<Pa>> = self
            .nets
            .get(net_id)
            .unwrap()
            .attachments
            .iter()
            .copied()
            .filter(|id| *id != pa_id)
            .collect();
        if !is_local {
            return;
        }
        for peer_id in peers {
            if self.remote_pas.iter().any(|(_, rpa)| rpa.local == pa_id && rpa.remote == peer_id) {
                continue;
            }
            let rpa_id = self.remote_pas.insert(RemotePa {
                local: pa_id,
                remote: peer_id,
                remote_virts: Vec::new(),
            });
            self.pas.get_mut(pa_id).unwrap().remote_pa_list.push(rpa_id);
            self.pas.get_mut(peer_id).unwrap().pa_view_list.push(rpa_id);
            self.with_pa_netops(pa_id, |ops, ctx, _pa| {
                if let Some(rpa) = ctx.remote_pas.get(rpa_id) {
                    ops.add_remote_pa(ctx, rpa);
                }
            });
            let peer_virts = self.pas.get(peer_id).unwrap().connected_virts.clone();
            for virt_id in peer_virts {
                self.mirror_remote_virt(rpa_id, virt_id);
            }
        }
    }

    /// Create the remote-view mirror for `virt_id` on `rpa_id`, unless one
    /// already exists. Both `commit_pa` (new pa-pa mirror picking up a peer's
    /// already-connected virts) and `commit_virt` (a newly-connected virt
    /// picking up an already-existing pa-pa mirror) call this for the same
    /// pair when a pa and a virt become committed in the same cycle, so this
    /// has to stay idempotent rather than assume it's only ever called once.
    fn mirror_remote_virt(&mut self, rpa_id: Id<RemotePa>, virt_id: Id<crate::entities::Virt>) {
        if self
            .remote_pas
            .get(rpa_id)
            .map(|rpa| rpa.remote_virts.iter().any(|rv| self.remote_virts.get(*rv).map(|r| r.virt == virt_id).unwrap_or(false)))
            .unwrap_or(false)
        {
            return;
        }
        let rv_id = self.remote_virts.insert(RemoteVirt { pa: rpa_id, virt: virt_id });
        self.remote_pas.get_mut(rpa_id).unwrap().remote_virts.push(rv_id);
        self.virts.get_mut(virt_id).unwrap().virt_view_list.push(rv_id);
        let local_pa = self.remote_pas.get(rpa_id).unwrap().local;
        self.with_pa_netops(local_pa, |ops, ctx, _pa| {
            if let Some(rv) = ctx.remote_virts.get(rv_id) {
                ops.add_remote_virt(ctx, rv);
            }
        });
    }

    fn commit_virt(&mut self, virt_id: Id<crate::entities::Virt>) {
        let Some(pa_id) = self.virts.get(virt_id).unwrap().connected_through else { return };
        let phys_id = self.pas.get(pa_id).unwrap().phys;
        let is_local = self.physs.get(phys_id).unwrap().is_local;
        // `add_virt` only fires for a virt whose own phys is local - a virt
        // on a remote phys is only ever materialized as a remote-view mirror
        // on someone else's pa, below (spec §8 S4).
        if is_local {
            self.with_pa_netops(pa_id, |ops, ctx, _pa| {
                if let Some(virt) = ctx.virts.get(virt_id) {
                    ops.add_virt(ctx, virt);
                }
            });
            let virt = self.virts.get_mut(virt_id).unwrap();
            virt.committed_to = Some(pa_id);
            virt.committed_if = virt.connected_if.clone();
        }

        let net_id = self.pas.get(pa_id).unwrap().net;
        let other_pas: Vec<Id<Pa>> = self
            .nets
            .get(net_id)
            .unwrap()
            .attachments
            .iter()
            .copied()
            .filter(|id| *id != pa_id)
            .collect();
        for other_pa in other_pas {
            let rpa_id = self
                .remote_pas
                .iter()
                .find(|(_, rpa)| rpa.local == other_pa && rpa.remote == pa_id)
                .map(|(id, _)| id);
            if let Some(rpa_id) = rpa_id {
                self.mirror_remote_virt(rpa_id, virt_id);
            }
        }
    }

    /// Settle every `NEW`/`RENEW` object to `OK` (spec §4.6 step 4).
    fn ack_sweep(&mut self) {
        for id in self.settings.ids() {
            self.settings.get_mut(id).unwrap().state.ack();
        }
        for id in self.nets.ids() {
            self.nets.get_mut(id).unwrap().state.ack();
        }
        for id in self.physs.ids() {
            self.physs.get_mut(id).unwrap().state.ack();
        }
        for id in self.pas.ids() {
            self.pas.get_mut(id).unwrap().state.ack();
        }
        for id in self.virts.ids() {
            self.virts.get_mut(id).unwrap().state.ack();
        }
    }

    /// Run a backend callback against `pa`'s settings' net-ops, with `self`
    /// passed through as a live `&Context` (see `netops.rs` for why the
    /// backend has to be taken out of the arena first).
    fn with_pa_netops(&mut self, pa_id: Id<Pa>, f: impl FnOnce(&mut dyn crate::netops::NetOps, &Context, &Pa)) {
        let Some(pa) = self.pas.get(pa_id) else { return };
        let net_id = pa.net;
        let Some(settings_id) = self.nets.get(net_id).map(|n| n.settings) else { return };
        let Some(mut ops) = self.take_netops(settings_id) else { return };
        let pa_snapshot_ok = self.pas.contains(pa_id);
        if pa_snapshot_ok {
            f(&mut *ops, self, self.pas.get(pa_id).unwrap());
        }
        self.restore_netops(settings_id, ops);
    }
}
