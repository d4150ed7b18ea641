//! Validation (spec §4.4): a state-propagation pre-pass followed by four
//! groups of structural checks, each reporting through the caller's
//! callback instead of failing fast. Grounded in `lsdn_validate` in
//! `netmodel/lsdn.c`, which walks the same four groups in the same order.

use itertools::Itertools;

use crate::context::Context;
use crate::ids::Id;
use crate::nettypes::SwitchType;
use crate::problem::{ProblemCallback, ProblemCode, SubjectRef};
use crate::state::ObjectState;

impl Context {
    /// Validate the current topology without committing it. Returns
    /// `Err(LsdnError::Validate)` iff at least one problem was reported.
    pub fn validate(&mut self, cb: &mut ProblemCallback<'_>) -> crate::error::LsdnResult<()> {
        self.guard_not_committing_pub()?;
        self.committing = true;
        self.problems.reset();
        self.propagate_state();
        self.validate_nets(cb);
        self.validate_physs(cb);
        self.committing = false;
        if self.problems.count() > 0 {
            Err(crate::error::LsdnError::Validate)
        } else {
            Ok(())
        }
    }

    pub(crate) fn guard_not_committing_pub(&self) -> crate::error::LsdnResult<()> {
        if self.committing {
            Err(crate::error::LsdnError::Busy)
        } else {
            Ok(())
        }
    }

    /// Push every parent's `RENEW` down to its still-`OK` children: settings
    /// -> nets -> (virts, pas) -> remote mirrors (spec §4.5's propagation
    /// rule, applied top-down once per validate/commit cycle).
    pub(crate) fn propagate_state(&mut self) {
        for settings_id in self.settings.ids() {
            let settings_state = self.settings.get(settings_id).unwrap().state;
            let nets = self.settings.get(settings_id).unwrap().nets.clone();
            for net_id in nets {
                if let Some(net) = self.nets.get_mut(net_id) {
                    ObjectState::propagate(settings_state, &mut net.state);
                }
            }
        }
        for net_id in self.nets.ids() {
            let net_state = self.nets.get(net_id).unwrap().state;
            let virts = self.nets.get(net_id).unwrap().virts.clone();
            let attachments = self.nets.get(net_id).unwrap().attachments.clone();
            for virt_id in virts {
                if let Some(virt) = self.virts.get_mut(virt_id) {
                    ObjectState::propagate(net_state, &mut virt.state);
                }
            }
            for pa_id in attachments {
                if let Some(pa) = self.pas.get_mut(pa_id) {
                    ObjectState::propagate(net_state, &mut pa.state);
                }
            }
        }
    }

    /// Per-network checks (spec §4.4 step 2): duplicate `(nettype, vnet_id)`
    /// across networks, incompatible VXLAN switching sharing a port, and
    /// within each network, duplicate virt MACs.
    fn validate_nets(&mut self, cb: &mut ProblemCallback<'_>) {
        let net_ids = self.nets.ids();
        for (a, b) in net_ids.iter().copied().tuple_combinations() {
            let (net_a, net_b) = (self.nets.get(a).unwrap(), self.nets.get(b).unwrap());
            if !net_a.state.should_be_validated() && !net_b.state.should_be_validated() {
                continue;
            }
            let settings_a = self.settings.get(net_a.settings).unwrap();
            let settings_b = self.settings.get(net_b.settings).unwrap();
            if net_a.vnet_id == net_b.vnet_id
                && settings_a.nettype.nettype_tag() == settings_b.nettype.nettype_tag()
            {
                self.problems.report(
                    cb,
                    ProblemCode::NetDupId,
                    &[SubjectRef::Net(a), SubjectRef::Net(b), SubjectRef::VNetId(net_a.vnet_id)],
                );
            }
            let locally_attached = |net: &crate::entities::Net, ctx: &Self| {
                net.attachments.iter().any(|pa| {
                    ctx.pas.get(*pa).map(|pa| ctx.physs.get(pa.phys).map(|p| p.is_local).unwrap_or(false)).unwrap_or(false)
                })
            };
            if settings_a.nettype.is_vxlan()
                && settings_b.nettype.is_vxlan()
                && settings_a.nettype.vxlan_port() == settings_b.nettype.vxlan_port()
                && (settings_a.switch_type == SwitchType::StaticE2e) ^ (settings_b.switch_type == SwitchType::StaticE2e)
                && locally_attached(net_a, self)
                && locally_attached(net_b, self)
            {
                self.problems.report(
                    cb,
                    ProblemCode::NetBadNetType,
                    &[SubjectRef::Net(a), SubjectRef::Net(b)],
                );
            }
        }

        for net_id in net_ids {
            self.validate_virts_in_net(net_id, cb);
        }
    }

    fn validate_virts_in_net(&mut self, net_id: Id<crate::entities::Net>, cb: &mut ProblemCallback<'_>) {
        let virt_ids = self.nets.get(net_id).unwrap().virts.clone();
        for (a, b) in virt_ids.iter().copied().tuple_combinations() {
            let (virt_a, virt_b) = (self.virts.get(a).unwrap(), self.virts.get(b).unwrap());
            if !virt_a.state.should_be_validated() && !virt_b.state.should_be_validated() {
                continue;
            }
            if let (Some(mac_a), Some(mac_b)) = (virt_a.attr_mac, virt_b.attr_mac) {
                if mac_a == mac_b {
                    self.problems.report(
                        cb,
                        ProblemCode::VirtDupAttr,
                        &[
                            SubjectRef::Virt(a),
                            SubjectRef::Virt(b),
                            SubjectRef::Net(net_id),
                            SubjectRef::Attr("mac"),
                        ],
                    );
                }
            }
        }
        for virt_id in virt_ids {
            self.validate_virt(virt_id, cb);
        }
    }

    fn validate_virt(&mut self, virt_id: Id<crate::entities::Virt>, cb: &mut ProblemCallback<'_>) {
        let virt = self.virts.get(virt_id).unwrap();
        let Some(pa_id) = virt.connected_through else { return };
        let pa = self.pas.get(pa_id).unwrap();
        // A virt's validity depends on its connected pa's attachment status
        // too, not just its own attributes - re-check if either changed.
        if !virt.state.should_be_validated() && !pa.state.should_be_validated() {
            return;
        }
        if !pa.explicitly_attached {
            self.problems.report(
                cb,
                ProblemCode::PhysNotAttached,
                &[SubjectRef::Virt(virt_id), SubjectRef::Phys(pa.phys), SubjectRef::Net(pa.net)],
            );
            return;
        }
        if let Some(resolver) = self.if_resolver.as_deref() {
            if let Some(virt) = self.virts.get_mut(virt_id) {
                if !virt.connected_if.is_resolved() {
                    let _ = virt.connected_if.resolve(resolver);
                }
            }
        }
        let virt = self.virts.get(virt_id).unwrap();
        if !virt.connected_if.is_resolved() {
            self.problems.report(
                cb,
                ProblemCode::VirtNoIf,
                &[SubjectRef::Virt(virt_id), SubjectRef::If(crate::problem::IfName::new(virt.connected_if.name()))],
            );
        }
        let settings_id = self.nets.get(pa.net).unwrap().settings;
        if let Some(mut ops) = self.take_netops(settings_id) {
            ops.validate_virt(&*self, self.virts.get(virt_id).unwrap());
            self.restore_netops(settings_id, ops);
        }
    }

    /// Per-phys checks (spec §4.4 step 3): a locally-attached phys must
    /// carry an `iface`; two locally-attached physs must not share `ip`.
    fn validate_physs(&mut self, cb: &mut ProblemCallback<'_>) {
        let phys_ids = self.physs.ids();
        for phys_id in phys_ids.iter().copied() {
            let (attr_iface_set, attachments, eligible) = {
                let phys = self.physs.get(phys_id).unwrap();
                (phys.attr_iface.is_some(), phys.attachments.clone(), phys.is_local && phys.state.should_be_validated())
            };
            if !eligible {
                continue;
            }
            let has_explicit_attachment = attachments
                .iter()
                .any(|pa| self.pas.get(*pa).map(|p| p.explicitly_attached).unwrap_or(false));
            if !has_explicit_attachment {
                continue;
            }
            if !attr_iface_set {
                for pa_id in &attachments {
                    let net = self.pas.get(*pa_id).unwrap().net;
                    self.problems.report(
                        cb,
                        ProblemCode::PhysNoAttr,
                        &[SubjectRef::Phys(phys_id), SubjectRef::Attr("iface"), SubjectRef::Net(net)],
                    );
                }
            }
            for pa_id in attachments {
                let settings_id = {
                    let pa = self.pas.get(pa_id).unwrap();
                    self.nets.get(pa.net).unwrap().settings
                };
                if let Some(mut ops) = self.take_netops(settings_id) {
                    ops.validate_pa(&*self, self.pas.get(pa_id).unwrap());
                    self.restore_netops(settings_id, ops);
                }
            }
        }
        for (a, b) in phys_ids.into_iter().tuple_combinations() {
            let (phys_a, phys_b) = (self.physs.get(a).unwrap(), self.physs.get(b).unwrap());
            if !phys_a.is_local || !phys_b.is_local {
                continue;
            }
            if !phys_a.state.should_be_validated() && !phys_b.state.should_be_validated() {
                continue;
            }
            if let (Some(ip_a), Some(ip_b)) = (phys_a.attr_ip, phys_b.attr_ip) {
                if ip_a == ip_b {
                    self.problems.report(
                        cb,
                        ProblemCode::PhysDupAttr,
                        &[SubjectRef::Phys(a), SubjectRef::Phys(b), SubjectRef::Attr("ip")],
                    );
                }
            }
        }
    }
}
