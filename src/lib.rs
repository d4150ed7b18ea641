//! A declarative library for describing and committing overlay virtual
//! networks across a set of Linux hosts (spec §1/§2). A `Context` holds the
//! whole topology — settings, nets, physs, virts, and their pairwise
//! attachments — as a graph of arena-indexed handles; `validate`/`commit`
//! walk it and report structural problems or materialize it through a
//! pluggable [`NetOps`] backend.
//!
//! This crate ships the topology model, its invariants, and the commit
//! engine; it does not ship a concrete netlink backend (see
//! [`netops::NetOps`], [`effector::NetlinkEffector`]) or a CLI front-end —
//! those belong in a crate that links against this one.

mod commit;
mod context;
mod effector;
mod entities;
mod error;
mod ids;
mod names;
mod netops;
mod nettypes;
mod problem;
mod state;
mod validate;

pub use context::Context;
pub use effector::{IfIndex, IfResolver, Iface, NetlinkEffector};
pub use entities::{Net, Pa, Phys, RemotePa, RemoteVirt, Settings, StartupHook, Virt};
pub use error::{LsdnError, LsdnResult};
pub use ids::Id;
pub use netops::{NetOps, NullNetOps};
pub use nettypes::{Mac, MacParseError, NetType, NetTypeTag, SwitchType};
pub use problem::{
    stderr_handler, IfName, Problem, ProblemCallback, ProblemCode, ProblemReporter, SubjectNameResolver,
    SubjectRef, IF_NAME_SIZE, MAX_PROBLEM_REFS,
};

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::net::{IpAddr, Ipv4Addr};
    use std::rc::Rc;

    use super::*;

    /// Records every vtable call in order, for asserting commit/decommit
    /// ordering and symmetry (spec §8 scenarios S1-S6).
    #[derive(Default)]
    struct RecordingNetOps {
        log: Rc<RefCell<Vec<String>>>,
    }

    impl RecordingNetOps {
        fn new(log: Rc<RefCell<Vec<String>>>) -> Self {
            RecordingNetOps { log }
        }

        fn record(&self, event: impl Into<String>) {
            self.log.borrow_mut().push(event.into());
        }
    }

    impl NetOps for RecordingNetOps {
        fn create_pa(&mut self, _ctx: &Context, pa: &Pa) {
            self.record(format!("create_pa {:?}", pa.phys));
        }
        fn destroy_pa(&mut self, _ctx: &Context, pa: &Pa) {
            self.record(format!("destroy_pa {:?}", pa.phys));
        }
        fn add_virt(&mut self, _ctx: &Context, virt: &Virt) {
            self.record(format!("add_virt {:?}", virt.net));
        }
        fn remove_virt(&mut self, _ctx: &Context, virt: &Virt) {
            self.record(format!("remove_virt {:?}", virt.net));
        }
        fn add_remote_pa(&mut self, _ctx: &Context, rpa: &RemotePa) {
            self.record(format!("add_remote_pa {:?}->{:?}", rpa.local, rpa.remote));
        }
        fn remove_remote_pa(&mut self, _ctx: &Context, rpa: &RemotePa) {
            self.record(format!("remove_remote_pa {:?}->{:?}", rpa.local, rpa.remote));
        }
        fn add_remote_virt(&mut self, _ctx: &Context, rvirt: &RemoteVirt) {
            self.record(format!("add_remote_virt {:?}", rvirt.virt));
        }
        fn remove_remote_virt(&mut self, _ctx: &Context, rvirt: &RemoteVirt) {
            self.record(format!("remove_remote_virt {:?}", rvirt.virt));
        }
        fn validate_pa(&mut self, _ctx: &Context, pa: &Pa) {
            self.record(format!("validate_pa {:?}", pa.phys));
        }
        fn validate_virt(&mut self, _ctx: &Context, virt: &Virt) {
            self.record(format!("validate_virt {:?}", virt.net));
        }
    }

    /// Resolves any interface name to a fixed nonzero index, so tests that
    /// connect a virt can commit without a real netlink/`if_nametoindex`.
    struct FakeResolver;

    impl IfResolver for FakeResolver {
        fn resolve(&self, _name: &str) -> LsdnResult<IfIndex> {
            Ok(1)
        }
    }

    fn two_local_physs(ctx: &mut Context) -> (Id<Phys>, Id<Phys>) {
        let a = ctx.phys_new(Some("a")).unwrap();
        let b = ctx.phys_new(Some("b")).unwrap();
        ctx.phys_claim_local(a).unwrap();
        ctx.phys_claim_local(b).unwrap();
        ctx.phys_set_iface(a, "eth0").unwrap();
        ctx.phys_set_iface(b, "eth1").unwrap();
        ctx.phys_set_ip(a, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))).unwrap();
        ctx.phys_set_ip(b, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))).unwrap();
        (a, b)
    }

    // --- §8 invariants ---------------------------------------------------

    #[test]
    fn new_object_has_new_state() {
        let mut ctx = Context::new();
        let settings = ctx.settings_new_direct();
        let net = ctx.net_new(settings, 1, Some("n0")).unwrap();
        assert_eq!(ctx.nets.get(net).unwrap().state, crate::state::ObjectState::New);
    }

    #[test]
    fn duplicate_name_in_same_scope_fails() {
        let mut ctx = Context::new();
        ctx.phys_new(Some("dup")).unwrap();
        let err = ctx.phys_new(Some("dup")).unwrap_err();
        assert_eq!(err, LsdnError::Duplicate);
    }

    #[test]
    fn distinct_scopes_allow_same_name() {
        let mut ctx = Context::new();
        let settings = ctx.settings_new_direct();
        let net = ctx.net_new(settings, 1, Some("shared")).unwrap();
        // a phys may reuse a name already used by a net: distinct scopes.
        assert!(ctx.phys_new(Some("shared")).is_ok());
        let _ = net;
    }

    #[test]
    fn noop_attribute_assignment_does_not_dirty() {
        let mut ctx = Context::new();
        let phys = ctx.phys_new(None).unwrap();
        ctx.phys_set_iface(phys, "eth0").unwrap();
        ctx.commit().unwrap();
        // re-setting the same value after commit must not mark it RENEW;
        // if it did, a second commit would re-invoke create_pa needlessly.
        ctx.phys_set_iface(phys, "eth0").unwrap();
        assert_eq!(ctx.physs.get(phys).unwrap().state, crate::state::ObjectState::Ok);
    }

    #[test]
    fn delete_never_propagates_to_children() {
        let mut ctx = Context::new();
        let settings = ctx.settings_new_direct();
        let net = ctx.net_new(settings, 1, None).unwrap();
        let virt = ctx.virt_new(net, None).unwrap();
        ctx.commit().unwrap();
        ctx.net_free(net).unwrap();
        // freeing the net marks it DELETE; the virt must be DELETE too
        // (freed directly by net_free), never inherit DELETE via propagation
        // from an OK state that skipped user intent.
        assert!(ctx.virts.get(virt).is_none() || ctx.virts.get(virt).unwrap().state == crate::state::ObjectState::Delete);
    }

    #[test]
    fn renew_propagates_settings_to_net_to_pa() {
        let mut ctx = Context::new();
        let settings = ctx.settings_new_direct();
        let net = ctx.net_new(settings, 1, None).unwrap();
        let (phys, _) = two_local_physs(&mut ctx);
        ctx.phys_attach(phys, net).unwrap();
        ctx.commit().unwrap();
        ctx.settings.get_mut(settings).unwrap().state.renew();
        ctx.propagate_state();
        let pa = ctx.nets.get(net).unwrap().attachments[0];
        assert_eq!(ctx.pas.get(pa).unwrap().state, crate::state::ObjectState::Renew);
    }

    #[test]
    fn validate_reports_missing_iface() {
        let mut ctx = Context::new();
        let settings = ctx.settings_new_direct();
        let net = ctx.net_new(settings, 1, None).unwrap();
        let phys = ctx.phys_new(None).unwrap();
        ctx.phys_claim_local(phys).unwrap();
        ctx.phys_attach(phys, net).unwrap();
        let mut reports = Vec::new();
        let err = ctx.validate(&mut |p| reports.push(p.code)).unwrap_err();
        assert_eq!(err, LsdnError::Validate);
        assert_eq!(reports, vec![ProblemCode::PhysNoAttr]);
    }

    #[test]
    fn validate_reports_duplicate_mac() {
        let mut ctx = Context::new();
        let settings = ctx.settings_new_direct();
        let net = ctx.net_new(settings, 1, None).unwrap();
        let v1 = ctx.virt_new(net, None).unwrap();
        let v2 = ctx.virt_new(net, None).unwrap();
        let mac = Mac([0, 1, 2, 3, 4, 5]);
        ctx.virt_set_mac(v1, mac).unwrap();
        ctx.virt_set_mac(v2, mac).unwrap();
        let mut reports = Vec::new();
        assert!(ctx.validate(&mut |p| reports.push(p.code)).is_err());
        assert!(reports.contains(&ProblemCode::VirtDupAttr));
    }

    #[test]
    fn validate_reports_duplicate_vnet_id() {
        let mut ctx = Context::new();
        let settings = ctx.settings_new_direct();
        ctx.net_new(settings, 7, Some("a")).unwrap();
        ctx.net_new(settings, 7, Some("b")).unwrap();
        let mut reports = Vec::new();
        assert!(ctx.validate(&mut |p| reports.push(p.code)).is_err());
        assert_eq!(reports, vec![ProblemCode::NetDupId]);
    }

    #[test]
    fn commit_is_rejected_while_already_committing() {
        let mut ctx = Context::new();
        ctx.committing = true;
        assert_eq!(ctx.commit().unwrap_err(), LsdnError::Busy);
    }

    #[test]
    fn free_of_never_committed_object_is_immediate() {
        let mut ctx = Context::new();
        let phys = ctx.phys_new(Some("ephemeral")).unwrap();
        ctx.phys_free(phys).unwrap();
        assert!(ctx.physs.get(phys).is_none());
        // name must be free for reuse immediately too.
        assert!(ctx.phys_new(Some("ephemeral")).is_ok());
    }

    #[test]
    fn free_of_committed_object_is_deferred_to_decommit() {
        let mut ctx = Context::new();
        let settings = ctx.settings_new_direct();
        let net = ctx.net_new(settings, 1, None).unwrap();
        let virt = ctx.virt_new(net, None).unwrap();
        ctx.commit().unwrap();
        ctx.virt_free(virt).unwrap();
        assert_eq!(ctx.virts.get(virt).unwrap().state, crate::state::ObjectState::Delete);
        ctx.commit().unwrap();
        assert!(ctx.virts.get(virt).is_none());
    }

    // --- §8 end-to-end scenarios ------------------------------------------

    #[test]
    fn s1_two_hosts_one_virt_each_materializes_remote_mirrors() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut ctx = Context::new();
        let settings = ctx.settings_new_direct();
        ctx.settings_set_netops(settings, Box::new(RecordingNetOps::new(log.clone()))).unwrap();
        ctx.set_if_resolver(Box::new(FakeResolver));
        let net = ctx.net_new(settings, 100, None).unwrap();
        let (a, b) = two_local_physs(&mut ctx);
        ctx.phys_attach(a, net).unwrap();
        ctx.phys_attach(b, net).unwrap();
        let va = ctx.virt_new(net, None).unwrap();
        let vb = ctx.virt_new(net, None).unwrap();
        ctx.virt_connect(va, a, "va0").unwrap();
        ctx.virt_connect(vb, b, "vb0").unwrap();

        ctx.commit().unwrap();

        let events = log.borrow();
        assert!(events.iter().any(|e| e.starts_with("create_pa")));
        assert!(events.iter().any(|e| e.starts_with("add_remote_pa")));
        assert!(events.iter().any(|e| e.starts_with("add_remote_virt")));
        // both pas mirror each other's virt.
        assert_eq!(events.iter().filter(|e| e.starts_with("add_remote_virt")).count(), 2);
    }

    #[test]
    fn s2_detach_with_connected_virt_fails_validation() {
        let mut ctx = Context::new();
        ctx.set_if_resolver(Box::new(FakeResolver));
        let settings = ctx.settings_new_direct();
        let net = ctx.net_new(settings, 1, None).unwrap();
        let phys = ctx.phys_new(None).unwrap();
        ctx.phys_claim_local(phys).unwrap();
        ctx.phys_set_iface(phys, "eth0").unwrap();
        ctx.phys_attach(phys, net).unwrap();
        let virt = ctx.virt_new(net, None).unwrap();
        ctx.virt_connect(virt, phys, "v0").unwrap();
        ctx.commit().unwrap();

        ctx.phys_detach(phys, net).unwrap();
        let mut reports = Vec::new();
        assert!(ctx.validate(&mut |p| reports.push(p.code)).is_err());
        assert_eq!(reports, vec![ProblemCode::PhysNotAttached]);
    }

    #[test]
    fn s3_renaming_settings_cascades_free_to_nets_on_explicit_free() {
        let mut ctx = Context::new();
        let settings = ctx.settings_new_direct();
        let net = ctx.net_new(settings, 1, Some("will-go")).unwrap();
        ctx.settings_free(settings).unwrap();
        assert!(ctx.nets.get(net).is_none());
        assert!(ctx.net_by_name("will-go").is_none());
    }

    #[test]
    fn s4_decommit_then_recommit_resets_renew_to_new_then_ok() {
        let mut ctx = Context::new();
        let phys = ctx.phys_new(None).unwrap();
        ctx.phys_set_iface(phys, "eth0").unwrap();
        ctx.commit().unwrap();
        ctx.phys_set_iface(phys, "eth1").unwrap();
        assert_eq!(ctx.physs.get(phys).unwrap().state, crate::state::ObjectState::Renew);
        ctx.commit().unwrap();
        assert_eq!(ctx.physs.get(phys).unwrap().state, crate::state::ObjectState::Ok);
    }

    #[test]
    fn s5_vxlan_networks_sharing_port_with_incompatible_switching_is_rejected() {
        let mut ctx = Context::new();
        let s1 = ctx.settings_new_vxlan_e2e(4789);
        let s2 = ctx.settings_new_vxlan_static(4789);
        let net1 = ctx.net_new(s1, 1, None).unwrap();
        let net2 = ctx.net_new(s2, 2, None).unwrap();
        let (phys, _) = two_local_physs(&mut ctx);
        ctx.phys_attach(phys, net1).unwrap();
        ctx.phys_attach(phys, net2).unwrap();
        let mut reports = Vec::new();
        assert!(ctx.validate(&mut |p| reports.push(p.code)).is_err());
        assert!(reports.contains(&ProblemCode::NetBadNetType));
    }

    #[test]
    fn s6_cleanup_tears_down_everything() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut ctx = Context::new();
        let settings = ctx.settings_new_direct();
        ctx.settings_set_netops(settings, Box::new(RecordingNetOps::new(log.clone()))).unwrap();
        ctx.set_if_resolver(Box::new(FakeResolver));
        let net = ctx.net_new(settings, 1, None).unwrap();
        let phys = ctx.phys_new(None).unwrap();
        ctx.phys_claim_local(phys).unwrap();
        ctx.phys_set_iface(phys, "eth0").unwrap();
        ctx.phys_attach(phys, net).unwrap();
        let virt = ctx.virt_new(net, None).unwrap();
        ctx.virt_connect(virt, phys, "v0").unwrap();
        ctx.commit().unwrap();

        ctx.cleanup().unwrap();
        assert!(ctx.nets.is_empty());
        assert!(ctx.physs.is_empty());
        assert!(ctx.virts.is_empty());
        assert!(ctx.pas.is_empty());
        assert!(log.borrow().iter().any(|e| e.starts_with("destroy_pa")));
    }

    #[test]
    fn s4_remote_phys_virt_gets_mirrored_not_add_virt() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut ctx = Context::new();
        let settings = ctx.settings_new_direct();
        ctx.settings_set_netops(settings, Box::new(RecordingNetOps::new(log.clone()))).unwrap();
        ctx.set_if_resolver(Box::new(FakeResolver));
        let net = ctx.net_new(settings, 100, None).unwrap();

        let local = ctx.phys_new(Some("local")).unwrap();
        ctx.phys_claim_local(local).unwrap();
        ctx.phys_set_iface(local, "eth0").unwrap();
        ctx.phys_set_ip(local, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))).unwrap();
        ctx.phys_attach(local, net).unwrap();

        // a peer phys that is never claimed local: attaching and connecting
        // a virt to it must never issue `add_virt` on our own backend, only
        // a remote-view mirror (spec §8 S4).
        let remote = ctx.phys_new(Some("remote")).unwrap();
        ctx.phys_attach(remote, net).unwrap();
        let vr = ctx.virt_new(net, None).unwrap();
        ctx.virt_connect(vr, remote, "vr0").unwrap();

        ctx.commit().unwrap();

        let events = log.borrow();
        assert!(events.iter().any(|e| e.starts_with("create_pa")));
        assert!(events.iter().any(|e| e.starts_with("add_remote_pa")));
        assert!(events.iter().any(|e| e.starts_with("add_remote_virt")));
        assert!(!events.iter().any(|e| e.starts_with("add_virt")));
    }
}
