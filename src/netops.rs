//! Net-ops vtable contract (spec §4.7) — consumed from per-nettype backends
//! (direct/vlan/vxlan variants), none of which ship in this crate. Mirrors
//! `struct lsdn_net_ops` in `private/net.h`/its `direct_create_pa`/
//! `direct_destroy_pa` implementation in `net_direct.c`.
//!
//! Every method is optional (default no-op) except that `create_pa`/
//! `destroy_pa` must be symmetric if either is provided — that constraint
//! can't be expressed in the trait signature itself, so the commit engine
//! only checks it when both this and the teardown counterpart matter
//! (§4.6 "destroy_pa skipped when nothing was ever created").
//!
//! Entities are passed by shared reference, not `&mut`: the original lets a
//! backend stash private state (bridge/tunnel interface handles) directly
//! inside the `pa`/`virt` union. Rust's aliasing rules make embedding
//! mutable backend state inside a shared graph node awkward (the commit
//! engine would need the entity and the context mutably borrowed at once);
//! the idiomatic equivalent is a backend-owned map keyed by `Id<Pa>`/
//! `Id<Virt>`, which is what a real backend crate would do here.
use crate::{Context, Pa, RemotePa, RemoteVirt, Virt};

pub trait NetOps {
    fn create_pa(&mut self, _ctx: &Context, _pa: &Pa) {}
    fn destroy_pa(&mut self, _ctx: &Context, _pa: &Pa) {}

    fn add_virt(&mut self, _ctx: &Context, _virt: &Virt) {}
    fn remove_virt(&mut self, _ctx: &Context, _virt: &Virt) {}

    fn add_remote_pa(&mut self, _ctx: &Context, _rpa: &RemotePa) {}
    fn remove_remote_pa(&mut self, _ctx: &Context, _rpa: &RemotePa) {}

    fn add_remote_virt(&mut self, _ctx: &Context, _rvirt: &RemoteVirt) {}
    fn remove_remote_virt(&mut self, _ctx: &Context, _rvirt: &RemoteVirt) {}

    fn validate_pa(&mut self, _ctx: &Context, _pa: &Pa) {}
    fn validate_virt(&mut self, _ctx: &Context, _virt: &Virt) {}
}

/// A `NetOps` that does nothing — the default for `Settings` created
/// without a backend wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNetOps;

impl NetOps for NullNetOps {}
