//! The object graph's node types (spec §3). Plain data, arena-resident;
//! `Context` in `context.rs` owns every mutation path. Fields are `pub`
//! (readable from a backend crate implementing `NetOps`/`NetlinkEffector`)
//! the same way the original's struct fields are directly accessible to
//! `lsdn_net_ops` implementations, but by convention every *write* goes
//! through a `Context` method so state transitions and name-scope upkeep
//! stay consistent.

use std::net::IpAddr;

use crate::effector::Iface;
use crate::ids::Id;
use crate::names::NameScope;
use crate::netops::NetOps;
use crate::nettypes::{Mac, NetType, SwitchType};
use crate::state::ObjectState;

/// `fn(net, phys, ctx)`, invoked once per local `(phys, net)` pair at the
/// top of `commit` (spec §4.6 step 1, §6 "User startup hook").
pub type StartupHook = Box<dyn FnMut(Id<Net>, Id<Phys>, &mut crate::Context)>;

pub struct Settings {
    pub(crate) state: ObjectState,
    pub name: Option<String>,
    pub nettype: NetType,
    pub switch_type: SwitchType,
    pub(crate) netops: Option<Box<dyn NetOps>>,
    pub(crate) startup_hook: Option<StartupHook>,
    /// Back-reference list of networks using this settings profile — freeing
    /// the settings cascades to each of them (§3 Settings lifecycle).
    pub(crate) nets: Vec<Id<Net>>,
}

pub struct Net {
    pub(crate) state: ObjectState,
    pub name: Option<String>,
    pub settings: Id<Settings>,
    pub vnet_id: u32,
    pub(crate) virts: Vec<Id<Virt>>,
    pub(crate) virt_names: NameScope<Virt>,
    pub(crate) attachments: Vec<Id<Pa>>,
}

pub struct Phys {
    pub(crate) state: ObjectState,
    pub name: Option<String>,
    pub attr_iface: Option<String>,
    pub attr_ip: Option<IpAddr>,
    pub is_local: bool,
    /// Snapshot of `is_local` as of the last successful commit — governs
    /// whether `destroy_pa` runs on decommit (§4.6).
    pub(crate) committed_as_local: bool,
    pub(crate) attachments: Vec<Id<Pa>>,
}

/// The unique join between one `Phys` and one `Net` (spec §3 `pa`).
pub struct Pa {
    pub(crate) state: ObjectState,
    pub phys: Id<Phys>,
    pub net: Id<Net>,
    /// `true` iff the user called `phys_attach`; `false` if this `pa` only
    /// exists because a virt was connected through this `(phys, net)` pair.
    pub explicitly_attached: bool,
    pub(crate) connected_virts: Vec<Id<Virt>>,
    /// `remote_pa`s where this `pa` is the *local* side (`rpa.local == self`).
    pub(crate) remote_pa_list: Vec<Id<RemotePa>>,
    /// `remote_pa`s where this `pa` is the *remote* side (`rpa.remote == self`).
    pub(crate) pa_view_list: Vec<Id<RemotePa>>,
    /// Nettype-specific interface handles a backend may populate
    /// (`lsdn_phys_attachment`'s `bridge_if`/`tunnel_if` union, §3).
    pub bridge_if: Option<Iface>,
    pub tunnel_if: Option<Iface>,
}

/// Derived commit-time mirror letting a local `pa` enumerate a peer `pa` on
/// the same network (spec §3 "Remote-view mirrors").
pub struct RemotePa {
    pub local: Id<Pa>,
    pub remote: Id<Pa>,
    pub(crate) remote_virts: Vec<Id<RemoteVirt>>,
}

pub struct Virt {
    pub(crate) state: ObjectState,
    pub name: Option<String>,
    pub net: Id<Net>,
    pub attr_mac: Option<Mac>,
    pub connected_through: Option<Id<Pa>>,
    pub connected_if: Iface,
    pub(crate) committed_to: Option<Id<Pa>>,
    pub(crate) committed_if: Iface,
    pub(crate) virt_view_list: Vec<Id<RemoteVirt>>,
}

/// Derived commit-time mirror letting a local `pa` enumerate a peer virt on
/// the same network (spec §3 "Remote-view mirrors").
pub struct RemoteVirt {
    pub pa: Id<RemotePa>,
    pub virt: Id<Virt>,
}
