//! Network-related value types (spec §3, §9 "Tagged unions").
//!
//! `lsdn_net`'s C union over `{vlan_id, vxlan_mcast{...}}` plus the sibling
//! `lsdn_switch`/`lsdn_nettype` enums become real Rust sum types here instead
//! of a bare union discriminated by a separate tag.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Switching method used within a network (§3 Settings).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwitchType {
    /// A learning switch with a single tunnel shared from the phys.
    Learning,
    /// A learning switch with a tunnel for each connected endpoint.
    LearningE2e,
    /// Static switching with a tunnel for each connected endpoint.
    StaticE2e,
}

/// Tunneling method used to overlay a network over physical topology
/// (§3 Settings: `{DIRECT, VLAN, VXLAN_MCAST(port,mcast_ip), VXLAN_E2E(port),
/// VXLAN_STATIC(port)}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetType {
    Direct,
    Vlan,
    VxlanMcast { port: u16, mcast_ip: IpAddr },
    VxlanE2e { port: u16 },
    VxlanStatic { port: u16 },
}

impl NetType {
    /// Whether two networks of these types, sharing a `vnet_id`, collide
    /// under `NET_DUPID` (§4.4 step 2: compared by `(nettype, vnet_id)`,
    /// where `nettype` here intentionally ignores the VXLAN payload — two
    /// VXLAN networks with different ports/mcast groups but the same VNI
    /// are still the same `(nettype, vnet_id)` pair in the original).
    pub fn nettype_tag(self) -> NetTypeTag {
        match self {
            NetType::Direct => NetTypeTag::Direct,
            NetType::Vlan => NetTypeTag::Vlan,
            NetType::VxlanMcast { .. } | NetType::VxlanE2e { .. } | NetType::VxlanStatic { .. } => {
                NetTypeTag::Vxlan
            }
        }
    }

    pub fn is_vxlan(self) -> bool {
        self.nettype_tag() == NetTypeTag::Vxlan
    }

    /// UDP port used by a VXLAN variant, if any (used by §4.4's
    /// `NET_BAD_NETTYPE` same-port cross-check).
    pub fn vxlan_port(self) -> Option<u16> {
        match self {
            NetType::VxlanMcast { port, .. }
            | NetType::VxlanE2e { port }
            | NetType::VxlanStatic { port } => Some(port),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetTypeTag {
    Direct,
    Vlan,
    Vxlan,
}

/// A MAC address (`lsdn_mac_t`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mac(pub [u8; 6]);

impl fmt::Display for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", a, b, c, d, e, g)
    }
}

/// A MAC address string didn't parse (`lsdn_parse_mac` failure). Distinct
/// from `LsdnError`: parsing an attribute string is not one of the
/// call-site error kinds enumerated in spec §6.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("invalid MAC address")]
pub struct MacParseError;

impl FromStr for Mac {
    type Err = MacParseError;

    fn from_str(s: &str) -> Result<Self, MacParseError> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or(MacParseError)?;
            *byte = u8::from_str_radix(part, 16).map_err(|_| MacParseError)?;
        }
        if parts.next().is_some() {
            return Err(MacParseError);
        }
        Ok(Mac(bytes))
    }
}
