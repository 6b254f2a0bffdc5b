//! Dependency keys.
//!
//! A [`DepKey`] names one operational object a flow depends on. Keys are
//! small copyable values with a total order over (kind, discriminators),
//! which is what the per-flow key set and the lockstep delta walk rely on.

use crate::db::{AceId, AclId, InterfaceId, NhId, VmId, VnId, VrfId};
use crate::tree::IndexKey;
use std::fmt;
use vswitch_types::{IpAddress, MacAddress};

/// Key of an IPv4/IPv6 unicast route dependency: the subnet a flow's
/// address falls in, within a VRF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InetRouteKey {
    pub vrf_id: VrfId,
    pub ip: IpAddress,
    pub plen: u8,
}

impl InetRouteKey {
    /// Builds a key canonicalized to the subnet address.
    pub fn new(vrf_id: VrfId, ip: IpAddress, plen: u8) -> Self {
        Self {
            vrf_id,
            ip: ip.subnet(plen),
            plen,
        }
    }

    /// Wraps the key in the [`DepKey`] variant matching its address family.
    pub fn dep_key(self) -> DepKey {
        if self.ip.is_ipv4() {
            DepKey::Inet4(self)
        } else {
            DepKey::Inet6(self)
        }
    }
}

impl fmt::Display for InetRouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.vrf_id, self.ip, self.plen)
    }
}

/// Key of a bridge (MAC) route dependency within a VRF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BridgeRouteKey {
    pub vrf_id: VrfId,
    pub mac: MacAddress,
}

impl fmt::Display for BridgeRouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.vrf_id, self.mac)
    }
}

/// A dependency target: one operational object a flow's forwarding
/// decision was derived from.
///
/// The derived ordering (declaration order first, then discriminators) is
/// the total order the per-flow key set is kept in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DepKey {
    Interface(InterfaceId),
    Acl(AclId),
    Ace(AceId),
    Vn(VnId),
    Inet4(InetRouteKey),
    Inet6(InetRouteKey),
    Bridge(BridgeRouteKey),
    Nh(NhId),
    Vrf(VrfId),
    Vm(VmId),
}

impl DepKey {
    /// Whether deletion of the keyed object is acknowledged with a
    /// FREE_DBENTRY response. ACE ids and VMs are bookkeeping-only kinds
    /// with no object of their own to free.
    pub fn emits_free(&self) -> bool {
        !matches!(self, DepKey::Ace(_) | DepKey::Vm(_))
    }

    /// The key kind, for tracing.
    pub fn kind_name(&self) -> &'static str {
        match self {
            DepKey::Interface(_) => "interface",
            DepKey::Acl(_) => "acl",
            DepKey::Ace(_) => "ace",
            DepKey::Vn(_) => "vn",
            DepKey::Inet4(_) => "inet4",
            DepKey::Inet6(_) => "inet6",
            DepKey::Bridge(_) => "bridge",
            DepKey::Nh(_) => "nh",
            DepKey::Vrf(_) => "vrf",
            DepKey::Vm(_) => "vm",
        }
    }
}

impl fmt::Display for DepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DepKey::Interface(id) => write!(f, "interface/{id}"),
            DepKey::Acl(id) => write!(f, "acl/{id}"),
            DepKey::Ace(id) => write!(f, "ace/{id}"),
            DepKey::Vn(id) => write!(f, "vn/{id}"),
            DepKey::Inet4(k) => write!(f, "inet4/{k}"),
            DepKey::Inet6(k) => write!(f, "inet6/{k}"),
            DepKey::Bridge(k) => write!(f, "bridge/{k}"),
            DepKey::Nh(id) => write!(f, "nh/{id}"),
            DepKey::Vrf(id) => write!(f, "vrf/{id}"),
            DepKey::Vm(id) => write!(f, "vm/{id}"),
        }
    }
}

impl IndexKey for InterfaceId {
    fn dep_key(&self) -> DepKey {
        DepKey::Interface(*self)
    }
}

impl IndexKey for AclId {
    fn dep_key(&self) -> DepKey {
        DepKey::Acl(*self)
    }
}

impl IndexKey for AceId {
    fn dep_key(&self) -> DepKey {
        DepKey::Ace(*self)
    }
}

impl IndexKey for VnId {
    fn dep_key(&self) -> DepKey {
        DepKey::Vn(*self)
    }
}

impl IndexKey for NhId {
    fn dep_key(&self) -> DepKey {
        DepKey::Nh(*self)
    }
}

impl IndexKey for VrfId {
    fn dep_key(&self) -> DepKey {
        DepKey::Vrf(*self)
    }
}

impl IndexKey for InetRouteKey {
    fn dep_key(&self) -> DepKey {
        (*self).dep_key()
    }
}

impl IndexKey for BridgeRouteKey {
    fn dep_key(&self) -> DepKey {
        DepKey::Bridge(*self)
    }
}
