//! Operational (DB) objects observed from the control plane.
//!
//! The flow dependency manager never owns these objects: the DB client
//! does. Requests carry a shared reference for the duration of processing;
//! index entries keep only weak back-references whose validity is checked
//! when responses are dispatched.

use std::fmt;
use std::sync::{Arc, Weak};
use vswitch_types::{IpPrefix, MacAddress};

/// Generation tag carried on DELETE notifications and echoed on FREE so
/// the DB client can reject stale frees.
pub type GenId = u32;

macro_rules! object_id {
    ($(#[$doc:meta])* $name:ident($ty:ty)) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub $ty);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<$ty> for $name {
            fn from(id: $ty) -> Self {
                $name(id)
            }
        }
    };
}

object_id!(
    /// Identity of an interface object.
    InterfaceId(u32)
);
object_id!(
    /// Identity of a virtual network.
    VnId(u32)
);
object_id!(
    /// Identity of an access-control list.
    AclId(u32)
);
object_id!(
    /// Identity of an ACL entry (ACE) within an ACL.
    AceId(u32)
);
object_id!(
    /// Identity of a next-hop.
    NhId(u32)
);
object_id!(
    /// Identity of a VRF (forwarding table domain).
    VrfId(u32)
);
object_id!(
    /// Identity of a virtual machine.
    VmId(u32)
);

/// An interface known to the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub id: InterfaceId,
    pub name: String,
}

/// A virtual network known to the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VnInfo {
    pub id: VnId,
    pub name: String,
}

/// An access-control list known to the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclInfo {
    pub id: AclId,
    pub name: String,
}

/// A single ACL entry (ACE) known to the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AceInfo {
    pub id: AceId,
}

/// A next-hop known to the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NhInfo {
    pub id: NhId,
}

/// An IPv4/IPv6 unicast route within a VRF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InetRouteInfo {
    pub vrf_id: VrfId,
    pub prefix: IpPrefix,
}

/// A bridge (MAC) route within a VRF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeRouteInfo {
    pub vrf_id: VrfId,
    pub mac: MacAddress,
}

/// A VRF known to the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VrfInfo {
    pub id: VrfId,
    pub name: String,
}

/// The closed set of control-plane object kinds the manager tracks
/// dependencies on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbObject {
    Interface(InterfaceInfo),
    VirtualNetwork(VnInfo),
    Acl(AclInfo),
    Ace(AceInfo),
    NextHop(NhInfo),
    InetRoute(InetRouteInfo),
    BridgeRoute(BridgeRouteInfo),
    Vrf(VrfInfo),
}

impl DbObject {
    pub fn interface(id: u32, name: impl Into<String>) -> DbEntryRef {
        Arc::new(DbObject::Interface(InterfaceInfo {
            id: InterfaceId(id),
            name: name.into(),
        }))
    }

    pub fn virtual_network(id: u32, name: impl Into<String>) -> DbEntryRef {
        Arc::new(DbObject::VirtualNetwork(VnInfo {
            id: VnId(id),
            name: name.into(),
        }))
    }

    pub fn acl(id: u32, name: impl Into<String>) -> DbEntryRef {
        Arc::new(DbObject::Acl(AclInfo {
            id: AclId(id),
            name: name.into(),
        }))
    }

    pub fn ace(id: u32) -> DbEntryRef {
        Arc::new(DbObject::Ace(AceInfo { id: AceId(id) }))
    }

    pub fn next_hop(id: u32) -> DbEntryRef {
        Arc::new(DbObject::NextHop(NhInfo { id: NhId(id) }))
    }

    pub fn inet_route(vrf_id: VrfId, prefix: IpPrefix) -> DbEntryRef {
        Arc::new(DbObject::InetRoute(InetRouteInfo { vrf_id, prefix }))
    }

    pub fn bridge_route(vrf_id: VrfId, mac: MacAddress) -> DbEntryRef {
        Arc::new(DbObject::BridgeRoute(BridgeRouteInfo { vrf_id, mac }))
    }

    pub fn vrf(id: u32, name: impl Into<String>) -> DbEntryRef {
        Arc::new(DbObject::Vrf(VrfInfo {
            id: VrfId(id),
            name: name.into(),
        }))
    }

    /// The object kind, for tracing.
    pub fn kind_name(&self) -> &'static str {
        match self {
            DbObject::Interface(_) => "interface",
            DbObject::VirtualNetwork(_) => "vn",
            DbObject::Acl(_) => "acl",
            DbObject::Ace(_) => "ace",
            DbObject::NextHop(_) => "nh",
            DbObject::InetRoute(_) => "inet-route",
            DbObject::BridgeRoute(_) => "bridge-route",
            DbObject::Vrf(_) => "vrf",
        }
    }
}

impl fmt::Display for DbObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbObject::Interface(i) => write!(f, "interface/{}({})", i.id, i.name),
            DbObject::VirtualNetwork(v) => write!(f, "vn/{}({})", v.id, v.name),
            DbObject::Acl(a) => write!(f, "acl/{}({})", a.id, a.name),
            DbObject::Ace(a) => write!(f, "ace/{}", a.id),
            DbObject::NextHop(n) => write!(f, "nh/{}", n.id),
            DbObject::InetRoute(r) => write!(f, "inet-route/{}:{}", r.vrf_id, r.prefix),
            DbObject::BridgeRoute(b) => write!(f, "bridge-route/{}:{}", b.vrf_id, b.mac),
            DbObject::Vrf(v) => write!(f, "vrf/{}({})", v.id, v.name),
        }
    }
}

/// Shared reference to a DB object, held while a notification is in flight.
pub type DbEntryRef = Arc<DbObject>;

/// Weak back-reference to a DB object, stored in index entries and carried
/// on responses.
pub type WeakDbRef = Weak<DbObject>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let vrf = DbObject::vrf(3, "blue");
        assert_eq!(vrf.to_string(), "vrf/3(blue)");
        assert_eq!(vrf.kind_name(), "vrf");

        let route = DbObject::inet_route(VrfId(3), "10.0.0.0/8".parse().unwrap());
        assert_eq!(route.to_string(), "inet-route/3:10.0.0.0/8");

        let ace = DbObject::ace(12);
        assert_eq!(ace.to_string(), "ace/12");
        assert_eq!(ace.kind_name(), "ace");
    }

    #[test]
    fn test_weak_ref_tracks_owner() {
        let acl = DbObject::acl(1, "ingress-v4");
        let weak: WeakDbRef = Arc::downgrade(&acl);
        assert!(weak.upgrade().is_some());
        drop(acl);
        assert!(weak.upgrade().is_none());
    }
}
