//! The manager's view of a flow.
//!
//! Flows are owned by the flow engine; the manager sees an identity plus
//! the match fields that produce dependency keys. The engine may mutate
//! those fields concurrently, so they live behind the flow's mutex and are
//! read atomically during key extraction.

use crate::db::{AceId, AclId, InterfaceId, NhId, VnId, VrfId};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use vswitch_types::{IpAddress, Ipv4Address, MacAddress};

/// Stable identity of a flow, minted by the flow engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FlowId(pub u64);

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One matched ACL within a flow's policy state, with the ACE ids it hit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchAcl {
    pub acl: AclId,
    pub ace_ids: Vec<AceId>,
}

impl MatchAcl {
    pub fn new(acl: AclId) -> Self {
        Self {
            acl,
            ace_ids: Vec::new(),
        }
    }

    pub fn with_aces(mut self, ace_ids: impl IntoIterator<Item = AceId>) -> Self {
        self.ace_ids = ace_ids.into_iter().collect();
        self
    }
}

/// The nine match-ACL lists a flow carries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowMatchData {
    pub policy: Vec<MatchAcl>,
    pub sg: Vec<MatchAcl>,
    pub out_policy: Vec<MatchAcl>,
    pub out_sg: Vec<MatchAcl>,
    pub reverse_sg: Vec<MatchAcl>,
    pub reverse_out_sg: Vec<MatchAcl>,
    pub mirror: Vec<MatchAcl>,
    pub out_mirror: Vec<MatchAcl>,
    pub vrf_assign: Vec<MatchAcl>,
}

impl FlowMatchData {
    /// All nine lists, in their canonical order.
    pub fn lists(&self) -> [&Vec<MatchAcl>; 9] {
        [
            &self.policy,
            &self.sg,
            &self.out_policy,
            &self.out_sg,
            &self.reverse_sg,
            &self.reverse_out_sg,
            &self.mirror,
            &self.out_mirror,
            &self.vrf_assign,
        ]
    }
}

/// The dependency-producing fields of a flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowData {
    pub intf: Option<InterfaceId>,
    pub vn: Option<VnId>,
    pub nh: Option<NhId>,
    pub match_data: FlowMatchData,

    /// True for routed flows; false for bridged (L2) flows.
    pub l3_flow: bool,
    /// Both endpoints local to this host.
    pub local_flow: bool,
    /// Direction of the flow relative to the virtual network.
    pub ingress: bool,

    pub src_addr: IpAddress,
    pub dst_addr: IpAddress,
    pub source_vrf: Option<VrfId>,
    pub dest_vrf: Option<VrfId>,
    pub source_plen: u8,
    pub dest_plen: u8,
    /// Extra (vrf, plen) route dependencies for the source address.
    pub source_plen_map: BTreeMap<VrfId, u8>,
    /// Extra (vrf, plen) route dependencies for the destination address.
    pub dest_plen_map: BTreeMap<VrfId, u8>,

    pub src_mac: MacAddress,
    /// Prefix length used for RPF lookup of bridged flows.
    pub l2_rpf_plen: u8,
}

impl Default for FlowData {
    fn default() -> Self {
        Self {
            intf: None,
            vn: None,
            nh: None,
            match_data: FlowMatchData::default(),
            l3_flow: true,
            local_flow: false,
            ingress: true,
            src_addr: IpAddress::V4(Ipv4Address::UNSPECIFIED),
            dst_addr: IpAddress::V4(Ipv4Address::UNSPECIFIED),
            source_vrf: None,
            dest_vrf: None,
            source_plen: 0,
            dest_plen: 0,
            source_plen_map: BTreeMap::new(),
            dest_plen_map: BTreeMap::new(),
            src_mac: MacAddress::ZERO,
            l2_rpf_plen: 0,
        }
    }
}

impl FlowData {
    pub fn with_interface(mut self, intf: InterfaceId) -> Self {
        self.intf = Some(intf);
        self
    }

    pub fn with_vn(mut self, vn: VnId) -> Self {
        self.vn = Some(vn);
        self
    }

    pub fn with_nh(mut self, nh: NhId) -> Self {
        self.nh = Some(nh);
        self
    }

    pub fn with_acl(mut self, acl: MatchAcl) -> Self {
        self.match_data.policy.push(acl);
        self
    }

    pub fn with_addrs(mut self, src: IpAddress, dst: IpAddress) -> Self {
        self.src_addr = src;
        self.dst_addr = dst;
        self
    }

    pub fn with_source_route(mut self, vrf: VrfId, plen: u8) -> Self {
        self.source_vrf = Some(vrf);
        self.source_plen = plen;
        self
    }

    pub fn with_dest_route(mut self, vrf: VrfId, plen: u8) -> Self {
        self.dest_vrf = Some(vrf);
        self.dest_plen = plen;
        self
    }

    pub fn with_direction(mut self, ingress: bool, local: bool) -> Self {
        self.ingress = ingress;
        self.local_flow = local;
        self
    }

    pub fn bridged(mut self, src_mac: MacAddress, l2_rpf_plen: u8) -> Self {
        self.l3_flow = false;
        self.src_mac = src_mac;
        self.l2_rpf_plen = l2_rpf_plen;
        self
    }
}

/// A flow as seen by the manager: a stable identity plus mutable match
/// data guarded by the flow's mutex.
#[derive(Debug)]
pub struct FlowEntry {
    id: FlowId,
    data: Mutex<FlowData>,
}

/// Shared handle to a flow. The flow engine holds the primary references;
/// the manager's registry holds one while the flow is tracked.
pub type FlowRef = Arc<FlowEntry>;

impl FlowEntry {
    pub fn new(id: FlowId, data: FlowData) -> Self {
        Self {
            id,
            data: Mutex::new(data),
        }
    }

    /// Convenience constructor returning a shared handle.
    pub fn shared(id: FlowId, data: FlowData) -> FlowRef {
        Arc::new(Self::new(id, data))
    }

    pub fn id(&self) -> FlowId {
        self.id
    }

    /// Locks and returns the flow's match data.
    pub fn data(&self) -> MutexGuard<'_, FlowData> {
        self.data.lock().expect("flow mutex poisoned")
    }

    /// Mutates the flow's match data under its mutex (flow-engine side).
    pub fn update(&self, f: impl FnOnce(&mut FlowData)) {
        let mut data = self.data();
        f(&mut data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let data = FlowData::default()
            .with_vn(VnId(7))
            .with_interface(InterfaceId(1))
            .with_acl(MatchAcl::new(AclId(9)).with_aces([AceId(1), AceId(2)]));
        assert_eq!(data.vn, Some(VnId(7)));
        assert_eq!(data.intf, Some(InterfaceId(1)));
        assert_eq!(data.match_data.policy.len(), 1);
        assert_eq!(data.match_data.policy[0].ace_ids.len(), 2);
    }

    #[test]
    fn test_update_under_mutex() {
        let flow = FlowEntry::shared(FlowId(1), FlowData::default());
        flow.update(|d| d.ingress = false);
        assert!(!flow.data().ingress);
    }

    #[test]
    fn test_match_lists_order() {
        let mut data = FlowMatchData::default();
        data.vrf_assign.push(MatchAcl::new(AclId(1)));
        let lists = data.lists();
        assert_eq!(lists.len(), 9);
        assert_eq!(lists[8].len(), 1);
    }
}
