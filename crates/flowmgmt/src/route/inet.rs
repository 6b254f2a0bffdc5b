//! IPv4/IPv6 unicast route dependency index.
//!
//! One index type serves both families; the manager keeps one instance per
//! family and routes events by the prefix's family. Keys are canonicalized
//! to their subnet address. On top of the generic tree this index keeps a
//! per-VRF LPM structure so that a newly added, more specific route can
//! re-fire evaluation of the flows sitting on its covering route.

use crate::db::VrfId;
use crate::flow::{FlowData, FlowId};
use crate::key::{DepKey, InetRouteKey};
use crate::message::FlowMgmtResponse;
use crate::registry::FlowRegistry;
use crate::route::lpm::LpmSet;
use crate::tree::{DepEntry, DepTree, OperRequest};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;
use vswitch_flow_common::WorkQueue;
use vswitch_types::{IpAddress, Ipv4Address};

fn push_key(keys: &mut BTreeSet<DepKey>, vrf: VrfId, ip: IpAddress, plen: u8) {
    keys.insert(InetRouteKey::new(vrf, ip, plen).dep_key());
}

fn push_map(keys: &mut BTreeSet<DepKey>, ip: IpAddress, map: &BTreeMap<VrfId, u8>) {
    for (vrf, plen) in map {
        push_key(keys, *vrf, ip, *plen);
    }
}

/// Route keys for a flow, both families.
///
/// Routed flows depend on the source and destination routes in their
/// respective VRFs plus every (vrf, plen) pair in the flow's plen maps;
/// bridged flows depend only on the source RPF route.
pub(crate) fn extract_keys(data: &FlowData, keys: &mut BTreeSet<DepKey>) {
    if !data.l3_flow {
        if let Some(vrf) = data.source_vrf {
            push_key(keys, vrf, data.src_addr, data.l2_rpf_plen);
        }
        return;
    }

    if let Some(vrf) = data.source_vrf {
        push_key(keys, vrf, data.src_addr, data.source_plen);
    }
    push_map(keys, data.src_addr, &data.source_plen_map);

    if let Some(vrf) = data.dest_vrf {
        push_key(keys, vrf, data.dst_addr, data.dest_plen);
    }
    push_map(keys, data.dst_addr, &data.dest_plen_map);
}

/// INET route dependency index for one address family.
#[derive(Debug)]
pub struct InetRouteTree {
    tree: DepTree<InetRouteKey>,
    lpm: LpmSet,
}

impl InetRouteTree {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            tree: DepTree::new(name),
            lpm: LpmSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&InetRouteKey, &DepEntry<()>)> {
        self.tree.iter()
    }

    pub(crate) fn lpm_len(&self) -> usize {
        self.lpm.len()
    }

    pub(crate) fn add(&mut self, key: &InetRouteKey, flow: FlowId) -> bool {
        self.tree.add(key, flow)
    }

    pub(crate) fn delete(
        &mut self,
        key: &InetRouteKey,
        flow: FlowId,
        responses: &WorkQueue<FlowMgmtResponse>,
    ) -> bool {
        self.tree.delete(key, flow, responses)
    }

    /// A route was added. Besides the generic behavior, record it in the
    /// LPM structure and re-fire evaluation of the flows on its covering
    /// route (the arrival of a more specific route changes their match).
    pub(crate) fn oper_add(
        &mut self,
        req: &OperRequest<'_>,
        key: &InetRouteKey,
        registry: &FlowRegistry,
        responses: &WorkQueue<FlowMgmtResponse>,
    ) {
        self.tree.oper_add(req, key, registry, responses);

        self.lpm.insert(key);
        if key.plen > 0 {
            if let Some(cover) = self.lpm.lookup(key.vrf_id, key.ip, key.plen - 1) {
                debug!(route = %key, cover = %cover, "re-evaluating covering route");
                let synth = OperRequest::synthetic_add();
                self.tree.oper_add(&synth, &cover, registry, responses);
            }
        }
    }

    pub(crate) fn oper_change(
        &mut self,
        req: &OperRequest<'_>,
        key: &InetRouteKey,
        registry: &FlowRegistry,
        responses: &WorkQueue<FlowMgmtResponse>,
    ) {
        self.tree.oper_change(req, key, registry, responses);
    }

    /// A route was deleted: drop it from the LPM structure first, then run
    /// the generic delete.
    pub(crate) fn oper_delete(
        &mut self,
        req: &OperRequest<'_>,
        key: &InetRouteKey,
        registry: &FlowRegistry,
        responses: &WorkQueue<FlowMgmtResponse>,
    ) -> bool {
        self.lpm.remove(key);
        self.tree.oper_delete(req, key, true, registry, responses)
    }

    /// True if any key of this index belongs to `vrf`, probed by upper
    /// bound from the VRF's smallest possible key.
    pub fn has_vrf_flows(&self, vrf: VrfId) -> bool {
        let probe = InetRouteKey {
            vrf_id: vrf,
            ip: IpAddress::V4(Ipv4Address::UNSPECIFIED),
            plen: 0,
        };
        match self.tree.upper_bound(&probe) {
            Some(next) => next.vrf_id == vrf,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbObject;
    use crate::flow::{FlowData, FlowEntry};
    use pretty_assertions::assert_eq;
    use vswitch_flow_common::work_queue;

    fn key(vrf: u32, prefix: &str) -> InetRouteKey {
        let (ip, plen) = prefix.split_once('/').unwrap();
        InetRouteKey::new(VrfId(vrf), ip.parse().unwrap(), plen.parse().unwrap())
    }

    #[test]
    fn test_extract_l3_keys() {
        let mut data = FlowData::default()
            .with_addrs("10.1.2.3".parse().unwrap(), "20.0.0.9".parse().unwrap())
            .with_source_route(VrfId(1), 24)
            .with_dest_route(VrfId(1), 8);
        data.source_plen_map.insert(VrfId(2), 16);

        let mut keys = BTreeSet::new();
        extract_keys(&data, &mut keys);

        assert_eq!(keys.len(), 3);
        assert!(keys.contains(&key(1, "10.1.2.0/24").dep_key()));
        assert!(keys.contains(&key(2, "10.1.0.0/16").dep_key()));
        assert!(keys.contains(&key(1, "20.0.0.0/8").dep_key()));
    }

    #[test]
    fn test_extract_l2_rpf_key() {
        let data = FlowData::default()
            .with_addrs("10.1.2.3".parse().unwrap(), "20.0.0.9".parse().unwrap())
            .with_source_route(VrfId(1), 24)
            .with_dest_route(VrfId(1), 8)
            .bridged("aa:bb:cc:00:00:01".parse().unwrap(), 30);

        let mut keys = BTreeSet::new();
        extract_keys(&data, &mut keys);

        // Bridged flows keep only the source RPF route.
        assert_eq!(keys.len(), 1);
        assert!(keys.contains(&key(1, "10.1.2.0/30").dep_key()));
    }

    #[test]
    fn test_extract_no_source_vrf() {
        let data = FlowData::default().bridged("aa:bb:cc:00:00:01".parse().unwrap(), 30);
        let mut keys = BTreeSet::new();
        extract_keys(&data, &mut keys);
        assert!(keys.is_empty());
    }

    #[test]
    fn test_cover_readd_on_more_specific_route() {
        let (responses, mut consumer) = work_queue("flow-table");
        let mut tree = InetRouteTree::new("inet4");
        let mut registry = FlowRegistry::new();

        let flow = FlowEntry::shared(crate::flow::FlowId(1), FlowData::default());
        let info = registry.take_or_insert(&flow);
        registry.put(flow.id(), info);

        // Flow depends on 10.0.0.0/8, which is also a known route.
        let cover_key = key(1, "10.0.0.0/8");
        tree.add(&cover_key, flow.id());
        let cover_db = DbObject::inet_route(VrfId(1), "10.0.0.0/8".parse().unwrap());
        tree.oper_add(
            &OperRequest::new(crate::message::DbEvent::Add, &cover_db, 1),
            &cover_key,
            &registry,
            &responses,
        );
        consumer.drain();

        // A more specific route arrives: the cover's dependents re-fire.
        let specific = DbObject::inet_route(VrfId(1), "10.1.0.0/16".parse().unwrap());
        tree.oper_add(
            &OperRequest::new(crate::message::DbEvent::Add, &specific, 2),
            &key(1, "10.1.0.0/16"),
            &registry,
            &responses,
        );

        let resps = consumer.drain();
        assert_eq!(resps.len(), 1);
        match &resps[0] {
            FlowMgmtResponse::RevaluateDbEntry {
                cause, db_entry, ..
            } => {
                assert_eq!(*cause, cover_key.dep_key());
                assert_eq!(db_entry.upgrade().unwrap(), cover_db);
            }
            other => panic!("unexpected response: {}", other.kind_name()),
        }
    }

    #[test]
    fn test_no_cover_no_refire() {
        let (responses, mut consumer) = work_queue("flow-table");
        let mut tree = InetRouteTree::new("inet4");
        let registry = FlowRegistry::new();

        let specific = DbObject::inet_route(VrfId(1), "10.1.0.0/16".parse().unwrap());
        tree.oper_add(
            &OperRequest::new(crate::message::DbEvent::Add, &specific, 1),
            &key(1, "10.1.0.0/16"),
            &registry,
            &responses,
        );
        assert!(consumer.try_recv().is_none());
    }

    #[test]
    fn test_has_vrf_flows_probe() {
        let (responses, _consumer) = work_queue("flow-table");
        let mut tree = InetRouteTree::new("inet4");

        assert!(!tree.has_vrf_flows(VrfId(1)));
        tree.add(&key(1, "10.0.0.0/8"), crate::flow::FlowId(1));
        assert!(tree.has_vrf_flows(VrfId(1)));
        assert!(!tree.has_vrf_flows(VrfId(2)));

        tree.delete(&key(1, "10.0.0.0/8"), crate::flow::FlowId(1), &responses);
        assert!(!tree.has_vrf_flows(VrfId(1)));
    }
}
