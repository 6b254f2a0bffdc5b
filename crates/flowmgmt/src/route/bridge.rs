//! Bridge (MAC) route dependency index.

use crate::db::VrfId;
use crate::flow::{FlowData, FlowId};
use crate::key::{BridgeRouteKey, DepKey};
use crate::message::FlowMgmtResponse;
use crate::registry::FlowRegistry;
use crate::tree::{DepEntry, DepTree, OperRequest};
use std::collections::BTreeSet;
use vswitch_flow_common::WorkQueue;
use vswitch_types::MacAddress;

/// Bridged flows depend on their source MAC in both the source and the
/// destination VRF. Routed flows produce no bridge keys.
pub(crate) fn extract_keys(data: &FlowData, keys: &mut BTreeSet<DepKey>) {
    if data.l3_flow {
        return;
    }

    if let Some(vrf) = data.source_vrf {
        keys.insert(DepKey::Bridge(BridgeRouteKey {
            vrf_id: vrf,
            mac: data.src_mac,
        }));
    }
    if let Some(vrf) = data.dest_vrf {
        keys.insert(DepKey::Bridge(BridgeRouteKey {
            vrf_id: vrf,
            mac: data.src_mac,
        }));
    }
}

/// Bridge route dependency index.
#[derive(Debug)]
pub struct BridgeRouteTree {
    tree: DepTree<BridgeRouteKey>,
}

impl BridgeRouteTree {
    pub(crate) fn new() -> Self {
        Self {
            tree: DepTree::new("bridge"),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&BridgeRouteKey, &DepEntry<()>)> {
        self.tree.iter()
    }

    pub(crate) fn add(&mut self, key: &BridgeRouteKey, flow: FlowId) -> bool {
        self.tree.add(key, flow)
    }

    pub(crate) fn delete(
        &mut self,
        key: &BridgeRouteKey,
        flow: FlowId,
        responses: &WorkQueue<FlowMgmtResponse>,
    ) -> bool {
        self.tree.delete(key, flow, responses)
    }

    pub(crate) fn oper_add(
        &mut self,
        req: &OperRequest<'_>,
        key: &BridgeRouteKey,
        registry: &FlowRegistry,
        responses: &WorkQueue<FlowMgmtResponse>,
    ) {
        self.tree.oper_add(req, key, registry, responses);
    }

    pub(crate) fn oper_change(
        &mut self,
        req: &OperRequest<'_>,
        key: &BridgeRouteKey,
        registry: &FlowRegistry,
        responses: &WorkQueue<FlowMgmtResponse>,
    ) {
        self.tree.oper_change(req, key, registry, responses);
    }

    pub(crate) fn oper_delete(
        &mut self,
        req: &OperRequest<'_>,
        key: &BridgeRouteKey,
        registry: &FlowRegistry,
        responses: &WorkQueue<FlowMgmtResponse>,
    ) -> bool {
        self.tree.oper_delete(req, key, true, registry, responses)
    }

    /// True if any key of this index belongs to `vrf`, probed by upper
    /// bound from (vrf, zero MAC).
    pub fn has_vrf_flows(&self, vrf: VrfId) -> bool {
        let probe = BridgeRouteKey {
            vrf_id: vrf,
            mac: MacAddress::ZERO,
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
    use pretty_assertions::assert_eq;

    fn mac(s: &str) -> MacAddress {
        s.parse().unwrap()
    }

    #[test]
    fn test_extract_both_vrfs() {
        let data = FlowData::default()
            .with_source_route(VrfId(1), 24)
            .with_dest_route(VrfId(2), 24)
            .bridged(mac("aa:bb:cc:00:00:01"), 32);

        let mut keys = BTreeSet::new();
        extract_keys(&data, &mut keys);
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&DepKey::Bridge(BridgeRouteKey {
            vrf_id: VrfId(1),
            mac: mac("aa:bb:cc:00:00:01"),
        })));
        assert!(keys.contains(&DepKey::Bridge(BridgeRouteKey {
            vrf_id: VrfId(2),
            mac: mac("aa:bb:cc:00:00:01"),
        })));
    }

    #[test]
    fn test_extract_same_vrf_collapses() {
        let data = FlowData::default()
            .with_source_route(VrfId(1), 24)
            .with_dest_route(VrfId(1), 24)
            .bridged(mac("aa:bb:cc:00:00:01"), 32);

        let mut keys = BTreeSet::new();
        extract_keys(&data, &mut keys);
        assert_eq!(keys.len(), 1);
    }

    #[test]
    fn test_l3_flow_has_no_bridge_keys() {
        let data = FlowData::default()
            .with_source_route(VrfId(1), 24)
            .with_dest_route(VrfId(2), 24);
        let mut keys = BTreeSet::new();
        extract_keys(&data, &mut keys);
        assert!(keys.is_empty());
    }

    #[test]
    fn test_has_vrf_flows_probe() {
        let (responses, _consumer) = vswitch_flow_common::work_queue("flow-table");
        let mut tree = BridgeRouteTree::new();
        let key = BridgeRouteKey {
            vrf_id: VrfId(3),
            mac: mac("aa:bb:cc:00:00:01"),
        };

        assert!(!tree.has_vrf_flows(VrfId(3)));
        tree.add(&key, FlowId(1));
        assert!(tree.has_vrf_flows(VrfId(3)));
        assert!(!tree.has_vrf_flows(VrfId(2)));
        tree.delete(&key, FlowId(1), &responses);
        assert!(!tree.has_vrf_flows(VrfId(3)));
    }
}
