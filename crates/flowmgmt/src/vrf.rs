//! VRF dependency index and scope-deletion gating.
//!
//! A VRF owns up to three route tables (inet4, inet6, bridge). Its FREE
//! may only go out once the object's DELETE was seen, each route table has
//! signalled "managed delete", and none of the three route indexes holds a
//! key in the VRF. The managed-delete signals arrive on the route tables'
//! own tasks; they flip an atomic slot and post a retry request, never
//! touching the index directly.

use crate::db::VrfId;
use crate::message::FlowMgmtResponse;
use crate::registry::FlowRegistry;
use crate::tree::{DepTree, EntryExt, OperRequest};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;
use vswitch_flow_common::WorkQueue;

/// The per-VRF route tables whose teardown gates VRF reclaim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTableKind {
    Inet4Unicast,
    Inet6Unicast,
    Bridge,
}

/// Managed-delete slots for one VRF's route tables.
///
/// Flipped from the owning route table's task; read on the
/// flow-management task when reclaim is attempted.
#[derive(Debug, Default)]
pub struct VrfTableGates {
    inet4: AtomicBool,
    inet6: AtomicBool,
    bridge: AtomicBool,
}

impl VrfTableGates {
    fn slot(&self, kind: RouteTableKind) -> &AtomicBool {
        match kind {
            RouteTableKind::Inet4Unicast => &self.inet4,
            RouteTableKind::Inet6Unicast => &self.inet6,
            RouteTableKind::Bridge => &self.bridge,
        }
    }

    pub fn mark_deleted(&self, kind: RouteTableKind) {
        self.slot(kind).store(true, Ordering::Relaxed);
    }

    pub fn deleted(&self, kind: RouteTableKind) -> bool {
        self.slot(kind).load(Ordering::Relaxed)
    }

    pub fn all_deleted(&self) -> bool {
        self.deleted(RouteTableKind::Inet4Unicast)
            && self.deleted(RouteTableKind::Inet6Unicast)
            && self.deleted(RouteTableKind::Bridge)
    }
}

/// Entry extension: the VRF's managed-delete gates.
#[derive(Debug)]
pub(crate) struct VrfGates {
    gates: Arc<VrfTableGates>,
}

impl Default for VrfGates {
    fn default() -> Self {
        Self {
            gates: Arc::new(VrfTableGates::default()),
        }
    }
}

impl EntryExt for VrfGates {
    fn can_delete(&self) -> bool {
        self.gates.all_deleted()
    }
}

/// Side map from VRF id to its gates, shared with the producers that
/// signal managed delete from outside the flow-management task. Erased
/// when the VRF entry is reclaimed.
pub(crate) type VrfGateMap = Arc<Mutex<HashMap<VrfId, Arc<VrfTableGates>>>>;

/// Flips the managed-delete slot for a VRF's route table. Returns false if
/// the VRF is not tracked.
pub(crate) fn signal_managed_delete(gates: &VrfGateMap, vrf: VrfId, kind: RouteTableKind) -> bool {
    let map = gates.lock().expect("vrf gate map lock poisoned");
    match map.get(&vrf) {
        Some(slots) => {
            slots.mark_deleted(kind);
            true
        }
        None => false,
    }
}

/// VRF dependency index. No flow ever holds a VRF key directly; entries
/// are created by oper events and reclaimed through the gated checks.
#[derive(Debug)]
pub struct VrfTree {
    tree: DepTree<VrfId, VrfGates>,
    gates: VrfGateMap,
}

impl VrfTree {
    pub(crate) fn new() -> Self {
        Self {
            tree: DepTree::new("vrf"),
            gates: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub(crate) fn gate_map(&self) -> VrfGateMap {
        Arc::clone(&self.gates)
    }

    pub(crate) fn oper_add(
        &mut self,
        req: &OperRequest<'_>,
        vrf: VrfId,
        registry: &FlowRegistry,
        responses: &WorkQueue<FlowMgmtResponse>,
    ) {
        let slots = {
            let mut map = self.gates.lock().expect("vrf gate map lock poisoned");
            Arc::clone(map.entry(vrf).or_default())
        };
        self.tree.ensure_with(&vrf, || VrfGates { gates: slots });
        self.tree.oper_add(req, &vrf, registry, responses);
    }

    pub(crate) fn oper_change(
        &mut self,
        req: &OperRequest<'_>,
        vrf: VrfId,
        registry: &FlowRegistry,
        responses: &WorkQueue<FlowMgmtResponse>,
    ) {
        self.tree.oper_change(req, &vrf, registry, responses);
    }

    /// `flows_gone` is the manager's verdict on whether the three route
    /// indexes still hold keys in this VRF.
    pub(crate) fn oper_delete(
        &mut self,
        req: &OperRequest<'_>,
        vrf: VrfId,
        flows_gone: bool,
        registry: &FlowRegistry,
        responses: &WorkQueue<FlowMgmtResponse>,
    ) -> bool {
        let reclaimed = self.tree.oper_delete(req, &vrf, flows_gone, registry, responses);
        if reclaimed {
            self.forget_gates(vrf);
        }
        reclaimed
    }

    pub(crate) fn retry_delete(
        &mut self,
        vrf: VrfId,
        flows_gone: bool,
        responses: &WorkQueue<FlowMgmtResponse>,
    ) -> bool {
        let reclaimed = self.tree.retry_delete(&vrf, flows_gone, responses);
        if reclaimed {
            debug!(vrf = %vrf, "vrf reclaimed after retry");
            self.forget_gates(vrf);
        }
        reclaimed
    }

    fn forget_gates(&self, vrf: VrfId) {
        self.gates
            .lock()
            .expect("vrf gate map lock poisoned")
            .remove(&vrf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbObject;
    use crate::message::DbEvent;
    use vswitch_flow_common::work_queue;

    #[test]
    fn test_gates_start_closed() {
        let gates = VrfTableGates::default();
        assert!(!gates.all_deleted());
        gates.mark_deleted(RouteTableKind::Inet4Unicast);
        gates.mark_deleted(RouteTableKind::Inet6Unicast);
        assert!(!gates.all_deleted());
        gates.mark_deleted(RouteTableKind::Bridge);
        assert!(gates.all_deleted());
    }

    #[test]
    fn test_delete_deferred_until_gates_open() {
        let (responses, mut consumer) = work_queue("flow-table");
        let mut tree = VrfTree::new();
        let registry = FlowRegistry::new();

        let vrf = DbObject::vrf(5, "blue");
        tree.oper_add(&OperRequest::new(DbEvent::Add, &vrf, 1), VrfId(5), &registry, &responses);

        // DELETE seen, but the route tables have not signalled managed
        // delete: no FREE.
        assert!(!tree.oper_delete(
            &OperRequest::new(DbEvent::Delete, &vrf, 4),
            VrfId(5),
            true,
            &registry,
            &responses,
        ));
        assert!(consumer.try_recv().is_none());
        assert_eq!(tree.len(), 1);

        // All three tables signal; the retry reclaims and frees.
        let gates = tree.gate_map();
        assert!(signal_managed_delete(&gates, VrfId(5), RouteTableKind::Inet4Unicast));
        assert!(signal_managed_delete(&gates, VrfId(5), RouteTableKind::Inet6Unicast));
        assert!(signal_managed_delete(&gates, VrfId(5), RouteTableKind::Bridge));
        assert!(tree.retry_delete(VrfId(5), true, &responses));

        match consumer.try_recv().unwrap() {
            FlowMgmtResponse::FreeDbEntry { gen_id, .. } => assert_eq!(gen_id, 4),
            other => panic!("unexpected response: {}", other.kind_name()),
        }
        assert!(tree.is_empty());
        // The gate side entry went with the VRF.
        assert!(!signal_managed_delete(&gates, VrfId(5), RouteTableKind::Bridge));
    }

    #[test]
    fn test_delete_deferred_on_vrf_route_keys() {
        let (responses, mut consumer) = work_queue("flow-table");
        let mut tree = VrfTree::new();
        let registry = FlowRegistry::new();

        let vrf = DbObject::vrf(5, "blue");
        tree.oper_add(&OperRequest::new(DbEvent::Add, &vrf, 1), VrfId(5), &registry, &responses);
        let gates = tree.gate_map();
        signal_managed_delete(&gates, VrfId(5), RouteTableKind::Inet4Unicast);
        signal_managed_delete(&gates, VrfId(5), RouteTableKind::Inet6Unicast);
        signal_managed_delete(&gates, VrfId(5), RouteTableKind::Bridge);

        // Gates open but route keys remain (flows_gone = false): deferred.
        assert!(!tree.oper_delete(
            &OperRequest::new(DbEvent::Delete, &vrf, 4),
            VrfId(5),
            false,
            &registry,
            &responses,
        ));
        assert!(consumer.try_recv().is_none());

        assert!(tree.retry_delete(VrfId(5), true, &responses));
        assert!(matches!(
            consumer.try_recv().unwrap(),
            FlowMgmtResponse::FreeDbEntry { .. }
        ));
    }

    #[test]
    fn test_retry_unknown_vrf_is_noop() {
        let (responses, mut consumer) = work_queue("flow-table");
        let mut tree = VrfTree::new();
        assert!(!tree.retry_delete(VrfId(9), true, &responses));
        assert!(consumer.try_recv().is_none());
    }
}
