//! Virtual-network dependency index with ingress/egress flow counters.
//!
//! Unlike the other indexes, this one is queried from outside the
//! flow-management task (`vn_flow_counters`), so the manager keeps it
//! behind a mutex and takes that mutex on every operation touching it.

use crate::db::VnId;
use crate::flow::{FlowData, FlowId};
use crate::key::DepKey;
use crate::message::FlowMgmtResponse;
use crate::registry::FlowRegistry;
use crate::tree::{DepEntry, DepTree, EntryExt, OperRequest};
use std::collections::BTreeSet;
use vswitch_flow_common::WorkQueue;

pub(crate) fn extract_keys(data: &FlowData, keys: &mut BTreeSet<DepKey>) {
    if let Some(vn) = data.vn {
        keys.insert(DepKey::Vn(vn));
    }
}

/// Ingress/egress flow counts for one virtual network. Local flows count
/// on both sides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VnCounters {
    pub ingress: u32,
    pub egress: u32,
}

impl EntryExt for VnCounters {}

impl VnCounters {
    fn contribution(local: bool, ingress: bool) -> (u32, u32) {
        if local {
            (1, 1)
        } else if ingress {
            (1, 0)
        } else {
            (0, 1)
        }
    }

    fn apply(&mut self, add: (u32, u32), sub: (u32, u32)) {
        self.ingress = self.ingress + add.0 - sub.0;
        self.egress = self.egress + add.1 - sub.1;
    }

    /// Counter update when a flow is (re-)added to the VN.
    ///
    /// A first insertion contributes its current direction. A re-add
    /// reconciles the previously memoized contribution against the flow's
    /// current flags, so direction and locality flips keep the counters
    /// equal to a recount.
    pub(crate) fn update_on_add(
        &mut self,
        new_flow: bool,
        old_local: bool,
        old_ingress: bool,
        local: bool,
        ingress: bool,
    ) {
        let now = Self::contribution(local, ingress);
        if new_flow {
            self.apply(now, (0, 0));
            return;
        }
        let old = Self::contribution(old_local, old_ingress);
        if old != now {
            self.apply(now, old);
        }
    }

    /// Counter update when a flow leaves the VN, per its memoized flags.
    pub(crate) fn update_on_del(&mut self, local: bool, ingress: bool) {
        self.apply((0, 0), Self::contribution(local, ingress));
    }
}

/// The VN index. All access is serialized by the mutex the manager wraps
/// this in.
#[derive(Debug)]
pub struct VnTree {
    tree: DepTree<VnId, VnCounters>,
}

impl VnTree {
    pub(crate) fn new() -> Self {
        Self {
            tree: DepTree::new("vn"),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Current (ingress, egress) flow counts for a VN; (0, 0) when the VN
    /// is not tracked.
    pub fn flow_counters(&self, vn: VnId) -> (u32, u32) {
        match self.tree.find(&vn) {
            Some(entry) => (entry.ext.ingress, entry.ext.egress),
            None => (0, 0),
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&VnId, &DepEntry<VnCounters>)> {
        self.tree.iter()
    }

    pub(crate) fn counters_mut(&mut self, vn: VnId) -> Option<&mut VnCounters> {
        self.tree.find_mut(&vn).map(|entry| &mut entry.ext)
    }

    pub(crate) fn add(&mut self, vn: VnId, flow: FlowId) -> bool {
        self.tree.add(&vn, flow)
    }

    pub(crate) fn delete(
        &mut self,
        vn: VnId,
        flow: FlowId,
        responses: &WorkQueue<FlowMgmtResponse>,
    ) -> bool {
        self.tree.delete(&vn, flow, responses)
    }

    pub(crate) fn oper_add(
        &mut self,
        req: &OperRequest<'_>,
        vn: VnId,
        registry: &FlowRegistry,
        responses: &WorkQueue<FlowMgmtResponse>,
    ) {
        self.tree.oper_add(req, &vn, registry, responses);
    }

    pub(crate) fn oper_change(
        &mut self,
        req: &OperRequest<'_>,
        vn: VnId,
        registry: &FlowRegistry,
        responses: &WorkQueue<FlowMgmtResponse>,
    ) {
        self.tree.oper_change(req, &vn, registry, responses);
    }

    pub(crate) fn oper_delete(
        &mut self,
        req: &OperRequest<'_>,
        vn: VnId,
        registry: &FlowRegistry,
        responses: &WorkQueue<FlowMgmtResponse>,
    ) -> bool {
        self.tree.oper_delete(req, &vn, true, registry, responses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_contribution_rules() {
        assert_eq!(VnCounters::contribution(true, true), (1, 1));
        assert_eq!(VnCounters::contribution(true, false), (1, 1));
        assert_eq!(VnCounters::contribution(false, true), (1, 0));
        assert_eq!(VnCounters::contribution(false, false), (0, 1));
    }

    #[test]
    fn test_new_flow_counts_by_direction() {
        let mut c = VnCounters::default();
        c.update_on_add(true, false, false, false, true);
        assert_eq!((c.ingress, c.egress), (1, 0));
        c.update_on_add(true, false, false, false, false);
        assert_eq!((c.ingress, c.egress), (1, 1));
        c.update_on_add(true, false, false, true, false);
        assert_eq!((c.ingress, c.egress), (2, 2));
    }

    #[test]
    fn test_readd_swaps_on_direction_flip() {
        let mut c = VnCounters::default();
        c.update_on_add(true, false, false, false, true);
        assert_eq!((c.ingress, c.egress), (1, 0));
        // Same flags again: no movement.
        c.update_on_add(false, false, true, false, true);
        assert_eq!((c.ingress, c.egress), (1, 0));
        // Ingress -> egress.
        c.update_on_add(false, false, true, false, false);
        assert_eq!((c.ingress, c.egress), (0, 1));
    }

    #[test]
    fn test_readd_reconciles_local_transition() {
        let mut c = VnCounters::default();
        c.update_on_add(true, false, false, false, false);
        assert_eq!((c.ingress, c.egress), (0, 1));
        // Egress flow turns local: counted on both sides.
        c.update_on_add(false, false, false, true, false);
        assert_eq!((c.ingress, c.egress), (1, 1));
        // And back.
        c.update_on_add(false, true, false, false, true);
        assert_eq!((c.ingress, c.egress), (1, 0));
    }

    #[test]
    fn test_delete_uses_memoized_flags() {
        let mut c = VnCounters::default();
        c.update_on_add(true, false, false, true, false);
        assert_eq!((c.ingress, c.egress), (1, 1));
        c.update_on_del(true, false);
        assert_eq!((c.ingress, c.egress), (0, 0));
    }

    #[test]
    fn test_tree_counters_query() {
        let mut tree = VnTree::new();
        assert_eq!(tree.flow_counters(VnId(1)), (0, 0));
        tree.add(VnId(1), FlowId(1));
        tree.counters_mut(VnId(1))
            .unwrap()
            .update_on_add(true, false, false, false, true);
        assert_eq!(tree.flow_counters(VnId(1)), (1, 0));
    }
}
