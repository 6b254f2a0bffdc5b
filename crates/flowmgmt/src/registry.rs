//! The flow registry: per-flow dependency bookkeeping.

use crate::flow::{FlowId, FlowRef};
use crate::key::DepKey;
use std::collections::{BTreeMap, BTreeSet};

/// What the manager knows about one tracked flow.
#[derive(Debug)]
pub struct FlowEntryInfo {
    flow: FlowRef,
    /// The keys this flow currently depends on, in key order.
    pub(crate) keys: BTreeSet<DepKey>,
    /// Events processed for this flow (diagnostic).
    pub(crate) count: u64,
    /// Memoized direction flags, used to reconcile VN counters when the
    /// flow's direction flips without changing VN.
    pub(crate) local_flow: bool,
    pub(crate) ingress: bool,
}

impl FlowEntryInfo {
    fn new(flow: FlowRef) -> Self {
        Self {
            flow,
            keys: BTreeSet::new(),
            count: 0,
            local_flow: false,
            ingress: false,
        }
    }

    pub fn flow(&self) -> &FlowRef {
        &self.flow
    }

    pub fn keys(&self) -> &BTreeSet<DepKey> {
        &self.keys
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

/// Mapping from flow identity to its dependency info. Holds the manager's
/// only strong reference to each tracked flow.
#[derive(Debug, Default)]
pub struct FlowRegistry {
    flows: BTreeMap<FlowId, FlowEntryInfo>,
}

impl FlowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn contains(&self, id: FlowId) -> bool {
        self.flows.contains_key(&id)
    }

    pub fn find(&self, id: FlowId) -> Option<&FlowEntryInfo> {
        self.flows.get(&id)
    }

    /// Shared handle for a tracked flow, used when translating index
    /// notifications into responses.
    pub(crate) fn flow_ref(&self, id: FlowId) -> Option<&FlowRef> {
        self.flows.get(&id).map(|info| &info.flow)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&FlowId, &FlowEntryInfo)> {
        self.flows.iter()
    }

    /// Removes and returns the info for `flow`, creating a fresh one if the
    /// flow is not yet tracked. The caller owns the info while applying a
    /// delta and puts it back with [`FlowRegistry::put`].
    pub(crate) fn take_or_insert(&mut self, flow: &FlowRef) -> FlowEntryInfo {
        self.flows
            .remove(&flow.id())
            .unwrap_or_else(|| FlowEntryInfo::new(flow.clone()))
    }

    pub(crate) fn take(&mut self, id: FlowId) -> Option<FlowEntryInfo> {
        self.flows.remove(&id)
    }

    pub(crate) fn put(&mut self, id: FlowId, info: FlowEntryInfo) {
        self.flows.insert(id, info);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{FlowData, FlowEntry};

    #[test]
    fn test_take_or_insert_roundtrip() {
        let mut registry = FlowRegistry::new();
        let flow = FlowEntry::shared(FlowId(1), FlowData::default());

        let mut info = registry.take_or_insert(&flow);
        assert_eq!(info.count(), 0);
        info.count += 1;
        registry.put(flow.id(), info);

        assert_eq!(registry.len(), 1);
        let again = registry.take_or_insert(&flow);
        assert_eq!(again.count(), 1);
        // Not put back: the registry no longer tracks the flow.
        assert!(registry.is_empty());
    }

    #[test]
    fn test_flow_ref_lookup() {
        let mut registry = FlowRegistry::new();
        let flow = FlowEntry::shared(FlowId(5), FlowData::default());
        let info = registry.take_or_insert(&flow);
        registry.put(flow.id(), info);

        assert!(registry.flow_ref(FlowId(5)).is_some());
        assert!(registry.flow_ref(FlowId(6)).is_none());
    }
}
