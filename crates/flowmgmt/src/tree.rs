//! Generic dependency index ("tree").
//!
//! Each object kind gets one ordered index mapping its key type to a
//! [`DepEntry`]: the set of flows depending on the keyed object plus a
//! small lifecycle state machine. The generic operations here implement
//! the shared add/delete/oper-event/deferred-free behavior; kind-specific
//! indexes wrap a tree and extend it.
//!
//! All tree mutation happens on the flow-management task; no locking here.

use crate::db::{DbEntryRef, GenId, WeakDbRef};
use crate::flow::FlowId;
use crate::key::DepKey;
use crate::message::{DbEvent, FlowMgmtResponse};
use crate::registry::FlowRegistry;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};
use vswitch_flow_common::WorkQueue;

/// Whether the keyed object's ADD/DEL notifications have been observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperState {
    /// No DB notification seen yet; the entry exists for flow references
    /// alone.
    #[default]
    NotSeen,
    /// ADD (or CHANGE) observed, no DELETE yet.
    AddSeen,
    /// DELETE observed; FREE is owed once the last flow reference drops.
    DelSeen,
}

/// Key of a kind-specific index, convertible to the tagged [`DepKey`].
pub trait IndexKey: Ord + Clone {
    fn dep_key(&self) -> DepKey;
}

/// Kind-specific extension state carried by an entry.
pub trait EntryExt: Default {
    /// Extra deletion gate; the base liveness conditions still apply.
    fn can_delete(&self) -> bool {
        true
    }
}

impl EntryExt for () {}

/// Per-key entry: the flows depending on the keyed object plus its
/// lifecycle state.
#[derive(Debug)]
pub struct DepEntry<X> {
    pub(crate) flows: BTreeSet<FlowId>,
    pub(crate) oper_state: OperState,
    pub(crate) gen_id: GenId,
    pub(crate) db_ref: Option<WeakDbRef>,
    pub(crate) ext: X,
}

impl<X: EntryExt> DepEntry<X> {
    fn new() -> Self {
        Self {
            flows: BTreeSet::new(),
            oper_state: OperState::default(),
            gen_id: 0,
            db_ref: None,
            ext: X::default(),
        }
    }

    pub fn flows(&self) -> &BTreeSet<FlowId> {
        &self.flows
    }

    pub fn oper_state(&self) -> OperState {
        self.oper_state
    }

    /// An entry cannot be reclaimed while it has flow references, or while
    /// the object's ADD has been seen without a matching DELETE.
    fn can_delete(&self) -> bool {
        self.flows.is_empty() && self.oper_state != OperState::AddSeen && self.ext.can_delete()
    }
}

/// View of a DB-entry request as seen by the index operations.
#[derive(Clone, Copy)]
pub(crate) struct OperRequest<'a> {
    pub event: DbEvent,
    pub db_entry: Option<&'a DbEntryRef>,
    pub gen_id: GenId,
}

impl<'a> OperRequest<'a> {
    pub(crate) fn new(event: DbEvent, db_entry: &'a DbEntryRef, gen_id: GenId) -> Self {
        Self {
            event,
            db_entry: Some(db_entry),
            gen_id,
        }
    }

    /// The request synthesized for LPM cover re-evaluation: an ADD with no
    /// DB entry and generation zero.
    pub(crate) fn synthetic_add() -> Self {
        Self {
            event: DbEvent::Add,
            db_entry: None,
            gen_id: 0,
        }
    }
}

/// Posts a response, tolerating a response queue that is already shut down.
pub(crate) fn send_response(responses: &WorkQueue<FlowMgmtResponse>, resp: FlowMgmtResponse) {
    if let Err(err) = responses.enqueue(resp) {
        warn!(error = %err, "dropping response");
    }
}

/// Ordered index from key to dependency entry.
#[derive(Debug)]
pub struct DepTree<K, X = ()> {
    name: &'static str,
    entries: BTreeMap<K, DepEntry<X>>,
}

impl<K: IndexKey, X: EntryExt> DepTree<K, X> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find(&self, key: &K) -> Option<&DepEntry<X>> {
        self.entries.get(key)
    }

    pub(crate) fn find_mut(&mut self, key: &K) -> Option<&mut DepEntry<X>> {
        self.entries.get_mut(key)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&K, &DepEntry<X>)> {
        self.entries.iter()
    }

    /// The smallest key strictly greater than `key`, if any.
    pub(crate) fn upper_bound(&self, key: &K) -> Option<&K> {
        self.entries
            .range((Bound::Excluded(key), Bound::Unbounded))
            .next()
            .map(|(k, _)| k)
    }

    fn locate(&mut self, key: &K) -> &mut DepEntry<X> {
        self.entries
            .entry(key.clone())
            .or_insert_with(DepEntry::new)
    }

    /// Makes sure an entry exists for `key`, building its extension state
    /// with `ext` if it has to be created.
    pub(crate) fn ensure_with(&mut self, key: &K, ext: impl FnOnce() -> X) {
        self.entries.entry(key.clone()).or_insert_with(|| DepEntry {
            ext: ext(),
            ..DepEntry::new()
        });
    }

    /// Records that `flow` depends on `key`, creating the entry if needed.
    /// Returns true iff the flow was not already present.
    pub(crate) fn add(&mut self, key: &K, flow: FlowId) -> bool {
        self.locate(key).flows.insert(flow)
    }

    /// Drops `flow`'s dependency on `key` and reclaims the entry if it can
    /// be. Returns true iff other flows still reference the entry.
    pub(crate) fn delete(
        &mut self,
        key: &K,
        flow: FlowId,
        responses: &WorkQueue<FlowMgmtResponse>,
    ) -> bool {
        let Some(entry) = self.entries.get_mut(key) else {
            return false;
        };
        entry.flows.remove(&flow);
        let remaining = !entry.flows.is_empty();
        self.try_delete(key, true, responses);
        remaining
    }

    /// The keyed object was added: mark it live, record its DB reference,
    /// and re-notify every dependent flow.
    pub(crate) fn oper_add(
        &mut self,
        req: &OperRequest<'_>,
        key: &K,
        registry: &FlowRegistry,
        responses: &WorkQueue<FlowMgmtResponse>,
    ) {
        let name = self.name;
        let entry = self.locate(key);
        entry.oper_state = OperState::AddSeen;
        if let Some(db) = req.db_entry {
            entry.db_ref = Some(Arc::downgrade(db));
        }
        Self::notify_dependents(name, entry, req.event, key, registry, responses);
    }

    /// The keyed object changed. Same dependent notification as an add,
    /// but does not create an entry that does not exist.
    pub(crate) fn oper_change(
        &mut self,
        req: &OperRequest<'_>,
        key: &K,
        registry: &FlowRegistry,
        responses: &WorkQueue<FlowMgmtResponse>,
    ) {
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };
        entry.oper_state = OperState::AddSeen;
        if let Some(db) = req.db_entry {
            entry.db_ref = Some(Arc::downgrade(db));
        }
        Self::notify_dependents(self.name, entry, req.event, key, registry, responses);
    }

    /// The keyed object was deleted. Dependents are told to drop it; the
    /// entry is reclaimed now if nothing references it, or later when the
    /// last flow goes. An object unknown to the index is acknowledged with
    /// an immediate FREE.
    pub(crate) fn oper_delete(
        &mut self,
        req: &OperRequest<'_>,
        key: &K,
        extra_ok: bool,
        registry: &FlowRegistry,
        responses: &WorkQueue<FlowMgmtResponse>,
    ) -> bool {
        let Some(entry) = self.entries.get_mut(key) else {
            free_notify(
                self.name,
                &key.dep_key(),
                req.db_entry.map(Arc::downgrade),
                req.gen_id,
                responses,
            );
            return true;
        };
        entry.oper_state = OperState::DelSeen;
        entry.gen_id = req.gen_id;
        if let Some(db) = req.db_entry {
            entry.db_ref = Some(Arc::downgrade(db));
        }
        Self::notify_dependents(self.name, entry, req.event, key, registry, responses);
        self.try_delete(key, extra_ok, responses)
    }

    /// Re-fires evaluation of every flow depending on `key`, without
    /// touching the entry's lifecycle state. A key unknown to the index is
    /// a no-op.
    pub(crate) fn revaluate(
        &self,
        key: &K,
        registry: &FlowRegistry,
        responses: &WorkQueue<FlowMgmtResponse>,
    ) {
        if let Some(entry) = self.entries.get(key) {
            Self::notify_dependents(self.name, entry, DbEvent::Change, key, registry, responses);
        }
    }

    /// Re-attempts reclaim after a liveness change. A key unknown to the
    /// index is not an error.
    pub(crate) fn retry_delete(
        &mut self,
        key: &K,
        extra_ok: bool,
        responses: &WorkQueue<FlowMgmtResponse>,
    ) -> bool {
        if self.entries.contains_key(key) {
            self.try_delete(key, extra_ok, responses)
        } else {
            false
        }
    }

    /// Reclaims the entry if every deletion gate is open. Emits FREE when
    /// the object's DELETE had been observed.
    pub(crate) fn try_delete(
        &mut self,
        key: &K,
        extra_ok: bool,
        responses: &WorkQueue<FlowMgmtResponse>,
    ) -> bool {
        let Some(entry) = self.entries.get(key) else {
            return false;
        };
        if !entry.can_delete() || !extra_ok {
            return false;
        }
        if entry.oper_state == OperState::DelSeen {
            free_notify(
                self.name,
                &key.dep_key(),
                entry.db_ref.clone(),
                entry.gen_id,
                responses,
            );
        }
        self.entries.remove(key);
        true
    }

    /// Translates an oper event into one response per dependent flow.
    fn notify_dependents(
        name: &'static str,
        entry: &DepEntry<X>,
        event: DbEvent,
        key: &K,
        registry: &FlowRegistry,
        responses: &WorkQueue<FlowMgmtResponse>,
    ) {
        let cause = key.dep_key();
        for flow_id in &entry.flows {
            let flow = registry
                .flow_ref(*flow_id)
                .unwrap_or_else(|| {
                    panic!("{name}: dependent flow {flow_id} missing from registry")
                })
                .clone();
            let resp = match event {
                DbEvent::Add | DbEvent::Change => match &entry.db_ref {
                    Some(db) => FlowMgmtResponse::RevaluateDbEntry {
                        flow,
                        cause,
                        db_entry: db.clone(),
                    },
                    None => FlowMgmtResponse::RevaluateFlow {
                        flow,
                        cause,
                        db_entry: Weak::new(),
                    },
                },
                DbEvent::Delete => FlowMgmtResponse::DeleteDbEntry {
                    flow,
                    cause,
                    db_entry: entry.db_ref.clone().unwrap_or_else(Weak::new),
                },
            };
            send_response(responses, resp);
        }
    }
}

/// Emits FREE_DBENTRY for a reclaimed object, where the kind calls for it.
fn free_notify(
    name: &'static str,
    key: &DepKey,
    db_ref: Option<WeakDbRef>,
    gen_id: GenId,
    responses: &WorkQueue<FlowMgmtResponse>,
) {
    if !key.emits_free() {
        return;
    }
    let db_entry = db_ref
        .unwrap_or_else(|| panic!("{name}: FREE owed for {key} but no DB reference recorded"));
    debug!(index = name, %key, gen_id, "free dbentry");
    send_response(responses, FlowMgmtResponse::FreeDbEntry { db_entry, gen_id });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{AclId, DbObject};
    use crate::flow::{FlowData, FlowEntry, FlowId};
    use vswitch_flow_common::work_queue;

    fn tracked(registry: &mut FlowRegistry, id: u64) -> FlowId {
        let flow = FlowEntry::shared(FlowId(id), FlowData::default());
        let info = registry.take_or_insert(&flow);
        registry.put(flow.id(), info);
        flow.id()
    }

    #[test]
    fn test_add_delete_reclaims_flow_only_entry() {
        let (responses, mut consumer) = work_queue("flow-table");
        let mut tree: DepTree<AclId> = DepTree::new("acl");

        assert!(tree.add(&AclId(1), FlowId(1)));
        assert!(!tree.add(&AclId(1), FlowId(1)));
        assert!(tree.add(&AclId(1), FlowId(2)));
        assert_eq!(tree.len(), 1);

        // One reference remains after the first delete.
        assert!(tree.delete(&AclId(1), FlowId(1), &responses));
        assert_eq!(tree.len(), 1);

        // Last reference gone and no oper ADD seen: entry reclaimed, no FREE.
        assert!(!tree.delete(&AclId(1), FlowId(2), &responses));
        assert!(tree.is_empty());
        assert!(consumer.try_recv().is_none());
    }

    #[test]
    fn test_oper_add_pins_entry() {
        let (responses, _consumer) = work_queue("flow-table");
        let mut tree: DepTree<AclId> = DepTree::new("acl");
        let registry = FlowRegistry::new();

        let acl = DbObject::acl(1, "a");
        let req = OperRequest::new(DbEvent::Add, &acl, 1);
        tree.oper_add(&req, &AclId(1), &registry, &responses);

        tree.add(&AclId(1), FlowId(1));
        tree.delete(&AclId(1), FlowId(1), &responses);
        // ADD seen and no DELETE: the entry must survive the last flow.
        assert_eq!(tree.len(), 1);
        assert_eq!(
            tree.find(&AclId(1)).unwrap().oper_state(),
            OperState::AddSeen
        );
    }

    #[test]
    fn test_oper_delete_unknown_key_frees_immediately() {
        let (responses, mut consumer) = work_queue("flow-table");
        let mut tree: DepTree<AclId> = DepTree::new("acl");
        let registry = FlowRegistry::new();

        let acl = DbObject::acl(1, "a");
        let req = OperRequest::new(DbEvent::Delete, &acl, 9);
        assert!(tree.oper_delete(&req, &AclId(1), true, &registry, &responses));

        match consumer.try_recv().unwrap() {
            FlowMgmtResponse::FreeDbEntry { db_entry, gen_id } => {
                assert_eq!(gen_id, 9);
                assert_eq!(db_entry.upgrade().unwrap(), acl);
            }
            other => panic!("unexpected response: {}", other.kind_name()),
        }
    }

    #[test]
    fn test_deferred_free_carries_delete_gen_id() {
        let (responses, mut consumer) = work_queue("flow-table");
        let mut tree: DepTree<AclId> = DepTree::new("acl");
        let mut registry = FlowRegistry::new();
        let flow = tracked(&mut registry, 1);

        tree.add(&AclId(1), flow);
        let acl = DbObject::acl(1, "a");
        let req = OperRequest::new(DbEvent::Delete, &acl, 7);
        assert!(!tree.oper_delete(&req, &AclId(1), true, &registry, &responses));

        // Dependent was told to drop the object, but no FREE yet.
        let resps = consumer.drain();
        assert_eq!(resps.len(), 1);
        assert!(matches!(resps[0], FlowMgmtResponse::DeleteDbEntry { .. }));

        // Last flow reference goes: FREE with the DELETE's generation.
        tree.delete(&AclId(1), flow, &responses);
        let resps = consumer.drain();
        assert_eq!(resps.len(), 1);
        match &resps[0] {
            FlowMgmtResponse::FreeDbEntry { gen_id, .. } => assert_eq!(*gen_id, 7),
            other => panic!("unexpected response: {}", other.kind_name()),
        }
        assert!(tree.is_empty());
    }

    #[test]
    fn test_oper_change_notifies_without_creating() {
        let (responses, mut consumer) = work_queue("flow-table");
        let mut tree: DepTree<AclId> = DepTree::new("acl");
        let mut registry = FlowRegistry::new();

        let acl = DbObject::acl(1, "a");
        let req = OperRequest::new(DbEvent::Change, &acl, 2);

        // Unknown key: no-op.
        tree.oper_change(&req, &AclId(1), &registry, &responses);
        assert!(tree.is_empty());

        let flow = tracked(&mut registry, 1);
        tree.add(&AclId(1), flow);
        tree.oper_change(&req, &AclId(1), &registry, &responses);
        let resps = consumer.drain();
        assert_eq!(resps.len(), 1);
        assert!(matches!(
            resps[0],
            FlowMgmtResponse::RevaluateDbEntry { .. }
        ));
    }

    #[test]
    fn test_revaluate_without_db_ref_uses_flow_event() {
        let (responses, mut consumer) = work_queue("flow-table");
        let mut tree: DepTree<AclId> = DepTree::new("acl");
        let mut registry = FlowRegistry::new();
        let flow = tracked(&mut registry, 1);

        tree.add(&AclId(1), flow);
        let req = OperRequest::synthetic_add();
        tree.oper_add(&req, &AclId(1), &registry, &responses);

        let resps = consumer.drain();
        assert_eq!(resps.len(), 1);
        match &resps[0] {
            FlowMgmtResponse::RevaluateFlow { cause, .. } => {
                assert_eq!(*cause, DepKey::Acl(AclId(1)));
            }
            other => panic!("unexpected response: {}", other.kind_name()),
        }
    }

    #[test]
    fn test_upper_bound() {
        let mut tree: DepTree<AclId> = DepTree::new("acl");
        tree.add(&AclId(2), FlowId(1));
        tree.add(&AclId(5), FlowId(1));
        assert_eq!(tree.upper_bound(&AclId(1)), Some(&AclId(2)));
        assert_eq!(tree.upper_bound(&AclId(2)), Some(&AclId(5)));
        assert_eq!(tree.upper_bound(&AclId(5)), None);
    }
}
