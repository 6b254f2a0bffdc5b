//! The flow dependency manager.
//!
//! One coordinator owns the flow registry and every dependency index. Two
//! queues serialize all work: requests (flow and DB events in) are drained
//! on the flow-management task, responses (re-evaluations, deletes, frees
//! out) on the flow-table task. Index state is only ever touched from the
//! request consumer, so the hot paths take no locks; the VN index is the
//! one exception because its counters are queried from other tasks.

use crate::acl;
use crate::db::{AceId, AclId, DbEntryRef, DbObject, GenId, InterfaceId, NhId, VnId, VrfId};
use crate::flow::FlowRef;
use crate::intf;
use crate::key::{BridgeRouteKey, DepKey, InetRouteKey};
use crate::message::{DbEvent, FlowMgmtRequest, FlowMgmtResponse};
use crate::nh;
use crate::registry::{FlowEntryInfo, FlowRegistry};
use crate::route::{bridge, inet, BridgeRouteTree, InetRouteTree};
use crate::tree::{send_response, DepTree, OperRequest};
use crate::vn::{self, VnTree};
use crate::vrf::{self, RouteTableKind, VrfGateMap, VrfTree};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vswitch_flow_common::{work_queue, QueueConsumer, QueueError, WorkQueue};

/// Name of the task draining the request queue.
pub const FLOW_MGMT_TASK: &str = "flow-management";
/// Name of the task draining the response queue.
pub const FLOW_TABLE_TASK: &str = "flow-table";

/// Configuration for the manager.
#[derive(Debug, Clone)]
pub struct FlowMgmtConfig {
    /// Trace every flow ADD/DELETE processed.
    pub trace_flow_events: bool,
}

impl Default for FlowMgmtConfig {
    fn default() -> Self {
        Self {
            trace_flow_events: true,
        }
    }
}

impl FlowMgmtConfig {
    pub fn with_trace_flow_events(mut self, trace: bool) -> Self {
        self.trace_flow_events = trace;
        self
    }
}

/// Counters for manager activity.
#[derive(Debug, Clone, Default)]
pub struct FlowMgmtStats {
    pub flows_added: u64,
    pub flows_deleted: u64,
    pub db_adds: u64,
    pub db_changes: u64,
    pub db_deletes: u64,
    pub vrf_delete_retries: u64,
    pub ace_revaluates: u64,
}

/// Entry counts per dependency index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexSizes {
    pub interface: usize,
    pub acl: usize,
    pub ace: usize,
    pub vn: usize,
    pub nh: usize,
    pub inet4: usize,
    pub inet6: usize,
    pub bridge: usize,
    pub vrf: usize,
}

enum KeyOp {
    Add,
    Del,
}

/// Ordered lockstep walk of the old and new key sets.
///
/// Keys only in the new set are added; keys only in the old set are
/// deleted; keys in both are re-added, which refreshes state that depends
/// on the flow's mutable flags (e.g. VN counters on a direction change).
fn key_delta(old: &BTreeSet<DepKey>, new: &BTreeSet<DepKey>) -> Vec<(KeyOp, DepKey)> {
    let mut actions = Vec::with_capacity(old.len() + new.len());
    let mut new_it = new.iter().peekable();
    let mut old_it = old.iter().peekable();
    loop {
        match (new_it.peek(), old_it.peek()) {
            (Some(&&new_key), Some(&&old_key)) => {
                if new_key < old_key {
                    actions.push((KeyOp::Add, new_key));
                    new_it.next();
                } else if old_key < new_key {
                    actions.push((KeyOp::Del, old_key));
                    old_it.next();
                } else {
                    actions.push((KeyOp::Add, new_key));
                    new_it.next();
                    old_it.next();
                }
            }
            (Some(&&new_key), None) => {
                actions.push((KeyOp::Add, new_key));
                new_it.next();
            }
            (None, Some(&&old_key)) => {
                actions.push((KeyOp::Del, old_key));
                old_it.next();
            }
            (None, None) => break,
        }
    }
    actions
}

/// The coordinator. Owns all dependency state; consumes the request queue.
#[derive(Debug)]
pub struct FlowMgmtManager {
    config: FlowMgmtConfig,
    stats: FlowMgmtStats,
    registry: FlowRegistry,

    interface_tree: DepTree<InterfaceId>,
    acl_tree: DepTree<AclId>,
    ace_tree: DepTree<AceId>,
    nh_tree: DepTree<NhId>,
    vn_tree: Arc<Mutex<VnTree>>,
    inet4_tree: InetRouteTree,
    inet6_tree: InetRouteTree,
    bridge_tree: BridgeRouteTree,
    vrf_tree: VrfTree,

    requests: QueueConsumer<FlowMgmtRequest>,
    responses: WorkQueue<FlowMgmtResponse>,
}

impl FlowMgmtManager {
    /// Creates the manager together with its producer handle and the
    /// consumer end of the response queue.
    pub fn new(
        config: FlowMgmtConfig,
    ) -> (Self, FlowMgmtHandle, QueueConsumer<FlowMgmtResponse>) {
        let (request_queue, requests) = work_queue(FLOW_MGMT_TASK);
        let (responses, response_consumer) = work_queue(FLOW_TABLE_TASK);
        let vn_tree = Arc::new(Mutex::new(VnTree::new()));
        let vrf_tree = VrfTree::new();

        let handle = FlowMgmtHandle {
            requests: request_queue,
            vn_tree: Arc::clone(&vn_tree),
            vrf_gates: vrf_tree.gate_map(),
        };

        let manager = Self {
            config,
            stats: FlowMgmtStats::default(),
            registry: FlowRegistry::new(),
            interface_tree: DepTree::new("interface"),
            acl_tree: DepTree::new("acl"),
            ace_tree: DepTree::new("ace"),
            nh_tree: DepTree::new("nh"),
            vn_tree,
            inet4_tree: InetRouteTree::new("inet4"),
            inet6_tree: InetRouteTree::new("inet6"),
            bridge_tree: BridgeRouteTree::new(),
            vrf_tree,
            requests,
            responses,
        };

        (manager, handle, response_consumer)
    }

    pub fn stats(&self) -> &FlowMgmtStats {
        &self.stats
    }

    pub fn registry(&self) -> &FlowRegistry {
        &self.registry
    }

    pub fn index_sizes(&self) -> IndexSizes {
        IndexSizes {
            interface: self.interface_tree.len(),
            acl: self.acl_tree.len(),
            ace: self.ace_tree.len(),
            vn: self.lock_vn().len(),
            nh: self.nh_tree.len(),
            inet4: self.inet4_tree.len(),
            inet6: self.inet6_tree.len(),
            bridge: self.bridge_tree.len(),
            vrf: self.vrf_tree.len(),
        }
    }

    /// Current (ingress, egress) flow counts for a VN.
    pub fn vn_flow_counters(&self, vn: VnId) -> (u32, u32) {
        self.lock_vn().flow_counters(vn)
    }

    /// True if any of the three route indexes holds a key in `vrf`.
    pub fn has_vrf_flows(&self, vrf: VrfId) -> bool {
        self.inet4_tree.has_vrf_flows(vrf)
            || self.inet6_tree.has_vrf_flows(vrf)
            || self.bridge_tree.has_vrf_flows(vrf)
    }

    /// Consumes the request queue until it shuts down, then closes the
    /// response queue. Runs on the flow-management task.
    pub async fn run(mut self) {
        info!(task = FLOW_MGMT_TASK, "flow management running");
        while let Some(req) = self.requests.recv().await {
            self.process_request(req);
        }
        self.responses.shutdown();
        info!(task = FLOW_MGMT_TASK, "flow management stopped");
    }

    /// Handles one request. All index mutation funnels through here.
    pub fn process_request(&mut self, req: FlowMgmtRequest) {
        match req {
            FlowMgmtRequest::AddFlow(flow) => {
                self.stats.flows_added += 1;
                self.add_flow(flow);
            }
            FlowMgmtRequest::DeleteFlow(flow) => {
                self.stats.flows_deleted += 1;
                self.delete_flow(&flow);
                // The reference taken for this request must die on the
                // flow-table task, never inside an index mutation.
                send_response(&self.responses, FlowMgmtResponse::FreeFlowRef { flow });
            }
            FlowMgmtRequest::AddDbEntry(entry, gen_id) => {
                self.db_entry_event(DbEvent::Add, &entry, gen_id);
            }
            FlowMgmtRequest::ChangeDbEntry(entry, gen_id) => {
                self.db_entry_event(DbEvent::Change, &entry, gen_id);
            }
            FlowMgmtRequest::DeleteDbEntry(entry, gen_id) => {
                self.db_entry_event(DbEvent::Delete, &entry, gen_id);
            }
            FlowMgmtRequest::RetryDeleteVrf(vrf) => {
                self.retry_vrf_delete(vrf);
            }
            FlowMgmtRequest::RevaluateAce(ace) => {
                self.revaluate_ace(ace);
            }
        }
    }

    fn lock_vn(&self) -> std::sync::MutexGuard<'_, VnTree> {
        self.vn_tree.lock().expect("vn tree lock poisoned")
    }

    /// Applies the delta between the flow's previous and current key sets.
    fn add_flow(&mut self, flow: FlowRef) {
        let (new_keys, local, ingress) = {
            let data = flow.data();
            let mut keys = BTreeSet::new();
            acl::extract_keys(&data, &mut keys);
            acl::extract_ace_keys(&data, &mut keys);
            intf::extract_keys(&data, &mut keys);
            vn::extract_keys(&data, &mut keys);
            inet::extract_keys(&data, &mut keys);
            bridge::extract_keys(&data, &mut keys);
            nh::extract_keys(&data, &mut keys);
            (keys, data.local_flow, data.ingress)
        };
        if self.config.trace_flow_events {
            debug!(flow = %flow.id(), keys = new_keys.len(), "flow add");
        }

        let mut info = self.registry.take_or_insert(&flow);
        info.count += 1;

        // The memoized flags at the start of the delta are the contribution
        // currently recorded in VN counters; every VN arm below reconciles
        // against them, whichever order the walk visits keys in.
        let old_flags = (info.local_flow, info.ingress);
        for (op, key) in key_delta(&info.keys, &new_keys) {
            match op {
                KeyOp::Add => {
                    self.add_dep_key(&flow, &mut info, &key, old_flags, (local, ingress))
                }
                KeyOp::Del => {
                    self.delete_dep_key(&flow, &mut info, &key, old_flags, (local, ingress))
                }
            }
        }

        self.registry.put(flow.id(), info);
    }

    /// Drains every key the flow holds and drops its registry info.
    fn delete_flow(&mut self, flow: &FlowRef) {
        if self.config.trace_flow_events {
            debug!(flow = %flow.id(), "flow delete");
        }
        let Some(mut info) = self.registry.take(flow.id()) else {
            return;
        };
        info.count += 1;

        let (local, ingress) = {
            let data = flow.data();
            (data.local_flow, data.ingress)
        };

        let old_flags = (info.local_flow, info.ingress);
        let keys: Vec<DepKey> = info.keys.iter().copied().collect();
        for key in keys {
            self.delete_dep_key(flow, &mut info, &key, old_flags, (local, ingress));
        }
        assert!(
            info.keys.is_empty(),
            "flow {} still holds keys after drain",
            flow.id()
        );
    }

    /// Records one dependency: clones the key into the flow's set and adds
    /// the flow to the keyed index. `old` is the flow's memoized flag pair
    /// from before the delta; `now` its current flags, read under its mutex
    /// during extraction.
    fn add_dep_key(
        &mut self,
        flow: &FlowRef,
        info: &mut FlowEntryInfo,
        key: &DepKey,
        old: (bool, bool),
        now: (bool, bool),
    ) {
        info.keys.insert(*key);
        match key {
            DepKey::Interface(id) => {
                self.interface_tree.add(id, flow.id());
            }
            DepKey::Acl(id) => {
                self.acl_tree.add(id, flow.id());
            }
            DepKey::Ace(id) => {
                self.ace_tree.add(id, flow.id());
            }
            DepKey::Vn(id) => {
                let mut vn = self.vn_tree.lock().expect("vn tree lock poisoned");
                let new_flow = vn.add(*id, flow.id());
                if let Some(counters) = vn.counters_mut(*id) {
                    counters.update_on_add(new_flow, old.0, old.1, now.0, now.1);
                }
                info.local_flow = now.0;
                info.ingress = now.1;
            }
            DepKey::Inet4(k) => {
                self.inet4_tree.add(k, flow.id());
            }
            DepKey::Inet6(k) => {
                self.inet6_tree.add(k, flow.id());
            }
            DepKey::Bridge(k) => {
                self.bridge_tree.add(k, flow.id());
            }
            DepKey::Nh(id) => {
                self.nh_tree.add(id, flow.id());
            }
            DepKey::Vrf(_) | DepKey::Vm(_) => {
                panic!("unexpected {} key in per-flow key set", key.kind_name());
            }
        }
    }

    /// Drops one dependency, the inverse of [`FlowMgmtManager::add_dep_key`].
    /// Dropping a route key may make the owning VRF reclaimable.
    fn delete_dep_key(
        &mut self,
        flow: &FlowRef,
        info: &mut FlowEntryInfo,
        key: &DepKey,
        old: (bool, bool),
        now: (bool, bool),
    ) {
        assert!(
            info.keys.remove(key),
            "flow {} does not hold key {}",
            flow.id(),
            key
        );
        match key {
            DepKey::Interface(id) => {
                self.interface_tree.delete(id, flow.id(), &self.responses);
            }
            DepKey::Acl(id) => {
                self.acl_tree.delete(id, flow.id(), &self.responses);
            }
            DepKey::Ace(id) => {
                self.ace_tree.delete(id, flow.id(), &self.responses);
            }
            DepKey::Vn(id) => {
                let mut vn = self.vn_tree.lock().expect("vn tree lock poisoned");
                vn.delete(*id, flow.id(), &self.responses);
                if let Some(counters) = vn.counters_mut(*id) {
                    counters.update_on_del(old.0, old.1);
                }
                info.local_flow = now.0;
                info.ingress = now.1;
            }
            DepKey::Inet4(k) => {
                self.inet4_tree.delete(k, flow.id(), &self.responses);
                self.retry_vrf_delete(k.vrf_id);
            }
            DepKey::Inet6(k) => {
                self.inet6_tree.delete(k, flow.id(), &self.responses);
                self.retry_vrf_delete(k.vrf_id);
            }
            DepKey::Bridge(k) => {
                self.bridge_tree.delete(k, flow.id(), &self.responses);
                self.retry_vrf_delete(k.vrf_id);
            }
            DepKey::Nh(id) => {
                self.nh_tree.delete(id, flow.id(), &self.responses);
            }
            DepKey::Vrf(_) | DepKey::Vm(_) => {
                panic!("unexpected {} key in per-flow key set", key.kind_name());
            }
        }
    }

    /// Dispatches a DB notification to the index for the object's kind.
    fn db_entry_event(&mut self, event: DbEvent, entry: &DbEntryRef, gen_id: GenId) {
        match event {
            DbEvent::Add => self.stats.db_adds += 1,
            DbEvent::Change => self.stats.db_changes += 1,
            DbEvent::Delete => self.stats.db_deletes += 1,
        }
        debug!(object = %entry, event = ?event, gen_id, "db event");

        let req = OperRequest::new(event, entry, gen_id);
        match &**entry {
            DbObject::Interface(i) => match event {
                DbEvent::Add => {
                    self.interface_tree
                        .oper_add(&req, &i.id, &self.registry, &self.responses)
                }
                DbEvent::Change => {
                    self.interface_tree
                        .oper_change(&req, &i.id, &self.registry, &self.responses)
                }
                DbEvent::Delete => {
                    self.interface_tree
                        .oper_delete(&req, &i.id, true, &self.registry, &self.responses);
                }
            },
            DbObject::Acl(a) => match event {
                DbEvent::Add => {
                    self.acl_tree
                        .oper_add(&req, &a.id, &self.registry, &self.responses)
                }
                DbEvent::Change => {
                    self.acl_tree
                        .oper_change(&req, &a.id, &self.registry, &self.responses)
                }
                DbEvent::Delete => {
                    self.acl_tree
                        .oper_delete(&req, &a.id, true, &self.registry, &self.responses);
                }
            },
            DbObject::Ace(a) => match event {
                DbEvent::Add => {
                    self.ace_tree
                        .oper_add(&req, &a.id, &self.registry, &self.responses)
                }
                DbEvent::Change => {
                    self.ace_tree
                        .oper_change(&req, &a.id, &self.registry, &self.responses)
                }
                DbEvent::Delete => {
                    // ACE ids own no object of their own; the generic path
                    // reclaims the entry but emits no FREE.
                    self.ace_tree
                        .oper_delete(&req, &a.id, true, &self.registry, &self.responses);
                }
            },
            DbObject::NextHop(n) => match event {
                DbEvent::Add => {
                    self.nh_tree
                        .oper_add(&req, &n.id, &self.registry, &self.responses)
                }
                DbEvent::Change => {
                    self.nh_tree
                        .oper_change(&req, &n.id, &self.registry, &self.responses)
                }
                DbEvent::Delete => {
                    self.nh_tree
                        .oper_delete(&req, &n.id, true, &self.registry, &self.responses);
                }
            },
            DbObject::VirtualNetwork(v) => {
                let mut vn = self.vn_tree.lock().expect("vn tree lock poisoned");
                match event {
                    DbEvent::Add => vn.oper_add(&req, v.id, &self.registry, &self.responses),
                    DbEvent::Change => vn.oper_change(&req, v.id, &self.registry, &self.responses),
                    DbEvent::Delete => {
                        vn.oper_delete(&req, v.id, &self.registry, &self.responses);
                    }
                }
            }
            DbObject::InetRoute(r) => {
                let key = InetRouteKey::new(r.vrf_id, *r.prefix.address(), r.prefix.prefix_len());
                {
                    let tree = if r.prefix.is_ipv4() {
                        &mut self.inet4_tree
                    } else {
                        &mut self.inet6_tree
                    };
                    match event {
                        DbEvent::Add => tree.oper_add(&req, &key, &self.registry, &self.responses),
                        DbEvent::Change => {
                            tree.oper_change(&req, &key, &self.registry, &self.responses)
                        }
                        DbEvent::Delete => {
                            tree.oper_delete(&req, &key, &self.registry, &self.responses);
                        }
                    }
                }
                if event == DbEvent::Delete {
                    self.retry_vrf_delete(r.vrf_id);
                }
            }
            DbObject::BridgeRoute(b) => {
                let key = BridgeRouteKey {
                    vrf_id: b.vrf_id,
                    mac: b.mac,
                };
                match event {
                    DbEvent::Add => {
                        self.bridge_tree
                            .oper_add(&req, &key, &self.registry, &self.responses)
                    }
                    DbEvent::Change => {
                        self.bridge_tree
                            .oper_change(&req, &key, &self.registry, &self.responses)
                    }
                    DbEvent::Delete => {
                        self.bridge_tree
                            .oper_delete(&req, &key, &self.registry, &self.responses);
                    }
                }
                if event == DbEvent::Delete {
                    self.retry_vrf_delete(b.vrf_id);
                }
            }
            DbObject::Vrf(v) => match event {
                DbEvent::Add => {
                    self.vrf_tree
                        .oper_add(&req, v.id, &self.registry, &self.responses)
                }
                DbEvent::Change => {
                    self.vrf_tree
                        .oper_change(&req, v.id, &self.registry, &self.responses)
                }
                DbEvent::Delete => {
                    let flows_gone = !self.has_vrf_flows(v.id);
                    self.vrf_tree.oper_delete(
                        &req,
                        v.id,
                        flows_gone,
                        &self.registry,
                        &self.responses,
                    );
                }
            },
        }
    }

    /// Re-checks whether a VRF became reclaimable. Reached from every
    /// route-key drop and from explicit retry requests.
    fn retry_vrf_delete(&mut self, vrf: VrfId) {
        self.stats.vrf_delete_retries += 1;
        let flows_gone = !self.has_vrf_flows(vrf);
        self.vrf_tree.retry_delete(vrf, flows_gone, &self.responses);
    }

    /// Re-fires evaluation of every flow that matched `ace`, leaving the
    /// entry's lifecycle state alone.
    fn revaluate_ace(&mut self, ace: AceId) {
        self.stats.ace_revaluates += 1;
        self.ace_tree.revaluate(&ace, &self.registry, &self.responses);
    }
}

/// Cloneable producer handle to the manager.
///
/// Everything here is callable from any task: requests are posted to the
/// manager's queue, VN counters are read under the VN mutex, and
/// managed-delete signals only flip an atomic slot before posting a retry.
#[derive(Clone)]
pub struct FlowMgmtHandle {
    requests: WorkQueue<FlowMgmtRequest>,
    vn_tree: Arc<Mutex<VnTree>>,
    vrf_gates: VrfGateMap,
}

impl FlowMgmtHandle {
    pub fn add_flow(&self, flow: FlowRef) -> Result<(), QueueError> {
        self.requests.enqueue(FlowMgmtRequest::AddFlow(flow))
    }

    pub fn delete_flow(&self, flow: FlowRef) -> Result<(), QueueError> {
        self.requests.enqueue(FlowMgmtRequest::DeleteFlow(flow))
    }

    pub fn add_db(&self, entry: DbEntryRef, gen_id: GenId) -> Result<(), QueueError> {
        self.requests
            .enqueue(FlowMgmtRequest::AddDbEntry(entry, gen_id))
    }

    pub fn change_db(&self, entry: DbEntryRef, gen_id: GenId) -> Result<(), QueueError> {
        self.requests
            .enqueue(FlowMgmtRequest::ChangeDbEntry(entry, gen_id))
    }

    pub fn delete_db(&self, entry: DbEntryRef, gen_id: GenId) -> Result<(), QueueError> {
        self.requests
            .enqueue(FlowMgmtRequest::DeleteDbEntry(entry, gen_id))
    }

    pub fn retry_vrf_delete(&self, vrf: VrfId) -> Result<(), QueueError> {
        self.requests.enqueue(FlowMgmtRequest::RetryDeleteVrf(vrf))
    }

    /// Re-fires evaluation of every flow that matched the given ACL entry.
    pub fn revaluate_ace(&self, ace: AceId) -> Result<(), QueueError> {
        self.requests.enqueue(FlowMgmtRequest::RevaluateAce(ace))
    }

    /// A route table of `vrf` signalled managed delete. Called on the
    /// route table's own task: flips the gate slot and posts a retry.
    pub fn route_table_managed_delete(
        &self,
        vrf: VrfId,
        table: RouteTableKind,
    ) -> Result<(), QueueError> {
        vrf::signal_managed_delete(&self.vrf_gates, vrf, table);
        self.requests.enqueue(FlowMgmtRequest::RetryDeleteVrf(vrf))
    }

    /// Current (ingress, egress) flow counts for a VN.
    pub fn vn_flow_counters(&self, vn: VnId) -> (u32, u32) {
        self.vn_tree
            .lock()
            .expect("vn tree lock poisoned")
            .flow_counters(vn)
    }

    /// Stops accepting requests. The manager drains what was already
    /// posted and then closes the response queue.
    pub fn shutdown(&self) {
        self.requests.shutdown();
    }
}

/// Consumer of REVALUATE_* and DELETE_DBENTRY responses (the flow engine).
pub trait FlowEventHandler: Send + Sync {
    fn handle_flow_event(&self, resp: &FlowMgmtResponse);
}

/// Consumer of FREE_DBENTRY responses (the DB client).
pub trait DbFreeHandler: Send + Sync {
    fn free_db_entry(&self, entry: DbEntryRef, gen_id: GenId);
}

/// Single consumer of the response queue, running on the flow-table task.
pub struct ResponseDispatcher {
    responses: QueueConsumer<FlowMgmtResponse>,
    flow_handler: Arc<dyn FlowEventHandler>,
    db_handler: Arc<dyn DbFreeHandler>,
}

impl ResponseDispatcher {
    pub fn new(
        responses: QueueConsumer<FlowMgmtResponse>,
        flow_handler: Arc<dyn FlowEventHandler>,
        db_handler: Arc<dyn DbFreeHandler>,
    ) -> Self {
        Self {
            responses,
            flow_handler,
            db_handler,
        }
    }

    pub async fn run(mut self) {
        info!(task = FLOW_TABLE_TASK, "response dispatch running");
        while let Some(resp) = self.responses.recv().await {
            self.dispatch(resp);
        }
        info!(task = FLOW_TABLE_TASK, "response dispatch stopped");
    }

    pub fn dispatch(&self, resp: FlowMgmtResponse) {
        match resp {
            FlowMgmtResponse::FreeFlowRef { flow } => {
                debug!(flow = %flow.id(), "flow reference released");
                drop(flow);
            }
            FlowMgmtResponse::FreeDbEntry { db_entry, gen_id } => match db_entry.upgrade() {
                Some(entry) => self.db_handler.free_db_entry(entry, gen_id),
                None => warn!(gen_id, "FREE for an already-released DB object"),
            },
            other => self.flow_handler.handle_flow_event(&other),
        }
    }
}

/// The manager and its two pump tasks, wired onto the tokio runtime.
pub struct FlowMgmtRuntime {
    handle: FlowMgmtHandle,
    mgmt_task: JoinHandle<()>,
    response_task: JoinHandle<()>,
}

impl FlowMgmtRuntime {
    pub fn spawn(
        config: FlowMgmtConfig,
        flow_handler: Arc<dyn FlowEventHandler>,
        db_handler: Arc<dyn DbFreeHandler>,
    ) -> Self {
        let (manager, handle, responses) = FlowMgmtManager::new(config);
        let dispatcher = ResponseDispatcher::new(responses, flow_handler, db_handler);
        let mgmt_task = tokio::spawn(manager.run());
        let response_task = tokio::spawn(dispatcher.run());
        Self {
            handle,
            mgmt_task,
            response_task,
        }
    }

    pub fn handle(&self) -> &FlowMgmtHandle {
        &self.handle
    }

    /// Closes the request queue and waits for both tasks to drain.
    pub async fn shutdown(self) {
        self.handle.shutdown();
        let _ = self.mgmt_task.await;
        let _ = self.response_task.await;
    }
}
