//! Request and response messages.
//!
//! Requests flow from the flow engine and the DB client into the manager's
//! request queue; responses flow back out on the response queue, consumed
//! on the flow-table task.

use crate::db::{AceId, DbEntryRef, GenId, VrfId, WeakDbRef};
use crate::flow::FlowRef;
use crate::key::DepKey;

/// Kind of DB-entry notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbEvent {
    Add,
    Change,
    Delete,
}

/// A message posted to the manager's request queue.
#[derive(Debug, Clone)]
pub enum FlowMgmtRequest {
    /// A flow was created or its match data changed.
    AddFlow(FlowRef),
    /// A flow is being torn down.
    DeleteFlow(FlowRef),
    /// A DB object was added.
    AddDbEntry(DbEntryRef, GenId),
    /// A DB object changed.
    ChangeDbEntry(DbEntryRef, GenId),
    /// A DB object was deleted; FREE is owed once no flow references it.
    DeleteDbEntry(DbEntryRef, GenId),
    /// A late liveness change made the VRF a teardown candidate again.
    RetryDeleteVrf(VrfId),
    /// Re-fire evaluation of every flow that matched the given ACL entry.
    RevaluateAce(AceId),
}

impl FlowMgmtRequest {
    pub fn kind_name(&self) -> &'static str {
        match self {
            FlowMgmtRequest::AddFlow(_) => "add-flow",
            FlowMgmtRequest::DeleteFlow(_) => "delete-flow",
            FlowMgmtRequest::AddDbEntry(..) => "add-dbentry",
            FlowMgmtRequest::ChangeDbEntry(..) => "change-dbentry",
            FlowMgmtRequest::DeleteDbEntry(..) => "delete-dbentry",
            FlowMgmtRequest::RetryDeleteVrf(_) => "retry-delete-vrf",
            FlowMgmtRequest::RevaluateAce(_) => "revaluate-ace",
        }
    }
}

/// A message posted to the response queue.
///
/// DB references on responses are weak: the DB client owns the objects,
/// and validity is checked when the response is dispatched.
#[derive(Debug, Clone)]
pub enum FlowMgmtResponse {
    /// Re-evaluate a flow because the keyed object changed and no live DB
    /// reference is known for it.
    RevaluateFlow {
        flow: FlowRef,
        cause: DepKey,
        db_entry: WeakDbRef,
    },
    /// Re-evaluate a flow against an added/changed DB object.
    RevaluateDbEntry {
        flow: FlowRef,
        cause: DepKey,
        db_entry: WeakDbRef,
    },
    /// A DB object the flow depends on was deleted.
    DeleteDbEntry {
        flow: FlowRef,
        cause: DepKey,
        db_entry: WeakDbRef,
    },
    /// The deleted DB object has no remaining flow references; the DB
    /// client may physically free it. `gen_id` echoes the last DELETE.
    FreeDbEntry { db_entry: WeakDbRef, gen_id: GenId },
    /// Releases the flow reference taken for a DELETE_FLOW request, so the
    /// reference dies on the flow-table task rather than inside an index
    /// mutation.
    FreeFlowRef { flow: FlowRef },
}

impl FlowMgmtResponse {
    pub fn kind_name(&self) -> &'static str {
        match self {
            FlowMgmtResponse::RevaluateFlow { .. } => "revaluate-flow",
            FlowMgmtResponse::RevaluateDbEntry { .. } => "revaluate-dbentry",
            FlowMgmtResponse::DeleteDbEntry { .. } => "delete-dbentry",
            FlowMgmtResponse::FreeDbEntry { .. } => "free-dbentry",
            FlowMgmtResponse::FreeFlowRef { .. } => "free-flow-ref",
        }
    }
}
