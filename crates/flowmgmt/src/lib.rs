//! Flow dependency manager for the virtual-switch agent.
//!
//! The agent installs per-packet flows derived from operational objects it
//! learns from the control plane: interfaces, virtual networks, ACLs,
//! next-hops, unicast and bridge routes, and VRFs. When any such object is
//! added, changed or removed, every flow depending on it must be
//! re-evaluated or invalidated, and an object must not be physically freed
//! while flows still reference it. This crate is the cross-indexing and
//! lifecycle-coordination core that makes that correct.
//!
//! # Architecture
//!
//! ```text
//! flow engine ──┐                        ┌──> flow engine (revaluate/delete)
//!               ├──> [request queue] ──> [FlowMgmtManager] ──> [response queue]
//! DB client  ───┘    (flow-management task)   │                (flow-table task)
//!                                             │                       │
//!                             registry + dependency indexes           └──> DB client (free)
//! ```
//!
//! All index state is owned by [`FlowMgmtManager`] and mutated only on the
//! flow-management task; the VN index additionally takes a mutex so its
//! flow counters can be queried from anywhere. Deferred deletion keeps an
//! object's entry alive until its DELETE was seen *and* the last dependent
//! flow is gone, at which point a FREE response releases the object back
//! to the DB client with the DELETE's generation tag.
//!
//! # Key components
//!
//! - [`FlowMgmtManager`]: request consumer owning all indexes
//! - [`FlowMgmtHandle`]: cloneable producer API for the flow engine and
//!   DB client
//! - [`ResponseDispatcher`]: response consumer feeding the
//!   [`FlowEventHandler`] and [`DbFreeHandler`] seams
//! - [`FlowMgmtRuntime`]: both pumps wired onto tokio tasks

mod acl;
mod db;
mod flow;
mod intf;
mod key;
mod manager;
mod message;
mod nh;
mod registry;
mod route;
mod tree;
mod vn;
mod vrf;

pub use db::{
    AceId, AceInfo, AclId, AclInfo, BridgeRouteInfo, DbEntryRef, DbObject, GenId, InetRouteInfo,
    InterfaceId, InterfaceInfo, NhId, NhInfo, VmId, VnId, VnInfo, VrfId, VrfInfo, WeakDbRef,
};
pub use flow::{FlowData, FlowEntry, FlowId, FlowMatchData, FlowRef, MatchAcl};
pub use key::{BridgeRouteKey, DepKey, InetRouteKey};
pub use manager::{
    DbFreeHandler, FlowEventHandler, FlowMgmtConfig, FlowMgmtHandle, FlowMgmtManager,
    FlowMgmtRuntime, FlowMgmtStats, IndexSizes, ResponseDispatcher, FLOW_MGMT_TASK,
    FLOW_TABLE_TASK,
};
pub use message::{DbEvent, FlowMgmtRequest, FlowMgmtResponse};
pub use registry::{FlowEntryInfo, FlowRegistry};
pub use route::{BridgeRouteTree, InetRouteTree};
pub use tree::{DepEntry, DepTree, EntryExt, IndexKey, OperState};
pub use vn::{VnCounters, VnTree};
pub use vrf::{RouteTableKind, VrfTableGates, VrfTree};

pub use vswitch_flow_common::{QueueConsumer, QueueError, WorkQueue};
