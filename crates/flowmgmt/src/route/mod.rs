//! Route dependency indexes.
//!
//! Routes are the only keys whose liveness feeds back into VRF teardown:
//! whenever a route key is dropped or its object deleted, the manager
//! re-checks whether the owning VRF became reclaimable.

pub(crate) mod bridge;
pub(crate) mod inet;
pub(crate) mod lpm;

pub use bridge::BridgeRouteTree;
pub use inet::InetRouteTree;
