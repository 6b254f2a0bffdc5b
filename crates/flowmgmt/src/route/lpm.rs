//! Longest-prefix-match side structure of the INET route indexes.

use crate::db::VrfId;
use crate::key::InetRouteKey;
use std::collections::BTreeSet;
use vswitch_types::IpAddress;

/// Ordered set of (vrf, subnet, plen) known to one INET index, supporting
/// longest-prefix lookup within a VRF.
#[derive(Debug, Default)]
pub(crate) struct LpmSet {
    routes: BTreeSet<(VrfId, IpAddress, u8)>,
}

impl LpmSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.routes.len()
    }

    pub(crate) fn insert(&mut self, key: &InetRouteKey) {
        self.routes.insert((key.vrf_id, key.ip, key.plen));
    }

    pub(crate) fn remove(&mut self, key: &InetRouteKey) {
        self.routes.remove(&(key.vrf_id, key.ip, key.plen));
    }

    /// The longest prefix no longer than `plen` matching `ip` within
    /// `vrf`, probing prefix lengths from `plen` down to 0.
    pub(crate) fn lookup(&self, vrf: VrfId, ip: IpAddress, plen: u8) -> Option<InetRouteKey> {
        for p in (0..=plen).rev() {
            let masked = ip.subnet(p);
            if self.routes.contains(&(vrf, masked, p)) {
                return Some(InetRouteKey {
                    vrf_id: vrf,
                    ip: masked,
                    plen: p,
                });
            }
        }
        None
    }
}
