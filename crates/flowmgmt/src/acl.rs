//! ACL and ACE-id dependency extraction.
//!
//! A flow depends on every ACL across its nine match lists, and on every
//! ACE id it matched within them. The ACE index gives revaluation fan-out
//! at per-ACL-entry granularity; no FREE is ever owed for an ACE.

use crate::flow::FlowData;
use crate::key::DepKey;
use std::collections::BTreeSet;

pub(crate) fn extract_keys(data: &FlowData, keys: &mut BTreeSet<DepKey>) {
    for list in data.match_data.lists() {
        for matched in list {
            keys.insert(DepKey::Acl(matched.acl));
        }
    }
}

/// ACE-id keys for every matched ACL entry across all nine lists.
pub(crate) fn extract_ace_keys(data: &FlowData, keys: &mut BTreeSet<DepKey>) {
    for list in data.match_data.lists() {
        for matched in list {
            for ace in &matched.ace_ids {
                keys.insert(DepKey::Ace(*ace));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{AceId, AclId};
    use crate::flow::MatchAcl;

    fn flow_with_lists() -> FlowData {
        let mut data = FlowData::default();
        data.match_data.policy.push(MatchAcl::new(AclId(1)).with_aces([AceId(10), AceId(11)]));
        data.match_data.sg.push(MatchAcl::new(AclId(2)).with_aces([AceId(20)]));
        data.match_data.out_mirror.push(MatchAcl::new(AclId(3)));
        // The same ACL matched twice collapses to one key.
        data.match_data.vrf_assign.push(MatchAcl::new(AclId(1)));
        data
    }

    #[test]
    fn test_extract_walks_all_lists() {
        let mut keys = BTreeSet::new();
        extract_keys(&flow_with_lists(), &mut keys);
        assert_eq!(keys.len(), 3);
        assert!(keys.contains(&DepKey::Acl(AclId(1))));
        assert!(keys.contains(&DepKey::Acl(AclId(2))));
        assert!(keys.contains(&DepKey::Acl(AclId(3))));
    }

    #[test]
    fn test_extract_ace_keys() {
        let mut keys = BTreeSet::new();
        extract_ace_keys(&flow_with_lists(), &mut keys);
        assert_eq!(keys.len(), 3);
        assert!(keys.contains(&DepKey::Ace(AceId(10))));
        assert!(keys.contains(&DepKey::Ace(AceId(11))));
        assert!(keys.contains(&DepKey::Ace(AceId(20))));
    }
}
