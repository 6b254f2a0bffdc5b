//! Interface dependency extraction.
//!
//! A flow depends on at most one interface; the index itself is the plain
//! generic tree.

use crate::flow::FlowData;
use crate::key::DepKey;
use std::collections::BTreeSet;

pub(crate) fn extract_keys(data: &FlowData, keys: &mut BTreeSet<DepKey>) {
    if let Some(intf) = data.intf {
        keys.insert(DepKey::Interface(intf));
    }
}
