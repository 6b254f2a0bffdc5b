//! Next-hop dependency extraction.

use crate::flow::FlowData;
use crate::key::DepKey;
use std::collections::BTreeSet;

pub(crate) fn extract_keys(data: &FlowData, keys: &mut BTreeSet<DepKey>) {
    if let Some(nh) = data.nh {
        keys.insert(DepKey::Nh(nh));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NhId;

    #[test]
    fn test_extract() {
        let mut keys = BTreeSet::new();
        extract_keys(&FlowData::default(), &mut keys);
        assert!(keys.is_empty());

        let data = FlowData::default().with_nh(NhId(12));
        extract_keys(&data, &mut keys);
        assert!(keys.contains(&DepKey::Nh(NhId(12))));
    }
}
