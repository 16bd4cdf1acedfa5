//! PropertyMap: the key-value store on entities and relations.

use std::collections::BTreeMap;
use super::Value;

/// A map of property names to scalar values.
///
/// Ordered so that serialized facts and journal lines are deterministic.
pub type PropertyMap = BTreeMap<String, Value>;

/// Merge `incoming` over `base`: keys present in `incoming` win, keys only
/// in `base` are kept.
pub fn merge_properties(base: &mut PropertyMap, incoming: &PropertyMap) {
    for (k, v) in incoming {
        base.insert(k.clone(), v.clone());
    }
}
