//! Selector matching for labels and annotations

use std::collections::BTreeMap;

use crate::crd::{Selector, SelectorOperator, SelectorRequirement};

/// Whether a label or annotation map satisfies a selector.
///
/// An empty selector matches everything, including objects with no
/// labels at all.
pub fn matches(selector: &Selector, values: Option<&BTreeMap<String, String>>) -> bool {
    let empty = BTreeMap::new();
    let values = values.unwrap_or(&empty);

    selector
        .match_labels
        .iter()
        .all(|(k, v)| values.get(k) == Some(v))
        && selector
            .match_expressions
            .iter()
            .all(|req| requirement_holds(req, values))
}

fn requirement_holds(req: &SelectorRequirement, values: &BTreeMap<String, String>) -> bool {
    let value = values.get(&req.key);
    match req.operator {
        SelectorOperator::In => value.is_some_and(|v| req.values.contains(v)),
        SelectorOperator::NotIn => value.map_or(true, |v| !req.values.contains(v)),
        SelectorOperator::Exists => value.is_some(),
        SelectorOperator::DoesNotExist => value.is_none(),
    }
}
