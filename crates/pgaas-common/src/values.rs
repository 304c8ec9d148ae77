//! Configuration-tree merge for Helm values
//!
//! A configuration tree is a `serde_json` object: a tagged recursive value of
//! maps, sequences, scalars and null. [`merge`] lays one tree on top of
//! another with the exact rules below; [`values_hash`] fingerprints a tree so
//! changes to applied values can be detected across reconciles.

use serde_json::map::Entry;
use serde_json::{Map, Value};

/// A configuration tree
pub type ConfigTree = Map<String, Value>;

/// Merge `source` on top of `destination` in place.
///
/// For each key of `source`:
/// - absent in `destination`: inserted as is, including `null`
/// - `null`: overwrites whatever is there
/// - scalar or sequence: overwrites
/// - empty map: replaces the destination value with an empty map
/// - non-empty map over a map: merged recursively, keys missing from
///   `source` are kept
/// - non-empty map over a scalar or sequence: replaces it
///
/// The empty-map rule differs from common deep-merge libraries, where an
/// empty map is a no-op. It is kept as is; changing it would alter the
/// values of every existing release on its next reconcile.
pub fn merge(source: &ConfigTree, destination: &mut ConfigTree) {
    for (key, src) in source {
        match destination.entry(key.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(src.clone());
            }
            Entry::Occupied(mut slot) => merge_value(src, slot.get_mut()),
        }
    }
}

fn merge_value(src: &Value, dst: &mut Value) {
    match src {
        Value::Object(src_map) if src_map.is_empty() => *dst = Value::Object(Map::new()),
        Value::Object(src_map) => match dst {
            Value::Object(dst_map) => merge(src_map, dst_map),
            _ => *dst = src.clone(),
        },
        _ => *dst = src.clone(),
    }
}

/// Parse a configuration tree from a JSON or YAML-compatible JSON value.
///
/// Anything other than a map (including `null`) is a serialization error.
pub fn tree_from_value(value: Value) -> crate::Result<ConfigTree> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(ConfigTree::new()),
        other => Err(crate::Error::serialization(format!(
            "expected a map of values, got {}",
            kind_name(&other)
        ))),
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "map",
    }
}

/// Stable 16-char hex fingerprint of a configuration tree.
///
/// Keys are serialized in sorted order so equal trees always hash equally.
pub fn values_hash(values: &ConfigTree) -> crate::Result<String> {
    use aws_lc_rs::digest;
    use std::fmt::Write;

    let canonical = serde_json::to_string(&sorted(&Value::Object(values.clone())))?;
    let hash = digest::digest(&digest::SHA256, canonical.as_bytes());
    Ok(hash.as_ref()[..8]
        .iter()
        .fold(String::with_capacity(16), |mut s, b| {
            let _ = write!(s, "{:02x}", b);
            s
        }))
}

fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), sorted(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn tree(v: Value) -> ConfigTree {
        tree_from_value(v).unwrap()
    }

    #[rstest]
    #[case::absence_insertion(json!({"a": 1}), json!({}), json!({"a": 1}))]
    #[case::absent_null_inserted(json!({"a": null}), json!({}), json!({"a": null}))]
    #[case::null_overwrite(json!({"a": null}), json!({"a": {"b": 1}}), json!({"a": null}))]
    #[case::empty_object_wins(json!({"a": {}}), json!({"a": {"b": 1}}), json!({"a": {}}))]
    #[case::recursive_union(json!({"a": {"c": 2}}), json!({"a": {"b": 1}}), json!({"a": {"b": 1, "c": 2}}))]
    #[case::type_mismatch_overwrite(json!({"a": {"c": 2}}), json!({"a": 1}), json!({"a": {"c": 2}}))]
    #[case::sequence_overwrites(json!({"a": [3]}), json!({"a": [1, 2]}), json!({"a": [3]}))]
    #[case::scalar_over_map(json!({"a": "x"}), json!({"a": {"b": 1}}), json!({"a": "x"}))]
    fn merge_rules(#[case] source: Value, #[case] destination: Value, #[case] expected: Value) {
        let mut dst = tree(destination);
        merge(&tree(source), &mut dst);
        assert_eq!(Value::Object(dst), expected);
    }

    #[test]
    fn deep_merge_preserves_unrelated_keys() {
        let mut dst = tree(json!({
            "image": {"tag": "14.5", "registry": "docker.io"},
            "primary": {"resources": {"limits": {"memory": "1Gi", "cpu": "1"}}}
        }));
        merge(
            &tree(json!({"primary": {"resources": {"limits": {"memory": "2Gi"}}}})),
            &mut dst,
        );
        assert_eq!(
            Value::Object(dst),
            json!({
                "image": {"tag": "14.5", "registry": "docker.io"},
                "primary": {"resources": {"limits": {"memory": "2Gi", "cpu": "1"}}}
            })
        );
    }

    #[test]
    fn remerge_reasserts_after_external_change() {
        let source = tree(json!({"auth": {"database": "db"}}));
        let mut dst = ConfigTree::new();
        merge(&source, &mut dst);
        dst["auth"]["database"] = json!("tampered");
        merge(&source, &mut dst);
        assert_eq!(dst["auth"]["database"], "db");
    }

    #[test]
    fn non_map_tree_is_rejected() {
        assert!(tree_from_value(json!([1, 2])).is_err());
        assert!(tree_from_value(json!(null)).unwrap().is_empty());
    }

    #[test]
    fn hash_is_stable_and_order_independent() {
        let a = tree(json!({"x": 1, "y": {"b": 2, "a": 1}}));
        let mut b = ConfigTree::new();
        b.insert("y".to_string(), json!({"a": 1, "b": 2}));
        b.insert("x".to_string(), json!(1));

        let ha = values_hash(&a).unwrap();
        assert_eq!(ha.len(), 16);
        assert_eq!(ha, values_hash(&b).unwrap());
        assert_ne!(ha, values_hash(&tree(json!({"x": 2}))).unwrap());
    }
}
