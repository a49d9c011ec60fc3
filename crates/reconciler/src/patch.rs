//! JSON merge patches (RFC 7386) restricted to a record's status.

use converge_core::{Error, Result};
use serde_json::{Map, Value};

use crate::record::Record;

/// Merge patch against the `status` of one record.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusPatch {
    /// `{"status": {...}}`; never carries spec or metadata keys.
    pub patch: Value,
    /// When set, the store rejects the patch unless the stored record is
    /// still at this resource version.
    pub precondition: Option<u64>,
}

impl StatusPatch {
    /// Diff the status of `modified` against `original`. `None` when the
    /// statuses are identical.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if either record cannot be encoded.
    pub fn between<R: Record>(original: &R, modified: &R) -> Result<Option<Self>> {
        let before = status_of(original)?;
        let after = status_of(modified)?;
        let diff = create_merge_patch(&before, &after);
        if is_empty_patch(&diff) {
            return Ok(None);
        }

        let mut patch = Map::new();
        patch.insert("status".to_string(), diff);
        Ok(Some(Self {
            patch: Value::Object(patch),
            precondition: None,
        }))
    }

    /// Require the stored record to still be at `resource_version`.
    #[must_use]
    pub const fn with_precondition(mut self, resource_version: u64) -> Self {
        self.precondition = Some(resource_version);
        self
    }

    /// Apply this patch to `record`, touching only its status.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the patched status no longer
    /// decodes as `R`.
    pub fn apply_to<R: Record>(&self, record: &R) -> Result<R> {
        let mut document = serde_json::to_value(record)?;
        if let (Some(target), Some(status)) = (document.get_mut("status"), self.patch.get("status"))
        {
            apply_merge_patch(target, status);
        }
        let patched: R = serde_json::from_value(document)?;

        let mut result = record.clone();
        result.copy_status_from(&patched);
        Ok(result)
    }
}

fn status_of<R: Record>(record: &R) -> Result<Value> {
    let document = serde_json::to_value(record)?;
    document
        .get("status")
        .cloned()
        .ok_or_else(|| Error::serialization(format!("{} has no status field", R::KIND)))
}

/// Smallest merge patch turning `original` into `modified`.
#[must_use]
pub fn create_merge_patch(original: &Value, modified: &Value) -> Value {
    match (original, modified) {
        (Value::Object(before), Value::Object(after)) => {
            let mut patch = Map::new();
            for (key, old) in before {
                match after.get(key) {
                    None => {
                        patch.insert(key.clone(), Value::Null);
                    }
                    Some(new) if new != old => {
                        patch.insert(key.clone(), create_merge_patch(old, new));
                    }
                    Some(_) => {}
                }
            }
            for (key, new) in after {
                if !before.contains_key(key) {
                    patch.insert(key.clone(), new.clone());
                }
            }
            Value::Object(patch)
        }
        _ => modified.clone(),
    }
}

/// Apply `patch` to `target` in place.
pub fn apply_merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(changes) = patch else {
        *target = patch.clone();
        return;
    };

    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(fields) = target {
        for (key, change) in changes {
            if change.is_null() {
                fields.remove(key);
            } else {
                apply_merge_patch(fields.entry(key.clone()).or_insert(Value::Null), change);
            }
        }
    }
}

/// A patch with no keys changes nothing.
#[must_use]
pub fn is_empty_patch(patch: &Value) -> bool {
    patch.as_object().is_some_and(Map::is_empty)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use converge_core::LrpStatus;
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::record::LrpRecord;

    #[test]
    fn test_diff_of_equal_documents_is_empty() {
        let doc = json!({"replicas": 3, "nested": {"a": 1}});
        assert!(is_empty_patch(&create_merge_patch(&doc, &doc)));
    }

    #[test]
    fn test_diff_removes_missing_keys() {
        let before = json!({"startTime": "t0", "endTime": "t1"});
        let after = json!({"startTime": "t0"});
        assert_eq!(create_merge_patch(&before, &after), json!({"endTime": null}));
    }

    #[test]
    fn test_status_patch_leaves_spec_alone() {
        let mut original = LrpRecord::default();
        original.spec.instances = 3;
        original.spec.image = "img:1".into();

        let mut modified = original.clone();
        modified.status = LrpStatus { replicas: 2 };
        modified.spec.image = "img:2".into();

        let patch = StatusPatch::between(&original, &modified).unwrap().unwrap();
        assert_eq!(patch.patch, json!({"status": {"replicas": 2}}));

        let applied = patch.apply_to(&original).unwrap();
        assert_eq!(applied.status.replicas, 2);
        assert_eq!(applied.spec.image, "img:1");
    }

    #[test]
    fn test_unchanged_status_yields_no_patch() {
        let record = LrpRecord::default();
        assert!(StatusPatch::between(&record, &record.clone()).unwrap().is_none());
    }

    fn leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<i64>().prop_map(Value::from),
            any::<bool>().prop_map(Value::from),
            "[a-z]{0,6}".prop_map(Value::from),
        ]
    }

    fn document() -> impl Strategy<Value = Value> {
        leaf().prop_recursive(3, 24, 4, |inner| {
            prop::collection::btree_map("[a-d]", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect()))
        })
    }

    fn object() -> impl Strategy<Value = Value> {
        prop::collection::btree_map("[a-d]", document(), 0..4)
            .prop_map(|m| Value::Object(m.into_iter().collect()))
    }

    proptest! {
        #[test]
        fn prop_apply_of_diff_reaches_target(before in object(), after in object()) {
            let patch = create_merge_patch(&before, &after);
            let mut patched = before.clone();
            apply_merge_patch(&mut patched, &patch);
            prop_assert_eq!(patched, after);
        }

        #[test]
        fn prop_diff_with_self_is_empty(doc in object()) {
            prop_assert!(is_empty_patch(&create_merge_patch(&doc, &doc)));
        }
    }
}
