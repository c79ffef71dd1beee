//! Two-way merge patches for object annotations.
use std::collections::BTreeMap;

use serde_json::{Map, Value, json};

/// Computes the patch turning the annotations `old` into `new`.
///
/// Changed and added annotations are set, annotations only present in `old`
/// are set to `null` which removes them. Returns `None` if nothing changed.
pub fn annotations_merge_patch(
    old: &BTreeMap<String, String>,
    new: &BTreeMap<String, String>,
) -> Option<Value> {
    let mut changes = Map::new();

    for (key, value) in new {
        if old.get(key) != Some(value) {
            changes.insert(key.clone(), Value::String(value.clone()));
        }
    }
    for key in old.keys().filter(|key| !new.contains_key(*key)) {
        changes.insert(key.clone(), Value::Null);
    }

    (!changes.is_empty()).then(|| json!({ "metadata": { "annotations": changes } }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotations(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect()
    }

    #[test]
    fn only_differences_are_patched() {
        let old = annotations(&[("keep", "1"), ("change", "old"), ("drop", "x")]);
        let new = annotations(&[("keep", "1"), ("change", "new"), ("add", "y")]);

        assert_eq!(
            annotations_merge_patch(&old, &new),
            Some(json!({
                "metadata": {
                    "annotations": {
                        "add": "y",
                        "change": "new",
                        "drop": null,
                    }
                }
            }))
        );
    }

    #[test]
    fn unchanged_annotations_need_no_patch() {
        let old = annotations(&[("keep", "1")]);
        assert_eq!(annotations_merge_patch(&old, &old.clone()), None);
    }
}
