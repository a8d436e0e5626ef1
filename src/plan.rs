//! Planning: attribute diffs and replacement detection.
//!
//! Values are compared leaf by leaf along dotted paths (`spec.issuerRef.name`).
//! Lists are compared whole. Null and absent are the same. Computed `id` is
//! never reported as a change.

use serde_json::{Map, Value};

use crate::schema::Schema;
use crate::types::{AttributeChange, PlanResult};

const COMPUTED_ID: &str = "id";

/// Leaf-level differences between two states.
pub fn diff(before: &Value, after: &Value) -> Vec<AttributeChange> {
    let mut changes = Vec::new();
    diff_at("", non_null(before), non_null(after), &mut changes);
    changes.retain(|c| c.path != COMPUTED_ID);
    changes
}

fn non_null(value: &Value) -> Option<&Value> {
    (!value.is_null()).then_some(value)
}

fn diff_at(
    path: &str,
    before: Option<&Value>,
    after: Option<&Value>,
    out: &mut Vec<AttributeChange>,
) {
    match (before, after) {
        (None, None) => {},
        (Some(Value::Object(b)), Some(Value::Object(a))) => diff_objects(path, b, a, out),
        (Some(Value::Object(b)), None) => diff_objects(path, b, &Map::new(), out),
        (None, Some(Value::Object(a))) => diff_objects(path, &Map::new(), a, out),
        (b, a) if b == a => {},
        (b, a) => out.push(AttributeChange::new(path, b.cloned(), a.cloned())),
    }
}

fn diff_objects(
    path: &str,
    before: &Map<String, Value>,
    after: &Map<String, Value>,
    out: &mut Vec<AttributeChange>,
) {
    let mut keys: Vec<&String> = before.keys().chain(after.keys()).collect();
    keys.sort();
    keys.dedup();

    for key in keys {
        let child = if path.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", path, key)
        };
        diff_at(
            &child,
            before.get(key).and_then(non_null),
            after.get(key).and_then(non_null),
            out,
        );
    }
}

/// Whether any change touches an attribute that forces replacement.
pub fn requires_replace(schema: &Schema, changes: &[AttributeChange]) -> bool {
    let paths = schema.requires_replace_paths();
    changes.iter().any(|change| {
        paths.iter().any(|p| {
            change.path == *p
                || change.path.starts_with(&format!("{}.", p))
                || p.starts_with(&format!("{}.", change.path))
        })
    })
}

/// Set the computed `id` of a planned state.
fn with_id(mut state: Value, id: Option<String>) -> Value {
    if let (Value::Object(map), Some(id)) = (&mut state, id) {
        map.insert(COMPUTED_ID.to_string(), Value::String(id));
    }
    state
}

fn identity_of(state: &Value) -> Option<String> {
    let metadata = state.get("metadata")?;
    let namespace = metadata.get("namespace")?.as_str()?;
    let name = metadata.get("name")?.as_str()?;
    Some(format!("{}/{}", namespace, name))
}

/// Plan a create: every configured leaf is added and `id` becomes known.
pub fn plan_create(proposed: Value) -> PlanResult {
    let changes = diff(&Value::Null, &proposed);
    let id = identity_of(&proposed);
    PlanResult::with_changes(with_id(proposed, id), changes, false)
}

/// Plan an update of `prior` towards `proposed`.
///
/// A change under any replacement-forcing path plans a replacement; the
/// planned `id` then follows the new identity.
pub fn plan_update(schema: &Schema, prior: &Value, proposed: Value) -> PlanResult {
    let changes = diff(prior, &proposed);
    let id = identity_of(&proposed).or_else(|| identity_of(prior));
    let planned = with_id(proposed, id);

    if changes.is_empty() {
        return PlanResult::no_change(planned);
    }
    let replace = requires_replace(schema, &changes);
    PlanResult::with_changes(planned, changes, replace)
}

/// Plan a delete: every leaf of `prior` is removed.
pub fn plan_delete(prior: &Value) -> PlanResult {
    PlanResult::with_changes(Value::Null, diff(prior, &Value::Null), false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds::certificate;
    use crate::testing::{
        assert_plan_changes_attribute, assert_plan_creates, assert_plan_does_not_change_attribute,
        assert_plan_no_changes, assert_plan_replaces, assert_plan_updates_in_place,
    };
    use serde_json::json;

    fn config(name: &str, secret: &str) -> Value {
        json!({
            "id": null,
            "metadata": {"name": name, "namespace": "default", "labels": null},
            "spec": {"secretName": secret, "issuerRef": {"name": "ca"}}
        })
    }

    fn state(name: &str, secret: &str) -> Value {
        let mut state = config(name, secret);
        state["id"] = json!(format!("default/{}", name));
        state
    }

    #[test]
    fn test_diff_leaves() {
        let changes = diff(
            &json!({"a": {"b": 1, "c": [1, 2]}, "d": null}),
            &json!({"a": {"b": 2, "c": [1, 2]}, "e": "x"}),
        );
        let paths: Vec<&str> = changes.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["a.b", "e"]);
        assert_eq!(changes[1].before, None);
        assert_eq!(changes[1].after, Some(json!("x")));
    }

    #[test]
    fn test_diff_null_equals_absent() {
        assert!(diff(&json!({"labels": null}), &json!({})).is_empty());
        assert!(diff(&json!({"id": "default/web"}), &json!({"id": null})).is_empty());
    }

    #[test]
    fn test_plan_create_sets_id() {
        let plan = plan_create(config("web", "web-tls"));
        assert_plan_creates(&plan);
        assert_eq!(plan.planned_state["id"], "default/web");
        assert_plan_changes_attribute(&plan, "spec.secretName");
    }

    #[test]
    fn test_plan_update_in_place() {
        let schema = certificate().resource_schema();
        let plan = plan_update(&schema, &state("web", "web-tls"), config("web", "web-tls-2"));
        assert_plan_updates_in_place(&plan);
        assert_plan_changes_attribute(&plan, "spec.secretName");
        assert_plan_does_not_change_attribute(&plan, "id");
        assert_eq!(plan.planned_state["id"], "default/web");
    }

    #[test]
    fn test_plan_update_identity_change_replaces() {
        let schema = certificate().resource_schema();
        let plan = plan_update(&schema, &state("web", "web-tls"), config("api", "web-tls"));
        assert_plan_replaces(&plan);
        assert_plan_changes_attribute(&plan, "metadata.name");
        assert_eq!(plan.planned_state["id"], "default/api");
    }

    #[test]
    fn test_plan_update_no_changes() {
        let schema = certificate().resource_schema();
        let plan = plan_update(&schema, &state("web", "web-tls"), config("web", "web-tls"));
        assert_plan_no_changes(&plan);
        assert!(!plan.requires_replace);
    }

    #[test]
    fn test_plan_delete() {
        let plan = plan_delete(&state("web", "web-tls"));
        assert!(plan.planned_state.is_null());
        assert!(plan.changes.iter().all(|c| c.after.is_none()));
        assert_plan_changes_attribute(&plan, "metadata.namespace");
    }
}
