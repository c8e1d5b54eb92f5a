use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use crate::util::errors::Result;

/// Merges `overlay` onto `base` in place.
///
/// Objects merge key by key and nulls in `overlay` leave `base` untouched. Arrays whose
/// elements all carry a name (`name` or `metadata.name`, as containers, volumes and
/// claim templates do) merge element by element on that name, appending new names.
/// Other arrays of equal length merge by position; otherwise `overlay` wins.
pub fn merge_json(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (_, Value::Null) => {}
        (Value::Object(base), Value::Object(overlay)) => merge_objects(base, overlay),
        (Value::Array(base), Value::Array(overlay)) => merge_arrays(base, overlay),
        (base, overlay) => *base = overlay.clone(),
    }
}

fn merge_objects(base: &mut Map<String, Value>, overlay: &Map<String, Value>) {
    for (key, value) in overlay {
        match base.get_mut(key) {
            Some(existing) => merge_json(existing, value),
            None if value.is_null() => {}
            None => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

fn merge_arrays(base: &mut Vec<Value>, overlay: &[Value]) {
    let named = |values: &[Value]| values.iter().all(|v| element_name(v).is_some());
    if !base.is_empty() && !overlay.is_empty() && named(base.as_slice()) && named(overlay) {
        for value in overlay {
            let name = element_name(value);
            match base.iter_mut().find(|existing| element_name(existing) == name) {
                Some(existing) => merge_json(existing, value),
                None => base.push(value.clone()),
            }
        }
    } else if base.len() == overlay.len() {
        for (existing, value) in base.iter_mut().zip(overlay) {
            merge_json(existing, value);
        }
    } else {
        *base = overlay.to_vec();
    }
}

fn element_name(value: &Value) -> Option<&str> {
    value
        .get("name")
        .or_else(|| value.get("metadata").and_then(|m| m.get("name")))
        .and_then(Value::as_str)
}

/// Whether `live` already carries everything in `desired`.
///
/// Fields the API server fills in on its own are ignored, and so are the zero values
/// it drops on write (`false`, `""`, `[]`, null), since a live object never has them.
/// Arrays are matched the way [`merge_json`] merges them.
pub fn contains_json(live: &Value, desired: &Value) -> bool {
    match (live, desired) {
        (_, Value::Null) => true,
        (Value::Object(live), Value::Object(desired)) => desired.iter().all(|(key, value)| match live.get(key) {
            Some(existing) => contains_json(existing, value),
            None => is_dropped_on_write(value),
        }),
        (Value::Array(live), Value::Array(desired)) => contains_array(live, desired),
        (live, desired) => live == desired,
    }
}

fn contains_array(live: &[Value], desired: &[Value]) -> bool {
    if desired.is_empty() {
        return true;
    }
    let named = |values: &[Value]| values.iter().all(|v| element_name(v).is_some());
    if named(live) && named(desired) {
        desired.iter().all(|value| {
            let name = element_name(value);
            live.iter()
                .find(|existing| element_name(existing) == name)
                .is_some_and(|existing| contains_json(existing, value))
        })
    } else {
        live.len() == desired.len() && live.iter().zip(desired).all(|(l, d)| contains_json(l, d))
    }
}

fn is_dropped_on_write(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

/// Merges `overlay` onto `base` through their JSON form.
pub fn merge_typed<T: Serialize + DeserializeOwned>(base: &T, overlay: &T) -> Result<T> {
    let mut merged = serde_json::to_value(base)?;
    merge_json(&mut merged, &serde_json::to_value(overlay)?);
    Ok(serde_json::from_value(merged)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_containers_merge_by_name() {
        let mut base = json!({
            "containers": [
                { "name": "mongod", "image": "mongo:4.2.6", "terminationMessagePath": "/dev/termination-log" },
                { "name": "mongodb-agent", "image": "agent:1" }
            ]
        });
        merge_json(
            &mut base,
            &json!({
                "containers": [
                    { "name": "mongodb-agent", "resources": { "limits": { "cpu": "2" } } },
                    { "name": "sidecar", "image": "busybox" }
                ]
            }),
        );

        assert_eq!(
            base,
            json!({
                "containers": [
                    { "name": "mongod", "image": "mongo:4.2.6", "terminationMessagePath": "/dev/termination-log" },
                    { "name": "mongodb-agent", "image": "agent:1", "resources": { "limits": { "cpu": "2" } } },
                    { "name": "sidecar", "image": "busybox" }
                ]
            })
        );
    }

    #[test]
    fn test_claim_templates_merge_by_metadata_name() {
        let mut base = json!([{ "metadata": { "name": "data-volume" }, "spec": { "accessModes": ["ReadWriteOnce"] } }]);
        merge_json(
            &mut base,
            &json!([{ "metadata": { "name": "data-volume" }, "spec": { "resources": { "requests": { "storage": "50G" } } } }]),
        );
        assert_eq!(base[0]["spec"]["accessModes"], json!(["ReadWriteOnce"]));
        assert_eq!(base[0]["spec"]["resources"]["requests"]["storage"], "50G");
    }

    #[test]
    fn test_unnamed_arrays() {
        let mut same_len = json!({ "args": ["a", "b"] });
        merge_json(&mut same_len, &json!({ "args": ["c", "d"] }));
        assert_eq!(same_len, json!({ "args": ["c", "d"] }));

        let mut different_len = json!({ "args": ["a", "b"] });
        merge_json(&mut different_len, &json!({ "args": ["c"] }));
        assert_eq!(different_len, json!({ "args": ["c"] }));
    }

    #[test]
    fn test_contains_ignores_server_defaults_and_dropped_zero_values() {
        let live = json!({
            "containers": [{
                "name": "mongod",
                "image": "mongo:4.2.6",
                "imagePullPolicy": "IfNotPresent",
                "volumeMounts": [{ "name": "data-volume", "mountPath": "/data" }]
            }],
            "updateStrategy": { "type": "RollingUpdate", "rollingUpdate": { "partition": 0 } }
        });
        let desired = json!({
            "containers": [{
                "name": "mongod",
                "image": "mongo:4.2.6",
                "args": [],
                "volumeMounts": [{ "name": "data-volume", "mountPath": "/data", "readOnly": false }]
            }],
            "updateStrategy": { "type": "RollingUpdate" }
        });
        assert!(contains_json(&live, &desired));

        let upgraded = json!({ "containers": [{ "name": "mongod", "image": "mongo:4.4.0" }] });
        assert!(!contains_json(&live, &upgraded));

        let read_only = json!({ "containers": [{ "name": "mongod", "volumeMounts": [
            { "name": "data-volume", "readOnly": true }
        ]}]});
        assert!(!contains_json(&live, &read_only));

        let added = json!({ "containers": [{ "name": "mongodb-agent", "image": "agent:1" }] });
        assert!(!contains_json(&live, &added));
    }

    #[test]
    fn test_null_leaves_base() {
        let mut base = json!({ "replicas": 3, "serviceName": "mdb-svc" });
        merge_json(&mut base, &json!({ "replicas": null, "paused": null }));
        assert_eq!(base, json!({ "replicas": 3, "serviceName": "mdb-svc" }));
    }
}
