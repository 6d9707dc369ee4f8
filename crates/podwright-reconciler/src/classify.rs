//! Immutability classifier
//!
//! Diffs two canonical pod objects leaf by leaf and tags each changed path
//! with the policy of the longest matching entry in [`POLICY_TABLE`].
//! A single `Replace` change forces replacement of the whole pod.

use podwright_core::{Pod, PodwrightError, Quantity, Result};
use serde_json::{Map, Value};

/// How a changed field can be applied to a live pod
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePolicy {
    InPlace,
    Replace,
}

/// Field paths and their update policy
///
/// Patterns are JSON pointers where `*` matches one segment. Anything not
/// covered by a more specific entry falls under `/spec` and is replaced.
pub const POLICY_TABLE: &[(&str, UpdatePolicy)] = &[
    ("/metadata", UpdatePolicy::InPlace),
    ("/metadata/name", UpdatePolicy::Replace),
    ("/metadata/namespace", UpdatePolicy::Replace),
    ("/metadata/labels", UpdatePolicy::InPlace),
    ("/metadata/annotations", UpdatePolicy::InPlace),
    ("/spec", UpdatePolicy::Replace),
    ("/spec/containers/*/image", UpdatePolicy::InPlace),
    ("/spec/containers/*/args", UpdatePolicy::Replace),
    ("/spec/containers/*/env", UpdatePolicy::Replace),
    ("/spec/activeDeadlineSeconds", UpdatePolicy::InPlace),
    ("/spec/initContainers", UpdatePolicy::Replace),
    ("/spec/schedulerName", UpdatePolicy::Replace),
    ("/spec/securityContext", UpdatePolicy::Replace),
];

/// Server-computed paths never compared
const IGNORED_PATHS: &[&str] = &[
    "/metadata/uid",
    "/metadata/resourceVersion",
    "/metadata/generation",
    "/metadata/creationTimestamp",
    "/metadata/deletionTimestamp",
    "/metadata/deletionGracePeriodSeconds",
    "/metadata/managedFields",
    "/status",
];

/// Map keys whose values are resource quantities
const QUANTITY_MAPS: &[&str] = &["limits", "requests", "overhead"];

/// Fields holding a single resource quantity
const QUANTITY_FIELDS: &[&str] = &["sizeLimit", "divisor"];

/// One changed leaf
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    /// JSON pointer of the changed value
    pub path: String,
    pub old: Option<Value>,
    pub new: Option<Value>,
    pub policy: UpdatePolicy,
}

impl FieldChange {
    /// Whether applying this change alters what the containers run
    pub fn touches_spec(&self) -> bool {
        self.path.starts_with("/spec/")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    NoChange,
    InPlaceUpdate(Vec<FieldChange>),
    /// Every change is carried, not only the ones forcing replacement
    Replace(Vec<FieldChange>),
}

impl Classification {
    pub fn requires_replace(&self) -> bool {
        matches!(self, Self::Replace(_))
    }

    pub fn changes(&self) -> &[FieldChange] {
        match self {
            Self::NoChange => &[],
            Self::InPlaceUpdate(changes) | Self::Replace(changes) => changes,
        }
    }

    /// Paths whose change forces replacement
    pub fn replace_paths(&self) -> Vec<&str> {
        self.changes()
            .iter()
            .filter(|c| c.policy == UpdatePolicy::Replace)
            .map(|c| c.path.as_str())
            .collect()
    }
}

/// Classify the difference between two canonical pods
pub fn classify(old: &Pod, new: &Pod) -> Result<Classification> {
    let old = comparable(old)?;
    let new = comparable(new)?;

    let mut changes = Vec::new();
    diff_values("", Some(&old), Some(&new), &mut changes);

    if changes.is_empty() {
        return Ok(Classification::NoChange);
    }
    if changes.iter().any(|c| c.policy == UpdatePolicy::Replace) {
        Ok(Classification::Replace(changes))
    } else {
        Ok(Classification::InPlaceUpdate(changes))
    }
}

/// Look up the policy for a pointer path
pub fn policy_for(path: &str) -> UpdatePolicy {
    let segments = split_pointer(path);
    POLICY_TABLE
        .iter()
        .filter(|(pattern, _)| pattern_matches(pattern, &segments))
        .max_by_key(|(pattern, _)| split_pointer(pattern).len())
        .map(|(_, policy)| *policy)
        .unwrap_or(UpdatePolicy::Replace)
}

/// Write in-place changes onto a live object
///
/// Only `InPlace` changes are applied; server-assigned fields on the live
/// object, including the resourceVersion, are kept.
pub fn apply_changes(live: &Pod, changes: &[FieldChange]) -> Result<Pod> {
    let mut value = podwright_core::convert::<Pod, Value>(live)?;
    for change in changes.iter().filter(|c| c.policy == UpdatePolicy::InPlace) {
        set_pointer(&mut value, &change.path, change.new.clone())?;
    }
    podwright_core::convert(&value)
}

fn comparable(pod: &Pod) -> Result<Value> {
    let mut value = podwright_core::convert::<Pod, Value>(pod)?;
    for path in IGNORED_PATHS {
        // Ignored fields are all direct children of an object
        if let Some((parent, key)) = path.rsplit_once('/') {
            let target = if parent.is_empty() {
                Some(&mut value)
            } else {
                value.pointer_mut(parent)
            };
            if let Some(Value::Object(map)) = target {
                map.remove(key);
            }
        }
    }
    Ok(value)
}

fn diff_values(path: &str, old: Option<&Value>, new: Option<&Value>, out: &mut Vec<FieldChange>) {
    match (old, new) {
        (Some(Value::Object(a)), Some(Value::Object(b))) => diff_objects(path, a, b, out),
        (Some(Value::Array(a)), Some(Value::Array(b))) if a.len() == b.len() => {
            for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
                diff_values(&format!("{}/{}", path, i), Some(x), Some(y), out);
            }
        }
        (a, b) if a == b => {}
        (Some(Value::String(a)), Some(Value::String(b))) if is_quantity_path(path) && same_quantity(a, b) => {}
        (a, b) => out.push(FieldChange {
            path: path.to_string(),
            old: a.cloned(),
            new: b.cloned(),
            policy: policy_for(path),
        }),
    }
}

fn diff_objects(path: &str, a: &Map<String, Value>, b: &Map<String, Value>, out: &mut Vec<FieldChange>) {
    for (key, x) in a {
        let child = format!("{}/{}", path, escape(key));
        diff_values(&child, Some(x), b.get(key), out);
    }
    for (key, y) in b {
        if !a.contains_key(key) {
            let child = format!("{}/{}", path, escape(key));
            diff_values(&child, None, Some(y), out);
        }
    }
}

/// Quantities spelled differently but equal in value are the same leaf
fn is_quantity_path(path: &str) -> bool {
    let segments = split_pointer(path);
    match segments.as_slice() {
        [.., parent, _] if QUANTITY_MAPS.contains(parent) => true,
        [.., last] => QUANTITY_FIELDS.contains(last),
        [] => false,
    }
}

fn same_quantity(a: &str, b: &str) -> bool {
    match (Quantity::parse(a), Quantity::parse(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn escape(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

fn unescape(segment: &str) -> String {
    segment.replace("~1", "/").replace("~0", "~")
}

fn split_pointer(path: &str) -> Vec<&str> {
    path.split('/').skip(1).collect()
}

fn pattern_matches(pattern: &str, segments: &[&str]) -> bool {
    let pattern = split_pointer(pattern);
    pattern.len() <= segments.len()
        && pattern
            .iter()
            .zip(segments.iter())
            .all(|(p, s)| *p == "*" || p == s)
}

fn set_pointer(root: &mut Value, path: &str, new: Option<Value>) -> Result<()> {
    let segments: Vec<String> = split_pointer(path).into_iter().map(unescape).collect();
    let Some((last, parents)) = segments.split_last() else {
        return Err(PodwrightError::internal_error("cannot patch the document root"));
    };

    let mut current = root;
    for segment in parents {
        current = match current {
            Value::Object(map) => map
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new())),
            Value::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get_mut(i))
                .ok_or_else(|| PodwrightError::internal_error(format!("no element at {}", path)))?,
            _ => {
                return Err(PodwrightError::internal_error(format!(
                    "cannot descend into scalar at {}",
                    path
                )))
            }
        };
    }

    match (current, new) {
        (Value::Object(map), Some(value)) => {
            map.insert(last.clone(), value);
        }
        (Value::Object(map), None) => {
            map.remove(last);
        }
        (Value::Array(items), Some(value)) => {
            let slot = last
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get_mut(i))
                .ok_or_else(|| PodwrightError::internal_error(format!("no element at {}", path)))?;
            *slot = value;
        }
        _ => {
            return Err(PodwrightError::internal_error(format!(
                "cannot apply change at {}",
                path
            )))
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use podwright_schema::PodSpec;
    use podwright_translate::expand;

    fn pod(yaml: &str) -> Pod {
        expand(&PodSpec::from_yaml(yaml).unwrap())
    }

    const BASE: &str = r#"
metadata:
  name: echo
  labels:
    app: echo
containers:
  - name: echo
    image: hashicorp/http-echo:0.2.3
    args: ["-listen=:80", "-text='before'"]
    resources:
      limits:
        cpu: 500m
"#;

    #[test]
    fn test_identical_pods_no_change() {
        assert_eq!(classify(&pod(BASE), &pod(BASE)).unwrap(), Classification::NoChange);
    }

    #[test]
    fn test_server_fields_ignored() {
        let old = pod(BASE);
        let mut live = old.clone();
        live.metadata.uid = Some("abc".to_string());
        live.metadata.resource_version = Some("7".to_string());
        live.status = Some(Default::default());
        assert_eq!(classify(&old, &live).unwrap(), Classification::NoChange);
    }

    #[test]
    fn test_equal_quantities_no_change() {
        let other = BASE.replace("cpu: 500m", "cpu: \"0.5\"");
        assert_eq!(classify(&pod(BASE), &pod(&other)).unwrap(), Classification::NoChange);
    }

    #[test]
    fn test_quantities_equal_across_suffix_families() {
        for (before, after) in [
            ("memory: 1Gi", "memory: \"1073741824\""),
            ("memory: 1k", "memory: \"1e3\""),
            ("memory: \"1000\"", "memory: \"1e3\""),
        ] {
            let old = BASE.replace("cpu: 500m", before);
            let new = BASE.replace("cpu: 500m", after);
            assert_eq!(
                classify(&pod(&old), &pod(&new)).unwrap(),
                Classification::NoChange,
                "{} vs {}",
                before,
                after
            );
        }
    }

    #[test]
    fn test_quantity_value_change_replaces() {
        let new = BASE.replace("cpu: 500m", "cpu: \"1\"");
        let result = classify(&pod(BASE), &pod(&new)).unwrap();
        assert_eq!(result.replace_paths(), vec!["/spec/containers/0/resources/limits/cpu"]);
    }

    #[test]
    fn test_quantity_paths() {
        assert!(is_quantity_path("/spec/containers/0/resources/limits/memory"));
        assert!(is_quantity_path("/spec/volumes/1/emptyDir/sizeLimit"));
        assert!(is_quantity_path("/spec/containers/0/env/2/valueFrom/resourceFieldRef/divisor"));
        assert!(!is_quantity_path("/spec/containers/0/image"));
        assert!(!is_quantity_path("/metadata/labels/limits"));
    }

    #[test]
    fn test_label_change_in_place() {
        let new = BASE.replace("app: echo", "app: echo\n    tier: web");
        let result = classify(&pod(BASE), &pod(&new)).unwrap();
        assert!(!result.requires_replace());
        assert_eq!(result.changes().len(), 1);
        assert_eq!(result.changes()[0].path, "/metadata/labels/tier");
    }

    #[test]
    fn test_image_change_in_place() {
        let new = BASE.replace("0.2.3", "1.0.0");
        let result = classify(&pod(BASE), &pod(&new)).unwrap();
        assert!(matches!(result, Classification::InPlaceUpdate(_)));
        assert!(result.changes()[0].touches_spec());
    }

    #[test]
    fn test_args_change_replaces() {
        let new = BASE.replace("'before'", "'after'");
        let result = classify(&pod(BASE), &pod(&new)).unwrap();
        assert!(result.requires_replace());
        assert_eq!(result.replace_paths(), vec!["/spec/containers/0/args/1"]);
    }

    #[test]
    fn test_replace_dominates() {
        let new = BASE
            .replace("'before'", "'after'")
            .replace("app: echo", "app: echo\n    tier: web");
        let result = classify(&pod(BASE), &pod(&new)).unwrap();
        assert!(result.requires_replace());
        assert_eq!(result.changes().len(), 2);
    }

    #[test]
    fn test_unlisted_spec_field_replaces() {
        let new = format!("{}restartPolicy: Never\n", BASE);
        assert!(classify(&pod(BASE), &pod(&new)).unwrap().requires_replace());
    }

    #[test]
    fn test_policy_lookup() {
        assert_eq!(policy_for("/metadata/annotations/example.com~1team"), UpdatePolicy::InPlace);
        assert_eq!(policy_for("/metadata/name"), UpdatePolicy::Replace);
        assert_eq!(policy_for("/spec/containers/3/image"), UpdatePolicy::InPlace);
        assert_eq!(policy_for("/spec/containers/0/env/0/value"), UpdatePolicy::Replace);
        assert_eq!(policy_for("/spec/initContainers/0/image"), UpdatePolicy::Replace);
        assert_eq!(policy_for("/spec/schedulerName"), UpdatePolicy::Replace);
        assert_eq!(policy_for("/spec/tolerations/0"), UpdatePolicy::Replace);
        assert_eq!(policy_for("/spec/activeDeadlineSeconds"), UpdatePolicy::InPlace);
    }

    #[test]
    fn test_apply_changes_keeps_server_fields() {
        let old = pod(BASE);
        let new = pod(&BASE
            .replace("0.2.3", "1.0.0")
            .replace("app: echo", "app: echo\n  annotations:\n    example.com/team: web"));
        let result = classify(&old, &new).unwrap();

        let mut live = old.clone();
        live.metadata.uid = Some("abc".to_string());
        live.metadata.resource_version = Some("3".to_string());

        let patched = apply_changes(&live, result.changes()).unwrap();
        assert_eq!(patched.metadata.uid.as_deref(), Some("abc"));
        assert_eq!(patched.metadata.resource_version.as_deref(), Some("3"));
        assert_eq!(
            patched.metadata.annotations.unwrap().get("example.com/team").map(String::as_str),
            Some("web")
        );
        let containers = patched.spec.unwrap().containers;
        assert_eq!(containers[0].image.as_deref(), Some("hashicorp/http-echo:1.0.0"));
    }

    #[test]
    fn test_apply_changes_removes_labels() {
        let old = pod(BASE);
        let new = pod(&BASE.replace("  labels:\n    app: echo\n", ""));
        let result = classify(&old, &new).unwrap();
        assert!(!result.requires_replace());

        let patched = apply_changes(&old, result.changes()).unwrap();
        assert!(patched.metadata.labels.is_none());
    }
}
