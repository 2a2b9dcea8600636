//! Structural deep merge for partial JSON updates.

use serde_json::Value;

/// Merge `patch` into `target`.
///
/// Nested objects merge key by key. Arrays and scalars in `patch` replace the
/// target value wholesale. A key missing from `patch` leaves the target key
/// untouched, while an explicit `null` overwrites it with `null`.
pub fn deep_merge(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target_map), Value::Object(patch_map)) => {
            for (key, patch_value) in patch_map {
                match target_map.get_mut(&key) {
                    Some(existing) if existing.is_object() && patch_value.is_object() => {
                        deep_merge(existing, patch_value);
                    }
                    _ => {
                        target_map.insert(key, patch_value);
                    }
                }
            }
        }
        (target, patch) => *target = patch,
    }
}

/// Non-mutating form of [`deep_merge`].
pub fn merged(target: &Value, patch: Value) -> Value {
    let mut out = target.clone();
    deep_merge(&mut out, patch);
    out
}
