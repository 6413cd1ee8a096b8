//! Dot-separated path lookup into JSON values.
//!
//! `items.0.name` walks object keys by name and array elements by index.
//! The empty path addresses the whole value.

use serde_json::Value;

/// Look up `path` inside `value`.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    if path.is_empty() {
        return Some(value);
    }

    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_path_is_whole_value() {
        let value = json!({"a": 1});
        assert_eq!(lookup(&value, ""), Some(&value));
    }

    #[test]
    fn nested_objects_and_arrays() {
        let value = json!({"items": [{"name": "first"}, {"name": "second"}]});
        assert_eq!(lookup(&value, "items.1.name"), Some(&json!("second")));
        assert_eq!(lookup(&value, "items.2.name"), None);
        assert_eq!(lookup(&value, "items.x"), None);
    }

    #[test]
    fn scalar_has_no_children() {
        let value = json!({"n": 5});
        assert_eq!(lookup(&value, "n.inner"), None);
    }
}
