//! Dotted path traversal over configuration trees

use serde_json::Value;

/// Look up a dotted path; numeric segments index into arrays.
///
/// An empty path addresses the root.
pub fn get<'a>(tree: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(tree);
    }

    let mut current = tree;
    for part in path.split('.') {
        current = match current {
            Value::Object(obj) => obj.get(part)?,
            Value::Array(arr) => arr.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Build a tree holding `leaf` at the dotted `path`.
///
/// Returns `None` if the path is empty or has an empty segment.
pub fn nest(path: &str, leaf: Value) -> Option<Value> {
    if path.is_empty() || path.split('.').any(str::is_empty) {
        return None;
    }

    Some(path.rsplit('.').fold(leaf, |child, part| {
        let mut obj = serde_json::Map::new();
        obj.insert(part.to_string(), child);
        Value::Object(obj)
    }))
}

/// Join a parent path and a segment
pub(crate) fn join(parent: &str, segment: &str) -> String {
    if parent.is_empty() {
        segment.to_string()
    } else {
        format!("{parent}.{segment}")
    }
}
