//! Dotted-path access into JSON instances

use serde_json::{Map, Value};

/// Get the value at a dotted path
pub fn get<'a>(instance: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(instance, |value, segment| value.as_object()?.get(segment))
}

/// Remove and return the value at a dotted path
pub fn remove(instance: &mut Value, path: &str) -> Option<Value> {
    match path.rsplit_once('.') {
        None => instance.as_object_mut()?.shift_remove(path),
        Some((parent, leaf)) => parent_mut(instance, parent)?.shift_remove(leaf),
    }
}

/// Write a value at a dotted path
///
/// Missing intermediate objects are created. Returns `false` without writing
/// when the instance or an intermediate value is not an object.
pub fn insert(instance: &mut Value, path: &str, value: Value) -> bool {
    let mut current = match instance.as_object_mut() {
        Some(map) => map,
        None => return false,
    };

    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            current.insert(segment.to_string(), value);
            return true;
        }
        let next = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        current = match next.as_object_mut() {
            Some(map) => map,
            None => return false,
        };
    }
    false
}

fn parent_mut<'a>(instance: &'a mut Value, path: &str) -> Option<&'a mut Map<String, Value>> {
    path.split('.')
        .try_fold(instance, |value, segment| value.as_object_mut()?.get_mut(segment))?
        .as_object_mut()
}
