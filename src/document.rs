//! Dotted-path access over a YAML document tree.
//!
//! Job documents are held as `serde_yaml::Value` (scalar / sequence / mapping).
//! Addresses such as `run_metadata.default_input_namespace` walk nested
//! mappings one segment at a time; a key that itself contains the separator is
//! matched first as a whole at the root.
use serde_yaml::{Mapping, Value};

/// Default separator for dotted addresses.
pub const SEPARATOR: &str = ".";

/// Look up the value at a dotted address.
pub fn get_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if let Some(value) = root.get(path) {
        return Some(value);
    }
    let mut current = root;
    for segment in path.split(SEPARATOR) {
        current = current.as_mapping()?.get(segment)?;
    }
    Some(current)
}

/// Mutable variant of [`get_path`].
pub fn get_path_mut<'a>(root: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    if root.get(path).is_some() {
        return root.get_mut(path);
    }
    let mut current = root;
    for segment in path.split(SEPARATOR) {
        current = current.as_mapping_mut()?.get_mut(segment)?;
    }
    Some(current)
}

pub fn contains_path(root: &Value, path: &str) -> bool {
    get_path(root, path).is_some()
}

/// Set the value at a dotted address, creating intermediate mappings.
///
/// Returns the offending prefix when an intermediate node exists but is not
/// a mapping.
pub fn set_path(root: &mut Value, path: &str, value: Value) -> Result<(), String> {
    if root.is_null() {
        *root = Value::Mapping(Mapping::new());
    }
    if let Some(slot) = root.as_mapping_mut().and_then(|map| map.get_mut(path)) {
        *slot = value;
        return Ok(());
    }
    let segments: Vec<&str> = path.split(SEPARATOR).collect();
    let (last, parents) = segments
        .split_last()
        .ok_or_else(|| path.to_string())?;
    let mut current = root;
    let mut walked = Vec::new();
    for segment in parents {
        walked.push(*segment);
        if current.is_null() {
            *current = Value::Mapping(Mapping::new());
        }
        let map = current
            .as_mapping_mut()
            .ok_or_else(|| walked.join(SEPARATOR))?;
        if !map.contains_key(*segment) {
            map.insert(Value::from(*segment), Value::Mapping(Mapping::new()));
        }
        current = map
            .get_mut(*segment)
            .ok_or_else(|| walked.join(SEPARATOR))?;
    }
    if current.is_null() {
        *current = Value::Mapping(Mapping::new());
    }
    let map = current
        .as_mapping_mut()
        .ok_or_else(|| walked.join(SEPARATOR))?;
    map.insert(Value::from(*last), value);
    Ok(())
}

/// Remove and return the value at a dotted address.
pub fn pop_path(root: &mut Value, path: &str) -> Option<Value> {
    if let Some(map) = root.as_mapping_mut() {
        if map.contains_key(path) {
            return remove_key(map, path);
        }
    }
    let (parent, last) = match path.rsplit_once(SEPARATOR) {
        Some((parent, last)) => (get_path_mut(root, parent)?, last),
        None => (root, path),
    };
    remove_key(parent.as_mapping_mut()?, last)
}

/// Remove a key while preserving the order of the remaining entries.
pub fn remove_key(map: &mut Mapping, key: &str) -> Option<Value> {
    if !map.contains_key(key) {
        return None;
    }
    let mut removed = None;
    let mut kept = Mapping::with_capacity(map.len());
    for (k, v) in std::mem::take(map) {
        if k.as_str() == Some(key) && removed.is_none() {
            removed = Some(v);
        } else {
            kept.insert(k, v);
        }
    }
    *map = kept;
    removed
}

/// Flatten nested mappings into one level joined by `separator`.
///
/// Empty mappings are kept as leaf values so [`expand`] can restore them.
pub fn flatten(mapping: &Mapping, separator: &str) -> Mapping {
    let mut out = Mapping::new();
    flatten_into(mapping, separator, None, &mut out);
    out
}

fn flatten_into(mapping: &Mapping, separator: &str, parent: Option<&str>, out: &mut Mapping) {
    for (key, value) in mapping {
        let label = key_label(key);
        let label = match parent {
            Some(parent) => format!("{parent}{separator}{label}"),
            None => label,
        };
        match value {
            Value::Mapping(inner) if !inner.is_empty() => {
                flatten_into(inner, separator, Some(&label), out);
            }
            other => {
                out.insert(Value::String(label), other.clone());
            }
        }
    }
}

/// Expand a flattened mapping back into nested mappings.
pub fn expand(mapping: &Mapping, separator: &str) -> Mapping {
    let mut out = Mapping::new();
    for (key, value) in mapping {
        let label = key_label(key);
        let mut target = &mut out;
        let mut segments = label.split(separator).peekable();
        while let Some(segment) = segments.next() {
            if segments.peek().is_none() {
                target.insert(Value::from(segment), value.clone());
                break;
            }
            let slot = target
                .entry(Value::from(segment))
                .or_insert_with(|| Value::Mapping(Mapping::new()));
            if !slot.is_mapping() {
                *slot = Value::Mapping(Mapping::new());
            }
            target = match slot.as_mapping_mut() {
                Some(map) => map,
                None => break,
            };
        }
    }
    out
}

fn key_label(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

/// Drop structurally equal duplicates, keeping first occurrences in order.
pub fn remove_dictlist_dupes(entries: Vec<Value>) -> Vec<Value> {
    let mut unique: Vec<Value> = Vec::with_capacity(entries.len());
    for entry in entries {
        if !unique.contains(&entry) {
            unique.push(entry);
        }
    }
    unique
}

/// Borrow a string-valued key from a mapping entry.
pub fn str_field<'a>(entry: &'a Value, key: &str) -> Option<&'a str> {
    entry.get(key).and_then(Value::as_str)
}

/// Render a scalar for messages and registry parameters.
pub fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
#[path = "document_tests.rs"]
mod tests;
