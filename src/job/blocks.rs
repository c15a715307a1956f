//! Per-entry filling and cleanup of the `read`, `write` and `register` blocks.
use super::JobConfiguration;
use crate::document::{self, remove_key, str_field};
use crate::error::{FairError, FairResult};
use crate::globbing::GLOB_CHAR;
use crate::versioning::undo_incrementer;
use serde_yaml::{Mapping, Value};
use tracing::{debug, warn};

/// Marks a `read` entry created from a registration in this job.
pub const REGISTERED_TAG: &str = "registered";
/// Internal markers stripped before the configuration is written.
pub const STATUS_TAGS: [&str; 1] = [REGISTERED_TAG];

/// Keys allowed on a `read`/`write` entry in the working configuration.
const FINAL_PERMITTED: [&str; 4] = ["data_product", "public", "use", "description"];
const FINAL_PERMITTED_WRITE: [&str; 1] = ["file_type"];

/// `run_metadata` keys only needed while resolving.
const RESOLUTION_ONLY_METADATA: [&str; 2] = ["default_read_version", "default_write_version"];

pub(crate) fn entries(job: &JobConfiguration, block: &str) -> Vec<Value> {
    job.get(block)
        .and_then(Value::as_sequence)
        .cloned()
        .unwrap_or_default()
}

fn set_entries(job: &mut JobConfiguration, block: &str, entries: Vec<Value>) {
    if let Some(root) = job.doc.as_mapping_mut() {
        root.insert(Value::from(block), Value::Sequence(entries));
    }
}

/// The entry's `use` mapping, created when absent or not a mapping.
pub(crate) fn use_mut(entry: &mut Mapping) -> &mut Mapping {
    let slot = entry
        .entry(Value::from("use"))
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    if !slot.is_mapping() {
        *slot = Value::Mapping(Mapping::new());
    }
    match slot {
        Value::Mapping(map) => map,
        _ => unreachable!("use block was just replaced by a mapping"),
    }
}

pub(crate) fn use_field(entry: &Value, key: &str) -> Option<String> {
    entry
        .get("use")
        .and_then(|block| block.get(key))
        .and_then(document::scalar_string)
}

fn names_object(entry: &Value) -> bool {
    entry.get("data_product").is_some() || entry.get("external_object").is_some()
}

/// Default `use.namespace` of every object entry in `block`.
pub(crate) fn fill_namespaces(job: &mut JobConfiguration, block: &str) {
    let default = if block == "read" {
        job.default_input_namespace()
    } else {
        job.default_output_namespace()
    };
    let Some(default) = default else {
        return;
    };
    let mut filled = entries(job, block);
    for entry in filled.iter_mut().filter(|entry| names_object(entry)) {
        let Some(map) = entry.as_mapping_mut() else {
            continue;
        };
        let use_block = use_mut(map);
        if !use_block.contains_key("namespace") {
            use_block.insert(Value::from("namespace"), Value::from(default.as_str()));
        }
    }
    set_entries(job, block, filled);
}

/// Fill `use` defaults and `public` for every block.
pub(crate) fn fill_all_block_types(job: &mut JobConfiguration) {
    for block in super::BLOCK_TYPES {
        if !job.contains(block) {
            continue;
        }
        debug!(block, "filling block");
        let filled = entries(job, block)
            .into_iter()
            .map(|entry| fill_block_item(job, block, entry))
            .collect();
        set_entries(job, block, filled);
    }
}

fn fill_block_item(job: &JobConfiguration, block: &str, mut entry: Value) -> Value {
    let public = job.is_public_global();
    let Some(map) = entry.as_mapping_mut() else {
        return entry;
    };
    use_mut(map);

    if block == "register"
        && map.contains_key("external_object")
        && !map.contains_key("data_product")
    {
        let name = map.get("external_object").cloned().unwrap_or(Value::Null);
        let use_block = use_mut(map);
        if !use_block.contains_key("data_product") {
            use_block.insert(Value::from("data_product"), name);
        }
    }

    if map.contains_key("data_product") || map.contains_key("external_object") {
        fill_object_use(job, block, map);
    }

    if matches!(block, "write" | "register") && !map.contains_key("public") {
        map.insert(Value::from("public"), Value::Bool(public));
    }
    entry
}

fn fill_object_use(job: &JobConfiguration, block: &str, map: &mut Mapping) {
    if let Some(namespace) = remove_key(map, "namespace") {
        use_mut(map).insert(Value::from("namespace"), namespace);
    }
    if !use_mut(map).contains_key("namespace") {
        let namespace = match block {
            "read" => job.default_input_namespace(),
            "register" => map
                .get("namespace_name")
                .and_then(document::scalar_string)
                .or_else(|| job.default_output_namespace()),
            _ => job.default_output_namespace(),
        };
        if let Some(namespace) = namespace {
            use_mut(map).insert(Value::from("namespace"), Value::from(namespace));
        }
    }

    if !use_mut(map).contains_key("version") {
        let version = match remove_key(map, "version") {
            Some(version) => version,
            None if block == "read" => Value::from(job.default_read_version()),
            None => Value::from(job.default_write_version()),
        };
        use_mut(map).insert(Value::from("version"), version);
    }

    let concrete = map
        .get("data_product")
        .and_then(Value::as_str)
        .filter(|name| !name.contains(GLOB_CHAR))
        .map(str::to_string);
    if let Some(name) = concrete {
        let use_block = use_mut(map);
        if !use_block.contains_key("data_product") {
            use_block.insert(Value::from("data_product"), Value::from(name));
        }
    }
}

/// Turn every object registration into a `read` entry tagged as registered.
pub(crate) fn register_to_read(job: &JobConfiguration) -> FairResult<Vec<Value>> {
    let mut readables = Vec::new();
    for entry in entries(job, "register") {
        let has_product = entry.get("data_product").is_some();
        let has_external = entry.get("external_object").is_some();
        let mut readable = entry.clone();
        let Some(map) = readable.as_mapping_mut() else {
            continue;
        };
        match (has_product, has_external) {
            (true, true) => {
                return Err(FairError::user_config(
                    "Only one type may be provided (data_product/external_object)",
                ))
            }
            (false, false) => {
                let keys: Vec<String> = map
                    .keys()
                    .filter_map(|key| key.as_str().map(str::to_string))
                    .collect();
                return Err(FairError::user_config(format!(
                    "Found registration for unknown item with keys {keys:?}"
                )));
            }
            (false, true) => {
                if let Some(name) = remove_key(map, "external_object") {
                    map.insert(Value::from("data_product"), name);
                }
            }
            (true, false) => {}
        }
        remove_key(map, "public");
        map.insert(Value::from(REGISTERED_TAG), Value::Bool(true));
        readables.push(readable);
    }
    Ok(readables)
}

/// Rewind write directives on `read` entries and default their namespace.
pub(crate) fn update_use_sections(job: &mut JobConfiguration) {
    let fallback = job.default_input_namespace();
    let mut updated = entries(job, "read");
    for entry in updated.iter_mut() {
        if entry.get("data_product").is_none() {
            continue;
        }
        let namespace_name = entry
            .get("namespace_name")
            .and_then(document::scalar_string);
        let Some(map) = entry.as_mapping_mut() else {
            continue;
        };
        let name = entry_name(map).map(str::to_string);
        let use_block = use_mut(map);
        if let Some(version) = use_block.get("version").and_then(Value::as_str) {
            let rewound = undo_incrementer(version);
            use_block.insert(Value::from("version"), Value::from(rewound));
        }
        if !use_block.contains_key("namespace") {
            match namespace_name.or_else(|| fallback.clone()) {
                Some(namespace) => {
                    use_block.insert(Value::from("namespace"), Value::from(namespace));
                }
                None => warn!(?name, "read entry has no namespace"),
            }
        }
    }
    set_entries(job, "read", updated);
}

fn entry_name(map: &Mapping) -> Option<&str> {
    map.get("data_product").and_then(Value::as_str)
}

/// Drop top-level keys repeated with an equal value under `use`.
fn dedupe_use_keys(map: &mut Mapping) {
    let Some(use_block) = map.get("use").and_then(Value::as_mapping).cloned() else {
        return;
    };
    for (key, value) in &use_block {
        let Some(key) = key.as_str() else {
            continue;
        };
        if key != "data_product" && map.get(key) == Some(value) {
            remove_key(map, key);
        }
    }
}

/// Build the working configuration: `run_metadata` plus the permitted keys
/// of each `read`/`write` entry. Empty blocks are dropped.
pub(crate) fn clean(job: &JobConfiguration) -> Value {
    let mut cleaned = Mapping::new();
    let mut metadata = job
        .get("run_metadata")
        .and_then(Value::as_mapping)
        .cloned()
        .unwrap_or_default();
    for key in RESOLUTION_ONLY_METADATA {
        remove_key(&mut metadata, key);
    }
    cleaned.insert(Value::from("run_metadata"), Value::Mapping(metadata));

    for block in ["read", "write"] {
        let kept: Vec<Value> = entries(job, block)
            .into_iter()
            .filter_map(|entry| {
                let mut map = entry.as_mapping()?.clone();
                dedupe_use_keys(&mut map);
                let permitted = |key: &str| {
                    FINAL_PERMITTED.contains(&key)
                        || STATUS_TAGS.contains(&key)
                        || (block == "write" && FINAL_PERMITTED_WRITE.contains(&key))
                };
                let filtered: Mapping = map
                    .into_iter()
                    .filter(|(key, _)| key.as_str().is_some_and(permitted))
                    .collect();
                Some(Value::Mapping(filtered))
            })
            .collect();
        if kept.is_empty() {
            debug!(block, "dropping empty block");
            continue;
        }
        cleaned.insert(Value::from(block), Value::Sequence(kept));
    }
    Value::Mapping(cleaned)
}

/// Strip internal markers from `read`/`write` entries.
pub(crate) fn remove_status_tags(job: &mut JobConfiguration) {
    for block in ["read", "write"] {
        if !job.contains(block) {
            continue;
        }
        let mut stripped = entries(job, block);
        for entry in stripped.iter_mut() {
            if let Some(map) = entry.as_mapping_mut() {
                for tag in STATUS_TAGS {
                    remove_key(map, tag);
                }
            }
        }
        set_entries(job, block, stripped);
    }
}

/// Whether `entry` names a data product (ignoring wildcard patterns).
pub(crate) fn concrete_product(entry: &Value) -> Option<&str> {
    str_field(entry, "data_product").filter(|name| !name.contains(GLOB_CHAR))
}
