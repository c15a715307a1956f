//! Wildcard expansion of `read`/`write` entries against a registry.
//!
//! An entry such as `data_product: SEIRS_model/*` is replaced by one entry per
//! matching registry object. Only one key of an entry may carry a wildcard.
use crate::document::{self, scalar_string};
use crate::error::{FairError, FairResult};
use crate::registry::{self, convert_key_value_to_id, Endpoint, Params, RegistryApi};
use crate::versioning::{get_correct_version, is_incrementer};
use serde_json::Value as JsonValue;
use serde_yaml::Value;
use tracing::{debug, info};

pub const GLOB_CHAR: char = '*';

/// `use` keys that are never sent as search filters.
const UNSEARCHABLE_USE_KEYS: [&str; 1] = ["cache"];

fn globbed_pairs(entry: &Value) -> Vec<(String, String)> {
    entry
        .as_mapping()
        .map(|map| {
            map.iter()
                .filter_map(|(key, value)| match (key.as_str(), value.as_str()) {
                    (Some(key), Some(value)) if value.contains(GLOB_CHAR) => {
                        Some((key.to_string(), value.to_string()))
                    }
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

fn result_value(result: &JsonValue, key: &str) -> Option<String> {
    match result.get(key)? {
        JsonValue::String(text) => Some(text.clone()),
        JsonValue::Null => None,
        other => Some(other.to_string()),
    }
}

/// Build search parameters from the wildcard and the entry's `use` block.
///
/// Returns `None` when the entry names a namespace the registry does not
/// know, in which case nothing can match.
fn search_params(
    entry: &Value,
    glob_key: &str,
    search_key: &str,
    glob: &str,
    registry: &dyn RegistryApi,
    endpoint: &Endpoint,
) -> FairResult<Option<Params>> {
    let mut params = Params::from([(search_key.to_string(), glob.to_string())]);
    let Some(use_block) = entry.get("use").and_then(Value::as_mapping) else {
        return Ok(Some(params));
    };
    for (key, value) in use_block {
        let (Some(key), Some(value)) = (key.as_str(), scalar_string(value)) else {
            continue;
        };
        if key == glob_key || UNSEARCHABLE_USE_KEYS.contains(&key) {
            continue;
        }
        if key == "version" && is_incrementer(&value) {
            continue;
        }
        if key == "namespace" {
            match convert_key_value_to_id(registry, endpoint, "namespace", &value) {
                Ok(id) => {
                    params.insert(key.to_string(), id);
                }
                Err(FairError::Registry(msg)) => {
                    debug!(%msg, "namespace not on registry, wildcard has no matches");
                    return Ok(None);
                }
                Err(err) => return Err(err),
            }
            continue;
        }
        params.insert(key.to_string(), value);
    }
    Ok(Some(params))
}

/// Expand wildcard entries of `block` in place.
///
/// When `remove_wildcard` is false the wildcard entry itself is kept, with
/// `use.version` resolved from `version`, so new objects can still be
/// written under the pattern. The expanded block is de-duplicated.
pub fn glob_read_write(
    doc: &mut Value,
    block: &str,
    version: &str,
    registry: &dyn RegistryApi,
    endpoint: &Endpoint,
    search_key: Option<&str>,
    remove_wildcard: bool,
) -> FairResult<()> {
    let Some(entries) = doc.get(block).and_then(Value::as_sequence).cloned() else {
        return Ok(());
    };
    let mut parsed: Vec<Value> = Vec::with_capacity(entries.len());

    for entry in entries {
        let globs = globbed_pairs(&entry);
        let (glob_key, glob) = match globs.as_slice() {
            [] => {
                parsed.push(entry);
                continue;
            }
            [single] => single.clone(),
            _ => {
                return Err(FairError::NotImplemented(format!(
                    "Only one key-value pair in a '{block}' list entry may contain a globbable value"
                )))
            }
        };

        if !remove_wildcard {
            let resolved = get_correct_version(version, &[], block != "read")?;
            let mut original = entry.clone();
            document::set_path(
                &mut original,
                "use.version",
                Value::String(resolved.to_string()),
            )
            .map_err(|parent| FairError::KeyPath {
                key: "use.version".to_string(),
                parent,
            })?;
            parsed.push(original);
        }

        let key = match search_key.or_else(|| registry::search_key(&glob_key)) {
            Some(key) => key,
            None => {
                return Err(FairError::NotApplicable(format!(
                    "no search key for object type '{glob_key}'"
                )))
            }
        };

        let Some(params) = search_params(&entry, &glob_key, key, &glob, registry, endpoint)? else {
            continue;
        };
        let results = registry.get(endpoint, &glob_key, &params)?;
        info!(block, pattern = %glob, matches = results.len(), "expanded wildcard");

        for result in &results {
            let Some(concrete) = result_value(result, key) else {
                continue;
            };
            let mut clone = entry.clone();
            if let Some(map) = clone.as_mapping_mut() {
                if map.contains_key(glob_key.as_str()) {
                    map.insert(Value::from(glob_key.as_str()), Value::from(concrete.as_str()));
                }
                if let Some(use_block) = map.get_mut("use").and_then(Value::as_mapping_mut) {
                    if use_block.contains_key(glob_key.as_str()) {
                        use_block.insert(
                            Value::from(glob_key.as_str()),
                            Value::from(concrete.as_str()),
                        );
                    }
                }
            }
            parsed.push(clone);
        }
    }

    let deduped = document::remove_dictlist_dupes(parsed);
    if let Some(map) = doc.as_mapping_mut() {
        map.insert(Value::from(block), Value::Sequence(deduped));
    }
    Ok(())
}

/// Whether any string value in the entry carries a wildcard.
pub fn is_globbed(entry: &Value) -> bool {
    !globbed_pairs(entry).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRegistry;

    fn endpoint() -> Endpoint {
        Endpoint::new("http://127.0.0.1:8000/api/", None)
    }

    fn doc(text: &str) -> Value {
        serde_yaml::from_str(text).expect("parse yaml")
    }

    fn names(doc: &Value, block: &str) -> Vec<String> {
        doc[block]
            .as_sequence()
            .expect("block")
            .iter()
            .map(|entry| entry["data_product"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    fn seeded() -> FakeRegistry {
        let registry = FakeRegistry::new("http://127.0.0.1:8000/api");
        let psu = registry.add_namespace("PSU");
        registry.add_data_product("SEIRS_model/parameters/1", &psu, "1.0.0");
        registry.add_data_product("SEIRS_model/parameters/1", &psu, "1.1.0");
        registry.add_data_product("SEIRS_model/parameters/2", &psu, "1.0.0");
        registry.add_data_product("SIR_model/parameters", &psu, "1.0.0");
        registry
    }

    #[test]
    fn read_wildcard_fans_out_without_duplicates() {
        let registry = seeded();
        let mut config = doc(
            "read:\n- data_product: SEIRS_model/*\n  use:\n    namespace: PSU\n    version: ${{ LATEST }}\n",
        );
        glob_read_write(
            &mut config,
            "read",
            "${{ LATEST }}",
            &registry,
            &endpoint(),
            None,
            true,
        )
        .expect("expand");
        assert_eq!(
            names(&config, "read"),
            vec!["SEIRS_model/parameters/1", "SEIRS_model/parameters/2"]
        );
        assert_eq!(
            config["read"][0]["use"]["version"].as_str(),
            Some("${{ LATEST }}")
        );
    }

    #[test]
    fn write_wildcard_keeps_pattern_entry() {
        let registry = seeded();
        let mut config = doc(
            "write:\n- data_product: SIR_model/*\n  file_type: csv\n  use:\n    namespace: PSU\n",
        );
        glob_read_write(
            &mut config,
            "write",
            "${{ PATCH }}",
            &registry,
            &endpoint(),
            None,
            false,
        )
        .expect("expand");
        let block = config["write"].as_sequence().expect("write");
        assert_eq!(block.len(), 2);
        assert_eq!(block[0]["data_product"].as_str(), Some("SIR_model/*"));
        assert_eq!(block[0]["use"]["version"].as_str(), Some("0.0.1"));
        assert_eq!(block[1]["data_product"].as_str(), Some("SIR_model/parameters"));
    }

    #[test]
    fn exact_versions_filter_the_search() {
        let registry = seeded();
        let mut config = doc(
            "read:\n- data_product: SEIRS_model/*\n  use:\n    namespace: PSU\n    version: 1.1.0\n",
        );
        glob_read_write(&mut config, "read", "${{ LATEST }}", &registry, &endpoint(), None, true)
            .expect("expand");
        assert_eq!(names(&config, "read"), vec!["SEIRS_model/parameters/1"]);
    }

    #[test]
    fn unknown_namespace_matches_nothing() {
        let registry = seeded();
        let mut config = doc(
            "read:\n- data_product: SEIRS_model/*\n  use:\n    namespace: nowhere\n- data_product: fixed\n",
        );
        glob_read_write(&mut config, "read", "${{ LATEST }}", &registry, &endpoint(), None, true)
            .expect("expand");
        assert_eq!(names(&config, "read"), vec!["fixed"]);
    }

    #[test]
    fn use_block_copy_of_the_key_is_rewritten_too() {
        let registry = seeded();
        let mut config = doc(
            "read:\n- data_product: SIR_*\n  use:\n    data_product: SIR_*\n    namespace: PSU\n",
        );
        glob_read_write(&mut config, "read", "${{ LATEST }}", &registry, &endpoint(), None, true)
            .expect("expand");
        assert_eq!(
            config["read"][0]["use"]["data_product"].as_str(),
            Some("SIR_model/parameters")
        );
    }

    #[test]
    fn two_wildcards_in_one_entry_are_unsupported() {
        let registry = seeded();
        let mut config = doc("read:\n- data_product: SEIRS_*\n  description: any*\n");
        let result =
            glob_read_write(&mut config, "read", "${{ LATEST }}", &registry, &endpoint(), None, true);
        assert!(matches!(result, Err(FairError::NotImplemented(_))));
    }

    #[test]
    fn wildcard_on_unsearchable_key_is_not_applicable() {
        let registry = seeded();
        let mut config = doc("read:\n- description: any*\n");
        let result =
            glob_read_write(&mut config, "read", "${{ LATEST }}", &registry, &endpoint(), None, true);
        assert!(matches!(result, Err(FairError::NotApplicable(_))));
        assert!(registry.requests().is_empty());
    }

    #[test]
    fn blocks_without_wildcards_are_untouched() {
        let registry = seeded();
        let text = "read:\n- data_product: fixed\n  use:\n    version: 1.0.0\n";
        let mut config = doc(text);
        glob_read_write(&mut config, "read", "${{ LATEST }}", &registry, &endpoint(), None, true)
            .expect("expand");
        assert_eq!(config, doc(text));
        assert!(registry.requests().is_empty());
        assert!(!is_globbed(&config["read"][0]));
    }
}
