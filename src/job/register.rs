//! The `register` block: namespace and author declarations, plus fetching
//! registered objects into the local data store for `fair pull`.
use super::blocks::{entries, use_field, use_mut};
use super::{write_atomic, JobConfiguration, JobContext};
use crate::document::scalar_string;
use crate::error::{FairError, FairResult};
use crate::registry::{
    convert_key_value_to_id, object_id_from_url, object_url, post_else_get, strip_empty_fields,
    Endpoint, Params,
};
use crate::versioning::{get_correct_version, versions_from_results, Version};
use serde_json::{json, Value as JsonValue};
use serde_yaml::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const REQUIRED_FOR_PRODUCT: [&str; 5] = ["root", "path", "file_type", "version", "public"];
const REQUIRED_FOR_EXTERNAL: [&str; 6] = ["root", "path", "file_type", "version", "public", "primary"];

/// Keys that cannot share an entry with a `namespace` declaration.
const NAMESPACE_CONFLICTS: [&str; 3] = ["data_product", "external_object", "author"];
/// Keys that cannot share an entry with an `author` declaration.
const AUTHOR_CONFLICTS: [&str; 3] = ["data_product", "external_object", "namespace"];

fn text(entry: &Value, key: &str) -> Option<String> {
    entry.get(key).and_then(scalar_string)
}

/// Split `register` into declarations keyed by `kind` and everything else.
fn take_declarations(job: &mut JobConfiguration, kind: &str) -> Vec<Value> {
    let (declared, kept): (Vec<Value>, Vec<Value>) = entries(job, "register")
        .into_iter()
        .partition(|entry| entry.get(kind).is_some());
    if let Some(root) = job.doc.as_mapping_mut() {
        root.insert(Value::from("register"), Value::Sequence(kept));
    }
    declared
}

/// Post every `namespace` declaration to the local registry and remove it
/// from the `register` block.
pub(crate) fn handle_register_namespaces(
    job: &mut JobConfiguration,
    ctx: &JobContext<'_>,
) -> FairResult<()> {
    let declared = take_declarations(job, "namespace");
    if declared.is_empty() {
        return Ok(());
    }
    let endpoint = job.local_endpoint(ctx.settings)?;
    for entry in declared {
        if let Some(conflict) = NAMESPACE_CONFLICTS
            .iter()
            .find(|key| entry.get(**key).is_some())
        {
            return Err(FairError::user_config_with_hint(
                format!("Cannot register a 'namespace' and a '{conflict}' in the same entry"),
                "Did you mean 'namespace_name'?",
            ));
        }
        let Some(name) = text(&entry, "namespace") else {
            continue;
        };
        if job.parsed.namespaces.contains(&name) {
            warn!(namespace = %name, "ignoring repeated namespace registration");
            continue;
        }
        let data = strip_empty_fields(&json!({
            "name": name,
            "full_name": text(&entry, "full_name"),
            "website": text(&entry, "website"),
        }));
        let params = Params::from([("name".to_string(), name.clone())]);
        let url = post_else_get(ctx.registry, &endpoint, "namespace", &data, &params)?;
        info!(namespace = %name, %url, "registered namespace");
        job.parsed.namespaces.push(name);
    }
    Ok(())
}

/// Post every `author` declaration to the local registry and remove it from
/// the `register` block.
pub(crate) fn handle_register_authors(
    job: &mut JobConfiguration,
    ctx: &JobContext<'_>,
) -> FairResult<()> {
    let declared = take_declarations(job, "author");
    if declared.is_empty() {
        return Ok(());
    }
    let endpoint = job.local_endpoint(ctx.settings)?;
    for entry in declared {
        if let Some(conflict) = AUTHOR_CONFLICTS
            .iter()
            .find(|key| entry.get(**key).is_some())
        {
            return Err(FairError::user_config(format!(
                "Invalid use of tag 'author' in non-author registration, found '{conflict}'"
            )));
        }
        let Some(name) = text(&entry, "name").or_else(|| text(&entry, "author")) else {
            continue;
        };
        if job.parsed.authors.contains(&name) {
            warn!(author = %name, "ignoring repeated author registration");
            continue;
        }
        let data = strip_empty_fields(&json!({
            "name": name,
            "identifier": text(&entry, "identifier"),
            "uuid": text(&entry, "uuid"),
        }));
        let params = Params::from([("name".to_string(), name.clone())]);
        let url = post_else_get(ctx.registry, &endpoint, "author", &data, &params)?;
        info!(author = %name, %url, "registered author");
        job.parsed.authors.push(name);
    }
    Ok(())
}

/// Copy `namespace_name` of each registration into `use.namespace`. The
/// namespace must be declared in the same `register` block.
pub(crate) fn switch_namespace_name_to_use(job: &mut JobConfiguration) -> FairResult<()> {
    let mut switched = entries(job, "register");
    for entry in switched.iter_mut() {
        let Some(namespace) = text(entry, "namespace_name") else {
            continue;
        };
        if !job.parsed.namespaces.contains(&namespace) {
            return Err(FairError::user_config_with_hint(
                format!("Attempt to register object with unknown namespace '{namespace}'"),
                "Add new 'namespace' as separate 'register' entry",
            ));
        }
        if let Some(map) = entry.as_mapping_mut() {
            use_mut(map).insert(Value::from("namespace"), Value::from(namespace));
        }
    }
    job.set("register", Value::Sequence(switched))
}

/// A registration field given either at the top level or under `use`.
fn field(entry: &Value, key: &str) -> Option<Value> {
    entry
        .get(key)
        .or_else(|| entry.get("use").and_then(|block| block.get(key)))
        .cloned()
}

fn field_text(entry: &Value, key: &str) -> Option<String> {
    field(entry, key).as_ref().and_then(scalar_string)
}

fn source_url(root: &str, path: &str) -> String {
    format!(
        "{}/{}",
        root.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// One checked `register` entry ready to be fetched.
struct Registration {
    name: String,
    namespace: String,
    version: String,
    file_type: String,
    source: String,
    cache: Option<PathBuf>,
    public: bool,
    external: Option<JsonValue>,
    description: Option<String>,
}

fn parse_registration(entry: &Value) -> FairResult<Registration> {
    let is_external = entry.get("external_object").is_some();
    match (entry.get("data_product").is_some(), is_external) {
        (true, true) => {
            return Err(FairError::user_config(
                "Only one type may be provided (data_product/external_object)",
            ))
        }
        (false, false) => {
            return Err(FairError::user_config(
                "Expected either 'data_product' or 'external_object' in 'register' item",
            ))
        }
        _ => {}
    }
    let required: &[&str] = if is_external {
        &REQUIRED_FOR_EXTERNAL
    } else {
        &REQUIRED_FOR_PRODUCT
    };
    if let Some(missing) = required.iter().find(|key| field(entry, key).is_none()) {
        return Err(FairError::user_config(format!(
            "Expected key '{missing}' in 'register' item"
        )));
    }

    let name = use_field(entry, "data_product").ok_or_else(|| {
        FairError::user_config("Registration has no data product name under 'use'")
    })?;
    let namespace = use_field(entry, "namespace").ok_or_else(|| {
        FairError::user_config(format!("No namespace resolved for registration '{name}'"))
    })?;

    let external = if is_external {
        let identifier = text(entry, "identifier");
        let unique_name = text(entry, "unique_name");
        match (&identifier, &unique_name) {
            (Some(_), Some(_)) => {
                return Err(FairError::user_config(
                    "Only one unique identifier may be provided (doi/unique_name)",
                ))
            }
            (None, None) => {
                return Err(FairError::user_config(
                    "External objects require either a unique identifier or unique name",
                ))
            }
            _ => {}
        }
        Some(json!({
            "identifier": identifier,
            "alternate_identifier": unique_name,
            "alternate_identifier_type": text(entry, "alternate_identifier_type"),
            "primary_not_supplement": field(entry, "primary").and_then(|v| v.as_bool()),
            "release_date": text(entry, "release_date"),
            "title": text(entry, "title"),
            "description": text(entry, "description"),
        }))
    } else {
        None
    };

    let root = field_text(entry, "root").unwrap_or_default();
    let path = field_text(entry, "path").unwrap_or_default();
    Ok(Registration {
        name,
        namespace,
        version: field_text(entry, "version").unwrap_or_default(),
        file_type: field_text(entry, "file_type").unwrap_or_default(),
        source: source_url(&root, &path),
        cache: field_text(entry, "cache").map(PathBuf::from),
        public: field(entry, "public").and_then(|v| v.as_bool()).unwrap_or(true),
        external,
        description: text(entry, "description"),
    })
}

fn object_id(url: &str) -> FairResult<String> {
    object_id_from_url(url)
        .ok_or_else(|| FairError::Registry(format!("Failed to extract ID from URL '{url}'")))
}

/// Download each registration into the local data store and record it on
/// the local registry. Returns the URL of every registered object.
pub(crate) fn fetch_registrations(
    job: &JobConfiguration,
    ctx: &JobContext<'_>,
) -> FairResult<Vec<String>> {
    let endpoint = job.local_endpoint(ctx.settings)?;
    let store = PathBuf::from(job.default_data_store()?);
    let mut stored = Vec::new();

    for entry in entries(job, "register") {
        let registration = parse_registration(&entry)?;
        if let Some(url) = fetch_one(ctx, &endpoint, &store, &registration)? {
            stored.push(url);
        }
    }
    Ok(stored)
}

fn fetch_one(
    ctx: &JobContext<'_>,
    endpoint: &Endpoint,
    store: &Path,
    registration: &Registration,
) -> FairResult<Option<String>> {
    let Registration {
        name,
        namespace,
        version,
        file_type,
        ..
    } = registration;
    let bytes = match &registration.cache {
        Some(cache) => fs::read(cache)
            .map_err(|err| FairError::io(format!("read {}", cache.display()), err))?,
        None => ctx.registry.download(&registration.source)?,
    };

    let relative = format!("{namespace}/{name}/{version}.{file_type}");
    let local_path = store.join(&relative);

    let namespace_id = match convert_key_value_to_id(ctx.registry, endpoint, "namespace", namespace)
    {
        Ok(id) => Some(id),
        Err(FairError::Registry(_)) => None,
        Err(err) => return Err(err),
    };
    if let Some(namespace_id) = &namespace_id {
        let params = Params::from([
            ("name".to_string(), name.clone()),
            ("namespace".to_string(), namespace_id.clone()),
        ]);
        let existing = ctx.registry.get(endpoint, "data_product", &params)?;
        let versions = versions_from_results(&existing)?;
        let requested = Version::parse(version)?;
        if versions.contains(&requested) {
            let unchanged = fs::read(&local_path).is_ok_and(|current| current == bytes);
            if unchanged {
                info!(data_product = %name, %version, "registration already stored, skipping");
                return Ok(None);
            }
            get_correct_version(version, &versions, true)?;
        }
    }

    write_atomic(&local_path, &bytes)?;
    debug!(path = %local_path.display(), bytes = bytes.len(), "stored registration");

    let namespace_url = post_else_get(
        ctx.registry,
        endpoint,
        "namespace",
        &json!({ "name": namespace }),
        &Params::from([("name".to_string(), namespace.clone())]),
    )?;
    let namespace_id = match namespace_id {
        Some(id) => id,
        None => object_id(&namespace_url)?,
    };

    let root = format!("file://{}/", store.display().to_string().trim_end_matches('/'));
    let root_url = post_else_get(
        ctx.registry,
        endpoint,
        "storage_root",
        &json!({ "root": root, "local": true }),
        &Params::from([("root".to_string(), root.clone())]),
    )?;
    let location_url = post_else_get(
        ctx.registry,
        endpoint,
        "storage_location",
        &json!({
            "path": relative,
            "public": registration.public,
            "storage_root": root_url,
        }),
        &Params::from([
            ("path".to_string(), relative.clone()),
            ("storage_root".to_string(), object_id(&root_url)?),
        ]),
    )?;
    let object = ctx.registry.post(
        endpoint,
        "object",
        &strip_empty_fields(&json!({
            "storage_location": location_url,
            "description": registration.description,
        })),
    )?;
    let object_location = object_url(&object)
        .ok_or_else(|| FairError::Registry("Expected URL for newly posted object".to_string()))?
        .to_string();

    let product_url = post_else_get(
        ctx.registry,
        endpoint,
        "data_product",
        &json!({
            "name": name,
            "namespace": namespace_url,
            "version": version,
            "object": object_location,
        }),
        &Params::from([
            ("name".to_string(), name.clone()),
            ("namespace".to_string(), namespace_id),
            ("version".to_string(), version.clone()),
        ]),
    )?;

    let Some(external) = &registration.external else {
        info!(data_product = %name, %version, url = %product_url, "registered data product");
        return Ok(Some(product_url));
    };
    let mut data = external.clone();
    if let Some(fields) = data.as_object_mut() {
        fields.insert("data_product".to_string(), JsonValue::String(product_url.clone()));
    }
    let external_url = post_else_get(
        ctx.registry,
        endpoint,
        "external_object",
        &strip_empty_fields(&data),
        &Params::from([("data_product".to_string(), object_id(&product_url)?)]),
    )?;
    info!(external_object = %name, %version, url = %external_url, "registered external object");
    Ok(Some(external_url))
}
