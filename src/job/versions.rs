//! Resolution of `use.version` against versions already on the registry.
use super::blocks::{concrete_product, entries, use_field, use_mut};
use super::{JobConfiguration, JobContext, JobMode};
use crate::error::{FairError, FairResult};
use crate::globbing::is_globbed;
use crate::registry::{convert_key_value_to_id, Params};
use crate::variables::PLACEHOLDER_OPEN;
use crate::versioning::{get_correct_version, versions_from_results};
use serde_yaml::Value;
use tracing::{debug, error, warn};

/// Replace every directive version in `block` with a concrete version.
///
/// Reads must resolve to a version that exists; writes and registrations to
/// one that does not. A registration whose version cannot be resolved is kept
/// as is.
pub(crate) fn fill_versions(
    job: &JobConfiguration,
    ctx: &JobContext<'_>,
    mode: JobMode,
    block: &str,
) -> FairResult<Vec<Value>> {
    debug!(block, "filling versions");
    let default_version = if block == "read" {
        job.default_read_version()
    } else {
        job.default_write_version()
    };
    let endpoint = job.lookup_endpoint(ctx.settings, mode, block)?;
    let is_write = block != "read";
    let mut filled = Vec::new();

    for mut entry in entries(job, block) {
        if entry.get("data_product").is_none() && entry.get("external_object").is_none() {
            filled.push(entry);
            continue;
        }
        let Some(map) = entry.as_mapping_mut() else {
            filled.push(entry);
            continue;
        };
        if !use_mut(map).contains_key("version") {
            use_mut(map).insert(Value::from("version"), Value::from(default_version.as_str()));
        }

        let name = use_field(&entry, "data_product")
            .or_else(|| concrete_product(&entry).map(str::to_string));
        let Some(name) = name else {
            if !is_globbed(&entry) {
                warn!(?entry, "no 'data_product' under 'use', version left unresolved");
            }
            filled.push(entry);
            continue;
        };
        let namespace = use_field(&entry, "namespace").ok_or_else(|| {
            FairError::user_config(format!(
                "No namespace resolved for '{name}' in '{block}' block"
            ))
        })?;
        let version = use_field(&entry, "version").unwrap_or_else(|| default_version.clone());

        let results = match convert_key_value_to_id(ctx.registry, &endpoint, "namespace", &namespace)
        {
            Ok(namespace_id) => {
                let mut params = Params::from([
                    ("name".to_string(), name.clone()),
                    ("namespace".to_string(), namespace_id),
                ]);
                if !version.contains(PLACEHOLDER_OPEN) {
                    params.insert("version".to_string(), version.clone());
                }
                ctx.registry.get(&endpoint, "data_product", &params)?
            }
            Err(FairError::Registry(msg)) => {
                debug!(%msg, namespace, "namespace not registered, no existing versions");
                Vec::new()
            }
            Err(err) => return Err(err),
        };
        let existing = versions_from_results(&results)?;

        match get_correct_version(&version, &existing, is_write) {
            Ok(resolved) => {
                if let Some(map) = entry.as_mapping_mut() {
                    use_mut(map).insert(Value::from("version"), Value::from(resolved.to_string()));
                }
            }
            Err(err @ FairError::UserConfig { .. }) if block == "register" => {
                debug!(%err, data_product = %name, "keeping registration version as given");
            }
            Err(err) => {
                error!(block, data_product = %name, %version, "failed to resolve version");
                return Err(err);
            }
        }

        if use_field(&entry, "version").is_some_and(|v| v.contains(PLACEHOLDER_OPEN)) {
            error!(?entry, "failed to evaluate version directive");
        }
        filled.push(entry);
    }
    Ok(filled)
}
