//! CLI configuration: the global and per-project `cli-config.yaml` files.
//!
//! Job documents take their defaults (namespaces, registry URLs, data store,
//! user identity) from here. The project file overrides the global one key by
//! key. Lookups use dotted addresses such as `registries.local.uri`.
use crate::document;
use crate::error::{FairError, FairResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CLI_CONFIG_FILE: &str = "cli-config.yaml";
pub const FAIR_FOLDER: &str = ".faircli";
pub const FAIR_HOME_ENV: &str = "FAIR_HOME";
pub const DEFAULT_REMOTE: &str = "origin";

const INIT_HINT: &str = "Have you run 'fair init'?";

/// Read-only accessors over the CLI configuration.
///
/// Implementors only supply raw dotted lookups and the home directory; the
/// typed accessors are shared.
pub trait CliConfiguration {
    fn value(&self, key: &str) -> Option<String>;

    /// Root of the per-user FAIR state (`~/.fair` unless overridden).
    fn home_dir(&self) -> PathBuf;

    fn jobs_dir(&self) -> PathBuf {
        self.home_dir().join("jobs")
    }

    fn require(&self, key: &str) -> FairResult<String> {
        self.value(key).filter(|v| !v.is_empty()).ok_or_else(|| {
            FairError::cli_config_with_hint(
                format!(
                    "Expected key '{}' in CLI configuration",
                    key.replace('.', ":")
                ),
                INIT_HINT,
            )
        })
    }

    fn local_registry_url(&self) -> FairResult<String> {
        self.require("registries.local.uri")
    }

    fn remote_registry_url(&self, label: &str) -> FairResult<String> {
        self.require(&format!("registries.{label}.uri"))
    }

    fn local_token(&self) -> FairResult<String> {
        let path = self
            .value("registries.local.token")
            .map(PathBuf::from)
            .unwrap_or_else(|| self.home_dir().join("registry").join("token"));
        read_token(&path, "local", Some("Try starting the local registry first"))
    }

    /// Token for a remote registry, `None` when the configuration names no
    /// token file.
    fn remote_token(&self, label: &str) -> FairResult<Option<String>> {
        match self.value(&format!("registries.{label}.token")) {
            Some(path) if !path.is_empty() => read_token(Path::new(&path), label, None).map(Some),
            _ => Ok(None),
        }
    }

    fn input_namespace(&self) -> Option<String> {
        self.value("namespaces.input")
    }

    fn output_namespace(&self) -> Option<String> {
        self.value("namespaces.output")
    }

    /// Given names and family name joined by a space.
    fn user_name(&self) -> FairResult<String> {
        let given = self.require("user.given_names")?;
        Ok(match self.value("user.family_name") {
            Some(family) if !family.is_empty() => format!("{given} {family}"),
            _ => given,
        })
    }

    fn user_email(&self) -> FairResult<String> {
        self.require("user.email")
    }

    fn user_uri(&self) -> FairResult<String> {
        match self.value("user.uri") {
            Some(uri) if !uri.is_empty() && uri != "None" => Ok(uri),
            _ => Err(FairError::cli_config("No user URI identifier defined.")),
        }
    }

    fn user_uuid(&self) -> FairResult<String> {
        let raw = match self.value("user.uuid") {
            Some(uuid) if !uuid.is_empty() && uuid != "None" => uuid,
            _ => return Err(FairError::cli_config("No UUID defined.")),
        };
        uuid::Uuid::parse_str(&raw)
            .map(|uuid| uuid.to_string())
            .map_err(|_| FairError::cli_config(format!("User UUID '{raw}' is not a valid UUID")))
    }

    fn local_repo(&self) -> Option<String> {
        self.value("git.local_repo")
    }

    fn git_remote_label(&self) -> String {
        self.value("git.remote")
            .unwrap_or_else(|| DEFAULT_REMOTE.to_string())
    }

    fn write_data_store(&self) -> Option<String> {
        self.value("registries.local.data_store")
    }
}

fn read_token(path: &Path, label: &str, hint: Option<&str>) -> FairResult<String> {
    let text = fs::read_to_string(path).map_err(|_| {
        FairError::file_not_found(
            format!(
                "Failed to find token for registry '{label}', file '{}' does not exist",
                path.display()
            ),
            hint,
        )
    })?;
    let token = text.lines().next().unwrap_or_default().trim().to_string();
    if token.is_empty() {
        return Err(FairError::cli_config(format!(
            "Cannot read token from file '{}', file is empty.",
            path.display()
        )));
    }
    Ok(token)
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_names: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orcid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GitSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_repo: Option<String>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NamespacesSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_store: Option<String>,
}

/// One `cli-config.yaml` file.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CliConfigFile {
    #[serde(default)]
    pub user: UserSection,
    #[serde(default)]
    pub git: GitSection,
    #[serde(default)]
    pub namespaces: NamespacesSection,
    #[serde(default)]
    pub registries: BTreeMap<String, RegistryEntry>,
}

impl CliConfigFile {
    pub fn load(path: &Path) -> FairResult<Self> {
        let text = fs::read_to_string(path).map_err(|_| {
            FairError::file_not_found(
                format!("Cannot read CLI configuration '{}'", path.display()),
                Some(INIT_HINT),
            )
        })?;
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&text).map_err(|err| {
            FairError::cli_config_with_hint(
                format!("Invalid CLI configuration '{}': {err}", path.display()),
                INIT_HINT,
            )
        })
    }

    fn flattened(&self) -> FairResult<serde_yaml::Mapping> {
        let value = serde_yaml::to_value(self)
            .map_err(|err| FairError::internal(format!("serialize CLI configuration: {err}")))?;
        Ok(value
            .as_mapping()
            .map(|map| document::flatten(map, document::SEPARATOR))
            .unwrap_or_default())
    }
}

/// Global configuration merged with an optional project configuration.
#[derive(Debug, Clone, Default)]
pub struct FairSettings {
    home: PathBuf,
    values: BTreeMap<String, String>,
}

/// `$FAIR_HOME`, else `~/.fair`.
pub fn default_home() -> FairResult<PathBuf> {
    if let Some(home) = std::env::var_os(FAIR_HOME_ENV) {
        return Ok(PathBuf::from(home));
    }
    dirs::home_dir()
        .map(|home| home.join(".fair"))
        .ok_or_else(|| FairError::cli_config("Cannot determine the user home directory"))
}

pub fn global_config_path(home: &Path) -> PathBuf {
    home.join("cli").join(CLI_CONFIG_FILE)
}

pub fn local_config_path(project: &Path) -> PathBuf {
    project.join(FAIR_FOLDER).join(CLI_CONFIG_FILE)
}

/// Walk up from `start` looking for a directory holding `.faircli`.
pub fn find_fair_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(FAIR_FOLDER).is_dir())
        .map(Path::to_path_buf)
}

impl FairSettings {
    /// Load `<home>/cli/cli-config.yaml` and, when given, the project file.
    /// Missing files contribute nothing.
    pub fn load(home: &Path, project: Option<&Path>) -> FairResult<Self> {
        let mut files = vec![global_config_path(home)];
        if let Some(project) = project {
            files.push(local_config_path(project));
        }
        let mut values = BTreeMap::new();
        for path in files {
            if !path.exists() {
                debug!(path = %path.display(), "no CLI configuration");
                continue;
            }
            debug!(path = %path.display(), "reading CLI configuration");
            for (key, value) in CliConfigFile::load(&path)?.flattened()? {
                if let (Some(key), Some(value)) = (key.as_str(), document::scalar_string(&value)) {
                    values.insert(key.to_string(), value);
                }
            }
        }
        Ok(Self {
            home: home.to_path_buf(),
            values,
        })
    }

    /// Settings built directly from dotted key/value pairs.
    pub fn from_pairs<K, V>(home: &Path, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            home: home.to_path_buf(),
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl CliConfiguration for FairSettings {
    fn value(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn home_dir(&self) -> PathBuf {
        self.home.clone()
    }
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
