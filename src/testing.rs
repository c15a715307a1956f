//! In-memory collaborators for exercising the pipeline without a registry
//! server or a git checkout.
use crate::error::{FairError, FairResult};
use crate::git::GitMetadata;
use crate::registry::{object_id_from_url, Endpoint, Params, RegistryApi};
use regex::Regex;
use serde_json::{json, Value as JsonValue};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::Path;

/// A registry that stores objects per type in memory.
///
/// Searches match string fields exactly, or as a glob when the parameter
/// contains `*`. A parameter that is a bare ID also matches an object field
/// holding a URL with that ID.
#[derive(Debug, Default)]
pub struct FakeRegistry {
    base: String,
    objects: RefCell<BTreeMap<String, Vec<JsonValue>>>,
    files: RefCell<BTreeMap<String, Vec<u8>>>,
    requests: RefCell<Vec<String>>,
}

impl FakeRegistry {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            ..Self::default()
        }
    }

    /// Insert an object, assigning it a URL; returns that URL.
    pub fn insert(&self, obj_type: &str, mut object: JsonValue) -> String {
        let mut objects = self.objects.borrow_mut();
        let entries = objects.entry(obj_type.to_string()).or_default();
        let url = format!(
            "{}/{}/{}/",
            self.base.trim_end_matches('/'),
            obj_type,
            entries.len() + 1
        );
        if let Some(fields) = object.as_object_mut() {
            fields.insert("url".to_string(), JsonValue::String(url.clone()));
        }
        entries.push(object);
        url
    }

    pub fn add_namespace(&self, name: &str) -> String {
        self.insert("namespace", json!({ "name": name }))
    }

    /// Add a data product under an existing namespace URL.
    pub fn add_data_product(&self, name: &str, namespace_url: &str, version: &str) -> String {
        self.insert(
            "data_product",
            json!({ "name": name, "namespace": namespace_url, "version": version }),
        )
    }

    pub fn add_file(&self, url: &str, bytes: &[u8]) {
        self.files
            .borrow_mut()
            .insert(url.to_string(), bytes.to_vec());
    }

    pub fn objects(&self, obj_type: &str) -> Vec<JsonValue> {
        self.objects
            .borrow()
            .get(obj_type)
            .cloned()
            .unwrap_or_default()
    }

    /// `"<method> <obj_type>"` for every call made so far.
    pub fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }

    fn record(&self, entry: String) {
        self.requests.borrow_mut().push(entry);
    }
}

fn field_matches(field: Option<&JsonValue>, wanted: &str) -> bool {
    let Some(field) = field else {
        return false;
    };
    let text = match field {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => return false,
        other => other.to_string(),
    };
    if wanted.contains('*') {
        let pattern = format!("^{}$", regex::escape(wanted).replace(r"\*", ".*"));
        return Regex::new(&pattern).is_ok_and(|re| re.is_match(&text));
    }
    text == wanted
        || (text.contains("://") && object_id_from_url(&text).as_deref() == Some(wanted))
}

fn identity_fields(obj_type: &str) -> &'static [&'static str] {
    match obj_type {
        "namespace" | "author" => &["name"],
        "data_product" => &["name", "namespace", "version"],
        "storage_root" => &["root"],
        "storage_location" => &["path", "storage_root"],
        "external_object" => &["data_product"],
        _ => &[],
    }
}

impl RegistryApi for FakeRegistry {
    fn get(
        &self,
        _endpoint: &Endpoint,
        obj_type: &str,
        params: &Params,
    ) -> FairResult<Vec<JsonValue>> {
        self.record(format!("get {obj_type}"));
        Ok(self
            .objects(obj_type)
            .into_iter()
            .filter(|object| {
                params
                    .iter()
                    .filter(|(_, value)| !value.is_empty())
                    .all(|(key, value)| field_matches(object.get(key), value))
            })
            .collect())
    }

    fn post(&self, _endpoint: &Endpoint, obj_type: &str, data: &JsonValue) -> FairResult<JsonValue> {
        self.record(format!("post {obj_type}"));
        let fields = identity_fields(obj_type);
        if !fields.is_empty() {
            let clash = self.objects(obj_type).into_iter().any(|existing| {
                fields
                    .iter()
                    .all(|field| existing.get(*field) == data.get(*field))
            });
            if clash {
                return Err(FairError::RegistryApiCall {
                    msg: format!("Cannot post object of type '{obj_type}' as it already exists"),
                    status: 409,
                });
            }
        }
        let url = self.insert(obj_type, data.clone());
        let mut stored = data.clone();
        if let Some(object) = stored.as_object_mut() {
            object.insert("url".to_string(), JsonValue::String(url));
        }
        Ok(stored)
    }

    fn url_get(&self, _endpoint: &Endpoint, url: &str) -> FairResult<JsonValue> {
        self.record(format!("url_get {url}"));
        self.objects
            .borrow()
            .values()
            .flatten()
            .find(|object| object.get("url").and_then(JsonValue::as_str) == Some(url))
            .cloned()
            .ok_or_else(|| FairError::RegistryApiCall {
                msg: format!("Attempt to access an unrecognised resource on registry: {url}"),
                status: 404,
            })
    }

    fn download(&self, url: &str) -> FairResult<Vec<u8>> {
        self.record(format!("download {url}"));
        self.files
            .borrow()
            .get(url)
            .cloned()
            .ok_or_else(|| FairError::RegistryApiCall {
                msg: format!("Failed to download '{url}'"),
                status: 404,
            })
    }
}

/// Fixed answers for [`GitMetadata`] queries.
#[derive(Debug, Clone)]
pub struct StaticGit {
    pub branch: String,
    pub remotes: BTreeMap<String, String>,
    pub commit: String,
    pub dirty: bool,
    pub tags: Vec<String>,
}

impl Default for StaticGit {
    fn default() -> Self {
        Self {
            branch: "main".to_string(),
            remotes: BTreeMap::from([(
                "origin".to_string(),
                "git@github.com:FAIRDataPipeline/FAIR-CLI.git".to_string(),
            )]),
            commit: "b7b2c8a6f3d94b2c1f1b4b36a5a8d4e6e3f2a1c0".to_string(),
            dirty: false,
            tags: Vec::new(),
        }
    }
}

impl GitMetadata for StaticGit {
    fn active_branch(&self, _repo: &Path) -> FairResult<String> {
        Ok(self.branch.clone())
    }

    fn remote_url(&self, _repo: &Path, label: &str) -> FairResult<String> {
        self.remotes.get(label).cloned().ok_or_else(|| {
            FairError::cli_config(format!("Failed to retrieve URL for git remote '{label}'"))
        })
    }

    fn latest_commit(&self, _repo: &Path, allow_dirty: bool) -> FairResult<String> {
        match (self.dirty, allow_dirty) {
            (false, _) => Ok(self.commit.clone()),
            (true, true) => Ok(format!("{}-dirty", self.commit)),
            (true, false) => Err(FairError::repository(
                "Cannot retrieve latest commit, repository contains uncommitted changes",
                None,
            )),
        }
    }

    fn latest_tag(&self, _repo: &Path) -> FairResult<Option<String>> {
        Ok(self.tags.first().cloned())
    }
}
