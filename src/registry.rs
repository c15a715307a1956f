//! Registry REST API access.
//!
//! The pipeline treats a registry as a key/value query service over typed
//! objects (`data_product`, `namespace`, ...). [`RegistryApi`] is the seam;
//! [`RegistryClient`] implements it over HTTP with `ureq`.
use crate::error::{FairError, FairResult};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use tracing::{debug, error, warn};

/// Query parameters for a registry search.
pub type Params = BTreeMap<String, String>;

/// Base API URL of a registry plus the token used to access it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: String,
    pub token: Option<String>,
}

impl Endpoint {
    pub fn new(url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            url: url.into(),
            token,
        }
    }

    /// `<url>/<obj_type>/`, normalising the slashes in between.
    pub fn object_url(&self, obj_type: &str) -> String {
        format!("{}/{}/", self.url.trim_end_matches('/'), obj_type.trim_matches('/'))
    }
}

pub trait RegistryApi {
    /// Search for objects of `obj_type`. Empty parameter values are ignored.
    fn get(&self, endpoint: &Endpoint, obj_type: &str, params: &Params)
        -> FairResult<Vec<JsonValue>>;

    /// Create an object and return it as stored by the registry.
    fn post(&self, endpoint: &Endpoint, obj_type: &str, data: &JsonValue) -> FairResult<JsonValue>;

    /// Fetch a single object by its full URL.
    fn url_get(&self, endpoint: &Endpoint, url: &str) -> FairResult<JsonValue>;

    /// Fetch raw bytes from a data source (`root` + `path` of a registration).
    fn download(&self, url: &str) -> FairResult<Vec<u8>>;
}

/// Field used when searching objects of a type by their user-facing label.
pub fn search_key(obj_type: &str) -> Option<&'static str> {
    match obj_type {
        "data_product" | "namespace" | "author" | "code_repo_release" => Some("name"),
        "external_object" => Some("identifier"),
        "file_type" => Some("extension"),
        "storage_root" => Some("root"),
        "storage_location" => Some("hash"),
        _ => None,
    }
}

/// Trailing numeric identifier of an object URL such as
/// `http://127.0.0.1:8000/api/namespace/3/`.
pub fn object_id_from_url(url: &str) -> Option<String> {
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let path = without_scheme
        .split_once('/')
        .map_or("", |(_, path)| path);
    let path = path.split(['?', '#']).next().unwrap_or_default();
    path.split('/')
        .rfind(|segment| !segment.trim().is_empty())
        .map(str::to_string)
}

/// `url` field of a registry object.
pub fn object_url(object: &JsonValue) -> Option<&str> {
    object.get("url").and_then(JsonValue::as_str)
}

/// Look up the registry ID of the object whose search key equals `value`.
pub fn convert_key_value_to_id(
    registry: &dyn RegistryApi,
    endpoint: &Endpoint,
    obj_type: &str,
    value: &str,
) -> FairResult<String> {
    let key = search_key(obj_type).ok_or_else(|| {
        FairError::internal(format!("No search key defined for object type '{obj_type}'"))
    })?;
    let params = Params::from([(key.to_string(), value.to_string())]);
    let results = registry.get(endpoint, obj_type, &params)?;
    results
        .first()
        .and_then(object_url)
        .and_then(object_id_from_url)
        .ok_or_else(|| {
            FairError::Registry(format!(
                "Failed to obtain result for '{obj_type}' with parameters '{params:?}'"
            ))
        })
}

/// Post an object, or when the registry reports it already exists (HTTP 409)
/// fetch it using `params`. Returns the object's URL.
pub fn post_else_get(
    registry: &dyn RegistryApi,
    endpoint: &Endpoint,
    obj_type: &str,
    data: &JsonValue,
    params: &Params,
) -> FairResult<String> {
    debug!(obj_type, url = %endpoint.url, "attempting to post object");
    let located = match registry.post(endpoint, obj_type, data) {
        Ok(object) => vec![object],
        Err(FairError::RegistryApiCall { status: 409, msg }) => {
            debug!(%msg, "object already exists, retrieving entry");
            registry.get(endpoint, obj_type, params)?
        }
        Err(err) => return Err(err),
    };
    match located.first().and_then(object_url) {
        Some(url) => Ok(url.to_string()),
        None => {
            error!(obj_type, ?params, "results of URL query empty");
            Err(FairError::Registry(
                "Expected to receive a URL location from registry post".to_string(),
            ))
        }
    }
}

/// Drop empty parameters, warning about each.
pub fn non_empty_params(params: &Params) -> Params {
    params
        .iter()
        .filter(|(key, value)| {
            if value.is_empty() {
                warn!(param = %key, "get parameter has no value so will be ignored");
                false
            } else {
                true
            }
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Strip null and empty values from post data.
pub fn strip_empty_fields(data: &JsonValue) -> JsonValue {
    match data {
        JsonValue::Object(fields) => JsonValue::Object(
            fields
                .iter()
                .filter(|(_, value)| match value {
                    JsonValue::Null => false,
                    JsonValue::String(s) => !s.is_empty(),
                    _ => true,
                })
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<Map<String, JsonValue>>(),
        ),
        other => other.clone(),
    }
}

/// Unwrap paginated `{"results": [...]}` responses into a list.
pub fn unwrap_results(body: JsonValue) -> Vec<JsonValue> {
    match body {
        JsonValue::Object(mut fields) if fields.contains_key("results") => {
            match fields.remove("results") {
                Some(JsonValue::Array(items)) => items,
                Some(other) => vec![other],
                None => Vec::new(),
            }
        }
        JsonValue::Array(items) => items,
        JsonValue::Null => Vec::new(),
        other => vec![other],
    }
}

/// [`RegistryApi`] over HTTP.
pub struct RegistryClient {
    agent: ureq::Agent,
}

impl Default for RegistryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryClient {
    pub fn new() -> Self {
        Self {
            agent: ureq::Agent::new_with_defaults(),
        }
    }

    fn map_error(method: &str, url: &str, err: ureq::Error) -> FairError {
        match err {
            ureq::Error::StatusCode(404) => FairError::RegistryApiCall {
                msg: format!(
                    "Attempt to access an unrecognised resource on registry using method '{method}' and url = {url}"
                ),
                status: 404,
            },
            ureq::Error::StatusCode(403) => FairError::RegistryApiCall {
                msg: format!("Failed to run method '{method}' for url {url}, request forbidden"),
                status: 403,
            },
            ureq::Error::StatusCode(409) => FairError::RegistryApiCall {
                msg: format!("Cannot post object using method '{method}' to {url} as it already exists"),
                status: 409,
            },
            ureq::Error::StatusCode(status) => FairError::RegistryApiCall {
                msg: format!("Request failed with status code {status}: url = {url}"),
                status,
            },
            other => FairError::UnexpectedRegistryServerState {
                msg: format!("Failed to make registry API request '{url}': {other}"),
                hint: Some("Is this remote correct and the server running?".to_string()),
            },
        }
    }

    fn read_json(url: &str, mut response: ureq::http::Response<ureq::Body>) -> FairResult<JsonValue> {
        let status = response.status().as_u16();
        response
            .body_mut()
            .read_json::<JsonValue>()
            .map_err(|err| decode_error(url, status, &err))
    }
}

/// A response the registry reported as successful whose body is not JSON.
fn decode_error(url: &str, status: u16, err: &dyn std::fmt::Display) -> FairError {
    FairError::UnexpectedRegistryServerState {
        msg: format!(
            "Failed to retrieve JSON data from request to '{url}' (status {status}): {err}"
        ),
        hint: Some("Is this URL a FAIR data registry API?".to_string()),
    }
}

fn authorization(endpoint: &Endpoint) -> Option<String> {
    endpoint.token.as_ref().map(|token| format!("token {token}"))
}

impl RegistryApi for RegistryClient {
    fn get(
        &self,
        endpoint: &Endpoint,
        obj_type: &str,
        params: &Params,
    ) -> FairResult<Vec<JsonValue>> {
        let url = endpoint.object_url(obj_type);
        let params = non_empty_params(params);
        debug!(%url, ?params, "retrieving objects");
        let mut request = self.agent.get(&url);
        if let Some(auth) = authorization(endpoint) {
            request = request.header("Authorization", auth);
        }
        for (key, value) in &params {
            request = request.query(key, value);
        }
        let response = request
            .call()
            .map_err(|err| Self::map_error("get", &url, err))?;
        Ok(unwrap_results(Self::read_json(&url, response)?))
    }

    fn post(&self, endpoint: &Endpoint, obj_type: &str, data: &JsonValue) -> FairResult<JsonValue> {
        let url = endpoint.object_url(obj_type);
        let data = strip_empty_fields(data);
        debug!(%url, %data, "posting object");
        let mut request = self
            .agent
            .post(&url)
            .header("Content-Type", "application/json");
        if let Some(auth) = authorization(endpoint) {
            request = request.header("Authorization", auth);
        }
        let response = request
            .send_json(&data)
            .map_err(|err| Self::map_error("post", &url, err))?;
        Self::read_json(&url, response)
    }

    fn url_get(&self, endpoint: &Endpoint, url: &str) -> FairResult<JsonValue> {
        debug!(%url, "retrieving object by url");
        let mut request = self.agent.get(url);
        if let Some(auth) = authorization(endpoint) {
            request = request.header("Authorization", auth);
        }
        let response = request
            .call()
            .map_err(|err| Self::map_error("get", url, err))?;
        Self::read_json(url, response)
    }

    fn download(&self, url: &str) -> FairResult<Vec<u8>> {
        debug!(%url, "downloading");
        let mut response = self
            .agent
            .get(url)
            .call()
            .map_err(|err| Self::map_error("get", url, err))?;
        response
            .body_mut()
            .read_to_vec()
            .map_err(|err| Self::map_error("get", url, err))
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
