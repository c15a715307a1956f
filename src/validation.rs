//! Schema checks for resolved job documents.
//!
//! Every section is closed: keys outside the section's field table are
//! violations. All violations are collected so the report lists every
//! problem in one pass.
//!
//! ## Sections
//! - **run_metadata**: repository, registry and namespace settings plus the
//!   optional script, shell and visibility keys.
//! - **read** / **write**: data product references with an optional `use`
//!   block; `write` entries also need a `file_type`.
//! - **register**: external object, data product, author or namespace
//!   declarations.
use crate::error::{FairError, FairResult};
use crate::job::script::shell_spec;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Serialize;
use serde_yaml::{Mapping, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Text,
    Path,
    Url,
    Bool,
    DateTime,
    Shell,
    Use,
}

#[derive(Debug, Clone, Copy)]
struct FieldRule {
    name: &'static str,
    kind: FieldKind,
    required: bool,
}

const fn required(name: &'static str, kind: FieldKind) -> FieldRule {
    FieldRule {
        name,
        kind,
        required: true,
    }
}

const fn optional(name: &'static str, kind: FieldKind) -> FieldRule {
    FieldRule {
        name,
        kind,
        required: false,
    }
}

const TOP_LEVEL: &[&str] = &["run_metadata", "read", "write", "register"];

const RUN_METADATA: &[FieldRule] = &[
    required("local_repo", FieldKind::Path),
    required("latest_commit", FieldKind::Text),
    required("remote_repo", FieldKind::Text),
    optional("description", FieldKind::Text),
    required("local_data_registry_url", FieldKind::Url),
    required("remote_data_registry_url", FieldKind::Url),
    required("default_input_namespace", FieldKind::Text),
    required("default_output_namespace", FieldKind::Text),
    optional("default_read_version", FieldKind::Text),
    optional("default_write_version", FieldKind::Text),
    required("write_data_store", FieldKind::Path),
    optional("script", FieldKind::Text),
    optional("script_path", FieldKind::Path),
    optional("shell", FieldKind::Shell),
    optional("public", FieldKind::Bool),
];

const USE: &[FieldRule] = &[
    optional("data_product", FieldKind::Text),
    optional("version", FieldKind::Text),
    optional("namespace", FieldKind::Text),
    optional("cache", FieldKind::Path),
];

const READ: &[FieldRule] = &[
    required("data_product", FieldKind::Text),
    optional("description", FieldKind::Text),
    optional("use", FieldKind::Use),
    optional("public", FieldKind::Bool),
];

const WRITE: &[FieldRule] = &[
    required("data_product", FieldKind::Text),
    optional("description", FieldKind::Text),
    optional("use", FieldKind::Use),
    required("file_type", FieldKind::Text),
    optional("public", FieldKind::Bool),
];

const EXTERNAL_OBJECT: &[FieldRule] = &[
    required("external_object", FieldKind::Text),
    optional("identifier", FieldKind::Text),
    optional("alternate_identifier", FieldKind::Text),
    optional("alternate_identifier_type", FieldKind::Text),
    optional("unique_name", FieldKind::Text),
    optional("namespace_name", FieldKind::Text),
    optional("namespace_full_name", FieldKind::Text),
    required("root", FieldKind::Url),
    required("path", FieldKind::Path),
    required("title", FieldKind::Text),
    optional("description", FieldKind::Text),
    required("file_type", FieldKind::Text),
    required("release_date", FieldKind::DateTime),
    required("version", FieldKind::Text),
    required("primary", FieldKind::Bool),
    optional("public", FieldKind::Bool),
    optional("authors", FieldKind::Text),
    optional("use", FieldKind::Use),
];

const DATA_PRODUCT_REGISTRATION: &[FieldRule] = &[
    required("data_product", FieldKind::Text),
    optional("namespace_name", FieldKind::Text),
    required("root", FieldKind::Url),
    required("path", FieldKind::Path),
    optional("description", FieldKind::Text),
    required("file_type", FieldKind::Text),
    required("version", FieldKind::Text),
    optional("public", FieldKind::Bool),
    optional("authors", FieldKind::Text),
    optional("use", FieldKind::Use),
];

const AUTHOR: &[FieldRule] = &[
    required("author", FieldKind::Text),
    required("name", FieldKind::Text),
    optional("identifier", FieldKind::Text),
    optional("uuid", FieldKind::Text),
];

const NAMESPACE: &[FieldRule] = &[
    required("namespace", FieldKind::Text),
    optional("full_name", FieldKind::Text),
    optional("website", FieldKind::Url),
];

/// What went wrong with one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationKind {
    Missing,
    Unknown,
    Type,
    Conflict,
}

impl ViolationKind {
    fn label(self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Unknown => "unknown",
            Self::Type => "type",
            Self::Conflict => "conflict",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// Dotted location, e.g. `write[0].file_type`.
    pub location: String,
    pub kind: ViolationKind,
    pub message: String,
}

/// Every schema violation found in a document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn locations(&self) -> Vec<&str> {
        self.violations.iter().map(|v| v.location.as_str()).collect()
    }

    fn push(&mut self, location: impl Into<String>, kind: ViolationKind, message: impl Into<String>) {
        self.violations.push(Violation {
            location: location.into(),
            kind,
            message: message.into(),
        });
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Validation of job configuration failed with {} violation(s):",
            self.violations.len()
        )?;
        let width = self
            .violations
            .iter()
            .map(|v| v.location.len())
            .max()
            .unwrap_or(0)
            .max("location".len());
        writeln!(f, "  {:<width$}  {:<8}  message", "location", "kind")?;
        for violation in &self.violations {
            writeln!(
                f,
                "  {:<width$}  {:<8}  {}",
                violation.location,
                violation.kind.label(),
                violation.message
            )?;
        }
        Ok(())
    }
}

/// Check `doc` and return every violation found.
pub fn validate(doc: &Value) -> ValidationReport {
    let mut report = ValidationReport::default();
    let Some(root) = doc.as_mapping() else {
        report.push("", ViolationKind::Type, "job configuration must be a mapping");
        return report;
    };

    for key in root.keys() {
        let name = key_name(key);
        if !TOP_LEVEL.contains(&name.as_str()) {
            report.push(name, ViolationKind::Unknown, "unrecognised top-level key");
        }
    }

    match root.get("run_metadata") {
        Some(Value::Mapping(metadata)) => {
            check_fields(metadata, RUN_METADATA, "run_metadata", &mut report);
            if metadata.contains_key("script") && metadata.contains_key("script_path") {
                report.push(
                    "run_metadata.script",
                    ViolationKind::Conflict,
                    "only one of 'script' and 'script_path' may be given",
                );
            }
        }
        Some(_) => report.push("run_metadata", ViolationKind::Type, "expected a mapping"),
        None => report.push("run_metadata", ViolationKind::Missing, "field required"),
    }

    for (block, rules) in [("read", READ), ("write", WRITE)] {
        for_each_entry(root, block, &mut report, |entry, location, report| {
            check_fields(entry, rules, location, report);
        });
    }

    for_each_entry(root, "register", &mut report, |entry, location, report| {
        check_registration(entry, location, report);
    });

    report
}

/// [`validate`], failing with [`FairError::Validation`] on any violation.
pub fn check(doc: &Value) -> FairResult<()> {
    let report = validate(doc);
    if report.is_valid() {
        Ok(())
    } else {
        Err(FairError::Validation(report))
    }
}

fn for_each_entry(
    root: &Mapping,
    block: &str,
    report: &mut ValidationReport,
    mut check: impl FnMut(&Mapping, &str, &mut ValidationReport),
) {
    match root.get(block) {
        None | Some(Value::Null) => {}
        Some(Value::Sequence(entries)) => {
            for (index, entry) in entries.iter().enumerate() {
                let location = format!("{block}[{index}]");
                match entry.as_mapping() {
                    Some(map) => check(map, &location, report),
                    None => report.push(location, ViolationKind::Type, "expected a mapping"),
                }
            }
        }
        Some(_) => report.push(block, ViolationKind::Type, "expected a list of entries"),
    }
}

fn check_registration(entry: &Mapping, location: &str, report: &mut ValidationReport) {
    if entry.contains_key("external_object") {
        if entry.contains_key("data_product") {
            report.push(
                location,
                ViolationKind::Conflict,
                "only one of 'external_object' and 'data_product' may be given",
            );
        }
        check_fields(entry, EXTERNAL_OBJECT, location, report);
        let identifiers = ["identifier", "alternate_identifier", "unique_name"]
            .iter()
            .filter(|key| entry.contains_key(**key))
            .count();
        if identifiers == 0 {
            report.push(
                format!("{location}.identifier"),
                ViolationKind::Missing,
                "one of 'identifier', 'alternate_identifier' or 'unique_name' is required",
            );
        }
        if entry.contains_key("identifier") && entry.contains_key("unique_name") {
            report.push(
                format!("{location}.unique_name"),
                ViolationKind::Conflict,
                "only one of 'identifier' and 'unique_name' may be given",
            );
        }
        let has_namespace = entry.contains_key("namespace_name")
            || entry
                .get("use")
                .and_then(|u| u.get("namespace"))
                .is_some();
        if !has_namespace {
            report.push(
                format!("{location}.namespace_name"),
                ViolationKind::Missing,
                "a namespace is required for external objects",
            );
        }
    } else if entry.contains_key("data_product") {
        check_fields(entry, DATA_PRODUCT_REGISTRATION, location, report);
    } else if entry.contains_key("author") {
        check_fields(entry, AUTHOR, location, report);
    } else if entry.contains_key("namespace") {
        check_fields(entry, NAMESPACE, location, report);
    } else {
        report.push(
            location,
            ViolationKind::Unknown,
            "registration for unknown item, expected one of 'external_object', 'data_product', 'author' or 'namespace'",
        );
    }
}

fn check_fields(section: &Mapping, rules: &[FieldRule], location: &str, report: &mut ValidationReport) {
    for (key, value) in section {
        let name = key_name(key);
        let here = format!("{location}.{name}");
        let Some(rule) = rules.iter().find(|rule| rule.name == name) else {
            report.push(here, ViolationKind::Unknown, "extra fields not permitted");
            continue;
        };
        if value.is_null() {
            if rule.required {
                report.push(here, ViolationKind::Missing, "field required");
            }
            continue;
        }
        if let Err(message) = check_kind(rule.kind, value, &here, report) {
            report.push(here, ViolationKind::Type, message);
        }
    }
    for rule in rules.iter().filter(|rule| rule.required) {
        if !section.contains_key(rule.name) {
            report.push(
                format!("{location}.{}", rule.name),
                ViolationKind::Missing,
                "field required",
            );
        }
    }
}

fn check_kind(
    kind: FieldKind,
    value: &Value,
    location: &str,
    report: &mut ValidationReport,
) -> Result<(), String> {
    match kind {
        FieldKind::Text => text(value).map(|_| ()),
        FieldKind::Path => {
            let path = text(value)?;
            if path.trim().is_empty() {
                return Err("path must not be empty".to_string());
            }
            Ok(())
        }
        FieldKind::Url => {
            let url = text(value)?;
            if is_http_url(&url) {
                Ok(())
            } else {
                Err(format!("'{url}' is not a valid HTTP URL"))
            }
        }
        FieldKind::Bool => match value {
            Value::Bool(_) => Ok(()),
            _ => Err("value is not a valid boolean".to_string()),
        },
        FieldKind::DateTime => {
            let raw = text(value)?;
            if parses_as_datetime(&raw) {
                Ok(())
            } else {
                Err(format!("'{raw}' is not a valid datetime"))
            }
        }
        FieldKind::Shell => {
            let shell = text(value)?;
            match shell_spec(&shell) {
                Some(_) => Ok(()),
                None => Err(format!("'{shell}' is not a supported shell")),
            }
        }
        FieldKind::Use => match value.as_mapping() {
            Some(map) => {
                check_fields(map, USE, location, report);
                Ok(())
            }
            None => Err("expected a mapping".to_string()),
        },
    }
}

/// Scalars coerce to text; collections and booleans do not.
fn text(value: &Value) -> Result<String, String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err("value is not a valid string".to_string()),
    }
}

fn key_name(key: &Value) -> String {
    crate::document::scalar_string(key).unwrap_or_else(|| format!("{key:?}"))
}

fn is_http_url(url: &str) -> bool {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"));
    match rest {
        Some(rest) => {
            let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
            !host.is_empty() && !host.contains(char::is_whitespace)
        }
        None => false,
    }
}

fn parses_as_datetime(raw: &str) -> bool {
    DateTime::parse_from_rfc3339(raw).is_ok()
        || NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").is_ok()
        || NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S").is_ok()
        || NaiveDate::parse_from_str(raw, "%Y-%m-%d").is_ok()
}

#[cfg(test)]
#[path = "validation_tests.rs"]
mod tests;
