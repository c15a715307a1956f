//! `${{ NAME }}` substitution over the string leaves of a job document.
//!
//! Two placeholder families are recognised. `${{ DATETIME-<fmt> }}` is
//! formatted from the job start time and handled first; plain `${{ NAME }}`
//! placeholders are then looked up in a provider table. Providers are only
//! called when their placeholder occurs somewhere in the document, and at most
//! once per document.
use crate::error::{FairError, FairResult};
use crate::git::GitMetadata;
use crate::settings::CliConfiguration;
use crate::versioning::Incrementer;
use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::{NoExpand, Regex};
use serde_yaml::Value;
use std::fmt::Write as _;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use tracing::debug;

/// Opening of every `${{ NAME }}` placeholder.
pub const PLACEHOLDER_OPEN: &str = "${{";
pub const DATE_FORMAT: &str = "%Y%m%d";
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

static DATETIME_CANDIDATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{\{\s*DATETIME-[^}]*\}\}").expect("datetime candidate regex"));
static DATETIME_CAPTURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{\{\s*DATETIME-([^}$\{\s]+)\s*\}\}").expect("datetime capture regex")
});
static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{\{\s*([A-Za-z0-9_\-]+)\s*\}\}").expect("placeholder regex"));
/// Anything still left after the pipeline has run.
pub static UNRESOLVED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{\{\s*([^}$\{\s]+)\s*\}\}").expect("unresolved regex"));

/// A zero-argument, lazily evaluated substitution value.
pub type Provider<'a> = Box<dyn Fn() -> FairResult<String> + 'a>;

/// Ordered table of named providers plus the job start time.
pub struct VariableTable<'a> {
    now: NaiveDateTime,
    providers: Vec<(&'static str, Provider<'a>)>,
}

/// Values the built-in providers read from.
pub struct ProviderSources<'a> {
    pub now: NaiveDateTime,
    pub local_repo: Option<String>,
    pub remote_repo: Option<String>,
    pub job_dir: PathBuf,
    pub source_config: Option<PathBuf>,
    pub settings: &'a dyn CliConfiguration,
    pub git: &'a dyn GitMetadata,
}

fn format_time(now: &NaiveDateTime, fmt: &str) -> FairResult<String> {
    let mut out = String::new();
    write!(out, "{}", now.format(fmt))
        .map_err(|_| FairError::user_config(format!("Invalid datetime format '{fmt}'")))?;
    Ok(out)
}

fn require_repo(repo: Option<&str>) -> FairResult<&Path> {
    repo.map(Path::new).ok_or_else(|| FairError::KeyPath {
        key: "run_metadata.local_repo".to_string(),
        parent: "run_metadata".to_string(),
    })
}

impl<'a> VariableTable<'a> {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now,
            providers: Vec::new(),
        }
    }

    /// Append a provider; later entries are substituted after earlier ones.
    pub fn with(mut self, name: &'static str, provider: Provider<'a>) -> Self {
        self.providers.push((name, provider));
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.providers.iter().map(|(name, _)| *name)
    }

    fn knows(&self, name: &str) -> bool {
        self.providers.iter().any(|(known, _)| *known == name)
    }

    /// The standard table: `DATE`, `DATETIME`, `USER`, `USER_ID`, `REPO_DIR`,
    /// `CONFIG_DIR`, `LOCAL_TOKEN`, `SOURCE_CONFIG`, `GIT_BRANCH`,
    /// `GIT_REMOTE` and `GIT_TAG`.
    pub fn builtin(sources: ProviderSources<'a>) -> Self {
        let ProviderSources {
            now,
            local_repo,
            remote_repo,
            job_dir,
            source_config,
            settings,
            git,
        } = sources;
        let repo_for_dir = local_repo.clone();
        let repo_for_branch = local_repo.clone();
        let repo_for_remote = local_repo.clone();
        let repo_for_tag = local_repo;

        Self::new(now)
            .with("DATE", Box::new(move || format_time(&now, DATE_FORMAT)))
            .with("DATETIME", Box::new(move || format_time(&now, DATETIME_FORMAT)))
            .with("USER", Box::new(move || settings.user_name()))
            .with(
                "USER_ID",
                Box::new(move || match settings.user_uri() {
                    Ok(uri) => Ok(uri),
                    Err(FairError::CliConfiguration { .. }) => settings.user_uuid(),
                    Err(err) => Err(err),
                }),
            )
            .with(
                "REPO_DIR",
                Box::new(move || {
                    require_repo(repo_for_dir.as_deref()).map(|p| p.display().to_string())
                }),
            )
            .with(
                "CONFIG_DIR",
                Box::new(move || Ok(format!("{}{}", job_dir.display(), MAIN_SEPARATOR))),
            )
            .with("LOCAL_TOKEN", Box::new(move || settings.local_token()))
            .with(
                "SOURCE_CONFIG",
                Box::new(move || {
                    Ok(source_config
                        .as_deref()
                        .and_then(Path::file_name)
                        .map(|name| name.to_string_lossy().into_owned())
                        .unwrap_or_default())
                }),
            )
            .with(
                "GIT_BRANCH",
                Box::new(move || {
                    git.active_branch(require_repo(repo_for_branch.as_deref())?)
                }),
            )
            .with(
                "GIT_REMOTE",
                Box::new(move || match &remote_repo {
                    Some(url) => Ok(url.clone()),
                    None => git.remote_url(
                        require_repo(repo_for_remote.as_deref())?,
                        &settings.git_remote_label(),
                    ),
                }),
            )
            .with(
                "GIT_TAG",
                Box::new(move || {
                    git.latest_tag(require_repo(repo_for_tag.as_deref())?)?.ok_or_else(|| {
                        FairError::user_config("Cannot use GIT_TAG variable, no git tags found.")
                    })
                }),
            )
    }

    /// Rewrite every placeholder in the string leaves of `doc`.
    ///
    /// Incrementer directives pass through untouched. Any other name missing
    /// from the table is reported rather than left in place.
    pub fn substitute(&self, doc: &mut Value) -> FairResult<()> {
        debug!("searching for CLI variables");
        let now = self.now;
        visit_strings(doc, &mut |text| substitute_datetimes(&now, text))?;

        let mut found: Vec<String> = Vec::new();
        collect_strings(doc, &mut |text| {
            for caps in PLACEHOLDER.captures_iter(text) {
                let name = caps[1].to_string();
                if !found.contains(&name) {
                    found.push(name);
                }
            }
        });

        let unknown: Vec<&String> = found
            .iter()
            .filter(|name| !self.knows(name) && Incrementer::from_name(name).is_none())
            .collect();
        if !unknown.is_empty() {
            return Err(FairError::user_config_with_hint(
                format!("Unrecognised variables {unknown:?} in job configuration"),
                format!(
                    "Supported variables are: {}",
                    self.names().collect::<Vec<_>>().join(", ")
                ),
            ));
        }

        for (name, provider) in &self.providers {
            if !found.iter().any(|f| f == name) {
                continue;
            }
            let value = provider()?;
            if value.is_empty() {
                return Err(FairError::internal(format!(
                    "Expected value for substitution of '{name}' but returned None"
                )));
            }
            debug!(variable = *name, value = %value, "substituting");
            let pattern = Regex::new(&format!(r"\$\{{\{{\s*{}\s*\}}\}}", regex::escape(name)))
                .map_err(|err| FairError::internal(err.to_string()))?;
            visit_strings(doc, &mut |text| {
                if pattern.is_match(text) {
                    *text = pattern.replace_all(text, NoExpand(&value)).into_owned();
                }
                Ok(())
            })?;
        }
        Ok(())
    }
}

fn substitute_datetimes(now: &NaiveDateTime, text: &mut String) -> FairResult<()> {
    let candidates = DATETIME_CANDIDATE.find_iter(text).count();
    if candidates == 0 {
        return Ok(());
    }
    let captures = DATETIME_CAPTURE.captures_iter(text).count();
    debug!(candidates, captures, "found datetime substitutions");
    if candidates != captures {
        return Err(FairError::internal(format!(
            "Failed to parse formatted datetime variable in '{text}'"
        )));
    }
    let mut error = None;
    let replaced = DATETIME_CAPTURE.replace_all(text, |caps: &regex::Captures| {
        match format_time(now, caps[1].trim()) {
            Ok(formatted) => formatted,
            Err(err) => {
                if error.is_none() {
                    error = Some(err);
                }
                String::new()
            }
        }
    });
    if let Some(err) = error {
        return Err(err);
    }
    *text = replaced.into_owned();
    Ok(())
}

/// Apply `f` to every string scalar under `value`. Keys are left alone.
pub fn visit_strings(
    value: &mut Value,
    f: &mut dyn FnMut(&mut String) -> FairResult<()>,
) -> FairResult<()> {
    match value {
        Value::String(text) => f(text),
        Value::Sequence(items) => items.iter_mut().try_for_each(|item| visit_strings(item, f)),
        Value::Mapping(map) => map
            .iter_mut()
            .try_for_each(|(_, item)| visit_strings(item, f)),
        Value::Tagged(tagged) => visit_strings(&mut tagged.value, f),
        _ => Ok(()),
    }
}

/// Read-only counterpart of [`visit_strings`].
pub fn collect_strings(value: &Value, f: &mut dyn FnMut(&str)) {
    match value {
        Value::String(text) => f(text),
        Value::Sequence(items) => items.iter().for_each(|item| collect_strings(item, f)),
        Value::Mapping(map) => map.values().for_each(|item| collect_strings(item, f)),
        Value::Tagged(tagged) => collect_strings(&tagged.value, f),
        _ => {}
    }
}

/// Names of placeholders still present anywhere in `doc`.
pub fn unresolved_placeholders(doc: &Value) -> Vec<String> {
    let mut names = Vec::new();
    collect_strings(doc, &mut |text| {
        names.extend(UNRESOLVED.captures_iter(text).map(|caps| caps[1].to_string()));
    });
    names
}

#[cfg(test)]
#[path = "variables_tests.rs"]
mod tests;
