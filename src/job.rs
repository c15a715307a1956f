//! Job configuration: the resolution pipeline behind `fair prepare`.
//!
//! A [`JobConfiguration`] owns the mutable job document for one run. Calling
//! [`JobConfiguration::prepare`] walks the document through a fixed sequence
//! of [`PrepareStage`]s; [`JobConfiguration::write`] then validates and
//! persists the working configuration and returns the execution environment.
//!
//! ## Stage order
//! ```text
//! Loaded -> MetadataFilled -> NamespacesResolved -> VariablesSubstituted
//!        -> BlocksFilled -> (MetadataPulled) -> WildcardsExpanded
//!        -> VersionsResolved -> RegisterReconciled -> (DataPulled)
//!        -> Cleaned -> Validated -> CommitStamped -> Ready
//! ```
//! Any error aborts the whole call and nothing is written.
pub(crate) mod blocks;
pub(crate) mod log;
pub(crate) mod register;
pub mod script;
pub(crate) mod versions;

use crate::document;
use crate::error::{FairError, FairResult};
use crate::git::GitMetadata;
use crate::globbing::glob_read_write;
use crate::registry::{Endpoint, RegistryApi};
use crate::settings::{CliConfiguration, DEFAULT_REMOTE};
use crate::validation;
use crate::variables::{unresolved_placeholders, ProviderSources, VariableTable};
use crate::versioning::{DEFAULT_READ_VERSION, DEFAULT_WRITE_VERSION};
use chrono::{Local, NaiveDateTime};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

pub use log::JobLog;
pub use script::{JobScript, ShellSpec, SHELLS};

/// Name of the working configuration inside a job directory.
pub const JOB_CONFIG_FILE: &str = "config.yaml";
/// Job directory names, e.g. `2021-09-10_14_05_09_000000`.
pub const JOB_DIR_FORMAT: &str = "%Y-%m-%d_%H_%M_%S_%6f";

/// Top-level blocks holding object entries, in processing order.
pub const BLOCK_TYPES: [&str; 3] = ["register", "write", "read"];

/// Which command the job is prepared for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum JobMode {
    Run,
    Pass,
    Pull,
    Push,
}

impl JobMode {
    pub fn name(self) -> &'static str {
        match self {
            Self::Run => "run",
            Self::Pass => "pass",
            Self::Pull => "pull",
            Self::Push => "push",
        }
    }
}

/// Progress of [`JobConfiguration::prepare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PrepareStage {
    Loaded,
    MetadataFilled,
    NamespacesResolved,
    VariablesSubstituted,
    BlocksFilled,
    MetadataPulled,
    WildcardsExpanded,
    VersionsResolved,
    RegisterReconciled,
    DataPulled,
    Cleaned,
    Validated,
    CommitStamped,
    Ready,
}

/// External collaborators consulted while preparing a job.
#[derive(Clone, Copy)]
pub struct JobContext<'a> {
    pub registry: &'a dyn RegistryApi,
    pub settings: &'a dyn CliConfiguration,
    pub git: &'a dyn GitMetadata,
}

impl<'a> JobContext<'a> {
    pub fn new(
        registry: &'a dyn RegistryApi,
        settings: &'a dyn CliConfiguration,
        git: &'a dyn GitMetadata,
    ) -> Self {
        Self {
            registry,
            settings,
            git,
        }
    }
}

/// The working configuration written by [`JobConfiguration::write`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenJob {
    pub path: PathBuf,
    /// Variables to add to the environment of the job script.
    pub environment: BTreeMap<String, String>,
}

/// Labels registered by this job, so repeats are skipped.
#[derive(Debug, Clone, Default)]
pub(crate) struct RegisteredLabels {
    pub namespaces: Vec<String>,
    pub authors: Vec<String>,
}

/// One job document moving through the resolution pipeline.
#[derive(Debug)]
pub struct JobConfiguration {
    doc: Value,
    source: Option<PathBuf>,
    now: NaiveDateTime,
    remote_label: Option<String>,
    job_dir: Option<PathBuf>,
    log: Option<JobLog>,
    stage: PrepareStage,
    parsed: RegisteredLabels,
}

impl JobConfiguration {
    /// Read a job document from disk.
    pub fn load(path: &Path) -> FairResult<Self> {
        if !path.exists() {
            return Err(FairError::file_not_found(
                format!(
                    "Cannot load job configuration from file '{}', file does not exist",
                    path.display()
                ),
                None,
            ));
        }
        debug!(path = %path.display(), "loading job configuration");
        let text = fs::read_to_string(path)
            .map_err(|err| FairError::io(format!("read {}", path.display()), err))?;
        let doc: Value = serde_yaml::from_str(&text).map_err(|err| {
            FairError::user_config(format!(
                "Failed to parse job configuration '{}': {err}",
                path.display()
            ))
        })?;
        let mut job = Self::from_value(doc)?;
        job.source = Some(path.to_path_buf());
        Ok(job)
    }

    /// Wrap an in-memory document. A missing `run_metadata` section is created.
    pub fn from_value(doc: Value) -> FairResult<Self> {
        let mut doc = match doc {
            Value::Null => Value::Mapping(Mapping::new()),
            doc @ Value::Mapping(_) => doc,
            _ => {
                return Err(FairError::user_config(
                    "Job configuration must be a mapping of sections",
                ))
            }
        };
        if !document::contains_path(&doc, "run_metadata") {
            debug!("failed to find 'run_metadata' in configuration, creating");
            document::set_path(&mut doc, "run_metadata", Value::Mapping(Mapping::new()))
                .map_err(|parent| key_path_error("run_metadata", parent))?;
        }
        Ok(Self {
            doc,
            source: None,
            now: Local::now().naive_local(),
            remote_label: None,
            job_dir: None,
            log: None,
            stage: PrepareStage::Loaded,
            parsed: RegisteredLabels::default(),
        })
    }

    /// Fix the job start time used for the job directory and date variables.
    pub fn with_start_time(mut self, now: NaiveDateTime) -> Self {
        self.now = now;
        self
    }

    /// Use the registry and git remote named `label` instead of `origin`.
    pub fn with_remote(mut self, label: impl Into<String>) -> Self {
        self.remote_label = Some(label.into());
        self
    }

    pub fn stage(&self) -> PrepareStage {
        self.stage
    }

    pub fn start_time(&self) -> NaiveDateTime {
        self.now
    }

    pub fn job_dir(&self) -> Option<&Path> {
        self.job_dir.as_deref()
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log.as_ref().map(JobLog::path)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        document::get_path(&self.doc, key)
    }

    /// Like [`get`](Self::get) but failing with [`FairError::KeyPath`].
    pub fn require(&self, key: &str) -> FairResult<&Value> {
        self.get(key).ok_or_else(|| {
            let parent = key
                .rsplit_once(document::SEPARATOR)
                .map_or("root", |(parent, _)| parent);
            key_path_error(key, parent.to_string())
        })
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> FairResult<()> {
        document::set_path(&mut self.doc, key, value.into())
            .map_err(|parent| key_path_error(key, parent))
    }

    pub fn pop(&mut self, key: &str) -> Option<Value> {
        document::pop_path(&mut self.doc, key)
    }

    pub fn contains(&self, key: &str) -> bool {
        document::contains_path(&self.doc, key)
    }

    /// A copy of the whole document.
    pub fn content(&self) -> Value {
        self.doc.clone()
    }

    fn text(&self, key: &str) -> Option<String> {
        self.get(key).and_then(document::scalar_string)
    }

    pub fn local_repository(&self) -> FairResult<String> {
        self.text("run_metadata.local_repo")
            .ok_or_else(|| key_path_error("run_metadata.local_repo", "run_metadata".to_string()))
    }

    pub fn default_input_namespace(&self) -> Option<String> {
        self.text("run_metadata.default_input_namespace")
            .filter(|ns| !ns.is_empty())
    }

    pub fn default_output_namespace(&self) -> Option<String> {
        self.text("run_metadata.default_output_namespace")
            .filter(|ns| !ns.is_empty())
    }

    pub fn default_read_version(&self) -> String {
        self.text("run_metadata.default_read_version")
            .unwrap_or_else(|| DEFAULT_READ_VERSION.directive())
    }

    pub fn default_write_version(&self) -> String {
        self.text("run_metadata.default_write_version")
            .unwrap_or_else(|| DEFAULT_WRITE_VERSION.directive())
    }

    pub fn is_public_global(&self) -> bool {
        self.get("run_metadata.public")
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }

    pub fn default_data_store(&self) -> FairResult<String> {
        self.text("run_metadata.write_data_store").ok_or_else(|| {
            key_path_error("run_metadata.write_data_store", "run_metadata".to_string())
        })
    }

    fn remote_label(&self) -> &str {
        self.remote_label.as_deref().unwrap_or(DEFAULT_REMOTE)
    }

    pub fn local_uri(&self, settings: &dyn CliConfiguration) -> FairResult<String> {
        match self.text("run_metadata.local_data_registry_url") {
            Some(uri) => Ok(uri),
            None => settings.local_registry_url(),
        }
    }

    pub fn remote_uri(&self, settings: &dyn CliConfiguration) -> FairResult<String> {
        match self.text("run_metadata.remote_data_registry_url") {
            Some(uri) => Ok(uri),
            None => settings.remote_registry_url(self.remote_label()),
        }
    }

    fn local_endpoint(&self, settings: &dyn CliConfiguration) -> FairResult<Endpoint> {
        Ok(Endpoint::new(
            self.local_uri(settings)?,
            Some(settings.local_token()?),
        ))
    }

    fn remote_endpoint(&self, settings: &dyn CliConfiguration) -> FairResult<Endpoint> {
        let token = settings.remote_token(self.remote_label())?.ok_or_else(|| {
            FairError::internal("Expected token during wildcard unpacking for 'pull'")
        })?;
        Ok(Endpoint::new(self.remote_uri(settings)?, Some(token)))
    }

    /// Registry consulted for wildcards and versions of `block`.
    fn lookup_endpoint(
        &self,
        settings: &dyn CliConfiguration,
        mode: JobMode,
        block: &str,
    ) -> FairResult<Endpoint> {
        if mode == JobMode::Pull && block == "read" {
            self.remote_endpoint(settings)
        } else {
            self.local_endpoint(settings)
        }
    }

    fn advance(&mut self, stage: PrepareStage) -> FairResult<()> {
        debug!(?stage, "job configuration stage reached");
        self.stage = stage;
        if let Some(log) = self.log.as_mut() {
            log.write_lines(&[format!("[{:?}]", stage)])?;
        }
        Ok(())
    }

    /// Run the resolution pipeline; returns the default working configuration
    /// path inside the new job directory.
    pub fn prepare(
        &mut self,
        ctx: &JobContext<'_>,
        mode: JobMode,
        allow_dirty: bool,
    ) -> FairResult<PathBuf> {
        let job_dir = ctx
            .settings
            .jobs_dir()
            .join(self.now.format(JOB_DIR_FORMAT).to_string());
        let config_path = job_dir.join(JOB_CONFIG_FILE);
        info!(mode = mode.name(), job_dir = %job_dir.display(), "preparing job configuration");

        // Push reads from staging, the document is left alone.
        if mode == JobMode::Push {
            self.create_job_dir(&job_dir)?;
            return Ok(config_path);
        }

        self.fill_metadata(ctx)?;
        self.advance(PrepareStage::MetadataFilled)?;

        self.resolve_namespaces(ctx)?;
        self.create_job_dir(&job_dir)?;
        self.advance(PrepareStage::NamespacesResolved)?;

        self.substitute_variables(ctx)?;
        self.advance(PrepareStage::VariablesSubstituted)?;

        blocks::fill_all_block_types(self);
        self.advance(PrepareStage::BlocksFilled)?;

        if mode == JobMode::Pull {
            let command = match &self.source {
                Some(source) => format!("pull {}", source.display()),
                None => "pull".to_string(),
            };
            self.write_log_header(ctx.settings, &command)?;
            self.advance(PrepareStage::MetadataPulled)?;
        }

        self.expand_wildcards(ctx, mode)?;
        self.advance(PrepareStage::WildcardsExpanded)?;

        for block in BLOCK_TYPES {
            if self.contains(block) {
                let entries = versions::fill_versions(self, ctx, mode, block)?;
                self.set(block, Value::Sequence(entries))?;
            }
        }
        self.advance(PrepareStage::VersionsResolved)?;

        if self.contains("register") {
            let mut readables = blocks::register_to_read(self)?;
            let mut read = match self.pop("read") {
                Some(Value::Sequence(entries)) => entries,
                _ => Vec::new(),
            };
            read.append(&mut readables);
            self.set("read", Value::Sequence(read))?;
        }
        if self.contains("read") {
            blocks::update_use_sections(self);
        }
        self.advance(PrepareStage::RegisterReconciled)?;

        if mode == JobMode::Pull && self.contains("register") {
            debug!("fetching registrations");
            let stored = register::fetch_registrations(self, ctx)?;
            debug!(?stored, "fetched objects");
            self.advance(PrepareStage::DataPulled)?;
        }

        self.doc = blocks::clean(self);
        self.advance(PrepareStage::Cleaned)?;

        let unparsed = unresolved_placeholders(&self.doc);
        if !unparsed.is_empty() {
            return Err(FairError::internal(format!(
                "Failed to parse variables '{unparsed:?}'"
            )));
        }
        self.advance(PrepareStage::Validated)?;

        let repo = self.local_repository()?;
        let commit = ctx.git.latest_commit(Path::new(&repo), allow_dirty)?;
        self.set("run_metadata.latest_commit", commit)?;
        self.advance(PrepareStage::CommitStamped)?;

        self.advance(PrepareStage::Ready)?;
        Ok(config_path)
    }

    fn create_job_dir(&mut self, job_dir: &Path) -> FairResult<()> {
        fs::create_dir_all(job_dir)
            .map_err(|err| FairError::io(format!("create {}", job_dir.display()), err))?;
        self.log = Some(JobLog::create(job_dir, &self.now)?);
        self.job_dir = Some(job_dir.to_path_buf());
        Ok(())
    }

    fn write_log_header(&mut self, settings: &dyn CliConfiguration, command: &str) -> FairResult<()> {
        let author = settings.user_name()?;
        let email = settings.user_email()?;
        let now = self.now;
        if let Some(log) = self.log.as_mut() {
            log.write_header(&now, &author, &email, command)?;
        }
        Ok(())
    }

    /// Fill `run_metadata` from CLI configuration and built-in defaults.
    fn fill_metadata(&mut self, ctx: &JobContext<'_>) -> FairResult<()> {
        debug!("filling missing metadata");
        let settings = ctx.settings;
        let label = self.remote_label().to_string();
        let defaults: [(&str, Value); 3] = [
            ("run_metadata.public", Value::Bool(true)),
            (
                "run_metadata.default_read_version",
                Value::from(DEFAULT_READ_VERSION.directive()),
            ),
            (
                "run_metadata.default_write_version",
                Value::from(DEFAULT_WRITE_VERSION.directive()),
            ),
        ];
        for (key, value) in defaults {
            if !self.contains(key) {
                self.set(key, value)?;
            }
        }

        let from_cli: [(&str, Option<String>); 6] = [
            ("run_metadata.local_repo", settings.local_repo()),
            ("run_metadata.default_input_namespace", settings.input_namespace()),
            ("run_metadata.default_output_namespace", settings.output_namespace()),
            ("run_metadata.local_data_registry_url", settings.local_registry_url().ok()),
            ("run_metadata.remote_data_registry_url", settings.remote_registry_url(&label).ok()),
            ("run_metadata.write_data_store", settings.write_data_store()),
        ];
        for (key, value) in from_cli {
            if self.contains(key) {
                continue;
            }
            match value {
                Some(value) => self.set(key, value)?,
                None => debug!(key, "no CLI configuration default"),
            }
        }

        // An explicit remote always wins over the document.
        if self.remote_label.is_some() {
            let uri = settings.remote_registry_url(&label)?;
            self.set("run_metadata.remote_data_registry_url", uri)?;
        }

        if !self.contains("run_metadata.remote_repo") {
            let remote = match settings.value("git.remote_repo") {
                Some(url) => Some(url),
                None => match self.text("run_metadata.local_repo") {
                    Some(repo) => Some(
                        ctx.git
                            .remote_url(Path::new(&repo), &settings.git_remote_label())?,
                    ),
                    None => {
                        warn!("no local repository, cannot determine remote repository");
                        None
                    }
                },
            };
            if let Some(remote) = remote {
                self.set("run_metadata.remote_repo", remote)?;
            }
        }
        Ok(())
    }

    /// Register declared namespaces and authors, then default every entry's
    /// `use.namespace`.
    fn resolve_namespaces(&mut self, ctx: &JobContext<'_>) -> FairResult<()> {
        debug!("updating namespace list");
        if self.contains("register") {
            register::handle_register_namespaces(self, ctx)?;
            register::handle_register_authors(self, ctx)?;
            register::switch_namespace_name_to_use(self)?;
        }
        if self.default_input_namespace().is_none() {
            return Err(FairError::user_config("Input namespace cannot be None"));
        }
        if self.default_output_namespace().is_none() {
            return Err(FairError::user_config("Output namespace cannot be None"));
        }
        for block in BLOCK_TYPES {
            if self.contains(block) {
                blocks::fill_namespaces(self, block);
            }
        }
        Ok(())
    }

    fn substitute_variables(&mut self, ctx: &JobContext<'_>) -> FairResult<()> {
        let job_dir = self
            .job_dir
            .clone()
            .ok_or_else(|| FairError::internal("Job directory initialisation failed"))?;
        let table = VariableTable::builtin(ProviderSources {
            now: self.now,
            local_repo: self.text("run_metadata.local_repo"),
            remote_repo: self.text("run_metadata.remote_repo"),
            job_dir,
            source_config: self.source.clone(),
            settings: ctx.settings,
            git: ctx.git,
        });
        table.substitute(&mut self.doc)
    }

    fn expand_wildcards(&mut self, ctx: &JobContext<'_>, mode: JobMode) -> FairResult<()> {
        for block in ["read", "write"] {
            if !self.contains(block) {
                continue;
            }
            let endpoint = self.lookup_endpoint(ctx.settings, mode, block)?;
            debug!(block, registry = %endpoint.url, "expanding wildcards");
            let version = if block == "read" {
                self.default_read_version()
            } else {
                self.default_write_version()
            };
            match glob_read_write(
                &mut self.doc,
                block,
                &version,
                ctx.registry,
                &endpoint,
                None,
                block == "read",
            ) {
                Ok(()) => {}
                Err(FairError::NotApplicable(reason)) => {
                    debug!(block, %reason, "skipping wildcard expansion");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// `namespace:name@vversion` for every data product to fetch before a run.
    ///
    /// Entries registered by this job or served from `use.cache` are skipped.
    pub fn get_readables(&self) -> FairResult<Vec<String>> {
        debug!("retrieving list of 'read' items");
        let Some(read) = self.get("read").and_then(Value::as_sequence) else {
            return Ok(Vec::new());
        };
        let mut readables = Vec::new();
        for entry in read {
            if entry.get(blocks::REGISTERED_TAG).is_some() {
                continue;
            }
            let Some(name) = document::str_field(entry, "data_product") else {
                continue;
            };
            let use_block = entry.get("use");
            let field = |key: &str| {
                use_block
                    .and_then(|u| u.get(key))
                    .and_then(document::scalar_string)
            };
            let (Some(version), Some(namespace)) = (field("version"), field("namespace")) else {
                error!(
                    ?entry,
                    "incomplete read block, expected 'use' with namespace and version"
                );
                return Err(FairError::user_config(
                    "Attempt to access 'read' listings before parsing complete",
                ));
            };
            if use_block.and_then(|u| u.get("cache")).is_none() {
                readables.push(format!("{namespace}:{name}@v{version}"));
            }
        }
        Ok(readables)
    }

    /// Validate and persist the working configuration.
    ///
    /// `output` defaults to `config.yaml` in the job directory. The file is
    /// replaced atomically.
    pub fn write(
        &mut self,
        settings: &dyn CliConfiguration,
        output: Option<&Path>,
    ) -> FairResult<WrittenJob> {
        blocks::remove_status_tags(self);
        if let Err(err) = validation::check(&self.doc) {
            error!(
                config = ?self.doc,
                "validation of generated job configuration failed"
            );
            return Err(err);
        }

        let path = match (output, self.job_dir.as_deref()) {
            (Some(path), _) => path.to_path_buf(),
            (None, Some(job_dir)) => job_dir.join(JOB_CONFIG_FILE),
            (None, None) => {
                return Err(FairError::user_config(
                    "Cannot write new user configuration file, no job directory created and no alternative filename provided",
                ))
            }
        };
        let text = serde_yaml::to_string(&self.doc)
            .map_err(|err| FairError::internal(format!("serialize job configuration: {err}")))?;
        write_atomic(&path, text.as_bytes())?;
        debug!(path = %path.display(), "configuration written");

        let environment = self.environment(settings, &path)?;
        Ok(WrittenJob { path, environment })
    }
}

fn key_path_error(key: &str, parent: String) -> FairError {
    FairError::KeyPath {
        key: key.to_string(),
        parent,
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> FairResult<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)
        .map_err(|err| FairError::io(format!("create {}", parent.display()), err))?;
    let mut tmp = tempfile::NamedTempFile::new_in(&parent)
        .map_err(|err| FairError::io(format!("write {}", path.display()), err))?;
    tmp.write_all(bytes)
        .map_err(|err| FairError::io(format!("write {}", path.display()), err))?;
    tmp.persist(path)
        .map_err(|err| FairError::io(format!("publish {}", path.display()), err.error))?;
    Ok(())
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
