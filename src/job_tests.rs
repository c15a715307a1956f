use super::*;
use crate::settings::FairSettings;
use crate::testing::{FakeRegistry, StaticGit};
use chrono::NaiveDate;
use tempfile::TempDir;

fn job_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2021, 9, 10)
        .and_then(|date| date.and_hms_opt(14, 5, 9))
        .expect("valid time")
}

fn yaml(text: &str) -> Value {
    serde_yaml::from_str(text).expect("parse yaml")
}

fn base_pairs(home: &Path) -> Vec<(String, String)> {
    [
        ("registries.local.uri", "http://127.0.0.1:8000/api/".to_string()),
        ("registries.origin.uri", "https://data.scrc.uk/api/".to_string()),
        ("registries.backup.uri", "https://backup.scrc.uk/api/".to_string()),
        (
            "registries.local.data_store",
            home.join("data").display().to_string(),
        ),
        ("namespaces.input", "PSU".to_string()),
        ("namespaces.output", "testing".to_string()),
        ("git.local_repo", "/projects/model".to_string()),
        ("user.given_names", "Ada".to_string()),
        ("user.family_name", "Lovelace".to_string()),
        ("user.email", "ada@example.org".to_string()),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_string(), value))
    .collect()
}

struct Fixture {
    home: TempDir,
    settings: FairSettings,
    registry: FakeRegistry,
    git: StaticGit,
}

impl Fixture {
    fn new() -> Self {
        Self::build(|_| {})
    }

    fn build(edit: impl FnOnce(&mut Vec<(String, String)>)) -> Self {
        let home = tempfile::tempdir().expect("home");
        fs::create_dir_all(home.path().join("registry")).expect("registry dir");
        fs::write(home.path().join("registry").join("token"), "local-token\n").expect("token");
        let mut pairs = base_pairs(home.path());
        edit(&mut pairs);
        let settings = FairSettings::from_pairs(home.path(), pairs);

        let registry = FakeRegistry::new("http://127.0.0.1:8000/api");
        let psu = registry.add_namespace("PSU");
        registry.add_data_product("SEIRS_model/parameters", &psu, "1.0.0");
        registry.add_data_product("SEIRS_model/parameters", &psu, "1.1.0");
        registry.add_data_product("SEIRS_model/initial_conditions", &psu, "1.0.0");
        Self {
            home,
            settings,
            registry,
            git: StaticGit::default(),
        }
    }

    fn ctx(&self) -> JobContext<'_> {
        JobContext::new(&self.registry, &self.settings, &self.git)
    }

    fn job(&self, text: &str) -> JobConfiguration {
        JobConfiguration::from_value(yaml(text))
            .expect("job")
            .with_start_time(job_time())
    }

    fn job_dir(&self) -> PathBuf {
        self.home
            .path()
            .join("jobs")
            .join("2021-09-10_14_05_09_000000")
    }
}

const SIMPLE: &str = r#"
run_metadata:
  description: Run on ${{ DATE }}
  script: python3 run.py
read:
- data_product: SEIRS_model/parameters
write:
- data_product: model_output
  file_type: csv
  description: SEIRS results
"#;

fn text_at<'a>(job: &'a JobConfiguration, key: &str) -> &'a str {
    job.get(key).and_then(Value::as_str).expect("string at key")
}

fn entry_field(job: &JobConfiguration, block: &str, index: usize, key: &str) -> Option<Value> {
    let entry = job.get(block)?.as_sequence()?.get(index)?;
    crate::document::get_path(entry, key).cloned()
}

fn entry_text(job: &JobConfiguration, block: &str, index: usize, key: &str) -> String {
    entry_field(job, block, index, key)
        .and_then(|value| value.as_str().map(str::to_string))
        .expect("string in entry")
}

#[test]
fn prepare_resolves_a_simple_job() {
    let fixture = Fixture::new();
    let mut job = fixture.job(SIMPLE);
    let config = job
        .prepare(&fixture.ctx(), JobMode::Run, false)
        .expect("prepare");

    assert_eq!(config, fixture.job_dir().join(JOB_CONFIG_FILE));
    assert!(fixture.job_dir().is_dir());
    assert_eq!(job.stage(), PrepareStage::Ready);

    assert_eq!(text_at(&job, "run_metadata.description"), "Run on 20210910");
    assert_eq!(text_at(&job, "run_metadata.local_repo"), "/projects/model");
    assert_eq!(
        text_at(&job, "run_metadata.remote_repo"),
        "git@github.com:FAIRDataPipeline/FAIR-CLI.git"
    );
    assert_eq!(
        text_at(&job, "run_metadata.latest_commit"),
        fixture.git.commit.as_str()
    );
    assert!(!job.contains("run_metadata.default_read_version"));
    assert!(!job.contains("run_metadata.default_write_version"));

    assert_eq!(entry_text(&job, "read", 0, "use.version"), "1.1.0");
    assert_eq!(entry_text(&job, "read", 0, "use.namespace"), "PSU");
    assert_eq!(entry_text(&job, "write", 0, "use.version"), "0.0.1");
    assert_eq!(entry_text(&job, "write", 0, "use.namespace"), "testing");
    assert_eq!(entry_field(&job, "write", 0, "public"), Some(Value::Bool(true)));
    assert!(job.log_path().is_some_and(Path::exists));
}

/// Settings whose typed accessors disagree with the raw keys.
struct OverriddenSettings<'a>(&'a FairSettings);

impl CliConfiguration for OverriddenSettings<'_> {
    fn value(&self, key: &str) -> Option<String> {
        self.0.value(key)
    }

    fn home_dir(&self) -> PathBuf {
        self.0.home_dir()
    }

    fn output_namespace(&self) -> Option<String> {
        Some("staging".to_string())
    }

    fn local_repo(&self) -> Option<String> {
        Some("/projects/overridden".to_string())
    }

    fn write_data_store(&self) -> Option<String> {
        None
    }
}

#[test]
fn metadata_comes_from_configuration_accessors() {
    let fixture = Fixture::new();
    let settings = OverriddenSettings(&fixture.settings);
    let ctx = JobContext::new(&fixture.registry, &settings, &fixture.git);
    let mut job = fixture.job(SIMPLE);
    job.prepare(&ctx, JobMode::Run, false).expect("prepare");

    assert_eq!(text_at(&job, "run_metadata.default_input_namespace"), "PSU");
    assert_eq!(text_at(&job, "run_metadata.default_output_namespace"), "staging");
    assert_eq!(text_at(&job, "run_metadata.local_repo"), "/projects/overridden");
    assert!(!job.contains("run_metadata.write_data_store"));
    assert_eq!(entry_text(&job, "write", 0, "use.namespace"), "staging");
}

#[test]
fn readables_and_written_environment() {
    let fixture = Fixture::new();
    let mut job = fixture.job(SIMPLE);
    job.prepare(&fixture.ctx(), JobMode::Run, false)
        .expect("prepare");
    assert_eq!(
        job.get_readables().expect("readables"),
        vec!["PSU:SEIRS_model/parameters@v1.1.0"]
    );

    let script = job.setup_job_script().expect("script");
    assert_eq!(script.path, fixture.job_dir().join("script.sh"));
    let written = job.write(&fixture.settings, None).expect("write");
    assert_eq!(written.path, fixture.job_dir().join(JOB_CONFIG_FILE));

    let on_disk: Value =
        serde_yaml::from_str(&fs::read_to_string(&written.path).expect("read")).expect("yaml");
    assert_eq!(on_disk, job.content());
    assert!(validation::validate(&on_disk).is_valid());

    let env = &written.environment;
    assert_eq!(env["FDP_LOCAL_REPO"], "/projects/model");
    assert_eq!(env["FDP_CONFIG_DIR"], fixture.job_dir().display().to_string());
    assert_eq!(env["FDP_CONFIG_NAME"], JOB_CONFIG_FILE);
    assert_eq!(env["FDP_LOCAL_TOKEN"], "local-token");
    assert_eq!(env["FDP_SCRIPT"], script.path.display().to_string());
    assert!(env["PYTHONPATH"].ends_with("/projects/model"));
}

#[test]
fn wildcards_fan_out_and_resolve_each_version() {
    let fixture = Fixture::new();
    let mut job = fixture.job(
        "run_metadata: {}\nread:\n- data_product: SEIRS_model/*\nwrite:\n- data_product: results/*\n  file_type: csv\n",
    );
    job.prepare(&fixture.ctx(), JobMode::Run, false)
        .expect("prepare");

    let read = job.get("read").and_then(Value::as_sequence).expect("read");
    let resolved: Vec<(String, String)> = read
        .iter()
        .map(|entry| {
            (
                entry["data_product"].as_str().unwrap_or_default().to_string(),
                entry["use"]["version"].as_str().unwrap_or_default().to_string(),
            )
        })
        .collect();
    assert_eq!(
        resolved,
        vec![
            ("SEIRS_model/parameters".to_string(), "1.1.0".to_string()),
            ("SEIRS_model/initial_conditions".to_string(), "1.0.0".to_string()),
        ]
    );
    assert_eq!(entry_text(&job, "write", 0, "data_product"), "results/*");
    assert_eq!(entry_text(&job, "write", 0, "use.version"), "0.0.1");
}

#[test]
fn reading_a_missing_product_fails_without_writing() {
    let fixture = Fixture::new();
    let mut job = fixture.job("run_metadata: {}\nread:\n- data_product: nowhere/to/be/found\n");
    let err = job
        .prepare(&fixture.ctx(), JobMode::Run, false)
        .expect_err("missing product");
    assert!(err.to_string().contains("non-existing version"));
    assert!(!fixture.job_dir().join(JOB_CONFIG_FILE).exists());
    assert_ne!(job.stage(), PrepareStage::Ready);
}

#[test]
fn output_namespace_is_required() {
    let fixture = Fixture::build(|pairs| pairs.retain(|(key, _)| key != "namespaces.output"));
    let mut job = fixture.job(SIMPLE);
    match job.prepare(&fixture.ctx(), JobMode::Run, false) {
        Err(FairError::UserConfig { msg, .. }) => assert_eq!(msg, "Output namespace cannot be None"),
        other => panic!("expected user config error, got {other:?}"),
    }
}

#[test]
fn leftover_placeholders_are_internal_errors() {
    let fixture = Fixture::new();
    let mut job = fixture.job("run_metadata:\n  description: bump ${{ MINOR }}\n");
    match job.prepare(&fixture.ctx(), JobMode::Run, false) {
        Err(FairError::Internal(msg)) => assert!(msg.contains("MINOR")),
        other => panic!("expected internal error, got {other:?}"),
    }
}

#[test]
fn dirty_repository_needs_permission() {
    let mut fixture = Fixture::new();
    fixture.git.dirty = true;
    let mut job = fixture.job(SIMPLE);
    assert!(matches!(
        job.prepare(&fixture.ctx(), JobMode::Run, false),
        Err(FairError::Repository { .. })
    ));

    let mut job = fixture.job(SIMPLE);
    job.prepare(&fixture.ctx(), JobMode::Run, true)
        .expect("prepare dirty");
    assert!(text_at(&job, "run_metadata.latest_commit").ends_with("-dirty"));
}

#[test]
fn push_only_creates_the_job_directory() {
    let fixture = Fixture::new();
    let mut job = fixture.job(SIMPLE);
    let before = job.content();
    let config = job
        .prepare(&fixture.ctx(), JobMode::Push, false)
        .expect("prepare");
    assert_eq!(config, fixture.job_dir().join(JOB_CONFIG_FILE));
    assert!(fixture.job_dir().is_dir());
    assert_eq!(job.content(), before);
    assert_eq!(job.stage(), PrepareStage::Loaded);
    assert!(fixture.registry.requests().is_empty());
}

#[test]
fn explicit_remote_overrides_document() {
    let fixture = Fixture::new();
    let mut job = fixture
        .job("run_metadata:\n  remote_data_registry_url: https://data.scrc.uk/api/\n")
        .with_remote("backup");
    job.prepare(&fixture.ctx(), JobMode::Run, false)
        .expect("prepare");
    assert_eq!(
        text_at(&job, "run_metadata.remote_data_registry_url"),
        "https://backup.scrc.uk/api/"
    );
}

#[test]
fn registrations_become_tagged_reads() {
    let fixture = Fixture::new();
    let mut job = fixture.job(
        r#"
run_metadata: {}
register:
- namespace: SCRC
  full_name: Scottish COVID-19 Response Consortium
  website: https://ror.org/03vaer060
- author: ada
  name: Ada Lovelace
- external_object: records/testing
  namespace_name: SCRC
  root: https://example.org/
  path: data/testing.csv
  title: Testing data
  identifier: https://doi.org/10.5281/zenodo.4767878
  file_type: csv
  release_date: 2021-05-20 12:00:00
  version: ${{ MINOR }}
  primary: true
"#,
    );
    job.prepare(&fixture.ctx(), JobMode::Run, false)
        .expect("prepare");

    assert_eq!(fixture.registry.objects("namespace").len(), 2);
    assert_eq!(fixture.registry.objects("author").len(), 1);
    assert!(!job.contains("register"));
    assert_eq!(entry_text(&job, "read", 0, "data_product"), "records/testing");
    assert_eq!(entry_text(&job, "read", 0, "use.namespace"), "SCRC");
    assert_eq!(entry_text(&job, "read", 0, "use.version"), "0.1.0");
    assert_eq!(entry_field(&job, "read", 0, "registered"), Some(Value::Bool(true)));
    assert!(job.get_readables().expect("readables").is_empty());

    job.write(&fixture.settings, None).expect("write");
    assert!(entry_field(&job, "read", 0, "registered").is_none());
}

#[test]
fn namespace_declarations_cannot_carry_objects() {
    let fixture = Fixture::new();
    let mut job = fixture.job("run_metadata: {}\nregister:\n- namespace: SCRC\n  data_product: oops\n");
    let err = job
        .prepare(&fixture.ctx(), JobMode::Run, false)
        .expect_err("conflict");
    assert!(err.hint().is_some_and(|hint| hint.contains("namespace_name")));
}

#[test]
fn namespace_name_must_be_declared_alongside() {
    let fixture = Fixture::new();
    let mut job = fixture.job(
        r#"
run_metadata: {}
register:
- external_object: records/testing
  namespace_name: UNDECLARED
  root: https://example.org/
  path: data/testing.csv
  title: Testing data
  identifier: https://doi.org/10.5281/zenodo.4767878
  file_type: csv
  release_date: 2021-05-20 12:00:00
  version: ${{ MINOR }}
  primary: true
"#,
    );
    let err = job
        .prepare(&fixture.ctx(), JobMode::Run, false)
        .expect_err("unknown namespace");
    assert!(matches!(err, FairError::UserConfig { .. }));
    assert!(err.to_string().contains("'UNDECLARED'"));
    assert_eq!(
        err.hint(),
        Some("Add new 'namespace' as separate 'register' entry")
    );
    assert!(!job.contains("read"));
}

#[test]
fn author_declarations_cannot_carry_objects() {
    let fixture = Fixture::new();
    let mut job = fixture.job(
        r#"
run_metadata: {}
register:
- author: ada
  name: Ada Lovelace
  data_product: important/output
  root: https://example.org/
  path: data/output.csv
  file_type: csv
  version: 0.1.0
"#,
    );
    match job.prepare(&fixture.ctx(), JobMode::Run, false) {
        Err(FairError::UserConfig { msg, .. }) => {
            assert!(msg.contains("Invalid use of tag 'author'"), "{msg}");
            assert!(msg.contains("'data_product'"), "{msg}");
        }
        other => panic!("expected user config error, got {other:?}"),
    }
    assert!(fixture.registry.objects("author").is_empty());
}

const PULLED: &str = r#"
run_metadata: {}
register:
- namespace: SCRC
- external_object: records/testing
  namespace_name: SCRC
  root: https://example.org/
  path: data/testing.csv
  title: Testing data
  unique_name: Scottish testing data
  file_type: csv
  release_date: 2021-05-20 12:00:00
  version: 0.1.0
  primary: true
"#;

#[test]
fn pull_fetches_registrations_once() {
    let fixture = Fixture::new();
    fixture
        .registry
        .add_file("https://example.org/data/testing.csv", b"day,cases\n1,3\n");

    let mut job = fixture.job(PULLED);
    job.prepare(&fixture.ctx(), JobMode::Pull, false)
        .expect("pull");
    assert_eq!(job.stage(), PrepareStage::Ready);

    let stored = fixture
        .home
        .path()
        .join("data/SCRC/records/testing/0.1.0.csv");
    assert_eq!(fs::read(&stored).expect("stored"), b"day,cases\n1,3\n");
    let externals = fixture.registry.objects("external_object");
    assert_eq!(externals.len(), 1);
    assert_eq!(
        externals[0]["alternate_identifier"].as_str(),
        Some("Scottish testing data")
    );
    assert_eq!(externals[0]["primary_not_supplement"].as_bool(), Some(true));

    let log = fs::read_to_string(job.log_path().expect("log")).expect("read log");
    assert!(log.contains(" Author    = Ada Lovelace <ada@example.org>"));
    assert!(log.contains(" Command   = fair pull"));

    let mut again = JobConfiguration::from_value(yaml(PULLED))
        .expect("job")
        .with_start_time(job_time() + chrono::Duration::seconds(1));
    again
        .prepare(&fixture.ctx(), JobMode::Pull, false)
        .expect("second pull");
    assert_eq!(fixture.registry.objects("external_object").len(), 1);
    assert_eq!(fixture.registry.objects("data_product").len(), 4);
}

#[test]
fn registrations_need_their_fields() {
    let fixture = Fixture::new();
    fixture
        .registry
        .add_file("https://example.org/data/testing.csv", b"x");
    let mut job = fixture.job(&PULLED.replace("  root: https://example.org/\n", ""));
    match job.prepare(&fixture.ctx(), JobMode::Pull, false) {
        Err(FairError::UserConfig { msg, .. }) => assert!(msg.contains("'root'")),
        other => panic!("expected user config error, got {other:?}"),
    }
}

#[test]
fn accessors_follow_dotted_keys() {
    let mut job = JobConfiguration::from_value(Value::Null).expect("job");
    assert!(job.contains("run_metadata"));
    job.set("run_metadata.description", "demo").expect("set");
    assert_eq!(text_at(&job, "run_metadata.description"), "demo");
    assert!(matches!(
        job.set("run_metadata.description.deeper", "x"),
        Err(FairError::KeyPath { .. })
    ));
    assert!(matches!(
        job.require("run_metadata.missing"),
        Err(FairError::KeyPath { .. })
    ));
    assert_eq!(job.pop("run_metadata.description"), Some(Value::from("demo")));
    assert!(job.default_output_namespace().is_none());
    assert_eq!(job.default_write_version(), "${{ PATCH }}");
    assert!(job.is_public_global());

    assert!(matches!(
        JobConfiguration::load(Path::new("/does/not/exist.yaml")),
        Err(FairError::FileNotFound { .. })
    ));
    assert!(JobConfiguration::from_value(yaml("- just\n- a list\n")).is_err());
}

#[test]
fn unresolved_documents_are_not_written() {
    let fixture = Fixture::new();
    let mut job = fixture.job(SIMPLE);
    let output = fixture.home.path().join("config.yaml");
    assert!(matches!(
        job.write(&fixture.settings, Some(&output)),
        Err(FairError::Validation(_))
    ));
    assert!(!output.exists());
}
