use super::*;

fn yaml(text: &str) -> Value {
    serde_yaml::from_str(text).expect("parse yaml")
}

const RESOLVED: &str = r#"
run_metadata:
  local_repo: /home/ada/model
  latest_commit: b7b2c8a6f3d94b2c1f1b4b36a5a8d4e6e3f2a1c0
  remote_repo: git@github.com:FAIRDataPipeline/FAIR-CLI.git
  description: SEIRS model run
  local_data_registry_url: http://127.0.0.1:8000/api/
  remote_data_registry_url: https://data.scrc.uk/api/
  default_input_namespace: PSU
  default_output_namespace: testing
  write_data_store: /home/ada/.fair/data/
  script_path: /home/ada/.fair/jobs/2021-09-10_14_05_09_000000/script.sh
  shell: bash
  public: true
read:
- data_product: SEIRS_model/parameters
  use:
    namespace: PSU
    version: 1.0.0
write:
- data_product: model_output
  description: SEIRS model results
  file_type: csv
  use:
    version: 0.0.1
"#;

#[test]
fn resolved_document_passes() {
    let report = validate(&yaml(RESOLVED));
    assert!(report.is_valid(), "{report}");
    assert!(check(&yaml(RESOLVED)).is_ok());
}

#[test]
fn every_missing_field_is_reported() {
    let report = validate(&yaml("run_metadata:\n  local_repo: /tmp/model\n"));
    let locations = report.locations();
    for field in [
        "latest_commit",
        "remote_repo",
        "local_data_registry_url",
        "remote_data_registry_url",
        "default_input_namespace",
        "default_output_namespace",
        "write_data_store",
    ] {
        assert!(
            locations.contains(&format!("run_metadata.{field}").as_str()),
            "expected {field} in {locations:?}"
        );
    }
    assert_eq!(report.violations.len(), 7);
    assert!(report
        .violations
        .iter()
        .all(|v| v.kind == ViolationKind::Missing));
}

#[test]
fn closed_sections_reject_extra_keys() {
    let mut doc = yaml(RESOLVED);
    doc["run_metadata"]["colour"] = Value::from("blue");
    doc["read"][0]["use"]["cache_dir"] = Value::from("/tmp");
    doc["extras"] = Value::from(1);
    let report = validate(&doc);
    assert_eq!(
        report.locations(),
        vec!["extras", "run_metadata.colour", "read[0].use.cache_dir"]
    );
    assert!(report
        .violations
        .iter()
        .all(|v| v.kind == ViolationKind::Unknown));
}

#[test]
fn script_and_script_path_conflict() {
    let mut doc = yaml(RESOLVED);
    doc["run_metadata"]["script"] = Value::from("python3 run.py");
    let report = validate(&doc);
    assert_eq!(report.violations.len(), 1);
    assert_eq!(report.violations[0].kind, ViolationKind::Conflict);
}

#[test]
fn field_types_are_checked() {
    let mut doc = yaml(RESOLVED);
    doc["run_metadata"]["shell"] = Value::from("fish");
    doc["run_metadata"]["public"] = Value::from("yes");
    doc["run_metadata"]["local_data_registry_url"] = Value::from("127.0.0.1:8000");
    let report = validate(&doc);
    assert_eq!(
        report.locations(),
        vec![
            "run_metadata.local_data_registry_url",
            "run_metadata.shell",
            "run_metadata.public"
        ]
    );
    assert!(report.violations.iter().all(|v| v.kind == ViolationKind::Type));
}

#[test]
fn write_entries_need_a_file_type() {
    let mut doc = yaml(RESOLVED);
    doc["write"][0]
        .as_mapping_mut()
        .expect("write entry")
        .remove("file_type");
    let report = validate(&doc);
    assert_eq!(report.locations(), vec!["write[0].file_type"]);
}

#[test]
fn registration_shapes() {
    let doc = yaml(
        r#"
run_metadata: {}
register:
- namespace: PSU
  full_name: Pennsylvania State University
  website: https://ror.org/04p491231
- author: ada
  name: Ada Lovelace
- external_object: records/SARS-CoV-2/scotland/cases-and-management/testing
  identifier: https://doi.org/10.5281/zenodo.4767878
  namespace_name: PSU
  root: https://github.com/
  path: FAIRDataPipeline/data/raw/testing.csv
  title: Testing data
  file_type: csv
  release_date: 2021-05-20 12:00:00
  version: ${{ MINOR }}
  primary: true
- external_object: records/missing
  unique_name: Missing
  identifier: also given
  root: ftp://example.org/
- label: what is this
"#,
    );
    let report = validate(&doc);
    let register: Vec<&Violation> = report
        .violations
        .iter()
        .filter(|v| v.location.starts_with("register"))
        .collect();
    assert!(register.iter().all(|v| !v.location.starts_with("register[0]")));
    assert!(register.iter().all(|v| !v.location.starts_with("register[1]")));
    assert!(register.iter().all(|v| !v.location.starts_with("register[2]")));

    let fourth: Vec<&str> = register
        .iter()
        .filter(|v| v.location.starts_with("register[3]"))
        .map(|v| v.location.as_str())
        .collect();
    for expected in [
        "register[3].root",
        "register[3].path",
        "register[3].title",
        "register[3].file_type",
        "register[3].release_date",
        "register[3].version",
        "register[3].primary",
        "register[3].unique_name",
        "register[3].namespace_name",
    ] {
        assert!(fourth.contains(&expected), "expected {expected} in {fourth:?}");
    }
    assert!(register
        .iter()
        .any(|v| v.location == "register[4]" && v.kind == ViolationKind::Unknown));
}

#[test]
fn report_renders_as_a_table() {
    let report = validate(&yaml("run_metadata:\n  local_repo: /tmp/model\n  colour: blue\n"));
    let rendered = report.to_string();
    assert!(rendered.starts_with("Validation of job configuration failed with 8 violation(s):"));
    assert!(rendered.contains("run_metadata.colour"));
    assert!(rendered.contains("unknown"));
    match check(&yaml("run_metadata: []\n")) {
        Err(FairError::Validation(report)) => {
            assert_eq!(report.violations[0].kind, ViolationKind::Type)
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}
