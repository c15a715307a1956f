//! Shared test infrastructure for integration tests.
#![allow(dead_code)]

use fair::settings::{global_config_path, FairSettings};
use fair::testing::{FakeRegistry, StaticGit};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

pub const LOCAL_TOKEN: &str = "0123456789abcdef";

fn manifest_dir() -> PathBuf {
    PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".into()))
}

/// Path of a file under tests/fixtures/.
pub fn fixture(name: &str) -> PathBuf {
    manifest_dir().join("tests/fixtures").join(name)
}

/// A throwaway FAIR home with a CLI configuration and a local token.
pub struct TestHome {
    pub dir: TempDir,
}

impl TestHome {
    pub fn new() -> anyhow::Result<Self> {
        let dir = TempDir::new()?;
        let home = dir.path();
        let data_store = home.join("data");
        let config = format!(
            "user:\n  given_names: Ada\n  family_name: Lovelace\n  email: ada@example.org\n  \
             uuid: 2ddb2358-84bf-43ff-b2aa-3ac7dc3b49f1\n\
             git:\n  local_repo: /projects/model\n  remote: origin\n\
             namespaces:\n  input: PSU\n  output: testing\n\
             registries:\n  local:\n    uri: http://127.0.0.1:8000/api/\n    data_store: {}\n  \
             origin:\n    uri: https://data.scrc.uk/api/\n",
            data_store.display()
        );
        let config_path = global_config_path(home);
        fs::create_dir_all(config_path.parent().unwrap_or(home))?;
        fs::write(&config_path, config)?;
        fs::create_dir_all(home.join("registry"))?;
        fs::write(home.join("registry").join("token"), format!("{LOCAL_TOKEN}\n"))?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn settings(&self) -> anyhow::Result<FairSettings> {
        Ok(FairSettings::load(self.path(), None)?)
    }

    /// Copy a fixture into the home directory so variables such as
    /// `SOURCE_CONFIG` resolve against a writable location.
    pub fn copy_fixture(&self, name: &str) -> anyhow::Result<PathBuf> {
        let target = self.path().join(name);
        fs::copy(fixture(name), &target)?;
        Ok(target)
    }

    /// Run the `fair` binary with FAIR_HOME pointing at this home.
    pub fn run_fair(&self, args: &[&str]) -> anyhow::Result<Output> {
        Ok(Command::new(env!("CARGO_BIN_EXE_fair"))
            .args(args)
            .env("FAIR_HOME", self.path())
            .env_remove("RUST_LOG")
            .current_dir(self.path())
            .output()?)
    }
}

/// A registry seeded with the PSU namespace and SEIRS model inputs.
pub fn seeded_registry() -> FakeRegistry {
    let registry = FakeRegistry::new("http://127.0.0.1:8000/api");
    let psu = registry.add_namespace("PSU");
    registry.add_data_product("SEIRS_model/parameters", &psu, "1.0.0");
    registry.add_data_product("SEIRS_model/parameters", &psu, "1.1.0");
    registry.add_data_product("SEIRS_model/initial_conditions", &psu, "1.0.0");
    registry
}

pub fn git() -> StaticGit {
    StaticGit {
        branch: "feature".to_string(),
        ..StaticGit::default()
    }
}
