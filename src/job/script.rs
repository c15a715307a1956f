//! Job scripts: the supported shells and materialising `run_metadata.script`
//! or `run_metadata.script_path` inside the job directory.
use super::JobConfiguration;
use crate::error::{FairError, FairResult};
use crate::settings::CliConfiguration;
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// How to invoke one kind of job script. `{0}` in `exec` is the script path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShellSpec {
    pub name: &'static str,
    pub exec: &'static str,
    pub extension: &'static str,
}

pub const SHELLS: &[ShellSpec] = &[
    ShellSpec { name: "pwsh", exec: "pwsh -command \". '{0}'\"", extension: "ps1" },
    ShellSpec { name: "batch", exec: "{0}", extension: "bat" },
    ShellSpec { name: "powershell", exec: "powershell -command \". '{0}'\"", extension: "ps1" },
    ShellSpec { name: "python2", exec: "python2 {0}", extension: "py" },
    ShellSpec { name: "python3", exec: "python3 {0}", extension: "py" },
    ShellSpec { name: "python", exec: "python {0}", extension: "py" },
    ShellSpec { name: "R", exec: "R -f {0}", extension: "R" },
    ShellSpec { name: "julia", exec: "julia {0}", extension: "jl" },
    ShellSpec { name: "bash", exec: "bash -eo pipefail {0}", extension: "sh" },
    ShellSpec { name: "java", exec: "java {0}", extension: "java" },
    ShellSpec { name: "sh", exec: "sh -e {0}", extension: "sh" },
];

pub fn shell_spec(name: &str) -> Option<&'static ShellSpec> {
    SHELLS.iter().find(|shell| shell.name == name)
}

pub fn default_shell() -> &'static str {
    if cfg!(windows) {
        "batch"
    } else {
        "sh"
    }
}

impl ShellSpec {
    /// Argument vector running `script` with this shell.
    pub fn command_line(&self, script: &Path) -> FairResult<Vec<String>> {
        let line = self.exec.replace("{0}", &script.display().to_string());
        shell_words::split(&line).map_err(|err| {
            FairError::internal(format!("Failed to split command for shell '{}': {err}", self.name))
        })
    }

    /// The interpreter, when it is found on `PATH`.
    pub fn program(&self) -> Option<PathBuf> {
        let program = self.exec.split_whitespace().next()?;
        if program == "{0}" {
            return None;
        }
        which::which(program).ok()
    }
}

/// A script written into the job directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobScript {
    pub shell: &'static ShellSpec,
    pub path: PathBuf,
}

impl JobScript {
    pub fn command_line(&self) -> FairResult<Vec<String>> {
        self.shell.command_line(&self.path)
    }
}

impl JobConfiguration {
    pub fn shell(&self) -> String {
        self.text("run_metadata.shell")
            .unwrap_or_else(|| default_shell().to_string())
    }

    /// Inline script text from `run_metadata.script`.
    pub fn command(&self) -> Option<String> {
        self.text("run_metadata.script")
    }

    pub fn script_path(&self) -> Option<PathBuf> {
        self.text("run_metadata.script_path").map(PathBuf::from)
    }

    /// Use `command` as the inline job script, replacing any script path.
    pub fn set_command(&mut self, command: &str, shell: Option<&str>) -> FairResult<()> {
        self.set("run_metadata.script", command)?;
        self.set("run_metadata.shell", shell.unwrap_or(default_shell()))?;
        self.pop("run_metadata.script_path");
        Ok(())
    }

    /// Point the job at `path`, replacing any inline script.
    pub fn set_script(&mut self, path: &Path) -> FairResult<()> {
        self.set("run_metadata.script_path", path.display().to_string())?;
        self.pop("run_metadata.script");
        Ok(())
    }

    /// Write the job script into the job directory and point
    /// `run_metadata.script_path` at the copy.
    pub fn setup_job_script(&mut self) -> FairResult<JobScript> {
        let job_dir = self
            .job_dir
            .clone()
            .ok_or_else(|| FairError::internal("Job directory initialisation failed"))?;
        let shell_name = self.shell();
        let shell = shell_spec(&shell_name).ok_or_else(|| {
            let known: Vec<&str> = SHELLS.iter().map(|shell| shell.name).collect();
            FairError::user_config_with_hint(
                format!("Unrecognised shell '{shell_name}' specified."),
                format!("Supported shells are {}", known.join(", ")),
            )
        })?;

        let (content, target) = if let Some(command) = self.command() {
            (command, job_dir.join(format!("script.{}", shell.extension)))
        } else if let Some(source) = self.script_path() {
            if !source.exists() {
                return Err(FairError::file_not_found(
                    format!(
                        "Failed to execute run, script '{}' was not found, or failed to be created.",
                        source.display()
                    ),
                    None,
                ));
            }
            let content = fs::read_to_string(&source)
                .map_err(|err| FairError::io(format!("read {}", source.display()), err))?;
            let name = source.file_name().map_or_else(
                || PathBuf::from(format!("script.{}", shell.extension)),
                PathBuf::from,
            );
            (content, job_dir.join(name))
        } else {
            (String::new(), PathBuf::new())
        };

        if content.trim().is_empty() {
            return Err(FairError::user_config(
                "Configuration file must contain either a valid 'script' or 'script_path' entry under 'run_metadata'",
            ));
        }
        fs::write(&target, content)
            .map_err(|err| FairError::io(format!("write {}", target.display()), err))?;
        debug!(shell = shell.name, script = %target.display(), "job script created");
        if shell.program().is_none() && shell.name != "batch" {
            warn!(shell = shell.name, "shell interpreter not found on PATH");
        }
        self.set_script(&target)?;
        Ok(JobScript {
            shell,
            path: target,
        })
    }

    /// Variables for the job script's environment.
    pub(crate) fn environment(
        &self,
        settings: &dyn CliConfiguration,
        written: &Path,
    ) -> FairResult<BTreeMap<String, String>> {
        let repo = self.local_repository()?;
        let config_dir = match (written.parent(), &self.job_dir) {
            (Some(parent), _) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            (_, Some(job_dir)) => job_dir.clone(),
            _ => PathBuf::from("."),
        };
        let config_name = written
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| super::JOB_CONFIG_FILE.to_string());

        let mut python_path: Vec<PathBuf> = env::var_os("PYTHONPATH")
            .map(|paths| env::split_paths(&paths).collect())
            .unwrap_or_default();
        python_path.push(PathBuf::from(&repo));
        let python_path = env::join_paths(python_path)
            .map_err(|err| FairError::internal(format!("Failed to build PYTHONPATH: {err}")))?;

        let mut environment = BTreeMap::from([
            ("FDP_LOCAL_REPO".to_string(), repo),
            (
                "PYTHONPATH".to_string(),
                python_path.to_string_lossy().into_owned(),
            ),
            (
                "FDP_CONFIG_DIR".to_string(),
                config_dir.display().to_string(),
            ),
            ("FDP_CONFIG_NAME".to_string(), config_name),
            ("FDP_DATA_STORE".to_string(), self.default_data_store()?),
            ("FDP_LOCAL_TOKEN".to_string(), settings.local_token()?),
        ]);
        if let Some(script) = self.script_path() {
            environment.insert("FDP_SCRIPT".to_string(), script.display().to_string());
        }
        Ok(environment)
    }
}
