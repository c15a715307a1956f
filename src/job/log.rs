//! Per-job log file inside the job directory.
use super::JOB_DIR_FORMAT;
use crate::error::{FairError, FairResult};
use chrono::NaiveDateTime;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const RULE: &str = "--------------------------------";
const COMMENCED_FORMAT: &str = "%a %b %d %H:%M:%S %Y";

#[derive(Debug)]
pub struct JobLog {
    path: PathBuf,
    file: File,
}

impl JobLog {
    /// Create `job_<timestamp>.log` in `job_dir`.
    pub fn create(job_dir: &Path, now: &NaiveDateTime) -> FairResult<Self> {
        let path = job_dir.join(format!("job_{}.log", now.format(JOB_DIR_FORMAT)));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| FairError::io(format!("create {}", path.display()), err))?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_header(
        &mut self,
        now: &NaiveDateTime,
        author: &str,
        email: &str,
        command: &str,
    ) -> FairResult<()> {
        self.write_lines(&[
            RULE.to_string(),
            format!(" Commenced = {}", now.format(COMMENCED_FORMAT)),
            format!(" Author    = {author} <{email}>"),
            format!(" Command   = fair {command}"),
            RULE.to_string(),
        ])
    }

    pub fn write_lines(&mut self, lines: &[String]) -> FairResult<()> {
        for line in lines {
            writeln!(self.file, "{line}")
                .map_err(|err| FairError::io(format!("write {}", self.path.display()), err))?;
        }
        Ok(())
    }
}
