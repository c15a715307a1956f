//! Job configuration resolution for FAIR data pipeline runs.
//!
//! A user-authored job configuration is turned into a fully resolved working
//! configuration: variables substituted, namespaces and versions resolved
//! against a data registry, wildcards expanded and the result validated.
pub mod document;
pub mod error;
pub mod git;
pub mod globbing;
pub mod job;
pub mod registry;
pub mod settings;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod validation;
pub mod variables;
pub mod versioning;

pub use error::{FairError, FairResult};
pub use job::{JobConfiguration, JobContext, JobMode, PrepareStage, WrittenJob};
