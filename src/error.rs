//! Error taxonomy for job configuration resolution.
//!
//! Every failure carries a severity level, an optional remedial hint and the
//! process exit code the CLI should use when it reaches the top level.
use crate::validation::ValidationReport;
use thiserror::Error;

/// Top-level error type for the `fair` library.
#[derive(Debug, Error)]
pub enum FairError {
    /// The authored job document is structurally or semantically invalid.
    #[error("{msg}")]
    UserConfig { msg: String, hint: Option<String> },

    /// An invariant the pipeline itself should guarantee was violated.
    #[error("{0}")]
    Internal(String),

    /// The registry rejected a request.
    #[error("[HTTP {status}]: {msg}")]
    RegistryApiCall { msg: String, status: u16 },

    /// The registry could not be reached at all.
    #[error("{msg}")]
    UnexpectedRegistryServerState { msg: String, hint: Option<String> },

    /// A registry lookup that must produce a result came back empty.
    #[error("{0}")]
    Registry(String),

    /// The resolved document failed schema validation.
    #[error("{0}")]
    Validation(ValidationReport),

    /// A required CLI configuration value is missing or malformed.
    #[error("{msg}")]
    CliConfiguration { msg: String, hint: Option<String> },

    #[error("{msg}")]
    FileNotFound { msg: String, hint: Option<String> },

    /// No value exists at a dotted address within the document.
    #[error("Failed to retrieve item at address '{key}' from mapping '{parent}', no such address")]
    KeyPath { key: String, parent: String },

    /// Problems with the project git repository.
    #[error("{msg}")]
    Repository { msg: String, hint: Option<String> },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    NotImplemented(String),

    /// Wildcard expansion does not apply to a block; callers skip the block.
    #[error("wildcard expansion not applicable: {0}")]
    NotApplicable(String),
}

impl FairError {
    pub fn user_config(msg: impl Into<String>) -> Self {
        Self::UserConfig {
            msg: msg.into(),
            hint: None,
        }
    }

    pub fn user_config_with_hint(msg: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::UserConfig {
            msg: msg.into(),
            hint: Some(hint.into()),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn cli_config(msg: impl Into<String>) -> Self {
        Self::CliConfiguration {
            msg: msg.into(),
            hint: None,
        }
    }

    pub fn cli_config_with_hint(msg: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::CliConfiguration {
            msg: msg.into(),
            hint: Some(hint.into()),
        }
    }

    pub fn file_not_found(msg: impl Into<String>, hint: Option<&str>) -> Self {
        Self::FileNotFound {
            msg: msg.into(),
            hint: hint.map(str::to_string),
        }
    }

    pub fn repository(msg: impl Into<String>, hint: Option<&str>) -> Self {
        Self::Repository {
            msg: msg.into(),
            hint: hint.map(str::to_string),
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Message prefix used when the error is printed by the CLI.
    pub fn level(&self) -> &'static str {
        match self {
            Self::Internal(_) => "InternalError",
            Self::RegistryApiCall { status: 403, .. } => "Warning",
            _ => "Error",
        }
    }

    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::UserConfig { hint, .. }
            | Self::UnexpectedRegistryServerState { hint, .. }
            | Self::CliConfiguration { hint, .. }
            | Self::FileNotFound { hint, .. }
            | Self::Repository { hint, .. } => hint.as_deref(),
            _ => None,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::RegistryApiCall { status, .. } if *status > 0 => i32::from(*status),
            _ => 1,
        }
    }

    /// Render the error the way the CLI prints it: `<level>: <message>` with the
    /// hint on its own line.
    pub fn render(&self) -> String {
        let mut out = format!("{}: {}", self.level(), self);
        if let Some(hint) = self.hint() {
            out.push('\n');
            out.push_str(hint);
        }
        out
    }
}

pub type FairResult<T> = std::result::Result<T, FairError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_errors_are_prefixed_distinctly() {
        let err = FairError::internal("Failed to parse variables '[\"FOO\"]'");
        assert_eq!(err.level(), "InternalError");
        assert!(err.render().starts_with("InternalError: Failed to parse"));
    }

    #[test]
    fn registry_errors_exit_with_http_status() {
        let err = FairError::RegistryApiCall {
            msg: "Request failed".to_string(),
            status: 404,
        };
        assert_eq!(err.exit_code(), 404);
        assert_eq!(err.to_string(), "[HTTP 404]: Request failed");

        let forbidden = FairError::RegistryApiCall {
            msg: "forbidden".to_string(),
            status: 403,
        };
        assert_eq!(forbidden.level(), "Warning");
    }

    #[test]
    fn hint_is_rendered_on_its_own_line() {
        let err = FairError::user_config_with_hint(
            "Attempt to register object with unknown namespace 'PSU'",
            "Add new 'namespace' as separate 'register' entry",
        );
        assert_eq!(
            err.render(),
            "Error: Attempt to register object with unknown namespace 'PSU'\n\
             Add new 'namespace' as separate 'register' entry"
        );
    }
}
