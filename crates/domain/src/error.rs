/// Shared error type used across all Reverie crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    /// Missing or expired credentials. Carries an actionable hint
    /// (e.g. the command that refreshes the credential) so the
    /// orchestrator can surface it to the user verbatim.
    #[error("auth: {message}")]
    Auth { message: String, hint: String },

    #[error("storage: {0}")]
    Storage(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// The error text shown in cycle results: message plus hint for
    /// authentication failures, `Display` output otherwise.
    pub fn display_with_hint(&self) -> String {
        match self {
            Error::Auth { message, hint } if !hint.is_empty() => {
                format!("{message}: {hint}")
            }
            other => other.to_string(),
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Error::Auth { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
