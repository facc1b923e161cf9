//! Shared utility functions for backend adapters.

use rv_domain::error::{Error, Result};

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeout errors map to [`Error::Timeout`]; everything else maps to
/// [`Error::Http`].
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

/// Resolve a secret named by an environment variable, with an OS
/// keychain fallback under the `reverie` service (account = the env var
/// name lowercased with underscores as dashes).
pub(crate) fn resolve_secret(env_var: &str) -> Result<String> {
    if let Ok(value) = std::env::var(env_var) {
        if !value.is_empty() {
            return Ok(value);
        }
    }

    let account = env_var.to_lowercase().replace('_', "-");
    match keyring::Entry::new("reverie", &account).and_then(|e| e.get_password()) {
        Ok(secret) => {
            tracing::debug!(account = %account, "secret resolved from keychain");
            Ok(secret)
        }
        Err(_) => Err(Error::Auth {
            message: format!("environment variable '{env_var}' not set"),
            hint: format!("export {env_var} or store it in the OS keychain under reverie/{account}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_secret_prefers_env() {
        let var = "RV_TEST_SECRET_RESOLUTION_1";
        std::env::set_var(var, "from-env");
        assert_eq!(resolve_secret(var).unwrap(), "from-env");
        std::env::remove_var(var);
    }

    #[test]
    fn resolve_secret_missing_is_auth_error() {
        let err = resolve_secret("RV_TEST_DEFINITELY_UNSET_9").unwrap_err();
        assert!(err.is_auth());
        assert!(err.to_string().contains("RV_TEST_DEFINITELY_UNSET_9"));
    }
}
