//! Cloud fallback credential resolution.
//!
//! Fixed chain: an environment variable first, then a local credentials
//! file, then unavailable. Unavailability is logged once at startup, not
//! per task, so a missing key doesn't spam the log on every dispatch tick.

use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct CredentialsFile {
    #[serde(default)]
    providers: std::collections::HashMap<String, ProviderCredentials>,
}

#[derive(Debug, Deserialize)]
struct ProviderCredentials {
    api_key: Option<String>,
}

/// Resolve an API key for `provider_name`, trying `env_var` first and
/// then `credentials_path` (a JSON file shaped `{"providers": {"<name>":
/// {"api_key": "..."}}}`).
pub fn resolve_api_key(
    env_var: &str,
    provider_name: &str,
    credentials_path: Option<&Path>,
) -> Option<String> {
    if let Ok(key) = std::env::var(env_var) {
        if !key.is_empty() {
            return Some(key);
        }
    }

    let path = credentials_path?;
    let contents = std::fs::read_to_string(path).ok()?;
    let parsed: CredentialsFile = serde_json::from_str(&contents).ok()?;
    parsed.providers.get(provider_name)?.api_key.clone()
}

pub fn default_credentials_path() -> Option<PathBuf> {
    dirs_home().map(|home| home.join(".local/share/crush/crush.json"))
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn env_var_takes_precedence_over_file() {
        unsafe { std::env::set_var("TEST_CLOUD_KEY_PRECEDENCE", "from-env") };
        let key = resolve_api_key("TEST_CLOUD_KEY_PRECEDENCE", "anthropic", None);
        assert_eq!(key.as_deref(), Some("from-env"));
        unsafe { std::env::remove_var("TEST_CLOUD_KEY_PRECEDENCE") };
    }

    #[test]
    fn falls_back_to_credentials_file() {
        unsafe { std::env::remove_var("TEST_CLOUD_KEY_FILE") };
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"providers":{{"anthropic":{{"api_key":"from-file"}}}}}}"#).unwrap();

        let key = resolve_api_key("TEST_CLOUD_KEY_FILE", "anthropic", Some(file.path()));
        assert_eq!(key.as_deref(), Some("from-file"));
    }

    #[test]
    fn unavailable_when_neither_source_has_it() {
        unsafe { std::env::remove_var("TEST_CLOUD_KEY_MISSING") };
        let key = resolve_api_key("TEST_CLOUD_KEY_MISSING", "anthropic", None);
        assert!(key.is_none());
    }
}
