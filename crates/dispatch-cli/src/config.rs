//! Configuration file management for `dispatcherd`.
//!
//! Provides a TOML-based config file at `~/.config/dispatcher/config.toml`
//! and a resolution chain: CLI flag > env var > config file > built-in
//! default, for the two settings that can come from any of those sources.
//! Everything else (hosts, routing, retry, circuit, observability) only
//! ever comes from the config file.

use std::path::PathBuf;

use anyhow::{Context, Result};

use dispatch_core::config::{Config, ConfigFile};

/// Return the dispatcher config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/dispatcher` or
/// `~/.config/dispatcher`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("dispatcher");
    }
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".config")
        .join("dispatcher")
}

/// Return the path to the dispatcher config file, honoring an explicit
/// override (the `--config` flag).
pub fn config_path(override_path: Option<&PathBuf>) -> PathBuf {
    override_path.cloned().unwrap_or_else(|| config_dir().join("config.toml"))
}

/// Load and parse the config file at `path`. Returns an error if it does
/// not exist or fails to parse.
pub fn load_config_file(path: &PathBuf) -> Result<ConfigFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("failed to parse config file at {}", path.display()))
}

/// Write `contents` to `path`, creating parent directories as needed and
/// setting 0600 permissions on Unix.
pub fn write_config_file(path: &PathBuf, contents: &str) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }
    std::fs::write(path, contents).with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

/// Resolve the database URL using the chain: CLI flag > `DISPATCHER_DATABASE_URL`
/// env var > config file `[database].url` > built-in default. The config
/// file, if present, is still required to build the rest of [`Config`]; this
/// only overrides the one field the chain applies to.
pub fn resolve_database_url(cli_url: Option<&str>, file: Option<&ConfigFile>) -> String {
    if let Some(url) = cli_url {
        return url.to_string();
    }
    if let Ok(url) = std::env::var("DISPATCHER_DATABASE_URL") {
        return url;
    }
    if let Some(file) = file {
        return file.database.url.clone();
    }
    dispatch_db::config::DbConfig::DEFAULT_URL.to_string()
}

/// Load the config file at `path`, apply the database URL resolution chain,
/// and validate the result into a [`Config`].
pub fn resolve(path: &PathBuf, cli_database_url: Option<&str>) -> Result<Config> {
    let mut file = load_config_file(path)?;
    file.database.url = resolve_database_url(cli_database_url, Some(&file));
    Config::validate(file).context("invalid configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_defaults_to_xdg_layout() {
        let path = config_path(None);
        assert!(path.ends_with("dispatcher/config.toml"), "unexpected path: {}", path.display());
    }

    #[test]
    fn config_path_honors_explicit_override() {
        let override_path = PathBuf::from("/tmp/custom/config.toml");
        let path = config_path(Some(&override_path));
        assert_eq!(path, override_path);
    }

    #[test]
    fn resolve_database_url_prefers_cli_flag() {
        let url = resolve_database_url(Some("postgres://cli/db"), None);
        assert_eq!(url, "postgres://cli/db");
    }

    #[test]
    fn resolve_database_url_falls_back_to_default() {
        unsafe { std::env::remove_var("DISPATCHER_DATABASE_URL") };
        let url = resolve_database_url(None, None);
        assert_eq!(url, dispatch_db::config::DbConfig::DEFAULT_URL);
    }
}
