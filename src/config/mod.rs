//! Startup configuration.
//!
//! Sources, lowest priority first: an optional TOML file, then environment
//! variables (`TENANT_AUTH_*`). The signing key, fixed salt component and
//! credential file path are all required; a missing value fails `load`
//! so the service never comes up half configured.

use crate::auth::DEFAULT_TOKEN_TTL_SECS;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Config file picked up from the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "tenant-auth.toml";

pub const ENV_SECRET_KEY: &str = "TENANT_AUTH_SECRET_KEY";
pub const ENV_FIXED_SALT: &str = "TENANT_AUTH_FIXED_SALT";
pub const ENV_USERS_PATH: &str = "TENANT_AUTH_USERS_PATH";
pub const ENV_TOKEN_TTL_SECS: &str = "TENANT_AUTH_TOKEN_TTL_SECS";
pub const ENV_HOST: &str = "TENANT_AUTH_HOST";
pub const ENV_PORT: &str = "TENANT_AUTH_PORT";

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;

/// A string that never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret([redacted])")
    }
}

// ── File schema ─────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub auth: AuthSection,
    pub gateway: GatewaySection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthSection {
    pub secret_key: Option<String>,
    pub fixed_salt: Option<String>,
    pub users_path: Option<String>,
    pub token_ttl_secs: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewaySection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub allow_registration: Option<bool>,
}

impl ConfigFile {
    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Invalid config file")
    }

    fn read(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("in {}", path.display()))
    }
}

/// Load `.env` from the working directory (or its parents) into the process
/// environment. Runs before logging is set up so `RUST_LOG` can live there.
/// Variables already set are left alone.
pub fn load_dotenv() -> Option<PathBuf> {
    dotenvy::dotenv().ok()
}

/// Load a specific env file into the process environment.
pub fn load_dotenv_from(path: &Path) -> Result<()> {
    dotenvy::from_path(path)
        .with_context(|| format!("Failed to load env file {}", path.display()))
}

// ── Resolved configuration ──────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub secret_key: Secret,
    pub fixed_salt: Secret,
    pub users_path: PathBuf,
    pub token_ttl_secs: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Whether `POST /api/users` accepts new tenants.
    pub allow_registration: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub auth: AuthConfig,
    pub gateway: GatewayConfig,
}

impl Config {
    /// Load the config file and the environment. Call [`load_dotenv`] first
    /// so `.env` values are visible here.
    ///
    /// With `path = None`, [`DEFAULT_CONFIG_FILE`] is read if it exists. An
    /// explicit path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => ConfigFile::read(path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    ConfigFile::read(default)?
                } else {
                    ConfigFile::default()
                }
            }
        };

        Self::resolve(file, |key| std::env::var(key).ok())
    }

    /// Merge file values with environment overrides and validate.
    /// Environment wins over file; blank values count as unset.
    pub fn resolve(file: ConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        // Secrets are kept byte for byte; whitespace only decides blankness.
        let lookup_raw = |key: &str, file_value: Option<String>| -> Option<String> {
            env(key)
                .or(file_value)
                .filter(|value| !value.trim().is_empty())
        };
        let lookup = |key: &str, file_value: Option<String>| -> Option<String> {
            lookup_raw(key, file_value).map(|value| value.trim().to_owned())
        };

        let Some(secret_key) = lookup_raw(ENV_SECRET_KEY, file.auth.secret_key) else {
            bail!("Missing signing key: set {ENV_SECRET_KEY} or [auth] secret_key");
        };
        let Some(fixed_salt) = lookup_raw(ENV_FIXED_SALT, file.auth.fixed_salt) else {
            bail!("Missing fixed salt component: set {ENV_FIXED_SALT} or [auth] fixed_salt");
        };
        let Some(users_path) = lookup(ENV_USERS_PATH, file.auth.users_path) else {
            bail!("Missing credential file path: set {ENV_USERS_PATH} or [auth] users_path");
        };

        let token_ttl_secs = match env(ENV_TOKEN_TTL_SECS).filter(|v| !v.trim().is_empty()) {
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .with_context(|| format!("{ENV_TOKEN_TTL_SECS} must be an integer"))?,
            None => file.auth.token_ttl_secs.unwrap_or(DEFAULT_TOKEN_TTL_SECS),
        };
        if token_ttl_secs <= 0 {
            bail!("Token TTL must be positive (got {token_ttl_secs})");
        }

        let host = lookup(ENV_HOST, file.gateway.host).unwrap_or_else(|| DEFAULT_HOST.into());
        let port = match env(ENV_PORT).filter(|v| !v.trim().is_empty()) {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .with_context(|| format!("{ENV_PORT} must be a port number"))?,
            None => file.gateway.port.unwrap_or(DEFAULT_PORT),
        };

        Ok(Self {
            auth: AuthConfig {
                secret_key: Secret::new(secret_key),
                fixed_salt: Secret::new(fixed_salt),
                users_path: PathBuf::from(shellexpand::tilde(&users_path).into_owned()),
                token_ttl_secs,
            },
            gateway: GatewayConfig {
                host,
                port,
                allow_registration: file.gateway.allow_registration.unwrap_or(false),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn full_env() -> impl Fn(&str) -> Option<String> {
        env_from(&[
            (ENV_SECRET_KEY, "env-key"),
            (ENV_FIXED_SALT, "env-salt"),
            (ENV_USERS_PATH, "/var/lib/tenant-auth/users.json"),
        ])
    }

    #[test]
    fn env_only_config_uses_defaults() {
        let config = Config::resolve(ConfigFile::default(), full_env()).unwrap();
        assert_eq!(config.auth.secret_key.expose(), "env-key");
        assert_eq!(config.auth.fixed_salt.expose(), "env-salt");
        assert_eq!(
            config.auth.users_path,
            PathBuf::from("/var/lib/tenant-auth/users.json")
        );
        assert_eq!(config.auth.token_ttl_secs, DEFAULT_TOKEN_TTL_SECS);
        assert_eq!(config.gateway.host, DEFAULT_HOST);
        assert_eq!(config.gateway.port, DEFAULT_PORT);
        assert!(!config.gateway.allow_registration);
    }

    #[test]
    fn file_values_are_used_when_env_is_absent() {
        let file = ConfigFile::parse(
            r#"
            [auth]
            secret_key = "file-key"
            fixed_salt = "file-salt"
            users_path = "data/users.json"
            token_ttl_secs = 600

            [gateway]
            host = "0.0.0.0"
            port = 9000
            allow_registration = true
            "#,
        )
        .unwrap();

        let config = Config::resolve(file, env_from(&[])).unwrap();
        assert_eq!(config.auth.secret_key.expose(), "file-key");
        assert_eq!(config.auth.users_path, PathBuf::from("data/users.json"));
        assert_eq!(config.auth.token_ttl_secs, 600);
        assert_eq!(
            config.gateway,
            GatewayConfig {
                host: "0.0.0.0".into(),
                port: 9000,
                allow_registration: true,
            }
        );
    }

    #[test]
    fn env_overrides_file() {
        let file = ConfigFile::parse(
            r#"
            [auth]
            secret_key = "file-key"
            fixed_salt = "file-salt"
            users_path = "file.json"
            token_ttl_secs = 600
            "#,
        )
        .unwrap();
        let env = env_from(&[
            (ENV_SECRET_KEY, "env-key"),
            (ENV_TOKEN_TTL_SECS, "42"),
            (ENV_PORT, "9100"),
        ]);

        let config = Config::resolve(file, env).unwrap();
        assert_eq!(config.auth.secret_key.expose(), "env-key");
        assert_eq!(config.auth.fixed_salt.expose(), "file-salt");
        assert_eq!(config.auth.token_ttl_secs, 42);
        assert_eq!(config.gateway.port, 9100);
    }

    #[test]
    fn missing_required_values_fail() {
        for missing in [ENV_SECRET_KEY, ENV_FIXED_SALT, ENV_USERS_PATH] {
            let pairs: Vec<(&str, &str)> = [
                (ENV_SECRET_KEY, "k"),
                (ENV_FIXED_SALT, "s"),
                (ENV_USERS_PATH, "u.json"),
            ]
            .into_iter()
            .filter(|(key, _)| *key != missing)
            .collect();

            let err = Config::resolve(ConfigFile::default(), env_from(&pairs)).unwrap_err();
            assert!(
                err.to_string().contains(missing),
                "error for {missing} was: {err}"
            );
        }
    }

    #[test]
    fn blank_values_count_as_missing() {
        let env = env_from(&[
            (ENV_SECRET_KEY, "   "),
            (ENV_FIXED_SALT, "s"),
            (ENV_USERS_PATH, "u.json"),
        ]);
        assert!(Config::resolve(ConfigFile::default(), env).is_err());
    }

    #[test]
    fn secrets_keep_surrounding_whitespace() {
        let env = env_from(&[
            (ENV_SECRET_KEY, " key with spaces "),
            (ENV_FIXED_SALT, "salt\t"),
            (ENV_USERS_PATH, "  u.json  "),
        ]);
        let config = Config::resolve(ConfigFile::default(), env).unwrap();
        assert_eq!(config.auth.secret_key.expose(), " key with spaces ");
        assert_eq!(config.auth.fixed_salt.expose(), "salt\t");
        assert_eq!(config.auth.users_path, PathBuf::from("u.json"));
    }

    #[test]
    fn env_file_values_reach_the_process_environment() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join(".env");
        std::fs::write(&path, "TENANT_AUTH_DOTENV_TEST_LEVEL=debug\n").unwrap();

        load_dotenv_from(&path).unwrap();

        assert_eq!(
            std::env::var("TENANT_AUTH_DOTENV_TEST_LEVEL").as_deref(),
            Ok("debug")
        );
    }

    #[test]
    fn missing_env_file_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(load_dotenv_from(&tmp.path().join("absent.env")).is_err());
    }

    #[test]
    fn non_positive_ttl_is_rejected() {
        let env = env_from(&[
            (ENV_SECRET_KEY, "k"),
            (ENV_FIXED_SALT, "s"),
            (ENV_USERS_PATH, "u.json"),
            (ENV_TOKEN_TTL_SECS, "0"),
        ]);
        assert!(Config::resolve(ConfigFile::default(), env).is_err());
    }

    #[test]
    fn unparsable_numbers_are_rejected() {
        let env = env_from(&[
            (ENV_SECRET_KEY, "k"),
            (ENV_FIXED_SALT, "s"),
            (ENV_USERS_PATH, "u.json"),
            (ENV_PORT, "not-a-port"),
        ]);
        assert!(Config::resolve(ConfigFile::default(), env).is_err());
    }

    #[test]
    fn unknown_file_keys_are_rejected() {
        assert!(ConfigFile::parse("[auth]\nsecret = \"typo\"\n").is_err());
    }

    #[test]
    fn tilde_in_users_path_is_expanded() {
        let env = env_from(&[
            (ENV_SECRET_KEY, "k"),
            (ENV_FIXED_SALT, "s"),
            (ENV_USERS_PATH, "~/users.json"),
        ]);
        let config = Config::resolve(ConfigFile::default(), env).unwrap();
        assert!(!config.auth.users_path.starts_with("~"));
        assert!(config.auth.users_path.ends_with("users.json"));
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let config = Config::resolve(ConfigFile::default(), full_env()).unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("env-key"));
        assert!(!rendered.contains("env-salt"));
        assert!(rendered.contains("redacted"));
    }
}
