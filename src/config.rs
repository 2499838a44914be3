//! Application configuration.
//!
//! Configuration is loaded from the first of:
//! 1. The `--config` command-line path (errors are fatal)
//! 2. `$MIMESTASH_CONFIG` (environment variable)
//! 3. `~/.config/mimestash/config.toml` (Linux/macOS)
//!    `%APPDATA%\mimestash\config.toml` (Windows)
//! 4. Built-in defaults
//!
//! Files ending in `.json` are parsed as JSON, anything else as TOML.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::hash::HashAlgorithm;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging settings.
    pub general: GeneralConfig,
    /// Store location and digest settings shared by both paths.
    pub common: CommonConfig,
    /// Detach (mail filter) settings.
    pub milter: MilterConfig,
    /// Retrieval server settings.
    pub server: ServerConfig,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
    /// Override directory for the log file.
    pub log_dir: Option<PathBuf>,
}

/// Store location and digest settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommonConfig {
    /// Directory holding payloads and sidecars.
    pub dir: Option<PathBuf>,
    /// Hash algorithm name, e.g. "sha256" or "blake3".
    pub alg: String,
    /// Secret mixed into every digest (empty = plain content hash).
    pub key: String,
}

/// Detach settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MilterConfig {
    /// Parts whose decoded body is larger than this many bytes are detached.
    pub size: u64,
    /// URL template with `{host}`, `{port}` and `{hash}` tokens.
    pub urlfmt: String,
    /// Placeholder text template with a `{url}` token.
    pub msgfmt: String,
}

/// Retrieval server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Public host name written into detach URLs.
    pub name: String,
    /// Address the server binds to.
    pub addr: String,
    /// Port the server binds to and the port written into URLs.
    pub port: u16,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            log_dir: None,
        }
    }
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            dir: None,
            alg: "sha256".to_string(),
            key: String::new(),
        }
    }
}

impl Default for MilterConfig {
    fn default() -> Self {
        Self {
            size: 1024 * 1024, // 1 MiB
            urlfmt: "http://{host}:{port}/{hash}".to_string(),
            msgfmt: "This attachment was removed from the message and can be downloaded from:\n\n    {url}\n".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "localhost".to_string(),
            addr: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl Config {
    /// Parse the configured hash algorithm. Fails on unknown names.
    pub fn hash_algorithm(&self) -> crate::error::Result<HashAlgorithm> {
        self.common.alg.parse()
    }
}

// ── Load ────────────────────────────────────────────────────────

/// Load configuration.
///
/// An explicit path must exist and parse. Otherwise the standard locations
/// are searched and the defaults are used if no file is found or on parse
/// error.
pub fn load_config(explicit: Option<&Path>) -> anyhow::Result<Config> {
    match explicit {
        Some(path) => read_config_file(path),
        None => Ok(load_fallback(config_file_path().as_deref())),
    }
}

/// Read the config at a standard location, falling back to the defaults.
///
/// Runs before logging is set up, so a broken file is reported on stderr.
fn load_fallback(path: Option<&Path>) -> Config {
    let Some(path) = path.filter(|p| p.exists()) else {
        return Config::default();
    };
    match read_config_file(path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("warning: {e:#}, using default configuration");
            Config::default()
        }
    }
}

/// Read and parse a single config file, choosing the format by extension.
pub fn read_config_file(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Cannot read config '{}': {e}", path.display()))?;
    parse_config(&contents, is_json(path))
        .map_err(|e| anyhow::anyhow!("Invalid config '{}': {e}", path.display()))
}

/// Parse config text as JSON or TOML.
pub fn parse_config(contents: &str, json: bool) -> anyhow::Result<Config> {
    if json {
        Ok(serde_json::from_str(contents)?)
    } else {
        Ok(toml::from_str(contents)?)
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    // 1. Environment variable override
    if let Ok(env_path) = std::env::var("MIMESTASH_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    // 2. Standard config directory
    dirs::config_dir().map(|d| d.join("mimestash").join("config.toml"))
}

/// Return the store directory.
pub fn store_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.common.dir {
        return dir.clone();
    }
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mimestash")
}

/// Return the directory for log files.
pub fn log_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.log_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mimestash")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.common.alg, "sha256");
        assert_eq!(cfg.common.key, "");
        assert_eq!(cfg.milter.size, 1_048_576);
        assert_eq!(cfg.milter.urlfmt, "http://{host}:{port}/{hash}");
        assert!(cfg.milter.msgfmt.contains("{url}"));
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.hash_algorithm().unwrap(), HashAlgorithm::Sha256);
    }

    #[test]
    fn test_serialize_deserialize_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        let parsed: Config = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.milter.msgfmt, cfg.milter.msgfmt);
        assert_eq!(parsed.server.addr, cfg.server.addr);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let partial = r#"
[common]
dir = "/srv/stash"
alg = "blake3"

[milter]
size = 2048
"#;
        let cfg = parse_config(partial, false).expect("parse partial");
        assert_eq!(cfg.common.dir, Some(PathBuf::from("/srv/stash")));
        assert_eq!(cfg.hash_algorithm().unwrap(), HashAlgorithm::Blake3);
        assert_eq!(cfg.milter.size, 2048);
        // Other fields use defaults
        assert_eq!(cfg.milter.urlfmt, "http://{host}:{port}/{hash}");
        assert_eq!(cfg.server.name, "localhost");
    }

    #[test]
    fn test_json_config() {
        let json = r#"{
            "common": {"dir": "/tmp/s", "alg": "sha512", "key": "s3cret"},
            "milter": {"size": 10, "urlfmt": "https://{host}/{hash}", "msgfmt": "-> {url}"},
            "server": {"name": "files.example.com", "addr": "0.0.0.0", "port": 9000}
        }"#;
        let cfg = parse_config(json, true).unwrap();
        assert_eq!(cfg.common.key, "s3cret");
        assert_eq!(cfg.milter.msgfmt, "-> {url}");
        assert_eq!(cfg.server.name, "files.example.com");
        assert_eq!(cfg.server.port, 9000);
    }

    #[test]
    fn test_unsupported_algorithm_is_reported() {
        let cfg = parse_config("[common]\nalg = \"crc32\"\n", false).unwrap();
        assert!(cfg.hash_algorithm().is_err());
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&tmp.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn test_explicit_json_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("stash.json");
        std::fs::write(&path, r#"{"server": {"port": 1234}}"#).unwrap();
        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.server.port, 1234);
        assert_eq!(cfg.server.name, "localhost");
    }

    #[test]
    fn test_malformed_fallback_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[milter\nsize = ").unwrap();
        let cfg = load_fallback(Some(&path));
        assert_eq!(cfg.milter.size, 1_048_576);
        assert_eq!(cfg.server.port, 8080);
    }

    #[test]
    fn test_fallback_file_is_read() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[milter]\nsize = 77\n").unwrap();
        assert_eq!(load_fallback(Some(&path)).milter.size, 77);
        assert_eq!(load_fallback(Some(&tmp.path().join("absent.toml"))).milter.size, 1_048_576);
        assert_eq!(load_fallback(None).server.name, "localhost");
    }

    #[test]
    fn test_store_dir_override() {
        let mut cfg = Config::default();
        cfg.common.dir = Some(PathBuf::from("/var/lib/stash"));
        assert_eq!(store_dir(&cfg), PathBuf::from("/var/lib/stash"));
    }
}
