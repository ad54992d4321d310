use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

/// Pre-compiled regex for hostname validation (compiled once at first use)
static HOSTNAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9][-a-zA-Z0-9\.]*[a-zA-Z0-9]$").unwrap());

/// Loose address check; delivery is the notifier's problem.
static EMAIL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());

#[derive(Debug, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub server: Option<ServerSection>,
    #[serde(default)]
    pub logging: Option<LoggingSection>,
    #[serde(default)]
    pub database: Option<DatabaseSection>,
    #[serde(default)]
    pub auth: Option<AuthSection>,
    #[serde(default)]
    pub encryption: Option<EncryptionSection>,
    #[serde(default)]
    pub notifications: Option<NotificationsSection>,
    #[serde(default)]
    pub probes: Option<ProbesSection>,
    #[serde(default)]
    pub workers: Option<WorkersSection>,
}

#[derive(Debug, Deserialize)]
pub struct ServerSection {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub json: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct DatabaseSection {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub max_connections: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct AuthSection {
    #[serde(default)]
    pub jwt_secret: Option<String>,
    #[serde(default)]
    pub operator_user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EncryptionSection {
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NotificationsSection {
    #[serde(default)]
    pub operator_email: Option<String>,
    #[serde(default)]
    pub from_address: Option<String>,
    #[serde(default)]
    pub smtp_host: Option<String>,
    #[serde(default)]
    pub smtp_port: Option<u16>,
    #[serde(default)]
    pub smtp_username: Option<String>,
    #[serde(default)]
    pub smtp_password: Option<String>,
    #[serde(default)]
    pub smtp_starttls: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ProbesSection {
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct WorkersSection {
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub drain_timeout_secs: Option<u64>,
    #[serde(default)]
    pub scheduler_enabled: Option<bool>,
    #[serde(default)]
    pub embedded: Option<bool>,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Load a RawConfigFile from a path. The format is inferred from the extension: .toml, .yaml/.yml, .json
pub fn load_raw_from_file<P: AsRef<Path>>(path: P) -> Result<RawConfigFile, ConfigError> {
    let path = path.as_ref();
    let s = fs::read_to_string(path)?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase());
    parse_config_str(&s, ext.as_deref())
}

#[inline]
fn parse_config_str(s: &str, ext: Option<&str>) -> Result<RawConfigFile, ConfigError> {
    match ext {
        #[cfg(feature = "toml")]
        Some("toml") => toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string())),
        #[cfg(feature = "yaml")]
        Some("yaml" | "yml") => {
            serde_yaml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
        }
        #[cfg(feature = "json")]
        Some("json") => serde_json::from_str(s).map_err(|e| ConfigError::Parse(e.to_string())),
        _ => parse_config_auto(s),
    }
}

/// Try each enabled format in turn.
#[inline]
fn parse_config_auto(s: &str) -> Result<RawConfigFile, ConfigError> {
    #[cfg(feature = "toml")]
    if let Ok(cfg) = toml::from_str(s) {
        return Ok(cfg);
    }

    #[cfg(feature = "json")]
    if let Ok(cfg) = serde_json::from_str(s) {
        return Ok(cfg);
    }

    #[cfg(feature = "yaml")]
    if let Ok(cfg) = serde_yaml::from_str(s) {
        return Ok(cfg);
    }

    #[cfg(any(feature = "yaml", feature = "toml", feature = "json"))]
    {
        Err(ConfigError::Parse(
            "failed to parse config as any supported format".into(),
        ))
    }

    #[cfg(not(any(feature = "yaml", feature = "toml", feature = "json")))]
    {
        let _ = s;
        Err(ConfigError::Parse("no config format enabled".into()))
    }
}

/// Concrete application configuration with defaults.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub encryption: EncryptionConfig,
    pub notifications: NotificationsConfig,
    pub probes: ProbesConfig,
    pub workers: WorkersConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthConfig {
    #[serde(skip_serializing)]
    pub jwt_secret: Option<String>,
    /// User id jobs execute as. Backup jobs for any other user are rejected.
    pub operator_user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncryptionConfig {
    #[serde(skip_serializing)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationsConfig {
    pub operator_email: String,
    pub from_address: String,
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    #[serde(skip_serializing)]
    pub smtp_password: Option<String>,
    pub smtp_starttls: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbesConfig {
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkersConfig {
    pub poll_interval_ms: u64,
    pub drain_timeout_secs: u64,
    pub scheduler_enabled: bool,
    /// Run the workers and the schedule inside the HTTP server. Turn off when
    /// a separate `cnet-worker` process owns them.
    pub embedded: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 6000,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                json: false,
            },
            database: DatabaseConfig {
                url: "sqlite://cnet.sqlite".to_string(),
                max_connections: 10,
            },
            auth: AuthConfig {
                jwt_secret: None,
                operator_user_id: None,
            },
            encryption: EncryptionConfig { password: None },
            notifications: NotificationsConfig {
                operator_email: "admin@c-net.local".to_string(),
                from_address: "C-Net Alerts <noreply@c-net.local>".to_string(),
                smtp_host: None,
                smtp_port: 587,
                smtp_username: None,
                smtp_password: None,
                smtp_starttls: true,
            },
            probes: ProbesConfig { timeout_secs: 5 },
            workers: WorkersConfig {
                poll_interval_ms: 500,
                drain_timeout_secs: 30,
                scheduler_enabled: true,
                embedded: true,
            },
        }
    }
}

#[inline]
fn parse_bool(s: &str) -> Result<bool, ()> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Ok(true),
        "0" | "false" | "no" | "n" | "off" => Ok(false),
        _ => Err(()),
    }
}

macro_rules! apply_opt {
    ($target:expr, $source:expr) => {
        if let Some(v) = $source {
            $target = v;
        }
    };
    ($target:expr, $source:expr, wrap) => {
        if let Some(v) = $source {
            $target = Some(v);
        }
    };
}

/// Load concrete `Config` from optional file and environment variables.
/// Environment variables take precedence over file values and defaults.
pub fn load_config<P: AsRef<Path>>(path: Option<P>) -> Result<Config, ConfigError> {
    let mut cfg = Config::default();

    if let Some(p) = path {
        let raw = load_raw_from_file(p)?;
        merge_raw(&mut cfg, raw);
    }

    apply_env_overrides(&mut cfg)?;

    Ok(cfg)
}

fn merge_raw(cfg: &mut Config, raw: RawConfigFile) {
    if let Some(server) = raw.server {
        apply_opt!(cfg.server.host, server.host);
        apply_opt!(cfg.server.port, server.port);
    }
    if let Some(logging) = raw.logging {
        apply_opt!(cfg.logging.level, logging.level);
        apply_opt!(cfg.logging.json, logging.json);
    }
    if let Some(db) = raw.database {
        apply_opt!(cfg.database.url, db.url);
        apply_opt!(cfg.database.max_connections, db.max_connections);
    }
    if let Some(auth) = raw.auth {
        apply_opt!(cfg.auth.jwt_secret, auth.jwt_secret, wrap);
        apply_opt!(cfg.auth.operator_user_id, auth.operator_user_id, wrap);
    }
    if let Some(enc) = raw.encryption {
        apply_opt!(cfg.encryption.password, enc.password, wrap);
    }
    if let Some(n) = raw.notifications {
        apply_opt!(cfg.notifications.operator_email, n.operator_email);
        apply_opt!(cfg.notifications.from_address, n.from_address);
        apply_opt!(cfg.notifications.smtp_host, n.smtp_host, wrap);
        apply_opt!(cfg.notifications.smtp_port, n.smtp_port);
        apply_opt!(cfg.notifications.smtp_username, n.smtp_username, wrap);
        apply_opt!(cfg.notifications.smtp_password, n.smtp_password, wrap);
        apply_opt!(cfg.notifications.smtp_starttls, n.smtp_starttls);
    }
    if let Some(p) = raw.probes {
        apply_opt!(cfg.probes.timeout_secs, p.timeout_secs);
    }
    if let Some(w) = raw.workers {
        apply_opt!(cfg.workers.poll_interval_ms, w.poll_interval_ms);
        apply_opt!(cfg.workers.drain_timeout_secs, w.drain_timeout_secs);
        apply_opt!(cfg.workers.scheduler_enabled, w.scheduler_enabled);
        apply_opt!(cfg.workers.embedded, w.embedded);
    }
}

#[inline]
fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(v) => v
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Parse(format!("invalid {}: {}", key, e))),
        Err(_) => Ok(None),
    }
}

#[inline]
fn env_bool(key: &str) -> Result<Option<bool>, ConfigError> {
    match env::var(key) {
        Ok(v) => parse_bool(&v)
            .map(Some)
            .map_err(|_| ConfigError::Parse(format!("invalid {}", key))),
        Err(_) => Ok(None),
    }
}

#[inline]
fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn apply_env_overrides(cfg: &mut Config) -> Result<(), ConfigError> {
    // Server
    if let Some(v) = env_str("CNET_SERVER_HOST") {
        cfg.server.host = v;
    }
    if let Some(v) = env_parse::<u16>("CNET_SERVER_PORT")? {
        cfg.server.port = v;
    }

    // Logging
    if let Some(v) = env_str("CNET_LOG_LEVEL") {
        cfg.logging.level = v;
    }
    if let Some(v) = env_bool("CNET_LOG_JSON")? {
        cfg.logging.json = v;
    }

    // Database
    if let Some(v) = env_str("CNET_DATABASE_URL") {
        cfg.database.url = v;
    }
    if let Some(v) = env_parse::<u32>("CNET_DATABASE_MAX_CONNECTIONS")? {
        cfg.database.max_connections = v;
    }

    // Auth and secrets
    if let Some(v) = env_str("CNET_JWT_SECRET") {
        cfg.auth.jwt_secret = Some(v);
    }
    if let Some(v) = env_str("CNET_OPERATOR_USER_ID") {
        cfg.auth.operator_user_id = Some(v);
    }
    if let Some(v) = env_str("CNET_ENCRYPTION_PASSWORD") {
        cfg.encryption.password = Some(v);
    }

    // Notifications
    if let Some(v) = env_str("CNET_OPERATOR_EMAIL") {
        cfg.notifications.operator_email = v;
    }
    if let Some(v) = env_str("CNET_SMTP_FROM") {
        cfg.notifications.from_address = v;
    }
    if let Some(v) = env_str("CNET_SMTP_HOST") {
        cfg.notifications.smtp_host = Some(v);
    }
    if let Some(v) = env_parse::<u16>("CNET_SMTP_PORT")? {
        cfg.notifications.smtp_port = v;
    }
    if let Some(v) = env_str("CNET_SMTP_USERNAME") {
        cfg.notifications.smtp_username = Some(v);
    }
    if let Some(v) = env_str("CNET_SMTP_PASSWORD") {
        cfg.notifications.smtp_password = Some(v);
    }
    if let Some(v) = env_bool("CNET_SMTP_STARTTLS")? {
        cfg.notifications.smtp_starttls = v;
    }

    // Probes and workers
    if let Some(v) = env_parse::<u64>("CNET_PROBE_TIMEOUT_SECS")? {
        cfg.probes.timeout_secs = v;
    }
    if let Some(v) = env_parse::<u64>("CNET_WORKER_POLL_INTERVAL_MS")? {
        cfg.workers.poll_interval_ms = v;
    }
    if let Some(v) = env_parse::<u64>("CNET_WORKER_DRAIN_TIMEOUT_SECS")? {
        cfg.workers.drain_timeout_secs = v;
    }
    if let Some(v) = env_bool("CNET_SCHEDULER_ENABLED")? {
        cfg.workers.scheduler_enabled = v;
    }
    if let Some(v) = env_bool("CNET_WORKERS_EMBEDDED")? {
        cfg.workers.embedded = v;
    }

    Ok(())
}

/// Validate higher-level constraints on the resolved configuration.
pub fn validate_config(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.server.port == 0 {
        return Err(ConfigError::Validation("server.port must be > 0".into()));
    }
    let host_ok = cfg.server.host.parse::<std::net::IpAddr>().is_ok()
        || HOSTNAME_REGEX.is_match(&cfg.server.host);
    if !host_ok {
        return Err(ConfigError::Validation(format!(
            "invalid server.host: {}",
            cfg.server.host
        )));
    }

    match url::Url::parse(&cfg.database.url) {
        Ok(u) if u.scheme() == "sqlite" => {}
        Ok(u) => {
            return Err(ConfigError::Validation(format!(
                "unsupported database scheme: {}",
                u.scheme()
            )))
        }
        Err(e) => {
            return Err(ConfigError::Validation(format!(
                "invalid database.url: {}",
                e
            )))
        }
    }
    if cfg.database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be > 0".into(),
        ));
    }

    if !EMAIL_REGEX.is_match(&cfg.notifications.operator_email) {
        return Err(ConfigError::Validation(format!(
            "invalid notifications.operator_email: {}",
            cfg.notifications.operator_email
        )));
    }
    if let Some(host) = cfg.notifications.smtp_host.as_deref() {
        if !HOSTNAME_REGEX.is_match(host) && host.parse::<std::net::IpAddr>().is_err() {
            return Err(ConfigError::Validation(format!(
                "invalid notifications.smtp_host: {}",
                host
            )));
        }
        if cfg.notifications.smtp_port == 0 {
            return Err(ConfigError::Validation(
                "notifications.smtp_port must be > 0".into(),
            ));
        }
    }

    if cfg.probes.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "probes.timeout_secs must be > 0".into(),
        ));
    }
    if cfg.workers.poll_interval_ms == 0 {
        return Err(ConfigError::Validation(
            "workers.poll_interval_ms must be > 0".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn parse_toml() {
        let f = NamedTempFile::new().expect("tmpfile");
        std::fs::write(
            f.path(),
            r#"
[server]
host = "127.0.0.1"
port = 6000

[database]
url = "sqlite://data/cnet.sqlite"

[workers]
drain_timeout_secs = 10
embedded = false
"#,
        )
        .unwrap();
        let cfg = load_raw_from_file(f.path()).expect("load");
        let s = cfg.server.unwrap();
        assert_eq!(s.host.unwrap(), "127.0.0.1");
        assert_eq!(s.port.unwrap(), 6000);
        assert_eq!(
            cfg.database.unwrap().url.unwrap(),
            "sqlite://data/cnet.sqlite"
        );
        let w = cfg.workers.unwrap();
        assert_eq!(w.drain_timeout_secs, Some(10));
        assert_eq!(w.embedded, Some(false));
    }

    #[test]
    fn parse_yaml() {
        let f = NamedTempFile::new().expect("tmpfile");
        std::fs::write(
            f.path(),
            r#"
notifications:
  operator_email: ops@example.com
  smtp_host: mail.example.com
  smtp_port: 2525
probes:
  timeout_secs: 3
"#,
        )
        .unwrap();
        let cfg = load_raw_from_file(f.path()).expect("load");
        let n = cfg.notifications.unwrap();
        assert_eq!(n.operator_email.unwrap(), "ops@example.com");
        assert_eq!(n.smtp_port, Some(2525));
        assert_eq!(cfg.probes.unwrap().timeout_secs, Some(3));
    }

    #[test]
    fn file_values_merge_onto_defaults() {
        let f = tempfile::Builder::new()
            .suffix(".json")
            .tempfile()
            .expect("tmpfile");
        std::fs::write(
            f.path(),
            r#"{"encryption": {"password": "hunter2"}, "probes": {"timeout_secs": 7}}"#,
        )
        .unwrap();
        let cfg = load_config(Some(f.path())).expect("load");
        assert_eq!(cfg.encryption.password.as_deref(), Some("hunter2"));
        assert_eq!(cfg.probes.timeout_secs, 7);
        // untouched sections keep their defaults
        assert!(cfg.notifications.smtp_starttls);
    }

    #[test]
    fn env_overrides() {
        let keys = [
            "CNET_SERVER_HOST",
            "CNET_LOG_LEVEL",
            "CNET_LOG_JSON",
            "CNET_WORKER_DRAIN_TIMEOUT_SECS",
            "CNET_SCHEDULER_ENABLED",
            "CNET_WORKERS_EMBEDDED",
        ];
        for k in &keys {
            std::env::remove_var(k);
        }

        std::env::set_var("CNET_SERVER_HOST", "10.1.2.3");
        std::env::set_var("CNET_LOG_LEVEL", "debug");
        std::env::set_var("CNET_LOG_JSON", "true");
        std::env::set_var("CNET_WORKER_DRAIN_TIMEOUT_SECS", "12");
        std::env::set_var("CNET_SCHEDULER_ENABLED", "no");
        std::env::set_var("CNET_WORKERS_EMBEDDED", "false");

        let cfg = load_config::<&Path>(None).expect("load config");
        assert_eq!(cfg.server.host, "10.1.2.3");
        assert_eq!(cfg.logging.level, "debug");
        assert!(cfg.logging.json);
        assert_eq!(cfg.workers.drain_timeout_secs, 12);
        assert!(!cfg.workers.scheduler_enabled);
        assert!(!cfg.workers.embedded);

        for k in &keys {
            std::env::remove_var(k);
        }
    }

    #[test]
    fn bool_parsing() {
        assert_eq!(parse_bool("Yes"), Ok(true));
        assert_eq!(parse_bool("off"), Ok(false));
        assert!(parse_bool("maybe").is_err());
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut cfg = Config::default();
        assert!(validate_config(&cfg).is_ok());

        cfg.database.url = "postgres://db/cnet".into();
        assert!(matches!(
            validate_config(&cfg),
            Err(ConfigError::Validation(_))
        ));

        let mut cfg = Config::default();
        cfg.notifications.operator_email = "not-an-address".into();
        assert!(validate_config(&cfg).is_err());

        let mut cfg = Config::default();
        cfg.probes.timeout_secs = 0;
        assert!(validate_config(&cfg).is_err());
    }
}
