use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::range::SlotRange;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

/// Parse a profiled env var, falling back to `default` only when it is unset.
/// A value that is present but malformed is an error, never a silent default.
fn profiled_env_parse<T>(profile: &str, key: &'static str, default: T) -> Result<T, ConfigurationError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match profiled_env_opt(profile, key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigurationError::invalid(key, format!("{raw:?}: {e}"))),
        None => Ok(default),
    }
}

fn profiled_env_bool(profile: &str, key: &'static str) -> Result<bool, ConfigurationError> {
    let Some(raw) = profiled_env_opt(profile, key) else {
        return Ok(false);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigurationError::invalid(key, format!("{raw:?}: expected true or false"))),
    }
}

fn require(value: &str, field: &'static str) -> Result<(), ConfigurationError> {
    if value.trim().is_empty() {
        Err(ConfigurationError::Missing(field))
    } else {
        Ok(())
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub source: SourceConfig,
    pub discovery: DiscoveryConfig,
    pub worker: WorkerConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `SLOTFEED_PROFILE` env var. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        let profile = env_or("SLOTFEED_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    ///
    /// Values that are set but unparseable fail here, before any connection.
    pub fn for_profile(profile: &str) -> Result<Self, ConfigurationError> {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Ok(Self {
            profile: p.to_string(),
            source: SourceConfig::from_env_profiled(p)?,
            discovery: DiscoveryConfig::from_env_profiled(p)?,
            worker: WorkerConfig::from_env_profiled(p),
        })
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.source.validate()?;
        self.discovery.validate()
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  source:      transport={}, endpoint={}, directory={}",
            self.source.transport,
            self.source.endpoint(),
            self.source.directory
        );
        tracing::info!(
            "  tls:         keystore={}, truststore={}, active_mode={}",
            self.source.keystore.is_some(),
            self.source.truststore.is_some(),
            self.source.active_mode
        );
        tracing::info!(
            "  discovery:   max_retries={}, tick_interval={:?}, remember={:?}",
            self.discovery.max_retries,
            self.discovery.tick_interval(),
            self.discovery.remember_duration()
        );
        tracing::info!(
            "  worker:      checkpoint={}, output_dir={}",
            self.worker.checkpoint_path.display(),
            self.worker.output_dir.display()
        );
    }

    /// Return a redacted view safe for status output (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "source": {
                "transport": self.source.transport.to_string(),
                "host": self.source.host,
                "port": self.source.port,
                "directory": self.source.directory,
                "authenticated": self.source.credentials.is_some(),
                "mutual_tls": self.source.keystore.is_some(),
            },
            "discovery": {
                "max_retries": self.discovery.max_retries,
                "tick_interval_ms": self.discovery.tick_interval_ms,
                "remember_multiplier": self.discovery.remember_multiplier,
            },
        })
    }
}

// ── Source ────────────────────────────────────────────────────

/// Which transport backs the source connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Ftp,
    Ftps,
    S3,
    Local,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportKind::Ftp => "ftp",
            TransportKind::Ftps => "ftps",
            TransportKind::S3 => "s3",
            TransportKind::Local => "local",
        };
        f.write_str(name)
    }
}

impl FromStr for TransportKind {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ftp" => Ok(TransportKind::Ftp),
            "ftps" => Ok(TransportKind::Ftps),
            "s3" => Ok(TransportKind::S3),
            "local" | "file" => Ok(TransportKind::Local),
            other => Err(ConfigurationError::Unsupported {
                kind: "transport",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Location of key or trust material: `{url, type, password?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreDescriptor {
    /// Filesystem path or `file://` URL.
    pub url: String,
    /// Encoding of the material, e.g. `PKCS12`, `PEM`, `DER`.
    pub store_type: String,
    pub password: Option<String>,
}

impl StoreDescriptor {
    fn from_env_profiled(p: &str, prefix: &str) -> Option<Self> {
        let url = profiled_env_opt(p, &format!("{prefix}_URL"))?;
        Some(Self {
            url,
            store_type: profiled_env_or(p, &format!("{prefix}_TYPE"), "PKCS12"),
            password: profiled_env_opt(p, &format!("{prefix}_PASSWORD")),
        })
    }

    fn validate(&self, url_field: &'static str, type_field: &'static str) -> Result<(), ConfigurationError> {
        require(&self.url, url_field)?;
        require(&self.store_type, type_field)
    }
}

/// Connection parameters handed to the connector factory.
///
/// For object-storage transports `host` names the bucket (s3) or root
/// directory (local), and `directory` is the key prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub transport: TransportKind,
    pub host: String,
    pub port: u16,
    pub directory: String,
    pub credentials: Option<Credentials>,
    pub keystore: Option<StoreDescriptor>,
    pub truststore: Option<StoreDescriptor>,
    pub default_timeout_ms: u64,
    pub data_timeout_ms: u64,
    /// Active FTP transfer mode; passive when false.
    pub active_mode: bool,
    pub aws: AwsConfig,
}

impl SourceConfig {
    fn from_env_profiled(p: &str) -> Result<Self, ConfigurationError> {
        let transport = profiled_env_or(p, "SOURCE_TRANSPORT", "ftp").parse()?;
        let credentials = profiled_env_opt(p, "SOURCE_USERNAME").map(|username| Credentials {
            username,
            password: profiled_env_or(p, "SOURCE_PASSWORD", ""),
        });
        Ok(Self {
            transport,
            host: profiled_env_or(p, "SOURCE_HOST", ""),
            port: profiled_env_parse(p, "SOURCE_PORT", 21)?,
            directory: profiled_env_or(p, "SOURCE_DIRECTORY", ""),
            credentials,
            keystore: StoreDescriptor::from_env_profiled(p, "SOURCE_KEYSTORE"),
            truststore: StoreDescriptor::from_env_profiled(p, "SOURCE_TRUSTSTORE"),
            default_timeout_ms: profiled_env_parse(p, "SOURCE_DEFAULT_TIMEOUT_MS", 30_000)?,
            data_timeout_ms: profiled_env_parse(p, "SOURCE_DATA_TIMEOUT_MS", 60_000)?,
            active_mode: profiled_env_bool(p, "SOURCE_ACTIVE_MODE")?,
            aws: AwsConfig::from_env_profiled(p),
        })
    }

    /// A config for `transport` with defaults for everything but endpoint and directory.
    pub fn new(transport: TransportKind, host: impl Into<String>, directory: impl Into<String>) -> Self {
        Self {
            transport,
            host: host.into(),
            port: 21,
            directory: directory.into(),
            credentials: None,
            keystore: None,
            truststore: None,
            default_timeout_ms: 30_000,
            data_timeout_ms: 60_000,
            active_mode: false,
            aws: AwsConfig::default(),
        }
    }

    /// Construction-time checks; must pass before any connection is attempted.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        require(&self.host, "host")?;
        require(&self.directory, "directory")?;
        if self.port == 0 {
            return Err(ConfigurationError::invalid("port", "must be positive"));
        }
        if self.default_timeout_ms == 0 {
            return Err(ConfigurationError::invalid("default_timeout_ms", "must be positive"));
        }
        if self.data_timeout_ms == 0 {
            return Err(ConfigurationError::invalid("data_timeout_ms", "must be positive"));
        }
        if let Some(creds) = &self.credentials {
            require(&creds.username, "credentials.username")?;
        }
        if let Some(keystore) = &self.keystore {
            keystore.validate("keystore.url", "keystore.type")?;
        }
        if let Some(truststore) = &self.truststore {
            truststore.validate("truststore.url", "truststore.type")?;
        }
        if self.transport == TransportKind::Ftp
            && (self.keystore.is_some() || self.truststore.is_some())
        {
            return Err(ConfigurationError::invalid(
                "transport",
                "key/trust material requires the ftps transport",
            ));
        }
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn data_timeout(&self) -> Duration {
        Duration::from_millis(self.data_timeout_ms)
    }

    /// Where the source lives, for logs: `host:port` for FTP transports,
    /// the bucket or root directory otherwise.
    pub fn endpoint(&self) -> String {
        match self.transport {
            TransportKind::Ftp | TransportKind::Ftps => format!("{}:{}", self.host, self.port),
            TransportKind::S3 => format!("s3://{}", self.host),
            TransportKind::Local => self.host.clone(),
        }
    }
}

// ── AWS / S3 ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwsConfig {
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub endpoint_url: Option<String>,
}

impl AwsConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            region: profiled_env_or(p, "AWS_REGION", "ap-southeast-1"),
            access_key_id: profiled_env_opt(p, "AWS_ACCESS_KEY_ID"),
            secret_access_key: profiled_env_opt(p, "AWS_SECRET_ACCESS_KEY"),
            session_token: profiled_env_opt(p, "AWS_SESSION_TOKEN"),
            endpoint_url: profiled_env_opt(p, "AWS_ENDPOINT_URL"),
        }
    }
}

// ── Discovery ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Attempts per listing before the tick fails.
    pub max_retries: u32,
    pub tick_interval_ms: u64,
    /// Remember window as a multiple of the tick interval.
    pub remember_multiplier: u32,
    pub from_date: Option<DateTime<Utc>>,
    pub excluded: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            tick_interval_ms: 60_000,
            remember_multiplier: 100,
            from_date: None,
            excluded: Vec::new(),
        }
    }
}

impl DiscoveryConfig {
    fn from_env_profiled(p: &str) -> Result<Self, ConfigurationError> {
        let from_date = profiled_env_opt(p, "DISCOVERY_FROM_DATE")
            .map(|raw| {
                DateTime::parse_from_rfc3339(raw.trim())
                    .map(|ts| ts.with_timezone(&Utc))
                    .map_err(|e| ConfigurationError::invalid("DISCOVERY_FROM_DATE", format!("{raw:?}: {e}")))
            })
            .transpose()?;
        let excluded = profiled_env_opt(p, "DISCOVERY_EXCLUDED")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self {
            max_retries: profiled_env_parse(p, "DISCOVERY_MAX_RETRIES", 3)?,
            tick_interval_ms: profiled_env_parse(p, "DISCOVERY_TICK_INTERVAL_MS", 60_000)?,
            remember_multiplier: profiled_env_parse(p, "DISCOVERY_REMEMBER_MULTIPLIER", 100)?,
            from_date,
            excluded,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_retries == 0 {
            return Err(ConfigurationError::invalid("max_retries", "must be at least 1"));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigurationError::invalid("tick_interval_ms", "must be positive"));
        }
        if self.remember_multiplier == 0 {
            return Err(ConfigurationError::invalid("remember_multiplier", "must be at least 1"));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn remember_duration(&self) -> Duration {
        self.tick_interval().saturating_mul(self.remember_multiplier)
    }

    pub fn range(&self) -> SlotRange {
        SlotRange::from_bounds(self.from_date, self.excluded.clone())
    }
}

// ── Worker ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub checkpoint_path: PathBuf,
    pub output_dir: PathBuf,
}

impl WorkerConfig {
    fn from_env_profiled(p: &str) -> Self {
        let data_dir = PathBuf::from(profiled_env_or(p, "DATA_DIR", "data"));
        let checkpoint_path = profiled_env_opt(p, "CHECKPOINT_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("discovery.ckpt"));
        let output_dir = profiled_env_opt(p, "OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("inbox"));
        Self {
            checkpoint_path,
            output_dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ftp_source() -> SourceConfig {
        let mut source = SourceConfig::new(TransportKind::Ftp, "ftp.example.com", "/outgoing");
        source.credentials = Some(Credentials {
            username: "reader".into(),
            password: "secret".into(),
        });
        source
    }

    fn store(url: &str, store_type: &str) -> StoreDescriptor {
        StoreDescriptor {
            url: url.into(),
            store_type: store_type.into(),
            password: None,
        }
    }

    #[test]
    fn valid_source_passes() {
        assert!(ftp_source().validate().is_ok());
    }

    #[test]
    fn empty_host_and_directory_rejected() {
        let mut source = ftp_source();
        source.host = "  ".into();
        assert_eq!(source.validate(), Err(ConfigurationError::Missing("host")));

        let mut source = ftp_source();
        source.directory.clear();
        assert_eq!(source.validate(), Err(ConfigurationError::Missing("directory")));
    }

    #[test]
    fn zero_port_and_timeouts_rejected() {
        let mut source = ftp_source();
        source.port = 0;
        assert!(matches!(source.validate(), Err(ConfigurationError::Invalid { field: "port", .. })));

        let mut source = ftp_source();
        source.default_timeout_ms = 0;
        assert!(source.validate().is_err());

        let mut source = ftp_source();
        source.data_timeout_ms = 0;
        assert!(source.validate().is_err());
    }

    #[test]
    fn descriptor_sub_fields_required() {
        let mut source = ftp_source();
        source.credentials = Some(Credentials {
            username: String::new(),
            password: "x".into(),
        });
        assert_eq!(
            source.validate(),
            Err(ConfigurationError::Missing("credentials.username"))
        );

        let mut source = ftp_source();
        source.transport = TransportKind::Ftps;
        source.keystore = Some(store("", "PKCS12"));
        assert_eq!(source.validate(), Err(ConfigurationError::Missing("keystore.url")));

        source.keystore = None;
        source.truststore = Some(store("/etc/ca.pem", ""));
        assert_eq!(source.validate(), Err(ConfigurationError::Missing("truststore.type")));
    }

    #[test]
    fn tls_material_requires_ftps() {
        let mut source = ftp_source();
        source.truststore = Some(store("/etc/ca.pem", "PEM"));
        assert!(source.validate().is_err());
        source.transport = TransportKind::Ftps;
        assert!(source.validate().is_ok());
    }

    #[test]
    fn endpoint_depends_on_transport() {
        assert_eq!(ftp_source().endpoint(), "ftp.example.com:21");
        let bucket = SourceConfig::new(TransportKind::S3, "drops", "incoming");
        assert_eq!(bucket.endpoint(), "s3://drops");
    }

    #[test]
    fn transport_kind_parses() {
        assert_eq!("FTPS".parse::<TransportKind>(), Ok(TransportKind::Ftps));
        assert_eq!("file".parse::<TransportKind>(), Ok(TransportKind::Local));
        assert!("sftp".parse::<TransportKind>().is_err());
    }

    #[test]
    fn remember_duration_is_multiple_of_tick() {
        let discovery = DiscoveryConfig {
            tick_interval_ms: 1_000,
            ..DiscoveryConfig::default()
        };
        assert_eq!(discovery.remember_duration(), Duration::from_secs(100));
    }

    #[test]
    fn discovery_validation() {
        assert!(DiscoveryConfig::default().validate().is_ok());
        let discovery = DiscoveryConfig {
            max_retries: 0,
            ..DiscoveryConfig::default()
        };
        assert!(discovery.validate().is_err());
    }

    #[test]
    fn redacted_summary_hides_secrets() {
        let config = Config {
            profile: String::new(),
            source: ftp_source(),
            discovery: DiscoveryConfig::default(),
            worker: WorkerConfig {
                checkpoint_path: "data/discovery.ckpt".into(),
                output_dir: "data/inbox".into(),
            },
        };
        let summary = config.redacted_summary().to_string();
        assert!(summary.contains("ftp.example.com"));
        assert!(!summary.contains("secret"));
        assert_eq!(config.profile_label(), "default");
    }

    // Each test uses its own profile prefix so parallel tests never share keys.
    fn with_env<T>(vars: &[(&str, &str)], body: impl FnOnce() -> T) -> T {
        for (k, v) in vars {
            std::env::set_var(k, v);
        }
        let out = body();
        for (k, _) in vars {
            std::env::remove_var(k);
        }
        out
    }

    #[test]
    fn unknown_transport_is_rejected() {
        let err = with_env(&[("CFGTRANSPORT_SOURCE_TRANSPORT", "sftp")], || {
            Config::for_profile("cfgtransport").unwrap_err()
        });
        assert_eq!(
            err,
            ConfigurationError::Unsupported {
                kind: "transport",
                value: "sftp".into()
            }
        );
    }

    #[test]
    fn out_of_range_port_is_rejected() {
        let err = with_env(&[("CFGPORT_SOURCE_PORT", "70000")], || {
            Config::for_profile("cfgport").unwrap_err()
        });
        assert!(matches!(err, ConfigurationError::Invalid { field: "SOURCE_PORT", .. }));
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = with_env(&[("CFGNUM_SOURCE_DATA_TIMEOUT_MS", "1m")], || {
            Config::for_profile("cfgnum").unwrap_err()
        });
        assert!(matches!(err, ConfigurationError::Invalid { field: "SOURCE_DATA_TIMEOUT_MS", .. }));

        let err = with_env(&[("CFGRETRY_DISCOVERY_MAX_RETRIES", "-1")], || {
            Config::for_profile("cfgretry").unwrap_err()
        });
        assert!(matches!(err, ConfigurationError::Invalid { field: "DISCOVERY_MAX_RETRIES", .. }));

        let err = with_env(&[("CFGBOOL_SOURCE_ACTIVE_MODE", "maybe")], || {
            Config::for_profile("cfgbool").unwrap_err()
        });
        assert!(matches!(err, ConfigurationError::Invalid { field: "SOURCE_ACTIVE_MODE", .. }));
    }

    #[test]
    fn malformed_from_date_is_rejected() {
        let err = with_env(&[("CFGDATE_DISCOVERY_FROM_DATE", "2024-13-45")], || {
            Config::for_profile("cfgdate").unwrap_err()
        });
        assert!(matches!(err, ConfigurationError::Invalid { field: "DISCOVERY_FROM_DATE", .. }));
    }

    #[test]
    fn well_formed_profile_values_are_read() {
        let config = with_env(
            &[
                ("CFGGOOD_SOURCE_TRANSPORT", "ftps"),
                ("CFGGOOD_SOURCE_PORT", "990"),
                ("CFGGOOD_SOURCE_ACTIVE_MODE", "yes"),
                ("CFGGOOD_DISCOVERY_FROM_DATE", "2024-03-01T00:00:00Z"),
                ("CFGGOOD_DISCOVERY_EXCLUDED", "a.csv, b.csv"),
            ],
            || Config::for_profile("cfggood").unwrap(),
        );
        assert_eq!(config.profile, "CFGGOOD");
        assert_eq!(config.source.transport, TransportKind::Ftps);
        assert_eq!(config.source.port, 990);
        assert!(config.source.active_mode);
        assert_eq!(config.discovery.excluded, vec!["a.csv", "b.csv"]);
        assert!(matches!(config.discovery.range(), SlotRange::DateAndExclusion { since: Some(_), .. }));
    }
}
