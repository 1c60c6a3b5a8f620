//! Server configuration.
//!
//! Loaded once at startup from `DM_*` environment variables (plus `PORT`,
//! `DATABASE_URL` and `PSQL_*`). Anything unparseable is a startup error
//! rather than a silent fallback, so a typo in a deployment manifest cannot
//! quietly change behaviour.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use dm_core::device::Profile;
use dm_core::gateway::BinariesMode;

/// Presigned URLs must outlive the redirect and S3 caps them at seven days.
const PRESIGN_TTL_RANGE: std::ops::RangeInclusive<u64> = 1..=604_800;

/// Errors raised while reading the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable is set to a value that cannot be parsed.
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    /// A combination of settings cannot work.
    #[error("{0}")]
    Inconsistent(String),
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            other => Err(format!("unknown log format '{other}' (expected json or pretty)")),
        }
    }
}

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to.
    pub bind_addr: SocketAddr,
    /// Log filter used when `RUST_LOG` is unset.
    pub log_level: String,
    pub log_format: LogFormat,
    /// CORS origins; `*` allows any.
    pub allow_origins: Vec<String>,
    /// Upper bound for enrollment bodies.
    pub max_body_bytes: usize,
    /// Take the audit source address from `X-Forwarded-For`.
    pub trust_forwarded_for: bool,

    /// Template directory.
    pub config_dir: PathBuf,
    pub default_profile: Profile,
    /// Injected as `enabled` into every object config.
    pub config_enabled: bool,

    /// Local enrollment sink root.
    pub enroll_dir: PathBuf,
    pub store_enroll_locally: bool,
    pub store_enroll_s3: bool,
    pub local_prefix_enroll: String,
    pub s3_prefix_enroll: String,

    pub binaries_mode: BinariesMode,
    pub binaries_dir: PathBuf,
    pub s3_prefix_binaries: String,
    pub presign_ttl: Duration,

    pub s3_bucket: Option<String>,
    pub s3_endpoint_url: Option<String>,
    pub aws_region: String,
    pub s3_access_key_id: Option<String>,
    pub s3_secret_access_key: Option<String>,
    /// Upper bound for a single storage call.
    pub storage_timeout: Duration,

    /// PostgreSQL URL. `None` keeps provisioning state in memory.
    pub database_url: Option<String>,
    /// JSON-lines audit file.
    pub audit_file: Option<PathBuf>,
    /// Enables the admin routes.
    pub admin_token: Option<String>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field("log_format", &self.log_format)
            .field("allow_origins", &self.allow_origins)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("trust_forwarded_for", &self.trust_forwarded_for)
            .field("config_dir", &self.config_dir)
            .field("default_profile", &self.default_profile)
            .field("config_enabled", &self.config_enabled)
            .field("enroll_dir", &self.enroll_dir)
            .field("store_enroll_locally", &self.store_enroll_locally)
            .field("store_enroll_s3", &self.store_enroll_s3)
            .field("binaries_mode", &self.binaries_mode)
            .field("s3_bucket", &self.s3_bucket)
            .field("s3_endpoint_url", &self.s3_endpoint_url)
            .field("aws_region", &self.aws_region)
            .field("s3_access_key_id", &redact(&self.s3_access_key_id))
            .field("database_url", &redact(&self.database_url))
            .field("audit_file", &self.audit_file)
            .field("admin_token", &redact(&self.admin_token))
            .finish_non_exhaustive()
    }
}

impl ServerConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// See [`ServerConfig::from_lookup`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`. Empty values count as unset.
    ///
    /// Variables (defaults in parentheses):
    /// - `DM_BIND_ADDR` (`127.0.0.1:8000`), or `PORT` to bind `0.0.0.0:$PORT`
    /// - `DM_LOG_LEVEL` (`info`), `DM_LOG_FORMAT` (`json`)
    /// - `DM_ALLOW_ORIGINS` (`*`), `DM_MAX_BODY_SIZE_MB` (`10`),
    ///   `DM_TRUST_FORWARDED_FOR` (`true`)
    /// - `DM_CONFIG_DIR` (`./config`), `DM_CONFIG_PROFILE` (`prod`),
    ///   `DM_CONFIG_ENABLED` (`true`)
    /// - `DM_ENROLL_DIR` (`/data/enroll`), `DM_STORE_ENROLL_LOCALLY` (`true`),
    ///   `DM_STORE_ENROLL_S3` (`false`), `DM_LOCAL_PREFIX_ENROLL` (empty),
    ///   `DM_S3_PREFIX_ENROLL` (`enroll/`)
    /// - `DM_BINARIES_MODE` (`presign`), `DM_BINARIES_DIR` (`/data/binaries`),
    ///   `DM_S3_PREFIX_BINARIES` (`binaries/`), `DM_PRESIGN_TTL_SECONDS` (`300`)
    /// - `DM_S3_BUCKET`, `DM_S3_ENDPOINT_URL`, `DM_AWS_REGION` (`us-east-1`),
    ///   `DM_S3_ACCESS_KEY_ID`, `DM_S3_SECRET_ACCESS_KEY`,
    ///   `DM_STORAGE_TIMEOUT_SECS` (`30`)
    /// - `DATABASE_URL`, or `PSQL_HOST`/`PSQL_PORT` (`5432`)/`PSQL_DATABASE`/
    ///   `PSQL_USER`/`PSQL_PASSWORD`
    /// - `DM_AUDIT_FILE`, `DM_ADMIN_TOKEN`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for unparseable values and
    /// [`ConfigError::Inconsistent`] when S3 is needed but no bucket is set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let bind_addr = if let Some(addr) = get("DM_BIND_ADDR") {
            parse_as("DM_BIND_ADDR", &addr)?
        } else if let Some(port) = get("PORT") {
            SocketAddr::from(([0, 0, 0, 0], parse_as::<u16>("PORT", &port)?))
        } else {
            SocketAddr::from(([127, 0, 0, 1], 8000))
        };

        let log_level = get("DM_LOG_LEVEL").unwrap_or_else(|| "info".to_owned());
        let log_format = get("DM_LOG_FORMAT")
            .map(|v| parse_with("DM_LOG_FORMAT", &v))
            .transpose()?
            .unwrap_or(LogFormat::Json);

        let allow_origins: Vec<String> = get("DM_ALLOW_ORIGINS")
            .unwrap_or_else(|| "*".to_owned())
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(str::to_owned)
            .collect();

        let max_body_mb: usize = get("DM_MAX_BODY_SIZE_MB")
            .map(|v| parse_as("DM_MAX_BODY_SIZE_MB", &v))
            .transpose()?
            .unwrap_or(10);
        if max_body_mb == 0 {
            return Err(ConfigError::Invalid {
                name: "DM_MAX_BODY_SIZE_MB",
                reason: "must be at least 1".to_owned(),
            });
        }

        let default_profile = match get("DM_CONFIG_PROFILE") {
            Some(raw) => Profile::parse(&raw).ok_or_else(|| ConfigError::Invalid {
                name: "DM_CONFIG_PROFILE",
                reason: format!("unknown profile '{raw}' (expected prod, dev or int)"),
            })?,
            None => Profile::Prod,
        };

        let binaries_mode = get("DM_BINARIES_MODE")
            .map(|v| parse_with("DM_BINARIES_MODE", &v))
            .transpose()?
            .unwrap_or(BinariesMode::Presign);

        let presign_secs: u64 = get("DM_PRESIGN_TTL_SECONDS")
            .map(|v| parse_as("DM_PRESIGN_TTL_SECONDS", &v))
            .transpose()?
            .unwrap_or(300);
        if !PRESIGN_TTL_RANGE.contains(&presign_secs) {
            return Err(ConfigError::Invalid {
                name: "DM_PRESIGN_TTL_SECONDS",
                reason: format!(
                    "{presign_secs} is outside {}..={} seconds",
                    PRESIGN_TTL_RANGE.start(),
                    PRESIGN_TTL_RANGE.end()
                ),
            });
        }
        let timeout_secs: u64 = get("DM_STORAGE_TIMEOUT_SECS")
            .map(|v| parse_as("DM_STORAGE_TIMEOUT_SECS", &v))
            .transpose()?
            .unwrap_or(30);

        let config = Self {
            bind_addr,
            log_level,
            log_format,
            allow_origins,
            max_body_bytes: max_body_mb.saturating_mul(1024 * 1024),
            trust_forwarded_for: get_bool(&get, "DM_TRUST_FORWARDED_FOR", true)?,
            config_dir: get("DM_CONFIG_DIR").map_or_else(|| PathBuf::from("./config"), PathBuf::from),
            default_profile,
            config_enabled: get_bool(&get, "DM_CONFIG_ENABLED", true)?,
            enroll_dir: get("DM_ENROLL_DIR").map_or_else(|| PathBuf::from("/data/enroll"), PathBuf::from),
            store_enroll_locally: get_bool(&get, "DM_STORE_ENROLL_LOCALLY", true)?,
            store_enroll_s3: get_bool(&get, "DM_STORE_ENROLL_S3", false)?,
            local_prefix_enroll: get("DM_LOCAL_PREFIX_ENROLL").unwrap_or_default(),
            s3_prefix_enroll: get("DM_S3_PREFIX_ENROLL").unwrap_or_else(|| "enroll/".to_owned()),
            binaries_mode,
            binaries_dir: get("DM_BINARIES_DIR")
                .map_or_else(|| PathBuf::from("/data/binaries"), PathBuf::from),
            s3_prefix_binaries: get("DM_S3_PREFIX_BINARIES")
                .unwrap_or_else(|| "binaries/".to_owned()),
            presign_ttl: Duration::from_secs(presign_secs),
            s3_bucket: get("DM_S3_BUCKET"),
            s3_endpoint_url: get("DM_S3_ENDPOINT_URL"),
            aws_region: get("DM_AWS_REGION").unwrap_or_else(|| "us-east-1".to_owned()),
            s3_access_key_id: get("DM_S3_ACCESS_KEY_ID"),
            s3_secret_access_key: get("DM_S3_SECRET_ACCESS_KEY"),
            storage_timeout: Duration::from_secs(timeout_secs),
            database_url: database_url(&get)?,
            audit_file: get("DM_AUDIT_FILE").map(PathBuf::from),
            admin_token: get("DM_ADMIN_TOKEN"),
        };

        if config.uses_s3() && config.s3_bucket.is_none() {
            return Err(ConfigError::Inconsistent(format!(
                "DM_S3_BUCKET is required (DM_STORE_ENROLL_S3={}, DM_BINARIES_MODE={})",
                config.store_enroll_s3, config.binaries_mode
            )));
        }

        Ok(config)
    }

    /// Whether any feature needs the S3 client.
    #[must_use]
    pub fn uses_s3(&self) -> bool {
        self.store_enroll_s3 || self.binaries_mode.uses_object_store()
    }
}

fn parse_as<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        reason: format!("'{raw}': {e}"),
    })
}

fn parse_with<T: FromStr<Err = String>>(name: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|reason| ConfigError::Invalid { name, reason })
}

fn get_bool<G>(get: &G, name: &'static str, default: bool) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let Some(raw) = get(name) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            reason: format!("'{raw}' is not a boolean"),
        }),
    }
}

/// `DATABASE_URL`, else a URL assembled from `PSQL_*` when host, database
/// and user are all set.
fn database_url<G>(get: &G) -> Result<Option<String>, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    if let Some(url) = get("DATABASE_URL") {
        return Ok(Some(url));
    }
    let (Some(host), Some(database), Some(user)) =
        (get("PSQL_HOST"), get("PSQL_DATABASE"), get("PSQL_USER"))
    else {
        return Ok(None);
    };
    let port: u16 = get("PSQL_PORT")
        .map(|v| parse_as("PSQL_PORT", &v))
        .transpose()?
        .unwrap_or(5432);
    let credentials = match get("PSQL_PASSWORD") {
        Some(password) => format!(
            "{}:{}",
            urlencoding::encode(&user),
            urlencoding::encode(&password)
        ),
        None => urlencoding::encode(&user).into_owned(),
    };
    Ok(Some(format!(
        "postgres://{credentials}@{host}:{port}/{}",
        urlencoding::encode(&database)
    )))
}
