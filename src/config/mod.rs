//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    fmt,
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::infra::storage::{
    DEFAULT_IMAGES_DIR, DEFAULT_KEY_PREFIX, DEFAULT_PUBLIC_PATH, DEFAULT_REGION,
};

pub use cli::{
    CliArgs, Command, RenderArgs, RenderOverrides, ServeArgs, ServeOverrides, StorageOverrides,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "chartd";
const ENV_PREFIX: &str = "CHARTD";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 7001;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_RENDER_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_RENDER_CONCURRENCY: u64 = 5;
const DEFAULT_ENGINE_COMMAND: &str = "gpt-vis-ssr";
const DEFAULT_CACHE_TTL_MS: u64 = 60 * 60 * 1000;
const DEFAULT_CACHE_MAX_ENTRIES: u64 = 1000;
const DEFAULT_CACHE_SWEEP_INTERVAL_MS: u64 = 60_000;
const DEFAULT_UPLOAD_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 15 * 60;
const DEFAULT_RATE_LIMIT_MAX_REQUESTS: u64 = 100;
const DEFAULT_MAX_BODY_BYTES: u64 = 10 * 1024 * 1024;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub render: RenderSettings,
    pub cache: CacheSettings,
    pub storage: StorageSettings,
    pub security: SecuritySettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
    /// Include error source chains in error responses.
    pub debug_errors: bool,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub timeout: Duration,
    pub concurrency: NonZeroUsize,
    pub max_queue: Option<usize>,
    pub engine_command: PathBuf,
    pub engine_args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub ttl: Duration,
    pub max_entries: NonZeroUsize,
    pub sweep_interval: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub images_dir: PathBuf,
    pub public_path: String,
    pub key_prefix: String,
    pub upload_timeout: Duration,
    /// Present only when access key, secret and bucket are all configured.
    pub s3: Option<S3Settings>,
}

#[derive(Clone)]
pub struct S3Settings {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    pub bucket: String,
    pub custom_domain: Option<String>,
    pub endpoint: Option<String>,
    pub force_path_style: bool,
}

impl fmt::Debug for S3Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Settings")
            .field("access_key_id", &"<redacted>")
            .field("secret_access_key", &"<redacted>")
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("custom_domain", &self.custom_domain)
            .field("endpoint", &self.endpoint)
            .field("force_path_style", &self.force_path_style)
            .finish()
    }
}

#[derive(Clone)]
pub struct SecuritySettings {
    pub api_key: Option<String>,
    pub allowed_origins: Vec<String>,
    pub rate_limit_window_seconds: NonZeroU32,
    pub rate_limit_max_requests: NonZeroU32,
    pub max_body_bytes: NonZeroUsize,
}

impl fmt::Debug for SecuritySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecuritySettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("allowed_origins", &self.allowed_origins)
            .field("rate_limit_window_seconds", &self.rate_limit_window_seconds)
            .field("rate_limit_max_requests", &self.rate_limit_max_requests)
            .field("max_body_bytes", &self.max_body_bytes)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("failed to read command-line overrides: {0}")]
    Cli(#[from] clap::Error),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.resolved_command()? {
        Command::Serve(args) => raw.apply_serve_overrides(&args.overrides),
        Command::Render(args) => {
            raw.apply_render_overrides(&args.render);
            raw.apply_storage_overrides(&args.storage);
        }
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    render: RawRenderSettings,
    cache: RawCacheSettings,
    storage: RawStorageSettings,
    security: RawSecuritySettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(debug) = overrides.server_debug_errors {
            self.server.debug_errors = Some(debug);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(ttl) = overrides.cache_ttl_ms {
            self.cache.ttl_ms = Some(ttl);
        }
        if let Some(max) = overrides.cache_max_entries {
            self.cache.max_entries = Some(max);
        }
        if let Some(key) = overrides.api_key.as_ref() {
            self.security.api_key = Some(key.clone());
        }
        if let Some(origins) = overrides.allowed_origins.as_ref() {
            self.security.allowed_origins = Some(origins.clone());
        }
        if let Some(window) = overrides.rate_limit_window_seconds {
            self.security.rate_limit_window_seconds = Some(window);
        }
        if let Some(max) = overrides.rate_limit_max_requests {
            self.security.rate_limit_max_requests = Some(max);
        }
        if let Some(limit) = overrides.max_body_bytes {
            self.security.max_body_bytes = Some(limit);
        }

        self.apply_render_overrides(&overrides.render);
        self.apply_storage_overrides(&overrides.storage);
    }

    fn apply_render_overrides(&mut self, overrides: &RenderOverrides) {
        if let Some(timeout) = overrides.render_timeout_ms {
            self.render.timeout_ms = Some(timeout);
        }
        if let Some(concurrency) = overrides.render_concurrency {
            self.render.concurrency = Some(concurrency);
        }
        if let Some(max_queue) = overrides.render_max_queue {
            self.render.max_queue = Some(max_queue);
        }
        if let Some(command) = overrides.engine_command.as_ref() {
            self.render.engine_command = Some(command.clone());
        }
    }

    fn apply_storage_overrides(&mut self, overrides: &StorageOverrides) {
        if let Some(dir) = overrides.images_dir.as_ref() {
            self.storage.images_dir = Some(dir.clone());
        }
        let s3 = &mut self.storage.s3;
        if let Some(value) = overrides.s3_access_key_id.as_ref() {
            s3.access_key_id = Some(value.clone());
        }
        if let Some(value) = overrides.s3_secret_access_key.as_ref() {
            s3.secret_access_key = Some(value.clone());
        }
        if let Some(value) = overrides.s3_region.as_ref() {
            s3.region = Some(value.clone());
        }
        if let Some(value) = overrides.s3_bucket.as_ref() {
            s3.bucket = Some(value.clone());
        }
        if let Some(value) = overrides.s3_custom_domain.as_ref() {
            s3.custom_domain = Some(value.clone());
        }
        if let Some(value) = overrides.s3_endpoint.as_ref() {
            s3.endpoint = Some(value.clone());
        }
        if let Some(value) = overrides.s3_force_path_style {
            s3.force_path_style = Some(value);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            render,
            cache,
            storage,
            security,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            render: build_render_settings(render)?,
            cache: build_cache_settings(cache)?,
            storage: build_storage_settings(storage)?,
            security: build_security_settings(security)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
        debug_errors: server.debug_errors.unwrap_or(false),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let timeout_ms = render.timeout_ms.unwrap_or(DEFAULT_RENDER_TIMEOUT_MS);
    if timeout_ms == 0 {
        return Err(LoadError::invalid(
            "render.timeout_ms",
            "must be greater than zero",
        ));
    }

    let concurrency = non_zero_usize(
        render.concurrency.unwrap_or(DEFAULT_RENDER_CONCURRENCY),
        "render.concurrency",
    )?;

    let max_queue = render
        .max_queue
        .map(|value| {
            usize::try_from(value).map_err(|_| {
                LoadError::invalid("render.max_queue", "value exceeds supported range for usize")
            })
        })
        .transpose()?;

    let engine_command = render
        .engine_command
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENGINE_COMMAND));
    if engine_command.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "render.engine_command",
            "path must not be empty",
        ));
    }

    Ok(RenderSettings {
        timeout: Duration::from_millis(timeout_ms),
        concurrency,
        max_queue,
        engine_command,
        engine_args: render.engine_args.unwrap_or_default(),
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let ttl_ms = cache.ttl_ms.unwrap_or(DEFAULT_CACHE_TTL_MS);
    if ttl_ms == 0 {
        return Err(LoadError::invalid("cache.ttl_ms", "must be greater than zero"));
    }

    let max_entries = non_zero_usize(
        cache.max_entries.unwrap_or(DEFAULT_CACHE_MAX_ENTRIES),
        "cache.max_entries",
    )?;

    // Zero disables the background sweep; stores still sweep expired entries.
    let sweep_interval = match cache
        .sweep_interval_ms
        .unwrap_or(DEFAULT_CACHE_SWEEP_INTERVAL_MS)
    {
        0 => None,
        ms => Some(Duration::from_millis(ms)),
    };

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        ttl: Duration::from_millis(ttl_ms),
        max_entries,
        sweep_interval,
    })
}

fn build_storage_settings(storage: RawStorageSettings) -> Result<StorageSettings, LoadError> {
    let images_dir = storage
        .images_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_IMAGES_DIR));
    if images_dir.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "storage.images_dir",
            "path must not be empty",
        ));
    }

    let public_path = storage
        .public_path
        .unwrap_or_else(|| DEFAULT_PUBLIC_PATH.to_string());
    if public_path.trim_matches('/').is_empty() {
        return Err(LoadError::invalid(
            "storage.public_path",
            "must name a path segment such as `/images`",
        ));
    }

    let upload_timeout_ms = storage
        .upload_timeout_ms
        .unwrap_or(DEFAULT_UPLOAD_TIMEOUT_MS);
    if upload_timeout_ms == 0 {
        return Err(LoadError::invalid(
            "storage.upload_timeout_ms",
            "must be greater than zero",
        ));
    }

    Ok(StorageSettings {
        images_dir,
        public_path,
        key_prefix: storage
            .key_prefix
            .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string()),
        upload_timeout: Duration::from_millis(upload_timeout_ms),
        s3: build_s3_settings(storage.s3)?,
    })
}

fn build_s3_settings(s3: RawS3Settings) -> Result<Option<S3Settings>, LoadError> {
    let (Some(access_key_id), Some(secret_access_key), Some(bucket)) = (
        non_blank(s3.access_key_id),
        non_blank(s3.secret_access_key),
        non_blank(s3.bucket),
    ) else {
        return Ok(None);
    };

    let endpoint = non_blank(s3.endpoint);
    if let Some(endpoint) = endpoint.as_deref() {
        let parsed = Url::parse(endpoint).map_err(|err| {
            LoadError::invalid("storage.s3.endpoint", format!("invalid URL: {err}"))
        })?;
        if parsed.host_str().is_none() {
            return Err(LoadError::invalid(
                "storage.s3.endpoint",
                "URL must include a host",
            ));
        }
    }

    Ok(Some(S3Settings {
        access_key_id,
        secret_access_key,
        region: non_blank(s3.region).unwrap_or_else(|| DEFAULT_REGION.to_string()),
        bucket,
        custom_domain: non_blank(s3.custom_domain),
        endpoint,
        force_path_style: s3.force_path_style.unwrap_or(false),
    }))
}

fn build_security_settings(security: RawSecuritySettings) -> Result<SecuritySettings, LoadError> {
    let allowed_origins: Vec<String> = security
        .allowed_origins
        .unwrap_or_default()
        .into_iter()
        .filter_map(|origin| non_blank(Some(origin)))
        .collect();
    let allowed_origins = if allowed_origins.is_empty() {
        vec!["*".to_string()]
    } else {
        allowed_origins
    };

    let window = security
        .rate_limit_window_seconds
        .unwrap_or(DEFAULT_RATE_LIMIT_WINDOW_SECS);
    let max_requests = security
        .rate_limit_max_requests
        .unwrap_or(DEFAULT_RATE_LIMIT_MAX_REQUESTS);
    let max_body_bytes = non_zero_usize(
        security.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES),
        "security.max_body_bytes",
    )?;

    Ok(SecuritySettings {
        api_key: non_blank(security.api_key),
        allowed_origins,
        rate_limit_window_seconds: non_zero_u32(window, "security.rate_limit_window_seconds")?,
        rate_limit_max_requests: non_zero_u32(max_requests, "security.rate_limit_max_requests")?,
        max_body_bytes,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
    debug_errors: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    timeout_ms: Option<u64>,
    concurrency: Option<u64>,
    max_queue: Option<u64>,
    engine_command: Option<PathBuf>,
    engine_args: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    ttl_ms: Option<u64>,
    max_entries: Option<u64>,
    sweep_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    images_dir: Option<PathBuf>,
    public_path: Option<String>,
    key_prefix: Option<String>,
    upload_timeout_ms: Option<u64>,
    s3: RawS3Settings,
}

#[derive(Clone, Deserialize, Default)]
#[serde(default)]
struct RawS3Settings {
    access_key_id: Option<String>,
    secret_access_key: Option<String>,
    region: Option<String>,
    bucket: Option<String>,
    custom_domain: Option<String>,
    endpoint: Option<String>,
    force_path_style: Option<bool>,
}

impl fmt::Debug for RawS3Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawS3Settings")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Deserialize, Default)]
#[serde(default)]
struct RawSecuritySettings {
    api_key: Option<String>,
    allowed_origins: Option<Vec<String>>,
    rate_limit_window_seconds: Option<u64>,
    rate_limit_max_requests: Option<u64>,
    max_body_bytes: Option<u64>,
}

impl fmt::Debug for RawSecuritySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawSecuritySettings")
            .field("allowed_origins", &self.allowed_origins)
            .field("rate_limit_window_seconds", &self.rate_limit_window_seconds)
            .field("rate_limit_max_requests", &self.rate_limit_max_requests)
            .field("max_body_bytes", &self.max_body_bytes)
            .finish_non_exhaustive()
    }
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
